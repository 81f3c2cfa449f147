//! Integration tests for TelemetrySource
//!
//! Drives the fetcher with scripted transports and a sleeper that records
//! delays instead of waiting.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trackline_core::{
    CacheRecord, CacheStore, SessionKind, SessionQuery, Sleeper, SourceError, TelemetryTransport,
    TransportError, TransportResponse,
};
use trackline_sources::{
    DemoConfig, DemoTransport, FileCache, MemoryCache, RetryPolicy, SourceOptions,
    TelemetrySource,
};

const PAYLOAD: &str = r#"[
  {"driver_number": 1, "t": 0.0, "d": 0.0},
  {"driver_number": 1, "t": 10.0, "d": 200.0}
]"#;

/// Replies from a script, then repeats the fallback reply; records every request
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    otherwise: Result<TransportResponse, TransportError>,
    /// Years with data, answered with PAYLOAD once the script is exhausted
    years_with_data: Vec<u16>,
    calls: Mutex<Vec<SessionQuery>>,
}

impl ScriptedTransport {
    fn new(otherwise: Result<TransportResponse, TransportError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            otherwise,
            years_with_data: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn then(self, reply: Result<TransportResponse, TransportError>) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    fn with_data_for(mut self, year: u16) -> Self {
        self.years_with_data.push(year);
        self
    }

    fn calls(&self) -> Vec<SessionQuery> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get(&self, query: &SessionQuery) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(query.clone());
        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return reply;
        }
        if self.years_with_data.contains(&query.series_year()) {
            return Ok(TransportResponse::Payload(PAYLOAD.to_string()));
        }
        self.otherwise.clone()
    }
}

#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Never returns
struct StalledTransport {
    calls: AtomicU32,
}

#[async_trait]
impl TelemetryTransport for StalledTransport {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn get(&self, _query: &SessionQuery) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

fn singapore(year: u16) -> SessionQuery {
    SessionQuery::new(year, "Singapore", SessionKind::Race)
}

fn source(
    transport: Arc<dyn TelemetryTransport>,
    cache: Arc<dyn CacheStore>,
    sleeper: Arc<RecordingSleeper>,
) -> TelemetrySource {
    TelemetrySource::new(transport, cache)
        .with_sleeper(sleeper)
        .with_options(SourceOptions {
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(100),
                multiplier: 2.0,
                max_delay: Duration::from_secs(2),
            },
            ..SourceOptions::default()
        })
}

fn temp_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("trackline-src-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// ==================== Cache ====================

#[tokio::test]
async fn test_second_fetch_is_served_from_cache() {
    let dir = temp_dir("idempotent");
    let transport = Arc::new(ScriptedTransport::new(Ok(TransportResponse::Payload(
        PAYLOAD.to_string(),
    ))));
    let cache = Arc::new(FileCache::open(&dir).unwrap());
    let source = source(transport.clone(), cache, Arc::default());

    let first = source.fetch(&singapore(2024), false).await.unwrap();
    let second = source.fetch(&singapore(2024), false).await.unwrap();

    assert_eq!(transport.calls().len(), 1);
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.payload.as_bytes(), second.payload.as_bytes());
    assert_eq!(first.samples, second.samples);
    assert!(dir.join("2024_singapore_race.json").exists());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let transport = Arc::new(ScriptedTransport::new(Ok(TransportResponse::Payload(
        PAYLOAD.to_string(),
    ))));
    let source = source(transport.clone(), Arc::new(MemoryCache::new()), Arc::default());

    source.fetch(&singapore(2024), false).await.unwrap();
    let refreshed = source.fetch(&singapore(2024), true).await.unwrap();

    assert_eq!(transport.calls().len(), 2);
    assert!(!refreshed.from_cache);
}

#[tokio::test]
async fn test_malformed_payload_is_not_cached() {
    let transport = Arc::new(
        ScriptedTransport::new(Ok(TransportResponse::Payload(PAYLOAD.to_string())))
            .then(Ok(TransportResponse::Payload("{\"oops\": true}".to_string()))),
    );
    let cache = Arc::new(MemoryCache::new());
    let source = source(transport.clone(), cache.clone(), Arc::default());

    let err = source.fetch(&singapore(2024), false).await.unwrap_err();
    assert!(matches!(err, SourceError::MalformedPayload(_)));
    assert!(cache.is_empty());

    // Malformed data is a validation failure, never retried
    assert_eq!(transport.calls().len(), 1);
}

// ==================== Fallback ====================

#[tokio::test]
async fn test_fallback_terminates_after_bounded_attempts() {
    let transport = Arc::new(ScriptedTransport::new(Ok(TransportResponse::NoData)));
    let cache = Arc::new(MemoryCache::new());
    let source = source(transport.clone(), cache.clone(), Arc::default());

    let err = source.fetch(&singapore(2024), false).await.unwrap_err();
    match err {
        SourceError::NoDataAvailable { requested, attempts } => {
            assert_eq!(requested, singapore(2024));
            assert_eq!(attempts, 4);
        }
        other => panic!("expected NoDataAvailable, got {:?}", other),
    }

    let years: Vec<u16> = transport.calls().iter().map(|q| q.series_year()).collect();
    assert_eq!(years, vec![2024, 2023, 2022, 2021]);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_fallback_caches_under_resolved_key_with_alias() {
    let transport = Arc::new(
        ScriptedTransport::new(Ok(TransportResponse::NoData)).with_data_for(2023),
    );
    let cache = Arc::new(MemoryCache::new());
    let source = source(transport.clone(), cache.clone(), Arc::default());

    let fetched = source.fetch(&singapore(2024), false).await.unwrap();
    assert_eq!(fetched.resolved, singapore(2023));
    assert!(fetched.used_fallback());
    assert_eq!(fetched.samples.len(), 2);

    assert!(matches!(
        cache.get(&singapore(2023)).unwrap(),
        Some(CacheRecord::Payload { .. })
    ));
    match cache.get(&singapore(2024)).unwrap() {
        Some(CacheRecord::Alias { resolved, .. }) => assert_eq!(resolved, singapore(2023)),
        other => panic!("expected alias, got {:?}", other),
    }

    // Served through the alias without touching the transport
    let again = source.fetch(&singapore(2024), false).await.unwrap();
    assert!(again.from_cache);
    assert_eq!(again.resolved, singapore(2023));
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn test_expired_alias_retries_requested_year() {
    let transport = Arc::new(
        ScriptedTransport::new(Ok(TransportResponse::NoData))
            .with_data_for(2023)
            .with_data_for(2024),
    );
    let cache = Arc::new(MemoryCache::new());
    cache
        .put(&CacheRecord::Payload {
            query: singapore(2023),
            resolved: singapore(2023),
            fetched_at: Utc::now(),
            payload: PAYLOAD.to_string(),
        })
        .unwrap();
    cache
        .put(&CacheRecord::Alias {
            query: singapore(2024),
            resolved: singapore(2023),
            created_at: Utc::now() - ChronoDuration::days(2),
        })
        .unwrap();
    let source = source(transport.clone(), cache.clone(), Arc::default());

    let fetched = source.fetch(&singapore(2024), false).await.unwrap();
    assert_eq!(fetched.resolved, singapore(2024));
    assert!(!fetched.from_cache);
    assert_eq!(transport.calls(), vec![singapore(2024)]);
    assert!(matches!(
        cache.get(&singapore(2024)).unwrap(),
        Some(CacheRecord::Payload { .. })
    ));
}

#[tokio::test]
async fn test_fallback_uses_cached_older_year() {
    let transport = Arc::new(ScriptedTransport::new(Ok(TransportResponse::NoData)));
    let cache = Arc::new(MemoryCache::new());
    cache
        .put(&CacheRecord::Payload {
            query: singapore(2022),
            resolved: singapore(2022),
            fetched_at: Utc::now(),
            payload: PAYLOAD.to_string(),
        })
        .unwrap();
    let source = source(transport.clone(), cache, Arc::default());

    let fetched = source.fetch(&singapore(2024), false).await.unwrap();
    assert_eq!(fetched.resolved, singapore(2022));
    assert!(fetched.from_cache);
    assert_eq!(transport.calls(), vec![singapore(2024), singapore(2023)]);
}

// ==================== Retry ====================

#[tokio::test]
async fn test_rate_limited_three_times_then_success_is_cached() {
    let rate_limited = || Err(TransportError::RateLimited { retry_after: None });
    let transport = Arc::new(
        ScriptedTransport::new(Ok(TransportResponse::Payload(PAYLOAD.to_string())))
            .then(rate_limited())
            .then(rate_limited())
            .then(rate_limited()),
    );
    let cache = Arc::new(MemoryCache::new());
    let sleeper = Arc::new(RecordingSleeper::default());
    let source = source(transport.clone(), cache.clone(), sleeper.clone());

    let fetched = source.fetch(&singapore(2024), false).await.unwrap();
    assert_eq!(fetched.payload, PAYLOAD);
    assert_eq!(transport.calls().len(), 4);
    assert_eq!(
        *sleeper.delays.lock().unwrap(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );

    match cache.get(&singapore(2024)).unwrap() {
        Some(CacheRecord::Payload { payload, .. }) => assert_eq!(payload, PAYLOAD),
        other => panic!("expected cached payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_persistent_rate_limit_surfaces_rate_limit_exceeded() {
    let transport = Arc::new(ScriptedTransport::new(Err(TransportError::RateLimited {
        retry_after: Some(Duration::from_secs(1)),
    })));
    let source = source(transport.clone(), Arc::new(MemoryCache::new()), Arc::default());

    let err = source.fetch(&singapore(2024), false).await.unwrap_err();
    assert!(matches!(err, SourceError::RateLimitExceeded { attempts: 5 }));

    // Rate limiting is not "no data": no fallback years were tried
    assert!(transport.calls().iter().all(|q| q.series_year() == 2024));
}

#[tokio::test]
async fn test_server_errors_exhaust_and_client_errors_are_fatal() {
    let transport = Arc::new(ScriptedTransport::new(Err(TransportError::Server(503))));
    let source_a = source(transport.clone(), Arc::new(MemoryCache::new()), Arc::default());
    let err = source_a.fetch(&singapore(2024), false).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::TransportExhausted {
            attempts: 5,
            last: TransportError::Server(503)
        }
    ));

    let transport = Arc::new(ScriptedTransport::new(Err(TransportError::Client(403))));
    let source_b = source(transport.clone(), Arc::new(MemoryCache::new()), Arc::default());
    let err = source_b.fetch(&singapore(2024), false).await.unwrap_err();
    assert!(matches!(err, SourceError::Transport(TransportError::Client(403))));
    assert_eq!(transport.calls().len(), 1);
}

// ==================== Cancellation ====================

#[tokio::test]
async fn test_cancelled_fetch_writes_nothing() {
    let transport = Arc::new(StalledTransport {
        calls: AtomicU32::new(0),
    });
    let cache = Arc::new(MemoryCache::new());
    let source = Arc::new(source(transport.clone(), cache.clone(), Arc::default()));
    let cancel = CancellationToken::new();

    let task = {
        let source = source.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            source
                .fetch_cancellable(&singapore(2024), false, &cancel)
                .await
        })
    };

    while transport.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(SourceError::Cancelled)));
    assert!(cache.is_empty());

    // The key lock was released with the cancelled fetch: a second fetch
    // reaches the transport
    let second = CancellationToken::new();
    let task = {
        let source = source.clone();
        let second = second.clone();
        tokio::spawn(async move {
            source
                .fetch_cancellable(&singapore(2024), false, &second)
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("second fetch never reached the transport");
    second.cancel();
    assert!(matches!(task.await.unwrap(), Err(SourceError::Cancelled)));
}

// ==================== Demo ====================

#[tokio::test]
async fn test_demo_transport_falls_back_to_latest_season() {
    let demo = Arc::new(DemoTransport::new(DemoConfig {
        cars: 3,
        laps: 1,
        latest_year: Some(2022),
        ..DemoConfig::default()
    }));
    let source = TelemetrySource::new(demo.clone(), Arc::new(MemoryCache::new()));

    let fetched = source.fetch(&singapore(2024), false).await.unwrap();
    assert_eq!(fetched.resolved, singapore(2022));
    assert_eq!(demo.requests(), 3);

    let cars: std::collections::BTreeSet<_> =
        fetched.samples.iter().map(|s| s.car_id.clone()).collect();
    assert_eq!(cars.len(), 3);
}
