//! HttpTransport against a local fake telemetry API

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trackline_core::{
    SessionKind, SessionQuery, SourceError, TelemetryTransport, TransportError, TransportResponse,
};
use trackline_sources::{HttpTransport, MemoryCache, RetryPolicy, SourceOptions, TelemetrySource};

const PAYLOAD: &str = r#"[{"driver_number": 44, "time": 0.0, "distance": 0.0},
                          {"driver_number": 44, "time": 5.0, "distance": 310.5}]"#;

#[derive(Deserialize)]
struct TelemetryParams {
    year: u16,
    circuit: String,
    session: String,
}

/// Per-year canned behaviour of the fake API
#[derive(Clone, Copy)]
enum Behaviour {
    Data,
    Empty,
    Missing,
    RateLimitedThen(u32),
    ServerError,
    Forbidden,
}

#[derive(Clone, Default)]
struct FakeApi {
    years: Arc<Mutex<HashMap<u16, Behaviour>>>,
    hits: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<(u16, String, String)>>>,
}

async fn telemetry(
    State(api): State<FakeApi>,
    Query(params): Query<TelemetryParams>,
) -> axum::response::Response {
    let hit = api.hits.fetch_add(1, Ordering::SeqCst) + 1;
    api.seen
        .lock()
        .unwrap()
        .push((params.year, params.circuit.clone(), params.session.clone()));

    let behaviour = api
        .years
        .lock()
        .unwrap()
        .get(&params.year)
        .copied()
        .unwrap_or(Behaviour::Missing);

    match behaviour {
        Behaviour::Data => PAYLOAD.into_response(),
        Behaviour::Empty => "[]".into_response(),
        Behaviour::Missing => StatusCode::NOT_FOUND.into_response(),
        Behaviour::RateLimitedThen(n) if hit <= n => {
            (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")]).into_response()
        }
        Behaviour::RateLimitedThen(_) => PAYLOAD.into_response(),
        Behaviour::ServerError => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Behaviour::Forbidden => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn serve(api: FakeApi) -> SocketAddr {
    let app = Router::new()
        .route("/telemetry", get(telemetry))
        .with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn fake(years: &[(u16, Behaviour)]) -> FakeApi {
    let api = FakeApi::default();
    api.years.lock().unwrap().extend(years.iter().copied());
    api
}

fn transport(addr: SocketAddr) -> HttpTransport {
    HttpTransport::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap()
}

fn quick_source(addr: SocketAddr) -> TelemetrySource {
    TelemetrySource::new(Arc::new(transport(addr)), Arc::new(MemoryCache::new())).with_options(
        SourceOptions {
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(10),
            },
            ..SourceOptions::default()
        },
    )
}

fn interlagos(year: u16) -> SessionQuery {
    SessionQuery::new(year, "Interlagos", SessionKind::Sprint)
}

#[tokio::test]
async fn test_sends_query_parameters_and_returns_body_verbatim() {
    let api = fake(&[(2024, Behaviour::Data)]);
    let addr = serve(api.clone()).await;

    let response = transport(addr).get(&interlagos(2024)).await.unwrap();
    assert_eq!(response, TransportResponse::Payload(PAYLOAD.to_string()));
    assert_eq!(
        api.seen.lock().unwrap().as_slice(),
        &[(2024, "interlagos".to_string(), "sprint".to_string())]
    );
}

#[tokio::test]
async fn test_maps_statuses() {
    let api = fake(&[
        (2024, Behaviour::Empty),
        (2023, Behaviour::RateLimitedThen(u32::MAX)),
        (2022, Behaviour::ServerError),
        (2021, Behaviour::Forbidden),
    ]);
    let addr = serve(api).await;
    let transport = transport(addr);

    assert_eq!(transport.get(&interlagos(2024)).await.unwrap(), TransportResponse::NoData);
    assert_eq!(transport.get(&interlagos(2020)).await.unwrap(), TransportResponse::NoData);
    assert_eq!(
        transport.get(&interlagos(2023)).await.unwrap_err(),
        TransportError::RateLimited {
            retry_after: Some(Duration::ZERO)
        }
    );
    assert_eq!(
        transport.get(&interlagos(2022)).await.unwrap_err(),
        TransportError::Server(503)
    );
    assert_eq!(
        transport.get(&interlagos(2021)).await.unwrap_err(),
        TransportError::Client(403)
    );
}

#[tokio::test]
async fn test_connection_refused_is_a_network_error() {
    // Bind then drop to get a port with nothing listening
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let err = transport(addr).get(&interlagos(2024)).await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_source_retries_rate_limits_over_http() {
    let api = fake(&[(2024, Behaviour::RateLimitedThen(3))]);
    let addr = serve(api.clone()).await;
    let source = quick_source(addr);

    let fetched = source.fetch(&interlagos(2024), false).await.unwrap();
    assert_eq!(fetched.samples.len(), 2);
    assert_eq!(api.hits.load(Ordering::SeqCst), 4);

    let cached = source.fetch(&interlagos(2024), false).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(api.hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_source_falls_back_over_http() {
    let api = fake(&[(2022, Behaviour::Data)]);
    let addr = serve(api.clone()).await;
    let source = quick_source(addr);

    let fetched = source.fetch(&interlagos(2024), false).await.unwrap();
    assert_eq!(fetched.resolved, interlagos(2022));
    let years: Vec<u16> = api.seen.lock().unwrap().iter().map(|(y, _, _)| *y).collect();
    assert_eq!(years, vec![2024, 2023, 2022]);
}

#[tokio::test]
async fn test_source_surfaces_server_errors_after_retries() {
    let api = fake(&[(2024, Behaviour::ServerError)]);
    let addr = serve(api.clone()).await;

    let err = quick_source(addr)
        .fetch(&interlagos(2024), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::TransportExhausted { attempts: 5, .. }));
    assert_eq!(api.hits.load(Ordering::SeqCst), 5);
}
