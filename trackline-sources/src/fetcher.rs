//! Telemetry source: cache, retry and year fallback around a transport
//!
//! Lookup order for a query:
//! 1. the cache (unless a refresh is forced), following a fresh alias record
//! 2. the transport, retried with backoff on transient failures
//! 3. the same circuit and session kind in older years, when the transport
//!    reports no data
//!
//! A payload is always cached under the session that served it. When an
//! older year answered, an alias record under the requested key remembers
//! that for `alias_max_age`, after which the requested year is tried again.

use crate::cache::KeyLocks;
use crate::payload::{is_empty_payload, parse_samples};
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy, TokioSleeper};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trackline_core::model::DistanceUnits;
use trackline_core::{
    CacheRecord, CacheStore, RawSample, SessionQuery, Sleeper, SourceError, TelemetryTransport,
    TransportError, TransportResponse,
};

/// Tunables for [`TelemetrySource`]
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    pub retry: RetryPolicy,

    /// Older years to try after the requested one
    pub fallback_years: u16,

    /// How long a fallback alias is trusted before the requested year is retried
    pub alias_max_age: Duration,

    /// Unit of the `distance` field in payloads
    pub distance_units: DistanceUnits,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            fallback_years: 3,
            alias_max_age: Duration::from_secs(24 * 60 * 60),
            distance_units: DistanceUnits::Meters,
        }
    }
}

/// Samples for one session plus where they came from
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSession {
    pub requested: SessionQuery,

    /// Session whose data was actually used
    pub resolved: SessionQuery,

    pub from_cache: bool,

    /// Payload exactly as fetched
    pub payload: String,

    pub samples: Vec<RawSample>,
}

impl FetchedSession {
    pub fn used_fallback(&self) -> bool {
        self.requested != self.resolved
    }
}

pub struct TelemetrySource {
    transport: Arc<dyn TelemetryTransport>,
    cache: Arc<dyn CacheStore>,
    sleeper: Arc<dyn Sleeper>,
    options: SourceOptions,
    locks: KeyLocks,
}

impl TelemetrySource {
    pub fn new(transport: Arc<dyn TelemetryTransport>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            transport,
            cache,
            sleeper: Arc::new(TokioSleeper),
            options: SourceOptions::default(),
            locks: KeyLocks::default(),
        }
    }

    pub fn with_options(mut self, options: SourceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Fetch a session's samples
    ///
    /// With `force_refresh` the cache is bypassed for reading (and for
    /// fallback years too) but still written with whatever is fetched.
    pub async fn fetch(
        &self,
        query: &SessionQuery,
        force_refresh: bool,
    ) -> Result<FetchedSession, SourceError> {
        let _guard = self.locks.lock(&query.cache_key()).await;

        if !force_refresh {
            if let Some(hit) = self.lookup(query)? {
                info!("Serving {} from cache (resolved to {})", query, hit.resolved);
                return Ok(hit);
            }
        }

        let mut attempts = 0;
        for candidate in query.fallback_candidates(self.options.fallback_years) {
            attempts += 1;
            let is_fallback = candidate != *query;
            let _candidate_guard = if is_fallback {
                Some(self.locks.lock(&candidate.cache_key()).await)
            } else {
                None
            };

            if is_fallback && !force_refresh {
                if let Some(payload) = self.cached_payload(&candidate)? {
                    let samples = parse_samples(&payload, self.options.distance_units)?;
                    self.write_alias(query, &candidate)?;
                    info!("{} has no data; using cached {}", query, candidate);
                    return Ok(FetchedSession {
                        requested: query.clone(),
                        resolved: candidate,
                        from_cache: true,
                        payload,
                        samples,
                    });
                }
            }

            let payload = match self.request(&candidate).await? {
                TransportResponse::Payload(payload) if !is_empty_payload(&payload) => payload,
                _ => {
                    info!("No data for {}", candidate);
                    continue;
                }
            };

            // Only well-formed payloads reach the cache
            let samples = parse_samples(&payload, self.options.distance_units)?;
            self.cache.put(&CacheRecord::Payload {
                query: candidate.clone(),
                resolved: candidate.clone(),
                fetched_at: Utc::now(),
                payload: payload.clone(),
            })?;
            if is_fallback {
                self.write_alias(query, &candidate)?;
            }

            info!(
                "Fetched {} samples for {} via {}",
                samples.len(),
                candidate,
                self.transport.name()
            );
            return Ok(FetchedSession {
                requested: query.clone(),
                resolved: candidate,
                from_cache: false,
                payload,
                samples,
            });
        }

        warn!("No data for {} after {} sessions", query, attempts);
        Err(SourceError::NoDataAvailable {
            requested: query.clone(),
            attempts,
        })
    }

    /// [`fetch`](Self::fetch), abandoned as soon as `cancel` fires
    ///
    /// Cache writes happen without suspension points in between, so a
    /// cancelled fetch leaves the cache as it was.
    pub async fn fetch_cancellable(
        &self,
        query: &SessionQuery,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<FetchedSession, SourceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Fetch of {} cancelled", query);
                Err(SourceError::Cancelled)
            }
            result = self.fetch(query, force_refresh) => result,
        }
    }

    fn lookup(&self, query: &SessionQuery) -> Result<Option<FetchedSession>, SourceError> {
        let resolved = match self.cache.get(query)? {
            None => return Ok(None),
            Some(CacheRecord::Payload { .. }) => query.clone(),
            Some(CacheRecord::Alias {
                resolved,
                created_at,
                ..
            }) => {
                let age = Utc::now().signed_duration_since(created_at);
                let expired = age
                    .to_std()
                    .map_or(false, |age| age > self.options.alias_max_age);
                if expired {
                    debug!("Alias {} -> {} expired; retrying {}", query, resolved, query);
                    return Ok(None);
                }
                resolved
            }
        };

        let payload = match self.cached_payload(&resolved)? {
            Some(payload) => payload,
            None => {
                warn!("Alias {} -> {} points at nothing", query, resolved);
                return Ok(None);
            }
        };

        match parse_samples(&payload, self.options.distance_units) {
            Ok(samples) => Ok(Some(FetchedSession {
                requested: query.clone(),
                resolved,
                from_cache: true,
                payload,
                samples,
            })),
            Err(e) => {
                warn!("Cached payload for {} unusable ({}); refetching", resolved, e);
                Ok(None)
            }
        }
    }

    fn cached_payload(&self, query: &SessionQuery) -> Result<Option<String>, SourceError> {
        Ok(match self.cache.get(query)? {
            Some(CacheRecord::Payload { payload, .. }) => Some(payload),
            _ => None,
        })
    }

    fn write_alias(&self, requested: &SessionQuery, resolved: &SessionQuery) -> Result<(), SourceError> {
        self.cache.put(&CacheRecord::Alias {
            query: requested.clone(),
            resolved: resolved.clone(),
            created_at: Utc::now(),
        })
    }

    /// One logical request, retried per the policy
    async fn request(&self, query: &SessionQuery) -> Result<TransportResponse, SourceError> {
        let result = retry_with_backoff(&self.options.retry, self.sleeper.as_ref(), |attempt| {
            debug!("Requesting {} (attempt {})", query, attempt);
            self.transport.get(query)
        })
        .await;

        result.map_err(|e| match e {
            RetryError::Exhausted {
                attempts,
                last: TransportError::RateLimited { .. },
            } => SourceError::RateLimitExceeded { attempts },
            RetryError::Exhausted { attempts, last } => {
                SourceError::TransportExhausted { attempts, last }
            }
            RetryError::Fatal { error, .. } => SourceError::Transport(error),
        })
    }
}
