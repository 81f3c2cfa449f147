//! Telemetry source seams
//!
//! The telemetry source is assembled from three injected pieces:
//! - a transport that performs one request for one session
//! - a cache store holding raw payloads keyed by session
//! - a sleeper used between retries, so backoff can be tested without waiting

use crate::error::{SourceError, TransportError};
use crate::model::SessionQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a successful request
#[derive(Debug, Clone, PartialEq)]
pub enum TransportResponse {
    /// Raw JSON body, kept verbatim for the cache
    Payload(String),
    /// The API answered but holds nothing for this session
    NoData,
}

/// Trait for telemetry transports
///
/// Each transport performs exactly one request per call. Retrying, fallback
/// and caching are layered on top by the telemetry source.
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    /// Get the name of this transport (e.g., "http", "demo")
    fn name(&self) -> &str;

    async fn get(&self, query: &SessionQuery) -> Result<TransportResponse, TransportError>;
}

/// Suspends between retry attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// One record in the session cache
///
/// Records are immutable once written; a forced refresh replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheRecord {
    /// Raw payload as fetched
    Payload {
        query: SessionQuery,
        /// Session that actually served the payload
        resolved: SessionQuery,
        fetched_at: DateTime<Utc>,
        payload: String,
    },
    /// The requested session had no data; `resolved` is the older session that did
    Alias {
        query: SessionQuery,
        resolved: SessionQuery,
        created_at: DateTime<Utc>,
    },
}

impl CacheRecord {
    /// The key this record is stored under
    pub fn query(&self) -> &SessionQuery {
        match self {
            CacheRecord::Payload { query, .. } | CacheRecord::Alias { query, .. } => query,
        }
    }

    pub fn resolved(&self) -> &SessionQuery {
        match self {
            CacheRecord::Payload { resolved, .. } | CacheRecord::Alias { resolved, .. } => resolved,
        }
    }
}

/// Key-value store of cache records
///
/// Writes must be all-or-nothing: a reader sees either the previous record
/// or the complete new one.
pub trait CacheStore: Send + Sync {
    fn get(&self, query: &SessionQuery) -> Result<Option<CacheRecord>, SourceError>;

    fn put(&self, record: &CacheRecord) -> Result<(), SourceError>;

    /// Make every completed write durable. Called at shutdown.
    fn flush(&self) -> Result<(), SourceError>;
}
