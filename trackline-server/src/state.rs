//! Application state management

use crate::pipeline::SessionCurves;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use trackline_core::projector::MAX_RESOLUTION;
use trackline_core::{SessionQuery, TrackCenterline};
use trackline_sources::TelemetrySource;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<TelemetrySource>,

    pub track: Arc<TrackCenterline>,

    /// Resolution used when a request does not name one
    pub default_resolution: usize,

    /// Requests above this are rejected before any work starts
    pub max_resolution: usize,

    /// Last computed curves per requested session (keyed by cache key)
    pub sessions: Arc<RwLock<HashMap<String, Arc<SessionCurves>>>>,

    /// Pipelines currently fetching, with the token that cancels them
    pub in_flight: Arc<RwLock<HashMap<String, (u64, CancellationToken)>>>,

    next_run: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(source: TelemetrySource, track: TrackCenterline, default_resolution: usize) -> Self {
        Self {
            source: Arc::new(source),
            track: Arc::new(track),
            default_resolution,
            max_resolution: MAX_RESOLUTION,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            next_run: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_max_resolution(mut self, max_resolution: usize) -> Self {
        self.max_resolution = max_resolution.min(MAX_RESOLUTION);
        self
    }

    /// Register a run for `query`, replacing the token of any earlier run
    pub async fn begin_run(&self, query: &SessionQuery) -> (u64, CancellationToken) {
        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let mut in_flight = self.in_flight.write().await;
        in_flight.insert(query.cache_key(), (id, token.clone()));
        (id, token)
    }

    /// Forget a run, unless a newer one has taken its slot
    pub async fn end_run(&self, query: &SessionQuery, id: u64) {
        let mut in_flight = self.in_flight.write().await;
        let key = query.cache_key();
        if in_flight.get(&key).map_or(false, |(current, _)| *current == id) {
            in_flight.remove(&key);
        }
    }

    /// Cancel the in-flight run for `query`; false when nothing is running
    pub async fn cancel_run(&self, query: &SessionQuery) -> bool {
        let in_flight = self.in_flight.read().await;
        match in_flight.get(&query.cache_key()) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn session(&self, query: &SessionQuery) -> Option<Arc<SessionCurves>> {
        let sessions = self.sessions.read().await;
        sessions.get(&query.cache_key()).cloned()
    }

    pub async fn store_session(&self, curves: Arc<SessionCurves>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(curves.query.cache_key(), curves);
    }
}
