//! Session pipeline: fetch -> normalize -> project
//!
//! Cars are independent. A car that cannot be normalized or projected is
//! reported in `failed` and the rest of the session still comes back.

use crate::state::AppState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use trackline_core::units::Seconds;
use trackline_core::{
    normalize_session, project, CarId, MotionCurve, RawSample, SessionQuery, SourceError,
    TrackCenterline,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Resolution must be between 2 and {max}, got {resolution}")]
    InvalidResolution { resolution: usize, max: usize },

    #[error("Projection worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarFailure {
    pub car_id: CarId,
    pub reason: String,
}

/// Motion curves for one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionCurves {
    pub query: SessionQuery,
    pub resolved: SessionQuery,
    pub from_cache: bool,
    pub curves: BTreeMap<CarId, MotionCurve>,
    pub failed: Vec<CarFailure>,
}

/// Latest valid timestamp per car; the real-world span of its curve
fn durations(samples: &[RawSample]) -> BTreeMap<&CarId, Seconds> {
    let mut spans: BTreeMap<&CarId, Seconds> = BTreeMap::new();
    for sample in samples {
        let t = sample.timestamp.0;
        if !t.is_finite() || t < 0.0 {
            continue;
        }
        let span = spans.entry(&sample.car_id).or_default();
        if t > span.0 {
            *span = Seconds(t);
        }
    }
    spans
}

/// Normalize and project every car in `samples`
pub fn build_curves(
    samples: &[RawSample],
    track: &TrackCenterline,
    resolution: usize,
) -> (BTreeMap<CarId, MotionCurve>, Vec<CarFailure>) {
    let spans = durations(samples);
    let mut curves = BTreeMap::new();
    let mut failed = Vec::new();

    for (car_id, normalized) in normalize_session(samples, track) {
        let duration = spans.get(&car_id).copied().unwrap_or_default();
        let result = normalized
            .map_err(|e| e.to_string())
            .and_then(|n| project(&n, track, resolution, duration).map_err(|e| e.to_string()));

        match result {
            Ok(curve) => {
                curves.insert(car_id, curve);
            }
            Err(reason) => {
                warn!("Skipping car {}: {}", car_id, reason);
                failed.push(CarFailure { car_id, reason });
            }
        }
    }

    (curves, failed)
}

/// Run the full pipeline for `query` and remember the result
///
/// The fetch can be cancelled through [`AppState::cancel_run`]; projection
/// runs on a blocking worker.
pub async fn run(
    state: &AppState,
    query: &SessionQuery,
    resolution: usize,
    force_refresh: bool,
) -> Result<Arc<SessionCurves>, PipelineError> {
    if resolution < 2 || resolution > state.max_resolution {
        return Err(PipelineError::InvalidResolution {
            resolution,
            max: state.max_resolution,
        });
    }

    let (run_id, cancel) = state.begin_run(query).await;
    let fetched = state
        .source
        .fetch_cancellable(query, force_refresh, &cancel)
        .await;
    state.end_run(query, run_id).await;
    let fetched = fetched?;

    let track = state.track.clone();
    let samples = fetched.samples;
    let (curves, failed) =
        tokio::task::spawn_blocking(move || build_curves(&samples, &track, resolution))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?;

    info!(
        "{}: {} curves, {} cars failed (data from {}{})",
        query,
        curves.len(),
        failed.len(),
        fetched.resolved,
        if fetched.from_cache { ", cached" } else { "" }
    );

    let session = Arc::new(SessionCurves {
        query: query.clone(),
        resolved: fetched.resolved,
        from_cache: fetched.from_cache,
        curves,
        failed,
    });
    state.store_session(session.clone()).await;
    Ok(session)
}
