//! REST API routes

use crate::pipeline::{self, PipelineError};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use trackline_core::{CarId, Keyframe, SessionKind, SessionQuery, SourceError, Vector3};

type ApiError = (StatusCode, String);

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/track", get(track))
        .route("/api/sessions/:year/:circuit/:kind", get(session_curves))
        .route(
            "/api/sessions/:year/:circuit/:kind/cars/:car_id/sample",
            get(sample_car),
        )
        .route(
            "/api/sessions/:year/:circuit/:kind/cars/:car_id/keyframes",
            get(car_keyframes),
        )
        .route("/api/sessions/:year/:circuit/:kind/cancel", post(cancel_session))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn session_query(year: u16, circuit: &str, kind: &str) -> Result<SessionQuery, ApiError> {
    let kind: SessionKind = kind.parse().map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    if circuit.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Empty circuit".to_string()));
    }
    Ok(SessionQuery::new(year, circuit, kind))
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::InvalidResolution { .. } => StatusCode::BAD_REQUEST,
        PipelineError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::Source(source) => match source {
            SourceError::NoDataAvailable { .. } => StatusCode::NOT_FOUND,
            SourceError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            SourceError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            SourceError::TransportExhausted { .. } | SourceError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            SourceError::Cancelled => StatusCode::CONFLICT,
            SourceError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

// === Health ===

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

// === Track ===

#[derive(Serialize)]
struct TrackInfo {
    total_length: f64,
    points: Vec<Vector3<f64>>,
}

async fn track(State(state): State<AppState>) -> Json<TrackInfo> {
    Json(TrackInfo {
        total_length: state.track.total_length().0,
        points: state.track.points().to_vec(),
    })
}

// === Sessions ===

#[derive(Deserialize)]
struct SessionParams {
    resolution: Option<usize>,
    #[serde(default)]
    refresh: bool,
}

async fn session_curves(
    State(state): State<AppState>,
    Path((year, circuit, kind)): Path<(u16, String, String)>,
    Query(params): Query<SessionParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = session_query(year, &circuit, &kind)?;
    let resolution = params.resolution.unwrap_or(state.default_resolution);

    let curves = pipeline::run(&state, &query, resolution, params.refresh)
        .await
        .map_err(|e| {
            tracing::warn!("Session {} failed: {}", query, e);
            (status_for(&e), e.to_string())
        })?;

    Ok(Json(curves.as_ref().clone()))
}

#[derive(Deserialize)]
struct SampleParams {
    t: f64,
}

#[derive(Serialize)]
struct CarSample {
    car_id: CarId,
    time_fraction: f64,
    position: Vector3<f64>,
    heading: Vector3<f64>,
}

async fn sample_car(
    State(state): State<AppState>,
    Path((year, circuit, kind, car_id)): Path<(u16, String, String, String)>,
    Query(params): Query<SampleParams>,
) -> Result<Json<CarSample>, ApiError> {
    let query = session_query(year, &circuit, &kind)?;
    if !params.t.is_finite() {
        return Err((StatusCode::BAD_REQUEST, "t must be a finite number".to_string()));
    }

    let session = state.session(&query).await.ok_or((
        StatusCode::NOT_FOUND,
        format!("No curves computed for {}", query),
    ))?;
    let car_id = CarId::new(car_id);
    let curve = session.curves.get(&car_id).ok_or((
        StatusCode::NOT_FOUND,
        format!("No curve for car {} in {}", car_id, query),
    ))?;

    let time_fraction = params.t.clamp(0.0, 1.0);
    let (position, heading) = curve.sample_at(time_fraction);
    Ok(Json(CarSample {
        car_id,
        time_fraction,
        position,
        heading,
    }))
}

#[derive(Deserialize)]
struct KeyframeParams {
    #[serde(default = "default_fps")]
    fps: f64,
    #[serde(default = "default_speed")]
    speed: f64,
}

const MAX_FPS: f64 = 1000.0;
const MIN_SPEED: f64 = 0.01;
const MAX_SPEED: f64 = 100.0;

fn default_fps() -> f64 {
    24.0
}

fn default_speed() -> f64 {
    1.0
}

async fn car_keyframes(
    State(state): State<AppState>,
    Path((year, circuit, kind, car_id)): Path<(u16, String, String, String)>,
    Query(params): Query<KeyframeParams>,
) -> Result<Json<Vec<Keyframe>>, ApiError> {
    let query = session_query(year, &circuit, &kind)?;
    if !(params.fps > 0.0 && params.fps <= MAX_FPS) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("fps must be in (0, {}]", MAX_FPS),
        ));
    }
    if !(MIN_SPEED..=MAX_SPEED).contains(&params.speed) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("speed must be in [{}, {}]", MIN_SPEED, MAX_SPEED),
        ));
    }

    let session = state.session(&query).await.ok_or((
        StatusCode::NOT_FOUND,
        format!("No curves computed for {}", query),
    ))?;
    let curve = session.curves.get(&CarId::new(car_id.clone())).ok_or((
        StatusCode::NOT_FOUND,
        format!("No curve for car {} in {}", car_id, query),
    ))?;

    Ok(Json(curve.to_keyframes(params.fps, params.speed)))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path((year, circuit, kind)): Path<(u16, String, String)>,
) -> Result<StatusCode, ApiError> {
    let query = session_query(year, &circuit, &kind)?;
    if state.cancel_run(&query).await {
        tracing::info!("Cancelled pipeline for {}", query);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("No pipeline running for {}", query),
        ))
    }
}
