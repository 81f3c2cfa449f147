//! Error taxonomy for the telemetry pipeline.
//!
//! Geometry and validation errors are never retried. Transport errors are
//! retried with backoff and only surface once the budget is spent; missing
//! sessions are handled by the year fallback before `NoDataAvailable` surfaces.

use crate::model::{CarId, SessionQuery};
use std::time::Duration;
use thiserror::Error;

/// Malformed or degenerate track geometry. Fatal, no fallback.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Track needs at least 3 distinct points, got {0}")]
    TooFewPoints(usize),

    #[error("Track is not a closed loop: closing gap {gap:.3} exceeds tolerance {tolerance:.3}")]
    OpenLoop { gap: f64, tolerance: f64 },

    #[error("Track point {0} has a non-finite coordinate")]
    NonFinitePoint(usize),

    #[error("Unsupported track geometry format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse track geometry: {0}")]
    Parse(String),

    #[error("Failed to read track geometry: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-car normalization failure. Recoverable: skip the car.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("Car {car_id} has {valid} valid samples, at least 2 are needed")]
    InsufficientSamples { car_id: CarId, valid: usize },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProjectionError {
    #[error(
        "Resolution must be between 2 and {max} frames, got {0}",
        max = crate::projector::MAX_RESOLUTION
    )]
    InvalidResolution(usize),

    #[error("Need at least 2 normalized samples to project, got {0}")]
    TooFewSamples(usize),

    #[error("Normalized samples belong to more than one car")]
    MixedCars,
}

/// A single failed request against a telemetry transport
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: HTTP {0}")]
    Server(u16),

    #[error("Client error: HTTP {0}")]
    Client(u16),

    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Client(_))
    }
}

/// Failure of the telemetry source as a whole for one query
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Rate limit still in effect after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("No data available for {requested} after trying {attempts} sessions")]
    NoDataAvailable { requested: SessionQuery, attempts: u32 },

    #[error("Transport failed after {attempts} attempts: {last}")]
    TransportExhausted { attempts: u32, last: TransportError },

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Malformed telemetry payload: {0}")]
    MalformedPayload(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::MalformedPayload(e.to_string())
    }
}
