//! Trackline Core Library
//!
//! This crate provides the telemetry data model, the track geometry adapter,
//! and the normalize / project pipeline that turns irregular per-car samples
//! into motion curves a renderer can animate.

pub mod curve;
pub mod error;
pub mod geometry;
pub mod interpolate;
pub mod model;
pub mod normalize;
pub mod projector;
pub mod source;
pub mod track_file;
pub mod units;

pub use curve::{Keyframe, MotionCurve, MotionFrame};
pub use error::{GeometryError, NormalizeError, ProjectionError, SourceError, TransportError};
pub use geometry::{GeometryOptions, TrackCenterline};
pub use model::{CarId, NormalizedSample, RawSample, SessionKind, SessionQuery, TrackDistance, Vector3};
pub use normalize::{normalize, normalize_session};
pub use projector::project;
pub use source::{CacheRecord, CacheStore, Sleeper, TelemetryTransport, TransportResponse};
