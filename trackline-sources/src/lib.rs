//! Telemetry sources for Trackline
//!
//! Transports (HTTP, captured files, synthetic demo), the session cache, and
//! the [`TelemetrySource`] that layers retry, caching and year fallback on
//! top of a transport.

pub mod cache;
pub mod demo;
pub mod fetcher;
pub mod file;
pub mod http;
pub mod payload;
pub mod retry;

pub use cache::{FileCache, KeyGuard, KeyLocks, MemoryCache};
pub use demo::{demo_centerline, DemoConfig, DemoTransport};
pub use fetcher::{FetchedSession, SourceOptions, TelemetrySource};
pub use file::FileTransport;
pub use http::HttpTransport;
pub use payload::parse_samples;
pub use retry::{retry_with_backoff, RetryError, RetryPolicy, Retryable, TokioSleeper};
