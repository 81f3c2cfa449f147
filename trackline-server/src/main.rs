//! Trackline Server
//!
//! Fetches session telemetry, projects every car onto the track centerline
//! and serves the resulting motion curves over a REST API.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trackline_core::{CacheStore, TelemetryTransport, TrackCenterline};
use trackline_server::config::{ServerConfig, TransportConfig};
use trackline_server::{api, state};
use trackline_sources::{
    DemoConfig, DemoTransport, FileCache, FileTransport, HttpTransport, TelemetrySource,
};

fn build_transport(config: &TransportConfig) -> Result<Arc<dyn TelemetryTransport>> {
    Ok(match config {
        TransportConfig::Http {
            base_url,
            timeout_secs,
        } => {
            info!("Telemetry API at {}", base_url);
            Arc::new(HttpTransport::new(
                base_url.clone(),
                Duration::from_secs(*timeout_secs),
            )?)
        }
        TransportConfig::File { dir } => {
            info!("Reading captured sessions from {}", dir.display());
            Arc::new(FileTransport::new(dir.clone()))
        }
        TransportConfig::Demo {
            cars,
            laps,
            latest_year,
        } => {
            info!("Using synthetic demo telemetry ({} cars, {} laps)", cars, laps);
            Arc::new(DemoTransport::new(DemoConfig {
                cars: *cars,
                laps: *laps,
                latest_year: *latest_year,
                ..DemoConfig::default()
            }))
        }
    })
}

fn load_track(config: &ServerConfig) -> Result<TrackCenterline> {
    match &config.track {
        Some(path) => TrackCenterline::load(path)
            .with_context(|| format!("loading track geometry from {}", path.display())),
        None => {
            if !matches!(config.transport, TransportConfig::Demo { .. }) {
                warn!("No track file configured; projecting onto the built-in demo loop");
            }
            DemoTransport::default()
                .centerline()
                .context("building demo centerline")
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Trackline Server");

    let config = ServerConfig::load()?;
    let track = load_track(&config)?;
    info!(
        "Track loaded: {} points, {:.1} m",
        track.len(),
        track.total_length().0
    );

    let cache = Arc::new(FileCache::open(&config.cache_dir).context("opening session cache")?);
    let source = TelemetrySource::new(build_transport(&config.transport)?, cache.clone())
        .with_options(config.source_options());

    let state = state::AppState::new(source, track, config.resolution)
        .with_max_resolution(config.max_resolution);
    let app = api::create_router(state);

    info!("Server listening on http://{}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache.flush().context("flushing session cache")?;
    Ok(())
}
