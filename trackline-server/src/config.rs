//! Server configuration
//!
//! Defaults, then an optional JSON file named by `TRACKLINE_CONFIG`, then
//! `TRACKLINE_*` environment variables, each layer overriding the last.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trackline_core::model::DistanceUnits;
use trackline_core::projector::MAX_RESOLUTION;
use trackline_sources::{DemoConfig, RetryPolicy, SourceOptions};

/// Where session telemetry comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Http {
        base_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    File {
        dir: PathBuf,
    },
    Demo {
        #[serde(default = "default_demo_cars")]
        cars: u32,
        #[serde(default = "default_demo_laps")]
        laps: u32,
        #[serde(default)]
        latest_year: Option<u16>,
    },
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_demo_cars() -> u32 {
    DemoConfig::default().cars
}

fn default_demo_laps() -> u32 {
    DemoConfig::default().laps
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub transport: TransportConfig,
    pub cache_dir: PathBuf,

    /// Centerline file; the built-in demo loop when unset
    pub track: Option<PathBuf>,

    /// Default samples per motion curve
    pub resolution: usize,

    /// Largest resolution a request may ask for
    pub max_resolution: usize,

    pub fallback_years: u16,
    pub alias_max_age_secs: u64,
    pub retry: RetryConfig,
    pub distance_units: DistanceUnits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let source = SourceOptions::default();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9100)),
            transport: TransportConfig::Demo {
                cars: default_demo_cars(),
                laps: default_demo_laps(),
                latest_year: None,
            },
            cache_dir: default_cache_dir(),
            track: None,
            resolution: 500,
            max_resolution: 20_000,
            fallback_years: source.fallback_years,
            alias_max_age_secs: source.alias_max_age.as_secs(),
            retry: RetryConfig::default(),
            distance_units: source.distance_units,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("trackline")
        .join("sessions")
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {}={:?}: {}", name, value, e))
}

impl ServerConfig {
    /// Load from `TRACKLINE_CONFIG` (if set) and the process environment
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("TRACKLINE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `TRACKLINE_*` overrides read through `get`
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("TRACKLINE_LISTEN") {
            self.listen = parse_env("TRACKLINE_LISTEN", &v)?;
        }
        if let Some(v) = get("TRACKLINE_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TRACKLINE_TRACK") {
            self.track = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TRACKLINE_RESOLUTION") {
            self.resolution = parse_env("TRACKLINE_RESOLUTION", &v)?;
        }
        if let Some(v) = get("TRACKLINE_MAX_RESOLUTION") {
            self.max_resolution = parse_env("TRACKLINE_MAX_RESOLUTION", &v)?;
        }
        if let Some(v) = get("TRACKLINE_FALLBACK_YEARS") {
            self.fallback_years = parse_env("TRACKLINE_FALLBACK_YEARS", &v)?;
        }
        if let Some(v) = get("TRACKLINE_RETRY_ATTEMPTS") {
            self.retry.max_attempts = parse_env("TRACKLINE_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("TRACKLINE_DISTANCE_UNITS") {
            self.distance_units = match v.trim().to_lowercase().as_str() {
                "meters" | "m" => DistanceUnits::Meters,
                "fraction" | "laps" => DistanceUnits::Fraction,
                other => bail!("Invalid TRACKLINE_DISTANCE_UNITS={:?}", other),
            };
        }

        // Transport selection: the last matching variable wins
        if let Some(dir) = get("TRACKLINE_CAPTURE_DIR") {
            self.transport = TransportConfig::File { dir: dir.into() };
        }
        if let Some(base_url) = get("TRACKLINE_API_URL") {
            let timeout_secs = match get("TRACKLINE_HTTP_TIMEOUT_SECS") {
                Some(v) => parse_env("TRACKLINE_HTTP_TIMEOUT_SECS", &v)?,
                None => default_timeout_secs(),
            };
            self.transport = TransportConfig::Http {
                base_url,
                timeout_secs,
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution < 2 {
            bail!("resolution must be at least 2, got {}", self.resolution);
        }
        if self.max_resolution > MAX_RESOLUTION {
            bail!(
                "max_resolution must be at most {}, got {}",
                MAX_RESOLUTION,
                self.max_resolution
            );
        }
        if self.resolution > self.max_resolution {
            bail!(
                "resolution {} exceeds max_resolution {}",
                self.resolution,
                self.max_resolution
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                multiplier: self.retry.multiplier,
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
            },
            fallback_years: self.fallback_years,
            alias_max_age: Duration::from_secs(self.alias_max_age_secs),
            distance_units: self.distance_units,
        }
    }
}
