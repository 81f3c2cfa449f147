//! HTTP transport for the telemetry API
//!
//! `GET {base_url}/telemetry?year=&circuit=&session=` returning a JSON array
//! of samples. One call is one request; retrying lives in the fetcher.

use crate::payload::is_empty_payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use std::time::Duration;
use tracing::debug;
use trackline_core::{SessionQuery, TelemetryTransport, TransportError, TransportResponse};

pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("trackline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/telemetry", self.base_url)
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

/// `Retry-After` in its delta-seconds form; HTTP dates are ignored
fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl TelemetryTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, query: &SessionQuery) -> Result<TransportResponse, TransportError> {
        let year = query.series_year().to_string();
        let response = self
            .client
            .get(self.endpoint())
            .query(&[
                ("year", year.as_str()),
                ("circuit", query.circuit()),
                ("session", query.session_kind().as_str()),
            ])
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        debug!("GET {} for {} -> {}", self.endpoint(), query, status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(TransportResponse::NoData);
        }
        if status.is_server_error() {
            return Err(TransportError::Server(status.as_u16()));
        }
        if !status.is_success() {
            return Err(TransportError::Client(status.as_u16()));
        }

        let body = response.text().await.map_err(classify)?;
        if is_empty_payload(&body) {
            return Ok(TransportResponse::NoData);
        }
        Ok(TransportResponse::Payload(body))
    }
}
