//! Offline transport reading captured payloads from a directory
//!
//! Expects one `{series_year}_{circuit}_{session_kind}.json` file per
//! session holding the raw API response, so a directory of captures can
//! stand in for the live API.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;
use trackline_core::{SessionQuery, TelemetryTransport, TransportError, TransportResponse};

pub struct FileTransport {
    dir: PathBuf,
}

impl FileTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, query: &SessionQuery) -> PathBuf {
        self.dir.join(format!("{}.json", query.cache_key()))
    }
}

#[async_trait]
impl TelemetryTransport for FileTransport {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, query: &SessionQuery) -> Result<TransportResponse, TransportError> {
        let path = self.path_for(query);
        match tokio::fs::read_to_string(&path).await {
            Ok(payload) => {
                debug!("Read {} bytes from {}", payload.len(), path.display());
                Ok(TransportResponse::Payload(payload))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TransportResponse::NoData),
            Err(e) => Err(TransportError::Network(format!("{}: {}", path.display(), e))),
        }
    }
}
