//! Session cache stores
//!
//! [`FileCache`] keeps one JSON file per session under a cache directory,
//! named `{series_year}_{circuit}_{session_kind}.json`. Writes go to a
//! temporary file which is synced and then renamed over the target, so a
//! crash mid-write leaves the previous record (or nothing), never a
//! truncated one.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use trackline_core::{CacheRecord, CacheStore, SessionQuery, SourceError};

const TEMP_SUFFIX: &str = ".tmp";

/// How long `flush` waits for in-flight writes
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn cache_error(context: &str, e: impl std::fmt::Display) -> SourceError {
    SourceError::Cache(format!("{}: {}", context, e))
}

/// Directory-backed cache, one file per session
pub struct FileCache {
    dir: PathBuf,
    temp_counter: AtomicU64,
    /// Writes currently between temp-file creation and rename
    in_flight: Mutex<u64>,
    writes_done: Condvar,
}

impl FileCache {
    /// Open (creating if needed) a cache directory
    ///
    /// Leftover temporary files from an interrupted write are removed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| cache_error(&format!("creating {}", dir.display()), e))?;

        let entries =
            fs::read_dir(&dir).map_err(|e| cache_error(&format!("listing {}", dir.display()), e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(TEMP_SUFFIX));
            if is_temp {
                debug!("Removing stale cache temp file {}", path.display());
                let _ = fs::remove_file(&path);
            }
        }

        info!("Session cache at {}", dir.display());
        Ok(Self {
            dir,
            temp_counter: AtomicU64::new(0),
            in_flight: Mutex::new(0),
            writes_done: Condvar::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, query: &SessionQuery) -> PathBuf {
        self.dir.join(format!("{}.json", query.cache_key()))
    }

    fn begin_write(&self) {
        *self.in_flight.lock().unwrap_or_else(|p| p.into_inner()) += 1;
    }

    fn end_write(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.writes_done.notify_all();
        }
    }

    /// Block until no write is in flight or `timeout` passes; returns the
    /// number still pending
    fn wait_for_writes(&self, timeout: Duration) -> u64 {
        let in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        let (in_flight, _) = self
            .writes_done
            .wait_timeout_while(in_flight, timeout, |pending| *pending > 0)
            .unwrap_or_else(|p| p.into_inner());
        *in_flight
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let file_name = target
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("record");
        let temp = self
            .dir
            .join(format!(".{}.{}.{}{}", file_name, std::process::id(), n, TEMP_SUFFIX));

        let result = (|| {
            let mut file = File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp, target)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }
}

impl CacheStore for FileCache {
    fn get(&self, query: &SessionQuery) -> Result<Option<CacheRecord>, SourceError> {
        let path = self.path_for(query);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_error(&format!("reading {}", path.display()), e)),
        };

        match serde_json::from_str::<CacheRecord>(&text) {
            Ok(record) if record.query() == query => Ok(Some(record)),
            Ok(record) => {
                warn!(
                    "Cache file {} holds {} instead of {}; ignoring",
                    path.display(),
                    record.query(),
                    query
                );
                Ok(None)
            }
            Err(e) => {
                warn!("Unreadable cache file {}: {}; ignoring", path.display(), e);
                Ok(None)
            }
        }
    }

    fn put(&self, record: &CacheRecord) -> Result<(), SourceError> {
        let path = self.path_for(record.query());
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| cache_error("encoding", e))?;

        self.begin_write();
        let result = self.write_atomic(&path, &bytes);
        self.end_write();

        result.map_err(|e| cache_error(&format!("writing {}", path.display()), e))?;
        debug!("Cached {} at {}", record.query(), path.display());
        Ok(())
    }

    fn flush(&self) -> Result<(), SourceError> {
        let pending = self.wait_for_writes(FLUSH_TIMEOUT);
        if pending > 0 {
            warn!(
                "Flushing cache with {} writes still in flight after {:?}",
                pending, FLUSH_TIMEOUT
            );
        }

        // Persist the renames themselves
        #[cfg(unix)]
        File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| cache_error("syncing cache directory", e))?;

        info!("Session cache flushed");
        Ok(())
    }
}

/// In-process cache, mainly for tests and one-shot tools
#[derive(Default)]
pub struct MemoryCache {
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, query: &SessionQuery) -> Result<Option<CacheRecord>, SourceError> {
        let records = self
            .records
            .read()
            .map_err(|e| cache_error("memory cache", e))?;
        Ok(records.get(&query.cache_key()).cloned())
    }

    fn put(&self, record: &CacheRecord) -> Result<(), SourceError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| cache_error("memory cache", e))?;
        records.insert(record.query().cache_key(), record.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// One async lock per cache key
///
/// Held for the whole fetch of a session so at most one fetch writes a
/// given key at a time. Reads of the store do not take these locks. An
/// entry is dropped once no guard or waiter refers to it.
#[derive(Default)]
pub struct KeyLocks {
    locks: Arc<Mutex<LockMap>>,
}

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Keys with a live guard or waiter
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a [`KeyLocks`] entry; releases and prunes it on drop
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // The map's own handle is the only one left
        if locks
            .get(&self.key)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
