//! Filesystem-backed content store.
//!
//! Entries are staged under `<root>/.incoming/` and renamed into place on
//! commit, so `lookup` only ever observes complete entries. At most one
//! write per key is in flight at a time; readers never wait.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::cache::key::CacheKey;

/// Directory under the cache root holding entries still being written.
pub const STAGING_DIR: &str = ".incoming";

/// Errors raised by the content store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key cannot be mapped to a location under the cache root.
    #[error("cache key {key} has no storage location")]
    Unaddressable { key: String },

    /// Another session is already writing this key.
    #[error("cache entry {key} is already being written")]
    Busy { key: String },

    /// The entry grew past the configured size limit.
    #[error("cache entry {key} exceeds the {limit} byte limit")]
    TooLarge { key: String, limit: u64 },

    /// Underlying storage failure.
    #[error("storage error for cache entry {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(key: &CacheKey, source: io::Error) -> Self {
        CacheError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Persistent map from [`CacheKey`] to response bytes.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    max_entry_bytes: Option<u64>,
    writers: Arc<DashSet<CacheKey>>,
}

impl CacheStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_entry_bytes: None,
            writers: Arc::new(DashSet::new()),
        }
    }

    /// Cap the size of each entry. Appends past the cap fail with
    /// [`CacheError::TooLarge`]; `None` leaves entries unbounded.
    pub fn with_max_entry_bytes(mut self, limit: Option<u64>) -> Self {
        self.max_entry_bytes = limit;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the full entry for `key`, or `None` when nothing is stored.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(path) = key.entry_path(&self.root) else {
            tracing::debug!(key = %key, "Cache key not addressable, treating as miss");
            return Ok(None);
        };

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if is_absent(&e) => return Ok(None),
            Err(e) => return Err(CacheError::io(key, e)),
        }

        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            // Removed between the metadata check and the read.
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(CacheError::io(key, e)),
        }
    }

    /// Start a new entry for `key`.
    ///
    /// Fails with [`CacheError::Busy`] while another writer holds the key.
    pub async fn begin_write(&self, key: &CacheKey) -> Result<CacheWriter, CacheError> {
        let target = key
            .entry_path(&self.root)
            .ok_or_else(|| CacheError::Unaddressable {
                key: key.to_string(),
            })?;

        if !self.writers.insert(key.clone()) {
            return Err(CacheError::Busy {
                key: key.to_string(),
            });
        }
        let claim = WriteClaim {
            writers: Arc::clone(&self.writers),
            key: key.clone(),
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(key, e))?;
        }
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| CacheError::io(key, e))?;

        let temp = staging.join(Uuid::new_v4().to_string());
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .await
            .map_err(|e| CacheError::io(key, e))?;

        tracing::trace!(key = %key, temp = ?temp, "Cache write started");

        Ok(CacheWriter {
            key: key.clone(),
            target,
            temp,
            file: Some(file),
            written: 0,
            limit: self.max_entry_bytes,
            _claim: claim,
        })
    }

    /// Whether a write for `key` is currently in flight.
    pub fn is_writing(&self, key: &CacheKey) -> bool {
        self.writers.contains(key)
    }
}

fn is_absent(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Releases the per-key writer slot when dropped.
#[derive(Debug)]
struct WriteClaim {
    writers: Arc<DashSet<CacheKey>>,
    key: CacheKey,
}

impl Drop for WriteClaim {
    fn drop(&mut self) {
        self.writers.remove(&self.key);
    }
}

/// Handle to an entry being written.
///
/// Bytes become visible to `lookup` only after [`CacheWriter::commit`].
/// Dropping the handle without committing discards everything written.
#[derive(Debug)]
pub struct CacheWriter {
    key: CacheKey,
    target: PathBuf,
    temp: PathBuf,
    file: Option<File>,
    written: u64,
    limit: Option<u64>,
    _claim: WriteClaim,
}

impl CacheWriter {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append `bytes` to the entry.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        if let Some(limit) = self.limit {
            if self.written + bytes.len() as u64 > limit {
                return Err(CacheError::TooLarge {
                    key: self.key.to_string(),
                    limit,
                });
            }
        }
        let file = self.file.as_mut().ok_or_else(|| {
            CacheError::io(&self.key, io::Error::other("cache writer already closed"))
        })?;
        file.write_all(bytes)
            .await
            .map_err(|e| CacheError::io(&self.key, e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Publish the entry under its key.
    ///
    /// Returns `false` when an entry already existed; the first committed
    /// entry for a key is never replaced.
    pub async fn commit(mut self) -> Result<bool, CacheError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| CacheError::io(&self.key, e))?;
            file.sync_all()
                .await
                .map_err(|e| CacheError::io(&self.key, e))?;
        }

        if fs::try_exists(&self.target).await.unwrap_or(false) {
            tracing::debug!(key = %self.key, "Cache entry already present, discarding new copy");
            return Ok(false);
        }

        fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| CacheError::io(&self.key, e))?;
        // The rename consumed the staging file; nothing left for Drop.
        self.temp = PathBuf::new();

        tracing::debug!(key = %self.key, bytes = self.written, "Cache entry committed");
        Ok(true)
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        self.file.take();
        if self.temp.as_os_str().is_empty() {
            return;
        }
        // Drop cannot await, so the single unlink runs inline.
        if let Err(e) = std::fs::remove_file(&self.temp) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(key = %self.key, error = %e, "Failed to remove staged cache entry");
            }
        }
    }
}
