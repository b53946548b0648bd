//! ==============================================================================
//! cache.rs - local persisted managed-set blob
//! ==============================================================================
//!
//! purpose:
//!     keeps the last merged managed set across restarts so a dashboard has
//!     something to show (and to override the remote with) before the origin
//!     answers. the whole thing is one keyed blob, `containers_managed`,
//!     holding email -> managed set.
//!
//! implementations:
//!     - FileCache: json file, replaced atomically on every write
//!     - MemoryCache: in-process, counts writes (tests, headless runs)
//!
//! ==============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::store::managed::ManagedSet;

/// name of the persisted blob
pub const CACHE_KEY: &str = "containers_managed";

pub trait LocalCache: Send + Sync {
    fn load(&self, email: &str) -> Result<Option<ManagedSet>>;
    fn store(&self, email: &str, set: &ManagedSet) -> Result<()>;
    /// forget every identity's entry
    fn clear(&self) -> Result<()>;
}

type Blob = BTreeMap<String, ManagedSet>;

#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    // serialises read-modify-write of the blob
    lock: Mutex<()>,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_blob(&self) -> Result<Blob> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Blob::new()),
            Err(source) => {
                return Err(SyncError::Cache {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Blob::new());
        }
        serde_json::from_str(&content).map_err(|source| SyncError::CacheFormat {
            path: self.path.clone(),
            source,
        })
    }

    fn write_blob(&self, blob: &Blob) -> Result<()> {
        let io_err = |source| SyncError::Cache {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let body = serde_json::to_vec_pretty(blob).map_err(|source| SyncError::CacheFormat {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl LocalCache for FileCache {
    fn load(&self, email: &str) -> Result<Option<ManagedSet>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_blob()?.remove(email))
    }

    fn store(&self, email: &str, set: &ManagedSet) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        // a corrupt blob is replaced rather than blocking every later write
        let mut blob = match self.read_blob() {
            Ok(b) => b,
            Err(SyncError::CacheFormat { path, source }) => {
                tracing::warn!("[CACHE] discarding corrupt {}: {}", path.display(), source);
                Blob::new()
            }
            Err(e) => return Err(e),
        };
        blob.insert(email.to_string(), set.clone());
        self.write_blob(&blob)?;
        tracing::debug!("[CACHE] stored {} containers for {}", set.len(), email);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SyncError::Cache {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, ManagedSet>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// how many times `store` has been called
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl LocalCache for MemoryCache {
    fn load(&self, email: &str) -> Result<Option<ManagedSet>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(email)
            .cloned())
    }

    fn store(&self, email: &str, set: &ManagedSet) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(email.to_string(), set.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}
