//! Durable snapshot storage.
//!
//! Every persisted collection is written as a whole JSON snapshot: write to
//! a temporary file, then atomically rename over the canonical one, so a
//! crash mid-write can never corrupt a record set. Writers are serialized
//! through a single in-process lock; readers see either the old snapshot or
//! the new one, never a partial write.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};

/// File-backed store for named JSON snapshots.
pub struct StateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory the snapshots live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Persist a full snapshot under the given name.
    pub async fn save<T: Serialize + Sync>(&self, name: &str, value: &T) -> DomainResult<()> {
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.dir).await?;
        let canonical = self.snapshot_path(name);
        let tmp = self.dir.join(format!("{name}.json.tmp"));

        let json = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &canonical).await?;

        debug!(snapshot = name, path = %canonical.display(), "Snapshot persisted");
        Ok(())
    }

    /// Load a snapshot, or `None` when it has never been written.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> DomainResult<Option<T>> {
        let path = self.snapshot_path(name);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DomainError::Storage(e.to_string())),
        };
        let value = serde_json::from_str(&json)?;
        Ok(Some(value))
    }
}

/// Fixed-capacity append structure with eviction-of-oldest on overflow.
///
/// Implemented once and reused for every bounded persisted collection
/// (checkpoints, learning records) instead of duplicating FIFO logic per
/// subsystem.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: Vec<T>,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    /// Append an entry, evicting the oldest when at capacity.
    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity. An over-full log sheds its oldest entries.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        if self.entries.len() > capacity {
            let excess = self.entries.len() - capacity;
            self.entries.drain(..excess);
        }
    }
}
