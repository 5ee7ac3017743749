//! Durable queue state
//!
//! The queue window, its entries and the data-cap ledger survive restarts as
//! one JSON document. Writes go to a temp file that is renamed into place so
//! a crash mid-write leaves the previous state intact.
//!
//! A process that runs cycles holds an exclusive [`StateLock`] on the state
//! directory so two processes never execute and save the same queue.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::budget::LedgerSnapshot;
use crate::scheduler::QueueSnapshot;

const STATE_FILE: &str = "queue.json";
const LOCK_FILE: &str = "queue.lock";

/// Errors from reading or writing persisted state
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Queue state in {path} is in use by another process")]
    Locked { path: PathBuf },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything persisted between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub queue: QueueSnapshot,
    pub ledger: LedgerSnapshot,
}

/// Exclusive hold on a state directory, released on drop
#[derive(Debug)]
pub struct StateLock {
    file: fs::File,
    path: PathBuf,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        debug!(path = ?self.path, "StateLock::drop: releasing");
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, "StateLock::drop: unlock failed, closing file releases it");
        }
    }
}

/// File-backed store for [`PersistedState`]
#[derive(Debug, Clone)]
pub struct QueueStore {
    state_dir: PathBuf,
}

impl QueueStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        debug!(?state_dir, "QueueStore::new: called");
        Self { state_dir }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Take the exclusive lock on the state directory without blocking
    pub fn lock(&self) -> Result<StateLock, StoreError> {
        let path = self.state_dir.join(LOCK_FILE);
        debug!(?path, "QueueStore::lock: called");
        fs::create_dir_all(&self.state_dir).map_err(|source| StoreError::Io {
            path: self.state_dir.clone(),
            source,
        })?;

        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("QueueStore::lock: acquired");
                Ok(StateLock { file, path })
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                debug!("QueueStore::lock: held elsewhere");
                Err(StoreError::Locked {
                    path: self.state_dir.clone(),
                })
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Load persisted state; `Ok(None)` when nothing has been saved yet
    pub fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let path = self.state_file();
        debug!(?path, "QueueStore::load: called");
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("QueueStore::load: no state file");
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Persist state atomically
    pub fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let path = self.state_file();
        debug!(?path, entries = state.queue.entries.len(), "QueueStore::save: called");
        fs::create_dir_all(&self.state_dir).map_err(|source| StoreError::Io {
            path: self.state_dir.clone(),
            source,
        })?;

        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.state_dir.join(format!("{}.tmp", STATE_FILE));
        write_file(&tmp, &content)?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })?;
        Ok(())
    }

    /// Remove persisted state; returns true if a file was deleted
    pub fn clear(&self) -> Result<bool, StoreError> {
        let path = self.state_file();
        debug!(?path, "QueueStore::clear: called");
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), StoreError> {
    fs::write(path, content).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ScheduleEntry, ScheduleWindow};
    use chrono::{TimeDelta, TimeZone, Utc};
    use tempfile::TempDir;

    fn sample() -> PersistedState {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut window = ScheduleWindow::starting_at(t0);
        window.advance(t0 + TimeDelta::days(7), t0);
        PersistedState {
            queue: QueueSnapshot {
                window,
                entries: vec![
                    ScheduleEntry::new(t0 + TimeDelta::hours(1), "a", 0),
                    ScheduleEntry::new(t0 + TimeDelta::hours(2), "b", 1),
                ],
            },
            ledger: LedgerSnapshot {
                used_bytes: 42,
                period: 24_292,
            },
        }
    }

    #[test]
    fn test_load_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::new(temp_dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::new(temp_dir.path().join("nested"));

        let state = sample();
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!temp_dir.path().join("nested").join("queue.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::new(temp_dir.path());
        fs::write(store.state_file(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::new(temp_dir.path().join("state"));

        let lock = store.lock().unwrap();
        assert!(lock.path().ends_with("queue.lock"));

        let other = QueueStore::new(temp_dir.path().join("state"));
        assert!(matches!(other.lock(), Err(StoreError::Locked { .. })));

        drop(lock);
        assert!(other.lock().is_ok());
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::new(temp_dir.path());
        assert!(!store.clear().unwrap());

        store.save(&sample()).unwrap();
        assert!(store.clear().unwrap());
        assert!(store.load().unwrap().is_none());
    }
}
