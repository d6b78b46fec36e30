// # File Existence Tracker
//
// File-based implementation of ExistenceTracker with crash recovery.
//
// ## Purpose
//
// Keeps existence bookkeeping across daemon restarts so a restart does not
// make every tracked identifier look new again.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Automatic backup: keeps a .backup of the last known good file
// - Recovery: falls back to the backup if the main file does not parse
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": {
//     "p-1": {
//       "owner": "proc-a",
//       "phase": "created",
//       "applied": { "id": "p-1" },
//       "recorded_at": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::tracker::{ExistenceRecord, ExistenceTracker, TrackerFactory};

/// Tracker file format version
const TRACKER_FILE_VERSION: &str = "1.0";

/// File-based existence tracker
///
/// Every mutation is written to disk before it is applied to the in-memory
/// map, under the lock that guards the map. A failed write leaves both the
/// file and the map as they were.
///
/// # Example
///
/// ```rust,no_run
/// use xproc_core::tracker::FileExistenceTracker;
/// use xproc_core::traits::{ExistenceRecord, ExistenceTracker};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let tracker = FileExistenceTracker::new("/var/lib/xproc/tracker.json").await?;
///
///     tracker.record("p-1", &ExistenceRecord::pending("proc-a")).await?;
///     assert!(tracker.exists("p-1").await?);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileExistenceTracker {
    path: PathBuf,
    records: Arc<RwLock<HashMap<String, ExistenceRecord>>>,
}

/// Serializable tracker file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TrackerFileFormat {
    version: String,
    records: HashMap<String, ExistenceRecord>,
}

impl FileExistenceTracker {
    /// Create or load a file tracker
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file
    /// 3. If it does not parse, load the backup
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create tracker directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            records: Arc::new(RwLock::new(records)),
        })
    }

    /// Load the tracker file, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, ExistenceRecord>, Error> {
        match Self::load(path).await {
            Ok(records) => {
                tracing::debug!("Loaded tracker file: {} records", records.len());
                Ok(records)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Tracker file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty tracker.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(records) => {
                        tracing::info!("Recovered tracker from backup: {} records", records.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore tracker file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(records)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with empty tracker.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<HashMap<String, ExistenceRecord>, Error> {
        if !path.exists() {
            tracing::debug!("Tracker file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::tracker(format!(
                "Failed to read tracker file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: TrackerFileFormat = serde_json::from_str(&content)?;

        if file.version != TRACKER_FILE_VERSION {
            tracing::warn!(
                "Tracker file version mismatch: expected {}, got {}. Attempting to load anyway.",
                TRACKER_FILE_VERSION,
                file.version
            );
        }

        Ok(file.records)
    }

    /// Write `records` atomically; caller holds the write lock
    async fn persist(&self, records: &HashMap<String, ExistenceRecord>) -> Result<(), Error> {
        let file = TrackerFileFormat {
            version: TRACKER_FILE_VERSION.to_string(),
            records: records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::tracker(format!("Failed to serialize tracker: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::tracker(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::tracker(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.sync_all().await.map_err(|e| {
                Error::tracker(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create tracker backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::tracker(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Tracker written to file: {}", self.path.display());
        Ok(())
    }

    /// Apply `mutate` to a copy, persist it, then commit it to memory
    async fn mutate<T>(
        &self,
        mutate: impl FnOnce(&mut HashMap<String, ExistenceRecord>) -> (T, bool),
    ) -> Result<T, Error> {
        let mut guard = self.records.write().await;
        let mut next = guard.clone();
        let (result, changed) = mutate(&mut next);
        if changed {
            self.persist(&next).await?;
            *guard = next;
        }
        Ok(result)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ExistenceTracker for FileExistenceTracker {
    async fn get(&self, id: &str) -> Result<Option<ExistenceRecord>, Error> {
        let guard = self.records.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn record(&self, id: &str, record: &ExistenceRecord) -> Result<(), Error> {
        self.mutate(|records| {
            records.insert(id.to_string(), record.clone());
            ((), true)
        })
        .await
    }

    async fn record_if_absent(
        &self,
        id: &str,
        record: &ExistenceRecord,
    ) -> Result<Option<ExistenceRecord>, Error> {
        self.mutate(|records| match records.get(id) {
            Some(existing) => (Some(existing.clone()), false),
            None => {
                records.insert(id.to_string(), record.clone());
                (None, true)
            }
        })
        .await
    }

    async fn forget(&self, id: &str) -> Result<(), Error> {
        self.mutate(|records| ((), records.remove(id).is_some()))
            .await
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let guard = self.records.read().await;
        Ok(guard.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Mutations are already on disk; rewrite only if the file went missing
        let guard = self.records.write().await;
        if self.path.exists() || guard.is_empty() {
            return Ok(());
        }
        self.persist(&guard).await
    }
}

/// Factory for `{"type": "file", "path": "..."}`
pub struct FileTrackerFactory;

#[async_trait]
impl TrackerFactory for FileTrackerFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn ExistenceTracker>, Error> {
        let path = config
            .get("path")
            .and_then(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::config("File tracker requires a path"))?;

        Ok(Box::new(FileExistenceTracker::new(path).await?))
    }
}
