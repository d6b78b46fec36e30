// # Memory Existence Tracker
//
// In-memory implementation of ExistenceTracker.
//
// ## Purpose
//
// The default tracker: an injected concurrent map owned by whoever builds
// the connector, so independent engines (and tests) in one process never
// share bookkeeping.
//
// ## Crash Behavior
//
// - All entries are lost on restart/crash
// - The first pass after a restart observes every identifier as new and
//   re-issues its create, which the remote server must treat as a no-op

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::tracker::{ExistenceRecord, ExistenceTracker, TrackerFactory};

/// In-memory existence tracker
///
/// Entries live in a HashMap behind a RwLock; every operation takes the
/// lock once, so check-and-insert is atomic.
///
/// # Example
///
/// ```rust,no_run
/// use xproc_core::tracker::MemoryExistenceTracker;
/// use xproc_core::traits::{ExistenceRecord, ExistenceTracker};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let tracker = MemoryExistenceTracker::new();
///
///     tracker.record("p-1", &ExistenceRecord::pending("proc-a")).await?;
///     assert!(tracker.exists("p-1").await?);
///
///     tracker.forget("p-1").await?;
///     assert!(!tracker.exists("p-1").await?);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryExistenceTracker {
    inner: Arc<RwLock<HashMap<String, ExistenceRecord>>>,
}

impl MemoryExistenceTracker {
    /// Create a new empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked identifiers
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ExistenceTracker for MemoryExistenceTracker {
    async fn get(&self, id: &str) -> Result<Option<ExistenceRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn record(&self, id: &str, record: &ExistenceRecord) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn record_if_absent(
        &self,
        id: &str,
        record: &ExistenceRecord,
    ) -> Result<Option<ExistenceRecord>, Error> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.get(id) {
            return Ok(Some(existing.clone()));
        }
        guard.insert(id.to_string(), record.clone());
        Ok(None)
    }

    async fn forget(&self, id: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for `{"type": "memory"}`
pub struct MemoryTrackerFactory;

#[async_trait]
impl TrackerFactory for MemoryTrackerFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Box<dyn ExistenceTracker>, Error> {
        Ok(Box::new(MemoryExistenceTracker::new()))
    }
}
