// # Existence Tracker Trait
//
// Defines the interface for the local bookkeeping that stands in for an
// authoritative status query on the remote server.
//
// ## Purpose
//
// The remote server answers only "create" and "delete". The tracker records
// which identifiers have been (believed) created so Observe can tell
// "not yet created" from "created but unconfirmable".
//
// A server that gains a real status query can be adapted behind this same
// trait without touching the lifecycle contract.
//
// ## Implementations
//
// - Memory: `MemoryExistenceTracker`
// - File-based: `FileExistenceTracker` (JSON, survives restarts)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How far a tracked identifier got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistencePhase {
    /// Recorded speculatively by Observe, create not yet confirmed
    Pending,
    /// Gateway confirmed the create
    Created,
}

/// Tracker entry for one external identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistenceRecord {
    /// Name of the desired-state record that claimed the identifier
    pub owner: String,
    pub phase: ExistencePhase,
    /// Provider-facing spec applied by the last confirmed create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<serde_json::Value>,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl ExistenceRecord {
    /// Speculative entry written by Observe
    pub fn pending(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            phase: ExistencePhase::Pending,
            applied: None,
            recorded_at: chrono::Utc::now(),
        }
    }

    /// Entry for a confirmed create of `applied`
    pub fn created(owner: impl Into<String>, applied: serde_json::Value) -> Self {
        Self {
            owner: owner.into(),
            phase: ExistencePhase::Created,
            applied: Some(applied),
            recorded_at: chrono::Utc::now(),
        }
    }

    pub fn is_created(&self) -> bool {
        self.phase == ExistencePhase::Created
    }

    /// Whether `snapshot` matches what was last applied
    pub fn is_current(&self, snapshot: &serde_json::Value) -> bool {
        self.is_created() && self.applied.as_ref() == Some(snapshot)
    }
}

/// Trait for existence tracker implementations
///
/// # Thread Safety
///
/// Every method is atomic with respect to every other. Concurrent callers
/// working on different identifiers must never corrupt each other's
/// entries. Ordering across identifiers is not guaranteed.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Implement locking for thread safety
///
/// ## Forbidden Capabilities
/// - ❌ Call the remote server (owned by `ExternalGateway`)
/// - ❌ Decide what to reconcile (owned by the external client)
#[async_trait]
pub trait ExistenceTracker: Send + Sync {
    /// Get the entry for `id`
    async fn get(&self, id: &str) -> Result<Option<ExistenceRecord>, crate::Error>;

    /// Whether `id` is known to exist
    async fn exists(&self, id: &str) -> Result<bool, crate::Error> {
        Ok(self.get(id).await?.is_some())
    }

    /// Create or replace the entry for `id`
    async fn record(&self, id: &str, record: &ExistenceRecord) -> Result<(), crate::Error>;

    /// Insert `record` unless `id` already has an entry
    ///
    /// Check and insert happen under one lock.
    ///
    /// # Returns
    ///
    /// - `Ok(None)`: The record was inserted
    /// - `Ok(Some(existing))`: `id` was already tracked; nothing changed
    async fn record_if_absent(
        &self,
        id: &str,
        record: &ExistenceRecord,
    ) -> Result<Option<ExistenceRecord>, crate::Error>;

    /// Remove the entry for `id`
    ///
    /// Removing an absent entry is not an error.
    async fn forget(&self, id: &str) -> Result<(), crate::Error>;

    /// List all tracked identifiers
    async fn list(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing trackers from configuration
#[async_trait]
pub trait TrackerFactory: Send + Sync {
    /// Create an ExistenceTracker from its configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Serialized `TrackerConfig` for this tracker
    async fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<Box<dyn ExistenceTracker>, crate::Error>;
}
