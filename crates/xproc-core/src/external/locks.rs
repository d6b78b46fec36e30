//! Per-identifier lifecycle serialization
//!
//! Used when the caller cannot promise single-flight reconciliation: every
//! lifecycle call holds the identifier's mutex for its whole duration, so a
//! Create and a concurrent Delete never interleave on one tracker entry.
//!
//! An identifier's entry lives only while someone holds or waits on it; the
//! last guard to drop removes it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub struct IdentifierLocks {
    locks: Arc<LockTable>,
}

/// Exclusive access to one identifier, released on drop
#[derive(Debug)]
pub struct IdentifierGuard {
    // Field order is drop order: unlock before releasing the entry
    _guard: OwnedMutexGuard<()>,
    _release: Release,
}

/// Removes the identifier's entry once nobody else references it
#[derive(Debug)]
struct Release {
    locks: Arc<LockTable>,
    id: String,
}

impl IdentifierLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn acquire(&self, id: &str) -> IdentifierGuard {
        // Clone the Arc out so the shard lock is released before awaiting
        let lock = Arc::clone(&*self.locks.entry(id.to_string()).or_default());
        // Created before the await so a cancelled wait also releases the entry
        let release = Release {
            locks: Arc::clone(&self.locks),
            id: id.to_string(),
        };
        let guard = lock.lock_owned().await;
        IdentifierGuard {
            _guard: guard,
            _release: release,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        // Holders and waiters own a clone; only the table's copy may remain
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
