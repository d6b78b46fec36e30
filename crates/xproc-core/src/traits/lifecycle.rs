// # Lifecycle Contract
//
// The four-phase contract every managed kind implements:
//
// ```text
// trigger → connect(desired) → observe ─┬─ NotExists → create
//                                       ├─ Drifted   → update
//                                       └─ Current   → no-op
//         (deletion intent) ────────────── delete
// ```
//
// Every method takes the caller's `ReconcileContext`; an in-flight remote
// call is abandoned when it is cancelled or its deadline passes.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::context::ReconcileContext;
use crate::resource::DesiredState;

/// Opaque key → secret-bytes pairs published for consumers
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Existence of the external resource as resolved by Observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    NotExists,
    /// Exists and matches the desired state
    Current,
    /// Exists but diverges from the desired state
    Drifted,
}

/// Transient result of Observe; recomputed on every trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub existence: Existence,
    pub connection_details: ConnectionDetails,
}

impl Observation {
    pub fn not_exists() -> Self {
        Self {
            existence: Existence::NotExists,
            connection_details: ConnectionDetails::new(),
        }
    }

    pub fn exists(up_to_date: bool, connection_details: ConnectionDetails) -> Self {
        Self {
            existence: if up_to_date {
                Existence::Current
            } else {
                Existence::Drifted
            },
            connection_details,
        }
    }

    pub fn resource_exists(&self) -> bool {
        self.existence != Existence::NotExists
    }

    pub fn resource_up_to_date(&self) -> bool {
        self.existence == Existence::Current
    }
}

/// Result of Create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Creation {
    pub connection_details: ConnectionDetails,
}

/// Result of Update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    pub connection_details: ConnectionDetails,
}

/// Produces a bound [`ExternalClient`] for a desired-state record
///
/// Implementations resolve configuration and credentials fresh on every
/// call and never return a partially initialised client.
#[async_trait]
pub trait ExternalConnector: Send + Sync {
    async fn connect(
        &self,
        ctx: &ReconcileContext,
        desired: &DesiredState,
    ) -> Result<Box<dyn ExternalClient>, crate::Error>;
}

/// Observes, then creates, updates or deletes an external resource so it
/// reflects the desired state
#[async_trait]
pub trait ExternalClient: Send + Sync {
    /// Resolve existence and drift. Never changes remote state.
    async fn observe(
        &self,
        ctx: &ReconcileContext,
        desired: &mut DesiredState,
    ) -> Result<Observation, crate::Error>;

    /// Create the resource; only called after Observe reported `NotExists`
    async fn create(
        &self,
        ctx: &ReconcileContext,
        desired: &mut DesiredState,
    ) -> Result<Creation, crate::Error>;

    /// Reconcile drift; only called after Observe reported `Drifted`
    async fn update(
        &self,
        ctx: &ReconcileContext,
        desired: &mut DesiredState,
    ) -> Result<Update, crate::Error>;

    /// Delete the resource; idempotent
    async fn delete(
        &self,
        ctx: &ReconcileContext,
        desired: &mut DesiredState,
    ) -> Result<(), crate::Error>;
}
