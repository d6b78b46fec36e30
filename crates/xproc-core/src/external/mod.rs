// # Process External Client
//
// Implements the lifecycle contract for `Process` resources against one
// resolved gateway.
//
// ## Existence
//
// The remote server cannot answer "does X exist". Observe falls back to the
// existence tracker:
//
// - No entry: record a `Pending` entry and report `NotExists`
// - `Created` entry matching the desired spec: `Current`
// - `Pending` entry, or `Created` with a different applied spec: `Drifted`
//
// A `Pending` entry means a create was decided but never confirmed (crash,
// failed request, abandoned deadline). Update re-issues the create, which
// the server treats as a no-op when the process already exists.
//
// `Ready=True` is only set for a `Created` entry. A `Pending` entry reports
// `Creating`, and a failed remote create reports `Unavailable`.
//
// ## Identity
//
// The external identifier is immutable once created. A desired state whose
// identifier differs from the one recorded in its status, or whose
// identifier is claimed by a different record, is an `InconsistentState`.

pub mod locks;

pub use locks::{IdentifierGuard, IdentifierLocks};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::ReconcileContext;
use crate::error::{Error, Phase, Result};
use crate::resource::{Condition, DesiredState, ProcessState};
use crate::traits::{
    ConnectionDetails, Creation, ExistenceRecord, ExistenceTracker, ExternalClient,
    ExternalGateway, Observation, Update,
};

/// Connection-detail key holding the gateway endpoint
pub const DETAIL_ENDPOINT: &str = "endpoint";
/// Connection-detail key holding the external identifier
pub const DETAIL_EXTERNAL_ID: &str = "externalID";

/// External client for `Process` resources
pub struct ProcessClient {
    gateway: Box<dyn ExternalGateway>,
    tracker: Arc<dyn ExistenceTracker>,
    locks: Option<Arc<IdentifierLocks>>,
}

impl ProcessClient {
    pub fn new(gateway: Box<dyn ExternalGateway>, tracker: Arc<dyn ExistenceTracker>) -> Self {
        Self {
            gateway,
            tracker,
            locks: None,
        }
    }

    /// Serialize every lifecycle call per identifier through `locks`
    pub fn with_locks(mut self, locks: Arc<IdentifierLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    async fn serialize(
        &self,
        ctx: &ReconcileContext,
        phase: Phase,
        id: &str,
    ) -> Result<Option<IdentifierGuard>> {
        match &self.locks {
            Some(locks) => {
                let guard = ctx.run(phase, async { Ok(locks.acquire(id).await) }).await?;
                Ok(Some(guard))
            }
            None => Ok(None),
        }
    }

    fn connection_details(&self, id: &str) -> ConnectionDetails {
        let mut details = ConnectionDetails::new();
        details.insert(
            DETAIL_ENDPOINT.to_string(),
            self.gateway.endpoint().into_bytes(),
        );
        details.insert(DETAIL_EXTERNAL_ID.to_string(), id.as_bytes().to_vec());
        details
    }

    /// Reject entries claimed by another record
    fn check_owner(record: &ExistenceRecord, desired: &DesiredState, id: &str, phase: Phase) -> Result<()> {
        if record.owner != desired.name {
            let err = Error::inconsistent(
                id,
                phase,
                format!(
                    "identifier is tracked for {} but requested by {}",
                    record.owner, desired.name
                ),
            );
            error!("{}", err);
            return Err(err);
        }
        Ok(())
    }

    async fn remote_create(&self, ctx: &ReconcileContext, phase: Phase, id: &str) -> Result<()> {
        let outcome = ctx
            .run(phase, self.gateway.create(id))
            .await
            .map_err(|e| e.in_phase(phase, id))?;
        if outcome.is_applied() {
            info!("Created process {} via {}: {}", id, self.gateway.gateway_name(), outcome.message());
        } else {
            debug!("Process {} already present on server: {}", id, outcome.message());
        }
        Ok(())
    }

    async fn remote_delete(&self, ctx: &ReconcileContext, phase: Phase, id: &str) -> Result<()> {
        let outcome = ctx
            .run(phase, self.gateway.delete(id))
            .await
            .map_err(|e| e.in_phase(phase, id))?;
        if outcome.is_applied() {
            info!("Deleted process {} via {}: {}", id, self.gateway.gateway_name(), outcome.message());
        } else {
            debug!("Process {} already absent on server: {}", id, outcome.message());
        }
        Ok(())
    }

    /// Issue the remote create, marking the status unavailable if it fails
    async fn create_or_mark_failed(
        &self,
        ctx: &ReconcileContext,
        phase: Phase,
        desired: &mut DesiredState,
        id: &str,
    ) -> Result<()> {
        if let Err(e) = self.remote_create(ctx, phase, id).await {
            desired.status.at_provider.state = Some(ProcessState::Failed);
            desired.status.set_conditions([Condition::unavailable().with_message(e.to_string())]);
            return Err(e);
        }
        Ok(())
    }

    /// Record a confirmed create and reflect it in the status
    async fn confirm_created(
        &self,
        ctx: &ReconcileContext,
        phase: Phase,
        desired: &mut DesiredState,
        id: &str,
    ) -> Result<ConnectionDetails> {
        let snapshot = desired.applied_snapshot().map_err(|e| e.in_phase(phase, id))?;
        let record = ExistenceRecord::created(&desired.name, snapshot);
        ctx.run(phase, self.tracker.record(id, &record))
            .await
            .map_err(|e| e.in_phase(phase, id))?;

        desired.status.at_provider.state = Some(ProcessState::Ok);
        desired.status.at_provider.external_id = Some(id.to_string());
        desired.status.set_conditions([Condition::available()]);
        Ok(self.connection_details(id))
    }
}

#[async_trait]
impl ExternalClient for ProcessClient {
    async fn observe(&self, ctx: &ReconcileContext, desired: &mut DesiredState) -> Result<Observation> {
        let phase = Phase::Observe;
        let id = desired.verify_identity(phase)?.to_string();
        let _guard = self.serialize(ctx, phase, &id).await?;

        let snapshot = desired.applied_snapshot().map_err(|e| e.in_phase(phase, &id))?;
        let existing = ctx
            .run(phase, self.tracker.record_if_absent(&id, &ExistenceRecord::pending(&desired.name)))
            .await
            .map_err(|e| e.in_phase(phase, &id))?;

        let Some(record) = existing else {
            debug!("Process {} not tracked, reporting NotExists", id);
            return Ok(Observation::not_exists());
        };
        Self::check_owner(&record, desired, &id, phase)?;

        if record.is_created() {
            desired.status.set_conditions([Condition::available()]);
        } else {
            desired.status.set_conditions([Condition::creating()]);
        }
        let up_to_date = record.is_current(&snapshot);
        if !up_to_date {
            debug!("Process {} is tracked as {:?} and not current", id, record.phase);
        }
        Ok(Observation::exists(up_to_date, self.connection_details(&id)))
    }

    async fn create(&self, ctx: &ReconcileContext, desired: &mut DesiredState) -> Result<Creation> {
        let phase = Phase::Create;
        let id = desired.verify_identity(phase)?.to_string();
        let _guard = self.serialize(ctx, phase, &id).await?;

        self.create_or_mark_failed(ctx, phase, desired, &id).await?;
        let connection_details = self.confirm_created(ctx, phase, desired, &id).await?;
        Ok(Creation { connection_details })
    }

    async fn update(&self, ctx: &ReconcileContext, desired: &mut DesiredState) -> Result<Update> {
        let phase = Phase::Update;
        let id = desired.verify_identity(phase)?.to_string();
        let _guard = self.serialize(ctx, phase, &id).await?;

        let record = ctx
            .run(phase, self.tracker.get(&id))
            .await
            .map_err(|e| e.in_phase(phase, &id))?
            .ok_or_else(|| {
                let err = Error::inconsistent(&id, phase, "update requested for an untracked identifier");
                error!("{}", err);
                err
            })?;
        Self::check_owner(&record, desired, &id, phase)?;

        if record.is_created() {
            // The server has no in-place update; replace the process
            warn!("Process {} drifted from its applied spec, replacing it", id);
            self.remote_delete(ctx, phase, &id).await?;
            ctx.run(phase, self.tracker.record(&id, &ExistenceRecord::pending(&desired.name)))
                .await
                .map_err(|e| e.in_phase(phase, &id))?;
        } else {
            debug!("Process {} create was never confirmed, re-issuing it", id);
        }

        self.create_or_mark_failed(ctx, phase, desired, &id).await?;
        let connection_details = self.confirm_created(ctx, phase, desired, &id).await?;
        Ok(Update { connection_details })
    }

    async fn delete(&self, ctx: &ReconcileContext, desired: &mut DesiredState) -> Result<()> {
        let phase = Phase::Delete;
        let id = desired.verify_identity(phase)?.to_string();
        let _guard = self.serialize(ctx, phase, &id).await?;

        let existing = ctx
            .run(phase, self.tracker.get(&id))
            .await
            .map_err(|e| e.in_phase(phase, &id))?;
        if let Some(record) = &existing {
            Self::check_owner(record, desired, &id, phase)?;
        }

        desired.status.set_conditions([Condition::deleting()]);
        self.remote_delete(ctx, phase, &id).await?;

        // Only shrink point of the tracker; a failure here is retried by
        // calling Delete again
        ctx.run(phase, self.tracker.forget(&id))
            .await
            .map_err(|e| e.in_phase(phase, &id))?;
        Ok(())
    }
}
