// # Process Connector
//
// Resolves a desired-state record into a bound `ProcessClient`.
//
// ## Steps
//
// Every step has its own failure so the status says exactly where
// connecting stopped:
//
// 1. Kind check                → `InvalidResourceKind`
// 2. Record ProviderConfig use → `UsageTrackingFailed`
// 3. Load the ProviderConfig   → `ConfigNotFound`
// 4. Extract credentials       → `CredentialResolutionFailed`
// 5. Build the gateway         → `ClientConstructionFailed`
//
// Configuration and credentials are re-read on every call, so a rotated
// ProviderConfig takes effect on the next reconciliation.

pub mod credentials;

pub use credentials::CommonCredentialExtractor;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::context::ReconcileContext;
use crate::error::{Error, Phase, Result};
use crate::external::{IdentifierLocks, ProcessClient};
use crate::registry::GatewayRegistry;
use crate::resource::{DesiredState, ResourceKind};
use crate::traits::{
    ConfigStore, CredentialExtractor, ExistenceTracker, ExternalClient, ExternalConnector,
    UsageTracker,
};

/// Connector for `Process` resources
///
/// # Example
///
/// ```rust,ignore
/// let connector = ProcessConnector::new(
///     configs,
///     usage,
///     Arc::new(CommonCredentialExtractor::new(secrets)),
///     registry,
///     tracker,
/// )
/// .with_defaults(controller_config.gateway);
///
/// let client = connector.connect(&ctx, &desired).await?;
/// let observation = client.observe(&ctx, &mut desired).await?;
/// ```
pub struct ProcessConnector {
    configs: Arc<dyn ConfigStore>,
    usage: Arc<dyn UsageTracker>,
    credentials: Arc<dyn CredentialExtractor>,
    gateways: Arc<GatewayRegistry>,
    tracker: Arc<dyn ExistenceTracker>,
    defaults: EndpointConfig,
    locks: Option<Arc<IdentifierLocks>>,
}

impl ProcessConnector {
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        usage: Arc<dyn UsageTracker>,
        credentials: Arc<dyn CredentialExtractor>,
        gateways: Arc<GatewayRegistry>,
        tracker: Arc<dyn ExistenceTracker>,
    ) -> Self {
        Self {
            configs,
            usage,
            credentials,
            gateways,
            tracker,
            defaults: EndpointConfig::default(),
            locks: None,
        }
    }

    /// Endpoint settings used where a ProviderConfig has no override
    pub fn with_defaults(mut self, defaults: EndpointConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Make every client serialize lifecycle calls per identifier
    pub fn with_serialized_lifecycle(mut self) -> Self {
        self.locks = Some(Arc::new(IdentifierLocks::new()));
        self
    }

    /// The tracker shared by every client this connector builds
    pub fn tracker(&self) -> Arc<dyn ExistenceTracker> {
        self.tracker.clone()
    }
}

/// Keep cancellation and deadline errors, replace anything else
fn attribute(err: Error, wrap: impl FnOnce(Error) -> Error) -> Error {
    match err {
        Error::Cancelled { .. } | Error::DeadlineExceeded { .. } => err,
        other => wrap(other),
    }
}

#[async_trait]
impl ExternalConnector for ProcessConnector {
    async fn connect(
        &self,
        ctx: &ReconcileContext,
        desired: &DesiredState,
    ) -> Result<Box<dyn ExternalClient>> {
        let phase = Phase::Connect;

        match desired.resource_kind()? {
            ResourceKind::Process => {}
        }

        ctx.run(phase, self.usage.track(desired))
            .await
            .map_err(|e| attribute(e, |e| Error::UsageTrackingFailed(e.to_string())))?;

        let config_name = &desired.spec.provider_config_ref.name;
        let config = ctx
            .run(phase, self.configs.get_config(config_name))
            .await
            .map_err(|e| attribute(e, |e| Error::config_not_found(config_name, e.to_string())))?
            .ok_or_else(|| Error::config_not_found(config_name, "not found"))?;

        let credentials = ctx
            .run(phase, self.credentials.extract(&config.credentials))
            .await
            .map_err(|e| {
                attribute(e, |e| match e {
                    Error::CredentialResolutionFailed(_) => e,
                    other => Error::CredentialResolutionFailed(other.to_string()),
                })
            })?;

        let endpoint = self.defaults.with_overrides(&config.endpoint);
        let gateway = self
            .gateways
            .create_gateway(&endpoint, &credentials)
            .map_err(|e| match e {
                Error::ClientConstructionFailed(_) => e,
                other => Error::ClientConstructionFailed(other.to_string()),
            })?;

        debug!(
            "Connected {} to {} via ProviderConfig {}",
            desired.name,
            gateway.endpoint(),
            config.name
        );

        let mut client = ProcessClient::new(gateway, self.tracker.clone());
        if let Some(locks) = &self.locks {
            client = client.with_locks(locks.clone());
        }
        Ok(Box::new(client))
    }
}
