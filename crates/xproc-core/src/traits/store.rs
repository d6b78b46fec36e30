// # Declarative Store Traits
//
// Interfaces to the storage/watch subsystem that holds desired state,
// ProviderConfigs and secrets. The core only consumes these; the in-memory
// implementations in `crate::store` back the daemon and the tests.

use async_trait::async_trait;

use crate::resource::{
    DesiredState, ObservedStatus, ProviderConfig, ProviderCredentials, SecretReference,
};
use crate::traits::lifecycle::ConnectionDetails;

/// Desired-state records and their status
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get the current record, `Ok(None)` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<DesiredState>, crate::Error>;

    /// Names of every stored record
    async fn list(&self) -> Result<Vec<String>, crate::Error>;

    /// Write back the observed status only; the spec is left untouched
    async fn update_status(&self, name: &str, status: &ObservedStatus)
    -> Result<(), crate::Error>;

    /// Release a record whose external resource has been deleted
    async fn finalize(&self, name: &str) -> Result<(), crate::Error>;
}

/// ProviderConfig lookup
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Get a ProviderConfig by name, `Ok(None)` if it does not exist
    async fn get_config(&self, name: &str) -> Result<Option<ProviderConfig>, crate::Error>;
}

/// Records which managed resources consume which ProviderConfig
///
/// Best-effort bookkeeping used to garbage-collect unused configs.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn track(&self, desired: &DesiredState) -> Result<(), crate::Error>;
}

/// Read access to secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get one key of a secret, `Ok(None)` if the secret or key is absent
    async fn get_secret_key(
        &self,
        secret: &SecretReference,
        key: &str,
    ) -> Result<Option<Vec<u8>>, crate::Error>;
}

/// Extracts credential bytes for a ProviderConfig
#[async_trait]
pub trait CredentialExtractor: Send + Sync {
    async fn extract(&self, credentials: &ProviderCredentials) -> Result<Vec<u8>, crate::Error>;
}

/// Publishes connection details to a secret store
#[async_trait]
pub trait ConnectionPublisher: Send + Sync {
    /// Merge `details` into the secret `to`
    async fn publish(
        &self,
        to: &SecretReference,
        details: &ConnectionDetails,
    ) -> Result<(), crate::Error>;

    /// Remove the secret `to`; absent secrets are not an error
    async fn unpublish(&self, to: &SecretReference) -> Result<(), crate::Error>;
}
