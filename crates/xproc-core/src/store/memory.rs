// # Memory Declarative Store
//
// In-memory implementations of the declarative store collaborators. The
// daemon seeds them from a manifest; tests build them directly.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::resource::{DesiredState, ObservedStatus, ProviderConfig, SecretReference};
use crate::traits::lifecycle::ConnectionDetails;
use crate::traits::store::{
    ConfigStore, ConnectionPublisher, ResourceStore, SecretStore, UsageTracker,
};

/// Desired-state records keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceStore {
    inner: Arc<RwLock<BTreeMap<String, DesiredState>>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a record (spec and status)
    pub async fn apply(&self, desired: DesiredState) {
        let mut guard = self.inner.write().await;
        guard.insert(desired.name.clone(), desired);
    }

    /// Set deletion intent on a record
    pub async fn request_deletion(&self, name: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let desired = guard
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("resource {name}")))?;
        desired.deletion_intent = true;
        Ok(())
    }

    /// Every record, in name order
    pub async fn snapshot(&self) -> Vec<DesiredState> {
        self.inner.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, name: &str) -> Result<Option<DesiredState>, Error> {
        Ok(self.inner.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }

    async fn update_status(&self, name: &str, status: &ObservedStatus) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let desired = guard
            .get_mut(name)
            .ok_or_else(|| Error::store(format!("cannot update status of missing resource {name}")))?;
        desired.status = status.clone();
        Ok(())
    }

    async fn finalize(&self, name: &str) -> Result<(), Error> {
        self.inner.write().await.remove(name);
        Ok(())
    }
}

/// ProviderConfigs keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<HashMap<String, ProviderConfig>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn apply(&self, config: ProviderConfig) {
        let mut guard = self.inner.write().await;
        guard.insert(config.name.clone(), config);
    }

    pub async fn remove(&self, name: &str) {
        self.inner.write().await.remove(name);
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_config(&self, name: &str) -> Result<Option<ProviderConfig>, Error> {
        Ok(self.inner.read().await.get(name).cloned())
    }
}

/// Secrets keyed by reference; also the connection-details publisher
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    inner: Arc<RwLock<HashMap<SecretReference, BTreeMap<String, Vec<u8>>>>>,
}

// Secret values never reach Debug output
impl std::fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretStore")
            .field("secrets", &"<REDACTED>")
            .finish()
    }
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key of a secret
    pub async fn put(&self, secret: SecretReference, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let mut guard = self.inner.write().await;
        guard
            .entry(secret)
            .or_default()
            .insert(key.into(), value.into());
    }

    /// All keys of a secret
    pub async fn get(&self, secret: &SecretReference) -> Option<BTreeMap<String, Vec<u8>>> {
        self.inner.read().await.get(secret).cloned()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret_key(
        &self,
        secret: &SecretReference,
        key: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(secret).and_then(|data| data.get(key)).cloned())
    }
}

#[async_trait]
impl ConnectionPublisher for MemorySecretStore {
    async fn publish(&self, to: &SecretReference, details: &ConnectionDetails) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let data = guard.entry(to.clone()).or_default();
        for (key, value) in details {
            data.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn unpublish(&self, to: &SecretReference) -> Result<(), Error> {
        self.inner.write().await.remove(to);
        Ok(())
    }
}

/// ProviderConfig name → names of resources using it
#[derive(Debug, Clone, Default)]
pub struct MemoryUsageTracker {
    inner: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl MemoryUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources recorded as using `config`
    pub async fn users_of(&self, config: &str) -> Vec<String> {
        let guard = self.inner.read().await;
        let mut users: Vec<String> = guard
            .get(config)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}

#[async_trait]
impl UsageTracker for MemoryUsageTracker {
    async fn track(&self, desired: &DesiredState) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard
            .entry(desired.spec.provider_config_ref.name.clone())
            .or_default()
            .insert(desired.name.clone());
        Ok(())
    }
}
