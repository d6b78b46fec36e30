//! Declarative manifest loader
//!
//! The daemon has no cluster API to watch; instead it reads the desired
//! state, ProviderConfigs and secrets from a single JSON document and seeds
//! the in-memory stores with it.
//!
//! ```json
//! {
//!   "providerConfigs": [{ "name": "default" }],
//!   "secrets": [{ "namespace": "default", "name": "creds", "data": { "token": "abc" } }],
//!   "resources": [{ "name": "proc-a", "kind": "Process",
//!                   "spec": { "forProvider": { "id": "p-1" } } }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::Error;
use crate::resource::{DesiredState, ProviderConfig, SecretReference};
use crate::store::memory::{MemoryConfigStore, MemoryResourceStore, MemorySecretStore};

/// A secret as written in the manifest; values are UTF-8 strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSecret {
    #[serde(flatten)]
    pub reference: SecretReference,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub provider_configs: Vec<ProviderConfig>,
    #[serde(default)]
    pub secrets: Vec<ManifestSecret>,
    #[serde(default)]
    pub resources: Vec<DesiredState>,
}

impl Manifest {
    /// Parse a manifest from JSON text
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let manifest: Manifest = serde_json::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read and parse a manifest file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Reject duplicate names; two records claiming one external
    /// identifier are left for Observe to report
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = std::collections::HashSet::new();
        for resource in &self.resources {
            if resource.name.is_empty() {
                return Err(Error::config("resource name cannot be empty"));
            }
            if !seen.insert(resource.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate resource name: {}",
                    resource.name
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for config in &self.provider_configs {
            if !seen.insert(config.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate ProviderConfig name: {}",
                    config.name
                )));
            }
        }
        Ok(())
    }

    /// Copy every entry into the in-memory stores
    pub async fn seed(
        &self,
        resources: &MemoryResourceStore,
        configs: &MemoryConfigStore,
        secrets: &MemorySecretStore,
    ) {
        for config in &self.provider_configs {
            configs.apply(config.clone()).await;
        }
        for secret in &self.secrets {
            for (key, value) in &secret.data {
                secrets
                    .put(secret.reference.clone(), key.clone(), value.as_bytes().to_vec())
                    .await;
            }
        }
        for resource in &self.resources {
            resources.apply(resource.clone()).await;
        }
    }
}
