//! ProviderConfig: connection and credential configuration
//!
//! Created and rotated by an operator out-of-band, read-only to the core and
//! re-read on every reconciliation.

use serde::{Deserialize, Serialize};

use crate::config::EndpointOverride;

/// Reference from a managed resource to the ProviderConfig it uses
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderConfigReference {
    pub name: String,
}

impl ProviderConfigReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ProviderConfigReference {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Reference to a secret in the secret store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretReference {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
}

impl SecretReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single key inside a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    #[serde(flatten)]
    pub secret: SecretReference,
    pub key: String,
}

/// Environment variable holding credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSelector {
    pub name: String,
}

/// File holding credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsSelector {
    pub path: String,
}

/// Where credential bytes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CredentialSource {
    /// No credentials; the gateway gets empty bytes
    #[default]
    None,
    Secret,
    Environment,
    Filesystem,
}

/// Selectors for every credential source; only the one matching the
/// declared source is consulted
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSelectors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsSelector>,
}

/// Credential configuration of a ProviderConfig
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub source: CredentialSource,
    #[serde(flatten)]
    pub selectors: CredentialSelectors,
}

/// Connection/credential configuration referenced by managed resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub credentials: ProviderCredentials,
    /// Per-connection override of the controller's endpoint defaults
    #[serde(default)]
    pub endpoint: EndpointOverride,
}

impl ProviderConfig {
    /// A ProviderConfig without credentials using the default endpoint
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credentials: ProviderCredentials::default(),
            endpoint: EndpointOverride::default(),
        }
    }

    /// Read credentials from a secret key
    pub fn with_secret_credentials(mut self, secret: SecretReference, key: impl Into<String>) -> Self {
        self.credentials = ProviderCredentials {
            source: CredentialSource::Secret,
            selectors: CredentialSelectors {
                secret_ref: Some(SecretKeySelector {
                    secret,
                    key: key.into(),
                }),
                ..Default::default()
            },
        };
        self
    }

    /// Override endpoint settings for this connection
    pub fn with_endpoint(mut self, endpoint: EndpointOverride) -> Self {
        self.endpoint = endpoint;
        self
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_deserialize_secret_source() {
        let pc: ProviderConfig = serde_json::from_value(serde_json::json!({
            "name": "default",
            "credentials": {
                "source": "Secret",
                "secretRef": { "namespace": "crossplane-system", "name": "creds", "key": "token" }
            },
            "endpoint": { "host": "procs.internal", "port": 8080 }
        }))
        .unwrap();

        assert_eq!(pc.credentials.source, CredentialSource::Secret);
        let selector = pc.credentials.selectors.secret_ref.unwrap();
        assert_eq!(selector.secret.to_string(), "crossplane-system/creds");
        assert_eq!(selector.key, "token");
        assert_eq!(pc.endpoint.host.as_deref(), Some("procs.internal"));
        assert_eq!(pc.endpoint.port, Some(8080));
    }

    #[test]
    fn test_provider_config_minimal() {
        let pc: ProviderConfig =
            serde_json::from_value(serde_json::json!({ "name": "default" })).unwrap();
        assert_eq!(pc.credentials.source, CredentialSource::None);
        assert_eq!(pc.endpoint, EndpointOverride::default());
    }
}
