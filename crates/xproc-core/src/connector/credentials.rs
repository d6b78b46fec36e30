//! Credential extraction for ProviderConfigs
//!
//! Resolves the declared credential source to raw bytes. The bytes are
//! handed to the gateway factory unchanged and never logged.

use async_trait::async_trait;
use std::sync::Arc;

use crate::Error;
use crate::resource::{CredentialSource, ProviderCredentials};
use crate::traits::{CredentialExtractor, SecretStore};

/// Extractor for the `None`, `Secret`, `Environment` and `Filesystem` sources
pub struct CommonCredentialExtractor {
    secrets: Arc<dyn SecretStore>,
}

impl CommonCredentialExtractor {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl CredentialExtractor for CommonCredentialExtractor {
    async fn extract(&self, credentials: &ProviderCredentials) -> Result<Vec<u8>, Error> {
        let selectors = &credentials.selectors;
        match credentials.source {
            CredentialSource::None => Ok(Vec::new()),
            CredentialSource::Secret => {
                let selector = selectors.secret_ref.as_ref().ok_or_else(|| {
                    Error::CredentialResolutionFailed(
                        "source is Secret but no secretRef is set".to_string(),
                    )
                })?;
                self.secrets
                    .get_secret_key(&selector.secret, &selector.key)
                    .await
                    .map_err(|e| Error::CredentialResolutionFailed(e.to_string()))?
                    .ok_or_else(|| {
                        Error::CredentialResolutionFailed(format!(
                            "secret {} has no key {}",
                            selector.secret, selector.key
                        ))
                    })
            }
            CredentialSource::Environment => {
                let selector = selectors.env.as_ref().ok_or_else(|| {
                    Error::CredentialResolutionFailed(
                        "source is Environment but no env selector is set".to_string(),
                    )
                })?;
                std::env::var(&selector.name)
                    .map(String::into_bytes)
                    .map_err(|e| {
                        Error::CredentialResolutionFailed(format!(
                            "environment variable {}: {e}",
                            selector.name
                        ))
                    })
            }
            CredentialSource::Filesystem => {
                let selector = selectors.fs.as_ref().ok_or_else(|| {
                    Error::CredentialResolutionFailed(
                        "source is Filesystem but no fs selector is set".to_string(),
                    )
                })?;
                tokio::fs::read(&selector.path).await.map_err(|e| {
                    Error::CredentialResolutionFailed(format!("cannot read {}: {e}", selector.path))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{CredentialSelectors, FsSelector, ProviderConfig, SecretReference};
    use crate::store::MemorySecretStore;
    use std::io::Write;

    fn extractor(secrets: &MemorySecretStore) -> CommonCredentialExtractor {
        CommonCredentialExtractor::new(Arc::new(secrets.clone()))
    }

    #[tokio::test]
    async fn test_none_yields_empty_bytes() {
        let secrets = MemorySecretStore::new();
        let bytes = extractor(&secrets)
            .extract(&ProviderCredentials::default())
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_secret_source() {
        let secrets = MemorySecretStore::new();
        let reference = SecretReference::new("crossplane", "creds");
        secrets.put(reference.clone(), "token", "abc").await;

        let config = ProviderConfig::new("lab").with_secret_credentials(reference, "token");
        let bytes = extractor(&secrets).extract(&config.credentials).await.unwrap();
        assert_eq!(bytes, b"abc");
    }

    #[tokio::test]
    async fn test_missing_secret_fails() {
        let secrets = MemorySecretStore::new();
        let config = ProviderConfig::new("lab")
            .with_secret_credentials(SecretReference::new("crossplane", "absent"), "token");

        let err = extractor(&secrets)
            .extract(&config.credentials)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialResolutionFailed(_)));
    }

    #[tokio::test]
    async fn test_selector_must_match_source() {
        let secrets = MemorySecretStore::new();
        let credentials = ProviderCredentials {
            source: CredentialSource::Environment,
            selectors: CredentialSelectors::default(),
        };

        let err = extractor(&secrets).extract(&credentials).await.unwrap_err();
        assert!(matches!(err, Error::CredentialResolutionFailed(_)));
    }

    #[tokio::test]
    async fn test_filesystem_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"from-file").unwrap();

        let credentials = ProviderCredentials {
            source: CredentialSource::Filesystem,
            selectors: CredentialSelectors {
                fs: Some(FsSelector {
                    path: file.path().to_string_lossy().into_owned(),
                }),
                ..Default::default()
            },
        };
        let bytes = extractor(&MemorySecretStore::new())
            .extract(&credentials)
            .await
            .unwrap();
        assert_eq!(bytes, b"from-file");
    }
}
