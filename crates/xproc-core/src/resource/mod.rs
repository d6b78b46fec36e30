//! Managed resource data model
//!
//! A [`DesiredState`] is the declarative record for one logical process on
//! the remote server. The record's `kind` is resolved once into a
//! [`ResourceKind`] at the lifecycle entry point; everything downstream works
//! on the typed spec.

pub mod condition;
pub mod provider_config;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Phase, Result};

pub use condition::{
    Condition, ConditionReason, ConditionStatus, ConditionType, get_condition, set_conditions,
};
pub use provider_config::{
    CredentialSelectors, CredentialSource, EnvSelector, FsSelector, ProviderConfig,
    ProviderConfigReference, ProviderCredentials, SecretKeySelector, SecretReference,
};

/// Managed-resource kinds this engine reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Process,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Process => "Process",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(kind: &str) -> Result<Self> {
        match kind {
            "Process" => Ok(ResourceKind::Process),
            other => Err(Error::invalid_kind("Process", other)),
        }
    }
}

/// Provider-facing parameters of a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessParameters {
    /// Caller-chosen external identifier, immutable once created
    pub id: String,
}

/// Desired spec of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    pub for_provider: ProcessParameters,
    #[serde(default)]
    pub provider_config_ref: ProviderConfigReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
}

/// Remote-side state of a process as last seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Ok,
    Failed,
}

/// Provider-observed fields of the status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ProcessState>,
    /// Identifier the remote process was created under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Status written back by the loop
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub at_provider: ProcessObservation,
}

impl ObservedStatus {
    pub fn set_conditions(&mut self, updates: impl IntoIterator<Item = Condition>) {
        set_conditions(&mut self.conditions, updates);
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        get_condition(&self.conditions, condition_type)
    }

    /// `Ready=True` is set
    pub fn is_ready(&self) -> bool {
        self.condition(ConditionType::Ready)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}

/// Declarative record for one logical resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Name of the record in the declarative store
    pub name: String,
    pub kind: String,
    pub spec: ProcessSpec,
    /// Set when the caller wants the external resource removed
    #[serde(default)]
    pub deletion_intent: bool,
    #[serde(default)]
    pub status: ObservedStatus,
}

impl DesiredState {
    /// A process record with no status
    pub fn process(name: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Process.to_string(),
            spec: ProcessSpec {
                for_provider: ProcessParameters {
                    id: external_id.into(),
                },
                provider_config_ref: ProviderConfigReference::default(),
                write_connection_secret_to_ref: None,
            },
            deletion_intent: false,
            status: ObservedStatus::default(),
        }
    }

    pub fn with_provider_config(mut self, name: impl Into<String>) -> Self {
        self.spec.provider_config_ref = ProviderConfigReference::new(name);
        self
    }

    pub fn with_connection_secret(mut self, secret: SecretReference) -> Self {
        self.spec.write_connection_secret_to_ref = Some(secret);
        self
    }

    /// Resolve the stored kind
    pub fn resource_kind(&self) -> Result<ResourceKind> {
        self.kind.parse()
    }

    /// The external identifier
    pub fn external_id(&self) -> &str {
        &self.spec.for_provider.id
    }

    /// Snapshot of the provider-facing spec, compared for drift
    pub fn applied_snapshot(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.spec.for_provider)?)
    }

    /// Check the external identifier is usable and has not changed since
    /// the resource was created.
    pub fn verify_identity(&self, phase: Phase) -> Result<&str> {
        let id = self.external_id();
        if id.trim().is_empty() {
            return Err(Error::inconsistent(
                &self.name,
                phase,
                "external id is empty",
            ));
        }

        match self.status.at_provider.external_id.as_deref() {
            Some(created) if created != id => Err(Error::inconsistent(
                id,
                phase,
                format!(
                    "external id changed from {created} to {id}; identifiers are immutable once created"
                ),
            )),
            _ => Ok(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_parsing() {
        assert_eq!("Process".parse::<ResourceKind>().unwrap(), ResourceKind::Process);

        let err = "Volume".parse::<ResourceKind>().unwrap_err();
        assert!(matches!(err, Error::InvalidResourceKind { ref actual, .. } if actual == "Volume"));
    }

    #[test]
    fn test_desired_state_deserialize() {
        let desired: DesiredState = serde_json::from_value(serde_json::json!({
            "name": "proc-a",
            "kind": "Process",
            "spec": {
                "forProvider": { "id": "p-1" },
                "providerConfigRef": { "name": "lab" },
                "writeConnectionSecretToRef": { "name": "proc-a-conn" }
            }
        }))
        .unwrap();

        assert_eq!(desired.external_id(), "p-1");
        assert_eq!(desired.spec.provider_config_ref.name, "lab");
        assert_eq!(
            desired.spec.write_connection_secret_to_ref,
            Some(SecretReference::new("default", "proc-a-conn"))
        );
        assert!(!desired.deletion_intent);
        assert!(desired.status.conditions.is_empty());
    }

    #[test]
    fn test_verify_identity_rejects_changed_id() {
        let mut desired = DesiredState::process("proc-a", "p-2");
        desired.status.at_provider.external_id = Some("p-1".to_string());

        let err = desired.verify_identity(Phase::Observe).unwrap_err();
        assert!(err.is_inconsistent());
    }

    #[test]
    fn test_verify_identity_rejects_empty_id() {
        let desired = DesiredState::process("proc-a", "  ");
        assert!(desired.verify_identity(Phase::Create).is_err());
    }

    #[test]
    fn test_verify_identity_accepts_first_use() {
        let desired = DesiredState::process("proc-a", "p-1");
        assert_eq!(desired.verify_identity(Phase::Create).unwrap(), "p-1");
    }
}
