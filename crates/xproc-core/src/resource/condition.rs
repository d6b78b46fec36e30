//! Status conditions written back to the desired-state record
//!
//! Observers of the declarative store poll these to learn the last known
//! outcome of reconciliation. `Ready` describes the external resource,
//! `Synced` describes the last reconciliation pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The external resource is usable
    Ready,
    /// The last reconciliation pass succeeded
    Synced,
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason for a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Available,
    Unavailable,
    Creating,
    Deleting,
    ReconcileSuccess,
    ReconcileError,
}

/// A single status condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// The external resource exists and is usable
    pub fn available() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::True,
            ConditionReason::Available,
        )
    }

    /// The external resource is not usable
    pub fn unavailable() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Unavailable,
        )
    }

    /// The external resource is being created
    pub fn creating() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Creating,
        )
    }

    /// The external resource is being deleted
    pub fn deleting() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Deleting,
        )
    }

    /// The last reconciliation pass succeeded
    pub fn reconcile_success() -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::True,
            ConditionReason::ReconcileSuccess,
        )
    }

    /// The last reconciliation pass failed with `err`
    pub fn reconcile_error(err: impl std::fmt::Display) -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::False,
            ConditionReason::ReconcileError,
        )
        .with_message(err.to_string())
    }

    /// Attach a human-readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Same type, status, reason and message; transition time ignored
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Set conditions on a condition list, one entry per type.
///
/// An equivalent existing condition is left untouched so its transition
/// time keeps pointing at the moment the state actually changed.
pub fn set_conditions(existing: &mut Vec<Condition>, updates: impl IntoIterator<Item = Condition>) {
    for update in updates {
        match existing
            .iter_mut()
            .find(|c| c.condition_type == update.condition_type)
        {
            Some(current) if current.equivalent(&update) => {}
            Some(current) => *current = update,
            None => existing.push(update),
        }
    }
}

/// Look up the condition of a given type
pub fn get_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}
