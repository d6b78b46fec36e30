//! Error types for the xproc reconciliation engine
//!
//! Every failure the core can report is a variant of [`Error`]. The first
//! group are the attributable failure points of `Connect`, the second group
//! are remote-system failures of a lifecycle phase. All of them are
//! non-fatal: the reconciliation loop records them on the resource status
//! and retries on the next trigger. [`Error::InconsistentState`] is the one
//! condition that should never be silently retried away.

use std::fmt;
use thiserror::Error;

/// Result type alias for xproc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle phase an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Connect,
    Observe,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connect => "connect",
            Phase::Observe => "observe",
            Phase::Create => "create",
            Phase::Update => "update",
            Phase::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Core error type for the xproc system
#[derive(Error, Debug)]
pub enum Error {
    /// The desired-state record is not of a supported managed kind
    #[error("managed resource is not a {expected} custom resource (got {actual})")]
    InvalidResourceKind {
        /// Kind the connector handles
        expected: String,
        /// Kind found on the record
        actual: String,
    },

    /// Provider config usage could not be recorded
    #[error("cannot track ProviderConfig usage: {0}")]
    UsageTrackingFailed(String),

    /// Referenced provider config is absent or unreadable
    #[error("cannot get ProviderConfig {name}: {message}")]
    ConfigNotFound {
        /// ProviderConfig name
        name: String,
        /// Underlying cause
        message: String,
    },

    /// Credential bytes could not be extracted
    #[error("cannot get credentials: {0}")]
    CredentialResolutionFailed(String),

    /// Gateway could not be built from the resolved connection
    #[error("cannot create new gateway client: {0}")]
    ClientConstructionFailed(String),

    /// Observe failed against the remote system or the tracker
    #[error("cannot observe external resource {id}: {message}")]
    ObserveFailed { id: String, message: String },

    /// Create failed against the remote system or the tracker
    #[error("cannot create external resource {id}: {message}")]
    CreateFailed { id: String, message: String },

    /// Update failed against the remote system or the tracker
    #[error("cannot update external resource {id}: {message}")]
    UpdateFailed { id: String, message: String },

    /// Delete failed against the remote system or the tracker
    #[error("cannot delete external resource {id}: {message}")]
    DeleteFailed { id: String, message: String },

    /// Desired state and existence bookkeeping disagree
    #[error("inconsistent state for {id} during {phase}: {message}")]
    InconsistentState {
        id: String,
        phase: Phase,
        message: String,
    },

    /// Caller cancelled the operation
    #[error("{phase} cancelled")]
    Cancelled { phase: Phase },

    /// Caller-supplied deadline expired
    #[error("{phase} deadline exceeded")]
    DeadlineExceeded { phase: Phase },

    /// Raw gateway (transport/remote) failure
    #[error("Gateway error ({gateway}): {message}")]
    Gateway {
        /// Gateway name
        gateway: String,
        /// Error message
        message: String,
    },

    /// Existence tracker failure
    #[error("Existence tracker error: {0}")]
    Tracker(String),

    /// Declarative store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid resource kind error
    pub fn invalid_kind(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidResourceKind {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a "config not found" error
    pub fn config_not_found(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigNotFound {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an inconsistent state error
    pub fn inconsistent(id: impl Into<String>, phase: Phase, message: impl Into<String>) -> Self {
        Self::InconsistentState {
            id: id.into(),
            phase,
            message: message.into(),
        }
    }

    /// Create a gateway error
    pub fn gateway(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gateway {
            gateway: gateway.into(),
            message: message.into(),
        }
    }

    /// Create a tracker error
    pub fn tracker(msg: impl Into<String>) -> Self {
        Self::Tracker(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Wrap an error as the failure of a lifecycle phase for `id`.
    ///
    /// Errors that already carry their own attribution (cancellation,
    /// deadlines, inconsistent state, earlier phase failures) pass through.
    pub fn in_phase(self, phase: Phase, id: &str) -> Self {
        if self.phase().is_some() {
            return self;
        }

        let id = id.to_string();
        let message = self.to_string();
        match phase {
            Phase::Connect => Self::ClientConstructionFailed(message),
            Phase::Observe => Self::ObserveFailed { id, message },
            Phase::Create => Self::CreateFailed { id, message },
            Phase::Update => Self::UpdateFailed { id, message },
            Phase::Delete => Self::DeleteFailed { id, message },
        }
    }

    /// Phase this error is attributed to, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::InvalidResourceKind { .. }
            | Self::UsageTrackingFailed(_)
            | Self::ConfigNotFound { .. }
            | Self::CredentialResolutionFailed(_)
            | Self::ClientConstructionFailed(_) => Some(Phase::Connect),
            Self::ObserveFailed { .. } => Some(Phase::Observe),
            Self::CreateFailed { .. } => Some(Phase::Create),
            Self::UpdateFailed { .. } => Some(Phase::Update),
            Self::DeleteFailed { .. } => Some(Phase::Delete),
            Self::InconsistentState { phase, .. }
            | Self::Cancelled { phase }
            | Self::DeadlineExceeded { phase } => Some(*phase),
            _ => None,
        }
    }

    /// Whether the loop may retry this error on a later trigger
    ///
    /// Kind mismatches are programmer errors and an inconsistent state needs
    /// an operator; everything else is transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidResourceKind { .. } | Self::InconsistentState { .. }
        )
    }

    /// Whether this error signals a tracker/remote desync
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, Self::InconsistentState { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
