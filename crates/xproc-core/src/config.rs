//! Configuration types for the xproc system
//!
//! This module defines the controller-wide configuration: endpoint defaults
//! for gateways, the existence tracker backend and reconciliation loop
//! tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Existence tracker backend
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Default connection settings for every gateway
    #[serde(default)]
    pub gateway: EndpointConfig,

    /// Reconciliation loop settings
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.tracker.validate()?;
        self.gateway.validate()?;
        self.reconciler.validate()?;
        Ok(())
    }
}

/// Existence tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerConfig {
    /// In-memory tracker (lost on restart)
    #[default]
    Memory,

    /// JSON file tracker
    File {
        /// Path to the tracker file
        path: String,
    },

    /// Custom tracker
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            TrackerConfig::Memory => Ok(()),
            TrackerConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("Tracker file path cannot be empty"));
                }
                Ok(())
            }
            TrackerConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom tracker factory cannot be empty",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Registry name of the tracker implementation
    pub fn type_name(&self) -> &str {
        match self {
            TrackerConfig::Memory => "memory",
            TrackerConfig::File { .. } => "file",
            TrackerConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Resolved connection settings for one gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Gateway implementation to use (registry key)
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path segment under which processes are addressed
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Per-request timeout (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.transport.is_empty() {
            return Err(crate::Error::config("Gateway transport cannot be empty"));
        }
        if self.host.is_empty() {
            return Err(crate::Error::config("Gateway host cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::config("Gateway port must be > 0"));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(crate::Error::config(format!(
                "Gateway scheme must be http or https, got {}",
                self.scheme
            )));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Gateway timeout must be > 0"));
        }
        Ok(())
    }

    /// Base URL, e.g. `http://kk-crossplane3:12345`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Apply per-connection overrides on top of these defaults
    pub fn with_overrides(&self, overrides: &EndpointOverride) -> Self {
        Self {
            transport: overrides
                .transport
                .clone()
                .unwrap_or_else(|| self.transport.clone()),
            scheme: overrides.scheme.clone().unwrap_or_else(|| self.scheme.clone()),
            host: overrides.host.clone().unwrap_or_else(|| self.host.clone()),
            port: overrides.port.unwrap_or(self.port),
            path_prefix: overrides
                .path_prefix
                .clone()
                .unwrap_or_else(|| self.path_prefix.clone()),
            timeout_secs: overrides.timeout_secs.unwrap_or(self.timeout_secs),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            path_prefix: default_path_prefix(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Partial endpoint settings carried by a ProviderConfig
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Interval between full re-observations of every resource (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum reconciliation passes running at once
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Deadline for a single reconciliation pass (in seconds)
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,

    /// First retry delay after a failed pass (in milliseconds)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on the retry delay (in seconds)
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,

    /// Serialize lifecycle calls per identifier inside the external client
    ///
    /// Only needed when triggers can reconcile the same resource from more
    /// than one place; the loop itself is single-flight per resource.
    #[serde(default)]
    pub serialize_lifecycle: bool,

    /// Capacity of the event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(crate::Error::config(
                "Max concurrent reconciles must be > 0",
            ));
        }
        if self.reconcile_timeout_secs == 0 {
            return Err(crate::Error::config("Reconcile timeout must be > 0"));
        }
        if self.retry_max_delay_secs.saturating_mul(1000) < self.retry_base_delay_ms {
            return Err(crate::Error::config(
                "Retry max delay must not be shorter than the base delay",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            serialize_lifecycle: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_transport() -> String {
    "http".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "kk-crossplane3".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_path_prefix() -> String {
    "processo".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_reconcile_timeout_secs() -> u64 {
    120
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1000
}
