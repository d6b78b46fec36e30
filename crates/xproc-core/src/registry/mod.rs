//! Plugin-based gateway registry
//!
//! The registry lets gateway transports and existence tracker backends be
//! registered at runtime, so the connector never hardcodes a transport.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use xproc_core::registry::GatewayRegistry;
//!
//! let registry = GatewayRegistry::with_builtin_trackers();
//!
//! // In the xproc-gateway-http crate
//! xproc_gateway_http::register(&registry);
//!
//! let gateway = registry.create_gateway(&endpoint, &credentials)?;
//! let tracker = registry.create_tracker(&TrackerConfig::Memory).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{EndpointConfig, TrackerConfig};
use crate::error::{Error, Result};
use crate::tracker::{FileTrackerFactory, MemoryTrackerFactory};
use crate::traits::{ExistenceTracker, ExternalGateway, GatewayFactory, TrackerFactory};

/// Registry of gateway transports and tracker backends
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive
/// registration. A poisoned lock is still read; registration only ever
/// inserts whole entries.
#[derive(Default)]
pub struct GatewayRegistry {
    /// Gateway factories keyed by transport name
    gateways: RwLock<HashMap<String, Box<dyn GatewayFactory>>>,

    /// Tracker factories keyed by tracker type
    trackers: RwLock<HashMap<String, Arc<dyn TrackerFactory>>>,
}

impl GatewayRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `memory` and `file` trackers registered
    pub fn with_builtin_trackers() -> Self {
        let registry = Self::new();
        registry.register_tracker("memory", Box::new(MemoryTrackerFactory));
        registry.register_tracker("file", Box::new(FileTrackerFactory));
        registry
    }

    /// Register a gateway factory for a transport (e.g. "http")
    pub fn register_gateway(&self, transport: impl Into<String>, factory: Box<dyn GatewayFactory>) {
        let mut gateways = self.gateways.write().unwrap_or_else(PoisonError::into_inner);
        gateways.insert(transport.into(), factory);
    }

    /// Register a tracker factory for a tracker type
    pub fn register_tracker(&self, name: impl Into<String>, factory: Box<dyn TrackerFactory>) {
        let mut trackers = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
        trackers.insert(name.into(), Arc::from(factory));
    }

    /// Build a gateway bound to `endpoint`
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ExternalGateway>)`: A fully initialised gateway
    /// - `Err(Error)`: Unknown transport, invalid endpoint, or the factory failed
    pub fn create_gateway(
        &self,
        endpoint: &EndpointConfig,
        credentials: &[u8],
    ) -> Result<Box<dyn ExternalGateway>> {
        endpoint.validate()?;

        let gateways = self.gateways.read().unwrap_or_else(PoisonError::into_inner);
        let factory = gateways.get(&endpoint.transport).ok_or_else(|| {
            Error::config(format!("Unknown gateway transport: {}", endpoint.transport))
        })?;

        factory.create(endpoint, credentials)
    }

    /// Build an existence tracker from configuration
    pub async fn create_tracker(&self, config: &TrackerConfig) -> Result<Arc<dyn ExistenceTracker>> {
        config.validate()?;

        let (factory, config_json) = {
            let trackers = self.trackers.read().unwrap_or_else(PoisonError::into_inner);
            let factory = trackers
                .get(config.type_name())
                .ok_or_else(|| {
                    Error::config(format!("Unknown tracker type: {}", config.type_name()))
                })?
                .clone();

            let config_json = match config {
                TrackerConfig::Custom { config, .. } => config.clone(),
                other => serde_json::to_value(other)?,
            };
            (factory, config_json)
        };

        // Lock is released before the async create
        let tracker = factory.create(&config_json).await?;
        Ok(Arc::from(tracker))
    }

    /// Registered gateway transports
    pub fn list_gateways(&self) -> Vec<String> {
        let gateways = self.gateways.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = gateways.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered tracker types
    pub fn list_trackers(&self) -> Vec<String> {
        let trackers = self.trackers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = trackers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_gateway(&self, transport: &str) -> bool {
        let gateways = self.gateways.read().unwrap_or_else(PoisonError::into_inner);
        gateways.contains_key(transport)
    }

    pub fn has_tracker(&self, name: &str) -> bool {
        let trackers = self.trackers.read().unwrap_or_else(PoisonError::into_inner);
        trackers.contains_key(name)
    }
}
