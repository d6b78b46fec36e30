// # xproc-core
//
// Core library for reconciling externally-managed processes against their
// declared desired state.
//
// ## Architecture Overview
//
// - **ExternalConnector**: Resolves configuration and credentials into a bound client
// - **ExternalClient**: Observe/Create/Update/Delete for one resource
// - **ExternalGateway**: Trait for the remote server's create/delete calls
// - **ExistenceTracker**: Local bookkeeping standing in for a remote status query
// - **Reconciler**: Loop that turns triggers into lifecycle passes
// - **GatewayRegistry**: Plugin-based registry for gateways and trackers
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Lifecycle logic is separate from transports
// 2. **Plugin-Based**: Gateways are registered dynamically, no hard-coded if-else
// 3. **Library-First**: All core functionality can be used as a library
// 4. **Idempotency**: Every lifecycle call tolerates at-least-once delivery

pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod external;
pub mod reconciler;
pub mod registry;
pub mod resource;
pub mod store;
pub mod tracker;
pub mod traits;

// Re-export core types for convenience
pub use config::{ControllerConfig, EndpointConfig, ReconcilerConfig, TrackerConfig};
pub use connector::{CommonCredentialExtractor, ProcessConnector};
pub use context::ReconcileContext;
pub use error::{Error, Phase, Result};
pub use external::{IdentifierLocks, ProcessClient};
pub use reconciler::{ReconcileEvent, ReconcileOutcome, Reconciler};
pub use registry::GatewayRegistry;
pub use resource::{DesiredState, ObservedStatus, ProviderConfig};
pub use tracker::{FileExistenceTracker, MemoryExistenceTracker};
pub use traits::{ExistenceTracker, ExternalClient, ExternalConnector, ExternalGateway};
