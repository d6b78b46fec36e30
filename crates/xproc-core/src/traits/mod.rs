//! Core traits for the xproc system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ExternalGateway`]: Issue create/delete requests to the remote server
//! - [`ExistenceTracker`]: Local existence bookkeeping
//! - [`ExternalConnector`] / [`ExternalClient`]: The lifecycle contract
//! - [`ResourceStore`], [`ConfigStore`], [`SecretStore`], ...: Declarative store collaborators

pub mod gateway;
pub mod lifecycle;
pub mod store;
pub mod tracker;

pub use gateway::{ExternalGateway, GatewayFactory, GatewayOutcome};
pub use lifecycle::{
    ConnectionDetails, Creation, Existence, ExternalClient, ExternalConnector, Observation,
    Update,
};
pub use store::{
    ConfigStore, ConnectionPublisher, CredentialExtractor, ResourceStore, SecretStore,
    UsageTracker,
};
pub use tracker::{ExistencePhase, ExistenceRecord, ExistenceTracker, TrackerFactory};
