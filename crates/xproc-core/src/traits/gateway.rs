// # External Gateway Trait
//
// Defines the interface for issuing side-effecting requests to the remote
// process server.
//
// ## Implementations
//
// - HTTP: `xproc-gateway-http` crate
//
// ## Usage
//
// ```rust,ignore
// use xproc_core::ExternalGateway;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let gateway = /* ExternalGateway implementation */;
//
//     gateway.create("p-1").await?;
//     gateway.delete("p-1").await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::config::EndpointConfig;

/// Result of a gateway request
///
/// The text is whatever the remote server answered. It is logged, never
/// parsed for structured status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// The request took effect
    Applied { message: String },
    /// Create of an identifier the server already has (no-op)
    AlreadyExists { message: String },
    /// Delete of an identifier the server does not have (no-op)
    AlreadyAbsent { message: String },
}

impl GatewayOutcome {
    /// Free-form response text
    pub fn message(&self) -> &str {
        match self {
            GatewayOutcome::Applied { message }
            | GatewayOutcome::AlreadyExists { message }
            | GatewayOutcome::AlreadyAbsent { message } => message,
        }
    }

    /// Whether the request changed remote state
    pub fn is_applied(&self) -> bool {
        matches!(self, GatewayOutcome::Applied { .. })
    }
}

/// Trait for External Gateway implementations
///
/// A gateway is bound to one resolved connection and exposes only the two
/// coarse operations the remote server understands.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform request/response calls to their endpoint only
/// - ✅ Map transport status to [`GatewayOutcome`] or an error
///
/// ## Forbidden Capabilities
/// - ❌ Spawn tasks or threads
/// - ❌ Implement retry logic or backoff (owned by the `Reconciler`)
/// - ❌ Access the existence tracker (owned by the external client)
/// - ❌ Parse response bodies for structured status
///
/// # Idempotency
///
/// Both operations are keyed by the identifier and must tolerate
/// at-least-once delivery: a duplicate create reports
/// [`GatewayOutcome::AlreadyExists`] (or `Applied` if the server treats it
/// as a no-op), a delete of an absent identifier reports
/// [`GatewayOutcome::AlreadyAbsent`]. Neither is an error.
#[async_trait]
pub trait ExternalGateway: Send + Sync {
    /// Ask the remote server to create the process `id`
    ///
    /// # Returns
    ///
    /// - `Ok(GatewayOutcome)`: The server accepted the request or already had `id`
    /// - `Err(Error)`: Transport failure or server-side rejection
    async fn create(&self, id: &str) -> Result<GatewayOutcome, crate::Error>;

    /// Ask the remote server to delete the process `id`
    ///
    /// # Returns
    ///
    /// - `Ok(GatewayOutcome)`: The server removed `id` or never had it
    /// - `Err(Error)`: Transport failure or server-side rejection
    async fn delete(&self, id: &str) -> Result<GatewayOutcome, crate::Error>;

    /// Address of the remote server (published as a connection detail)
    fn endpoint(&self) -> String;

    /// Gateway name (for logging/debugging)
    fn gateway_name(&self) -> &'static str;
}

/// Helper trait for constructing gateways from a resolved connection
pub trait GatewayFactory: Send + Sync {
    /// Create a gateway bound to `endpoint` using `credentials`
    ///
    /// # Parameters
    ///
    /// - `endpoint`: Controller defaults merged with the ProviderConfig override
    /// - `credentials`: Bytes extracted from the ProviderConfig's credential source
    fn create(
        &self,
        endpoint: &EndpointConfig,
        credentials: &[u8],
    ) -> Result<Box<dyn ExternalGateway>, crate::Error>;
}
