// # HTTP Process Gateway
//
// This crate provides the HTTP implementation of `ExternalGateway` for the
// xproc reconciliation engine.
//
// ## Wire Protocol
//
// The process server exposes two body-less endpoints, both keyed by the
// process identifier:
//
// - Create: POST   `{scheme}://{host}:{port}/{path_prefix}/{id}`
// - Delete: DELETE `{scheme}://{host}:{port}/{path_prefix}/{id}`
//
// The response body is free text. It is logged, never parsed.
//
// ## Status Mapping
//
// | Status          | create             | delete             |
// |-----------------|--------------------|--------------------|
// | 2xx             | `Applied`          | `Applied`          |
// | 409             | `AlreadyExists`    | error              |
// | 404             | error              | `AlreadyAbsent`    |
// | 401/403/429/5xx | error              | error              |
//
// ## Architectural Constraints
//
// ### Trust Level: Untrusted (External Gateway)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP calls to the configured endpoint only
// - ✅ Map HTTP status to a `GatewayOutcome` or an error
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads (violates shutdown determinism)
// - ❌ Implement retry logic (owned by the Reconciler)
// - ❌ Access the existence tracker (owned by the external client)
//
// ## Security Requirements
//
// - Credentials NEVER appear in logs or Debug output
// - Non-empty credentials are sent as a bearer token and must be UTF-8

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use xproc_core::config::EndpointConfig;
use xproc_core::traits::{ExternalGateway, GatewayFactory, GatewayOutcome};
use xproc_core::{Error, Result};

const GATEWAY_NAME: &str = "http";

/// HTTP gateway bound to one process server
pub struct HttpGateway {
    /// Base URL including the path prefix, e.g. `http://kk-crossplane3:12345/processo`
    base: Url,

    /// Bearer token
    /// ⚠️ NEVER log this value
    token: Option<String>,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the token
impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl HttpGateway {
    /// Create a gateway for `endpoint`
    ///
    /// # Parameters
    ///
    /// - `endpoint`: Resolved endpoint settings
    /// - `credentials`: Empty for an unauthenticated server, otherwise a UTF-8 token
    pub fn new(endpoint: &EndpointConfig, credentials: &[u8]) -> Result<Self> {
        endpoint.validate()?;

        let mut base = Url::parse(&endpoint.base_url())
            .map_err(|e| Error::ClientConstructionFailed(format!("invalid endpoint URL: {e}")))?;
        {
            let mut segments = base.path_segments_mut().map_err(|_| {
                Error::ClientConstructionFailed("endpoint URL cannot carry a path".to_string())
            })?;
            segments.clear();
            for part in endpoint.path_prefix.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }

        let token = if credentials.is_empty() {
            None
        } else {
            let token = std::str::from_utf8(credentials).map_err(|_| {
                Error::ClientConstructionFailed("credentials are not valid UTF-8".to_string())
            })?;
            Some(token.trim().to_string())
        };

        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout())
            .build()
            .map_err(|e| Error::ClientConstructionFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base, token, client })
    }

    /// URL addressing process `id`; the id is percent-encoded as one segment
    fn process_url(&self, id: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::gateway(GATEWAY_NAME, "endpoint URL cannot carry a path"))?
            .push(id);
        Ok(url)
    }

    async fn send(&self, method: Method, id: &str) -> Result<(StatusCode, String)> {
        let url = self.process_url(id)?;
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::gateway(GATEWAY_NAME, format!("HTTP {method} request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());
        Ok((status, body))
    }
}

/// Error for a status neither operation accepts
fn status_error(operation: &str, id: &str, status: StatusCode, body: &str) -> Error {
    let message = match status.as_u16() {
        401 | 403 => format!("Authentication failed: invalid or missing credentials. Status: {status}"),
        429 => format!("Rate limit exceeded. Please retry later. Status: {status}"),
        500..=599 => format!("Process server error (transient): {status} - {body}"),
        _ => format!("Failed to {operation} process {id}: {status} - {body}"),
    };
    Error::gateway(GATEWAY_NAME, message)
}

#[async_trait]
impl ExternalGateway for HttpGateway {
    async fn create(&self, id: &str) -> Result<GatewayOutcome> {
        let (status, message) = self.send(Method::POST, id).await?;

        if status.is_success() {
            tracing::info!("Process server accepted create of {}: {}", id, message);
            Ok(GatewayOutcome::Applied { message })
        } else if status == StatusCode::CONFLICT {
            Ok(GatewayOutcome::AlreadyExists { message })
        } else {
            Err(status_error("create", id, status, &message))
        }
    }

    async fn delete(&self, id: &str) -> Result<GatewayOutcome> {
        let (status, message) = self.send(Method::DELETE, id).await?;

        if status.is_success() {
            tracing::info!("Process server accepted delete of {}: {}", id, message);
            Ok(GatewayOutcome::Applied { message })
        } else if status == StatusCode::NOT_FOUND {
            Ok(GatewayOutcome::AlreadyAbsent { message })
        } else {
            Err(status_error("delete", id, status, &message))
        }
    }

    fn endpoint(&self) -> String {
        self.base.as_str().trim_end_matches('/').to_string()
    }

    fn gateway_name(&self) -> &'static str {
        GATEWAY_NAME
    }
}

/// Factory for creating HTTP gateways
pub struct HttpGatewayFactory;

impl GatewayFactory for HttpGatewayFactory {
    fn create(&self, endpoint: &EndpointConfig, credentials: &[u8]) -> Result<Box<dyn ExternalGateway>> {
        Ok(Box::new(HttpGateway::new(endpoint, credentials)?))
    }
}

/// Register the HTTP gateway with a registry
///
/// # Example
///
/// ```rust
/// use xproc_core::GatewayRegistry;
///
/// let registry = GatewayRegistry::new();
/// xproc_gateway_http::register(&registry);
/// assert!(registry.has_gateway("http"));
/// ```
pub fn register(registry: &xproc_core::GatewayRegistry) {
    registry.register_gateway(GATEWAY_NAME, Box::new(HttpGatewayFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint_for(server: &MockServer) -> EndpointConfig {
        let address = server.address();
        EndpointConfig {
            host: address.ip().to_string(),
            port: address.port(),
            timeout_secs: 2,
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn test_default_endpoint_url() {
        let gateway = HttpGateway::new(&EndpointConfig::default(), b"").unwrap();
        assert_eq!(gateway.endpoint(), "http://kk-crossplane3:12345/processo");
        assert_eq!(
            gateway.process_url("p-1").unwrap().as_str(),
            "http://kk-crossplane3:12345/processo/p-1"
        );
    }

    #[test]
    fn test_identifier_is_escaped() {
        let gateway = HttpGateway::new(&EndpointConfig::default(), b"").unwrap();
        let url = gateway.process_url("a/b c").unwrap();
        assert_eq!(url.path(), "/processo/a%2Fb%20c");
    }

    #[test]
    fn test_invalid_utf8_credentials_rejected() {
        let result = HttpGateway::new(&EndpointConfig::default(), &[0xff, 0xfe]);
        assert!(matches!(result, Err(Error::ClientConstructionFailed(_))));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let endpoint = EndpointConfig {
            port: 0,
            ..EndpointConfig::default()
        };
        assert!(HttpGatewayFactory.create(&endpoint, b"").is_err());
    }

    #[test]
    fn test_token_not_exposed_in_debug() {
        let gateway = HttpGateway::new(&EndpointConfig::default(), b"secret_token_12345").unwrap();

        let debug_str = format!("{:?}", gateway);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("HttpGateway"));
    }

    #[test]
    fn test_register() {
        let registry = xproc_core::GatewayRegistry::new();
        register(&registry);
        assert!(registry.has_gateway("http"));
    }

    #[tokio::test]
    async fn test_create_posts_to_process_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/processo/p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("processo creato"))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&endpoint_for(&server), b"").unwrap();
        let outcome = gateway.create("p-1").await.unwrap();

        assert_eq!(
            outcome,
            GatewayOutcome::Applied {
                message: "processo creato".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_delete_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/processo/p-1"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&endpoint_for(&server), b"s3cret\n").unwrap();
        let outcome = gateway.delete("p-1").await.unwrap();
        assert!(outcome.is_applied());
    }

    #[tokio::test]
    async fn test_conflict_on_create_is_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&endpoint_for(&server), b"").unwrap();
        let outcome = gateway.create("p-1").await.unwrap();
        assert!(matches!(outcome, GatewayOutcome::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_not_found_on_delete_is_already_absent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&endpoint_for(&server), b"").unwrap();
        let outcome = gateway.delete("p-1").await.unwrap();
        assert!(matches!(outcome, GatewayOutcome::AlreadyAbsent { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&endpoint_for(&server), b"").unwrap();
        let err = gateway.create("p-1").await.unwrap_err();

        assert!(matches!(err, Error::Gateway { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_not_found_on_create_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&endpoint_for(&server), b"").unwrap();
        assert!(gateway.create("p-1").await.is_err());
    }

    #[tokio::test]
    async fn test_unauthorized_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&endpoint_for(&server), b"").unwrap();
        let err = gateway.delete("p-1").await.unwrap_err();
        assert!(err.to_string().contains("Authentication failed"));
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(10)))
            .mount(&server)
            .await;

        let endpoint = EndpointConfig {
            timeout_secs: 1,
            ..endpoint_for(&server)
        };
        let gateway = HttpGateway::new(&endpoint, b"").unwrap();
        assert!(gateway.create("p-1").await.is_err());
    }
}
