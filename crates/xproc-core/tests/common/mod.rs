//! Test doubles and common utilities for lifecycle contract tests
//!
//! The gateway double keeps a server-side set of processes so duplicate
//! creates and deletes behave like the real idempotent server.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use xproc_core::config::{EndpointConfig, ReconcilerConfig};
use xproc_core::error::{Error, Result};
use xproc_core::resource::{DesiredState, ProviderConfig};
use xproc_core::store::{MemoryConfigStore, MemoryResourceStore, MemorySecretStore, MemoryUsageTracker};
use xproc_core::traits::{
    ExternalGateway, GatewayFactory, GatewayOutcome, ResourceStore, UsageTracker,
};
use xproc_core::{
    CommonCredentialExtractor, GatewayRegistry, MemoryExistenceTracker, ProcessConnector,
    ReconcileEvent, Reconciler,
};

/// A mock ExternalGateway that tracks calls
pub struct MockGateway {
    /// Call counter for create()
    create_call_count: Arc<AtomicUsize>,
    /// Call counter for delete()
    delete_call_count: Arc<AtomicUsize>,
    /// Processes the fake server currently holds
    server: Arc<Mutex<HashSet<String>>>,
    /// Number of upcoming create() calls that fail
    failing_creates: Arc<AtomicUsize>,
    /// Delay before each call completes
    latency: Duration,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            create_call_count: Arc::new(AtomicUsize::new(0)),
            delete_call_count: Arc::new(AtomicUsize::new(0)),
            server: Arc::new(Mutex::new(HashSet::new())),
            failing_creates: Arc::new(AtomicUsize::new(0)),
            latency: Duration::ZERO,
        }
    }

    /// Every call waits `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Create a new MockGateway that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            create_call_count: Arc::clone(&other.create_call_count),
            delete_call_count: Arc::clone(&other.delete_call_count),
            server: Arc::clone(&other.server),
            failing_creates: Arc::clone(&other.failing_creates),
            latency: other.latency,
        }
    }

    pub fn create_call_count(&self) -> usize {
        self.create_call_count.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> usize {
        self.delete_call_count.load(Ordering::SeqCst)
    }

    /// Processes on the fake server
    pub fn server_processes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.server.lock().unwrap().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Make the next `n` create() calls fail
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExternalGateway for MockGateway {
    async fn create(&self, id: &str) -> Result<GatewayOutcome> {
        self.create_call_count.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let should_fail = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::gateway("mock", "HTTP 503: server unavailable"));
        }

        if self.server.lock().unwrap().insert(id.to_string()) {
            Ok(GatewayOutcome::Applied {
                message: format!("process {id} created"),
            })
        } else {
            Ok(GatewayOutcome::AlreadyExists {
                message: format!("process {id} exists"),
            })
        }
    }

    async fn delete(&self, id: &str) -> Result<GatewayOutcome> {
        self.delete_call_count.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.server.lock().unwrap().remove(id) {
            Ok(GatewayOutcome::Applied {
                message: format!("process {id} deleted"),
            })
        } else {
            Ok(GatewayOutcome::AlreadyAbsent {
                message: format!("process {id} not found"),
            })
        }
    }

    fn endpoint(&self) -> String {
        "http://mock:12345".to_string()
    }

    fn gateway_name(&self) -> &'static str {
        "mock"
    }
}

/// Factory handing out gateways that share one MockGateway's counters
pub struct MockGatewayFactory {
    template: MockGateway,
    /// Credentials passed to each create()
    credentials_seen: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Endpoints passed to each create()
    endpoints_seen: Arc<Mutex<Vec<EndpointConfig>>>,
}

impl GatewayFactory for MockGatewayFactory {
    fn create(&self, endpoint: &EndpointConfig, credentials: &[u8]) -> Result<Box<dyn ExternalGateway>> {
        self.credentials_seen.lock().unwrap().push(credentials.to_vec());
        self.endpoints_seen.lock().unwrap().push(endpoint.clone());
        Ok(Box::new(MockGateway::sharing_counters_with(&self.template)))
    }
}

/// A UsageTracker that always fails
pub struct FailingUsageTracker;

#[async_trait]
impl UsageTracker for FailingUsageTracker {
    async fn track(&self, _desired: &DesiredState) -> Result<()> {
        Err(Error::store("usage index unavailable"))
    }
}

/// A UsageTracker that panics on its first `n` calls
pub struct PanickingUsageTracker {
    remaining: AtomicUsize,
}

impl PanickingUsageTracker {
    pub fn new(n: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl UsageTracker for PanickingUsageTracker {
    async fn track(&self, _desired: &DesiredState) -> Result<()> {
        let should_panic = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("usage tracker blew up");
        }
        Ok(())
    }
}

/// Memory-backed collaborators wired to a MockGateway
pub struct Harness {
    pub resources: MemoryResourceStore,
    pub configs: MemoryConfigStore,
    pub secrets: MemorySecretStore,
    pub usage: MemoryUsageTracker,
    pub tracker: MemoryExistenceTracker,
    pub gateway: MockGateway,
    pub registry: Arc<GatewayRegistry>,
    pub credentials_seen: Arc<Mutex<Vec<Vec<u8>>>>,
    pub endpoints_seen: Arc<Mutex<Vec<EndpointConfig>>>,
}

impl Harness {
    /// Harness with a credential-less "default" ProviderConfig
    pub async fn new() -> Self {
        Self::with_gateway(MockGateway::new()).await
    }

    pub async fn with_gateway(gateway: MockGateway) -> Self {
        let credentials_seen = Arc::new(Mutex::new(Vec::new()));
        let endpoints_seen = Arc::new(Mutex::new(Vec::new()));

        let registry = Arc::new(GatewayRegistry::with_builtin_trackers());
        registry.register_gateway(
            "http",
            Box::new(MockGatewayFactory {
                template: MockGateway::sharing_counters_with(&gateway),
                credentials_seen: credentials_seen.clone(),
                endpoints_seen: endpoints_seen.clone(),
            }),
        );

        let configs = MemoryConfigStore::new();
        configs.apply(ProviderConfig::new("default")).await;

        Self {
            resources: MemoryResourceStore::new(),
            configs,
            secrets: MemorySecretStore::new(),
            usage: MemoryUsageTracker::new(),
            tracker: MemoryExistenceTracker::new(),
            gateway,
            registry,
            credentials_seen,
            endpoints_seen,
        }
    }

    /// A connector over this harness' collaborators
    pub fn connector(&self) -> ProcessConnector {
        self.connector_with_usage(Arc::new(self.usage.clone()))
    }

    /// A connector recording ProviderConfig usage in `usage`
    pub fn connector_with_usage(&self, usage: Arc<dyn UsageTracker>) -> ProcessConnector {
        ProcessConnector::new(
            Arc::new(self.configs.clone()),
            usage,
            Arc::new(CommonCredentialExtractor::new(Arc::new(self.secrets.clone()))),
            self.registry.clone(),
            Arc::new(self.tracker.clone()),
        )
    }

    /// A reconciler publishing to this harness' secret store
    pub fn reconciler(&self, config: ReconcilerConfig) -> (Reconciler, mpsc::Receiver<ReconcileEvent>) {
        self.reconciler_over(self.connector(), config)
    }

    /// Like `reconciler`, driving passes through `connector`
    pub fn reconciler_over(
        &self,
        connector: ProcessConnector,
        config: ReconcilerConfig,
    ) -> (Reconciler, mpsc::Receiver<ReconcileEvent>) {
        let (reconciler, events) = Reconciler::new(
            Arc::new(self.resources.clone()),
            Arc::new(connector),
            config,
        )
        .expect("reconciler construction succeeds");

        let reconciler = reconciler
            .with_publisher(Arc::new(self.secrets.clone()))
            .with_tracker(Arc::new(self.tracker.clone()));
        (reconciler, events)
    }

    /// Current stored record
    pub async fn stored(&self, name: &str) -> DesiredState {
        self.resources
            .get(name)
            .await
            .expect("store read succeeds")
            .expect("resource exists")
    }
}

/// Loop settings that keep tests fast
pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig {
        poll_interval_secs: 3600,
        max_concurrent_reconciles: 4,
        reconcile_timeout_secs: 5,
        retry_base_delay_ms: 20,
        retry_max_delay_secs: 1,
        serialize_lifecycle: false,
        event_channel_capacity: 1000,
    }
}

/// Drain every event currently buffered
pub fn drain_events(rx: &mut mpsc::Receiver<ReconcileEvent>) -> Vec<ReconcileEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
