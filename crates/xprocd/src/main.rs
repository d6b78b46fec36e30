// # xprocd - Managed Process Daemon
//
// Thin integration layer: all lifecycle logic lives in xproc-core.
//
// The xprocd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime
// 3. Loading the manifest into the in-memory stores
// 4. Registering gateways and building the existence tracker
// 5. Running the reconciler until a shutdown signal arrives
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Manifest
// - `XPROC_MANIFEST`: Path to the JSON manifest (required)
//
// ### Existence Tracker
// - `XPROC_TRACKER_TYPE`: Type of tracker (file, memory)
// - `XPROC_TRACKER_PATH`: Path to tracker file (for file tracker)
//
// ### Gateway Defaults
// - `XPROC_GATEWAY_HOST`: Process server host
// - `XPROC_GATEWAY_PORT`: Process server port
//
// ### Reconciler
// - `XPROC_POLL_INTERVAL_SECS`: Seconds between full re-observations
// - `XPROC_MAX_CONCURRENT`: Passes running at once
// - `XPROC_RECONCILE_TIMEOUT_SECS`: Deadline for one pass
// - `XPROC_SERIALIZE_LIFECYCLE`: Serialize calls per identifier (true, false)
//
// ### Output
// - `XPROC_STATUS_PATH`: Where to write resources with status at shutdown
// - `XPROC_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export XPROC_MANIFEST=/etc/xproc/manifest.json
// export XPROC_TRACKER_TYPE=file
// export XPROC_TRACKER_PATH=/var/lib/xproc/tracker.json
// export XPROC_GATEWAY_HOST=kk-crossplane3
// export XPROC_GATEWAY_PORT=12345
//
// xprocd
// ```

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use xproc_core::store::{
    Manifest, MemoryConfigStore, MemoryResourceStore, MemorySecretStore, MemoryUsageTracker,
};
use xproc_core::{
    CommonCredentialExtractor, ControllerConfig, GatewayRegistry, ProcessConnector,
    ReconcileEvent, Reconciler, TrackerConfig,
};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum XprocExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<XprocExitCode> for ExitCode {
    fn from(code: XprocExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    manifest_path: PathBuf,
    tracker_type: String,
    tracker_path: Option<String>,
    gateway_host: Option<String>,
    gateway_port: Option<u16>,
    poll_interval_secs: Option<u64>,
    max_concurrent: Option<usize>,
    reconcile_timeout_secs: Option<u64>,
    serialize_lifecycle: bool,
    status_path: Option<PathBuf>,
    log_level: String,
}

/// Parse an optional numeric variable, naming it in the error
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{name} must be a number, got '{raw}': {e}")),
        _ => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let manifest_path = env::var("XPROC_MANIFEST").context(
            "XPROC_MANIFEST is required. \
            Set it via: export XPROC_MANIFEST=/etc/xproc/manifest.json",
        )?;

        let serialize_lifecycle = match env::var("XPROC_SERIALIZE_LIFECYCLE") {
            Ok(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "" | "0" | "false" | "no" => false,
                other => anyhow::bail!(
                    "XPROC_SERIALIZE_LIFECYCLE must be true or false, got '{}'",
                    other
                ),
            },
            Err(_) => false,
        };

        Ok(Self {
            manifest_path: PathBuf::from(manifest_path),
            tracker_type: env::var("XPROC_TRACKER_TYPE").unwrap_or_else(|_| "file".to_string()),
            tracker_path: env::var("XPROC_TRACKER_PATH").ok(),
            gateway_host: env::var("XPROC_GATEWAY_HOST").ok(),
            gateway_port: parse_var("XPROC_GATEWAY_PORT")?,
            poll_interval_secs: parse_var("XPROC_POLL_INTERVAL_SECS")?,
            max_concurrent: parse_var("XPROC_MAX_CONCURRENT")?,
            reconcile_timeout_secs: parse_var("XPROC_RECONCILE_TIMEOUT_SECS")?,
            serialize_lifecycle,
            status_path: env::var("XPROC_STATUS_PATH").ok().map(PathBuf::from),
            log_level: env::var("XPROC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks the values the core config cannot see: variable spelling,
    /// file locations and the log level. Numeric bounds are checked again by
    /// `ControllerConfig::validate`.
    fn validate(&self) -> Result<()> {
        if self.manifest_path.as_os_str().is_empty() {
            anyhow::bail!("XPROC_MANIFEST cannot be empty");
        }

        match self.tracker_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "XPROC_TRACKER_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.tracker_type
            ),
        }

        if self.tracker_type == "file" {
            let Some(path) = self.tracker_path.as_deref().filter(|p| !p.is_empty()) else {
                anyhow::bail!(
                    "XPROC_TRACKER_PATH is required when XPROC_TRACKER_TYPE=file. \
                    Set it via: export XPROC_TRACKER_PATH=/var/lib/xproc/tracker.json"
                );
            };

            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "XPROC_TRACKER_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        if let Some(host) = &self.gateway_host
            && host.trim().is_empty()
        {
            anyhow::bail!("XPROC_GATEWAY_HOST cannot be empty when set");
        }

        if let Some(max) = self.max_concurrent
            && !(1..=256).contains(&max)
        {
            anyhow::bail!("XPROC_MAX_CONCURRENT must be between 1 and 256. Got: {}", max);
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "XPROC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the core configuration, applying only the variables that are set
    fn controller_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::new();

        config.tracker = match (self.tracker_type.as_str(), &self.tracker_path) {
            ("file", Some(path)) => TrackerConfig::File { path: path.clone() },
            _ => TrackerConfig::Memory,
        };

        if let Some(host) = &self.gateway_host {
            config.gateway.host = host.trim().to_string();
        }
        if let Some(port) = self.gateway_port {
            config.gateway.port = port;
        }

        if let Some(secs) = self.poll_interval_secs {
            config.reconciler.poll_interval_secs = secs;
        }
        if let Some(max) = self.max_concurrent {
            config.reconciler.max_concurrent_reconciles = max;
        }
        if let Some(secs) = self.reconcile_timeout_secs {
            config.reconciler.reconcile_timeout_secs = secs;
        }
        config.reconciler.serialize_lifecycle = self.serialize_lifecycle;

        config
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return XprocExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return XprocExitCode::ConfigError.into();
    }

    let controller_config = config.controller_config();
    if let Err(e) = controller_config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return XprocExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return XprocExitCode::ConfigError.into();
    }

    info!("Starting xprocd daemon");
    info!(
        "Configuration loaded: manifest {}, tracker {}",
        config.manifest_path.display(),
        controller_config.tracker.type_name()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return XprocExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config, controller_config).await {
            Ok(()) => XprocExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                if e.downcast_ref::<xproc_core::Error>().is_some_and(|e| matches!(e, xproc_core::Error::Config(_))) {
                    XprocExitCode::ConfigError
                } else {
                    XprocExitCode::RuntimeError
                }
            }
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config, controller_config: ControllerConfig) -> Result<()> {
    let manifest = Manifest::load(&config.manifest_path).await?;

    let resources = MemoryResourceStore::new();
    let configs = MemoryConfigStore::new();
    let secrets = MemorySecretStore::new();
    manifest.seed(&resources, &configs, &secrets).await;
    info!(
        "Manifest loaded: {} resource(s), {} ProviderConfig(s)",
        manifest.resources.len(),
        manifest.provider_configs.len()
    );

    let registry = Arc::new(GatewayRegistry::with_builtin_trackers());

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP gateway");
        xproc_gateway_http::register(&registry);
    }

    if !registry.has_gateway(&controller_config.gateway.transport) {
        warn!(
            "No gateway registered for transport '{}'; every connect will fail",
            controller_config.gateway.transport
        );
    }

    let tracker = registry.create_tracker(&controller_config.tracker).await?;

    let mut connector = ProcessConnector::new(
        Arc::new(configs),
        Arc::new(MemoryUsageTracker::new()),
        Arc::new(CommonCredentialExtractor::new(Arc::new(secrets.clone()))),
        registry,
        tracker.clone(),
    )
    .with_defaults(controller_config.gateway.clone());
    if controller_config.reconciler.serialize_lifecycle {
        connector = connector.with_serialized_lifecycle();
    }

    let (reconciler, events) = Reconciler::new(
        Arc::new(resources.clone()),
        Arc::new(connector),
        controller_config.reconciler.clone(),
    )?;
    let reconciler = reconciler
        .with_publisher(Arc::new(secrets))
        .with_tracker(tracker);

    let event_logger = tokio::spawn(log_events(events));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling error: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    info!("Daemon initialized successfully");
    let outcome = reconciler.run_with_shutdown(None, Some(shutdown_rx)).await;

    signals.abort();
    drop(reconciler);
    if let Err(e) = event_logger.await {
        warn!("Event logger task failed: {}", e);
    }

    if let Some(path) = &config.status_path {
        write_status(&resources, path).await?;
    }

    outcome?;
    info!("Shutting down daemon");
    Ok(())
}

/// Log every reconcile event until the reconciler drops its sender
async fn log_events(mut events: mpsc::Receiver<ReconcileEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ReconcileEvent::Started { resources_count } => {
                info!("Reconciler started with {} resource(s)", resources_count)
            }
            ReconcileEvent::Created { name, external_id } => {
                info!("{}: created process {}", name, external_id)
            }
            ReconcileEvent::Updated { name, external_id } => {
                info!("{}: recreated drifted process {}", name, external_id)
            }
            ReconcileEvent::Deleted { name, external_id } => {
                info!("{}: deleted process {}", name, external_id)
            }
            ReconcileEvent::UpToDate { name } => debug!("{}: up to date", name),
            ReconcileEvent::Failed {
                name,
                phase,
                error,
                retryable,
            } => {
                let phase = phase.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
                warn!("{}: {} failed (retryable: {}): {}", name, phase, retryable, error)
            }
            ReconcileEvent::RetryScheduled {
                name,
                attempt,
                delay,
            } => debug!("{}: retry #{} in {:?}", name, attempt, delay),
            ReconcileEvent::Stopped { reason } => info!("Reconciler stopped: {}", reason),
        }
    }
}

/// Write every resource with its status as pretty JSON
async fn write_status(resources: &MemoryResourceStore, path: &std::path::Path) -> Result<()> {
    let snapshot = resources.snapshot().await;
    let json = serde_json::to_string_pretty(&snapshot).context("serializing status dump")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing status dump to {}", path.display()))?;
    info!("Wrote status of {} resource(s) to {}", snapshot.len(), path.display());
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
