//! Reconciliation loop
//!
//! The Reconciler is responsible for:
//! - Turning triggers (poll ticks, change notifications, retries) into passes
//! - Driving one pass: connect → observe → create | update | no-op, or delete
//! - Writing conditions and connection details back to the declarative store
//! - Retrying failed passes with capped exponential backoff
//!
//! ## Architecture
//!
//! ```text
//!  poll tick ──┐
//!  trigger  ───┼──► queue ──► JoinSet (≤ max_concurrent, one per name)
//!  retry    ───┘                    │
//!                                   ▼
//!                     ExternalConnector::connect
//!                                   │
//!                                   ▼
//!                   ExternalClient observe/create/update/delete
//!                                   │
//!         ┌─────────────────────────┼──────────────────────────┐
//!         ▼                         ▼                          ▼
//!  ┌──────────────┐        ┌─────────────────┐         ┌─────────────┐
//!  │ResourceStore │        │ConnectionPubl.  │         │   Events    │
//!  │(status)      │        │(details)        │         │  (notify)   │
//!  └──────────────┘        └─────────────────┘         └─────────────┘
//! ```
//!
//! ## Scheduling
//!
//! Passes for distinct resources run concurrently. A resource is never
//! reconciled by two passes at once: a trigger that arrives while its pass
//! is in flight marks it dirty and it is queued again when the pass ends.

pub mod backoff;

pub use backoff::retry_delay;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinSet};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::context::ReconcileContext;
use crate::error::{Error, Phase, Result};
use crate::resource::{Condition, DesiredState};
use crate::traits::{
    ConnectionDetails, ConnectionPublisher, Existence, ExistenceTracker, ExternalConnector,
    ResourceStore,
};

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Loop started
    Started { resources_count: usize },

    /// External resource created
    Created { name: String, external_id: String },

    /// Drift reconciled
    Updated { name: String, external_id: String },

    /// External resource deleted and the record released
    Deleted { name: String, external_id: String },

    /// Observed current, nothing to do
    UpToDate { name: String },

    /// Pass failed
    Failed {
        name: String,
        phase: Option<Phase>,
        error: String,
        retryable: bool,
    },

    /// Failed pass queued for another attempt
    RetryScheduled {
        name: String,
        attempt: u32,
        delay: Duration,
    },

    /// Loop stopped
    Stopped { reason: String },
}

/// What a successful pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Deleted,
    UpToDate,
    /// The record no longer exists in the store
    NotFound,
}

/// Reconciliation loop for managed resources
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::new()`]
/// 2. Start with [`Reconciler::run()`], or drive single passes with
///    [`Reconciler::reconcile()`]
/// 3. The loop runs until a shutdown signal is received, then cancels and
///    drains in-flight passes
///
/// ## Threading
///
/// Cheap to clone; every pass runs on its own task with a clone.
#[derive(Clone)]
pub struct Reconciler {
    resources: Arc<dyn ResourceStore>,
    connector: Arc<dyn ExternalConnector>,
    publisher: Option<Arc<dyn ConnectionPublisher>>,
    tracker: Option<Arc<dyn ExistenceTracker>>,
    config: ReconcilerConfig,
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields
    /// reconcile events
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        connector: Arc<dyn ExternalConnector>,
        config: ReconcilerConfig,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let reconciler = Self {
            resources,
            connector,
            publisher: None,
            tracker: None,
            config,
            event_tx: tx,
        };

        Ok((reconciler, rx))
    }

    /// Publish connection details to `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn ConnectionPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Flush `tracker` when the loop stops
    pub fn with_tracker(mut self, tracker: Arc<dyn ExistenceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Run one pass for `name` under the configured deadline
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome> {
        let ctx = ReconcileContext::background().child_with_timeout(self.config.reconcile_timeout());
        self.reconcile_with(&ctx, name).await
    }

    /// Run one pass for `name` under `ctx`
    ///
    /// # Returns
    ///
    /// - `Ok(ReconcileOutcome)`: What the pass did
    /// - `Err(Error)`: The pass failed; the failure is already recorded on
    ///   the resource status
    pub async fn reconcile_with(&self, ctx: &ReconcileContext, name: &str) -> Result<ReconcileOutcome> {
        let Some(mut desired) = self.resources.get(name).await? else {
            debug!("Resource {} no longer exists, skipping", name);
            return Ok(ReconcileOutcome::NotFound);
        };

        match self.drive(ctx, &mut desired).await {
            Ok((outcome, details)) => {
                self.settle(&mut desired, outcome, &details).await?;
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(&mut desired, &e).await;
                Err(e)
            }
        }
    }

    /// Connect, then branch on deletion intent and the observation
    async fn drive(
        &self,
        ctx: &ReconcileContext,
        desired: &mut DesiredState,
    ) -> Result<(ReconcileOutcome, ConnectionDetails)> {
        let client = self.connector.connect(ctx, desired).await?;

        if desired.deletion_intent {
            client.delete(ctx, desired).await?;
            return Ok((ReconcileOutcome::Deleted, ConnectionDetails::new()));
        }

        let observation = client.observe(ctx, desired).await?;
        match observation.existence {
            Existence::NotExists => {
                let creation = client.create(ctx, desired).await?;
                Ok((ReconcileOutcome::Created, creation.connection_details))
            }
            Existence::Drifted => {
                let update = client.update(ctx, desired).await?;
                Ok((ReconcileOutcome::Updated, update.connection_details))
            }
            Existence::Current => Ok((ReconcileOutcome::UpToDate, observation.connection_details)),
        }
    }

    /// Write back the result of a successful pass
    async fn settle(
        &self,
        desired: &mut DesiredState,
        outcome: ReconcileOutcome,
        details: &ConnectionDetails,
    ) -> Result<()> {
        let name = desired.name.clone();
        let external_id = desired.external_id().to_string();
        let secret = desired.spec.write_connection_secret_to_ref.clone();

        if outcome == ReconcileOutcome::Deleted {
            if let (Some(publisher), Some(secret)) = (&self.publisher, &secret) {
                publisher.unpublish(secret).await?;
            }
            self.resources.finalize(&name).await?;
            info!("Deleted {} ({})", name, external_id);
            self.emit_event(ReconcileEvent::Deleted { name, external_id });
            return Ok(());
        }

        desired.status.set_conditions([Condition::reconcile_success()]);
        self.resources.update_status(&name, &desired.status).await?;

        if let (Some(publisher), Some(secret)) = (&self.publisher, &secret) {
            if !details.is_empty() {
                publisher.publish(secret, details).await?;
            }
        }

        match outcome {
            ReconcileOutcome::Created => {
                info!("Created {} ({})", name, external_id);
                self.emit_event(ReconcileEvent::Created { name, external_id });
            }
            ReconcileOutcome::Updated => {
                info!("Updated {} ({})", name, external_id);
                self.emit_event(ReconcileEvent::Updated { name, external_id });
            }
            _ => {
                debug!("{} is up to date", name);
                self.emit_event(ReconcileEvent::UpToDate { name });
            }
        }
        Ok(())
    }

    /// Surface a failed pass on the status, the log and the event channel
    async fn record_failure(&self, desired: &mut DesiredState, err: &Error) {
        let phase = err.phase().map(|p| p.to_string()).unwrap_or_else(|| "store".to_string());
        if err.is_inconsistent() {
            error!("Reconcile of {} failed in {}: {}", desired.name, phase, err);
        } else {
            warn!("Reconcile of {} failed in {}: {}", desired.name, phase, err);
        }

        desired.status.set_conditions([Condition::reconcile_error(err)]);
        if let Err(e) = self.resources.update_status(&desired.name, &desired.status).await {
            warn!("Failed to record status of {}: {}", desired.name, e);
        }

        self.emit_event(ReconcileEvent::Failed {
            name: desired.name.clone(),
            phase: err.phase(),
            error: err.to_string(),
            retryable: err.is_retryable(),
        });
    }

    /// Run the loop until SIGINT/SIGTERM
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None, None).await
    }

    /// Run the loop, also reconciling every name received on `triggers`
    pub async fn run_with_triggers(&self, triggers: mpsc::Receiver<String>) -> Result<()> {
        self.run_internal(Some(triggers), None).await
    }

    /// Run the loop until `shutdown_rx` resolves
    ///
    /// With `shutdown_rx` set to `None` this behaves like `run()`. Daemons
    /// that handle more than SIGINT wire their own signals through here.
    pub async fn run_with_shutdown(
        &self,
        triggers: Option<mpsc::Receiver<String>>,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(triggers, shutdown_rx).await
    }

    async fn run_internal(
        &self,
        mut triggers: Option<mpsc::Receiver<String>>,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        let initial = self.resources.list().await?;
        self.emit_event(ReconcileEvent::Started {
            resources_count: initial.len(),
        });
        info!(
            "Reconciler started: {} resources, poll every {:?}",
            initial.len(),
            self.config.poll_interval()
        );

        let shutdown = async move {
            match shutdown_rx {
                // A dropped sender counts as a shutdown request
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let root = CancellationToken::new();
        let mut state = LoopState::default();
        let mut passes: JoinSet<(String, Result<ReconcileOutcome>)> = JoinSet::new();

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.dispatch(&mut state, &mut passes, &root);

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(joined) = passes.join_next_with_id(), if !passes.is_empty() => {
                    match joined {
                        Ok((id, (name, result))) => {
                            state.tasks.remove(&id);
                            self.complete(&mut state, name, result);
                        }
                        Err(e) => self.abort_pass(&mut state, e),
                    }
                }

                Some(expired) = state.retries.next(), if !state.retries.is_empty() => {
                    let name = expired.into_inner();
                    state.retry_keys.remove(&name);
                    debug!("Retrying {}", name);
                    state.enqueue(name);
                }

                trigger = next_trigger(&mut triggers), if triggers.is_some() => {
                    match trigger {
                        Some(name) => state.enqueue(name),
                        None => {
                            debug!("Trigger channel closed");
                            triggers = None;
                        }
                    }
                }

                _ = ticker.tick() => {
                    match self.resources.list().await {
                        Ok(names) => {
                            for name in names {
                                state.enqueue(name);
                            }
                        }
                        Err(e) => warn!("Failed to list resources: {}", e),
                    }
                }
            }
        }

        // Abandon in-flight passes and wait for them to unwind
        root.cancel();
        while let Some(joined) = passes.join_next().await {
            match joined {
                Ok((name, Err(e))) => debug!("Pass for {} ended during shutdown: {}", name, e),
                Ok(_) => {}
                Err(e) => error!("Reconcile task failed during shutdown: {}", e),
            }
        }

        self.emit_event(ReconcileEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });

        if let Some(tracker) = &self.tracker {
            tracker.flush().await?;
            info!("Tracker flushed, reconciler stopped");
        } else {
            info!("Reconciler stopped");
        }

        Ok(())
    }

    /// Start queued passes up to the concurrency limit
    fn dispatch(
        &self,
        state: &mut LoopState,
        passes: &mut JoinSet<(String, Result<ReconcileOutcome>)>,
        root: &CancellationToken,
    ) {
        while passes.len() < self.config.max_concurrent_reconciles {
            let Some(name) = state.queue.pop_front() else {
                break;
            };
            state.queued.remove(&name);

            if state.in_flight.contains(&name) {
                state.dirty.insert(name);
                continue;
            }
            state.in_flight.insert(name.clone());

            let ctx = ReconcileContext::with_token(root.child_token())
                .child_with_timeout(self.config.reconcile_timeout());
            let this = self.clone();
            let task_name = name.clone();
            let handle = passes.spawn(async move {
                let result = this.reconcile_with(&ctx, &task_name).await;
                (task_name, result)
            });
            state.tasks.insert(handle.id(), name);
        }
    }

    /// Book-keep a pass whose task panicked or was aborted
    fn abort_pass(&self, state: &mut LoopState, err: JoinError) {
        let Some(name) = state.tasks.remove(&err.id()) else {
            error!("Reconcile task failed: {}", err);
            return;
        };
        error!("Reconcile task for {} failed: {}", name, err);
        self.emit_event(ReconcileEvent::Failed {
            name: name.clone(),
            phase: None,
            error: err.to_string(),
            retryable: true,
        });
        self.complete(state, name, Err(Error::Other(format!("reconcile task failed: {err}"))));
    }

    /// Book-keep a finished pass
    fn complete(&self, state: &mut LoopState, name: String, result: Result<ReconcileOutcome>) {
        state.in_flight.remove(&name);

        match result {
            Ok(_) => {
                state.attempts.remove(&name);
                if let Some(key) = state.retry_keys.remove(&name) {
                    state.retries.remove(&key);
                }
            }
            Err(e) if e.is_retryable() => {
                let attempt = state.attempts.entry(name.clone()).or_insert(0);
                *attempt = attempt.saturating_add(1);
                let attempt = *attempt;
                let delay = retry_delay(
                    attempt,
                    self.config.retry_base_delay(),
                    self.config.retry_max_delay(),
                );

                match state.retry_keys.get(&name) {
                    Some(key) => state.retries.reset(key, delay),
                    None => {
                        let key = state.retries.insert(name.clone(), delay);
                        state.retry_keys.insert(name.clone(), key);
                    }
                }
                debug!("Retry {} of {} in {:?}", attempt, name, delay);
                self.emit_event(ReconcileEvent::RetryScheduled {
                    name: name.clone(),
                    attempt,
                    delay,
                });
            }
            Err(_) => {
                // Needs an operator; the next poll tick revisits it
                state.attempts.remove(&name);
            }
        }

        if state.dirty.remove(&name) {
            state.enqueue(name);
        }
    }

    /// Emit a reconcile event
    fn emit_event(&self, event: ReconcileEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Scheduling bookkeeping of one `run` invocation
#[derive(Default)]
struct LoopState {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    /// Running task to the name it reconciles
    tasks: HashMap<task::Id, String>,
    dirty: HashSet<String>,
    attempts: HashMap<String, u32>,
    retries: DelayQueue<String>,
    retry_keys: HashMap<String, delay_queue::Key>,
}

impl LoopState {
    fn enqueue(&mut self, name: String) {
        if self.in_flight.contains(&name) {
            self.dirty.insert(name);
        } else if self.queued.insert(name.clone()) {
            self.queue.push_back(name);
        }
    }
}

async fn next_trigger(triggers: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match triggers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
