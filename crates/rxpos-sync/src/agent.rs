//! # Sync Agent
//!
//! Background task that decides WHEN to drain. The engine decides how.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │   triggers                          ┌──────────────────────────────┐    │
//! │   ────────                          │         agent loop           │    │
//! │   Connectivity offline → online ──► │                              │    │
//! │   poll interval tick ─────────────► │  tokio::select! ──► drain()  │    │
//! │   SyncAgentHandle::trigger() ─────► │                              │    │
//! │   backoff retry deadline ─────────► │                              │    │
//! │   SyncAgentHandle::shutdown() ────► │  (break)                     │    │
//! │                                     └──────────────┬───────────────┘    │
//! │                                                    │                    │
//! │                                                    ▼                    │
//! │                                     SyncStatus + SyncEventEmitter       │
//! │                                                                         │
//! │  EVENTS (to the host UI):                                               │
//! │  ────────────────────────                                               │
//! │  status   - counts, online, last sync, last error                       │
//! │  progress - { applied, pending }                                        │
//! │  conflict - { resource, entity_id } needs an operator                   │
//! │  error    - { message, retryable }                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A drain interrupted by transport failures while the connectivity signal
//! says online is retried with exponential backoff. Once failures have
//! persisted past `transport_alert_after_secs`, one alert is emitted until
//! the next successful drain.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use rxpos_core::Resource;

use crate::config::{SyncConfig, SyncMode};
use crate::engine::{DrainReport, OperationOutcome, SyncEngine};
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub mode: SyncMode,

    /// Connectivity signal as last observed.
    pub online: bool,

    /// A drain pass is running.
    pub draining: bool,

    pub pending_count: i64,
    pub conflict_count: i64,
    pub rejected_count: i64,

    /// End of the last drain that was not interrupted.
    pub last_sync: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    /// First transport failure of the current failing streak.
    pub transport_failing_since: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            mode: SyncMode::Auto,
            online: false,
            draining: false,
            pending_count: 0,
            conflict_count: 0,
            rejected_count: 0,
            last_sync: None,
            last_error: None,
            transport_failing_since: None,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for emitting sync events to the host application.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits drain progress.
    fn emit_progress(&self, applied: usize, pending: i64);

    /// Emits a newly detected conflict.
    fn emit_conflict(&self, resource: Resource, entity_id: &str);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _applied: usize, _pending: i64) {}
    fn emit_conflict(&self, _resource: Resource, _entity_id: &str) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Owns the background drain task.
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    engine: Arc<SyncEngine>,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    handle: Option<SyncAgentHandle>,
    task: Option<JoinHandle<()>>,
}

impl SyncAgent {
    pub fn new(config: SyncConfig, engine: Arc<SyncEngine>) -> Self {
        Self::with_emitter(config, engine, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        config: SyncConfig,
        engine: Arc<SyncEngine>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let status = SyncStatus {
            mode: config.sync.mode,
            online: engine.connectivity().is_online(),
            ..Default::default()
        };

        SyncAgent {
            config: Arc::new(config),
            engine,
            status: Arc::new(RwLock::new(status)),
            emitter,
            handle: None,
            task: None,
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Spawns the background loop and returns a handle to it.
    ///
    /// In offline mode the loop only keeps the status counts current.
    pub async fn start(&mut self) -> SyncResult<SyncAgentHandle> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }
        self.config.validate()?;

        if !self.config.is_sync_enabled() {
            info!("Sync is disabled (mode: offline), operations will only be queued");
        }

        info!(
            device_id = %self.config.device_id(),
            mode = %self.config.mode(),
            poll_interval_secs = self.config.sync.poll_interval_secs,
            "Starting sync agent"
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let worker = Worker {
            config: self.config.clone(),
            engine: self.engine.clone(),
            status: self.status.clone(),
            emitter: self.emitter.clone(),
            connectivity_rx: self.engine.connectivity().subscribe(),
            backoff: create_backoff(&self.config),
            retry_at: None,
            alert_sent: false,
        };
        self.task = Some(tokio::spawn(worker.run(shutdown_rx, trigger_rx)));

        let handle = SyncAgentHandle::new(shutdown_tx, trigger_tx, self.status.clone());
        self.handle = Some(handle.clone());

        info!("Sync agent started");
        Ok(handle)
    }

    /// Stops the loop and waits for an in-flight drain to finish.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync agent");

        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SyncError::Internal(format!("sync agent task failed: {}", e)))?;
        }

        info!("Sync agent stopped");
        Ok(())
    }
}

/// Creates the retry backoff for interrupted drains.
fn create_backoff(config: &SyncConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(config.sync.initial_backoff_ms),
        max_interval: Duration::from_secs(config.sync.max_backoff_secs),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

// =============================================================================
// Worker Loop
// =============================================================================

struct Worker {
    config: Arc<SyncConfig>,
    engine: Arc<SyncEngine>,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    connectivity_rx: watch::Receiver<bool>,
    backoff: ExponentialBackoff,
    retry_at: Option<Instant>,
    alert_sent: bool,
}

impl Worker {
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>, mut trigger_rx: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_deadline = self.retry_at.unwrap_or_else(Instant::now);

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Sync agent loop received shutdown");
                    break;
                }

                Some(()) = trigger_rx.recv() => {
                    self.cycle("manual").await;
                }

                changed = self.connectivity_rx.changed() => {
                    if changed.is_err() {
                        warn!("Connectivity signal dropped, stopping sync agent loop");
                        break;
                    }
                    let online = *self.connectivity_rx.borrow_and_update();
                    self.status.write().await.online = online;
                    if online {
                        self.backoff.reset();
                        self.retry_at = None;
                        self.cycle("reconnected").await;
                    } else {
                        self.publish_status().await;
                    }
                }

                _ = tokio::time::sleep_until(retry_deadline), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    self.cycle("retry").await;
                }

                _ = interval.tick() => {
                    self.cycle("timer").await;
                }
            }
        }

        self.status.write().await.draining = false;
        info!("Sync agent loop stopped");
    }

    /// One drain attempt plus status bookkeeping.
    async fn cycle(&mut self, trigger: &'static str) {
        if !self.config.is_sync_enabled() || !self.engine.connectivity().is_online() {
            debug!(trigger, "Skipping drain");
            self.publish_status().await;
            return;
        }

        debug!(trigger, "Drain triggered");
        self.status.write().await.draining = true;

        match self.engine.drain().await {
            Ok(report) => self.handle_report(&report).await,
            Err(e) => {
                error!(error = %e, "Drain failed");
                self.status.write().await.last_error = Some(e.to_string());
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }

        self.publish_status().await;
    }

    async fn handle_report(&mut self, report: &DrainReport) {
        if report.skipped {
            return;
        }

        for drained in &report.outcomes {
            match &drained.outcome {
                OperationOutcome::Conflicted => {
                    self.emitter.emit_conflict(drained.resource, &drained.entity_id);
                }
                OperationOutcome::Rejected { reason } => {
                    self.emitter.emit_error(reason, false);
                }
                _ => {}
            }
        }

        let now = Utc::now();
        if report.interrupted && self.engine.connectivity().is_online() {
            self.on_transport_failure(now).await;
        } else if !report.interrupted {
            let mut status = self.status.write().await;
            status.last_sync = Some(now);
            status.transport_failing_since = None;
            status.last_error = None;
            self.alert_sent = false;
            self.backoff.reset();
            self.retry_at = None;
        }

        let pending = self.pending_or_last_known().await;
        self.emitter.emit_progress(report.applied, pending);
    }

    /// Pending count from the queue; the last published count if the read fails.
    async fn pending_or_last_known(&self) -> i64 {
        match self.engine.database().queue().count_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not count pending operations");
                self.status.read().await.pending_count
            }
        }
    }

    async fn on_transport_failure(&mut self, now: DateTime<Utc>) {
        let since = {
            let mut status = self.status.write().await;
            *status.transport_failing_since.get_or_insert(now)
        };

        let failing_for = (now - since).to_std().unwrap_or_default();
        if !self.alert_sent && failing_for >= self.config.transport_alert_after() {
            let message = format!(
                "Remote store unreachable for {} seconds, operations are queued locally",
                failing_for.as_secs()
            );
            warn!(failing_since = %since, "{}", message);
            self.status.write().await.last_error = Some(message.clone());
            self.emitter.emit_error(&message, true);
            self.alert_sent = true;
        }

        if let Some(delay) = self.backoff.next_backoff() {
            debug!(?delay, "Scheduling drain retry");
            self.retry_at = Some(Instant::now() + delay);
        }
    }

    /// Refreshes counts from the local store and emits the status.
    async fn publish_status(&self) {
        let local = self.engine.database();
        let counts = async {
            Ok::<_, SyncError>((
                local.queue().count_pending().await?,
                local.conflicts().count().await?,
                local.queue().count_rejected().await?,
            ))
        }
        .await;

        let snapshot = {
            let mut status = self.status.write().await;
            status.online = self.engine.connectivity().is_online();
            status.draining = self.engine.is_draining();
            match counts {
                Ok((pending, conflicts, rejected)) => {
                    status.pending_count = pending;
                    status.conflict_count = conflicts;
                    status.rejected_count = rejected;
                }
                Err(e) => warn!(error = %e, "Failed to read queue counts"),
            }
            status.clone()
        };
        self.emitter.emit_status(&snapshot);
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running SyncAgent from outside.
#[derive(Clone)]
pub struct SyncAgentHandle {
    shutdown_tx: mpsc::Sender<()>,
    trigger_tx: mpsc::Sender<()>,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncAgentHandle {
    pub(crate) fn new(
        shutdown_tx: mpsc::Sender<()>,
        trigger_tx: mpsc::Sender<()>,
        status: Arc<RwLock<SyncStatus>>,
    ) -> Self {
        SyncAgentHandle {
            shutdown_tx,
            trigger_tx,
            status,
        }
    }

    /// Gets the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Requests a drain. Coalesces with a request that is already waiting.
    pub fn trigger(&self) -> SyncResult<()> {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::ShuttingDown),
        }
    }

    /// Signals the agent to shut down gracefully.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncAgent with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    engine: Option<Arc<SyncEngine>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            engine: None,
            emitter: None,
        }
    }

    pub fn with_engine(mut self, engine: Arc<SyncEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> SyncResult<SyncAgent> {
        let engine = self
            .engine
            .ok_or_else(|| SyncError::InvalidConfig("Sync engine required".into()))?;

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::with_emitter(self.config, engine, emitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::remote::{RemoteStore, StoreRemote};
    use async_trait::async_trait;
    use rxpos_core::{InventoryRecord, Money, Mutation, QueuedOperation, RemoteRecord};
    use rxpos_db::{Database, DbConfig};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        errors: Mutex<Vec<(String, bool)>>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, _status: &SyncStatus) {}
        fn emit_progress(&self, _applied: usize, _pending: i64) {}
        fn emit_conflict(&self, _resource: Resource, _entity_id: &str) {}
        fn emit_error(&self, message: &str, retryable: bool) {
            self.errors.lock().unwrap().push((message.to_string(), retryable));
        }
    }

    /// Remote that never answers.
    struct DownRemote;

    #[async_trait]
    impl RemoteStore for DownRemote {
        async fn fetch(&self, _: Resource, _: &str) -> SyncResult<Option<RemoteRecord>> {
            Err(SyncError::Transport("connection refused".into()))
        }

        async fn apply(&self, _: &QueuedOperation, _: i64) -> SyncResult<RemoteRecord> {
            Err(SyncError::Transport("connection refused".into()))
        }
    }

    fn record() -> InventoryRecord {
        InventoryRecord {
            name: "Cetirizine 10mg".into(),
            sku: "CET-10".into(),
            quantity: 60,
            reorder_level: 10,
            cost_price: Money::from_minor(15),
            sell_price: Money::from_minor(35),
            batch_number: None,
            expiry_date: None,
        }
    }

    fn config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.sync.poll_interval_secs = 3600;
        config.sync.initial_backoff_ms = 10;
        config
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert!(!status.online);
        assert_eq!(status.pending_count, 0);
        assert!(status.transport_failing_since.is_none());
    }

    #[tokio::test]
    async fn test_drains_when_connectivity_returns() {
        let local = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote_db = Database::new(DbConfig::in_memory()).await.unwrap();
        let link = Connectivity::offline();
        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            Arc::new(StoreRemote::new(remote_db.clone())),
            link.clone(),
        ));

        local
            .queue()
            .enqueue(&QueuedOperation::new("cet", Mutation::CreateInventory(record()), 0))
            .await
            .unwrap();

        let mut agent = SyncAgent::new(config(), engine);
        let handle = agent.start().await.unwrap();

        link.set_online(true);
        wait_for(|| async { remote_db.inventory().get_by_id("cet").await.unwrap().is_some() }).await;
        wait_for(|| async { handle.status().await.last_sync.is_some() }).await;

        agent.shutdown().await.unwrap();
        assert!(handle.trigger().is_err());
    }

    #[tokio::test]
    async fn test_manual_trigger_updates_counts() {
        let local = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote_db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            Arc::new(StoreRemote::new(remote_db)),
            Connectivity::online(),
        ));

        let mut agent = SyncAgent::new(config(), engine);
        let handle = agent.start().await.unwrap();

        local
            .queue()
            .enqueue(&QueuedOperation::new("cet", Mutation::CreateInventory(record()), 0))
            .await
            .unwrap();
        handle.trigger().unwrap();

        wait_for(|| async {
            let status = handle.status().await;
            status.pending_count == 0 && status.last_sync.is_some()
        })
        .await;
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_queue_keeps_last_pending_count() {
        let local = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote_db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            Arc::new(StoreRemote::new(remote_db)),
            Connectivity::online(),
        ));
        let agent = SyncAgent::new(config(), engine);
        agent.status.write().await.pending_count = 3;

        local.close().await;
        assert_eq!(agent.pending_or_last_known().await, 3);
    }

    #[tokio::test]
    async fn test_persistent_transport_failure_raises_one_alert() {
        let local = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            Arc::new(DownRemote),
            Connectivity::online(),
        ));
        local
            .queue()
            .enqueue(&QueuedOperation::new("cet", Mutation::CreateInventory(record()), 0))
            .await
            .unwrap();

        let mut cfg = config();
        cfg.sync.transport_alert_after_secs = 0;
        let emitter = Arc::new(RecordingEmitter::default());
        let mut agent = SyncAgentBuilder::new(cfg)
            .with_engine(engine)
            .with_emitter(emitter.clone())
            .build()
            .unwrap();
        let handle = agent.start().await.unwrap();
        handle.trigger().unwrap();

        wait_for(|| async { !emitter.errors.lock().unwrap().is_empty() }).await;
        // Let a few backoff retries run
        tokio::time::sleep(Duration::from_millis(100)).await;
        agent.shutdown().await.unwrap();

        let errors = emitter.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1);

        let status = handle.status().await;
        assert!(status.transport_failing_since.is_some());
        assert_eq!(status.pending_count, 1);
        assert_eq!(local.queue().count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_builder_requires_engine() {
        assert!(SyncAgentBuilder::new(SyncConfig::default()).build().is_err());
    }
}
