//! # Sync Engine
//!
//! Drains the durable operation queue into the authoritative store, one
//! operation at a time, in queue order.
//!
//! ## Per-Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  next pending op (FIFO by seq)                                          │
//! │     │                                                                   │
//! │     ├── entity held (conflict / rejected op)? ──► skip, stays queued    │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  effective base = rebase map lookup(base_version) or base_version       │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  fetch remote record                                                    │
//! │     │                                                                   │
//! │     ├── last_operation_id == op.id ──► already landed, confirm          │
//! │     ├── absent + create            ──► apply                            │
//! │     ├── absent + delete            ──► nothing to do, confirm           │
//! │     ├── absent + update            ──► conflict (server: none)          │
//! │     ├── version == base            ──► apply                            │
//! │     └── otherwise                  ──► conflict, hold the entity        │
//! │                                                                         │
//! │  apply:  ok        → cache, rebase map, dequeue                         │
//! │          rejected  → mark rejected, hold the entity                     │
//! │          transport → record attempt, stop the drain (Interrupted)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is dequeued without a confirmed remote apply. Independent entities
//! keep draining past a held one.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use rxpos_core::{
    Mutation, OperationKind, QueuedOperation, RemoteRecord, Resource, SalePosting, SyncConflict,
};
use rxpos_db::Database;

use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;

/// Default page size when walking the queue.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

// =============================================================================
// Outcomes
// =============================================================================

/// What happened to one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Confirmed by the authoritative store. `record` is `None` when a
    /// delete found nothing left to delete.
    Applied { record: Option<RemoteRecord> },
    /// Still in the queue (offline, interrupted, or behind a held entity).
    Queued,
    /// Stale against the remote; waiting for an operator decision.
    Conflicted,
    /// Refused by the remote for a business reason; kept for review.
    Rejected { reason: String },
}

impl OperationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, OperationOutcome::Applied { .. })
    }
}

/// One line of a drain report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainedOperation {
    pub operation_id: String,
    pub resource: Resource,
    pub entity_id: String,
    pub outcome: OperationOutcome,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    pub applied: usize,
    pub conflicts: usize,
    pub rejected: usize,
    /// Operations skipped because their entity is held.
    pub held: usize,
    /// The pass stopped early on a transport failure or lost connectivity.
    pub interrupted: bool,
    /// Another drain was already running; this trigger did nothing.
    pub skipped: bool,
    pub outcomes: Vec<DrainedOperation>,
}

impl DrainReport {
    fn skipped() -> Self {
        DrainReport {
            skipped: true,
            ..Default::default()
        }
    }

    /// Outcome for one operation, if this pass reached it.
    pub fn outcome_for(&self, operation_id: &str) -> Option<&OperationOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.operation_id == operation_id)
            .map(|o| &o.outcome)
    }

    fn push(&mut self, op: &QueuedOperation, outcome: OperationOutcome) {
        match &outcome {
            OperationOutcome::Applied { .. } => self.applied += 1,
            OperationOutcome::Conflicted => self.conflicts += 1,
            OperationOutcome::Rejected { .. } => self.rejected += 1,
            OperationOutcome::Queued => {}
        }
        self.outcomes.push(DrainedOperation {
            operation_id: op.id.clone(),
            resource: op.resource(),
            entity_id: op.entity_id.clone(),
            outcome,
        });
    }
}

enum Delivery {
    Applied(Option<RemoteRecord>),
    Conflict(SyncConflict),
}

/// Clears the running flag when the drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

pub struct SyncEngine {
    local: Database,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    batch_size: u32,
    draining: AtomicBool,
}

impl SyncEngine {
    pub fn new(local: Database, remote: Arc<dyn RemoteStore>, connectivity: Connectivity) -> Self {
        SyncEngine {
            local,
            remote,
            connectivity,
            batch_size: DEFAULT_BATCH_SIZE,
            draining: AtomicBool::new(false),
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn database(&self) -> &Database {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Runs one drain pass over every pending operation.
    ///
    /// Returns immediately with `skipped = true` if a drain is already in
    /// progress. Local store failures are returned as errors; everything the
    /// remote does is reported per operation.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already running, ignoring trigger");
            return Ok(DrainReport::skipped());
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        if !self.connectivity.is_online() {
            debug!("Offline, drain deferred");
            report.interrupted = true;
            return Ok(report);
        }

        let mut held = self.held_entities().await?;
        let mut cursor = 0;

        'drain: loop {
            let batch = self.local.queue().pending_after(cursor, self.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                let op = entry.operation;
                cursor = op.seq;
                let key = (op.resource(), op.entity_id.clone());

                if held.contains(&key) {
                    debug!(op_id = %op.id, entity_id = %op.entity_id, "Entity held, skipping");
                    report.held += 1;
                    report.push(&op, OperationOutcome::Queued);
                    continue;
                }

                if !self.connectivity.is_online() {
                    info!(op_id = %op.id, "Connectivity lost, abandoning drain");
                    report.interrupted = true;
                    break 'drain;
                }

                match self.deliver(&op).await {
                    Ok(Delivery::Applied(record)) => {
                        self.confirm(&op, record.as_ref()).await?;
                        report.push(&op, OperationOutcome::Applied { record });
                    }
                    Ok(Delivery::Conflict(conflict)) => {
                        self.local.conflicts().upsert(&conflict).await?;
                        held.insert(key);
                        report.push(&op, OperationOutcome::Conflicted);
                    }
                    Err(SyncError::Rejected(reason)) => {
                        warn!(op_id = %op.id, entity_id = %op.entity_id, reason = %reason, "Operation rejected");
                        self.local.queue().mark_rejected(&op.id, &reason).await?;
                        held.insert(key);
                        report.push(&op, OperationOutcome::Rejected { reason });
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(op_id = %op.id, error = %e, "Transport failure, drain interrupted");
                        self.local.queue().record_attempt(&op.id, &e.to_string()).await?;
                        report.interrupted = true;
                        report.push(&op, OperationOutcome::Queued);
                        break 'drain;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            applied = report.applied,
            conflicts = report.conflicts,
            rejected = report.rejected,
            held = report.held,
            interrupted = report.interrupted,
            "Drain finished"
        );
        Ok(report)
    }

    /// Entities with an outstanding conflict or a rejected operation.
    async fn held_entities(&self) -> SyncResult<HashSet<(Resource, String)>> {
        let mut held: HashSet<(Resource, String)> = self
            .local
            .conflicts()
            .list()
            .await?
            .into_iter()
            .map(|c| (c.resource, c.entity_id))
            .collect();
        for entry in self.local.queue().rejected().await? {
            held.insert((entry.operation.resource(), entry.operation.entity_id));
        }
        Ok(held)
    }

    /// Freshness check, then apply.
    async fn deliver(&self, op: &QueuedOperation) -> SyncResult<Delivery> {
        let resource = op.resource();
        let base = self
            .local
            .rebase()
            .lookup(resource, &op.entity_id, op.base_version)
            .await?
            .unwrap_or(op.base_version);

        let current = self.remote.fetch(resource, &op.entity_id).await?;

        if let Some(remote) = &current {
            if remote.last_operation_id.as_deref() == Some(op.id.as_str()) {
                debug!(op_id = %op.id, "Operation already landed, confirming");
                return Ok(Delivery::Applied(current));
            }
        }

        let expected = match (op.kind(), &current) {
            (OperationKind::Create, None) => 0,
            (OperationKind::Delete, None) => return Ok(Delivery::Applied(None)),
            (OperationKind::Update, None) => {
                return Ok(Delivery::Conflict(SyncConflict::new(op.clone(), None)))
            }
            (OperationKind::Update | OperationKind::Delete, Some(remote)) if remote.version == base => base,
            (_, Some(_)) => {
                return Ok(Delivery::Conflict(SyncConflict::new(op.clone(), current.clone())))
            }
        };

        match self.remote.apply(op, expected).await {
            Ok(record) => Ok(Delivery::Applied(Some(record))),
            Err(e) if e.is_stale() => {
                // Lost a race between fetch and apply
                let fresh = self.remote.fetch(resource, &op.entity_id).await?;
                Ok(Delivery::Conflict(SyncConflict::new(op.clone(), fresh)))
            }
            Err(e) => Err(e),
        }
    }

    /// Local bookkeeping after a confirmed apply.
    async fn confirm(&self, op: &QueuedOperation, record: Option<&RemoteRecord>) -> SyncResult<()> {
        let resource = op.resource();

        match record {
            Some(r) if op.kind() != OperationKind::Delete => self.local.cache().put(r).await?,
            _ => self.local.cache().remove(resource, &op.entity_id).await?,
        }

        if let Some(r) = record {
            self.local
                .rebase()
                .record(resource, &op.entity_id, op.base_version, r.version)
                .await?;
        }

        self.local.queue().dequeue(&op.id).await?;

        if self
            .local
            .queue()
            .pending_for(resource, &op.entity_id)
            .await?
            .is_empty()
        {
            self.local.rebase().clear(resource, &op.entity_id).await?;
        }

        if let Mutation::PostSale(posting) = &op.mutation {
            if let Err(e) = self.refresh_after_sale(posting).await {
                warn!(op_id = %op.id, error = %e, "Could not refresh stock after sale");
            }
        }

        info!(
            op_id = %op.id,
            resource = %resource,
            entity_id = %op.entity_id,
            version = record.map(|r| r.version),
            "Operation confirmed"
        );
        Ok(())
    }

    /// A sale moves stock and shift totals; pull those records into the cache.
    async fn refresh_after_sale(&self, posting: &SalePosting) -> SyncResult<()> {
        let products: HashSet<&str> = posting.items.iter().map(|l| l.product_id.as_str()).collect();
        for product_id in products {
            self.refresh(Resource::Inventory, product_id).await?;
        }
        if let Some(shift_id) = &posting.shift_id {
            self.refresh(Resource::Shifts, shift_id).await?;
        }
        Ok(())
    }

    /// Overwrites the cached copy of one entity with the remote state.
    pub async fn refresh(&self, resource: Resource, entity_id: &str) -> SyncResult<Option<RemoteRecord>> {
        let current = self.remote.fetch(resource, entity_id).await?;
        match &current {
            Some(record) => self.local.cache().put(record).await?,
            None => self.local.cache().remove(resource, entity_id).await?,
        }
        Ok(current)
    }
}
