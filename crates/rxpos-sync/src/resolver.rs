//! # Conflict Resolver
//!
//! Surfaces stale-version conflicts to an authorized operator and applies
//! their decision.
//!
//! ## Resolution Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LOCAL   fetch fresh remote → rebase the queued op onto it → reapply    │
//! │          (last writer wins for the whole record)                        │
//! │                                                                         │
//! │  SERVER  discard the queued op → cache := server record                 │
//! │          later ops keep their base; a stale one conflicts again         │
//! │                                                                         │
//! │  MERGE   inventory only: server values, except the fields the operator  │
//! │          keeps local → replace the queued op → reapply                  │
//! │                                                                         │
//! │  then:   conflict removed → later ops for the entity resume draining    │
//! │          against the resolved state                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only elevated roles resolve. A refused or failed resolution leaves the
//! conflict exactly as it was.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use rxpos_core::conflict::{conflict_diffs, merge_inventory};
use rxpos_core::{
    AccessPolicy, Action, Actor, FieldDiff, InventoryField, Money, Mutation, QueueEntry,
    QueuedOperation, RemoteRecord, Resolution, Resource, RolePolicy, SyncConflict,
    ValidationError, DEFAULT_REFUND_TOLERANCE,
};

use crate::engine::{DrainReport, SyncEngine};
use crate::error::{SyncError, SyncResult};

/// Result of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub resource: Resource,
    pub entity_id: String,
    pub operation_id: String,
    pub resolution: Resolution,
    /// The drain that ran right after the conflict was cleared.
    pub drain: DrainReport,
}

pub struct ConflictResolver {
    engine: Arc<SyncEngine>,
    policy: Arc<dyn AccessPolicy>,
    refund_tolerance: Money,
}

impl ConflictResolver {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        ConflictResolver {
            engine,
            policy: Arc::new(RolePolicy),
            refund_tolerance: DEFAULT_REFUND_TOLERANCE,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_refund_tolerance(mut self, tolerance: Money) -> Self {
        self.refund_tolerance = tolerance;
        self
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every outstanding conflict, oldest first.
    pub async fn list_conflicts(&self, actor: &Actor) -> SyncResult<Vec<SyncConflict>> {
        self.policy.ensure(actor, Action::ResolveConflict)?;
        Ok(self.engine.database().conflicts().list().await?)
    }

    pub async fn get_conflict(
        &self,
        actor: &Actor,
        resource: Resource,
        entity_id: &str,
    ) -> SyncResult<SyncConflict> {
        self.policy.ensure(actor, Action::ResolveConflict)?;
        self.load(resource, entity_id).await
    }

    /// Field-level local vs. server differences for display.
    pub fn field_diffs(&self, conflict: &SyncConflict) -> SyncResult<Vec<FieldDiff>> {
        Ok(conflict_diffs(conflict, self.refund_tolerance)?)
    }

    /// Operations the remote refused, waiting for review.
    pub async fn rejected_operations(&self, actor: &Actor) -> SyncResult<Vec<QueueEntry>> {
        self.policy.ensure(actor, Action::RequeueOperation)?;
        Ok(self.engine.database().queue().rejected().await?)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Applies the operator's decision and resumes draining.
    pub async fn resolve(
        &self,
        actor: &Actor,
        resource: Resource,
        entity_id: &str,
        resolution: Resolution,
    ) -> SyncResult<ResolutionReport> {
        self.policy.ensure(actor, Action::ResolveConflict)?;
        let conflict = self.load(resource, entity_id).await?;
        let op = &conflict.operation;
        let local = self.engine.database();

        info!(
            resource = %resource,
            entity_id = %entity_id,
            op_id = %op.id,
            resolution = resolution.label(),
            user_id = %actor.user_id,
            "Resolving sync conflict"
        );

        match &resolution {
            Resolution::Server => {
                let server = match self.engine.refresh(resource, entity_id).await {
                    Ok(fresh) => fresh,
                    Err(e) if e.is_retryable() => {
                        // Offline: fall back to the copy captured at detection
                        warn!(error = %e, "Remote unreachable, using server copy from the conflict");
                        match &conflict.server_version {
                            Some(record) => local.cache().put(record).await?,
                            None => local.cache().remove(resource, entity_id).await?,
                        }
                        conflict.server_version.clone()
                    }
                    Err(e) => return Err(e),
                };
                local.queue().discard(&op.id).await?;
                // No rebase entry: follow-ups were written against the state
                // the operator just threw away.
                debug!(
                    op_id = %op.id,
                    server_version = server.as_ref().map(|r| r.version),
                    "Queued operation discarded in favour of the server"
                );
            }
            Resolution::Local => {
                let fresh = self.engine.remote().fetch(resource, entity_id).await?;
                match keep_local(op, fresh.as_ref())? {
                    Some(replacement) => {
                        local.queue().replace(&op.id, &replacement).await?;
                    }
                    None => {
                        local.queue().discard(&op.id).await?;
                    }
                }
                self.rebase_onto(op, fresh.as_ref()).await?;
            }
            Resolution::Merge { keep_local } => {
                if resource != Resource::Inventory {
                    return Err(ValidationError::invalid_format(
                        "resolution",
                        format!("merge is only available for inventory, not {}", resource),
                    )
                    .into());
                }
                InventoryField::parse_all(keep_local)?;

                let fresh = self
                    .engine
                    .remote()
                    .fetch(resource, entity_id)
                    .await?
                    .ok_or_else(|| {
                        ValidationError::invalid_format(
                            "resolution",
                            "the server record no longer exists, keep local or server instead",
                        )
                    })?;
                let merged = merge_inventory(&op.mutation, &fresh, keep_local)?;
                local
                    .queue()
                    .replace(&op.id, &op.rebased(merged, fresh.version))
                    .await?;
                self.rebase_onto(op, Some(&fresh)).await?;
            }
        }

        local.conflicts().remove(resource, entity_id).await?;
        let drain = self.engine.drain().await?;

        Ok(ResolutionReport {
            resource,
            entity_id: entity_id.to_string(),
            operation_id: op.id.clone(),
            resolution,
            drain,
        })
    }

    /// Puts a rejected operation back in line and drains.
    pub async fn requeue_rejected(&self, actor: &Actor, operation_id: &str) -> SyncResult<DrainReport> {
        self.policy.ensure(actor, Action::RequeueOperation)?;
        if !self.engine.database().queue().requeue_rejected(operation_id).await? {
            return Err(SyncError::OperationNotFound(operation_id.to_string()));
        }
        info!(op_id = %operation_id, user_id = %actor.user_id, "Rejected operation requeued");
        self.engine.drain().await
    }

    /// Drops a rejected operation, releasing its entity.
    pub async fn discard_rejected(&self, actor: &Actor, operation_id: &str) -> SyncResult<DrainReport> {
        self.policy.ensure(actor, Action::RequeueOperation)?;
        let queue = self.engine.database().queue();
        match queue.get(operation_id).await? {
            Some(entry) if entry.is_rejected() => {
                queue.discard(operation_id).await?;
            }
            _ => return Err(SyncError::OperationNotFound(operation_id.to_string())),
        }
        self.engine.drain().await
    }

    async fn load(&self, resource: Resource, entity_id: &str) -> SyncResult<SyncConflict> {
        self.engine
            .database()
            .conflicts()
            .get(resource, entity_id)
            .await?
            .ok_or_else(|| SyncError::ConflictNotFound {
                resource,
                entity_id: entity_id.to_string(),
            })
    }

    /// Later operations captured against the same base now build on `resolved`.
    async fn rebase_onto(&self, op: &QueuedOperation, resolved: Option<&RemoteRecord>) -> SyncResult<()> {
        let local = self.engine.database();
        match resolved {
            Some(record) => {
                local.cache().put(record).await?;
                local
                    .rebase()
                    .record(op.resource(), &op.entity_id, op.base_version, record.version)
                    .await?;
            }
            None => local.cache().remove(op.resource(), &op.entity_id).await?,
        }
        Ok(())
    }
}

/// The queued operation rebuilt over `fresh`, or `None` when nothing is left
/// to apply.
fn keep_local(op: &QueuedOperation, fresh: Option<&RemoteRecord>) -> SyncResult<Option<QueuedOperation>> {
    let replacement = match (&op.mutation, fresh) {
        (Mutation::CreateInventory(record) | Mutation::UpdateInventory(record), Some(remote)) => {
            op.rebased(Mutation::UpdateInventory(record.clone()), remote.version)
        }
        (Mutation::CreateInventory(record) | Mutation::UpdateInventory(record), None) => {
            op.rebased(Mutation::CreateInventory(record.clone()), 0)
        }
        (Mutation::DeleteInventory, Some(remote)) => op.rebased(Mutation::DeleteInventory, remote.version),
        (Mutation::DeleteInventory, None) => return Ok(None),
        (Mutation::TransitionShift(_) | Mutation::DecideRefund(_), Some(remote)) => {
            op.rebased(op.mutation.clone(), remote.version)
        }
        _ => {
            return Err(ValidationError::invalid_format(
                "resolution",
                format!(
                    "cannot keep the local {} {} over the server state",
                    op.resource(),
                    op.kind()
                ),
            )
            .into())
        }
    };
    Ok(Some(replacement))
}
