//! # Offline Client
//!
//! The surface the POS screens call. Every mutation is checked locally,
//! written to the durable queue, and only then offered to the remote.
//!
//! ## Mutation Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  screen action (post_sale, close_shift, approve_refund, ...)            │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  AccessPolicy::ensure ──► PermissionError (nothing queued)              │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  local checks against the projected state                               │
//! │  (cache + still-queued operations) ──► ValidationError / state error    │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  enqueue (durable) ──► failure is a hard error                          │
//! │     │                                                                   │
//! │     ├── offline ──► Queued                                              │
//! │     └── online  ──► drain ──► Applied / Conflicted / Rejected / Queued  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The projected state is a best-effort view for early feedback. The
//! authoritative store re-checks everything when the operation lands.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use rxpos_core::reconciliation::assess_refund;
use rxpos_core::{
    AccessPolicy, Action, Actor, CashReconciliation, CoreError, InventoryItem, InventoryRecord,
    Money, Mutation, PaymentPosting, QueueEntry, QueuedOperation, Refund, RefundDecision,
    RefundRequest, Resource, RolePolicy, Sale, SalePosting, Shift, ShiftOpening, ShiftTransition,
    VarianceReport, DEFAULT_REFUND_TOLERANCE,
};

use crate::engine::{DrainReport, OperationOutcome, SyncEngine};
use crate::error::SyncResult;
use crate::session::SaleSession;

/// Upper bound on queued operations scanned when projecting local state.
const PROJECTION_WINDOW: u32 = 10_000;

/// What the caller learns about a mutation it just submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub operation_id: String,
    pub entity_id: String,
    pub outcome: OperationOutcome,
}

impl Submission {
    pub fn is_applied(&self) -> bool {
        self.outcome.is_applied()
    }
}

pub struct OfflineClient {
    engine: Arc<SyncEngine>,
    policy: Arc<dyn AccessPolicy>,
    refund_tolerance: Money,
}

impl OfflineClient {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        OfflineClient {
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

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Adds a new product under a client-generated id.
    pub async fn create_inventory(&self, actor: &Actor, record: InventoryRecord) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::AdjustInventory)?;
        let id = Uuid::new_v4().to_string();
        self.submit(&id, Mutation::CreateInventory(record)).await
    }

    /// Replaces the editable fields of a product.
    pub async fn adjust_inventory(
        &self,
        actor: &Actor,
        item_id: &str,
        record: InventoryRecord,
    ) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::AdjustInventory)?;
        self.submit(item_id, Mutation::UpdateInventory(record)).await
    }

    pub async fn remove_inventory(&self, actor: &Actor, item_id: &str) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::AdjustInventory)?;
        self.submit(item_id, Mutation::DeleteInventory).await
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Queues a complete sale posting.
    ///
    /// When the posting names a shift, that shift must be accepting sales in
    /// the local projection.
    pub async fn post_sale(&self, actor: &Actor, posting: SalePosting) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::PostSale)?;
        posting.validate()?;

        if let Some(shift_id) = &posting.shift_id {
            let shift = self
                .project_shift(shift_id)
                .await?
                .ok_or_else(|| CoreError::not_found("shift", shift_id.as_str()))?;
            if !shift.can_post_sales() {
                return Err(CoreError::invalid_transition("shift", shift.status, "post sales").into());
            }
        }

        let sale_id = Uuid::new_v4().to_string();
        self.submit(&sale_id, Mutation::PostSale(posting)).await
    }

    /// Posts the session's cart and clears the stored draft.
    ///
    /// The draft survives when the posting could not even be queued.
    pub async fn checkout(
        &self,
        actor: &Actor,
        session: SaleSession,
        payments: Vec<PaymentPosting>,
    ) -> SyncResult<Submission> {
        let posting = session.prepare(payments)?;
        let submission = self.post_sale(actor, posting).await?;
        session.finish().await?;
        Ok(submission)
    }

    // =========================================================================
    // Shifts
    // =========================================================================

    /// Opens a shift for the acting cashier.
    pub async fn open_shift(&self, actor: &Actor, opening_cash: Money) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::ManageShift)?;
        let opening = ShiftOpening {
            cashier_id: actor.user_id.clone(),
            opening_cash,
        };
        let shift_id = Uuid::new_v4().to_string();
        self.submit(&shift_id, Mutation::OpenShift(opening)).await
    }

    pub async fn pause_shift(&self, actor: &Actor, shift_id: &str) -> SyncResult<Submission> {
        self.transition_shift(actor, shift_id, ShiftTransition::Pause).await
    }

    pub async fn resume_shift(&self, actor: &Actor, shift_id: &str) -> SyncResult<Submission> {
        self.transition_shift(actor, shift_id, ShiftTransition::Resume).await
    }

    /// Closes the shift with the counted drawer cash.
    ///
    /// A nonzero variance without a note is refused before anything is queued.
    pub async fn close_shift(
        &self,
        actor: &Actor,
        shift_id: &str,
        actual_cash_counted: Money,
        notes: Option<String>,
    ) -> SyncResult<Submission> {
        let close = ShiftTransition::Close {
            actual_cash_counted,
            notes,
        };
        self.transition_shift(actor, shift_id, close).await
    }

    async fn transition_shift(
        &self,
        actor: &Actor,
        shift_id: &str,
        transition: ShiftTransition,
    ) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::ManageShift)?;
        let shift = self
            .project_shift(shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("shift", shift_id))?;
        shift.apply_transition(&transition, Utc::now())?;
        self.submit(shift_id, Mutation::TransitionShift(transition)).await
    }

    /// Shift as this terminal believes it to be: the cached copy plus every
    /// queued open, transition and sale payment not yet confirmed.
    pub async fn project_shift(&self, shift_id: &str) -> SyncResult<Option<Shift>> {
        let mut shift: Option<Shift> = self.cached(Resource::Shifts, shift_id).await?;

        for entry in self.queued().await? {
            let op = &entry.operation;
            match &op.mutation {
                Mutation::OpenShift(opening) if op.entity_id == shift_id && shift.is_none() => {
                    shift = Some(Shift::open(shift_id, opening, op.enqueued_at));
                }
                Mutation::TransitionShift(t) if op.entity_id == shift_id => {
                    if let Some(current) = &shift {
                        if let Ok(next) = current.apply_transition(t, op.enqueued_at) {
                            shift = Some(next);
                        }
                    }
                }
                Mutation::PostSale(posting) if posting.shift_id.as_deref() == Some(shift_id) => {
                    if let Some(current) = shift.as_mut() {
                        for payment in &posting.payments {
                            current.record_payment(payment.mode, payment.amount);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(shift)
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    /// Requests a refund against a sale this terminal knows about.
    pub async fn request_refund(
        &self,
        actor: &Actor,
        sale_id: &str,
        amount: Money,
        reason: Option<String>,
    ) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::RequestRefund)?;
        let request = RefundRequest {
            sale_id: sale_id.to_string(),
            amount,
            reason,
            requested_by: actor.user_id.clone(),
        };

        let sale_total = self
            .project_sale_total(sale_id)
            .await?
            .ok_or_else(|| CoreError::not_found("sale", sale_id))?;
        let refund_id = Uuid::new_v4().to_string();
        Refund::request(&refund_id, &request, sale_total, Utc::now())?;

        if self.has_active_refund(sale_id).await? {
            return Err(CoreError::ActiveRefundExists {
                sale_id: sale_id.to_string(),
            }
            .into());
        }

        self.submit(&refund_id, Mutation::RequestRefund(request)).await
    }

    pub async fn approve_refund(
        &self,
        actor: &Actor,
        refund_id: &str,
        reconciliation: CashReconciliation,
    ) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::ApproveRefund)?;
        let decision = RefundDecision::Approve {
            reconciliation,
            approved_by: actor.user_id.clone(),
        };
        self.decide_refund(refund_id, decision).await
    }

    pub async fn reject_refund(&self, actor: &Actor, refund_id: &str, reason: &str) -> SyncResult<Submission> {
        self.policy.ensure(actor, Action::RejectRefund)?;
        let decision = RefundDecision::Reject {
            reason: reason.to_string(),
            rejected_by: actor.user_id.clone(),
        };
        self.decide_refund(refund_id, decision).await
    }

    /// Variance the approver would record, without committing anything.
    pub fn preview_refund_variance(&self, reconciliation: &CashReconciliation) -> VarianceReport {
        assess_refund(reconciliation, self.refund_tolerance)
    }

    async fn decide_refund(&self, refund_id: &str, decision: RefundDecision) -> SyncResult<Submission> {
        let refund = self
            .project_refund(refund_id)
            .await?
            .ok_or_else(|| CoreError::not_found("refund", refund_id))?;
        refund.decide(&decision, self.refund_tolerance, Utc::now())?;
        self.submit(refund_id, Mutation::DecideRefund(decision)).await
    }

    /// Refund as this terminal believes it to be: the cached copy, or the
    /// queued request, with every queued decision folded on top.
    pub async fn project_refund(&self, refund_id: &str) -> SyncResult<Option<Refund>> {
        let mut refund: Option<Refund> = self.cached(Resource::Refunds, refund_id).await?;

        let queued = self
            .engine
            .database()
            .queue()
            .pending_for(Resource::Refunds, refund_id)
            .await?;
        for entry in queued {
            let op = &entry.operation;
            match &op.mutation {
                Mutation::RequestRefund(request) if refund.is_none() => {
                    refund = Some(Refund::request(refund_id, request, request.amount, op.enqueued_at)?);
                }
                Mutation::DecideRefund(decision) => {
                    if let Some(current) = &refund {
                        if let Ok(next) = current.decide(decision, self.refund_tolerance, op.enqueued_at) {
                            refund = Some(next);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(refund)
    }

    async fn project_sale_total(&self, sale_id: &str) -> SyncResult<Option<Money>> {
        if let Some(sale) = self.cached::<Sale>(Resource::Sales, sale_id).await? {
            return Ok(Some(sale.total));
        }
        let queued = self
            .engine
            .database()
            .queue()
            .pending_for(Resource::Sales, sale_id)
            .await?;
        Ok(queued.iter().find_map(|entry| match &entry.operation.mutation {
            Mutation::PostSale(posting) => Some(posting.total),
            _ => None,
        }))
    }

    /// Pending or approved refund for the sale, cached or still queued.
    async fn has_active_refund(&self, sale_id: &str) -> SyncResult<bool> {
        let mut refund_ids = Vec::new();
        for record in self.engine.database().cache().list(Resource::Refunds).await? {
            let refund: Refund = record.decode()?;
            if refund.sale_id == sale_id {
                refund_ids.push(refund.id);
            }
        }
        for entry in self.queued().await? {
            if matches!(&entry.operation.mutation, Mutation::RequestRefund(r) if r.sale_id == sale_id)
                && !refund_ids.contains(&entry.operation.entity_id)
            {
                refund_ids.push(entry.operation.entity_id);
            }
        }

        for refund_id in refund_ids {
            if let Some(refund) = self.project_refund(&refund_id).await? {
                if refund.status.is_active() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // =========================================================================
    // Sync & Reads
    // =========================================================================

    /// Runs a drain now, regardless of the agent's schedule.
    pub async fn sync_now(&self) -> SyncResult<DrainReport> {
        self.engine.drain().await
    }

    pub async fn inventory_item(&self, item_id: &str) -> SyncResult<Option<InventoryItem>> {
        self.cached(Resource::Inventory, item_id).await
    }

    /// Cached inventory, active items only.
    pub async fn inventory(&self) -> SyncResult<Vec<InventoryItem>> {
        let records = self.engine.database().cache().list(Resource::Inventory).await?;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let item: InventoryItem = record.decode()?;
            if item.is_active {
                items.push(item);
            }
        }
        Ok(items)
    }

    pub async fn pending_operations(&self) -> SyncResult<Vec<QueueEntry>> {
        self.queued().await
    }

    async fn cached<T: DeserializeOwned>(&self, resource: Resource, id: &str) -> SyncResult<Option<T>> {
        match self.engine.database().cache().get(resource, id).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    async fn queued(&self) -> SyncResult<Vec<QueueEntry>> {
        Ok(self.engine.database().queue().pending(PROJECTION_WINDOW).await?)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Enqueues durably, then offers the queue to the remote when online.
    async fn submit(&self, entity_id: &str, mutation: Mutation) -> SyncResult<Submission> {
        let local = self.engine.database();
        let base_version = local.cache().version_of(mutation.resource(), entity_id).await?;

        let operation = QueuedOperation::new(entity_id, mutation, base_version);
        operation.validate()?;
        let operation = local.queue().enqueue(&operation).await?;

        info!(
            op_id = %operation.id,
            resource = %operation.resource(),
            entity_id = %entity_id,
            kind = %operation.kind(),
            base_version,
            "Operation queued"
        );

        let outcome = if self.engine.connectivity().is_online() {
            let report = self.engine.drain().await?;
            report
                .outcome_for(&operation.id)
                .cloned()
                .unwrap_or(OperationOutcome::Queued)
        } else {
            debug!(op_id = %operation.id, "Offline, operation stays queued");
            OperationOutcome::Queued
        };

        Ok(Submission {
            operation_id: operation.id,
            entity_id: entity_id.to_string(),
            outcome,
        })
    }
}
