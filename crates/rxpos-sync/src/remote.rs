//! # Remote Store Seam
//!
//! The authoritative side of synchronization: entity CRUD plus the atomic
//! sale-posting endpoint.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  SyncEngine                                                           │
//! │     │  fetch(resource, id)            → Option<RemoteRecord>          │
//! │     │  apply(op, expected_version)    → RemoteRecord                  │
//! │     ▼                                                                 │
//! │  dyn RemoteStore                                                      │
//! │     │                                                                 │
//! │     └── StoreRemote ──► rxpos_db::Database (authoritative copy)       │
//! │            inventory → InventoryRepository (versioned writes)         │
//! │            sales     → SaleRepository::post_sale (one transaction)    │
//! │            shifts    → ShiftRepository                                │
//! │            refunds   → RefundRepository                               │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every write is stamped with the queued operation id, which is how a lost
//! confirmation is recognized on replay.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use rxpos_core::{
    Money, Mutation, QueuedOperation, RemoteRecord, Resource, DEFAULT_REFUND_TOLERANCE,
};
use rxpos_db::{Database, DbError};

use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};

/// The authoritative store the queue drains into.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current state of an entity. Soft-deleted inventory reads as absent.
    async fn fetch(&self, resource: Resource, entity_id: &str) -> SyncResult<Option<RemoteRecord>>;

    /// Applies one operation guarded by `expected_version` and returns the
    /// resulting record.
    async fn apply(&self, operation: &QueuedOperation, expected_version: i64) -> SyncResult<RemoteRecord>;
}

// =============================================================================
// StoreRemote
// =============================================================================

/// [`RemoteStore`] over a [`Database`] acting as the authoritative store.
///
/// An optional [`Connectivity`] makes it refuse calls while offline, which is
/// how tests and local demos simulate a dropped link.
#[derive(Debug, Clone)]
pub struct StoreRemote {
    db: Database,
    refund_tolerance: Money,
    link: Option<Connectivity>,
}

impl StoreRemote {
    pub fn new(db: Database) -> Self {
        StoreRemote {
            db,
            refund_tolerance: DEFAULT_REFUND_TOLERANCE,
            link: None,
        }
    }

    pub fn with_refund_tolerance(mut self, tolerance: Money) -> Self {
        self.refund_tolerance = tolerance;
        self
    }

    /// Ties reachability to a connectivity signal.
    pub fn with_link(mut self, link: Connectivity) -> Self {
        self.link = Some(link);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn ensure_reachable(&self) -> SyncResult<()> {
        match &self.link {
            Some(link) if !link.is_online() => {
                Err(SyncError::Transport("link to authoritative store is down".into()))
            }
            _ => Ok(()),
        }
    }
}

fn record<T: Serialize>(
    resource: Resource,
    entity_id: &str,
    version: i64,
    last_operation_id: Option<String>,
    entity: &T,
) -> SyncResult<RemoteRecord> {
    Ok(RemoteRecord::new(
        resource,
        entity_id,
        version,
        last_operation_id,
        entity,
    )?)
}

/// Maps an authoritative-store failure onto the drain's categories.
///
/// ```text
/// StaleVersion                         → StaleVersion (conflict)
/// unreachable / pool / busy            → Transport (retried later)
/// business rule, constraint, decoding  → Rejected (parked for review)
/// ```
///
/// A failure that would repeat on every retry must not be Transport, or
/// the drain would stop on it forever.
pub(crate) fn remote_error(resource: Resource, entity_id: &str, err: DbError) -> SyncError {
    match err {
        DbError::StaleVersion {
            expected, actual, ..
        } => SyncError::StaleVersion {
            resource,
            entity_id: entity_id.to_string(),
            expected,
            actual,
        },
        err if err.is_unavailable() => SyncError::Transport(err.to_string()),
        err => {
            if !err.is_business_rejection() {
                warn!(resource = %resource, entity_id = %entity_id, error = %err, "Store failed deterministically");
            }
            SyncError::Rejected(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteStore for StoreRemote {
    async fn fetch(&self, resource: Resource, entity_id: &str) -> SyncResult<Option<RemoteRecord>> {
        self.ensure_reachable()?;
        let map = |e| remote_error(resource, entity_id, e);

        match resource {
            Resource::Inventory => {
                let item = self.db.inventory().get_by_id(entity_id).await.map_err(map)?;
                item.filter(|i| i.is_active)
                    .map(|i| record(resource, entity_id, i.version, i.last_operation_id.clone(), &i))
                    .transpose()
            }
            Resource::Sales => {
                let sale = self.db.sales().get_by_id(entity_id).await.map_err(map)?;
                sale.map(|s| record(resource, entity_id, s.version, s.last_operation_id.clone(), &s))
                    .transpose()
            }
            Resource::Shifts => {
                let shift = self.db.shifts().get_by_id(entity_id).await.map_err(map)?;
                shift
                    .map(|s| record(resource, entity_id, s.version, s.last_operation_id.clone(), &s))
                    .transpose()
            }
            Resource::Refunds => {
                let refund = self.db.refunds().get_by_id(entity_id).await.map_err(map)?;
                refund
                    .map(|r| record(resource, entity_id, r.version, r.last_operation_id.clone(), &r))
                    .transpose()
            }
        }
    }

    async fn apply(&self, operation: &QueuedOperation, expected_version: i64) -> SyncResult<RemoteRecord> {
        self.ensure_reachable()?;

        let id = operation.entity_id.as_str();
        let op_id = Some(operation.id.as_str());
        let resource = operation.resource();
        let map = |e| remote_error(resource, id, e);

        debug!(
            op_id = %operation.id,
            resource = %resource,
            entity_id = %id,
            kind = %operation.kind(),
            expected_version,
            "Applying operation to authoritative store"
        );

        match &operation.mutation {
            Mutation::CreateInventory(item) => {
                let created = self.db.inventory().create(id, item, op_id).await.map_err(map)?;
                record(resource, id, created.version, created.last_operation_id.clone(), &created)
            }
            Mutation::UpdateInventory(item) => {
                let updated = self
                    .db
                    .inventory()
                    .update(id, item, expected_version, op_id)
                    .await
                    .map_err(map)?;
                record(resource, id, updated.version, updated.last_operation_id.clone(), &updated)
            }
            Mutation::DeleteInventory => {
                let deleted = self
                    .db
                    .inventory()
                    .soft_delete(id, expected_version, op_id)
                    .await
                    .map_err(map)?;
                record(resource, id, deleted.version, deleted.last_operation_id.clone(), &deleted)
            }
            Mutation::PostSale(posting) => {
                let posted = self.db.sales().post_sale(id, posting, op_id).await.map_err(map)?;
                let sale = self
                    .db
                    .sales()
                    .get_by_id(&posted.sale_id)
                    .await
                    .map_err(map)?
                    .ok_or_else(|| SyncError::Internal(format!("posted sale {} vanished", posted.sale_id)))?;
                record(resource, &sale.id, sale.version, sale.last_operation_id.clone(), &sale)
            }
            Mutation::OpenShift(opening) => {
                let shift = self.db.shifts().open(id, opening, op_id).await.map_err(map)?;
                record(resource, id, shift.version, shift.last_operation_id.clone(), &shift)
            }
            Mutation::TransitionShift(transition) => {
                let shift = self
                    .db
                    .shifts()
                    .transition(id, transition, expected_version, op_id)
                    .await
                    .map_err(map)?;
                record(resource, id, shift.version, shift.last_operation_id.clone(), &shift)
            }
            Mutation::RequestRefund(request) => {
                let refund = self.db.refunds().request(id, request, op_id).await.map_err(map)?;
                record(resource, id, refund.version, refund.last_operation_id.clone(), &refund)
            }
            Mutation::DecideRefund(decision) => {
                let refund = self
                    .db
                    .refunds()
                    .decide(id, decision, expected_version, self.refund_tolerance, op_id)
                    .await
                    .map_err(map)?;
                record(resource, id, refund.version, refund.last_operation_id.clone(), &refund)
            }
        }
    }
}
