//! # Conflict Detection Types
//!
//! What the sync engine records when a queued operation is stale, and the
//! field-level comparison the resolver shows to the operator.
//!
//! ## Conflict Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  drain: remote.version > op.base_version                                │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  SyncConflict { entity_id, operation, server_version }  (persisted)     │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  operator views conflict_diffs() ──► [FieldDiff { field, local, server }]│
//! │      │                                                                  │
//! │      ├── Resolution::Local   reapply payload over current remote        │
//! │      ├── Resolution::Server  discard payload, refresh cache             │
//! │      └── Resolution::Merge   server values + chosen local fields        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Diffs are computed per resource with typed comparators, so a renamed or
//! added field breaks the build instead of silently dropping out of the diff.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;
use crate::operation::{Mutation, QueuedOperation, RefundDecision, Resource};
use crate::types::{InventoryItem, InventoryRecord, Refund, Sale, Shift};

// =============================================================================
// Remote Record
// =============================================================================

/// A versioned entity as the authoritative store reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RemoteRecord {
    pub resource: Resource,
    pub entity_id: String,
    pub version: i64,
    /// Id of the queued operation that produced `version`.
    pub last_operation_id: Option<String>,
    /// The entity serialized as JSON (`InventoryItem`, `Sale`, `Shift`, `Refund`).
    #[ts(type = "unknown")]
    pub data: serde_json::Value,
}

impl RemoteRecord {
    /// Wraps a typed entity.
    pub fn new<T: Serialize>(
        resource: Resource,
        entity_id: impl Into<String>,
        version: i64,
        last_operation_id: Option<String>,
        entity: &T,
    ) -> CoreResult<Self> {
        let data = serde_json::to_value(entity)
            .map_err(|e| ValidationError::invalid_format("data", e.to_string()))?;
        Ok(RemoteRecord {
            resource,
            entity_id: entity_id.into(),
            version,
            last_operation_id,
            data,
        })
    }

    /// Decodes `data` into the entity type for this resource.
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            ValidationError::invalid_format(format!("{} record", self.resource), e.to_string())
                .into()
        })
    }
}

// =============================================================================
// Sync Conflict
// =============================================================================

/// A queued operation whose base version is older than the remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncConflict {
    pub entity_id: String,
    pub resource: Resource,
    pub operation: QueuedOperation,
    /// Remote state at detection time. `None` when the record was deleted
    /// under a queued update.
    pub server_version: Option<RemoteRecord>,
    #[ts(as = "String")]
    pub detected_at: DateTime<Utc>,
}

impl SyncConflict {
    pub fn new(operation: QueuedOperation, server_version: Option<RemoteRecord>) -> Self {
        SyncConflict {
            entity_id: operation.entity_id.clone(),
            resource: operation.resource(),
            operation,
            server_version,
            detected_at: Utc::now(),
        }
    }

    /// Version the remote held when the conflict was detected (0 if absent).
    pub fn server_version_number(&self) -> i64 {
        self.server_version.as_ref().map(|r| r.version).unwrap_or(0)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Operator choice for a conflict.
///
/// Merge field names arrive as strings from the UI and are checked against
/// [`InventoryField`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "strategy", rename_all = "lowercase")]
#[ts(export)]
pub enum Resolution {
    Local,
    Server,
    Merge { keep_local: Vec<String> },
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Local => "local",
            Resolution::Server => "server",
            Resolution::Merge { .. } => "merge",
        }
    }
}

/// The mergeable fields of an inventory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum InventoryField {
    Name,
    Sku,
    Quantity,
    ReorderLevel,
    CostPrice,
    SellPrice,
    BatchNumber,
    ExpiryDate,
}

impl InventoryField {
    pub const ALL: [InventoryField; 8] = [
        InventoryField::Name,
        InventoryField::Sku,
        InventoryField::Quantity,
        InventoryField::ReorderLevel,
        InventoryField::CostPrice,
        InventoryField::SellPrice,
        InventoryField::BatchNumber,
        InventoryField::ExpiryDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryField::Name => "name",
            InventoryField::Sku => "sku",
            InventoryField::Quantity => "quantity",
            InventoryField::ReorderLevel => "reorder_level",
            InventoryField::CostPrice => "cost_price",
            InventoryField::SellPrice => "sell_price",
            InventoryField::BatchNumber => "batch_number",
            InventoryField::ExpiryDate => "expiry_date",
        }
    }

    /// Parses a list of field names, failing on the first unknown one.
    pub fn parse_all(names: &[String]) -> Result<Vec<InventoryField>, ValidationError> {
        names.iter().map(|n| n.parse()).collect()
    }
}

impl fmt::Display for InventoryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InventoryField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: format!("merge field '{}'", s),
                allowed: InventoryField::ALL
                    .iter()
                    .map(|f| f.as_str().to_string())
                    .collect(),
            })
    }
}

impl InventoryRecord {
    /// Server values everywhere except the fields kept from `local`.
    pub fn merge(
        server: &InventoryRecord,
        local: &InventoryRecord,
        keep_local: &[InventoryField],
    ) -> InventoryRecord {
        let mut merged = server.clone();
        for field in keep_local {
            match field {
                InventoryField::Name => merged.name = local.name.clone(),
                InventoryField::Sku => merged.sku = local.sku.clone(),
                InventoryField::Quantity => merged.quantity = local.quantity,
                InventoryField::ReorderLevel => merged.reorder_level = local.reorder_level,
                InventoryField::CostPrice => merged.cost_price = local.cost_price,
                InventoryField::SellPrice => merged.sell_price = local.sell_price,
                InventoryField::BatchNumber => merged.batch_number = local.batch_number.clone(),
                InventoryField::ExpiryDate => merged.expiry_date = local.expiry_date,
            }
        }
        merged
    }
}

/// Builds the merged payload for an inventory conflict.
///
/// `server` must be the fresh remote record the merge will be applied over.
pub fn merge_inventory(
    local: &Mutation,
    server: &RemoteRecord,
    keep_local: &[String],
) -> CoreResult<Mutation> {
    let fields = InventoryField::parse_all(keep_local)?;
    let local_record = match local {
        Mutation::CreateInventory(record) | Mutation::UpdateInventory(record) => record,
        _ => {
            return Err(ValidationError::invalid_format(
                "resolution",
                "merge is only available for inventory create/update operations",
            )
            .into())
        }
    };
    let server_record = server.decode::<InventoryItem>()?.record();
    let merged = InventoryRecord::merge(&server_record, local_record, &fields);
    Ok(Mutation::UpdateInventory(merged))
}

// =============================================================================
// Field Diffs
// =============================================================================

/// One differing field between the queued intent and the remote state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FieldDiff {
    pub field: String,
    #[ts(type = "unknown")]
    pub local: serde_json::Value,
    #[ts(type = "unknown")]
    pub server: serde_json::Value,
}

impl FieldDiff {
    pub fn new<L: Serialize, S: Serialize>(field: &str, local: &L, server: &S) -> Self {
        FieldDiff {
            field: field.to_string(),
            local: serde_json::to_value(local).unwrap_or(serde_json::Value::Null),
            server: serde_json::to_value(server).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Emits a [`FieldDiff`] for every listed field whose values differ.
macro_rules! diff_fields {
    ($local:expr, $server:expr; $($field:ident),+ $(,)?) => {{
        let mut diffs = Vec::new();
        $(
            if $local.$field != $server.$field {
                diffs.push(FieldDiff::new(stringify!($field), &$local.$field, &$server.$field));
            }
        )+
        diffs
    }};
}

/// Typed field-by-field comparison.
pub trait FieldwiseDiff {
    fn diff(&self, server: &Self) -> Vec<FieldDiff>;
}

impl FieldwiseDiff for InventoryRecord {
    fn diff(&self, server: &Self) -> Vec<FieldDiff> {
        diff_fields!(self, server;
            name, sku, quantity, reorder_level, cost_price, sell_price, batch_number, expiry_date)
    }
}

impl FieldwiseDiff for Sale {
    fn diff(&self, server: &Self) -> Vec<FieldDiff> {
        diff_fields!(self, server; transaction_id, total, discount, cashier_id, shift_id)
    }
}

impl FieldwiseDiff for Shift {
    fn diff(&self, server: &Self) -> Vec<FieldDiff> {
        diff_fields!(self, server;
            cashier_id, status, opening_cash, expected_cash_total, expected_pos_total,
            expected_transfer_total, actual_cash_counted, variance, notes)
    }
}

impl FieldwiseDiff for Refund {
    fn diff(&self, server: &Self) -> Vec<FieldDiff> {
        diff_fields!(self, server;
            sale_id, amount, reason, status, requested_by, decided_by, rejection_reason,
            cash_returned, register_balance_before, register_balance_after, variance,
            variance_flagged)
    }
}

/// Every field of `local` against an absent remote record.
fn diff_against_absent<T: Serialize>(local: &T) -> Vec<FieldDiff> {
    match serde_json::to_value(local) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(field, value)| FieldDiff {
                field,
                local: value,
                server: serde_json::Value::Null,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Field-level differences between a conflict's queued intent and the server.
///
/// Transitions are projected onto the server record first, so a shift close
/// shows the variance it would produce against the current totals. When the
/// transition is not possible from the server's state, the diff reports the
/// status mismatch.
pub fn conflict_diffs(conflict: &SyncConflict, refund_tolerance: Money) -> CoreResult<Vec<FieldDiff>> {
    let op = &conflict.operation;
    let server = conflict.server_version.as_ref();
    let now = Utc::now();

    let diffs = match &op.mutation {
        Mutation::CreateInventory(local) | Mutation::UpdateInventory(local) => match server {
            Some(remote) => local.diff(&remote.decode::<InventoryItem>()?.record()),
            None => diff_against_absent(local),
        },
        Mutation::DeleteInventory => match server {
            Some(remote) => {
                let item: InventoryItem = remote.decode()?;
                vec![FieldDiff::new("is_active", &false, &item.is_active)]
            }
            None => Vec::new(),
        },
        Mutation::PostSale(posting) => match server {
            Some(remote) => {
                let sale: Sale = remote.decode()?;
                let mut local = sale.clone();
                local.transaction_id = posting.transaction_id.clone();
                local.total = posting.total;
                local.discount = posting.discount;
                local.cashier_id = posting.cashier_id.clone();
                local.shift_id = posting.shift_id.clone();
                local.diff(&sale)
            }
            None => diff_against_absent(posting),
        },
        Mutation::OpenShift(opening) => match server {
            Some(remote) => {
                let shift: Shift = remote.decode()?;
                let local = Shift::open(shift.id.clone(), opening, shift.started_at);
                local.diff(&shift)
            }
            None => diff_against_absent(opening),
        },
        Mutation::TransitionShift(transition) => match server {
            Some(remote) => {
                let shift: Shift = remote.decode()?;
                match shift.apply_transition(transition, now) {
                    Ok(projected) => projected.diff(&shift),
                    Err(_) => vec![FieldDiff::new("status", &transition.action(), &shift.status)],
                }
            }
            None => vec![FieldDiff::new(
                "status",
                &transition.action(),
                &serde_json::Value::Null,
            )],
        },
        Mutation::RequestRefund(request) => match server {
            Some(remote) => {
                let refund: Refund = remote.decode()?;
                let mut local = refund.clone();
                local.sale_id = request.sale_id.clone();
                local.amount = request.amount;
                local.reason = request.reason.clone();
                local.requested_by = request.requested_by.clone();
                local.diff(&refund)
            }
            None => diff_against_absent(request),
        },
        Mutation::DecideRefund(decision) => match server {
            Some(remote) => {
                let refund: Refund = remote.decode()?;
                match refund.decide(decision, refund_tolerance, now) {
                    Ok(projected) => projected.diff(&refund),
                    Err(_) => {
                        let action = match decision {
                            RefundDecision::Approve { .. } => "approved",
                            RefundDecision::Reject { .. } => "rejected",
                        };
                        vec![FieldDiff::new("status", &action, &refund.status)]
                    }
                }
            }
            None => diff_against_absent(decision),
        },
    };
    Ok(diffs)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{ShiftOpening, ShiftTransition};
    use chrono::NaiveDate;
    use crate::types::ShiftStatus;

    fn record(quantity: i64, sell: i64) -> InventoryRecord {
        InventoryRecord {
            name: "Amoxicillin 500mg".into(),
            sku: "AMX-500".into(),
            quantity,
            reorder_level: 10,
            cost_price: Money::from_minor(800),
            sell_price: Money::from_minor(sell),
            batch_number: Some("LOT-9".into()),
            expiry_date: NaiveDate::from_ymd_opt(2027, 6, 30),
        }
    }

    fn remote_item(rec: &InventoryRecord, version: i64) -> RemoteRecord {
        let now = Utc::now();
        let item = InventoryItem {
            id: "item-1".into(),
            name: rec.name.clone(),
            sku: rec.sku.clone(),
            quantity: rec.quantity,
            reorder_level: rec.reorder_level,
            cost_price: rec.cost_price,
            sell_price: rec.sell_price,
            batch_number: rec.batch_number.clone(),
            expiry_date: rec.expiry_date,
            is_active: true,
            version,
            last_operation_id: None,
            created_at: now,
            updated_at: now,
        };
        RemoteRecord::new(Resource::Inventory, "item-1", version, None, &item).unwrap()
    }

    #[test]
    fn test_inventory_conflict_diffs_only_changed_fields() {
        let op = QueuedOperation::new("item-1", Mutation::UpdateInventory(record(20, 1200)), 1);
        let conflict = SyncConflict::new(op, Some(remote_item(&record(5, 1200), 2)));

        let diffs = conflict_diffs(&conflict, Money::from_minor(1)).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "quantity");
        assert_eq!(diffs[0].local, serde_json::json!(20));
        assert_eq!(diffs[0].server, serde_json::json!(5));
        assert_eq!(conflict.server_version_number(), 2);
    }

    #[test]
    fn test_merge_keeps_selected_local_fields() {
        let local = Mutation::UpdateInventory(record(20, 1500));
        let server = remote_item(&record(5, 1200), 2);

        let merged = merge_inventory(&local, &server, &["sell_price".to_string()]).unwrap();
        match merged {
            Mutation::UpdateInventory(rec) => {
                assert_eq!(rec.quantity, 5);
                assert_eq!(rec.sell_price, Money::from_minor(1500));
            }
            other => panic!("unexpected mutation {:?}", other),
        }
    }

    #[test]
    fn test_merge_rejects_unknown_field() {
        let local = Mutation::UpdateInventory(record(20, 1500));
        let server = remote_item(&record(5, 1200), 2);

        let err = merge_inventory(&local, &server, &["colour".to_string()]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_merge_only_for_inventory() {
        let local = Mutation::TransitionShift(ShiftTransition::Pause);
        let server = remote_item(&record(5, 1200), 2);
        assert!(merge_inventory(&local, &server, &[]).is_err());
    }

    #[test]
    fn test_deleted_remote_lists_every_local_field() {
        let op = QueuedOperation::new("item-1", Mutation::UpdateInventory(record(3, 100)), 1);
        let conflict = SyncConflict::new(op, None);

        let diffs = conflict_diffs(&conflict, Money::from_minor(1)).unwrap();
        assert_eq!(diffs.len(), 8);
        assert!(diffs.iter().all(|d| d.server.is_null()));
        assert_eq!(conflict.server_version_number(), 0);
    }

    #[test]
    fn test_shift_close_projected_over_server_totals() {
        let mut shift = Shift::open(
            "shift-1",
            &ShiftOpening {
                cashier_id: "c-1".into(),
                opening_cash: Money::from_minor(1000),
            },
            Utc::now(),
        );
        shift.expected_cash_total = Money::from_minor(500);
        shift.version = 3;
        let remote = RemoteRecord::new(Resource::Shifts, "shift-1", 3, None, &shift).unwrap();

        let op = QueuedOperation::new(
            "shift-1",
            Mutation::TransitionShift(ShiftTransition::Close {
                actual_cash_counted: Money::from_minor(1500),
                notes: None,
            }),
            2,
        );
        let diffs = conflict_diffs(&SyncConflict::new(op, Some(remote)), Money::zero()).unwrap();

        let status = diffs.iter().find(|d| d.field == "status").unwrap();
        assert_eq!(status.local, serde_json::json!(ShiftStatus::Closed));
        let variance = diffs.iter().find(|d| d.field == "variance").unwrap();
        assert_eq!(variance.local, serde_json::json!(0));
    }

    #[test]
    fn test_resolution_wire_shape() {
        let json = serde_json::to_value(Resolution::Merge {
            keep_local: vec!["quantity".into()],
        })
        .unwrap();
        assert_eq!(json["strategy"], "merge");
        assert_eq!(Resolution::Server.label(), "server");
    }
}
