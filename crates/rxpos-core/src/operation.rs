//! # Queued Operations
//!
//! The shapes that flow through the offline operation queue.
//!
//! ## Operation Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  QueuedOperation                                                        │
//! │  ───────────────                                                        │
//! │  id            client-generated UUID v4 (idempotency key)               │
//! │  seq           FIFO position, assigned by the durable queue             │
//! │  entity_id     the entity the mutation targets                          │
//! │  mutation ───► resource + kind + typed payload                          │
//! │  base_version  entity version the operator was looking at (0 = new)     │
//! │  enqueued_at                                                            │
//! │                                                                         │
//! │  Mutation                         resource     kind                     │
//! │  ────────                         ────────     ────                     │
//! │  CreateInventory(InventoryRecord) inventory    create                   │
//! │  UpdateInventory(InventoryRecord) inventory    update                   │
//! │  DeleteInventory                  inventory    delete                   │
//! │  PostSale(SalePosting)            sales        create                   │
//! │  OpenShift(ShiftOpening)          shifts       create                   │
//! │  TransitionShift(ShiftTransition) shifts       update                   │
//! │  RequestRefund(RefundRequest)     refunds      create                   │
//! │  DecideRefund(RefundDecision)     refunds      update                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Resource and kind are derived from the mutation, so an operation with a
//! payload that does not fit its resource cannot be built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{CashReconciliation, InventoryRecord, PaymentMode};
use crate::validation;

// =============================================================================
// Resource / Kind
// =============================================================================

/// The entity collections the queue can mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Resource {
    Inventory,
    Sales,
    Shifts,
    Refunds,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Inventory => "inventory",
            Resource::Sales => "sales",
            Resource::Shifts => "shifts",
            Resource::Refunds => "refunds",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inventory" => Ok(Resource::Inventory),
            "sales" => Ok(Resource::Sales),
            "shifts" => Ok(Resource::Shifts),
            "refunds" => Ok(Resource::Refunds),
            _ => Err(ValidationError::NotAllowed {
                field: "resource".into(),
                allowed: vec![
                    "inventory".into(),
                    "sales".into(),
                    "shifts".into(),
                    "refunds".into(),
                ],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// One line of a sale posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub product_id: String,
    pub quantity: i64,
    /// Catalog unit price.
    pub unit_price: Money,
    /// Price charged per unit (differs from `unit_price` for wholesale).
    pub price: Money,
    pub discount: Money,
    pub is_wholesale: bool,
    pub total: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentPosting {
    pub mode: PaymentMode,
    pub amount: Money,
}

/// Input to the atomic sale poster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalePosting {
    pub transaction_id: String,
    pub total: Money,
    pub discount: Money,
    pub customer_name: Option<String>,
    pub business_name: Option<String>,
    pub cashier_id: String,
    /// Shift whose expected totals accumulate this sale.
    pub shift_id: Option<String>,
    pub items: Vec<SaleLine>,
    pub payments: Vec<PaymentPosting>,
}

impl SalePosting {
    /// Validates everything that can be checked without touching stock.
    ///
    /// Payments are checked here so a mismatched posting is refused before
    /// any inventory row is read.
    pub fn validate(&self) -> CoreResult<()> {
        validation::validate_transaction_id(&self.transaction_id)?;
        validation::validate_required("cashier_id", &self.cashier_id)?;

        if self.items.is_empty() {
            return Err(ValidationError::required("items").into());
        }
        for line in &self.items {
            validation::validate_required("product_id", &line.product_id)?;
            validation::validate_quantity(line.quantity)?;
            validation::validate_non_negative("unit_price", line.unit_price)?;
            validation::validate_non_negative("price", line.price)?;
            validation::validate_non_negative("line discount", line.discount)?;
            validation::validate_non_negative("line total", line.total)?;
        }
        validation::validate_non_negative("discount", self.discount)?;
        validation::validate_non_negative("total", self.total)?;
        validation::validate_payments(self.total, &self.payments)?;
        Ok(())
    }

    /// Σ of payment amounts.
    pub fn amount_paid(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// Σ of payments in one mode.
    pub fn paid_by(&self, mode: PaymentMode) -> Money {
        self.payments
            .iter()
            .filter(|p| p.mode == mode)
            .map(|p| p.amount)
            .sum()
    }
}

/// Result of a sale posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PostedSale {
    pub sale_id: String,
    pub transaction_id: String,
    pub profit: Money,
    /// True when the transaction id had already been posted.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShiftOpening {
    pub cashier_id: String,
    pub opening_cash: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "action", rename_all = "snake_case")]
#[ts(export)]
pub enum ShiftTransition {
    Pause,
    Resume,
    Close {
        actual_cash_counted: Money,
        notes: Option<String>,
    },
}

impl ShiftTransition {
    pub fn action(&self) -> &'static str {
        match self {
            ShiftTransition::Pause => "pause",
            ShiftTransition::Resume => "resume",
            ShiftTransition::Close { .. } => "close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundRequest {
    pub sale_id: String,
    pub amount: Money,
    pub reason: Option<String>,
    pub requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "decision", rename_all = "snake_case")]
#[ts(export)]
pub enum RefundDecision {
    Approve {
        reconciliation: CashReconciliation,
        approved_by: String,
    },
    Reject {
        reason: String,
        rejected_by: String,
    },
}

// =============================================================================
// Mutation
// =============================================================================

/// Typed payload of a queued operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export)]
pub enum Mutation {
    CreateInventory(InventoryRecord),
    UpdateInventory(InventoryRecord),
    DeleteInventory,
    PostSale(SalePosting),
    OpenShift(ShiftOpening),
    TransitionShift(ShiftTransition),
    RequestRefund(RefundRequest),
    DecideRefund(RefundDecision),
}

impl Mutation {
    pub fn resource(&self) -> Resource {
        match self {
            Mutation::CreateInventory(_)
            | Mutation::UpdateInventory(_)
            | Mutation::DeleteInventory => Resource::Inventory,
            Mutation::PostSale(_) => Resource::Sales,
            Mutation::OpenShift(_) | Mutation::TransitionShift(_) => Resource::Shifts,
            Mutation::RequestRefund(_) | Mutation::DecideRefund(_) => Resource::Refunds,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Mutation::CreateInventory(_)
            | Mutation::PostSale(_)
            | Mutation::OpenShift(_)
            | Mutation::RequestRefund(_) => OperationKind::Create,
            Mutation::UpdateInventory(_)
            | Mutation::TransitionShift(_)
            | Mutation::DecideRefund(_) => OperationKind::Update,
            Mutation::DeleteInventory => OperationKind::Delete,
        }
    }

    /// Payload-level checks that need no store access.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Mutation::CreateInventory(record) | Mutation::UpdateInventory(record) => {
                validation::validate_inventory_record(record)
            }
            Mutation::DeleteInventory => Ok(()),
            Mutation::PostSale(posting) => posting.validate(),
            Mutation::OpenShift(opening) => {
                validation::validate_required("cashier_id", &opening.cashier_id)?;
                validation::validate_non_negative("opening_cash", opening.opening_cash)?;
                Ok(())
            }
            Mutation::TransitionShift(ShiftTransition::Close {
                actual_cash_counted,
                ..
            }) => {
                validation::validate_non_negative("actual_cash_counted", *actual_cash_counted)?;
                Ok(())
            }
            Mutation::TransitionShift(_) => Ok(()),
            Mutation::RequestRefund(request) => {
                validation::validate_required("sale_id", &request.sale_id)?;
                validation::validate_required("requested_by", &request.requested_by)?;
                validation::validate_payment_amount(request.amount)?;
                Ok(())
            }
            Mutation::DecideRefund(RefundDecision::Reject { reason, .. }) => {
                validation::validate_required("reason", reason)?;
                Ok(())
            }
            Mutation::DecideRefund(RefundDecision::Approve { reconciliation, .. }) => {
                validation::validate_non_negative("cash_returned", reconciliation.cash_returned)?;
                Ok(())
            }
        }
    }
}

// =============================================================================
// Queued Operation
// =============================================================================

/// An intended mutation waiting for confirmation by the authoritative store.
///
/// Operation content never changes after enqueue. Conflict resolution may
/// swap an operation for a replacement built with [`QueuedOperation::rebased`],
/// which keeps the id and queue position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueuedOperation {
    pub id: String,
    /// FIFO position. `0` until the durable queue assigns one.
    pub seq: i64,
    pub entity_id: String,
    pub mutation: Mutation,
    /// Entity version observed when the operation was captured. `0` = new.
    pub base_version: i64,
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    /// Builds a new operation with a fresh client-generated id.
    pub fn new(entity_id: impl Into<String>, mutation: Mutation, base_version: i64) -> Self {
        QueuedOperation {
            id: Uuid::new_v4().to_string(),
            seq: 0,
            entity_id: entity_id.into(),
            mutation,
            base_version,
            enqueued_at: Utc::now(),
        }
    }

    pub fn resource(&self) -> Resource {
        self.mutation.resource()
    }

    pub fn kind(&self) -> OperationKind {
        self.mutation.kind()
    }

    /// Checks that the operation is well formed.
    pub fn validate(&self) -> CoreResult<()> {
        validation::validate_required("entity_id", &self.entity_id)?;
        if self.base_version < 0 {
            return Err(ValidationError::OutOfRange {
                field: "base_version".into(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }
        self.mutation.validate()
    }

    /// Replacement for this operation after conflict resolution.
    ///
    /// Keeps id, seq and entity; swaps the payload and the version it is based on.
    pub fn rebased(&self, mutation: Mutation, base_version: i64) -> Self {
        QueuedOperation {
            id: self.id.clone(),
            seq: self.seq,
            entity_id: self.entity_id.clone(),
            mutation,
            base_version,
            enqueued_at: self.enqueued_at,
        }
    }
}

// =============================================================================
// Delivery Metadata
// =============================================================================

/// Delivery state of a queued operation.
///
/// `Rejected` operations stay in the queue until an operator requeues or
/// discards them; they hold their entity like a conflict does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum DeliveryState {
    Pending,
    Rejected,
}

/// A queued operation together with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueEntry {
    pub operation: QueuedOperation,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub state: DeliveryState,
}

impl QueueEntry {
    pub fn is_rejected(&self) -> bool {
        self.state == DeliveryState::Rejected
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    fn posting(total: i64, payments: &[(PaymentMode, i64)]) -> SalePosting {
        SalePosting {
            transaction_id: "TXN-0001".into(),
            total: Money::from_minor(total),
            discount: Money::zero(),
            customer_name: None,
            business_name: None,
            cashier_id: "cashier-1".into(),
            shift_id: None,
            items: vec![SaleLine {
                product_id: "p-1".into(),
                quantity: 2,
                unit_price: Money::from_minor(total / 2),
                price: Money::from_minor(total / 2),
                discount: Money::zero(),
                is_wholesale: false,
                total: Money::from_minor(total),
            }],
            payments: payments
                .iter()
                .map(|(mode, amount)| PaymentPosting {
                    mode: *mode,
                    amount: Money::from_minor(*amount),
                })
                .collect(),
        }
    }

    #[test]
    fn test_resource_and_kind_follow_mutation() {
        let op = QueuedOperation::new("s-1", Mutation::TransitionShift(ShiftTransition::Pause), 3);
        assert_eq!(op.resource(), Resource::Shifts);
        assert_eq!(op.kind(), OperationKind::Update);
        assert_eq!(Mutation::DeleteInventory.kind(), OperationKind::Delete);
        assert_eq!(
            Mutation::PostSale(posting(1000, &[(PaymentMode::Cash, 1000)])).resource(),
            Resource::Sales
        );
    }

    #[test]
    fn test_split_tender_reconciles() {
        let p = posting(10000, &[(PaymentMode::Cash, 4000), (PaymentMode::Pos, 6000)]);
        assert!(p.validate().is_ok());
        assert_eq!(p.paid_by(PaymentMode::Cash), Money::from_minor(4000));
        assert_eq!(p.paid_by(PaymentMode::Transfer), Money::zero());
    }

    #[test]
    fn test_payment_mismatch_rejected() {
        let p = posting(10000, &[(PaymentMode::Cash, 9000)]);
        assert!(p.validate().is_err());

        // One minor unit either way is tolerated
        let p = posting(10000, &[(PaymentMode::Cash, 9999)]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_overflowing_payments_fail_validation() {
        let p = posting(1000, &[(PaymentMode::Cash, i64::MAX), (PaymentMode::Pos, 1)]);
        assert!(matches!(
            p.validate(),
            Err(CoreError::Validation(ValidationError::InvalidFormat { .. }))
        ));
    }

    #[test]
    fn test_negative_discounts_and_prices_rejected() {
        let mut p = posting(1000, &[(PaymentMode::Cash, 1000)]);
        p.discount = Money::from_minor(-500);
        assert!(p.validate().is_err());

        let mut p = posting(1000, &[(PaymentMode::Cash, 1000)]);
        p.items[0].discount = Money::from_minor(-1);
        assert!(p.validate().is_err());

        let mut p = posting(1000, &[(PaymentMode::Cash, 1000)]);
        p.items[0].price = Money::from_minor(-500);
        assert!(p.validate().is_err());

        let mut p = posting(1000, &[(PaymentMode::Cash, 1000)]);
        p.items[0].unit_price = Money::from_minor(-500);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_reject_requires_reason() {
        let m = Mutation::DecideRefund(RefundDecision::Reject {
            reason: "  ".into(),
            rejected_by: "mgr".into(),
        });
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_payload_json_shape() {
        let m = Mutation::TransitionShift(ShiftTransition::Close {
            actual_cash_counted: Money::from_minor(150000),
            notes: None,
        });
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "transition_shift");
        assert_eq!(json["data"]["action"], "close");
        assert_eq!(json["data"]["actual_cash_counted"], 150000);

        let back: Mutation = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_rebased_keeps_identity() {
        let mut op = QueuedOperation::new("item-1", Mutation::DeleteInventory, 2);
        op.seq = 7;
        let replaced = op.rebased(Mutation::DeleteInventory, 5);
        assert_eq!(replaced.id, op.id);
        assert_eq!(replaced.seq, 7);
        assert_eq!(replaced.base_version, 5);
    }
}
