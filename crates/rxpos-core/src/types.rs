//! # Domain Types
//!
//! Core domain types used throughout rxpos.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │  InventoryItem  │   │      Sale       │   │    Payment      │        │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │        │
//! │  │  quantity ≥ 0   │   │  transaction_id │   │  sale_id (FK)   │        │
//! │  │  cost / sell    │   │  total, profit  │   │  mode           │        │
//! │  │  batch, expiry  │   │  shift_id       │   │  amount         │        │
//! │  └────────┬────────┘   └────────┬────────┘   └─────────────────┘        │
//! │           │                     │                                        │
//! │  ┌────────▼────────┐   ┌────────▼────────┐   ┌─────────────────┐        │
//! │  │  StockMovement  │   │    SaleItem     │   │     Shift       │        │
//! │  │  (append-only)  │   │  cost snapshot  │   │  expected totals│        │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘        │
//! │                                                                         │
//! │  ┌─────────────────┐                                                     │
//! │  │     Refund      │  pending → approved | rejected                     │
//! │  └─────────────────┘                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Versioning
//! Every entity the sync engine can touch carries `version` (bumped by one on
//! each authoritative write, `0` means never written) and `last_operation_id`
//! (the queued operation that produced the current version).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Inventory
// =============================================================================

/// A stocked product (drug, consumable, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    pub sku: String,
    /// Units on hand. Never negative.
    pub quantity: i64,
    pub reorder_level: i64,
    pub cost_price: Money,
    pub sell_price: Money,
    pub batch_number: Option<String>,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
    /// Soft delete flag.
    pub is_active: bool,
    pub version: i64,
    pub last_operation_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Returns the operator-editable part of the item.
    pub fn record(&self) -> InventoryRecord {
        InventoryRecord {
            name: self.name.clone(),
            sku: self.sku.clone(),
            quantity: self.quantity,
            reorder_level: self.reorder_level,
            cost_price: self.cost_price,
            sell_price: self.sell_price,
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
        }
    }

    /// True when stock is at or below the reorder level.
    pub fn needs_reorder(&self) -> bool {
        self.quantity <= self.reorder_level
    }

    /// True when the batch has expired on `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d < today).unwrap_or(false)
    }
}

/// Whole-record payload for inventory create/update operations.
///
/// The field set is fixed so conflict diffs and merges are checked
/// field by field at compile time (see [`crate::conflict`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryRecord {
    pub name: String,
    pub sku: String,
    pub quantity: i64,
    pub reorder_level: i64,
    pub cost_price: Money,
    pub sell_price: Money,
    pub batch_number: Option<String>,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Cause of a single inventory quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum MovementType {
    Sale,
    Addition,
    Adjustment,
    Return,
    Initial,
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MovementType::Sale => "SALE",
            MovementType::Addition => "ADDITION",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Return => "RETURN",
            MovementType::Initial => "INITIAL",
        };
        f.write_str(s)
    }
}

/// Immutable ledger entry for one quantity change.
///
/// `new_quantity == previous_quantity + delta` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub item_id: String,
    pub movement_type: MovementType,
    pub delta: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    /// Sell price snapshot.
    pub unit_price: Money,
    /// Cost price snapshot.
    pub unit_cost: Money,
    /// Sale id, operation id, or free text.
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment Mode
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PaymentMode {
    Cash,
    /// Card terminal.
    Pos,
    /// Bank transfer.
    Transfer,
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Pos => "pos",
            PaymentMode::Transfer => "transfer",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A posted sale header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub transaction_id: String,
    pub total: Money,
    pub discount: Money,
    /// total − Σ(cost × quantity), fixed at posting time.
    pub profit: Money,
    pub customer_name: Option<String>,
    pub business_name: Option<String>,
    pub cashier_id: String,
    pub shift_id: Option<String>,
    pub version: i64,
    pub last_operation_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A line item in a sale, frozen at posting time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub name_snapshot: String,
    pub quantity: i64,
    /// Catalog unit price.
    pub unit_price: Money,
    /// Price actually charged per unit.
    pub price: Money,
    /// Cost price at time of sale.
    pub cost_price: Money,
    pub discount: Money,
    pub is_wholesale: bool,
    pub total: Money,
}

impl SaleItem {
    /// Cost of goods for this line.
    pub fn line_cost(&self) -> Money {
        self.cost_price.multiply_quantity(self.quantity)
    }
}

/// One tender posting towards a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub sale_id: String,
    pub mode: PaymentMode,
    pub amount: Money,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Sale header together with its lines and payments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleDetail {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub payments: Vec<Payment>,
}

// =============================================================================
// Shift
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ShiftStatus {
    Active,
    Paused,
    Closed,
}

impl fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShiftStatus::Active => "active",
            ShiftStatus::Paused => "paused",
            ShiftStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A cashier duty session.
///
/// ## State Machine
/// ```text
///   (none) ──open──► Active ◄──resume── Paused
///                      │ └────pause────►  │
///                      │                  │
///                      └──close──► Closed ◄┘
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Shift {
    pub id: String,
    pub cashier_id: String,
    pub status: ShiftStatus,
    pub opening_cash: Money,
    pub expected_cash_total: Money,
    pub expected_pos_total: Money,
    pub expected_transfer_total: Money,
    pub actual_cash_counted: Option<Money>,
    pub variance: Option<Money>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub ended_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub last_operation_id: Option<String>,
}

// =============================================================================
// Refund
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
}

impl RefundStatus {
    /// Pending and approved refunds block a second request for the same sale.
    pub fn is_active(&self) -> bool {
        matches!(self, RefundStatus::Pending | RefundStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RefundStatus::Approved | RefundStatus::Rejected)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Register figures captured when cash is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashReconciliation {
    pub cash_returned: Money,
    pub register_balance_before: Money,
    pub register_balance_after: Money,
}

/// A refund against a posted sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Refund {
    pub id: String,
    pub sale_id: String,
    pub amount: Money,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub requested_by: String,
    pub decided_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub cash_returned: Option<Money>,
    pub register_balance_before: Option<Money>,
    pub register_balance_after: Option<Money>,
    pub variance: Option<Money>,
    pub variance_flagged: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub decided_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub last_operation_id: Option<String>,
}

impl Refund {
    /// Returns the reconciliation triple once approved.
    pub fn reconciliation(&self) -> Option<CashReconciliation> {
        Some(CashReconciliation {
            cash_returned: self.cash_returned?,
            register_balance_before: self.register_balance_before?,
            register_balance_after: self.register_balance_after?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i64, reorder_level: i64) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            id: "item-1".into(),
            name: "Paracetamol 500mg".into(),
            sku: "PCM-500".into(),
            quantity,
            reorder_level,
            cost_price: Money::from_minor(300),
            sell_price: Money::from_minor(500),
            batch_number: Some("B-17".into()),
            expiry_date: NaiveDate::from_ymd_opt(2027, 1, 31),
            is_active: true,
            version: 1,
            last_operation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reorder_and_expiry() {
        assert!(item(5, 10).needs_reorder());
        assert!(item(10, 10).needs_reorder());
        assert!(!item(11, 10).needs_reorder());

        let it = item(5, 1);
        assert!(!it.is_expired(NaiveDate::from_ymd_opt(2027, 1, 31).unwrap()));
        assert!(it.is_expired(NaiveDate::from_ymd_opt(2027, 2, 1).unwrap()));
    }

    #[test]
    fn test_record_projection() {
        let it = item(8, 2);
        let record = it.record();
        assert_eq!(record.quantity, 8);
        assert_eq!(record.sku, "PCM-500");
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_string(&MovementType::Sale).unwrap(), "\"SALE\"");
        assert_eq!(serde_json::to_string(&PaymentMode::Pos).unwrap(), "\"pos\"");
        assert_eq!(serde_json::to_string(&ShiftStatus::Paused).unwrap(), "\"paused\"");
        assert!(RefundStatus::Approved.is_active());
        assert!(!RefundStatus::Rejected.is_active());
        assert!(!RefundStatus::Pending.is_terminal());
    }
}
