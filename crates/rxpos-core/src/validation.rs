//! # Validation Module
//!
//! Input validation for queued operations and postings.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Before enqueue (THIS MODULE)                                  │
//! │  ├── Shape checks: required fields, formats, positive amounts           │
//! │  └── Σ payments = total (± one minor unit)                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Authoritative store (rxpos-db, inside the transaction)        │
//! │  ├── Stock availability under the write lock                            │
//! │  ├── Transaction id uniqueness                                          │
//! │  └── State machine transitions                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite constraints                                            │
//! │  ├── CHECK (quantity >= 0)                                              │
//! │  └── UNIQUE / FOREIGN KEY                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::operation::PaymentPosting;
use crate::types::InventoryRecord;
use crate::{MAX_ITEM_QUANTITY, PAYMENT_EPSILON};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Rejects empty or whitespace-only values.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(())
}

/// Validates a sale transaction identifier.
///
/// ## Rules
/// - 3 to 64 characters
/// - Letters, digits, hyphens and underscores only
///
/// ```rust
/// use rxpos_core::validation::validate_transaction_id;
///
/// assert!(validate_transaction_id("TXN-20260131-0001").is_ok());
/// assert!(validate_transaction_id("ab").is_err());
/// assert!(validate_transaction_id("has space").is_err());
/// ```
pub fn validate_transaction_id(id: &str) -> ValidationResult<()> {
    if id.is_empty() {
        return Err(ValidationError::required("transaction_id"));
    }
    if id.len() < 3 {
        return Err(ValidationError::TooShort {
            field: "transaction_id".into(),
            min: 3,
        });
    }
    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "transaction_id".into(),
            max: 64,
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::invalid_format(
            "transaction_id",
            "must contain only letters, numbers, hyphens, and underscores",
        ));
    }
    Ok(())
}

/// Validates a SKU.
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();
    if sku.is_empty() {
        return Err(ValidationError::required("sku"));
    }
    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".into(),
            max: 50,
        });
    }
    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::invalid_format(
            "sku",
            "must contain only letters, numbers, hyphens, and underscores",
        ));
    }
    Ok(())
}

/// Validates a product name (1-200 characters).
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::required("name"));
    }
    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".into(),
            max: 200,
        });
    }
    Ok(())
}

/// Validates a UUID string.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    validate_required(field, id)?;
    uuid::Uuid::parse_str(id)
        .map_err(|_| ValidationError::invalid_format(field, "must be a valid UUID"))?;
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a sold quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".into(),
        });
    }
    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".into(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }
    Ok(())
}

/// Rejects negative amounts. Zero is allowed.
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: field.into(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Payment and refund amounts must be strictly positive.
pub fn validate_payment_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".into(),
        });
    }
    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates a multi-tender payment set against the sale total.
///
/// ## Rules
/// - At least one payment
/// - Every amount > 0
/// - |Σ amounts − total| ≤ one minor unit
pub fn validate_payments(total: Money, payments: &[PaymentPosting]) -> ValidationResult<()> {
    if payments.is_empty() {
        return Err(ValidationError::required("payments"));
    }
    for payment in payments {
        validate_payment_amount(payment.amount)?;
    }
    let paid = Money::checked_sum(payments.iter().map(|p| p.amount)).ok_or_else(|| {
        ValidationError::invalid_format("payments", "sum of payment amounts is too large")
    })?;
    if !paid.within(total, PAYMENT_EPSILON) {
        return Err(ValidationError::invalid_format(
            "payments",
            format!("sum {} does not match total {}", paid, total),
        ));
    }
    Ok(())
}

/// Validates an inventory record before it is queued.
pub fn validate_inventory_record(record: &InventoryRecord) -> crate::error::CoreResult<()> {
    validate_product_name(&record.name)?;
    validate_sku(&record.sku)?;
    if record.quantity < 0 {
        return Err(ValidationError::OutOfRange {
            field: "quantity".into(),
            min: 0,
            max: i64::MAX,
        }
        .into());
    }
    if record.reorder_level < 0 {
        return Err(ValidationError::OutOfRange {
            field: "reorder_level".into(),
            min: 0,
            max: i64::MAX,
        }
        .into());
    }
    validate_non_negative("cost_price", record.cost_price)?;
    validate_non_negative("sell_price", record.sell_price)?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentMode;

    fn pay(mode: PaymentMode, amount: i64) -> PaymentPosting {
        PaymentPosting {
            mode,
            amount: Money::from_minor(amount),
        }
    }

    #[test]
    fn test_validate_transaction_id() {
        assert!(validate_transaction_id("TXN-1").is_ok());
        assert!(validate_transaction_id("pos_2026_01_31_0001").is_ok());

        assert!(validate_transaction_id("").is_err());
        assert!(validate_transaction_id("ab").is_err());
        assert!(validate_transaction_id("TXN 1").is_err());
        assert!(validate_transaction_id(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-3).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_payments() {
        let total = Money::from_minor(50000);
        assert!(validate_payments(total, &[pay(PaymentMode::Cash, 50000)]).is_ok());
        assert!(validate_payments(
            total,
            &[pay(PaymentMode::Cash, 20000), pay(PaymentMode::Transfer, 30001)]
        )
        .is_ok());

        assert!(validate_payments(total, &[]).is_err());
        assert!(validate_payments(total, &[pay(PaymentMode::Pos, 49000)]).is_err());
        assert!(validate_payments(
            total,
            &[pay(PaymentMode::Cash, 50000), pay(PaymentMode::Pos, 0)]
        )
        .is_err());
    }

    #[test]
    fn test_overflowing_payment_sum_is_a_validation_error() {
        let err = validate_payments(
            Money::from_minor(1),
            &[pay(PaymentMode::Cash, i64::MAX), pay(PaymentMode::Pos, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFormat { ref field, .. } if field == "payments"));
    }

    #[test]
    fn test_validate_inventory_record() {
        let mut record = InventoryRecord {
            name: "Ibuprofen 200mg".into(),
            sku: "IBU-200".into(),
            quantity: 40,
            reorder_level: 10,
            cost_price: Money::from_minor(150),
            sell_price: Money::from_minor(250),
            batch_number: None,
            expiry_date: None,
        };
        assert!(validate_inventory_record(&record).is_ok());

        record.quantity = -1;
        assert!(validate_inventory_record(&record).is_err());

        record.quantity = 1;
        record.sku = "bad sku".into();
        assert!(validate_inventory_record(&record).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("id", "not-a-uuid").is_err());
    }
}
