//! # Error Types
//!
//! Domain-specific error types for rxpos-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  rxpos-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule violations                        │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  rxpos-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  rxpos-sync errors (separate crate)                                     │
//! │  └── SyncError        - Queue / transport / conflict outcomes           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → Caller       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product name, shortfall, variance)
//! 3. Errors are enum variants, never String

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations. Each carries enough
/// context for the operator to act on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Entity cannot be found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Insufficient stock to complete a sale.
    ///
    /// ## User Workflow
    /// ```text
    /// Post sale (Amoxicillin × 10)
    ///      │
    ///      ▼
    /// Read stock under write lock: available = 7
    ///      │
    ///      ▼
    /// InsufficientStock { name: "Amoxicillin 500mg", available: 7, requested: 10 }
    ///      │
    ///      ▼
    /// Whole sale rolled back, operator sees shortfall of 3
    /// ```
    #[error("Insufficient stock for {name}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        name: String,
        available: i64,
        requested: i64,
    },

    /// A state machine transition that is not allowed from the current state.
    #[error("Cannot {action} {entity} while it is {from}")]
    InvalidTransition {
        entity: String,
        from: String,
        action: String,
    },

    /// Σ payments does not reconcile with the sale total.
    #[error("Payments total {paid} does not match sale total {total}")]
    PaymentMismatch { total: Money, paid: Money },

    /// Closing a shift with a nonzero variance requires a justification note.
    #[error("Cash variance of {variance} requires a note")]
    VarianceNoteRequired { variance: Money },

    /// A sale already has a pending or approved refund.
    #[error("Sale {sale_id} already has an active refund")]
    ActiveRefundExists { sale_id: String },

    /// Refund amount exceeds the original sale total.
    #[error("Refund amount {amount} exceeds sale total {sale_total}")]
    RefundExceedsSale { amount: Money, sale_total: Money },

    /// Actor lacks the role needed for an action.
    #[error("Role {role} is not allowed to {action}")]
    Permission { role: String, action: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidTransition error.
    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl std::fmt::Display,
        action: impl Into<String>,
    ) -> Self {
        CoreError::InvalidTransition {
            entity: entity.into(),
            from: from.to_string(),
            action: action.into(),
        }
    }

    /// Returns true for input problems rejected before any durable effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::PaymentMismatch { .. }
                | CoreError::VarianceNoteRequired { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used for early validation before business logic runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid transaction id).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value.
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_names_product() {
        let err = CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            name: "Amoxicillin 500mg".to_string(),
            available: 7,
            requested: 10,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Amoxicillin 500mg: available 7, requested 10"
        );
    }

    #[test]
    fn test_variance_message_carries_amount() {
        let err = CoreError::VarianceNoteRequired {
            variance: Money::from_minor(-250),
        };
        assert_eq!(err.to_string(), "Cash variance of -2.50 requires a note");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("reason").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert!(core_err.is_validation());
        assert_eq!(core_err.to_string(), "Validation error: reason is required");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = CoreError::invalid_transition("shift", "closed", "pause");
        assert_eq!(err.to_string(), "Cannot pause shift while it is closed");
        assert!(!err.is_validation());
    }
}
