//! # Sync Error Types
//!
//! Error types for the offline queue, the drain and conflict resolution.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Remote outcome      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  StaleVersion           │ │
//! │  │  MissingDeviceId│  │  Timeout        │  │  Rejected               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Local store    │  │   Domain        │  │      Resolution         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  Validation     │  │  ConflictNotFound       │ │
//! │  │                 │  │  Permission     │  │  OperationNotFound      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport errors never reach the operator as failures of a mutation: the
//! operation stays queued and the next trigger retries it. Local store errors
//! are hard errors, because an operation that cannot be persisted was never
//! accepted.

use rxpos_core::{CoreError, Resource};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required for sync).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The remote store could not be reached or did not answer.
    #[error("Remote store unreachable: {0}")]
    Transport(String),

    /// Remote call timed out.
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Remote Outcomes
    // =========================================================================
    /// The remote record moved past the version the operation was based on.
    #[error("{resource} {entity_id} is at version {actual}, operation expected {expected}")]
    StaleVersion {
        resource: Resource,
        entity_id: String,
        expected: i64,
        actual: i64,
    },

    /// The remote refused the operation for a business reason.
    #[error("Rejected by remote store: {0}")]
    Rejected(String),

    // =========================================================================
    // Domain Errors (validation, permission, state machines)
    // =========================================================================
    #[error(transparent)]
    Domain(#[from] CoreError),

    // =========================================================================
    // Local Store Errors
    // =========================================================================
    /// Local durable store failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Resolution Errors
    // =========================================================================
    /// No outstanding conflict for the entity.
    #[error("No conflict pending for {resource} {entity_id}")]
    ConflictNotFound { resource: Resource, entity_id: String },

    /// No queued operation with this id.
    #[error("Queued operation not found: {0}")]
    OperationNotFound(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<rxpos_db::DbError> for SyncError {
    fn from(err: rxpos_db::DbError) -> Self {
        match err {
            rxpos_db::DbError::Domain(core) => SyncError::Domain(core),
            other => SyncError::DatabaseError(other.to_string()),
        }
    }
}

impl From<rxpos_core::ValidationError> for SyncError {
    fn from(err: rxpos_core::ValidationError) -> Self {
        SyncError::Domain(CoreError::Validation(err))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for drain and retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the remote could not be reached and the operation
    /// should stay queued for the next trigger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout(_))
    }

    /// Returns true if the remote refused the operation for a business
    /// reason (stock, state machine, validation on the remote side).
    pub fn is_business_rejection(&self) -> bool {
        matches!(self, SyncError::Rejected(_))
    }

    /// Returns true for the optimistic-concurrency mismatch.
    pub fn is_stale(&self) -> bool {
        matches!(self, SyncError::StaleVersion { .. })
    }

    /// Returns true if the actor lacks the role for the action.
    pub fn is_permission(&self) -> bool {
        matches!(self, SyncError::Domain(CoreError::Permission { .. }))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxpos_db::DbError;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Transport("connection refused".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
        assert!(!SyncError::Rejected("insufficient stock".into()).is_retryable());
    }

    #[test]
    fn test_domain_errors_pass_through_db_layer() {
        let err: SyncError = DbError::Domain(CoreError::Permission {
            role: "cashier".into(),
            action: "approve refunds".into(),
        })
        .into();
        assert!(err.is_permission());

        let err: SyncError = DbError::QueryFailed("disk I/O error".into()).into();
        assert!(matches!(err, SyncError::DatabaseError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::StaleVersion {
            resource: Resource::Inventory,
            entity_id: "abc-123".into(),
            expected: 1,
            actual: 2,
        };
        assert!(err.to_string().contains("inventory"));
        assert!(err.to_string().contains("abc-123"));
        assert!(err.is_stale());
    }
}
