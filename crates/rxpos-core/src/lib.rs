//! # rxpos-core: Pure Domain Logic for rxpos
//!
//! Everything the offline-first mutation layer decides without touching a
//! database or the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          rxpos Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 rxpos-sync (offline-first engine)               │   │
//! │  │   OfflineClient ──► OperationQueue ──► SyncEngine ──► Resolver  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ rxpos-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐ ┌───────────┐ ┌────────────┐ ┌──────────────┐  │   │
//! │  │   │   types   │ │ operation │ │  conflict  │ │reconciliation│  │   │
//! │  │   │ Inventory │ │ Mutation  │ │ FieldDiff  │ │ variance     │  │   │
//! │  │   │ Sale Shift│ │ Queued Op │ │ merge      │ │ shift/refund │  │   │
//! │  │   └───────────┘ └───────────┘ └────────────┘ └──────────────┘  │   │
//! │  │   money • validation • auth • cart                              │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 rxpos-db (SQLite persistence)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain entities (InventoryItem, Sale, Shift, Refund, ...)
//! - [`operation`] - Queued operations and their typed payloads
//! - [`conflict`] - Stale-version conflicts, field diffs, merge
//! - [`reconciliation`] - Cash variance and the shift / refund state machines
//! - [`money`] - Integer minor-unit money
//! - [`validation`] - Input checks run before enqueue
//! - [`auth`] - Roles and the access policy seam
//! - [`cart`] - Session-scoped sale draft
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use rxpos_core::reconciliation::shift_variance;
//! use rxpos_core::Money;
//!
//! // Opening 1000 + cash sales 500, counted 1500: balanced drawer
//! let variance = shift_variance(
//!     Money::from_minor(1000),
//!     Money::from_minor(500),
//!     Money::from_minor(1500),
//! );
//! assert!(variance.is_zero());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod cart;
pub mod conflict;
pub mod error;
pub mod money;
pub mod operation;
pub mod reconciliation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use auth::{AccessPolicy, Action, Actor, Role, RolePolicy};
pub use cart::{DraftLine, DraftTotals, SaleDraft};
pub use conflict::{FieldDiff, InventoryField, RemoteRecord, Resolution, SyncConflict};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use operation::{
    DeliveryState, Mutation, OperationKind, PaymentPosting, PostedSale, QueueEntry,
    QueuedOperation, RefundDecision, RefundRequest, Resource, SaleLine, SalePosting,
    ShiftOpening, ShiftTransition,
};
pub use reconciliation::{VarianceReport, VarianceStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines in one sale draft.
pub const MAX_DRAFT_LINES: usize = 100;

/// Maximum quantity of a single product in one sale.
///
/// Catches a mistyped quantity at the counter.
pub const MAX_ITEM_QUANTITY: i64 = 10_000;

/// Allowed gap between Σ payments and the sale total.
pub const PAYMENT_EPSILON: Money = Money::from_minor(1);

/// Default refund variance tolerance before an approval is flagged.
pub const DEFAULT_REFUND_TOLERANCE: Money = Money::from_minor(1);
