//! # rxpos-db: Database Layer for rxpos
//!
//! SQLite persistence for both sides of the offline mutation layer.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        rxpos Data Flow                                  │
//! │                                                                         │
//! │  OfflineClient (rxpos-sync)                                             │
//! │       │ enqueue / cache / drafts            SyncEngine drain            │
//! │       ▼                                          │                      │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                     rxpos-db (THIS CRATE)                       │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐    │    │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │    │    │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │    │    │
//! │  │   │               │    │ Inventory     │    │ 001_initial  │    │    │
//! │  │   │ SqlitePool    │◄───│ Sale, Shift   │    │ 002_offline  │    │    │
//! │  │   │ WAL, FK on    │    │ Refund, Queue │    │              │    │    │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘    │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rxpos_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/rxpos.db")).await?;
//! let posted = db.sales().post_sale(&sale_id, &posting, None).await?;
//! let pending = db.queue().count_pending().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig};

pub use repository::cache::EntityCacheRepository;
pub use repository::conflict::ConflictRepository;
pub use repository::draft::DraftRepository;
pub use repository::inventory::InventoryRepository;
pub use repository::queue::OperationQueueRepository;
pub use repository::rebase::RebaseRepository;
pub use repository::refund::RefundRepository;
pub use repository::sale::SaleRepository;
pub use repository::shift::{ShiftRepository, ShiftSummary};
