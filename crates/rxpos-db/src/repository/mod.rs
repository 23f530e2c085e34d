//! # Repository Module
//!
//! One repository per table family. Each holds a clone of the pool.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Authoritative store                 Client durable state               │
//! │  ───────────────────                 ────────────────────               │
//! │  InventoryRepository  inventory      OperationQueueRepository  queue    │
//! │  SaleRepository       sales          ConflictRepository        conflict │
//! │  ShiftRepository      shifts         EntityCacheRepository     cache    │
//! │  RefundRepository     refunds        RebaseRepository          rebase   │
//! │                                      DraftRepository           drafts   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Authoritative writes take an `expected_version` and an optional
//! `operation_id`; a version mismatch is reported as
//! [`DbError::StaleVersion`](crate::DbError::StaleVersion), never applied.

pub mod cache;
pub mod conflict;
pub mod draft;
pub mod inventory;
pub mod queue;
pub mod rebase;
pub mod refund;
pub mod sale;
pub mod shift;
