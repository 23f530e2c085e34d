//! # rxpos-sync: Offline-First Sync Engine for rxpos
//!
//! Accepts every POS mutation while the backend is unreachable, keeps it in a
//! durable queue and replays it later under optimistic concurrency.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  OfflineClient (screens call this)        SaleSession (cart)     │  │
//! │  │  policy check → local check → enqueue → drain if online          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   SyncEngine   │  │ ConflictResolver│ │      SyncAgent         │    │
//! │  │                │  │                │  │                        │    │
//! │  │ FIFO drain,    │  │ local / server │  │ drains on reconnect,   │    │
//! │  │ version check, │  │ / merge, then  │  │ timer, manual trigger; │    │
//! │  │ rebase map     │  │ resume drain   │  │ backoff + alerts       │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌────────────────┐  ┌────────────────┐                                │
//! │  │ dyn RemoteStore│  │  Connectivity  │                                │
//! │  │ (StoreRemote)  │  │  watch<bool>   │                                │
//! │  └────────────────┘  └────────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`client`] - `OfflineClient` facade over queue, engine and cache
//! - [`session`] - Checkpointed sale cart
//! - [`engine`] - Queue drain with optimistic concurrency
//! - [`resolver`] - Operator conflict resolution
//! - [`remote`] - `RemoteStore` seam and the database-backed implementation
//! - [`connectivity`] - Online/offline signal
//! - [`agent`] - Background drain scheduling and status events
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rxpos_db::{Database, DbConfig};
//! use rxpos_sync::{Connectivity, OfflineClient, StoreRemote, SyncAgent, SyncConfig, SyncEngine};
//!
//! rxpos_sync::init_tracing();
//! let config = SyncConfig::load_or_default(None);
//!
//! let local = Database::new(DbConfig::new("till.db")).await?;
//! let backend = Database::new(DbConfig::new("backend.db")).await?;
//! let link = Connectivity::online();
//!
//! let remote = StoreRemote::new(backend).with_refund_tolerance(config.refund_tolerance());
//! let engine = Arc::new(
//!     SyncEngine::new(local, Arc::new(remote), link.clone()).with_batch_size(config.sync.batch_size),
//! );
//!
//! let client = OfflineClient::new(engine.clone()).with_refund_tolerance(config.refund_tolerance());
//! let mut agent = SyncAgent::new(config, engine);
//! let handle = agent.start().await?;
//!
//! // network monitor
//! link.set_online(false);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod remote;
pub mod resolver;
pub mod session;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncAgentHandle, SyncEventEmitter, SyncStatus};
pub use client::{OfflineClient, Submission};
pub use config::{SyncConfig, SyncMode};
pub use connectivity::Connectivity;
pub use engine::{DrainReport, DrainedOperation, OperationOutcome, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use remote::{RemoteStore, StoreRemote};
pub use resolver::{ConflictResolver, ResolutionReport};
pub use session::SaleSession;

/// Installs a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
