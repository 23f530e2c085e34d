//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rxpos_core::{
    InventoryRecord, Money, PaymentMode, PaymentPosting, QueuedOperation, RemoteRecord, Resource,
    SaleLine, SalePosting,
};
use rxpos_db::{Database, DbConfig};
use rxpos_sync::{Connectivity, OfflineClient, RemoteStore, StoreRemote, SyncEngine, SyncError, SyncResult};

/// One till: its own local store and connectivity, sharing the backend.
pub struct Terminal {
    pub local: Database,
    pub link: Connectivity,
    pub engine: Arc<SyncEngine>,
    pub client: OfflineClient,
}

pub async fn backend() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub async fn terminal(backend: &Database) -> Terminal {
    let local = Database::new(DbConfig::in_memory()).await.unwrap();
    terminal_with_store(backend, local).await
}

pub async fn terminal_with_store(backend: &Database, local: Database) -> Terminal {
    let link = Connectivity::online();
    let remote = StoreRemote::new(backend.clone()).with_link(link.clone());
    terminal_with_remote(local, Arc::new(remote), link)
}

pub fn terminal_with_remote(local: Database, remote: Arc<dyn RemoteStore>, link: Connectivity) -> Terminal {
    let engine = Arc::new(SyncEngine::new(local.clone(), remote, link.clone()));
    Terminal {
        client: OfflineClient::new(engine.clone()),
        local,
        link,
        engine,
    }
}

pub fn stock(name: &str, sku: &str, quantity: i64, sell_minor: i64) -> InventoryRecord {
    InventoryRecord {
        name: name.into(),
        sku: sku.into(),
        quantity,
        reorder_level: 10,
        cost_price: Money::from_minor(sell_minor / 2),
        sell_price: Money::from_minor(sell_minor),
        batch_number: Some("LOT-0424".into()),
        expiry_date: None,
    }
}

/// Single-line sale paid in one tender.
pub fn sale(
    transaction_id: &str,
    product_id: &str,
    quantity: i64,
    unit_minor: i64,
    mode: PaymentMode,
    shift_id: Option<&str>,
) -> SalePosting {
    let unit = Money::from_minor(unit_minor);
    let total = unit.multiply_quantity(quantity);
    SalePosting {
        transaction_id: transaction_id.into(),
        total,
        discount: Money::zero(),
        customer_name: None,
        business_name: None,
        cashier_id: "cashier-1".into(),
        shift_id: shift_id.map(str::to_string),
        items: vec![SaleLine {
            product_id: product_id.into(),
            quantity,
            unit_price: unit,
            price: unit,
            discount: Money::zero(),
            is_wholesale: false,
            total,
        }],
        payments: vec![PaymentPosting { mode, amount: total }],
    }
}

/// Passes calls through until `applies_before_failure` applies have
/// succeeded, then behaves like a dropped link.
pub struct FlakyRemote {
    inner: StoreRemote,
    applies_before_failure: usize,
    applied: AtomicUsize,
}

impl FlakyRemote {
    pub fn new(inner: StoreRemote, applies_before_failure: usize) -> Self {
        FlakyRemote {
            inner,
            applies_before_failure,
            applied: AtomicUsize::new(0),
        }
    }

    /// Lets the link carry traffic again.
    pub fn heal(&self) {
        self.applied.store(0, Ordering::SeqCst);
    }

    fn is_down(&self) -> bool {
        self.applied.load(Ordering::SeqCst) >= self.applies_before_failure
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn fetch(&self, resource: Resource, entity_id: &str) -> SyncResult<Option<RemoteRecord>> {
        if self.is_down() {
            return Err(SyncError::Transport("connection reset by peer".into()));
        }
        self.inner.fetch(resource, entity_id).await
    }

    async fn apply(&self, operation: &QueuedOperation, expected_version: i64) -> SyncResult<RemoteRecord> {
        if self.is_down() {
            return Err(SyncError::Transport("connection reset by peer".into()));
        }
        let record = self.inner.apply(operation, expected_version).await?;
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }
}
