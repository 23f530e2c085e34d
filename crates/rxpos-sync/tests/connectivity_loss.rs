//! A drain that loses the link mid-way keeps everything it did not confirm.

mod common;

use std::sync::Arc;

use common::{backend, stock, terminal_with_remote, FlakyRemote};
use rxpos_core::{Actor, Role};
use rxpos_db::{Database, DbConfig};
use rxpos_sync::{Connectivity, OperationOutcome, StoreRemote};

#[tokio::test]
async fn transport_failure_mid_drain_leaves_rest_queued() {
    let store = backend().await;
    let local = Database::new(DbConfig::in_memory()).await.unwrap();
    let link = Connectivity::offline();
    let remote = Arc::new(FlakyRemote::new(StoreRemote::new(store.clone()), 2));
    let till = terminal_with_remote(local.clone(), remote.clone(), link.clone());
    let pharmacist = Actor::new("pharm-1", Role::Pharmacist);

    let mut ids = Vec::new();
    for (name, sku) in [
        ("Metronidazole 400mg", "MTZ-400"),
        ("Ciprofloxacin 500mg", "CIP-500"),
        ("Azithromycin 250mg", "AZI-250"),
        ("Doxycycline 100mg", "DOX-100"),
    ] {
        let submitted = till
            .client
            .create_inventory(&pharmacist, stock(name, sku, 40, 90))
            .await
            .unwrap();
        ids.push(submitted);
    }

    link.set_online(true);
    let report = till.client.sync_now().await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.applied, 2);
    assert_eq!(report.outcome_for(&ids[2].operation_id), Some(&OperationOutcome::Queued));
    assert!(report.outcome_for(&ids[3].operation_id).is_none());

    // Only confirmed operations left the queue
    let pending = local.queue().pending(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].operation.id, ids[2].operation_id);
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("connection reset"));
    assert!(store.inventory().get_by_id(&ids[2].entity_id).await.unwrap().is_none());

    remote.heal();
    let report = till.client.sync_now().await.unwrap();
    assert!(!report.interrupted);
    assert_eq!(report.applied, 2);
    assert_eq!(local.queue().count_pending().await.unwrap(), 0);
    assert_eq!(store.inventory().count().await.unwrap(), 4);
}

#[tokio::test]
async fn signal_dropping_offline_stops_before_next_operation() {
    let store = backend().await;
    let local = Database::new(DbConfig::in_memory()).await.unwrap();
    let link = Connectivity::online();
    let remote = Arc::new(StoreRemote::new(store.clone()));
    let till = terminal_with_remote(local.clone(), remote, link.clone());
    let pharmacist = Actor::new("pharm-1", Role::Pharmacist);

    link.set_online(false);
    till.client
        .create_inventory(&pharmacist, stock("Gliclazide 80mg", "GLZ-80", 25, 70))
        .await
        .unwrap();

    // Offline: a manual sync is a no-op, nothing is lost
    let report = till.client.sync_now().await.unwrap();
    assert!(report.interrupted);
    assert!(report.outcomes.is_empty());
    assert_eq!(local.queue().count_pending().await.unwrap(), 1);

    link.set_online(true);
    assert_eq!(till.client.sync_now().await.unwrap().applied, 1);
}
