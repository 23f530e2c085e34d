//! End-to-end counter flows: shifts, sales and refunds through the client.

mod common;

use common::{backend, sale, stock, terminal};
use rxpos_core::{Actor, CashReconciliation, CoreError, Money, PaymentMode, RefundStatus, Role, ShiftStatus};
use rxpos_sync::{OperationOutcome, SyncError};

fn cashier() -> Actor {
    Actor::new("cashier-1", Role::Cashier)
}

fn pharmacist() -> Actor {
    Actor::new("pharm-1", Role::Pharmacist)
}

fn manager() -> Actor {
    Actor::new("mgr-1", Role::Manager)
}

#[tokio::test]
async fn balanced_drawer_closes_without_note() {
    let store = backend().await;
    let till = terminal(&store).await;

    let item = till
        .client
        .create_inventory(&pharmacist(), stock("Amlodipine 5mg", "AML-5", 100, 250))
        .await
        .unwrap();
    let shift = till.client.open_shift(&cashier(), Money::from_minor(1000)).await.unwrap();
    assert!(shift.is_applied());

    let sold = till
        .client
        .post_sale(
            &cashier(),
            sale("TXN-AML-0001", &item.entity_id, 2, 250, PaymentMode::Cash, Some(&shift.entity_id)),
        )
        .await
        .unwrap();
    assert!(sold.is_applied());

    let closed = till
        .client
        .close_shift(&cashier(), &shift.entity_id, Money::from_minor(1500), None)
        .await
        .unwrap();
    assert!(closed.is_applied());

    let summary = store.shifts().summary(&shift.entity_id).await.unwrap();
    assert_eq!(summary.shift.status, ShiftStatus::Closed);
    assert_eq!(summary.shift.variance, Some(Money::zero()));
    assert_eq!(summary.shift.expected_cash_total, Money::from_minor(500));
}

#[tokio::test]
async fn oversold_sale_is_rejected_without_side_effects() {
    let store = backend().await;
    let till = terminal(&store).await;

    let item = till
        .client
        .create_inventory(&pharmacist(), stock("Ciprofloxacin 500mg", "CIP-500", 7, 300))
        .await
        .unwrap();

    let submitted = till
        .client
        .post_sale(&cashier(), sale("TXN-CIP-0001", &item.entity_id, 10, 300, PaymentMode::Pos, None))
        .await
        .unwrap();

    match &submitted.outcome {
        OperationOutcome::Rejected { reason } => assert!(reason.contains("Ciprofloxacin 500mg")),
        other => panic!("expected rejection, got {:?}", other),
    }

    let stocked = store.inventory().get_by_id(&item.entity_id).await.unwrap().unwrap();
    assert_eq!(stocked.quantity, 7);
    assert!(store.sales().get_by_transaction_id("TXN-CIP-0001").await.unwrap().is_none());

    // Kept for review, not silently dropped
    let rejected = till.local.queue().rejected().await.unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].operation.id, submitted.operation_id);
}

#[tokio::test]
async fn payment_mismatch_is_refused_before_enqueue() {
    let store = backend().await;
    let till = terminal(&store).await;

    let mut posting = sale("TXN-PAY-0001", "any-product", 1, 400, PaymentMode::Cash, None);
    posting.payments[0].amount = Money::from_minor(398);

    let err = till.client.post_sale(&cashier(), posting).await.unwrap_err();
    assert!(matches!(err, SyncError::Domain(CoreError::Validation(_))));
    assert_eq!(till.local.queue().count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn same_transaction_from_two_tills_posts_once() {
    let store = backend().await;
    let till_a = terminal(&store).await;
    let till_b = terminal(&store).await;

    let item = till_a
        .client
        .create_inventory(&pharmacist(), stock("ORS Sachet", "ORS-1", 50, 80))
        .await
        .unwrap();

    till_a.link.set_online(false);
    till_b.link.set_online(false);
    for till in [&till_a, &till_b] {
        till.client
            .post_sale(&cashier(), sale("TXN-ORS-0007", &item.entity_id, 5, 80, PaymentMode::Transfer, None))
            .await
            .unwrap();
    }

    till_a.link.set_online(true);
    till_b.link.set_online(true);
    assert_eq!(till_a.client.sync_now().await.unwrap().applied, 1);
    assert_eq!(till_b.client.sync_now().await.unwrap().applied, 1);

    let stocked = store.inventory().get_by_id(&item.entity_id).await.unwrap().unwrap();
    assert_eq!(stocked.quantity, 45);
}

#[tokio::test]
async fn refund_approvals_surface_variance() {
    let store = backend().await;
    let till = terminal(&store).await;

    let item = till
        .client
        .create_inventory(&pharmacist(), stock("Atorvastatin 20mg", "ATV-20", 60, 500))
        .await
        .unwrap();

    let mut refunds = Vec::new();
    for (txn, after_minor) in [("TXN-ATV-0001", 4800), ("TXN-ATV-0002", 4850)] {
        let sold = till
            .client
            .post_sale(&cashier(), sale(txn, &item.entity_id, 1, 500, PaymentMode::Cash, None))
            .await
            .unwrap();
        let refund = till
            .client
            .request_refund(&cashier(), &sold.entity_id, Money::from_minor(200), Some("duplicate pack".into()))
            .await
            .unwrap();
        refunds.push((refund.entity_id, after_minor));
    }

    for (refund_id, after_minor) in &refunds {
        let recon = CashReconciliation {
            cash_returned: Money::from_minor(200),
            register_balance_before: Money::from_minor(5000),
            register_balance_after: Money::from_minor(*after_minor),
        };
        let approved = till.client.approve_refund(&manager(), refund_id, recon).await.unwrap();
        assert!(approved.is_applied());
    }

    let matched = store.refunds().get_by_id(&refunds[0].0).await.unwrap().unwrap();
    assert_eq!(matched.status, RefundStatus::Approved);
    assert_eq!(matched.variance, Some(Money::zero()));
    assert!(!matched.variance_flagged);

    let flagged = store.refunds().get_by_id(&refunds[1].0).await.unwrap().unwrap();
    assert_eq!(flagged.status, RefundStatus::Approved);
    assert_eq!(flagged.variance, Some(Money::from_minor(-50)));
    assert!(flagged.variance_flagged);
}
