//! # Refund Repository
//!
//! ```text
//!   request ──► Pending ──approve──► Approved   (reconciliation + variance)
//!                  │
//!                  └────reject───► Rejected    (reason required)
//! ```
//!
//! At most one pending or approved refund exists per sale. The check runs
//! inside the request transaction and is backed by a partial unique index.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use rxpos_core::{CoreError, Money, Refund, RefundDecision, RefundRequest, Sale};

/// Repository for refund database operations.
#[derive(Debug, Clone)]
pub struct RefundRepository {
    pool: SqlitePool,
}

impl RefundRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RefundRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Refund>> {
        let refund = sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(refund)
    }

    /// Every refund ever requested against a sale, newest first.
    pub async fn for_sale(&self, sale_id: &str) -> DbResult<Vec<Refund>> {
        let refunds = sqlx::query_as::<_, Refund>(
            "SELECT * FROM refunds WHERE sale_id = ? ORDER BY created_at DESC",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(refunds)
    }

    /// Records a pending refund at version 1.
    pub async fn request(
        &self,
        id: &str,
        request: &RefundRequest,
        operation_id: Option<&str>,
    ) -> DbResult<Refund> {
        debug!(id = %id, sale_id = %request.sale_id, amount = %request.amount, "Refund requested");

        let mut tx = self.pool.begin().await?;

        let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE id = ?")
            .bind(&request.sale_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", &request.sale_id))?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM refunds WHERE sale_id = ? AND status IN ('pending', 'approved')",
        )
        .bind(&sale.id)
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            return Err(CoreError::ActiveRefundExists { sale_id: sale.id }.into());
        }

        let mut refund = Refund::request(id, request, sale.total, Utc::now())?;
        refund.version = 1;
        refund.last_operation_id = operation_id.map(str::to_string);

        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, sale_id, amount, reason, status, requested_by,
                variance_flagged, created_at, version, last_operation_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.sale_id)
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(refund.status)
        .bind(&refund.requested_by)
        .bind(refund.variance_flagged)
        .bind(refund.created_at)
        .bind(refund.version)
        .bind(&refund.last_operation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(refund)
    }

    /// Approves or rejects a pending refund.
    ///
    /// A variance beyond `tolerance` is stored with `variance_flagged = 1`;
    /// it never blocks the approval.
    pub async fn decide(
        &self,
        id: &str,
        decision: &RefundDecision,
        expected_version: i64,
        tolerance: Money,
        operation_id: Option<&str>,
    ) -> DbResult<Refund> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Refund", id))?;
        if current.version != expected_version {
            return Err(DbError::stale("refund", id, expected_version, current.version));
        }

        let mut next = current.decide(decision, tolerance, Utc::now())?;
        next.version = current.version + 1;
        next.last_operation_id = operation_id.map(str::to_string);

        sqlx::query(
            r#"
            UPDATE refunds SET
                status = ?, decided_by = ?, rejection_reason = ?,
                cash_returned = ?, register_balance_before = ?, register_balance_after = ?,
                variance = ?, variance_flagged = ?, decided_at = ?,
                version = ?, last_operation_id = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(next.status)
        .bind(&next.decided_by)
        .bind(&next.rejection_reason)
        .bind(next.cash_returned)
        .bind(next.register_balance_before)
        .bind(next.register_balance_after)
        .bind(next.variance)
        .bind(next.variance_flagged)
        .bind(next.decided_at)
        .bind(next.version)
        .bind(&next.last_operation_id)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if next.variance_flagged {
            warn!(
                id = %id,
                variance = ?next.variance.map(|v| v.to_string()),
                "Refund approved with cash variance"
            );
        } else {
            info!(id = %id, status = %next.status, "Refund decided");
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use rxpos_core::{
        CashReconciliation, InventoryRecord, PaymentMode, PaymentPosting, RefundStatus, SaleLine,
        SalePosting,
    };

    async fn with_sale(total: i64) -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.inventory()
            .create(
                "pcm",
                &InventoryRecord {
                    name: "Paracetamol 500mg".into(),
                    sku: "PCM-500".into(),
                    quantity: 100,
                    reorder_level: 0,
                    cost_price: Money::from_minor(100),
                    sell_price: Money::from_minor(total),
                    batch_number: None,
                    expiry_date: None,
                },
                None,
            )
            .await
            .unwrap();
        db.sales()
            .post_sale(
                "sale-1",
                &SalePosting {
                    transaction_id: "TXN-1".into(),
                    total: Money::from_minor(total),
                    discount: Money::zero(),
                    customer_name: None,
                    business_name: None,
                    cashier_id: "cashier-1".into(),
                    shift_id: None,
                    items: vec![SaleLine {
                        product_id: "pcm".into(),
                        quantity: 1,
                        unit_price: Money::from_minor(total),
                        price: Money::from_minor(total),
                        discount: Money::zero(),
                        is_wholesale: false,
                        total: Money::from_minor(total),
                    }],
                    payments: vec![PaymentPosting {
                        mode: PaymentMode::Cash,
                        amount: Money::from_minor(total),
                    }],
                },
                None,
            )
            .await
            .unwrap();
        db
    }

    fn request(amount: i64) -> RefundRequest {
        RefundRequest {
            sale_id: "sale-1".into(),
            amount: Money::from_minor(amount),
            reason: Some("wrong strength".into()),
            requested_by: "cashier-1".into(),
        }
    }

    fn approve(cash: i64, before: i64, after: i64) -> RefundDecision {
        RefundDecision::Approve {
            reconciliation: CashReconciliation {
                cash_returned: Money::from_minor(cash),
                register_balance_before: Money::from_minor(before),
                register_balance_after: Money::from_minor(after),
            },
            approved_by: "manager-1".into(),
        }
    }

    #[tokio::test]
    async fn test_one_active_refund_per_sale() {
        let db = with_sale(5000).await;
        db.refunds().request("r-1", &request(2000), None).await.unwrap();

        let err = db.refunds().request("r-2", &request(1000), None).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ActiveRefundExists { .. })));

        // A rejected refund frees the sale for a new request
        db.refunds()
            .decide(
                "r-1",
                &RefundDecision::Reject {
                    reason: "no receipt".into(),
                    rejected_by: "manager-1".into(),
                },
                1,
                Money::from_minor(1),
                None,
            )
            .await
            .unwrap();
        db.refunds().request("r-2", &request(1000), None).await.unwrap();
        assert_eq!(db.refunds().for_sale("sale-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refund_cannot_exceed_sale() {
        let db = with_sale(5000).await;
        let err = db.refunds().request("r-1", &request(5001), None).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::RefundExceedsSale { .. })));

        let missing = RefundRequest {
            sale_id: "nope".into(),
            ..request(10)
        };
        let err = db.refunds().request("r-1", &missing, None).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_approval_flags_variance() {
        let db = with_sale(5000).await;
        db.refunds().request("r-1", &request(2000), None).await.unwrap();

        // Drawer dropped by 2100 for a 2000 refund
        let approved = db
            .refunds()
            .decide("r-1", &approve(2000, 10000, 7900), 1, Money::from_minor(1), Some("op-2"))
            .await
            .unwrap();
        assert_eq!(approved.status, RefundStatus::Approved);
        assert_eq!(approved.variance, Some(Money::from_minor(100)));
        assert!(approved.variance_flagged);
        assert_eq!(approved.version, 2);

        let stored = db.refunds().get_by_id("r-1").await.unwrap().unwrap();
        assert_eq!(stored.status, RefundStatus::Approved);
        assert!(stored.variance_flagged);
        assert_eq!(stored.last_operation_id.as_deref(), Some("op-2"));

        let err = db
            .refunds()
            .decide("r-1", &approve(2000, 10000, 8000), 2, Money::from_minor(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidTransition { .. })));
    }
}
