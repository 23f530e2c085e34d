//! # Sale Repository
//!
//! The atomic sale poster and sale reads.
//!
//! ## Posting Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    post_sale (one transaction)                          │
//! │                                                                         │
//! │  1. validate posting (payments reconcile, lines well formed)            │
//! │  2. transaction_id already posted?  → return it, duplicate = true       │
//! │  3. shift named?  → must exist and be active                            │
//! │  4. per product (lines aggregated):                                     │
//! │       UPDATE quantity = quantity - n WHERE quantity >= n                │
//! │       0 rows ⇒ InsufficientStock { name, available, requested }         │
//! │       SALE movement (reference = sale id)                               │
//! │  5. INSERT sales (profit = total - Σ cost × qty)                        │
//! │  6. INSERT sale_items (name + cost snapshots), payments                 │
//! │  7. shift expected totals += payments by mode                           │
//! │  8. COMMIT   (any error above rolls everything back)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A dropped `Transaction` rolls back, so every early `?` return leaves the
//! store untouched.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::inventory::{fetch_active, insert_movement, movement};
use rxpos_core::{
    CoreError, InventoryItem, Money, MovementType, Payment, PaymentMode, PostedSale, Sale,
    SaleDetail, SaleItem, SalePosting, Shift,
};

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    /// Gets a sale by its client transaction id.
    pub async fn get_by_transaction_id(&self, transaction_id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE transaction_id = ?")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    /// Gets all items for a sale, in posting order.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(
            "SELECT * FROM sale_items WHERE sale_id = ? ORDER BY rowid ASC",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Gets all payments for a sale.
    pub async fn get_payments(&self, sale_id: &str) -> DbResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE sale_id = ? ORDER BY rowid ASC",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Header, lines and payments in one value.
    pub async fn get_detail(&self, sale_id: &str) -> DbResult<Option<SaleDetail>> {
        let Some(sale) = self.get_by_id(sale_id).await? else {
            return Ok(None);
        };
        let items = self.get_items(sale_id).await?;
        let payments = self.get_payments(sale_id).await?;
        Ok(Some(SaleDetail {
            sale,
            items,
            payments,
        }))
    }

    /// Sales posted against a shift, oldest first.
    pub async fn list_for_shift(&self, shift_id: &str) -> DbResult<Vec<Sale>> {
        let sales = sqlx::query_as::<_, Sale>(
            "SELECT * FROM sales WHERE shift_id = ? ORDER BY created_at ASC",
        )
        .bind(shift_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sales)
    }

    /// Posts a sale atomically.
    ///
    /// Posting the same `transaction_id` twice returns the first sale with
    /// `duplicate = true` and changes nothing.
    pub async fn post_sale(
        &self,
        sale_id: &str,
        posting: &SalePosting,
        operation_id: Option<&str>,
    ) -> DbResult<PostedSale> {
        posting.validate()?;
        debug!(
            sale_id = %sale_id,
            transaction_id = %posting.transaction_id,
            lines = posting.items.len(),
            "Posting sale"
        );

        let mut tx = self.pool.begin().await?;

        if let Some(existing) = sqlx::query_as::<_, Sale>(
            "SELECT * FROM sales WHERE transaction_id = ?",
        )
        .bind(&posting.transaction_id)
        .fetch_optional(&mut *tx)
        .await?
        {
            info!(
                transaction_id = %posting.transaction_id,
                sale_id = %existing.id,
                "Duplicate transaction id, returning existing sale"
            );
            return Ok(PostedSale {
                sale_id: existing.id,
                transaction_id: existing.transaction_id,
                profit: existing.profit,
                duplicate: true,
            });
        }

        if let Some(shift_id) = posting.shift_id.as_deref() {
            let shift = sqlx::query_as::<_, Shift>("SELECT * FROM shifts WHERE id = ?")
                .bind(shift_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DbError::not_found("Shift", shift_id))?;
            if !shift.can_post_sales() {
                return Err(
                    CoreError::invalid_transition("shift", shift.status, "post a sale to").into(),
                );
            }
        }

        // ---------------------------------------------------------------------
        // Stock deduction
        // ---------------------------------------------------------------------
        let mut stocked: HashMap<String, InventoryItem> = HashMap::new();
        for (product_id, requested) in aggregate_lines(posting) {
            let item = fetch_active(&mut tx, &product_id).await?;
            if item.quantity < requested {
                return Err(insufficient(&item, requested));
            }
            deduct_stock(&mut tx, &item, requested).await?;
            insert_movement(
                &mut tx,
                &movement(
                    &item,
                    MovementType::Sale,
                    item.quantity,
                    -requested,
                    Some(sale_id),
                ),
            )
            .await?;
            stocked.insert(product_id, item);
        }

        // ---------------------------------------------------------------------
        // Header, lines, payments
        // ---------------------------------------------------------------------
        let cost_of_goods: Money = posting
            .items
            .iter()
            .filter_map(|line| {
                stocked
                    .get(&line.product_id)
                    .map(|item| item.cost_price.multiply_quantity(line.quantity))
            })
            .sum();
        let profit = posting.total - cost_of_goods;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, transaction_id, total, discount, profit,
                customer_name, business_name, cashier_id, shift_id,
                version, last_operation_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(sale_id)
        .bind(&posting.transaction_id)
        .bind(posting.total)
        .bind(posting.discount)
        .bind(profit)
        .bind(&posting.customer_name)
        .bind(&posting.business_name)
        .bind(&posting.cashier_id)
        .bind(&posting.shift_id)
        .bind(operation_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in &posting.items {
            let Some(item) = stocked.get(&line.product_id) else {
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    id, sale_id, product_id, name_snapshot, quantity,
                    unit_price, price, cost_price, discount, is_wholesale, total
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(sale_id)
            .bind(&line.product_id)
            .bind(&item.name)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.price)
            .bind(item.cost_price)
            .bind(line.discount)
            .bind(line.is_wholesale)
            .bind(line.total)
            .execute(&mut *tx)
            .await?;
        }

        for payment in &posting.payments {
            sqlx::query(
                "INSERT INTO payments (id, sale_id, mode, amount, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(sale_id)
            .bind(payment.mode)
            .bind(payment.amount)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(shift_id) = posting.shift_id.as_deref() {
            sqlx::query(
                r#"
                UPDATE shifts SET
                    expected_cash_total = expected_cash_total + ?,
                    expected_pos_total = expected_pos_total + ?,
                    expected_transfer_total = expected_transfer_total + ?
                WHERE id = ?
                "#,
            )
            .bind(posting.paid_by(PaymentMode::Cash))
            .bind(posting.paid_by(PaymentMode::Pos))
            .bind(posting.paid_by(PaymentMode::Transfer))
            .bind(shift_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            sale_id = %sale_id,
            total = %posting.total,
            profit = %profit,
            "Sale posted"
        );

        Ok(PostedSale {
            sale_id: sale_id.to_string(),
            transaction_id: posting.transaction_id.clone(),
            profit,
            duplicate: false,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Total requested quantity per product, in first-seen order.
fn aggregate_lines(posting: &SalePosting) -> Vec<(String, i64)> {
    let mut totals: Vec<(String, i64)> = Vec::new();
    for line in &posting.items {
        match totals.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, qty)) => *qty += line.quantity,
            None => totals.push((line.product_id.clone(), line.quantity)),
        }
    }
    totals
}

fn insufficient(item: &InventoryItem, requested: i64) -> DbError {
    CoreError::InsufficientStock {
        product_id: item.id.clone(),
        name: item.name.clone(),
        available: item.quantity,
        requested,
    }
    .into()
}

/// Conditional decrement; the `quantity >= ?` guard keeps stock from going
/// negative even if the row moved after it was read.
///
/// The inventory version moves but `last_operation_id` stays with the
/// operation that last edited the record.
async fn deduct_stock(
    conn: &mut SqliteConnection,
    item: &InventoryItem,
    quantity: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE inventory_items SET
            quantity = quantity - ?, version = version + 1, updated_at = ?
        WHERE id = ? AND is_active = 1 AND quantity >= ?
        "#,
    )
    .bind(quantity)
    .bind(Utc::now())
    .bind(&item.id)
    .bind(quantity)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(insufficient(item, quantity));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use rxpos_core::{InventoryRecord, PaymentPosting, SaleLine, ShiftOpening, ShiftTransition};

    async fn seeded() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        for (id, sku, name, qty) in [
            ("amx", "AMX-500", "Amoxicillin 500mg", 7),
            ("pcm", "PCM-500", "Paracetamol 500mg", 50),
        ] {
            db.inventory()
                .create(
                    id,
                    &InventoryRecord {
                        name: name.into(),
                        sku: sku.into(),
                        quantity: qty,
                        reorder_level: 2,
                        cost_price: Money::from_minor(300),
                        sell_price: Money::from_minor(500),
                        batch_number: None,
                        expiry_date: None,
                    },
                    None,
                )
                .await
                .unwrap();
        }
        db
    }

    fn line(product_id: &str, quantity: i64) -> SaleLine {
        SaleLine {
            product_id: product_id.into(),
            quantity,
            unit_price: Money::from_minor(500),
            price: Money::from_minor(500),
            discount: Money::zero(),
            is_wholesale: false,
            total: Money::from_minor(500 * quantity),
        }
    }

    fn posting(txn: &str, lines: Vec<SaleLine>, payments: &[(PaymentMode, i64)]) -> SalePosting {
        let total = lines.iter().map(|l| l.total).sum();
        SalePosting {
            transaction_id: txn.into(),
            total,
            discount: Money::zero(),
            customer_name: None,
            business_name: None,
            cashier_id: "cashier-1".into(),
            shift_id: None,
            items: lines,
            payments: payments
                .iter()
                .map(|(mode, amount)| PaymentPosting {
                    mode: *mode,
                    amount: Money::from_minor(*amount),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_post_sale_deducts_stock_and_records_profit() {
        let db = seeded().await;
        let p = posting("TXN-1", vec![line("pcm", 4)], &[(PaymentMode::Cash, 2000)]);

        let posted = db.sales().post_sale("sale-1", &p, Some("op-1")).await.unwrap();
        assert!(!posted.duplicate);
        assert_eq!(posted.profit, Money::from_minor(2000 - 1200));

        let item = db.inventory().get_by_id("pcm").await.unwrap().unwrap();
        assert_eq!(item.quantity, 46);
        assert_eq!(item.version, 2);
        assert_eq!(item.last_operation_id, None);

        let detail = db.sales().get_detail("sale-1").await.unwrap().unwrap();
        assert_eq!(detail.items[0].name_snapshot, "Paracetamol 500mg");
        assert_eq!(detail.items[0].cost_price, Money::from_minor(300));
        assert_eq!(detail.payments.len(), 1);
        assert_eq!(detail.sale.version, 1);

        let ledger = db.inventory().movements("pcm").await.unwrap();
        let sale_move = ledger.last().unwrap();
        assert_eq!(sale_move.movement_type, MovementType::Sale);
        assert_eq!(sale_move.delta, -4);
        assert_eq!(sale_move.reference.as_deref(), Some("sale-1"));
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_everything() {
        let db = seeded().await;
        let p = posting(
            "TXN-2",
            vec![line("pcm", 5), line("amx", 10)],
            &[(PaymentMode::Cash, 7500)],
        );

        let err = db.sales().post_sale("sale-2", &p, None).await.unwrap_err();
        match err {
            DbError::Domain(CoreError::InsufficientStock {
                name,
                available,
                requested,
                ..
            }) => {
                assert_eq!(name, "Amoxicillin 500mg");
                assert_eq!(available, 7);
                assert_eq!(requested, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Paracetamol deduction was rolled back with the rest
        let pcm = db.inventory().get_by_id("pcm").await.unwrap().unwrap();
        assert_eq!(pcm.quantity, 50);
        assert!(db.sales().get_by_id("sale-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lines_for_same_product_are_aggregated() {
        let db = seeded().await;
        let p = posting(
            "TXN-3",
            vec![line("amx", 4), line("amx", 4)],
            &[(PaymentMode::Cash, 4000)],
        );
        let err = db.sales().post_sale("sale-3", &p, None).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { requested: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_transaction_is_idempotent() {
        let db = seeded().await;
        let p = posting("TXN-4", vec![line("pcm", 2)], &[(PaymentMode::Pos, 1000)]);

        db.sales().post_sale("sale-4", &p, None).await.unwrap();
        let again = db.sales().post_sale("sale-4b", &p, None).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(again.sale_id, "sale-4");

        let pcm = db.inventory().get_by_id("pcm").await.unwrap().unwrap();
        assert_eq!(pcm.quantity, 48);
    }

    #[tokio::test]
    async fn test_payment_mismatch_touches_nothing() {
        let db = seeded().await;
        let p = posting("TXN-5", vec![line("pcm", 2)], &[(PaymentMode::Cash, 900)]);
        let err = db.sales().post_sale("sale-5", &p, None).await.unwrap_err();
        assert!(err.is_business_rejection());
        assert_eq!(
            db.inventory().get_by_id("pcm").await.unwrap().unwrap().quantity,
            50
        );
    }

    #[tokio::test]
    async fn test_split_tender_updates_shift_totals() {
        let db = seeded().await;
        db.shifts()
            .open(
                "shift-1",
                &ShiftOpening {
                    cashier_id: "cashier-1".into(),
                    opening_cash: Money::from_minor(10000),
                },
                None,
            )
            .await
            .unwrap();

        let mut p = posting(
            "TXN-6",
            vec![line("pcm", 20)],
            &[(PaymentMode::Cash, 4000), (PaymentMode::Pos, 6000)],
        );
        p.shift_id = Some("shift-1".into());
        db.sales().post_sale("sale-6", &p, None).await.unwrap();

        let shift = db.shifts().get_by_id("shift-1").await.unwrap().unwrap();
        assert_eq!(shift.expected_cash_total, Money::from_minor(4000));
        assert_eq!(shift.expected_pos_total, Money::from_minor(6000));
        assert_eq!(shift.expected_transfer_total, Money::zero());
        assert_eq!(shift.version, 1);
        assert_eq!(db.sales().list_for_shift("shift-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paused_shift_rejects_sales() {
        let db = seeded().await;
        db.shifts()
            .open(
                "shift-1",
                &ShiftOpening {
                    cashier_id: "cashier-1".into(),
                    opening_cash: Money::zero(),
                },
                None,
            )
            .await
            .unwrap();
        db.shifts()
            .transition("shift-1", &ShiftTransition::Pause, 1, None)
            .await
            .unwrap();

        let mut p = posting("TXN-7", vec![line("pcm", 1)], &[(PaymentMode::Cash, 500)]);
        p.shift_id = Some("shift-1".into());
        let err = db.sales().post_sale("sale-7", &p, None).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidTransition { .. })
        ));
    }
}
