//! # Inventory Repository
//!
//! Authoritative inventory rows and their append-only stock ledger.
//!
//! ## Versioned Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create(id, record)              → version 1, INITIAL movement          │
//! │  update(id, record, expected)    → version + 1, ADJUSTMENT if qty moved │
//! │  soft_delete(id, expected)       → is_active = 0, version + 1           │
//! │  receive_stock(id, n)            → version + 1, ADDITION movement       │
//! │                                                                         │
//! │  UPDATE inventory_items SET ..., version = version + 1                  │
//! │  WHERE id = ? AND version = ?   ← 0 rows ⇒ StaleVersion                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every quantity change writes a `stock_movements` row in the same
//! transaction, so `new_quantity = previous_quantity + delta` can be audited
//! end to end.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use rxpos_core::validation::{validate_inventory_record, validate_quantity};
use rxpos_core::{InventoryItem, InventoryRecord, Money, MovementType, StockMovement};

/// Repository for inventory database operations.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Gets an item by ID, including soft-deleted items.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<InventoryItem>> {
        let item = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Lists active items ordered by name.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<InventoryItem>> {
        let items = sqlx::query_as::<_, InventoryItem>(
            "SELECT * FROM inventory_items WHERE is_active = 1 ORDER BY name LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Active items at or below their reorder level.
    pub async fn low_stock(&self) -> DbResult<Vec<InventoryItem>> {
        let items = sqlx::query_as::<_, InventoryItem>(
            r#"
            SELECT * FROM inventory_items
            WHERE is_active = 1 AND quantity <= reorder_level
            ORDER BY quantity ASC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Inserts a new item at version 1.
    ///
    /// A non-zero opening quantity is recorded as an INITIAL movement.
    pub async fn create(
        &self,
        id: &str,
        record: &InventoryRecord,
        operation_id: Option<&str>,
    ) -> DbResult<InventoryItem> {
        validate_inventory_record(record)?;
        debug!(id = %id, sku = %record.sku, "Creating inventory item");

        let now = Utc::now();
        let item = InventoryItem {
            id: id.to_string(),
            name: record.name.trim().to_string(),
            sku: record.sku.trim().to_string(),
            quantity: record.quantity,
            reorder_level: record.reorder_level,
            cost_price: record.cost_price,
            sell_price: record.sell_price,
            batch_number: record.batch_number.clone(),
            expiry_date: record.expiry_date,
            is_active: true,
            version: 1,
            last_operation_id: operation_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO inventory_items (
                id, name, sku, quantity, reorder_level,
                cost_price, sell_price, batch_number, expiry_date,
                is_active, version, last_operation_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.sku)
        .bind(item.quantity)
        .bind(item.reorder_level)
        .bind(item.cost_price)
        .bind(item.sell_price)
        .bind(&item.batch_number)
        .bind(item.expiry_date)
        .bind(item.is_active)
        .bind(item.version)
        .bind(&item.last_operation_id)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *tx)
        .await?;

        if item.quantity > 0 {
            insert_movement(
                &mut tx,
                &movement(&item, MovementType::Initial, 0, item.quantity, operation_id),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(item)
    }

    /// Whole-record update guarded by `expected_version`.
    pub async fn update(
        &self,
        id: &str,
        record: &InventoryRecord,
        expected_version: i64,
        operation_id: Option<&str>,
    ) -> DbResult<InventoryItem> {
        validate_inventory_record(record)?;
        debug!(id = %id, expected_version, "Updating inventory item");

        let mut tx = self.pool.begin().await?;
        let current = fetch_active(&mut tx, id).await?;
        if current.version != expected_version {
            return Err(DbError::stale("inventory", id, expected_version, current.version));
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE inventory_items SET
                name = ?, sku = ?, quantity = ?, reorder_level = ?,
                cost_price = ?, sell_price = ?, batch_number = ?, expiry_date = ?,
                version = version + 1, last_operation_id = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(record.name.trim())
        .bind(record.sku.trim())
        .bind(record.quantity)
        .bind(record.reorder_level)
        .bind(record.cost_price)
        .bind(record.sell_price)
        .bind(&record.batch_number)
        .bind(record.expiry_date)
        .bind(operation_id)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale("inventory", id, expected_version, current.version));
        }

        let updated = InventoryItem {
            name: record.name.trim().to_string(),
            sku: record.sku.trim().to_string(),
            quantity: record.quantity,
            reorder_level: record.reorder_level,
            cost_price: record.cost_price,
            sell_price: record.sell_price,
            batch_number: record.batch_number.clone(),
            expiry_date: record.expiry_date,
            version: current.version + 1,
            last_operation_id: operation_id.map(str::to_string),
            updated_at: now,
            ..current.clone()
        };

        let delta = updated.quantity - current.quantity;
        if delta != 0 {
            insert_movement(
                &mut tx,
                &movement(
                    &updated,
                    MovementType::Adjustment,
                    current.quantity,
                    delta,
                    operation_id,
                ),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Soft-deletes an item.
    ///
    /// Historical sales and movements keep referencing the row.
    pub async fn soft_delete(
        &self,
        id: &str,
        expected_version: i64,
        operation_id: Option<&str>,
    ) -> DbResult<InventoryItem> {
        debug!(id = %id, expected_version, "Soft-deleting inventory item");

        let mut tx = self.pool.begin().await?;
        let current = fetch_active(&mut tx, id).await?;
        if current.version != expected_version {
            return Err(DbError::stale("inventory", id, expected_version, current.version));
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE inventory_items SET
                is_active = 0, version = version + 1, last_operation_id = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(operation_id)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(InventoryItem {
            is_active: false,
            version: current.version + 1,
            last_operation_id: operation_id.map(str::to_string),
            updated_at: now,
            ..current
        })
    }

    /// Adds received stock (delivery from a supplier).
    pub async fn receive_stock(
        &self,
        id: &str,
        quantity: i64,
        reference: Option<&str>,
    ) -> DbResult<InventoryItem> {
        validate_quantity(quantity).map_err(rxpos_core::CoreError::from)?;
        debug!(id = %id, quantity, "Receiving stock");

        let mut tx = self.pool.begin().await?;
        let current = fetch_active(&mut tx, id).await?;
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE inventory_items SET
                quantity = quantity + ?, version = version + 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(quantity)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let updated = InventoryItem {
            quantity: current.quantity + quantity,
            version: current.version + 1,
            updated_at: now,
            ..current.clone()
        };
        insert_movement(
            &mut tx,
            &movement(
                &updated,
                MovementType::Addition,
                current.quantity,
                quantity,
                reference,
            ),
        )
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Stock ledger for one item, oldest first.
    pub async fn movements(&self, item_id: &str) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, StockMovement>(
            "SELECT * FROM stock_movements WHERE item_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Counts active items (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inventory_items WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// =============================================================================
// Shared helpers (also used by the sale poster)
// =============================================================================

/// Loads an active item inside a transaction.
pub(crate) async fn fetch_active(conn: &mut SqliteConnection, id: &str) -> DbResult<InventoryItem> {
    sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_items WHERE id = ? AND is_active = 1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| DbError::not_found("Inventory item", id))
}

/// Builds a movement with price and cost snapshots taken from `item`.
pub(crate) fn movement(
    item: &InventoryItem,
    movement_type: MovementType,
    previous_quantity: i64,
    delta: i64,
    reference: Option<&str>,
) -> StockMovement {
    movement_with_prices(
        &item.id,
        movement_type,
        previous_quantity,
        delta,
        item.sell_price,
        item.cost_price,
        reference,
    )
}

pub(crate) fn movement_with_prices(
    item_id: &str,
    movement_type: MovementType,
    previous_quantity: i64,
    delta: i64,
    unit_price: Money,
    unit_cost: Money,
    reference: Option<&str>,
) -> StockMovement {
    StockMovement {
        id: Uuid::new_v4().to_string(),
        item_id: item_id.to_string(),
        movement_type,
        delta,
        previous_quantity,
        new_quantity: previous_quantity + delta,
        unit_price,
        unit_cost,
        reference: reference.map(str::to_string),
        created_at: Utc::now(),
    }
}

pub(crate) async fn insert_movement(
    conn: &mut SqliteConnection,
    movement: &StockMovement,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, item_id, movement_type, delta, previous_quantity, new_quantity,
            unit_price, unit_cost, reference, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.item_id)
    .bind(movement.movement_type)
    .bind(movement.delta)
    .bind(movement.previous_quantity)
    .bind(movement.new_quantity)
    .bind(movement.unit_price)
    .bind(movement.unit_cost)
    .bind(&movement.reference)
    .bind(movement.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
