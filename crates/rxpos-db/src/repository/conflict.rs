//! # Conflict Repository
//!
//! Detected conflicts, one per `(resource, entity_id)`. While a row exists the
//! sync engine holds every queued operation for that entity.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;
use rxpos_core::{QueuedOperation, RemoteRecord, Resource, SyncConflict};

#[derive(Debug, sqlx::FromRow)]
struct ConflictRow {
    resource: Resource,
    entity_id: String,
    operation: String,
    server_version: Option<String>,
    detected_at: DateTime<Utc>,
}

impl ConflictRow {
    fn into_conflict(self) -> DbResult<SyncConflict> {
        let operation: QueuedOperation = serde_json::from_str(&self.operation)?;
        let server_version: Option<RemoteRecord> = self
            .server_version
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(SyncConflict {
            entity_id: self.entity_id,
            resource: self.resource,
            operation,
            server_version,
            detected_at: self.detected_at,
        })
    }
}

/// Repository for outstanding sync conflicts.
#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ConflictRepository { pool }
    }

    /// Stores a conflict, replacing any earlier one for the same entity.
    pub async fn upsert(&self, conflict: &SyncConflict) -> DbResult<()> {
        let operation = serde_json::to_string(&conflict.operation)?;
        let server_version = conflict
            .server_version
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        info!(
            resource = %conflict.resource,
            entity_id = %conflict.entity_id,
            operation_id = %conflict.operation.id,
            server_version = conflict.server_version_number(),
            "Recording sync conflict"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_conflicts (
                resource, entity_id, operation_id, operation, server_version, detected_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (resource, entity_id) DO UPDATE SET
                operation_id = excluded.operation_id,
                operation = excluded.operation,
                server_version = excluded.server_version,
                detected_at = excluded.detected_at
            "#,
        )
        .bind(conflict.resource)
        .bind(&conflict.entity_id)
        .bind(&conflict.operation.id)
        .bind(operation)
        .bind(server_version)
        .bind(conflict.detected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All outstanding conflicts, oldest first.
    pub async fn list(&self) -> DbResult<Vec<SyncConflict>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            r#"
            SELECT resource, entity_id, operation, server_version, detected_at
            FROM sync_conflicts
            ORDER BY detected_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ConflictRow::into_conflict).collect()
    }

    pub async fn get(&self, resource: Resource, entity_id: &str) -> DbResult<Option<SyncConflict>> {
        let row = sqlx::query_as::<_, ConflictRow>(
            r#"
            SELECT resource, entity_id, operation, server_version, detected_at
            FROM sync_conflicts
            WHERE resource = ? AND entity_id = ?
            "#,
        )
        .bind(resource)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ConflictRow::into_conflict).transpose()
    }

    pub async fn remove(&self, resource: Resource, entity_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_conflicts WHERE resource = ? AND entity_id = ?")
            .bind(resource)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_conflicts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use rxpos_core::{InventoryRecord, Money, Mutation};
    use serde_json::json;

    fn record(qty: i64) -> InventoryRecord {
        InventoryRecord {
            name: "Ibuprofen 400mg".into(),
            sku: "IBU-400".into(),
            quantity: qty,
            reorder_level: 10,
            cost_price: Money::from_minor(80),
            sell_price: Money::from_minor(150),
            batch_number: None,
            expiry_date: None,
        }
    }

    #[tokio::test]
    async fn test_one_conflict_per_entity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.conflicts();

        let op = QueuedOperation::new("i-1", Mutation::UpdateInventory(record(5)), 1);
        let server = RemoteRecord {
            resource: Resource::Inventory,
            entity_id: "i-1".into(),
            version: 2,
            last_operation_id: Some("other".into()),
            data: json!({ "quantity": 8 }),
        };
        repo.upsert(&SyncConflict::new(op.clone(), Some(server.clone())))
            .await
            .unwrap();
        repo.upsert(&SyncConflict::new(op.clone(), None)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let stored = repo.get(Resource::Inventory, "i-1").await.unwrap().unwrap();
        assert_eq!(stored.operation.id, op.id);
        assert_eq!(stored.operation.mutation, op.mutation);
        assert!(stored.server_version.is_none());

        repo.upsert(&SyncConflict::new(op, Some(server.clone())))
            .await
            .unwrap();
        let listed = repo.list().await.unwrap();
        assert_eq!(listed[0].server_version, Some(server));

        assert!(repo.remove(Resource::Inventory, "i-1").await.unwrap());
        assert!(repo.get(Resource::Inventory, "i-1").await.unwrap().is_none());
    }
}
