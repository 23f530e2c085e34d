//! # Entity Cache Repository
//!
//! Last confirmed remote state per entity. Operators read from here while
//! offline and new operations take their base version from it.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::DbResult;
use rxpos_core::{RemoteRecord, Resource};

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    resource: Resource,
    entity_id: String,
    version: i64,
    last_operation_id: Option<String>,
    data: String,
}

impl CacheRow {
    fn into_record(self) -> DbResult<RemoteRecord> {
        Ok(RemoteRecord {
            resource: self.resource,
            entity_id: self.entity_id,
            version: self.version,
            last_operation_id: self.last_operation_id,
            data: serde_json::from_str(&self.data)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EntityCacheRepository {
    pool: SqlitePool,
}

impl EntityCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EntityCacheRepository { pool }
    }

    pub async fn put(&self, record: &RemoteRecord) -> DbResult<()> {
        let data = serde_json::to_string(&record.data)?;
        sqlx::query(
            r#"
            INSERT INTO entity_cache (resource, entity_id, version, last_operation_id, data, cached_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (resource, entity_id) DO UPDATE SET
                version = excluded.version,
                last_operation_id = excluded.last_operation_id,
                data = excluded.data,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(record.resource)
        .bind(&record.entity_id)
        .bind(record.version)
        .bind(&record.last_operation_id)
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, resource: Resource, entity_id: &str) -> DbResult<Option<RemoteRecord>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT resource, entity_id, version, last_operation_id, data
            FROM entity_cache
            WHERE resource = ? AND entity_id = ?
            "#,
        )
        .bind(resource)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CacheRow::into_record).transpose()
    }

    /// All cached records of one resource.
    pub async fn list(&self, resource: Resource) -> DbResult<Vec<RemoteRecord>> {
        let rows = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT resource, entity_id, version, last_operation_id, data
            FROM entity_cache
            WHERE resource = ?
            ORDER BY entity_id ASC
            "#,
        )
        .bind(resource)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CacheRow::into_record).collect()
    }

    pub async fn remove(&self, resource: Resource, entity_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM entity_cache WHERE resource = ? AND entity_id = ?")
            .bind(resource)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cached version, `0` when the entity was never confirmed.
    pub async fn version_of(&self, resource: Resource, entity_id: &str) -> DbResult<i64> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM entity_cache WHERE resource = ? AND entity_id = ?",
        )
        .bind(resource)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version.unwrap_or(0))
    }
}
