//! # Rebase Map Repository
//!
//! Operations captured offline carry the version the operator saw. When an
//! earlier queued operation for the same entity is confirmed, the entity
//! moves on and later operations would look stale. The rebase map records
//! which confirmed version a captured base stands for:
//!
//! ```text
//!   op A (base 0) confirmed at v1   →  0 ↦ 1
//!   op B (base 0) confirmed at v2   →  0 ↦ 2   (chains follow: x ↦ 1 becomes x ↦ 2)
//!   op C (base 0)                   →  effective base 2, no conflict
//! ```
//!
//! A captured base only maps forward through versions this client itself
//! produced; an edit made elsewhere never appears here, so it still
//! surfaces as a conflict.

use sqlx::SqlitePool;

use crate::error::DbResult;
use rxpos_core::Resource;

#[derive(Debug, Clone)]
pub struct RebaseRepository {
    pool: SqlitePool,
}

impl RebaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RebaseRepository { pool }
    }

    /// Records that an operation based on `base_version` was confirmed at
    /// `confirmed_version`, and forwards every mapping that pointed at
    /// `base_version`.
    pub async fn record(
        &self,
        resource: Resource,
        entity_id: &str,
        base_version: i64,
        confirmed_version: i64,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE entity_rebase SET rebased_to = ?
            WHERE resource = ? AND entity_id = ? AND rebased_to = ?
            "#,
        )
        .bind(confirmed_version)
        .bind(resource)
        .bind(entity_id)
        .bind(base_version)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO entity_rebase (resource, entity_id, base_version, rebased_to)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (resource, entity_id, base_version) DO UPDATE SET
                rebased_to = excluded.rebased_to
            "#,
        )
        .bind(resource)
        .bind(entity_id)
        .bind(base_version)
        .bind(confirmed_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn lookup(
        &self,
        resource: Resource,
        entity_id: &str,
        base_version: i64,
    ) -> DbResult<Option<i64>> {
        let rebased: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT rebased_to FROM entity_rebase
            WHERE resource = ? AND entity_id = ? AND base_version = ?
            "#,
        )
        .bind(resource)
        .bind(entity_id)
        .bind(base_version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rebased)
    }

    /// Drops the map for an entity once nothing queued refers to it.
    pub async fn clear(&self, resource: Resource, entity_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM entity_rebase WHERE resource = ? AND entity_id = ?")
            .bind(resource)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
