//! # Operation Queue Repository
//!
//! Durable FIFO of operations captured while the store was unreachable.
//!
//! ## Queue Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue ──► pending ──confirmed──► dequeue (row deleted)               │
//! │                │  ▲                                                     │
//! │   transport    │  │ attempts += 1, last_error                           │
//! │   failure  ────┘  │                                                     │
//! │                   │                                                     │
//! │                business rejection ──► rejected ──requeue──► pending      │
//! │                                          │                              │
//! │                                          └──discard──► row deleted      │
//! │                                                                         │
//! │  conflict resolution ──► replace(payload, base_version), keeps seq      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `seq` is an AUTOINCREMENT key, so FIFO order survives restarts and never
//! reuses a position.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::DbResult;
use rxpos_core::{DeliveryState, Mutation, QueueEntry, QueuedOperation, Resource};

/// Raw `operation_queue` row; the payload is decoded into a [`Mutation`].
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    seq: i64,
    id: String,
    entity_id: String,
    payload: String,
    base_version: i64,
    enqueued_at: DateTime<Utc>,
    attempts: i64,
    last_error: Option<String>,
    state: DeliveryState,
}

impl QueueRow {
    fn into_entry(self) -> DbResult<QueueEntry> {
        let mutation: Mutation = serde_json::from_str(&self.payload)?;
        Ok(QueueEntry {
            operation: QueuedOperation {
                id: self.id,
                seq: self.seq,
                entity_id: self.entity_id,
                mutation,
                base_version: self.base_version,
                enqueued_at: self.enqueued_at,
            },
            attempts: self.attempts,
            last_error: self.last_error,
            state: self.state,
        })
    }
}

fn into_entries(rows: Vec<QueueRow>) -> DbResult<Vec<QueueEntry>> {
    rows.into_iter().map(QueueRow::into_entry).collect()
}

const SELECT_ROW: &str = r#"
    SELECT seq, id, entity_id, payload, base_version, enqueued_at,
           attempts, last_error, state
    FROM operation_queue
"#;

/// Repository for the pending operation queue.
#[derive(Debug, Clone)]
pub struct OperationQueueRepository {
    pool: SqlitePool,
}

impl OperationQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OperationQueueRepository { pool }
    }

    /// Appends an operation and returns it with its assigned `seq`.
    pub async fn enqueue(&self, operation: &QueuedOperation) -> DbResult<QueuedOperation> {
        let payload = serde_json::to_string(&operation.mutation)?;

        debug!(
            id = %operation.id,
            resource = %operation.resource(),
            entity_id = %operation.entity_id,
            kind = %operation.kind(),
            "Enqueuing operation"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO operation_queue (
                id, resource, entity_id, kind, payload, base_version, enqueued_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operation.id)
        .bind(operation.resource())
        .bind(&operation.entity_id)
        .bind(operation.kind())
        .bind(payload)
        .bind(operation.base_version)
        .bind(operation.enqueued_at)
        .execute(&self.pool)
        .await?;

        let mut stored = operation.clone();
        stored.seq = result.last_insert_rowid();
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueRow>(&format!("{} WHERE id = ?", SELECT_ROW))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueueRow::into_entry).transpose()
    }

    /// Oldest pending operation.
    pub async fn peek_next(&self) -> DbResult<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueRow>(&format!(
            "{} WHERE state = 'pending' ORDER BY seq ASC LIMIT 1",
            SELECT_ROW
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueueRow::into_entry).transpose()
    }

    /// Pending operations in FIFO order.
    pub async fn pending(&self, limit: u32) -> DbResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{} WHERE state = 'pending' ORDER BY seq ASC LIMIT ?",
            SELECT_ROW
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_entries(rows)
    }

    /// Next page of pending operations strictly after `after_seq`.
    ///
    /// The drain walks the queue with this cursor so held operations at the
    /// head don't hide the rest of the queue.
    pub async fn pending_after(&self, after_seq: i64, limit: u32) -> DbResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{} WHERE state = 'pending' AND seq > ? ORDER BY seq ASC LIMIT ?",
            SELECT_ROW
        ))
        .bind(after_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_entries(rows)
    }

    /// Every queued operation, rejected ones included, in FIFO order.
    pub async fn all(&self, limit: u32) -> DbResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{} ORDER BY seq ASC LIMIT ?",
            SELECT_ROW
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_entries(rows)
    }

    /// Operations waiting for operator review.
    pub async fn rejected(&self) -> DbResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{} WHERE state = 'rejected' ORDER BY seq ASC",
            SELECT_ROW
        ))
        .fetch_all(&self.pool)
        .await?;
        into_entries(rows)
    }

    /// Pending operations for one entity, in FIFO order.
    pub async fn pending_for(&self, resource: Resource, entity_id: &str) -> DbResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{} WHERE resource = ? AND entity_id = ? AND state = 'pending' ORDER BY seq ASC",
            SELECT_ROW
        ))
        .bind(resource)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        into_entries(rows)
    }

    /// Removes a confirmed operation. Returns false if it was already gone.
    pub async fn dequeue(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM operation_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drops an operation the operator gave up on.
    pub async fn discard(&self, id: &str) -> DbResult<bool> {
        warn!(id = %id, "Discarding queued operation");
        self.dequeue(id).await
    }

    /// Swaps an operation's content for its resolved replacement.
    ///
    /// Keeps id and `seq`; the replacement is pending again.
    pub async fn replace(&self, id: &str, replacement: &QueuedOperation) -> DbResult<bool> {
        let payload = serde_json::to_string(&replacement.mutation)?;
        let result = sqlx::query(
            r#"
            UPDATE operation_queue SET
                kind = ?, payload = ?, base_version = ?,
                state = 'pending', last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(replacement.kind())
        .bind(payload)
        .bind(replacement.base_version)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bookkeeping for a delivery attempt that did not confirm.
    pub async fn record_attempt(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE operation_queue SET
                attempts = attempts + 1, last_error = ?, last_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Parks an operation the store refused for a business reason.
    pub async fn mark_rejected(&self, id: &str, reason: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE operation_queue SET
                state = 'rejected', attempts = attempts + 1,
                last_error = ?, last_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Puts a rejected operation back in line. Returns false if it was not rejected.
    pub async fn requeue_rejected(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE operation_queue SET state = 'pending' WHERE id = ? AND state = 'rejected'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM operation_queue WHERE state = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn count_rejected(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM operation_queue WHERE state = 'rejected'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
