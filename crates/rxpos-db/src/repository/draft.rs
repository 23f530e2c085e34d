//! # Sale Draft Repository
//!
//! Checkpointed carts, so an in-progress sale survives a restart.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use rxpos_core::SaleDraft;

#[derive(Debug, Clone)]
pub struct DraftRepository {
    pool: SqlitePool,
}

impl DraftRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DraftRepository { pool }
    }

    /// Writes the draft, replacing the previous checkpoint for the session.
    pub async fn save(&self, draft: &SaleDraft) -> DbResult<()> {
        let json = serde_json::to_string(draft)?;
        debug!(session_id = %draft.session_id, lines = draft.lines.len(), "Checkpointing sale draft");

        sqlx::query(
            r#"
            INSERT INTO sale_drafts (session_id, cashier_id, draft, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (session_id) DO UPDATE SET
                cashier_id = excluded.cashier_id,
                draft = excluded.draft,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&draft.session_id)
        .bind(&draft.cashier_id)
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, session_id: &str) -> DbResult<Option<SaleDraft>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT draft FROM sale_drafts WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(json.as_deref().map(serde_json::from_str).transpose()?)
    }

    pub async fn delete(&self, session_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sale_drafts WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drafts left open by a cashier, most recent first.
    pub async fn list_for_cashier(&self, cashier_id: &str) -> DbResult<Vec<SaleDraft>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT draft FROM sale_drafts WHERE cashier_id = ? ORDER BY updated_at DESC",
        )
        .bind(cashier_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<SaleDraft>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use rxpos_core::{InventoryItem, Money};

    fn item() -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            id: "pcm".into(),
            name: "Paracetamol 500mg".into(),
            sku: "PCM-500".into(),
            quantity: 30,
            reorder_level: 5,
            cost_price: Money::from_minor(300),
            sell_price: Money::from_minor(500),
            batch_number: None,
            expiry_date: None,
            is_active: true,
            version: 1,
            last_operation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_checkpoint_survives_reload() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.drafts();

        let mut draft = SaleDraft::new("sess-1", "cashier-1", None);
        draft.add_item(&item(), 2).unwrap();
        repo.save(&draft).await.unwrap();

        draft.update_quantity("pcm", 3).unwrap();
        repo.save(&draft).await.unwrap();

        let loaded = repo.load("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded.lines.len(), 1);
        assert_eq!(loaded.lines[0].quantity, 3);
        assert_eq!(repo.list_for_cashier("cashier-1").await.unwrap().len(), 1);

        repo.delete("sess-1").await.unwrap();
        assert!(repo.load("sess-1").await.unwrap().is_none());
    }
}
