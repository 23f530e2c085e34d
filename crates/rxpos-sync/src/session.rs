//! # Sale Session
//!
//! Owns the cart for one checkout and checkpoints it to the local store.
//!
//! ```text
//!   begin/restore ──► add_item* / remove_item* / update_quantity / set_discount
//!         │                 │ (add + remove checkpoint)
//!         │                 ▼
//!         │           sale_drafts row
//!         ▼
//!   complete ──► SalePosting (fresh TXN id), draft row deleted
//!   abandon  ──► draft row deleted
//! ```
//!
//! Quantity and discount edits are held in memory until the next
//! checkpoint.

use uuid::Uuid;

use rxpos_core::{DraftTotals, InventoryItem, Money, PaymentPosting, SaleDraft, SalePosting};
use rxpos_db::DraftRepository;

use crate::error::SyncResult;

pub struct SaleSession {
    drafts: DraftRepository,
    draft: SaleDraft,
}

impl SaleSession {
    /// Opens the session, picking up a checkpointed draft if one exists.
    pub async fn begin(
        drafts: DraftRepository,
        session_id: &str,
        cashier_id: &str,
        shift_id: Option<String>,
    ) -> SyncResult<Self> {
        let draft = match drafts.load(session_id).await? {
            Some(existing) => existing,
            None => SaleDraft::new(session_id, cashier_id, shift_id),
        };
        Ok(SaleSession { drafts, draft })
    }

    /// Reopens a checkpointed draft, if there is one.
    pub async fn restore(drafts: DraftRepository, session_id: &str) -> SyncResult<Option<Self>> {
        Ok(drafts
            .load(session_id)
            .await?
            .map(|draft| SaleSession { drafts, draft }))
    }

    pub fn draft(&self) -> &SaleDraft {
        &self.draft
    }

    pub fn totals(&self) -> DraftTotals {
        self.draft.totals()
    }

    pub async fn add_item(&mut self, item: &InventoryItem, quantity: i64) -> SyncResult<()> {
        self.draft.add_item(item, quantity)?;
        self.checkpoint().await
    }

    pub async fn remove_item(&mut self, product_id: &str) -> SyncResult<()> {
        self.draft.remove_item(product_id)?;
        self.checkpoint().await
    }

    pub fn update_quantity(&mut self, product_id: &str, quantity: i64) -> SyncResult<()> {
        Ok(self.draft.update_quantity(product_id, quantity)?)
    }

    pub fn set_discount(&mut self, discount: Money) -> SyncResult<()> {
        Ok(self.draft.set_discount(discount)?)
    }

    pub fn set_customer(&mut self, customer_name: Option<String>, business_name: Option<String>) {
        self.draft.customer_name = customer_name;
        self.draft.business_name = business_name;
    }

    /// Builds the posting without ending the session.
    pub fn prepare(&self, payments: Vec<PaymentPosting>) -> SyncResult<SalePosting> {
        let transaction_id = format!("TXN-{}", Uuid::new_v4().simple());
        Ok(self.draft.to_posting(transaction_id, payments)?)
    }

    /// Ends the session after its posting was handed off.
    pub async fn finish(self) -> SyncResult<()> {
        Ok(self.drafts.delete(&self.draft.session_id).await?)
    }

    /// Converts the cart into a posting and clears the stored draft.
    pub async fn complete(self, payments: Vec<PaymentPosting>) -> SyncResult<SalePosting> {
        let posting = self.prepare(payments)?;
        self.finish().await?;
        Ok(posting)
    }

    pub async fn abandon(self) -> SyncResult<()> {
        self.finish().await
    }

    async fn checkpoint(&self) -> SyncResult<()> {
        Ok(self.drafts.save(&self.draft).await?)
    }
}
