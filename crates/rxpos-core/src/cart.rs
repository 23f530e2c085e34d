//! # Sale Draft
//!
//! The cart of the sale currently being rung up.
//!
//! A draft belongs to one sale-entry session. The owner mutates it in memory
//! and persists it only at checkpoints (add, remove, complete), so a restart
//! restores the cart exactly as it was after the last checkpoint.
//!
//! ```text
//!   Scan item ───► add_item()        ──► checkpoint
//!   Change qty ──► update_quantity()
//!   Remove ──────► remove_item()     ──► checkpoint
//!   Tender ──────► into_posting()    ──► checkpoint (draft cleared)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::operation::{PaymentPosting, SaleLine, SalePosting};
use crate::types::InventoryItem;
use crate::{MAX_DRAFT_LINES, MAX_ITEM_QUANTITY};

/// A line in the draft, with prices frozen when the product was scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DraftLine {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    /// Catalog sell price at scan time.
    pub unit_price: Money,
    /// Price charged per unit.
    pub price: Money,
    pub cost_price: Money,
    pub discount: Money,
    pub is_wholesale: bool,
}

impl DraftLine {
    fn from_item(item: &InventoryItem, quantity: i64) -> Self {
        DraftLine {
            product_id: item.id.clone(),
            name: item.name.clone(),
            quantity,
            unit_price: item.sell_price,
            price: item.sell_price,
            cost_price: item.cost_price,
            discount: Money::zero(),
            is_wholesale: false,
        }
    }

    /// `price × quantity − discount`.
    pub fn line_total(&self) -> Money {
        self.price.multiply_quantity(self.quantity) - self.discount
    }
}

/// Session-scoped cart.
///
/// ## Invariants
/// - Lines are unique by `product_id` (adding the same product again raises quantity)
/// - Every quantity is in `1..=MAX_ITEM_QUANTITY`
/// - At most `MAX_DRAFT_LINES` lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleDraft {
    pub session_id: String,
    pub cashier_id: String,
    pub shift_id: Option<String>,
    pub lines: Vec<DraftLine>,
    pub discount: Money,
    pub customer_name: Option<String>,
    pub business_name: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl SaleDraft {
    pub fn new(
        session_id: impl Into<String>,
        cashier_id: impl Into<String>,
        shift_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        SaleDraft {
            session_id: session_id.into(),
            cashier_id: cashier_id.into(),
            shift_id,
            lines: Vec::new(),
            discount: Money::zero(),
            customer_name: None,
            business_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds a product or raises the quantity of its existing line.
    pub fn add_item(&mut self, item: &InventoryItem, quantity: i64) -> CoreResult<()> {
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == item.id) {
            let new_qty = line.quantity + quantity;
            check_quantity(new_qty)?;
            line.quantity = new_qty;
            self.touch();
            return Ok(());
        }

        check_quantity(quantity)?;
        if self.lines.len() >= MAX_DRAFT_LINES {
            return Err(ValidationError::OutOfRange {
                field: "lines".into(),
                min: 1,
                max: MAX_DRAFT_LINES as i64,
            }
            .into());
        }
        self.lines.push(DraftLine::from_item(item, quantity));
        self.touch();
        Ok(())
    }

    /// Sets a line's quantity; zero removes the line.
    pub fn update_quantity(&mut self, product_id: &str, quantity: i64) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_item(product_id);
        }
        check_quantity(quantity)?;
        let line = self.line_mut(product_id)?;
        line.quantity = quantity;
        self.touch();
        Ok(())
    }

    /// Charges a wholesale price for one line.
    pub fn set_wholesale_price(&mut self, product_id: &str, price: Money) -> CoreResult<()> {
        crate::validation::validate_non_negative("price", price)?;
        let line = self.line_mut(product_id)?;
        line.price = price;
        line.is_wholesale = price != line.unit_price;
        self.touch();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: &str) -> CoreResult<()> {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        if self.lines.len() == before {
            return Err(CoreError::not_found("draft line", product_id));
        }
        self.touch();
        Ok(())
    }

    /// Sale-level discount; cannot exceed the subtotal.
    pub fn set_discount(&mut self, discount: Money) -> CoreResult<()> {
        crate::validation::validate_non_negative("discount", discount)?;
        if discount > self.subtotal() {
            return Err(ValidationError::invalid_format(
                "discount",
                format!("{} exceeds subtotal {}", discount, self.subtotal()),
            )
            .into());
        }
        self.discount = discount;
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.discount = Money::zero();
        self.touch();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(DraftLine::line_total).sum()
    }

    pub fn total(&self) -> Money {
        self.subtotal() - self.discount
    }

    pub fn totals(&self) -> DraftTotals {
        DraftTotals::from(self)
    }

    /// Turns the draft into a sale posting under `transaction_id`.
    ///
    /// The posting is fully validated, including payment reconciliation.
    pub fn to_posting(
        &self,
        transaction_id: impl Into<String>,
        payments: Vec<PaymentPosting>,
    ) -> CoreResult<SalePosting> {
        let posting = SalePosting {
            transaction_id: transaction_id.into(),
            total: self.total(),
            discount: self.discount,
            customer_name: self.customer_name.clone(),
            business_name: self.business_name.clone(),
            cashier_id: self.cashier_id.clone(),
            shift_id: self.shift_id.clone(),
            items: self
                .lines
                .iter()
                .map(|l| SaleLine {
                    product_id: l.product_id.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    price: l.price,
                    discount: l.discount,
                    is_wholesale: l.is_wholesale,
                    total: l.line_total(),
                })
                .collect(),
            payments,
        };
        posting.validate()?;
        Ok(posting)
    }

    fn line_mut(&mut self, product_id: &str) -> CoreResult<&mut DraftLine> {
        self.lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or_else(|| CoreError::not_found("draft line", product_id))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn check_quantity(quantity: i64) -> CoreResult<()> {
    if quantity <= 0 || quantity > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".into(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        }
        .into());
    }
    Ok(())
}

/// Totals summary for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DraftTotals {
    pub line_count: usize,
    pub total_quantity: i64,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
}

impl From<&SaleDraft> for DraftTotals {
    fn from(draft: &SaleDraft) -> Self {
        DraftTotals {
            line_count: draft.lines.len(),
            total_quantity: draft.lines.iter().map(|l| l.quantity).sum(),
            subtotal: draft.subtotal(),
            discount: draft.discount,
            total: draft.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentMode;

    fn product(id: &str, sell: i64, cost: i64) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            id: id.to_string(),
            name: format!("Product {}", id),
            sku: format!("SKU-{}", id),
            quantity: 100,
            reorder_level: 5,
            cost_price: Money::from_minor(cost),
            sell_price: Money::from_minor(sell),
            batch_number: None,
            expiry_date: None,
            is_active: true,
            version: 1,
            last_operation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_add_same_product_raises_quantity() {
        let mut draft = SaleDraft::new("sess-1", "cashier-1", None);
        let p = product("1", 250, 100);

        draft.add_item(&p, 2).unwrap();
        draft.add_item(&p, 3).unwrap();

        let totals = draft.totals();
        assert_eq!(totals.line_count, 1);
        assert_eq!(totals.total_quantity, 5);
        assert_eq!(totals.subtotal, Money::from_minor(1250));
    }

    #[test]
    fn test_quantity_limits() {
        let mut draft = SaleDraft::new("sess-1", "cashier-1", None);
        let p = product("1", 250, 100);

        assert!(draft.add_item(&p, 0).is_err());
        assert!(draft.add_item(&p, MAX_ITEM_QUANTITY + 1).is_err());
        draft.add_item(&p, 1).unwrap();
        draft.update_quantity("1", 0).unwrap();
        assert!(draft.is_empty());
        assert!(draft.remove_item("1").is_err());
    }

    #[test]
    fn test_discount_and_wholesale() {
        let mut draft = SaleDraft::new("sess-1", "cashier-1", None);
        draft.add_item(&product("1", 1000, 600), 2).unwrap();
        draft.set_wholesale_price("1", Money::from_minor(900)).unwrap();
        assert!(draft.lines[0].is_wholesale);

        assert!(draft.set_discount(Money::from_minor(5000)).is_err());
        draft.set_discount(Money::from_minor(300)).unwrap();
        assert_eq!(draft.total(), Money::from_minor(1500));
    }

    #[test]
    fn test_to_posting_checks_payments() {
        let mut draft = SaleDraft::new("sess-1", "cashier-1", Some("shift-1".into()));
        draft.add_item(&product("1", 500, 200), 2).unwrap();

        let short = draft.to_posting(
            "TXN-100",
            vec![PaymentPosting {
                mode: PaymentMode::Cash,
                amount: Money::from_minor(900),
            }],
        );
        assert!(short.is_err());

        let posting = draft
            .to_posting(
                "TXN-100",
                vec![PaymentPosting {
                    mode: PaymentMode::Cash,
                    amount: Money::from_minor(1000),
                }],
            )
            .unwrap();
        assert_eq!(posting.total, Money::from_minor(1000));
        assert_eq!(posting.items[0].total, Money::from_minor(1000));
        assert_eq!(posting.shift_id.as_deref(), Some("shift-1"));
    }
}
