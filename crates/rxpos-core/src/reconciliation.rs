//! # Cash Reconciliation
//!
//! Variance arithmetic and the shift / refund state machines.
//!
//! ## Formulas
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SHIFT CLOSE                                                            │
//! │    expected drawer = opening_cash + expected_cash_total                 │
//! │    variance        = actual_cash_counted − expected drawer              │
//! │    variance ≠ 0  ⇒  non-empty note required (hard gate)                 │
//! │                                                                         │
//! │  REFUND APPROVAL                                                        │
//! │    variance = register_balance_before − cash_returned                   │
//! │               − register_balance_after                                  │
//! │    |variance| > tolerance  ⇒  flagged (approval still succeeds)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both state machines are pure: they take the current record and return the
//! next one, so the store and the conflict resolver share the same rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::operation::{RefundDecision, RefundRequest, ShiftOpening, ShiftTransition};
use crate::types::{CashReconciliation, PaymentMode, Refund, RefundStatus, Shift, ShiftStatus};

// =============================================================================
// Variance
// =============================================================================

/// `actual − (opening + expected_cash)`.
pub fn shift_variance(opening_cash: Money, expected_cash_total: Money, actual: Money) -> Money {
    actual - (opening_cash + expected_cash_total)
}

/// `before − returned − after`.
pub fn refund_variance(recon: &CashReconciliation) -> Money {
    recon.register_balance_before - recon.cash_returned - recon.register_balance_after
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum VarianceStatus {
    Matched,
    Flagged,
}

/// Variance preview shown to an approver before commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VarianceReport {
    pub variance: Money,
    pub status: VarianceStatus,
}

impl VarianceReport {
    pub fn is_flagged(&self) -> bool {
        self.status == VarianceStatus::Flagged
    }
}

/// Computes the refund variance and classifies it against `tolerance`.
pub fn assess_refund(recon: &CashReconciliation, tolerance: Money) -> VarianceReport {
    let variance = refund_variance(recon);
    let status = if variance.within(Money::zero(), tolerance) {
        VarianceStatus::Matched
    } else {
        VarianceStatus::Flagged
    };
    VarianceReport { variance, status }
}

// =============================================================================
// Shift State Machine
// =============================================================================

impl Shift {
    /// Starts a new active shift.
    pub fn open(id: impl Into<String>, opening: &ShiftOpening, now: DateTime<Utc>) -> Self {
        Shift {
            id: id.into(),
            cashier_id: opening.cashier_id.clone(),
            status: ShiftStatus::Active,
            opening_cash: opening.opening_cash,
            expected_cash_total: Money::zero(),
            expected_pos_total: Money::zero(),
            expected_transfer_total: Money::zero(),
            actual_cash_counted: None,
            variance: None,
            notes: None,
            started_at: now,
            ended_at: None,
            version: 0,
            last_operation_id: None,
        }
    }

    /// Cash the drawer should hold right now.
    pub fn expected_drawer_cash(&self) -> Money {
        self.opening_cash + self.expected_cash_total
    }

    /// Only active shifts accept sale postings. Paused shifts reject them.
    pub fn can_post_sales(&self) -> bool {
        self.status == ShiftStatus::Active
    }

    pub fn is_open(&self) -> bool {
        self.status != ShiftStatus::Closed
    }

    /// Accumulates one payment posting into the expected totals.
    pub fn record_payment(&mut self, mode: PaymentMode, amount: Money) {
        match mode {
            PaymentMode::Cash => self.expected_cash_total += amount,
            PaymentMode::Pos => self.expected_pos_total += amount,
            PaymentMode::Transfer => self.expected_transfer_total += amount,
        }
    }

    /// Returns the shift after `transition`, or why it is not allowed.
    ///
    /// Version bookkeeping is left to the store.
    pub fn apply_transition(
        &self,
        transition: &ShiftTransition,
        now: DateTime<Utc>,
    ) -> CoreResult<Shift> {
        let mut next = self.clone();
        match (self.status, transition) {
            (ShiftStatus::Active, ShiftTransition::Pause) => {
                next.status = ShiftStatus::Paused;
            }
            (ShiftStatus::Paused, ShiftTransition::Resume) => {
                next.status = ShiftStatus::Active;
            }
            (
                ShiftStatus::Active | ShiftStatus::Paused,
                ShiftTransition::Close {
                    actual_cash_counted,
                    notes,
                },
            ) => {
                let variance = shift_variance(
                    self.opening_cash,
                    self.expected_cash_total,
                    *actual_cash_counted,
                );
                let notes = notes
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
                if !variance.is_zero() && notes.is_none() {
                    return Err(CoreError::VarianceNoteRequired { variance });
                }
                next.status = ShiftStatus::Closed;
                next.actual_cash_counted = Some(*actual_cash_counted);
                next.variance = Some(variance);
                next.notes = notes;
                next.ended_at = Some(now);
            }
            (status, t) => {
                return Err(CoreError::invalid_transition("shift", status, t.action()));
            }
        }
        Ok(next)
    }
}

// =============================================================================
// Refund State Machine
// =============================================================================

impl Refund {
    /// Creates a pending refund after checking it against the sale total.
    ///
    /// The one-active-refund rule needs the store and is enforced there.
    pub fn request(
        id: impl Into<String>,
        request: &RefundRequest,
        sale_total: Money,
        now: DateTime<Utc>,
    ) -> CoreResult<Refund> {
        if !request.amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "amount".into(),
            }
            .into());
        }
        if request.amount > sale_total {
            return Err(CoreError::RefundExceedsSale {
                amount: request.amount,
                sale_total,
            });
        }
        Ok(Refund {
            id: id.into(),
            sale_id: request.sale_id.clone(),
            amount: request.amount,
            reason: request.reason.clone(),
            status: RefundStatus::Pending,
            requested_by: request.requested_by.clone(),
            decided_by: None,
            rejection_reason: None,
            cash_returned: None,
            register_balance_before: None,
            register_balance_after: None,
            variance: None,
            variance_flagged: false,
            created_at: now,
            decided_at: None,
            version: 0,
            last_operation_id: None,
        })
    }

    /// Applies an approval or rejection to a pending refund.
    ///
    /// A flagged variance is recorded, never refused.
    pub fn decide(
        &self,
        decision: &RefundDecision,
        tolerance: Money,
        now: DateTime<Utc>,
    ) -> CoreResult<Refund> {
        if self.status != RefundStatus::Pending {
            let action = match decision {
                RefundDecision::Approve { .. } => "approve",
                RefundDecision::Reject { .. } => "reject",
            };
            return Err(CoreError::invalid_transition("refund", self.status, action));
        }

        let mut next = self.clone();
        match decision {
            RefundDecision::Approve {
                reconciliation,
                approved_by,
            } => {
                if reconciliation.cash_returned != self.amount {
                    return Err(ValidationError::invalid_format(
                        "cash_returned",
                        format!(
                            "{} does not match refund amount {}",
                            reconciliation.cash_returned, self.amount
                        ),
                    )
                    .into());
                }
                let report = assess_refund(reconciliation, tolerance);
                next.status = RefundStatus::Approved;
                next.decided_by = Some(approved_by.clone());
                next.cash_returned = Some(reconciliation.cash_returned);
                next.register_balance_before = Some(reconciliation.register_balance_before);
                next.register_balance_after = Some(reconciliation.register_balance_after);
                next.variance = Some(report.variance);
                next.variance_flagged = report.is_flagged();
            }
            RefundDecision::Reject {
                reason,
                rejected_by,
            } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(ValidationError::required("reason").into());
                }
                next.status = RefundStatus::Rejected;
                next.decided_by = Some(rejected_by.clone());
                next.rejection_reason = Some(reason.to_string());
            }
        }
        next.decided_at = Some(now);
        Ok(next)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(opening: i64) -> Shift {
        Shift::open(
            "shift-1",
            &ShiftOpening {
                cashier_id: "cashier-1".into(),
                opening_cash: Money::from_minor(opening),
            },
            Utc::now(),
        )
    }

    fn close(actual: i64, notes: Option<&str>) -> ShiftTransition {
        ShiftTransition::Close {
            actual_cash_counted: Money::from_minor(actual),
            notes: notes.map(str::to_string),
        }
    }

    fn recon(returned: i64, before: i64, after: i64) -> CashReconciliation {
        CashReconciliation {
            cash_returned: Money::from_minor(returned),
            register_balance_before: Money::from_minor(before),
            register_balance_after: Money::from_minor(after),
        }
    }

    fn pending_refund(amount: i64) -> Refund {
        Refund::request(
            "refund-1",
            &RefundRequest {
                sale_id: "sale-1".into(),
                amount: Money::from_minor(amount),
                reason: Some("Wrong strength dispensed".into()),
                requested_by: "cashier-1".into(),
            },
            Money::from_minor(amount),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_shift_close_balanced_needs_no_note() {
        let mut s = shift(1000);
        s.record_payment(PaymentMode::Cash, Money::from_minor(500));
        s.record_payment(PaymentMode::Pos, Money::from_minor(700));
        assert_eq!(s.expected_drawer_cash(), Money::from_minor(1500));

        let closed = s.apply_transition(&close(1500, None), Utc::now()).unwrap();
        assert_eq!(closed.status, ShiftStatus::Closed);
        assert_eq!(closed.variance, Some(Money::zero()));
        assert!(closed.ended_at.is_some());
    }

    #[test]
    fn test_shift_close_with_variance_requires_note() {
        let s = shift(1000);
        let err = s.apply_transition(&close(900, None), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            CoreError::VarianceNoteRequired {
                variance: Money::from_minor(-100)
            }
        );

        assert!(s.apply_transition(&close(900, Some("   ")), Utc::now()).is_err());

        let closed = s
            .apply_transition(&close(900, Some("Change given twice")), Utc::now())
            .unwrap();
        assert_eq!(closed.variance, Some(Money::from_minor(-100)));
        assert_eq!(closed.notes.as_deref(), Some("Change given twice"));
    }

    #[test]
    fn test_pause_resume_keep_totals() {
        let mut s = shift(0);
        s.record_payment(PaymentMode::Transfer, Money::from_minor(300));

        let paused = s.apply_transition(&ShiftTransition::Pause, Utc::now()).unwrap();
        assert!(!paused.can_post_sales());
        assert_eq!(paused.expected_transfer_total, Money::from_minor(300));

        let resumed = paused
            .apply_transition(&ShiftTransition::Resume, Utc::now())
            .unwrap();
        assert!(resumed.can_post_sales());
        assert_eq!(resumed.expected_transfer_total, Money::from_minor(300));
    }

    #[test]
    fn test_invalid_shift_transitions() {
        let s = shift(0);
        assert!(s.apply_transition(&ShiftTransition::Resume, Utc::now()).is_err());

        let closed = s.apply_transition(&close(0, None), Utc::now()).unwrap();
        assert!(closed.apply_transition(&ShiftTransition::Pause, Utc::now()).is_err());
        assert!(closed.apply_transition(&close(0, None), Utc::now()).is_err());
    }

    #[test]
    fn test_refund_variance_scenarios() {
        let tolerance = Money::from_minor(1);

        let clean = assess_refund(&recon(500000, 2000000, 1500000), tolerance);
        assert_eq!(clean.variance, Money::zero());
        assert_eq!(clean.status, VarianceStatus::Matched);

        let off = assess_refund(&recon(500000, 2000000, 1505000), tolerance);
        assert_eq!(off.variance, Money::from_minor(-5000));
        assert!(off.is_flagged());
    }

    #[test]
    fn test_flagged_refund_still_approves() {
        let refund = pending_refund(500000);
        let approved = refund
            .decide(
                &RefundDecision::Approve {
                    reconciliation: recon(500000, 2000000, 1505000),
                    approved_by: "manager-1".into(),
                },
                Money::from_minor(1),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(approved.status, RefundStatus::Approved);
        assert!(approved.variance_flagged);
        assert_eq!(approved.variance, Some(Money::from_minor(-5000)));
        assert_eq!(approved.reconciliation(), Some(recon(500000, 2000000, 1505000)));
    }

    #[test]
    fn test_refund_terminal_states() {
        let refund = pending_refund(1000);

        let missing_reason = refund.decide(
            &RefundDecision::Reject {
                reason: "".into(),
                rejected_by: "manager-1".into(),
            },
            Money::from_minor(1),
            Utc::now(),
        );
        assert!(missing_reason.is_err());

        let rejected = refund
            .decide(
                &RefundDecision::Reject {
                    reason: "Outside return window".into(),
                    rejected_by: "manager-1".into(),
                },
                Money::from_minor(1),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(rejected.status, RefundStatus::Rejected);

        let again = rejected.decide(
            &RefundDecision::Approve {
                reconciliation: recon(1000, 5000, 4000),
                approved_by: "manager-1".into(),
            },
            Money::from_minor(1),
            Utc::now(),
        );
        assert!(matches!(again, Err(CoreError::InvalidTransition { .. })));
    }

    #[test]
    fn test_refund_amount_bounded_by_sale() {
        let result = Refund::request(
            "r-2",
            &RefundRequest {
                sale_id: "sale-1".into(),
                amount: Money::from_minor(6000),
                reason: None,
                requested_by: "cashier-1".into(),
            },
            Money::from_minor(5000),
            Utc::now(),
        );
        assert!(matches!(result, Err(CoreError::RefundExceedsSale { .. })));
    }
}
