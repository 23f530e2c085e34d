//! # Shift Repository
//!
//! Persists cashier shifts. Transition rules live in
//! [`rxpos_core::Shift::apply_transition`]; this module adds the version
//! check and the one-open-shift-per-cashier rule.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use rxpos_core::{CoreError, Money, Shift, ShiftOpening, ShiftTransition};

/// Figures shown on the close-shift screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSummary {
    pub shift: Shift,
    pub expected_drawer_cash: Money,
    /// Set once the shift is closed.
    pub variance: Option<Money>,
    pub sale_count: i64,
}

/// Repository for shift database operations.
#[derive(Debug, Clone)]
pub struct ShiftRepository {
    pool: SqlitePool,
}

impl ShiftRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShiftRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Shift>> {
        let shift = sqlx::query_as::<_, Shift>("SELECT * FROM shifts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(shift)
    }

    /// The cashier's active or paused shift, if any.
    pub async fn current_for_cashier(&self, cashier_id: &str) -> DbResult<Option<Shift>> {
        let shift = sqlx::query_as::<_, Shift>(
            "SELECT * FROM shifts WHERE cashier_id = ? AND status != 'closed'",
        )
        .bind(cashier_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(shift)
    }

    /// Opens a shift at version 1.
    pub async fn open(
        &self,
        id: &str,
        opening: &ShiftOpening,
        operation_id: Option<&str>,
    ) -> DbResult<Shift> {
        debug!(id = %id, cashier_id = %opening.cashier_id, "Opening shift");

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Shift>(
            "SELECT * FROM shifts WHERE cashier_id = ? AND status != 'closed'",
        )
        .bind(&opening.cashier_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(open) = existing {
            return Err(CoreError::invalid_transition("shift", open.status, "open a second").into());
        }

        let mut shift = Shift::open(id, opening, Utc::now());
        shift.version = 1;
        shift.last_operation_id = operation_id.map(str::to_string);

        sqlx::query(
            r#"
            INSERT INTO shifts (
                id, cashier_id, status, opening_cash,
                expected_cash_total, expected_pos_total, expected_transfer_total,
                started_at, version, last_operation_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&shift.id)
        .bind(&shift.cashier_id)
        .bind(shift.status)
        .bind(shift.opening_cash)
        .bind(shift.expected_cash_total)
        .bind(shift.expected_pos_total)
        .bind(shift.expected_transfer_total)
        .bind(shift.started_at)
        .bind(shift.version)
        .bind(&shift.last_operation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(id = %id, opening_cash = %shift.opening_cash, "Shift opened");
        Ok(shift)
    }

    /// Applies pause, resume or close.
    pub async fn transition(
        &self,
        id: &str,
        transition: &ShiftTransition,
        expected_version: i64,
        operation_id: Option<&str>,
    ) -> DbResult<Shift> {
        debug!(id = %id, action = transition.action(), expected_version, "Shift transition");

        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, Shift>("SELECT * FROM shifts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Shift", id))?;
        if current.version != expected_version {
            return Err(DbError::stale("shift", id, expected_version, current.version));
        }

        let mut next = current.apply_transition(transition, Utc::now())?;
        next.version = current.version + 1;
        next.last_operation_id = operation_id.map(str::to_string);

        sqlx::query(
            r#"
            UPDATE shifts SET
                status = ?, actual_cash_counted = ?, variance = ?, notes = ?, ended_at = ?,
                version = ?, last_operation_id = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(next.status)
        .bind(next.actual_cash_counted)
        .bind(next.variance)
        .bind(&next.notes)
        .bind(next.ended_at)
        .bind(next.version)
        .bind(&next.last_operation_id)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some(variance) = next.variance {
            info!(id = %id, variance = %variance, "Shift closed");
        }
        Ok(next)
    }

    pub async fn summary(&self, id: &str) -> DbResult<ShiftSummary> {
        let shift = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Shift", id))?;
        let sale_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales WHERE shift_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(ShiftSummary {
            expected_drawer_cash: shift.expected_drawer_cash(),
            variance: shift.variance,
            sale_count,
            shift,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use rxpos_core::ShiftStatus;

    fn opening(cash: i64) -> ShiftOpening {
        ShiftOpening {
            cashier_id: "cashier-1".into(),
            opening_cash: Money::from_minor(cash),
        }
    }

    #[tokio::test]
    async fn test_one_open_shift_per_cashier() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.shifts().open("s-1", &opening(5000), None).await.unwrap();

        let err = db.shifts().open("s-2", &opening(0), None).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidTransition { .. })));

        let current = db.shifts().current_for_cashier("cashier-1").await.unwrap().unwrap();
        assert_eq!(current.id, "s-1");
    }

    #[tokio::test]
    async fn test_pause_resume_close() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.shifts().open("s-1", &opening(5000), Some("op-1")).await.unwrap();

        let paused = db.shifts().transition("s-1", &ShiftTransition::Pause, 1, Some("op-2")).await.unwrap();
        assert_eq!(paused.status, ShiftStatus::Paused);
        assert_eq!(paused.version, 2);

        let err = db
            .shifts()
            .transition("s-1", &ShiftTransition::Pause, 2, None)
            .await
            .unwrap_err();
        assert!(err.is_business_rejection());

        let stale = db
            .shifts()
            .transition("s-1", &ShiftTransition::Resume, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(stale, DbError::StaleVersion { .. }));

        let closed = db
            .shifts()
            .transition(
                "s-1",
                &ShiftTransition::Close {
                    actual_cash_counted: Money::from_minor(4900),
                    notes: Some("short by one note".into()),
                },
                2,
                Some("op-3"),
            )
            .await
            .unwrap();
        assert_eq!(closed.status, ShiftStatus::Closed);
        assert_eq!(closed.variance, Some(Money::from_minor(-100)));

        let summary = db.shifts().summary("s-1").await.unwrap();
        assert_eq!(summary.expected_drawer_cash, Money::from_minor(5000));
        assert_eq!(summary.sale_count, 0);

        // Cashier may open again once closed
        db.shifts().open("s-2", &opening(0), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_with_variance_needs_note() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.shifts().open("s-1", &opening(5000), None).await.unwrap();

        let err = db
            .shifts()
            .transition(
                "s-1",
                &ShiftTransition::Close {
                    actual_cash_counted: Money::from_minor(5200),
                    notes: Some("   ".into()),
                },
                1,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::VarianceNoteRequired { .. })));

        let still_open = db.shifts().get_by_id("s-1").await.unwrap().unwrap();
        assert_eq!(still_open.status, ShiftStatus::Active);
    }
}
