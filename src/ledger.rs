use chrono::{Days, NaiveDate, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::Database;
use crate::error::AppError;

/// Cost for a single UTC calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct DailyCost {
    pub date: String,
    pub cost: f64,
}

/// One row of the ledger: `(email, date)` is the primary key.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerRow {
    pub email: String,
    pub date: String,
    pub cost: f64,
}

/// Usage summary over a rolling window, ordered by date ascending.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub email: String,
    pub days: u32,
    pub cost: f64,
    pub usage: Vec<DailyCost>,
}

/// Per-(email, date) cumulative cost store backed by SQLite.
///
/// All operations are serialised by the database mutex; the metering loop is
/// the only steady-state writer.
pub struct CostLedger {
    db: Database,
}

impl CostLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Accumulate `delta` dollars onto today's row for `email`, creating the
    /// row lazily. Negative or non-finite deltas are rejected.
    pub fn add(&self, email: &str, delta: f64) -> Result<(), AppError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(AppError::Internal(format!(
                "invalid cost delta {delta} for {email}"
            )));
        }
        let date = today();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cost (email, date, cost) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email, date) DO UPDATE SET cost = cost + excluded.cost",
                params![email, date, delta],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Overwrite the stored value for `(email, date)` unconditionally.
    pub fn set_cost(&self, email: &str, date: &str, value: f64) -> Result<(), AppError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cost (email, date, cost) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email, date) DO UPDATE SET cost = excluded.cost",
                params![email, date, value],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Total spend for `email` over the last `days` UTC calendar days,
    /// today inclusive.
    pub fn sum(&self, email: &str, days: u32) -> Result<f64, AppError> {
        let start = window_start(days);
        let total = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(cost), 0.0) FROM cost WHERE email = ?1 AND date >= ?2",
                params![email, start],
                |row| row.get::<_, f64>(0),
            )
        })?;
        Ok(total)
    }

    /// Per-day usage rows for `email` over the window, date ascending.
    pub fn usage(&self, email: &str, days: u32) -> Result<UsageSummary, AppError> {
        let start = window_start(days);
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, cost FROM cost WHERE email = ?1 AND date >= ?2 ORDER BY date ASC",
            )?;
            let rows = stmt.query_map(params![email, start], |row| {
                Ok(DailyCost {
                    date: row.get(0)?,
                    cost: row.get(1)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;

        let cost = rows.iter().map(|r| r.cost).sum();
        Ok(UsageSummary {
            email: email.to_string(),
            days,
            cost,
            usage: rows,
        })
    }

    /// Full ledger scan, ordered by email then date.
    pub fn all_usage(&self) -> Result<Vec<LedgerRow>, AppError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT email, date, cost FROM cost ORDER BY email, date")?;
            let rows = stmt.query_map([], |row| {
                Ok(LedgerRow {
                    email: row.get(0)?,
                    date: row.get(1)?,
                    cost: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(rows)
    }
}

/// Today's UTC calendar date as `YYYY-MM-DD`.
pub fn today() -> String {
    Utc::now().date_naive().to_string()
}

/// First date inside a window of `days` calendar days ending today.
fn window_start(days: u32) -> String {
    let today = Utc::now().date_naive();
    let back = Days::new(u64::from(days.max(1) - 1));
    today
        .checked_sub_days(back)
        .unwrap_or(NaiveDate::MIN)
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
