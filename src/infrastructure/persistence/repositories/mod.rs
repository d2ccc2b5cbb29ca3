mod monitor_repository;
mod quote_repository;
mod run_repository;
mod ticker_repository;

pub use monitor_repository::SqliteMonitorRepo;
pub use quote_repository::SqliteQuoteRepo;
pub use run_repository::SqliteRunRepo;
pub use ticker_repository::SqliteTickerRepo;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Decimals are stored as TEXT to keep exact-decimal semantics.
pub(crate) fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal> {
    let raw: String = row.try_get(col)?;
    raw.parse::<Decimal>()
        .with_context(|| format!("column '{col}' holds non-decimal value '{raw}'"))
}

/// Dates are stored as `YYYY-MM-DD` TEXT.
pub(crate) fn date_col(row: &SqliteRow, col: &str) -> Result<NaiveDate> {
    let raw: String = row.try_get(col)?;
    raw.parse::<NaiveDate>()
        .with_context(|| format!("column '{col}' holds non-date value '{raw}'"))
}

pub(crate) fn opt_date_col(row: &SqliteRow, col: &str) -> Result<Option<NaiveDate>> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| {
        s.parse::<NaiveDate>()
            .with_context(|| format!("column '{col}' holds non-date value '{s}'"))
    })
    .transpose()
}

/// Timestamps are stored as unix seconds.
pub(crate) fn timestamp_col(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = row.try_get(col)?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("column '{col}' holds invalid timestamp {secs}"))
}

pub(crate) fn opt_timestamp_col(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>> {
    let secs: Option<i64> = row.try_get(col)?;
    secs.map(|s| {
        Utc.timestamp_opt(s, 0)
            .single()
            .with_context(|| format!("column '{col}' holds invalid timestamp {s}"))
    })
    .transpose()
}
