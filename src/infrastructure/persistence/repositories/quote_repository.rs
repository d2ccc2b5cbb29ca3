use crate::domain::market::Bar;
use crate::domain::repositories::QuoteRepo;
use crate::infrastructure::persistence::repositories::{date_col, decimal_col};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

pub struct SqliteQuoteRepo {
    pool: SqlitePool,
}

impl SqliteQuoteRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<Bar> {
        let volume: i64 = row.try_get("volume")?;
        Ok(Bar {
            date: date_col(row, "date")?,
            open: decimal_col(row, "open")?,
            high: decimal_col(row, "high")?,
            low: decimal_col(row, "low")?,
            close: decimal_col(row, "close")?,
            volume: volume.max(0) as u64,
        })
    }
}

#[async_trait]
impl QuoteRepo for SqliteQuoteRepo {
    async fn batch_upsert(&self, ticker_id: i64, bars: &[Bar]) -> Result<u64> {
        let mut written = 0u64;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO quotes (ticker_id, date, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (ticker_id, date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(ticker_id)
            .bind(bar.date.to_string())
            .bind(bar.open.to_string())
            .bind(bar.high.to_string())
            .bind(bar.low.to_string())
            .bind(bar.close.to_string())
            .bind(bar.volume as i64)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to upsert quote {} {}", ticker_id, bar.date))?;
            written += 1;
        }
        Ok(written)
    }

    async fn get_window(&self, ticker_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<Bar>> {
        let rows = sqlx::query(
            "SELECT * FROM quotes WHERE ticker_id = ? AND date >= ? AND date <= ? ORDER BY date",
        )
        .bind(ticker_id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn get_date_range(&self, ticker_id: i64) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let row = sqlx::query(
            "SELECT MIN(date) AS min_date, MAX(date) AS max_date FROM quotes WHERE ticker_id = ?",
        )
        .bind(ticker_id)
        .fetch_one(&self.pool)
        .await?;

        let min: Option<String> = row.try_get("min_date")?;
        let max: Option<String> = row.try_get("max_date")?;
        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((min.parse()?, max.parse()?))),
            _ => Ok(None),
        }
    }

    async fn count(&self, ticker_id: i64) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM quotes WHERE ticker_id = ?")
            .bind(ticker_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn delete(&self, ticker_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM quotes WHERE ticker_id = ?")
            .bind(ticker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
