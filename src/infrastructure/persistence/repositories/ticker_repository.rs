use crate::domain::errors::EngineError;
use crate::domain::market::{TickerAudit, TickerRecord};
use crate::domain::repositories::TickerRepo;
use crate::infrastructure::persistence::repositories::timestamp_col;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

pub struct SqliteTickerRepo {
    pool: SqlitePool,
}

impl SqliteTickerRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<TickerRecord> {
        Ok(TickerRecord {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            exchange: row.try_get("exchange")?,
            source: row.try_get("source")?,
            enabled: row.try_get("enabled")?,
            created_at: timestamp_col(row, "created_at")?,
            updated_at: timestamp_col(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl TickerRepo for SqliteTickerRepo {
    async fn create(&self, symbol: &str, exchange: &str, source: &str) -> Result<TickerRecord> {
        TickerRecord::validate(symbol, exchange, source)
            .map_err(EngineError::InvalidInput)?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO tickers (symbol, exchange, source, enabled, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(exchange)
        .bind(source)
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert ticker")?;

        Ok(TickerRecord {
            id: result.last_insert_rowid(),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            source: source.to_string(),
            enabled: true,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get(&self, id: i64) -> Result<Option<TickerRecord>> {
        let row = sqlx::query("SELECT * FROM tickers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn get_by_symbol(&self, symbol: &str) -> Result<Option<TickerRecord>> {
        let row = sqlx::query("SELECT * FROM tickers WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn get_all(&self) -> Result<Vec<TickerRecord>> {
        let rows = sqlx::query("SELECT * FROM tickers ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn get_enabled(&self) -> Result<Vec<TickerRecord>> {
        let rows = sqlx::query("SELECT * FROM tickers WHERE enabled = 1 ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE tickers SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        // Cascade through quotes and audit rows
        sqlx::query("DELETE FROM quotes WHERE ticker_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM ticker_audit WHERE ticker_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM tickers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_audit(&self, ticker_id: i64, action: &str, detail: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO ticker_audit (ticker_id, action, detail, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(ticker_id)
        .bind(action)
        .bind(detail)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to append ticker audit")?;
        Ok(())
    }

    async fn get_audit(&self, ticker_id: i64, limit: usize) -> Result<Vec<TickerAudit>> {
        let rows = sqlx::query(
            "SELECT * FROM ticker_audit WHERE ticker_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(ticker_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TickerAudit {
                    id: row.try_get("id")?,
                    ticker_id: row.try_get("ticker_id")?,
                    action: row.try_get("action")?,
                    detail: row.try_get("detail")?,
                    created_at: timestamp_col(row, "created_at")?,
                })
            })
            .collect()
    }
}
