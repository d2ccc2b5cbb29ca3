use crate::domain::performance::PerformanceMetrics;
use crate::domain::records::{DailySnapshot, MetricKind, Monitor, MonitorStatus, RunStatus};
use crate::domain::repositories::MonitorRepo;
use crate::domain::trading::TradeLogEntry;
use crate::infrastructure::persistence::repositories::{
    date_col, decimal_col, opt_date_col, timestamp_col,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteMonitorRepo {
    pool: SqlitePool,
}

impl SqliteMonitorRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_monitor(row: &sqlx::sqlite::SqliteRow) -> Result<Monitor> {
        let status: String = row.try_get("status")?;
        let backtest_status: String = row.try_get("backtest_status")?;
        let parameters_json: String = row.try_get("parameters_json")?;
        let tickers_json: String = row.try_get("tickers_json")?;
        let progress: i64 = row.try_get("backtest_progress")?;

        Ok(Monitor {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            strategy: row.try_get("strategy")?,
            parameters: serde_json::from_str(&parameters_json)
                .context("corrupt parameters_json")?,
            tickers: serde_json::from_str(&tickers_json).context("corrupt tickers_json")?,
            start_date: date_col(row, "start_date")?,
            initial_capital: decimal_col(row, "initial_capital")?,
            status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            last_processed_date: opt_date_col(row, "last_processed_date")?,
            backtest_progress: progress.clamp(0, 100) as u8,
            backtest_status: backtest_status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            backtest_error: row.try_get("backtest_error")?,
            backtest_current_date: opt_date_col(row, "backtest_current_date")?,
            created_at: timestamp_col(row, "created_at")?,
        })
    }

    fn map_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<DailySnapshot> {
        let positions_json: String = row.try_get("positions_json")?;
        let variables_json: String = row.try_get("variables_json")?;
        Ok(DailySnapshot {
            monitor_id: row.try_get("monitor_id")?,
            date: date_col(row, "date")?,
            equity: decimal_col(row, "equity")?,
            cash: decimal_col(row, "cash")?,
            positions: serde_json::from_str(&positions_json).context("corrupt positions_json")?,
            strategy_variables: serde_json::from_str(&variables_json)
                .context("corrupt variables_json")?,
            daily_return: decimal_col(row, "daily_return")?,
            cumulative_return: decimal_col(row, "cumulative_return")?,
        })
    }

    fn map_trade(row: &sqlx::sqlite::SqliteRow) -> Result<TradeLogEntry> {
        let side: String = row.try_get("side")?;
        let bars_held: i64 = row.try_get("bars_held")?;
        Ok(TradeLogEntry {
            ticker: row.try_get("ticker")?,
            side: side.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            open_date: date_col(row, "open_date")?,
            close_date: date_col(row, "close_date")?,
            open_price: decimal_col(row, "open_price")?,
            close_price: decimal_col(row, "close_price")?,
            quantity: decimal_col(row, "quantity")?,
            profit: decimal_col(row, "profit")?,
            profit_percent: decimal_col(row, "profit_percent")?,
            balance_after: decimal_col(row, "balance_after")?,
            drawdown_value: decimal_col(row, "drawdown_value")?,
            drawdown_percent: decimal_col(row, "drawdown_percent")?,
            bars_held: bars_held.max(0) as usize,
            comment: row.try_get("comment")?,
        })
    }
}

#[async_trait]
impl MonitorRepo for SqliteMonitorRepo {
    async fn create(&self, monitor: &Monitor) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO monitors
                (name, strategy, parameters_json, tickers_json, start_date,
                 initial_capital, status, backtest_progress, backtest_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&monitor.name)
        .bind(&monitor.strategy)
        .bind(serde_json::to_string(&monitor.parameters)?)
        .bind(serde_json::to_string(&monitor.tickers)?)
        .bind(monitor.start_date.to_string())
        .bind(monitor.initial_capital.to_string())
        .bind(monitor.status.as_str())
        .bind(monitor.backtest_status.as_str())
        .bind(monitor.created_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert monitor")?;
        Ok(result.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> Result<Option<Monitor>> {
        let row = sqlx::query("SELECT * FROM monitors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_monitor).transpose()
    }

    async fn get_all(&self) -> Result<Vec<Monitor>> {
        let rows = sqlx::query("SELECT * FROM monitors ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_monitor).collect()
    }

    async fn get_active(&self) -> Result<Vec<Monitor>> {
        let rows = sqlx::query("SELECT * FROM monitors WHERE status = 'active' ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_monitor).collect()
    }

    async fn update_status(&self, id: i64, status: MonitorStatus) -> Result<()> {
        sqlx::query("UPDATE monitors SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_last_processed(&self, id: i64, date: NaiveDate) -> Result<()> {
        sqlx::query("UPDATE monitors SET last_processed_date = ? WHERE id = ?")
            .bind(date.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_backtest_progress(
        &self,
        id: i64,
        progress: u8,
        current_date: Option<NaiveDate>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE monitors SET backtest_progress = ?, backtest_current_date = ? WHERE id = ?",
        )
        .bind(progress.min(100) as i64)
        .bind(current_date.map(|d| d.to_string()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_backtest_status(
        &self,
        id: i64,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE monitors SET backtest_status = ?, backtest_error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitor_snapshots
                (monitor_id, date, equity, cash, positions_json, variables_json,
                 daily_return, cumulative_return)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (monitor_id, date) DO UPDATE SET
                equity = excluded.equity,
                cash = excluded.cash,
                positions_json = excluded.positions_json,
                variables_json = excluded.variables_json,
                daily_return = excluded.daily_return,
                cumulative_return = excluded.cumulative_return
            "#,
        )
        .bind(snapshot.monitor_id)
        .bind(snapshot.date.to_string())
        .bind(snapshot.equity.to_string())
        .bind(snapshot.cash.to_string())
        .bind(serde_json::to_string(&snapshot.positions)?)
        .bind(serde_json::to_string(&snapshot.strategy_variables)?)
        .bind(snapshot.daily_return.to_string())
        .bind(snapshot.cumulative_return.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to save snapshot")?;
        Ok(())
    }

    async fn save_trade(&self, monitor_id: i64, trade: &TradeLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitor_trades
                (monitor_id, ticker, side, open_date, close_date, open_price,
                 close_price, quantity, profit, profit_percent, balance_after,
                 drawdown_value, drawdown_percent, bars_held, comment)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(monitor_id)
        .bind(&trade.ticker)
        .bind(trade.side.to_string())
        .bind(trade.open_date.to_string())
        .bind(trade.close_date.to_string())
        .bind(trade.open_price.to_string())
        .bind(trade.close_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.profit.to_string())
        .bind(trade.profit_percent.to_string())
        .bind(trade.balance_after.to_string())
        .bind(trade.drawdown_value.to_string())
        .bind(trade.drawdown_percent.to_string())
        .bind(trade.bars_held as i64)
        .bind(&trade.comment)
        .execute(&self.pool)
        .await
        .context("Failed to save trade")?;
        Ok(())
    }

    async fn save_metrics(
        &self,
        monitor_id: i64,
        kind: MetricKind,
        metrics: &PerformanceMetrics,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitor_metrics (monitor_id, kind, metrics_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (monitor_id, kind) DO UPDATE SET
                metrics_json = excluded.metrics_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(monitor_id)
        .bind(kind.as_str())
        .bind(serde_json::to_string(metrics)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to save metrics")?;
        Ok(())
    }

    async fn get_metrics(
        &self,
        monitor_id: i64,
        kind: MetricKind,
    ) -> Result<Option<PerformanceMetrics>> {
        let row = sqlx::query(
            "SELECT metrics_json FROM monitor_metrics WHERE monitor_id = ? AND kind = ?",
        )
        .bind(monitor_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let json: String = row.try_get("metrics_json")?;
            serde_json::from_str(&json).context("corrupt metrics_json")
        })
        .transpose()
    }

    async fn get_snapshots(&self, monitor_id: i64, limit: usize) -> Result<Vec<DailySnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM monitor_snapshots
                WHERE monitor_id = ? ORDER BY date DESC LIMIT ?
            ) ORDER BY date
            "#,
        )
        .bind(monitor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_snapshot).collect()
    }

    async fn get_all_snapshots(&self, monitor_id: i64) -> Result<Vec<DailySnapshot>> {
        let rows = sqlx::query("SELECT * FROM monitor_snapshots WHERE monitor_id = ? ORDER BY date")
            .bind(monitor_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_snapshot).collect()
    }

    async fn get_latest_snapshot(&self, monitor_id: i64) -> Result<Option<DailySnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM monitor_snapshots WHERE monitor_id = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(monitor_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_snapshot).transpose()
    }

    async fn get_trades(&self, monitor_id: i64) -> Result<Vec<TradeLogEntry>> {
        let rows = sqlx::query("SELECT * FROM monitor_trades WHERE monitor_id = ? ORDER BY id")
            .bind(monitor_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_trade).collect()
    }
}
