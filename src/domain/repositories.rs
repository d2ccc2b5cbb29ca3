//! Repository ports the engine depends on.
//!
//! Narrow async traits implemented by the persistence layer; the engine
//! holds no transactions spanning multiple ports. SQLite implementations
//! live in `infrastructure::persistence`; in-memory implementations (used
//! by tests and `--no-save` runs) in `infrastructure::repositories`.

use crate::domain::market::{Bar, TickerAudit, TickerRecord};
use crate::domain::records::{
    BacktestRun, DailySnapshot, MetricKind, Monitor, MonitorStatus, RunStatus,
};
use crate::domain::performance::PerformanceMetrics;
use crate::domain::trading::TradeLogEntry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Ticker metadata and audit trail.
#[async_trait]
pub trait TickerRepo: Send + Sync {
    async fn create(&self, symbol: &str, exchange: &str, source: &str) -> Result<TickerRecord>;

    async fn get(&self, id: i64) -> Result<Option<TickerRecord>>;

    async fn get_by_symbol(&self, symbol: &str) -> Result<Option<TickerRecord>>;

    async fn get_all(&self) -> Result<Vec<TickerRecord>>;

    async fn get_enabled(&self) -> Result<Vec<TickerRecord>>;

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()>;

    /// Cascades through quotes and audit records.
    async fn delete(&self, id: i64) -> Result<()>;

    async fn append_audit(&self, ticker_id: i64, action: &str, detail: &str) -> Result<()>;

    async fn get_audit(&self, ticker_id: i64, limit: usize) -> Result<Vec<TickerAudit>>;
}

/// Per-ticker OHLCV storage.
#[async_trait]
pub trait QuoteRepo: Send + Sync {
    /// Idempotent on `(ticker, date)`: existing dates are upserted.
    /// Returns the number of bars written.
    async fn batch_upsert(&self, ticker_id: i64, bars: &[Bar]) -> Result<u64>;

    async fn get_window(&self, ticker_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<Bar>>;

    async fn get_date_range(&self, ticker_id: i64) -> Result<Option<(NaiveDate, NaiveDate)>>;

    async fn count(&self, ticker_id: i64) -> Result<u64>;

    async fn delete(&self, ticker_id: i64) -> Result<()>;
}

/// Backtest run records.
#[async_trait]
pub trait RunRepo: Send + Sync {
    /// Persists a new record (the passed id is ignored); returns the id.
    async fn create(&self, run: &BacktestRun) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Option<BacktestRun>>;

    /// Transitions also stamp `started_at` / `completed_at`.
    async fn update_status(&self, id: i64, status: RunStatus) -> Result<()>;

    async fn update_results(
        &self,
        id: i64,
        metrics: &PerformanceMetrics,
        report: &serde_json::Value,
        execution_seconds: f64,
    ) -> Result<()>;

    async fn update_error(&self, id: i64, message: &str) -> Result<()>;

    async fn append_log(&self, id: i64, chunk: &str) -> Result<()>;

    async fn get_by_strategy(&self, strategy: &str, limit: usize) -> Result<Vec<BacktestRun>>;

    async fn get_recent(&self, limit: usize) -> Result<Vec<BacktestRun>>;

    /// Records in `status` whose lifecycle timestamp is older than the
    /// threshold; used by the dispatcher health check.
    async fn get_stale(&self, status: RunStatus, older_than: DateTime<Utc>)
        -> Result<Vec<BacktestRun>>;
}

/// Monitor records plus their append-only child collections.
#[async_trait]
pub trait MonitorRepo: Send + Sync {
    async fn create(&self, monitor: &Monitor) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Option<Monitor>>;

    async fn get_all(&self) -> Result<Vec<Monitor>>;

    async fn get_active(&self) -> Result<Vec<Monitor>>;

    async fn update_status(&self, id: i64, status: MonitorStatus) -> Result<()>;

    async fn update_last_processed(&self, id: i64, date: NaiveDate) -> Result<()>;

    async fn update_backtest_progress(
        &self,
        id: i64,
        progress: u8,
        current_date: Option<NaiveDate>,
    ) -> Result<()>;

    async fn update_backtest_status(
        &self,
        id: i64,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Upserts on `(monitor_id, date)`.
    async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()>;

    async fn save_trade(&self, monitor_id: i64, trade: &TradeLogEntry) -> Result<()>;

    async fn save_metrics(
        &self,
        monitor_id: i64,
        kind: MetricKind,
        metrics: &PerformanceMetrics,
    ) -> Result<()>;

    async fn get_metrics(&self, monitor_id: i64, kind: MetricKind)
        -> Result<Option<PerformanceMetrics>>;

    /// Most recent `limit` snapshots, oldest first.
    async fn get_snapshots(&self, monitor_id: i64, limit: usize) -> Result<Vec<DailySnapshot>>;

    async fn get_all_snapshots(&self, monitor_id: i64) -> Result<Vec<DailySnapshot>>;

    async fn get_latest_snapshot(&self, monitor_id: i64) -> Result<Option<DailySnapshot>>;

    async fn get_trades(&self, monitor_id: i64) -> Result<Vec<TradeLogEntry>>;
}
