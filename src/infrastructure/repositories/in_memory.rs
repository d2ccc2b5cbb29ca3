//! In-memory repository implementations.
//!
//! Back engine tests and `--no-save` runs; thread-safe via `Arc<RwLock>`.
//! Semantics mirror the SQLite implementations, including upsert keys and
//! status timestamping.

use crate::domain::errors::EngineError;
use crate::domain::market::{Bar, TickerAudit, TickerRecord};
use crate::domain::performance::PerformanceMetrics;
use crate::domain::records::{
    BacktestRun, DailySnapshot, MetricKind, Monitor, MonitorStatus, RunStatus,
};
use crate::domain::repositories::{MonitorRepo, QuoteRepo, RunRepo, TickerRepo};
use crate::domain::trading::TradeLogEntry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryTickerRepo {
    tickers: RwLock<Vec<TickerRecord>>,
    audit: RwLock<Vec<TickerAudit>>,
    next_id: RwLock<i64>,
}

impl InMemoryTickerRepo {
    pub fn new() -> Self {
        Self {
            next_id: RwLock::new(1),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TickerRepo for InMemoryTickerRepo {
    async fn create(&self, symbol: &str, exchange: &str, source: &str) -> Result<TickerRecord> {
        TickerRecord::validate(symbol, exchange, source).map_err(EngineError::InvalidInput)?;
        let mut tickers = self.tickers.write().unwrap();
        if tickers.iter().any(|t| t.symbol == symbol) {
            return Err(
                EngineError::InvalidInput(format!("symbol '{symbol}' already exists")).into(),
            );
        }
        let mut next_id = self.next_id.write().unwrap();
        let now = Utc::now();
        let record = TickerRecord {
            id: *next_id,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            source: source.to_string(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        *next_id += 1;
        tickers.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<Option<TickerRecord>> {
        Ok(self
            .tickers
            .read()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn get_by_symbol(&self, symbol: &str) -> Result<Option<TickerRecord>> {
        Ok(self
            .tickers
            .read()
            .unwrap()
            .iter()
            .find(|t| t.symbol == symbol)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<TickerRecord>> {
        let mut all = self.tickers.read().unwrap().clone();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(all)
    }

    async fn get_enabled(&self) -> Result<Vec<TickerRecord>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|t| t.enabled)
            .collect())
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let mut tickers = self.tickers.write().unwrap();
        if let Some(ticker) = tickers.iter_mut().find(|t| t.id == id) {
            ticker.enabled = enabled;
            ticker.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.tickers.write().unwrap().retain(|t| t.id != id);
        self.audit.write().unwrap().retain(|a| a.ticker_id != id);
        Ok(())
    }

    async fn append_audit(&self, ticker_id: i64, action: &str, detail: &str) -> Result<()> {
        let mut audit = self.audit.write().unwrap();
        let id = audit.len() as i64 + 1;
        audit.push(TickerAudit {
            id,
            ticker_id,
            action: action.to_string(),
            detail: detail.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_audit(&self, ticker_id: i64, limit: usize) -> Result<Vec<TickerAudit>> {
        Ok(self
            .audit
            .read()
            .unwrap()
            .iter()
            .rev()
            .filter(|a| a.ticker_id == ticker_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryQuoteRepo {
    quotes: RwLock<BTreeMap<i64, BTreeMap<NaiveDate, Bar>>>,
}

impl InMemoryQuoteRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuoteRepo for InMemoryQuoteRepo {
    async fn batch_upsert(&self, ticker_id: i64, bars: &[Bar]) -> Result<u64> {
        let mut quotes = self.quotes.write().unwrap();
        let series = quotes.entry(ticker_id).or_default();
        for bar in bars {
            series.insert(bar.date, *bar);
        }
        Ok(bars.len() as u64)
    }

    async fn get_window(&self, ticker_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<Bar>> {
        Ok(self
            .quotes
            .read()
            .unwrap()
            .get(&ticker_id)
            .map(|series| series.range(from..=to).map(|(_, bar)| *bar).collect())
            .unwrap_or_default())
    }

    async fn get_date_range(&self, ticker_id: i64) -> Result<Option<(NaiveDate, NaiveDate)>> {
        Ok(self.quotes.read().unwrap().get(&ticker_id).and_then(|s| {
            match (s.keys().next(), s.keys().next_back()) {
                (Some(&min), Some(&max)) => Some((min, max)),
                _ => None,
            }
        }))
    }

    async fn count(&self, ticker_id: i64) -> Result<u64> {
        Ok(self
            .quotes
            .read()
            .unwrap()
            .get(&ticker_id)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn delete(&self, ticker_id: i64) -> Result<()> {
        self.quotes.write().unwrap().remove(&ticker_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRunRepo {
    runs: RwLock<Vec<BacktestRun>>,
    next_id: RwLock<i64>,
}

impl InMemoryRunRepo {
    pub fn new() -> Self {
        Self {
            next_id: RwLock::new(1),
            ..Default::default()
        }
    }

    /// Test hook: backdate a lifecycle timestamp to simulate staleness.
    pub fn backdate(&self, id: i64, status: RunStatus, at: DateTime<Utc>) {
        let mut runs = self.runs.write().unwrap();
        if let Some(run) = runs.iter_mut().find(|r| r.id == id) {
            run.status = status;
            match status {
                RunStatus::Running => run.started_at = Some(at),
                _ => run.created_at = at,
            }
        }
    }
}

#[async_trait]
impl RunRepo for InMemoryRunRepo {
    async fn create(&self, run: &BacktestRun) -> Result<i64> {
        let mut runs = self.runs.write().unwrap();
        let mut next_id = self.next_id.write().unwrap();
        let mut stored = run.clone();
        stored.id = *next_id;
        *next_id += 1;
        runs.push(stored.clone());
        Ok(stored.id)
    }

    async fn get(&self, id: i64) -> Result<Option<BacktestRun>> {
        Ok(self.runs.read().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn update_status(&self, id: i64, status: RunStatus) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        if let Some(run) = runs.iter_mut().find(|r| r.id == id) {
            run.status = status;
            match status {
                RunStatus::Running => run.started_at = Some(Utc::now()),
                RunStatus::Completed | RunStatus::Failed => run.completed_at = Some(Utc::now()),
                RunStatus::Pending => {}
            }
        }
        Ok(())
    }

    async fn update_results(
        &self,
        id: i64,
        metrics: &PerformanceMetrics,
        report: &serde_json::Value,
        execution_seconds: f64,
    ) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        if let Some(run) = runs.iter_mut().find(|r| r.id == id) {
            run.metrics = Some(metrics.clone());
            run.report = Some(report.clone());
            run.execution_seconds = Some(execution_seconds);
        }
        Ok(())
    }

    async fn update_error(&self, id: i64, message: &str) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        if let Some(run) = runs.iter_mut().find(|r| r.id == id) {
            run.status = RunStatus::Failed;
            run.error_message = Some(message.to_string());
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn append_log(&self, id: i64, chunk: &str) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        if let Some(run) = runs.iter_mut().find(|r| r.id == id) {
            run.log_output.push_str(chunk);
        }
        Ok(())
    }

    async fn get_by_strategy(&self, strategy: &str, limit: usize) -> Result<Vec<BacktestRun>> {
        let runs = self.runs.read().unwrap();
        let mut found: Vec<BacktestRun> = runs
            .iter()
            .filter(|r| r.strategy == strategy)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit);
        Ok(found)
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<BacktestRun>> {
        let runs = self.runs.read().unwrap();
        let mut found: Vec<BacktestRun> = runs.iter().cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit);
        Ok(found)
    }

    async fn get_stale(
        &self,
        status: RunStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<BacktestRun>> {
        let runs = self.runs.read().unwrap();
        Ok(runs
            .iter()
            .filter(|r| r.status == status)
            .filter(|r| match status {
                RunStatus::Running => r.started_at.map(|t| t < older_than).unwrap_or(false),
                _ => r.created_at < older_than,
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMonitorRepo {
    monitors: RwLock<Vec<Monitor>>,
    snapshots: RwLock<BTreeMap<(i64, NaiveDate), DailySnapshot>>,
    trades: RwLock<Vec<(i64, TradeLogEntry)>>,
    metrics: RwLock<BTreeMap<(i64, String), PerformanceMetrics>>,
    next_id: RwLock<i64>,
}

impl InMemoryMonitorRepo {
    pub fn new() -> Self {
        Self {
            next_id: RwLock::new(1),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MonitorRepo for InMemoryMonitorRepo {
    async fn create(&self, monitor: &Monitor) -> Result<i64> {
        let mut monitors = self.monitors.write().unwrap();
        let mut next_id = self.next_id.write().unwrap();
        let mut stored = monitor.clone();
        stored.id = *next_id;
        *next_id += 1;
        monitors.push(stored.clone());
        Ok(stored.id)
    }

    async fn get(&self, id: i64) -> Result<Option<Monitor>> {
        Ok(self
            .monitors
            .read()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<Monitor>> {
        Ok(self.monitors.read().unwrap().clone())
    }

    async fn get_active(&self) -> Result<Vec<Monitor>> {
        Ok(self
            .monitors
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.status == MonitorStatus::Active)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: i64, status: MonitorStatus) -> Result<()> {
        let mut monitors = self.monitors.write().unwrap();
        if let Some(monitor) = monitors.iter_mut().find(|m| m.id == id) {
            monitor.status = status;
        }
        Ok(())
    }

    async fn update_last_processed(&self, id: i64, date: NaiveDate) -> Result<()> {
        let mut monitors = self.monitors.write().unwrap();
        if let Some(monitor) = monitors.iter_mut().find(|m| m.id == id) {
            monitor.last_processed_date = Some(date);
        }
        Ok(())
    }

    async fn update_backtest_progress(
        &self,
        id: i64,
        progress: u8,
        current_date: Option<NaiveDate>,
    ) -> Result<()> {
        let mut monitors = self.monitors.write().unwrap();
        if let Some(monitor) = monitors.iter_mut().find(|m| m.id == id) {
            monitor.backtest_progress = progress.min(100);
            monitor.backtest_current_date = current_date;
        }
        Ok(())
    }

    async fn update_backtest_status(
        &self,
        id: i64,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut monitors = self.monitors.write().unwrap();
        if let Some(monitor) = monitors.iter_mut().find(|m| m.id == id) {
            monitor.backtest_status = status;
            monitor.backtest_error = error.map(String::from);
        }
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        self.snapshots
            .write()
            .unwrap()
            .insert((snapshot.monitor_id, snapshot.date), snapshot.clone());
        Ok(())
    }

    async fn save_trade(&self, monitor_id: i64, trade: &TradeLogEntry) -> Result<()> {
        self.trades
            .write()
            .unwrap()
            .push((monitor_id, trade.clone()));
        Ok(())
    }

    async fn save_metrics(
        &self,
        monitor_id: i64,
        kind: MetricKind,
        metrics: &PerformanceMetrics,
    ) -> Result<()> {
        self.metrics
            .write()
            .unwrap()
            .insert((monitor_id, kind.as_str().to_string()), metrics.clone());
        Ok(())
    }

    async fn get_metrics(
        &self,
        monitor_id: i64,
        kind: MetricKind,
    ) -> Result<Option<PerformanceMetrics>> {
        Ok(self
            .metrics
            .read()
            .unwrap()
            .get(&(monitor_id, kind.as_str().to_string()))
            .cloned())
    }

    async fn get_snapshots(&self, monitor_id: i64, limit: usize) -> Result<Vec<DailySnapshot>> {
        let all = self.get_all_snapshots(monitor_id).await?;
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn get_all_snapshots(&self, monitor_id: i64) -> Result<Vec<DailySnapshot>> {
        Ok(self
            .snapshots
            .read()
            .unwrap()
            .iter()
            .filter(|((id, _), _)| *id == monitor_id)
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }

    async fn get_latest_snapshot(&self, monitor_id: i64) -> Result<Option<DailySnapshot>> {
        Ok(self
            .get_all_snapshots(monitor_id)
            .await?
            .into_iter()
            .next_back())
    }

    async fn get_trades(&self, monitor_id: i64) -> Result<Vec<TradeLogEntry>> {
        Ok(self
            .trades
            .read()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == monitor_id)
            .map(|(_, trade)| trade.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(day: u32) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: dec!(10),
            high: dec!(11),
            low: dec!(9),
            close: dec!(10),
            volume: 1,
        }
    }

    #[tokio::test]
    async fn test_quote_upsert_is_idempotent() {
        let repo = InMemoryQuoteRepo::new();
        repo.batch_upsert(1, &[bar(2), bar(3)]).await.unwrap();
        repo.batch_upsert(1, &[bar(2), bar(3)]).await.unwrap();

        assert_eq!(repo.count(1).await.unwrap(), 2);
        let range = repo.get_date_range(1).await.unwrap().unwrap();
        assert_eq!(range.0, bar(2).date);
        assert_eq!(range.1, bar(3).date);
    }

    #[tokio::test]
    async fn test_ticker_create_rejects_duplicate_symbol() {
        let repo = InMemoryTickerRepo::new();
        repo.create("AAPL", "NASDAQ", "stooq").await.unwrap();
        assert!(repo.create("AAPL", "NASDAQ", "stooq").await.is_err());
    }
}
