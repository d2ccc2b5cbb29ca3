use crate::application::backtest::Simulator;
use crate::application::strategies::StrategyRegistry;
use crate::domain::errors::EngineError;
use crate::domain::market::{Asset, AssetBook, Resolution, TickerRecord};
use crate::domain::performance::{PerformanceMetrics, Stats};
use crate::domain::records::{DailySnapshot, MetricKind, Monitor, MonitorStatus, RunStatus};
use crate::domain::repositories::{MonitorRepo, QuoteRepo, TickerRepo};
use crate::domain::trading::{Ledger, Position, TradeLogEntry};
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Why a daily advance did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    NoQuotes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    Processed { date: NaiveDate, equity: Decimal },
    Skipped(SkipReason),
}

/// End-of-day state streamed out of the blocking simulation worker for
/// incremental persistence.
struct DayMessage {
    date: NaiveDate,
    index: usize,
    total: usize,
    equity: Decimal,
    cash: Decimal,
    positions: Vec<Position>,
    variables: serde_json::Value,
    new_trades: Vec<TradeLogEntry>,
}

/// The forward-test state machine.
///
/// Phase A (`initial_backtest`): a full simulation from the monitor's start
/// date with per-day snapshot/trade persistence and progress updates.
/// Phase B (`advance`): an idempotent one-day step restoring the strategy
/// from its last snapshot.
pub struct MonitorService {
    tickers: Arc<dyn TickerRepo>,
    quotes: Arc<dyn QuoteRepo>,
    monitors: Arc<dyn MonitorRepo>,
    registry: Arc<StrategyRegistry>,
}

impl MonitorService {
    pub fn new(
        tickers: Arc<dyn TickerRepo>,
        quotes: Arc<dyn QuoteRepo>,
        monitors: Arc<dyn MonitorRepo>,
        registry: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            tickers,
            quotes,
            monitors,
            registry,
        }
    }

    async fn get_monitor(&self, id: i64) -> Result<Monitor> {
        self.monitors
            .get(id)
            .await?
            .ok_or_else(|| EngineError::InvalidInput(format!("monitor #{id} not found")).into())
    }

    /// Phase A. Runs the initial backtest through `as_of`, transitioning
    /// the monitor to `active` on success and `failed` on error.
    pub async fn initial_backtest(&self, monitor_id: i64, as_of: NaiveDate) -> Result<()> {
        let monitor = self.get_monitor(monitor_id).await?;
        self.monitors
            .update_status(monitor_id, MonitorStatus::Initializing)
            .await?;
        self.monitors
            .update_backtest_status(monitor_id, RunStatus::Running, None)
            .await?;

        match self.run_initial(&monitor, as_of).await {
            Ok(last_date) => {
                self.monitors
                    .update_backtest_progress(monitor_id, 100, Some(last_date))
                    .await?;
                self.monitors
                    .update_backtest_status(monitor_id, RunStatus::Completed, None)
                    .await?;
                self.monitors
                    .update_last_processed(monitor_id, last_date)
                    .await?;
                self.monitors
                    .update_status(monitor_id, MonitorStatus::Active)
                    .await?;
                info!(monitor_id, %last_date, "initial backtest completed, monitor active");
                Ok(())
            }
            Err(e) => {
                let message = format!("{e:#}");
                let _ = self
                    .monitors
                    .update_backtest_status(monitor_id, RunStatus::Failed, Some(&message))
                    .await;
                let _ = self
                    .monitors
                    .update_status(monitor_id, MonitorStatus::Failed)
                    .await;
                Err(e)
            }
        }
    }

    async fn run_initial(&self, monitor: &Monitor, as_of: NaiveDate) -> Result<NaiveDate> {
        let assets = self
            .load_assets(&monitor.tickers, monitor.start_date, as_of)
            .await?;
        let simulator = Simulator::new(assets, Resolution::Daily);
        let mut strategy = self
            .registry
            .instantiate(&monitor.strategy, &monitor.parameters)?;
        let mut ledger = Ledger::new(monitor.initial_capital);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DayMessage>();
        let (start, end) = (monitor.start_date, as_of);

        let worker = tokio::task::spawn_blocking(move || {
            simulator.run_observed(strategy.as_mut(), &mut ledger, start, end, |day| {
                tx.send(DayMessage {
                    date: day.date,
                    index: day.index,
                    total: day.total,
                    equity: day.ledger.equity(),
                    cash: day.ledger.cash(),
                    positions: day.ledger.open_positions_owned(),
                    variables: day.strategy_variables.clone(),
                    new_trades: day.new_trades.to_vec(),
                })
                .map_err(|_| anyhow::anyhow!("snapshot consumer dropped"))
            })
        });

        let mut prev_equity = monitor.initial_capital;
        let mut last_date = None;
        while let Some(day) = rx.recv().await {
            let progress = ((day.index + 1) * 100 / day.total.max(1)) as u8;
            if let Err(e) = self
                .persist_day(monitor, &day, prev_equity, Some(progress))
                .await
            {
                // Dropping the receiver aborts the worker on its next send
                drop(rx);
                let _ = worker.await;
                return Err(e);
            }
            prev_equity = day.equity;
            last_date = Some(day.date);
        }

        let outcome = worker.await.context("simulation worker panicked")??;
        self.monitors
            .save_metrics(monitor.id, MetricKind::Backtest, &outcome.metrics)
            .await?;

        last_date.ok_or_else(|| {
            EngineError::NoData(format!(
                "no trading days between {} and {}",
                monitor.start_date, as_of
            ))
            .into()
        })
    }

    /// Phase B. Idempotent per `(monitor, date)`; tolerates multi-day gaps
    /// since the last processed date.
    pub async fn advance(&self, monitor_id: i64, date: NaiveDate) -> Result<AdvanceOutcome> {
        let monitor = self.get_monitor(monitor_id).await?;
        if monitor.status != MonitorStatus::Active {
            return Err(EngineError::InvalidInput(format!(
                "monitor #{monitor_id} is {}, not active",
                monitor.status
            ))
            .into());
        }

        if let Some(last) = monitor.last_processed_date {
            if last >= date {
                return Ok(AdvanceOutcome::Skipped(SkipReason::AlreadyProcessed));
            }
        }

        // Every ticker must have a bar on the target date
        for key in &monitor.tickers {
            let ticker = self.resolve_ticker(key).await?;
            let bars = self.quotes.get_window(ticker.id, date, date).await?;
            if bars.is_empty() {
                info!(monitor_id, ticker = %ticker.symbol, %date, "no quotes, skipping");
                return Ok(AdvanceOutcome::Skipped(SkipReason::NoQuotes));
            }
        }

        let snapshot = self
            .monitors
            .get_latest_snapshot(monitor_id)
            .await?
            .ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "monitor #{monitor_id} has no snapshot; run its initial backtest first"
                ))
            })?;

        let mut strategy = self
            .registry
            .instantiate(&monitor.strategy, &monitor.parameters)?;
        strategy.set_strategy_variables(&snapshot.strategy_variables);
        let mut ledger = Ledger::restore(
            monitor.initial_capital,
            snapshot.cash,
            snapshot.positions.clone(),
        );

        // Load enough history for the lookback window; calendar padding
        // over-provisions for weekends and holidays.
        let lookback = strategy.max_lookback();
        let pad = Days::new((lookback as u64) * 2 + 30);
        let window_start = date
            .checked_sub_days(pad)
            .unwrap_or(monitor.start_date)
            .max(monitor.start_date);
        let assets = self
            .load_assets(&monitor.tickers, window_start, date)
            .await?;
        let simulator = Simulator::new(assets, Resolution::Daily);

        let step_from = snapshot
            .date
            .checked_add_days(Days::new(1))
            .unwrap_or(date);
        if step_from > date {
            // A snapshot past last_processed_date means a prior advance
            // persisted its snapshot but died before the final update;
            // repair the pointer instead of re-simulating.
            self.monitors
                .update_last_processed(monitor_id, snapshot.date)
                .await?;
            return Ok(AdvanceOutcome::Processed {
                date: snapshot.date,
                equity: snapshot.equity,
            });
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DayMessage>();
        let worker = tokio::task::spawn_blocking(move || {
            simulator.run_window(
                strategy.as_mut(),
                &mut ledger,
                step_from,
                date,
                true,
                |day| {
                    tx.send(DayMessage {
                        date: day.date,
                        index: day.index,
                        total: day.total,
                        equity: day.ledger.equity(),
                        cash: day.ledger.cash(),
                        positions: day.ledger.open_positions_owned(),
                        variables: day.strategy_variables.clone(),
                        new_trades: day.new_trades.to_vec(),
                    })
                    .map_err(|_| anyhow::anyhow!("snapshot consumer dropped"))
                },
            )
        });

        let mut prev_equity = snapshot.equity;
        let mut last_equity = snapshot.equity;
        let mut processed = None;
        while let Some(day) = rx.recv().await {
            if let Err(e) = self.persist_day(&monitor, &day, prev_equity, None).await {
                drop(rx);
                let _ = worker.await;
                return Err(e);
            }
            prev_equity = day.equity;
            last_equity = day.equity;
            processed = Some(day.date);
        }
        worker.await.context("simulation worker panicked")??;

        let Some(processed_through) = processed else {
            return Ok(AdvanceOutcome::Skipped(SkipReason::NoQuotes));
        };

        self.refresh_forward_metrics(&monitor).await?;
        self.monitors
            .update_last_processed(monitor_id, processed_through)
            .await?;

        info!(monitor_id, %processed_through, %last_equity, "monitor advanced");
        Ok(AdvanceOutcome::Processed {
            date: processed_through,
            equity: last_equity,
        })
    }

    async fn persist_day(
        &self,
        monitor: &Monitor,
        day: &DayMessage,
        prev_equity: Decimal,
        progress: Option<u8>,
    ) -> Result<()> {
        let snapshot = DailySnapshot {
            monitor_id: monitor.id,
            date: day.date,
            equity: day.equity,
            cash: day.cash,
            positions: day.positions.clone(),
            strategy_variables: day.variables.clone(),
            daily_return: Stats::percent_change(prev_equity, day.equity),
            cumulative_return: Stats::percent_change(monitor.initial_capital, day.equity),
        };
        self.monitors.save_snapshot(&snapshot).await?;
        for trade in &day.new_trades {
            self.monitors.save_trade(monitor.id, trade).await?;
        }
        if let Some(progress) = progress {
            self.monitors
                .update_backtest_progress(monitor.id, progress, Some(day.date))
                .await?;
        }
        Ok(())
    }

    /// Forward metrics are recomputed from the persisted trade and
    /// snapshot history on every advance.
    async fn refresh_forward_metrics(&self, monitor: &Monitor) -> Result<()> {
        let trades = self.monitors.get_trades(monitor.id).await?;
        let snapshots = self.monitors.get_all_snapshots(monitor.id).await?;
        let equity_series: Vec<Decimal> = snapshots.iter().map(|s| s.equity).collect();
        let metrics = PerformanceMetrics::compute(
            &trades,
            monitor.initial_capital,
            Stats::max_drawdown(&equity_series),
        );
        self.monitors
            .save_metrics(monitor.id, MetricKind::Forward, &metrics)
            .await
    }

    async fn load_assets(
        &self,
        keys: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AssetBook> {
        let mut book = AssetBook::new();
        for key in keys {
            let ticker = self.resolve_ticker(key).await?;
            let bars = self.quotes.get_window(ticker.id, start, end).await?;
            if bars.is_empty() {
                warn!(ticker = %ticker.symbol, %start, %end, "no bars in window");
            }
            book.insert(Asset::from_bars(ticker.symbol, bars));
        }
        Ok(book)
    }

    async fn resolve_ticker(&self, key: &str) -> Result<TickerRecord> {
        let found = match key.parse::<i64>() {
            Ok(id) => self.tickers.get(id).await?,
            Err(_) => self.tickers.get_by_symbol(key).await?,
        };
        found.ok_or_else(|| EngineError::InvalidInput(format!("unknown ticker '{key}'")).into())
    }
}
