use crate::application::backtest::{SimulationOutcome, Simulator};
use crate::application::optimization::{self, OptimizationReport};
use crate::application::strategies::StrategyRegistry;
use crate::domain::errors::EngineError;
use crate::domain::market::{Asset, AssetBook, Resolution, TickerRecord};
use crate::domain::params::{OptimizationParam, ParamMap};
use crate::domain::performance::PerformanceMetrics;
use crate::domain::records::{BacktestRun, RunStatus};
use crate::domain::repositories::{QuoteRepo, RunRepo, TickerRepo};
use crate::domain::trading::Ledger;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Caller-facing description of a new run; `into_run` produces the
/// pending record to persist.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub name: String,
    pub strategy: String,
    pub parameters: ParamMap,
    pub tickers: Vec<String>,
    pub benchmark: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub optimization: Vec<OptimizationParam>,
}

impl RunSpec {
    pub fn into_run(self) -> BacktestRun {
        BacktestRun {
            id: 0,
            name: self.name,
            strategy: self.strategy,
            parameters: self.parameters,
            tickers: self.tickers,
            benchmark: self.benchmark,
            start_date: self.start_date,
            end_date: self.end_date,
            initial_capital: self.initial_capital,
            is_optimization: !self.optimization.is_empty(),
            optimization: self.optimization,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_seconds: None,
            log_output: String::new(),
            report: None,
            metrics: None,
            error_message: None,
        }
    }
}

/// Bounded in-memory log accumulator, flushed to the run record roughly
/// every ten lines and on exit.
#[derive(Debug, Default)]
pub struct LogBuffer {
    pending: Vec<String>,
}

impl LogBuffer {
    const FLUSH_EVERY: usize = 10;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.pending.push(line.into());
    }

    pub fn should_flush(&self) -> bool {
        self.pending.len() >= Self::FLUSH_EVERY
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> String {
        let mut chunk = self.pending.join("\n");
        chunk.push('\n');
        self.pending.clear();
        chunk
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub enum RunOutput {
    Single(SimulationOutcome),
    Sweep(OptimizationReport),
}

impl RunOutput {
    /// The metrics persisted on the record: the simulation's own, or the
    /// best combination's for a sweep.
    pub fn primary_metrics(&self) -> Option<&PerformanceMetrics> {
        match self {
            RunOutput::Single(outcome) => Some(&outcome.metrics),
            RunOutput::Sweep(report) => report.best().and_then(|r| r.metrics.as_ref()),
        }
    }

    pub fn report_json(&self) -> serde_json::Value {
        match self {
            RunOutput::Single(outcome) => json!({
                "capital": outcome.capital,
                "drawdown": outcome.drawdown,
                "trades": outcome.trade_log,
                "benchmark": outcome.benchmark,
                "final_equity": outcome.final_equity,
            }),
            RunOutput::Sweep(report) => json!({
                "combinations_total": report.combinations_total,
                "succeeded": report.succeeded,
                "cancelled": report.cancelled,
                "results": report.results,
            }),
        }
    }
}

/// Executes backtest runs against their persisted records: status
/// transitions, quote loading, simulation (or sweep), log flushing, and
/// result persistence.
pub struct BacktestRunner {
    tickers: Arc<dyn TickerRepo>,
    quotes: Arc<dyn QuoteRepo>,
    runs: Arc<dyn RunRepo>,
    registry: Arc<StrategyRegistry>,
}

impl BacktestRunner {
    pub fn new(
        tickers: Arc<dyn TickerRepo>,
        quotes: Arc<dyn QuoteRepo>,
        runs: Arc<dyn RunRepo>,
        registry: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            tickers,
            quotes,
            runs,
            registry,
        }
    }

    /// Validate and persist a new pending run record.
    pub async fn create_run(&self, spec: RunSpec) -> Result<BacktestRun> {
        if !self.registry.is_valid(&spec.strategy) {
            return Err(EngineError::InvalidInput(format!(
                "unknown strategy '{}'",
                spec.strategy
            ))
            .into());
        }
        if spec.tickers.is_empty() {
            return Err(EngineError::InvalidInput("no tickers given".into()).into());
        }
        if spec.start_date > spec.end_date {
            return Err(EngineError::InvalidInput(format!(
                "start date {} is after end date {}",
                spec.start_date, spec.end_date
            ))
            .into());
        }
        if spec.initial_capital <= Decimal::ZERO {
            return Err(
                EngineError::InvalidInput("initial capital must be positive".into()).into(),
            );
        }

        let mut run = spec.into_run();
        let id = self.runs.create(&run).await?;
        run.id = id;
        Ok(run)
    }

    pub async fn execute(&self, run_id: i64, save: bool) -> Result<(BacktestRun, RunOutput)> {
        let run = self
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| EngineError::InvalidInput(format!("run #{run_id} not found")))?;
        let output = self.execute_run(&run, save).await?;
        Ok((run, output))
    }

    /// Drive one run to completion, persisting progress unless `save` is
    /// off (replay mode).
    pub async fn execute_run(&self, run: &BacktestRun, save: bool) -> Result<RunOutput> {
        let started = Instant::now();
        let mut log = LogBuffer::new();

        if save {
            self.runs.update_status(run.id, RunStatus::Running).await?;
        }

        let result = self.execute_inner(run, save, &mut log).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(output) => {
                log.push(format!("completed in {elapsed:.2}s"));
                if save {
                    self.flush_log(run.id, &mut log).await?;
                    if let Some(metrics) = output.primary_metrics() {
                        self.runs
                            .update_results(run.id, metrics, &output.report_json(), elapsed)
                            .await?;
                    }
                    self.runs.update_status(run.id, RunStatus::Completed).await?;
                }
                info!(run_id = run.id, elapsed, "backtest completed");
                Ok(output)
            }
            Err(e) => {
                error!(run_id = run.id, error = %e, "backtest failed");
                log.push(format!("failed: {e:#}"));
                if save {
                    // Flush the buffer before marking failed so the trail
                    // survives on the record
                    let _ = self.flush_log(run.id, &mut log).await;
                    let _ = self.runs.update_error(run.id, &format!("{e:#}")).await;
                }
                Err(e)
            }
        }
    }

    async fn execute_inner(
        &self,
        run: &BacktestRun,
        save: bool,
        log: &mut LogBuffer,
    ) -> Result<RunOutput> {
        log.push(format!(
            "run '{}': strategy={} window={}..{}",
            run.name, run.strategy, run.start_date, run.end_date
        ));

        let assets = self
            .load_assets(&run.tickers, run.start_date, run.end_date, log)
            .await?;
        if save && log.should_flush() {
            self.flush_log(run.id, log).await?;
        }

        let mut simulator = Simulator::new(assets, Resolution::Daily);
        if let Some(benchmark_key) = &run.benchmark {
            let ticker = self.resolve_ticker(benchmark_key).await?;
            let bars = self
                .quotes
                .get_window(ticker.id, run.start_date, run.end_date)
                .await?;
            log.push(format!("benchmark {}: {} bars", ticker.symbol, bars.len()));
            simulator = simulator.with_benchmark(Asset::from_bars(ticker.symbol, bars));
        }

        if run.is_optimization {
            let report = self.run_sweep_cancellable(run, simulator, save).await?;
            log.push(format!(
                "sweep: {}/{} combinations succeeded",
                report.succeeded, report.combinations_total
            ));
            if report.succeeded == 0 {
                anyhow::bail!(
                    "all {} combinations failed",
                    report.combinations_total
                );
            }
            Ok(RunOutput::Sweep(report))
        } else {
            let mut strategy = self
                .registry
                .instantiate(&run.strategy, &run.parameters)?;
            let mut ledger = Ledger::new(run.initial_capital);
            let outcome =
                simulator.run(strategy.as_mut(), &mut ledger, run.start_date, run.end_date)?;
            log.push(format!(
                "{} trades, net profit {}",
                outcome.metrics.total_transactions, outcome.metrics.net_profit
            ));
            Ok(RunOutput::Single(outcome))
        }
    }

    /// The sweep runs on a blocking thread; a watcher polls the record so
    /// an externally cancelled run (e.g. marked failed by the health
    /// check) halts before the next combination.
    async fn run_sweep_cancellable(
        &self,
        run: &BacktestRun,
        simulator: Simulator,
        save: bool,
    ) -> Result<OptimizationReport> {
        let cancel = Arc::new(AtomicBool::new(false));

        let watcher = if save {
            let runs = Arc::clone(&self.runs);
            let flag = Arc::clone(&cancel);
            let run_id = run.id;
            Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    match runs.get(run_id).await {
                        Ok(Some(record)) if record.status == RunStatus::Failed => {
                            flag.store(true, Ordering::Relaxed);
                            break;
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            }))
        } else {
            None
        };

        let registry = Arc::clone(&self.registry);
        let strategy = run.strategy.clone();
        let base_params = run.parameters.clone();
        let sweep = run.optimization.clone();
        let (start, end, capital) = (run.start_date, run.end_date, run.initial_capital);
        let flag = Arc::clone(&cancel);

        let report = tokio::task::spawn_blocking(move || {
            optimization::run_sweep(
                &registry,
                &strategy,
                &base_params,
                &sweep,
                &simulator,
                start,
                end,
                capital,
                || flag.load(Ordering::Relaxed),
            )
        })
        .await
        .context("sweep worker panicked")??;

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        Ok(report)
    }

    async fn load_assets(
        &self,
        keys: &[String],
        start: NaiveDate,
        end: NaiveDate,
        log: &mut LogBuffer,
    ) -> Result<AssetBook> {
        let mut book = AssetBook::new();
        for key in keys {
            let ticker = self.resolve_ticker(key).await?;
            let bars = self.quotes.get_window(ticker.id, start, end).await?;
            log.push(format!("{}: {} bars loaded", ticker.symbol, bars.len()));
            book.insert(Asset::from_bars(ticker.symbol, bars));
        }
        Ok(book)
    }

    /// Tickers arrive as numeric ids (the CLI surface) or symbols.
    pub async fn resolve_ticker(&self, key: &str) -> Result<TickerRecord> {
        let found = match key.parse::<i64>() {
            Ok(id) => self.tickers.get(id).await?,
            Err(_) => self.tickers.get_by_symbol(key).await?,
        };
        found.ok_or_else(|| EngineError::InvalidInput(format!("unknown ticker '{key}'")).into())
    }

    async fn flush_log(&self, run_id: i64, log: &mut LogBuffer) -> Result<()> {
        if !log.is_empty() {
            self.runs.append_log(run_id, &log.drain()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_flush_threshold() {
        let mut log = LogBuffer::new();
        for i in 0..9 {
            log.push(format!("line {i}"));
        }
        assert!(!log.should_flush());
        log.push("line 9");
        assert!(log.should_flush());

        let chunk = log.drain();
        assert!(chunk.starts_with("line 0\n"));
        assert!(chunk.ends_with("line 9\n"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_run_spec_builds_pending_record() {
        let spec = RunSpec {
            name: "demo".into(),
            strategy: "long_hold".into(),
            parameters: ParamMap::new(),
            tickers: vec!["AAPL".into()],
            benchmark: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            initial_capital: Decimal::from(10_000),
            optimization: Vec::new(),
        };
        let run = spec.into_run();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(!run.is_optimization);
        assert!(run.started_at.is_none());
    }
}
