use crate::application::backtest::BacktestRunner;
use crate::application::jobs::{DailyUpdateJob, JobDispatcher};
use crate::application::monitor::MonitorService;
use crate::application::quotes::QuoteUpdateService;
use crate::application::strategies::StrategyRegistry;
use crate::config::Config;
use crate::domain::repositories::{MonitorRepo, QuoteRepo, RunRepo, TickerRepo};
use crate::infrastructure::persistence::{
    Database, SqliteMonitorRepo, SqliteQuoteRepo, SqliteRunRepo, SqliteTickerRepo,
};
use crate::infrastructure::quote_source::QuoteSourceRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Composition root: repositories, registries and services constructed
/// once per process and handed to the command layer.
pub struct AppContext {
    pub config: Config,
    pub tickers: Arc<dyn TickerRepo>,
    pub quotes: Arc<dyn QuoteRepo>,
    pub runs: Arc<dyn RunRepo>,
    pub monitors: Arc<dyn MonitorRepo>,
    pub registry: Arc<StrategyRegistry>,
    pub sources: Arc<QuoteSourceRegistry>,
}

impl AppContext {
    pub async fn init(config: Config) -> Result<Self> {
        let tickers_db = Database::open_tickers(&config.tickers_db_url)
            .await
            .context("opening tickers database")?;
        let runs_db = Database::open_runs(&config.runs_db_url)
            .await
            .context("opening runs database")?;
        let monitors_db = Database::open_monitors(&config.monitors_db_url)
            .await
            .context("opening monitors database")?;

        Ok(Self {
            tickers: Arc::new(SqliteTickerRepo::new(tickers_db.pool.clone())),
            quotes: Arc::new(SqliteQuoteRepo::new(tickers_db.pool)),
            runs: Arc::new(SqliteRunRepo::new(runs_db.pool)),
            monitors: Arc::new(SqliteMonitorRepo::new(monitors_db.pool)),
            registry: Arc::new(StrategyRegistry::with_builtins()),
            sources: Arc::new(QuoteSourceRegistry::with_builtins(&config.data_dir)),
            config,
        })
    }

    pub fn runner(&self) -> BacktestRunner {
        BacktestRunner::new(
            Arc::clone(&self.tickers),
            Arc::clone(&self.quotes),
            Arc::clone(&self.runs),
            Arc::clone(&self.registry),
        )
    }

    pub fn monitor_service(&self) -> MonitorService {
        MonitorService::new(
            Arc::clone(&self.tickers),
            Arc::clone(&self.quotes),
            Arc::clone(&self.monitors),
            Arc::clone(&self.registry),
        )
    }

    pub fn quote_service(&self) -> QuoteUpdateService {
        QuoteUpdateService::new(
            Arc::clone(&self.tickers),
            Arc::clone(&self.quotes),
            Arc::clone(&self.sources),
        )
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(Arc::clone(&self.runs), self.config.clone())
    }

    pub fn daily_update(&self) -> DailyUpdateJob {
        DailyUpdateJob::new(
            self.quote_service(),
            self.monitor_service(),
            Arc::clone(&self.monitors),
            self.config.clone(),
        )
    }
}
