use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// One logical SQLite database: tickers, runs, or monitors.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to {db_url}"))?;

        info!("Connected to database: {}", db_url);
        Ok(Self { pool })
    }

    pub async fn open_tickers(db_url: &str) -> Result<Self> {
        let db = Self::connect(db_url).await?;
        db.init_tickers().await?;
        Ok(db)
    }

    pub async fn open_runs(db_url: &str) -> Result<Self> {
        let db = Self::connect(db_url).await?;
        db.init_runs().await?;
        Ok(db)
    }

    pub async fn open_monitors(db_url: &str) -> Result<Self> {
        let db = Self::connect(db_url).await?;
        db.init_monitors().await?;
        Ok(db)
    }

    async fn init_tickers(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                exchange TEXT NOT NULL,
                source TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create tickers table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quotes (
                ticker_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                PRIMARY KEY (ticker_id, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create quotes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ticker_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                detail TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create ticker_audit table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ticker_audit_ticker
            ON ticker_audit (ticker_id, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create ticker_audit index")?;

        info!("Ticker database schema initialized.");
        Ok(())
    }

    async fn init_runs(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                strategy TEXT NOT NULL,
                parameters_json TEXT NOT NULL DEFAULT '{}',
                tickers_json TEXT NOT NULL DEFAULT '[]',
                benchmark TEXT,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                initial_capital TEXT NOT NULL,
                is_optimization BOOLEAN NOT NULL DEFAULT 0,
                optimization_json TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                execution_seconds REAL,
                log_output TEXT NOT NULL DEFAULT '',
                report_json TEXT,
                metrics_json TEXT,
                error_message TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create runs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runs_status_created ON runs (status, created_at);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create runs status index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runs_strategy ON runs (strategy, created_at);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create runs strategy index")?;

        info!("Run database schema initialized.");
        Ok(())
    }

    async fn init_monitors(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                strategy TEXT NOT NULL,
                parameters_json TEXT NOT NULL DEFAULT '{}',
                tickers_json TEXT NOT NULL DEFAULT '[]',
                start_date TEXT NOT NULL,
                initial_capital TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'initializing',
                last_processed_date TEXT,
                backtest_progress INTEGER NOT NULL DEFAULT 0,
                backtest_status TEXT NOT NULL DEFAULT 'pending',
                backtest_error TEXT,
                backtest_current_date TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create monitors table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_snapshots (
                monitor_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                equity TEXT NOT NULL,
                cash TEXT NOT NULL,
                positions_json TEXT NOT NULL DEFAULT '[]',
                variables_json TEXT NOT NULL DEFAULT '{}',
                daily_return TEXT NOT NULL,
                cumulative_return TEXT NOT NULL,
                PRIMARY KEY (monitor_id, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create monitor_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                monitor_id INTEGER NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                open_date TEXT NOT NULL,
                close_date TEXT NOT NULL,
                open_price TEXT NOT NULL,
                close_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                profit TEXT NOT NULL,
                profit_percent TEXT NOT NULL,
                balance_after TEXT NOT NULL,
                drawdown_value TEXT NOT NULL,
                drawdown_percent TEXT NOT NULL,
                bars_held INTEGER NOT NULL,
                comment TEXT NOT NULL DEFAULT ''
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create monitor_trades table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_monitor_trades_monitor ON monitor_trades (monitor_id, id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create monitor_trades index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_metrics (
                monitor_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (monitor_id, kind)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create monitor_metrics table")?;

        info!("Monitor database schema initialized.");
        Ok(())
    }
}
