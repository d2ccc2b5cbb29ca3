use crate::domain::performance::PerformanceMetrics;
use crate::domain::records::{BacktestRun, RunStatus};
use crate::domain::repositories::RunRepo;
use crate::infrastructure::persistence::repositories::{
    date_col, decimal_col, opt_timestamp_col, timestamp_col,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteRunRepo {
    pool: SqlitePool,
}

impl SqliteRunRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<BacktestRun> {
        let status: String = row.try_get("status")?;
        let parameters_json: String = row.try_get("parameters_json")?;
        let tickers_json: String = row.try_get("tickers_json")?;
        let optimization_json: String = row.try_get("optimization_json")?;
        let report_json: Option<String> = row.try_get("report_json")?;
        let metrics_json: Option<String> = row.try_get("metrics_json")?;

        Ok(BacktestRun {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            strategy: row.try_get("strategy")?,
            parameters: serde_json::from_str(&parameters_json)
                .context("corrupt parameters_json")?,
            tickers: serde_json::from_str(&tickers_json).context("corrupt tickers_json")?,
            benchmark: row.try_get("benchmark")?,
            start_date: date_col(row, "start_date")?,
            end_date: date_col(row, "end_date")?,
            initial_capital: decimal_col(row, "initial_capital")?,
            is_optimization: row.try_get("is_optimization")?,
            optimization: serde_json::from_str(&optimization_json)
                .context("corrupt optimization_json")?,
            status: status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            created_at: timestamp_col(row, "created_at")?,
            started_at: opt_timestamp_col(row, "started_at")?,
            completed_at: opt_timestamp_col(row, "completed_at")?,
            execution_seconds: row.try_get("execution_seconds")?,
            log_output: row.try_get("log_output")?,
            report: report_json
                .map(|s| serde_json::from_str(&s).context("corrupt report_json"))
                .transpose()?,
            metrics: metrics_json
                .map(|s| serde_json::from_str(&s).context("corrupt metrics_json"))
                .transpose()?,
            error_message: row.try_get("error_message")?,
        })
    }
}

#[async_trait]
impl RunRepo for SqliteRunRepo {
    async fn create(&self, run: &BacktestRun) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO runs
                (name, strategy, parameters_json, tickers_json, benchmark,
                 start_date, end_date, initial_capital, is_optimization,
                 optimization_json, status, created_at, log_output)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '')
            "#,
        )
        .bind(&run.name)
        .bind(&run.strategy)
        .bind(serde_json::to_string(&run.parameters)?)
        .bind(serde_json::to_string(&run.tickers)?)
        .bind(&run.benchmark)
        .bind(run.start_date.to_string())
        .bind(run.end_date.to_string())
        .bind(run.initial_capital.to_string())
        .bind(run.is_optimization)
        .bind(serde_json::to_string(&run.optimization)?)
        .bind(run.status.as_str())
        .bind(run.created_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert run")?;

        Ok(result.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> Result<Option<BacktestRun>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn update_status(&self, id: i64, status: RunStatus) -> Result<()> {
        let now = Utc::now().timestamp();
        match status {
            RunStatus::Running => {
                sqlx::query("UPDATE runs SET status = ?, started_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            RunStatus::Completed | RunStatus::Failed => {
                sqlx::query("UPDATE runs SET status = ?, completed_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            RunStatus::Pending => {
                sqlx::query("UPDATE runs SET status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
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
        sqlx::query(
            "UPDATE runs SET metrics_json = ?, report_json = ?, execution_seconds = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(metrics)?)
        .bind(serde_json::to_string(report)?)
        .bind(execution_seconds)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to persist run results")?;
        Ok(())
    }

    async fn update_error(&self, id: i64, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = 'failed', error_message = ?, completed_at = ? WHERE id = ?",
        )
        .bind(message)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_log(&self, id: i64, chunk: &str) -> Result<()> {
        sqlx::query("UPDATE runs SET log_output = log_output || ? WHERE id = ?")
            .bind(chunk)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_strategy(&self, strategy: &str, limit: usize) -> Result<Vec<BacktestRun>> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE strategy = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(strategy)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<BacktestRun>> {
        let rows = sqlx::query("SELECT * FROM runs ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn get_stale(
        &self,
        status: RunStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<BacktestRun>> {
        // Pending staleness is judged on creation, running on start
        let column = match status {
            RunStatus::Running => "started_at",
            _ => "created_at",
        };
        let sql = format!(
            "SELECT * FROM runs WHERE status = ? AND {column} IS NOT NULL AND {column} < ?"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(older_than.timestamp())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }
}
