use crate::domain::params::{OptimizationParam, ParamMap};
use crate::domain::performance::PerformanceMetrics;
use crate::domain::trading::Position;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One backtest execution, optionally an optimization sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: i64,
    pub name: String,
    pub strategy: String,
    pub parameters: ParamMap,
    pub tickers: Vec<String>,
    pub benchmark: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub is_optimization: bool,
    pub optimization: Vec<OptimizationParam>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_seconds: Option<f64>,
    pub log_output: String,
    pub report: Option<serde_json::Value>,
    pub metrics: Option<PerformanceMetrics>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Initializing,
    Active,
    Stopped,
    Failed,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Initializing => "initializing",
            MonitorStatus::Active => "active",
            MonitorStatus::Stopped => "stopped",
            MonitorStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(MonitorStatus::Initializing),
            "active" => Ok(MonitorStatus::Active),
            "stopped" => Ok(MonitorStatus::Stopped),
            "failed" => Ok(MonitorStatus::Failed),
            other => Err(format!("unknown monitor status '{other}'")),
        }
    }
}

/// A strategy in forward-test mode, advanced one trading day at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub strategy: String,
    pub parameters: ParamMap,
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    pub initial_capital: Decimal,
    pub status: MonitorStatus,
    pub last_processed_date: Option<NaiveDate>,
    pub backtest_progress: u8,
    pub backtest_status: RunStatus,
    pub backtest_error: Option<String>,
    pub backtest_current_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Persisted end-of-day state for one monitor and one trading day.
/// `(monitor_id, date)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub monitor_id: i64,
    pub date: NaiveDate,
    pub equity: Decimal,
    pub cash: Decimal,
    pub positions: Vec<Position>,
    /// Opaque blob owned by the strategy; the engine never interprets it.
    pub strategy_variables: serde_json::Value,
    pub daily_return: Decimal,
    pub cumulative_return: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Backtest,
    Forward,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Backtest => "backtest",
            MetricKind::Forward => "forward",
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backtest" => Ok(MetricKind::Backtest),
            "forward" => Ok(MetricKind::Forward),
            other => Err(format!("unknown metric kind '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        for status in [
            MonitorStatus::Initializing,
            MonitorStatus::Active,
            MonitorStatus::Stopped,
            MonitorStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MonitorStatus>().unwrap(), status);
        }
    }
}
