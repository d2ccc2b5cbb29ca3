mod daily;

pub use daily::{DailyUpdateJob, DailyUpdateReport, MonitorAdvanceResult};

use crate::config::Config;
use crate::domain::records::RunStatus;
use crate::domain::repositories::RunRepo;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{info, warn};

/// A named kind of background work with its own single-instance lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobClass {
    Backtest,
    MonitorBacktest,
    UpdateQuotes,
    UpdateMonitor,
    DailyUpdate,
}

impl JobClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobClass::Backtest => "backtest",
            JobClass::MonitorBacktest => "monitor-backtest",
            JobClass::UpdateQuotes => "update-quotes",
            JobClass::UpdateMonitor => "update-monitor",
            JobClass::DailyUpdate => "daily-update",
        }
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    /// Pending runs whose spawn presumably never took; re-spawned.
    pub restarted: Vec<i64>,
    /// Running runs past the wall-clock timeout; marked failed.
    pub timed_out: Vec<i64>,
}

pub type Spawner = Box<dyn Fn(&[String]) -> Result<u32> + Send + Sync>;

/// Spawns jobs as detached OS subprocesses of this executable and
/// recovers stalled run records.
///
/// The parent returns as soon as the child is spawned; the child acquires
/// its job-class lock, updates its own record as it progresses, and exits
/// with the documented codes.
pub struct JobDispatcher {
    runs: Arc<dyn RunRepo>,
    config: Config,
    spawner: Spawner,
}

impl JobDispatcher {
    pub fn new(runs: Arc<dyn RunRepo>, config: Config) -> Self {
        Self::with_spawner(runs, config, Box::new(exec_spawner))
    }

    /// Seam for tests: replace the subprocess spawner.
    pub fn with_spawner(runs: Arc<dyn RunRepo>, config: Config, spawner: Spawner) -> Self {
        Self {
            runs,
            config,
            spawner,
        }
    }

    pub fn spawn_backtest(&self, run_id: i64) -> Result<u32> {
        self.spawn(&["run-backtest".into(), format!("--run-id={run_id}")])
    }

    pub fn spawn_monitor_backtest(&self, monitor_id: i64) -> Result<u32> {
        self.spawn(&["monitor-backtest".into(), monitor_id.to_string()])
    }

    fn spawn(&self, args: &[String]) -> Result<u32> {
        let pid = (self.spawner)(args)?;
        info!(?args, pid, "worker spawned");
        Ok(pid)
    }

    /// Scan pending/running records and recover stalls: pending older than
    /// the restart threshold are re-spawned; running older than the
    /// timeout are marked failed (the subprocess, if any, is not killed —
    /// OS-level supervision owns hard termination).
    pub async fn health_check(&self) -> Result<HealthReport> {
        let mut report = HealthReport::default();
        let now = Utc::now();

        let pending_cutoff = now - Duration::seconds(self.config.pending_restart_secs);
        for run in self.runs.get_stale(RunStatus::Pending, pending_cutoff).await? {
            warn!(run_id = run.id, "pending run presumed unspawned, restarting");
            self.spawn_backtest(run.id)?;
            report.restarted.push(run.id);
        }

        let running_cutoff = now - Duration::seconds(self.config.running_timeout_secs);
        for run in self.runs.get_stale(RunStatus::Running, running_cutoff).await? {
            let minutes = self.config.running_timeout_secs / 60;
            warn!(run_id = run.id, "running past timeout, marking failed");
            self.runs
                .update_error(
                    run.id,
                    &format!("timed out: running longer than {minutes} minutes"),
                )
                .await?;
            report.timed_out.push(run.id);
        }

        Ok(report)
    }
}

fn exec_spawner(args: &[String]) -> Result<u32> {
    let exe = std::env::current_exe().context("cannot resolve current executable")?;
    let child = Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawning worker {args:?}"))?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_class_lock_names() {
        assert_eq!(JobClass::UpdateQuotes.as_str(), "update-quotes");
        assert_eq!(JobClass::DailyUpdate.as_str(), "daily-update");
        assert_eq!(JobClass::MonitorBacktest.to_string(), "monitor-backtest");
    }
}
