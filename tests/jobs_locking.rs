//! Job dispatcher scenarios: lock exclusivity, stall detection and
//! recovery.

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal_macros::dec;
use simtrade::application::backtest::RunSpec;
use simtrade::application::jobs::JobDispatcher;
use simtrade::config::{Config, SmtpConfig};
use simtrade::domain::errors::EngineError;
use simtrade::domain::params::ParamMap;
use simtrade::domain::records::RunStatus;
use simtrade::domain::repositories::RunRepo;
use simtrade::infrastructure::locks::JobLock;
use simtrade::infrastructure::repositories::InMemoryRunRepo;
use std::sync::{Arc, Mutex};

fn test_config(var_dir: &std::path::Path) -> Config {
    Config {
        data_dir: var_dir.to_path_buf(),
        var_dir: var_dir.to_path_buf(),
        tickers_db_url: String::new(),
        runs_db_url: String::new(),
        monitors_db_url: String::new(),
        monitor_scoped_locks: false,
        pending_restart_secs: 120,
        running_timeout_secs: 1800,
        smtp: SmtpConfig::default(),
    }
}

fn sample_run() -> simtrade::domain::records::BacktestRun {
    RunSpec {
        name: "stale candidate".into(),
        strategy: "long_hold".into(),
        parameters: ParamMap::new(),
        tickers: vec!["ACME".into()],
        benchmark: None,
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        initial_capital: dec!(10000),
        optimization: Vec::new(),
    }
    .into_run()
}

#[test]
fn test_second_instance_refused_with_exit_code_2() {
    let dir = tempfile::tempdir().unwrap();

    let _held = JobLock::acquire(dir.path(), "update-quotes").unwrap();
    let refused = JobLock::acquire(dir.path(), "update-quotes").unwrap_err();

    assert!(matches!(refused, EngineError::Concurrent { .. }));
    assert_eq!(refused.exit_code(), 2);
    assert!(
        refused
            .to_string()
            .contains("another instance is already running")
    );
}

#[tokio::test]
async fn test_health_check_restarts_old_pending_runs() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(InMemoryRunRepo::new());
    let spawned = Arc::new(Mutex::new(Vec::<Vec<String>>::new()));

    let recorder: simtrade::application::jobs::Spawner = {
        let spawned = Arc::clone(&spawned);
        Box::new(move |args: &[String]| {
            spawned.lock().unwrap().push(args.to_vec());
            Ok(4242)
        })
    };
    let dispatcher = JobDispatcher::with_spawner(
        runs.clone() as Arc<dyn RunRepo>,
        test_config(dir.path()),
        recorder,
    );

    // Fresh pending run: left alone
    let fresh = runs.create(&sample_run()).await.unwrap();
    // Pending for 5 minutes: presumed never spawned
    let stale = runs.create(&sample_run()).await.unwrap();
    runs.backdate(stale, RunStatus::Pending, Utc::now() - Duration::minutes(5));

    let report = dispatcher.health_check().await.unwrap();
    assert_eq!(report.restarted, vec![stale]);
    assert!(report.timed_out.is_empty());

    let spawned = spawned.lock().unwrap();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0][0], "run-backtest");
    assert_eq!(spawned[0][1], format!("--run-id={stale}"));

    assert_eq!(
        runs.get(fresh).await.unwrap().unwrap().status,
        RunStatus::Pending
    );
}

#[tokio::test]
async fn test_health_check_times_out_stuck_running_runs() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(InMemoryRunRepo::new());
    let dispatcher = JobDispatcher::with_spawner(
        runs.clone() as Arc<dyn RunRepo>,
        test_config(dir.path()),
        Box::new(|_args| Ok(0)),
    );

    // Running for 45 minutes with an accumulated log trail
    let stuck = runs.create(&sample_run()).await.unwrap();
    runs.append_log(stuck, "loading quotes\nsimulating\n")
        .await
        .unwrap();
    runs.backdate(stuck, RunStatus::Running, Utc::now() - Duration::minutes(45));

    // Running for 5 minutes: healthy
    let healthy = runs.create(&sample_run()).await.unwrap();
    runs.backdate(healthy, RunStatus::Running, Utc::now() - Duration::minutes(5));

    let report = dispatcher.health_check().await.unwrap();
    assert_eq!(report.timed_out, vec![stuck]);
    assert!(report.restarted.is_empty());

    let stored = runs.get(stuck).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored.error_message.unwrap().contains("timed out"));
    // The log buffer is preserved alongside the failure
    assert!(stored.log_output.contains("loading quotes"));

    assert_eq!(
        runs.get(healthy).await.unwrap().unwrap().status,
        RunStatus::Running
    );
}

#[test]
fn test_monitor_scoped_lock_names_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();

    // Narrowed locks allow different monitors to advance concurrently
    let _one = JobLock::acquire(dir.path(), "update-monitor-1").unwrap();
    let _two = JobLock::acquire(dir.path(), "update-monitor-2").unwrap();

    // The same monitor is still exclusive
    let refused = JobLock::acquire(dir.path(), "update-monitor-1");
    assert!(matches!(refused, Err(EngineError::Concurrent { .. })));
}
