//! Monitor state-machine scenarios: initial backtest, idempotent daily
//! advance, quote guards, and replay equivalence.

use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use simtrade::application::monitor::{AdvanceOutcome, MonitorService, SkipReason};
use simtrade::application::strategies::StrategyRegistry;
use simtrade::domain::market::Bar;
use simtrade::domain::params::ParamMap;
use simtrade::domain::records::{MetricKind, Monitor, MonitorStatus, RunStatus};
use simtrade::domain::repositories::{MonitorRepo, QuoteRepo, TickerRepo};
use simtrade::infrastructure::repositories::{
    InMemoryMonitorRepo, InMemoryQuoteRepo, InMemoryTickerRepo,
};
use std::sync::Arc;

/// Weekday sequence starting Monday 2024-01-01.
fn trading_days(n: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(n);
    let mut date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    while days.len() < n {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(date);
        }
        date = date + Days::new(1);
    }
    days
}

fn bars_for(days: &[NaiveDate]) -> Vec<Bar> {
    days.iter()
        .enumerate()
        .map(|(i, &date)| {
            let base = dec!(100) + Decimal::from(i as u64);
            Bar {
                date,
                open: base,
                high: base + dec!(2),
                low: base - dec!(1),
                close: base + dec!(1),
                volume: 500,
            }
        })
        .collect()
}

struct Harness {
    monitors: Arc<InMemoryMonitorRepo>,
    service: MonitorService,
    days: Vec<NaiveDate>,
}

async fn harness(n_days: usize) -> Harness {
    let tickers = Arc::new(InMemoryTickerRepo::new());
    let quotes = Arc::new(InMemoryQuoteRepo::new());
    let monitors = Arc::new(InMemoryMonitorRepo::new());
    let registry = Arc::new(StrategyRegistry::with_builtins());

    let days = trading_days(n_days);
    let ticker = tickers.create("ACME", "NASDAQ", "csv-file").await.unwrap();
    quotes
        .batch_upsert(ticker.id, &bars_for(&days))
        .await
        .unwrap();

    let service = MonitorService::new(
        tickers.clone() as Arc<dyn TickerRepo>,
        quotes.clone() as Arc<dyn QuoteRepo>,
        monitors.clone() as Arc<dyn MonitorRepo>,
        registry,
    );
    Harness {
        monitors,
        service,
        days,
    }
}

async fn create_monitor(h: &Harness) -> i64 {
    let monitor = Monitor {
        id: 0,
        name: "acme forward".into(),
        strategy: "long_hold".into(),
        parameters: ParamMap::new(),
        tickers: vec!["ACME".into()],
        start_date: h.days[0],
        initial_capital: dec!(10000),
        status: MonitorStatus::Initializing,
        last_processed_date: None,
        backtest_progress: 0,
        backtest_status: RunStatus::Pending,
        backtest_error: None,
        backtest_current_date: None,
        created_at: Utc::now(),
    };
    h.monitors.create(&monitor).await.unwrap()
}

#[tokio::test]
async fn test_initial_backtest_persists_dense_snapshots() {
    let h = harness(10).await;
    let id = create_monitor(&h).await;

    h.service.initial_backtest(id, h.days[5]).await.unwrap();

    let monitor = h.monitors.get(id).await.unwrap().unwrap();
    assert_eq!(monitor.status, MonitorStatus::Active);
    assert_eq!(monitor.backtest_status, RunStatus::Completed);
    assert_eq!(monitor.backtest_progress, 100);
    assert_eq!(monitor.last_processed_date, Some(h.days[5]));

    // One snapshot per trading day with quotes
    let snapshots = h.monitors.get_all_snapshots(id).await.unwrap();
    assert_eq!(snapshots.len(), 6);
    let max_date = snapshots.iter().map(|s| s.date).max().unwrap();
    assert_eq!(Some(max_date), monitor.last_processed_date);

    // Backtest metrics saved; capital flows into cumulative returns
    assert!(
        h.monitors
            .get_metrics(id, MetricKind::Backtest)
            .await
            .unwrap()
            .is_some()
    );
    let last = snapshots.last().unwrap();
    assert!(last.equity > Decimal::ZERO);
}

#[tokio::test]
async fn test_advance_processes_next_day() {
    let h = harness(10).await;
    let id = create_monitor(&h).await;
    h.service.initial_backtest(id, h.days[5]).await.unwrap();

    let outcome = h.service.advance(id, h.days[6]).await.unwrap();
    match outcome {
        AdvanceOutcome::Processed { date, .. } => assert_eq!(date, h.days[6]),
        other => panic!("expected Processed, got {other:?}"),
    }

    let monitor = h.monitors.get(id).await.unwrap().unwrap();
    assert_eq!(monitor.last_processed_date, Some(h.days[6]));
    assert_eq!(monitor.status, MonitorStatus::Active);

    // Forward metrics refreshed
    assert!(
        h.monitors
            .get_metrics(id, MetricKind::Forward)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_advance_is_idempotent() {
    let h = harness(10).await;
    let id = create_monitor(&h).await;
    h.service.initial_backtest(id, h.days[5]).await.unwrap();
    h.service.advance(id, h.days[6]).await.unwrap();

    let snapshots_before = h.monitors.get_all_snapshots(id).await.unwrap().len();
    let trades_before = h.monitors.get_trades(id).await.unwrap().len();

    // Second advance to the same date does nothing
    let outcome = h.service.advance(id, h.days[6]).await.unwrap();
    assert_eq!(
        outcome,
        AdvanceOutcome::Skipped(SkipReason::AlreadyProcessed)
    );

    let monitor = h.monitors.get(id).await.unwrap().unwrap();
    assert_eq!(monitor.last_processed_date, Some(h.days[6]));
    assert_eq!(
        h.monitors.get_all_snapshots(id).await.unwrap().len(),
        snapshots_before
    );
    assert_eq!(h.monitors.get_trades(id).await.unwrap().len(), trades_before);
}

#[tokio::test]
async fn test_advance_skips_dates_without_quotes() {
    let h = harness(10).await;
    let id = create_monitor(&h).await;
    h.service.initial_backtest(id, h.days[5]).await.unwrap();

    // The Saturday after days[5] has no bar for the ticker
    let weekend = h
        .days[5]
        .iter_days()
        .find(|d| d.weekday() == Weekday::Sat)
        .unwrap();
    let outcome = h.service.advance(id, weekend).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Skipped(SkipReason::NoQuotes));

    let monitor = h.monitors.get(id).await.unwrap().unwrap();
    assert_eq!(monitor.status, MonitorStatus::Active);
    assert_eq!(monitor.last_processed_date, Some(h.days[5]));
}

#[tokio::test]
async fn test_advance_tolerates_multi_day_gap() {
    let h = harness(12).await;
    let id = create_monitor(&h).await;
    h.service.initial_backtest(id, h.days[4]).await.unwrap();

    // Jump three trading days at once; each gets its own snapshot
    let outcome = h.service.advance(id, h.days[7]).await.unwrap();
    match outcome {
        AdvanceOutcome::Processed { date, .. } => assert_eq!(date, h.days[7]),
        other => panic!("expected Processed, got {other:?}"),
    }

    let snapshots = h.monitors.get_all_snapshots(id).await.unwrap();
    assert_eq!(snapshots.len(), 8);
    let dates: Vec<NaiveDate> = snapshots.iter().map(|s| s.date).collect();
    assert_eq!(dates, h.days[..8].to_vec());
}

#[tokio::test]
async fn test_replay_equivalence_one_shot_vs_stepped() {
    // Running the initial backtest through day 7 in one shot must match
    // running through day 5 and then advancing twice.
    let h_one = harness(10).await;
    let one = create_monitor(&h_one).await;
    h_one.service.initial_backtest(one, h_one.days[7]).await.unwrap();

    let h_step = harness(10).await;
    let stepped = create_monitor(&h_step).await;
    h_step
        .service
        .initial_backtest(stepped, h_step.days[5])
        .await
        .unwrap();
    h_step.service.advance(stepped, h_step.days[6]).await.unwrap();
    h_step.service.advance(stepped, h_step.days[7]).await.unwrap();

    let final_one = h_one
        .monitors
        .get_latest_snapshot(one)
        .await
        .unwrap()
        .unwrap();
    let final_step = h_step
        .monitors
        .get_latest_snapshot(stepped)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(final_one.date, final_step.date);
    assert_eq!(final_one.equity, final_step.equity);
    assert_eq!(final_one.cash, final_step.cash);
    assert_eq!(final_one.cumulative_return, final_step.cumulative_return);
    assert_eq!(final_one.positions.len(), final_step.positions.len());
    for (a, b) in final_one.positions.iter().zip(&final_step.positions) {
        assert_eq!(a.ticker, b.ticker);
        assert_eq!(a.quantity, b.quantity);
        assert_eq!(a.open_price, b.open_price);
    }
    assert_eq!(final_one.strategy_variables, final_step.strategy_variables);
}

#[tokio::test]
async fn test_advance_rejects_non_active_monitor() {
    let h = harness(10).await;
    let id = create_monitor(&h).await;
    h.service.initial_backtest(id, h.days[5]).await.unwrap();
    h.monitors
        .update_status(id, MonitorStatus::Stopped)
        .await
        .unwrap();

    let err = h.service.advance(id, h.days[6]).await.unwrap_err();
    assert!(err.to_string().contains("not active"));
}

#[tokio::test]
async fn test_failed_initial_backtest_marks_monitor_failed() {
    let h = harness(10).await;

    // A monitor over a ticker with no quotes cannot initialize
    let monitor = Monitor {
        id: 0,
        name: "ghost".into(),
        strategy: "long_hold".into(),
        parameters: ParamMap::new(),
        tickers: vec!["GHOST".into()],
        start_date: h.days[0],
        initial_capital: dec!(10000),
        status: MonitorStatus::Initializing,
        last_processed_date: None,
        backtest_progress: 0,
        backtest_status: RunStatus::Pending,
        backtest_error: None,
        backtest_current_date: None,
        created_at: Utc::now(),
    };
    let id = h.monitors.create(&monitor).await.unwrap();

    assert!(h.service.initial_backtest(id, h.days[5]).await.is_err());

    let stored = h.monitors.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MonitorStatus::Failed);
    assert_eq!(stored.backtest_status, RunStatus::Failed);
    assert!(stored.backtest_error.is_some());
}
