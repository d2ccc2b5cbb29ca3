//! CLI surface of the engine. Every command exits 0 on success, 1 on
//! validation or partial failure, 2 on fatal errors or a concurrent
//! instance of the same job class.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde_json::json;
use simtrade::application::backtest::{RunOutput, RunSpec};
use simtrade::application::bootstrap::AppContext;
use simtrade::application::jobs::JobClass;
use simtrade::application::monitor::{AdvanceOutcome, SkipReason};
use simtrade::config::Config;
use simtrade::domain::errors::EngineError;
use simtrade::domain::params::{OptimizationParam, ParamMap, ParamValue};
use simtrade::domain::records::BacktestRun;
use simtrade::infrastructure::locks::JobLock;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "simtrade",
    version,
    about = "Trading-strategy backtesting and forward-monitoring engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run or replay a backtest
    RunBacktest {
        /// Replay an existing run record
        #[arg(long)]
        run_id: Option<i64>,
        /// Strategy name (see list-strategies)
        #[arg(long)]
        strategy: Option<String>,
        /// Comma-separated ticker ids or symbols
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long, default_value = "10000")]
        initial_capital: Decimal,
        /// Benchmark ticker id or symbol for the buy-and-hold overlay
        #[arg(long)]
        benchmark: Option<String>,
        /// Strategy parameter override, `name=value` (repeatable)
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// Treat this run as an optimization sweep
        #[arg(long)]
        optimize: bool,
        /// Sweep range, `name=from:to:step` (repeatable)
        #[arg(long = "opt", value_parser = parse_opt_range)]
        opt: Vec<OptimizationParam>,
        /// Execute without touching the run database
        #[arg(long)]
        no_save: bool,
        /// Run name; defaults to a strategy/window-derived one
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Run a monitor's initial backtest phase
    MonitorBacktest {
        monitor_id: i64,
    },
    /// Advance active monitors by one trading day
    UpdateMonitor {
        #[arg(long)]
        monitor_id: Option<i64>,
        /// Target date; defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Pull new bars from quote sources
    UpdateQuotes {
        #[arg(long)]
        ticker_id: Option<i64>,
        /// Refetch full history
        #[arg(long)]
        force: bool,
    },
    /// Orchestrate quotes then monitor advances for one day
    DailyUpdate {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        skip_quotes: bool,
        #[arg(long)]
        skip_monitors: bool,
    },
    /// Enumerate registered strategies
    ListStrategies {
        #[arg(long)]
        strategy: Option<String>,
        /// Include parameters and lookback
        #[arg(long)]
        details: bool,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Enumerate tickers with data currency
    ListTickers {
        #[arg(long)]
        enabled_only: bool,
        /// Include bar counts and date ranges
        #[arg(long)]
        with_stats: bool,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Query historical backtest results
    GetBacktestResults {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        last: Option<usize>,
        /// Side-by-side metric comparison
        #[arg(long)]
        compare: bool,
        #[arg(long)]
        summary_only: bool,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

fn parse_opt_range(raw: &str) -> Result<OptimizationParam, String> {
    let (name, range) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=from:to:step, got '{raw}'"))?;
    let parts: Vec<&str> = range.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("expected name=from:to:step, got '{raw}'"));
    }
    let parse = |s: &str| {
        s.trim()
            .parse::<Decimal>()
            .map_err(|_| format!("'{s}' is not a number"))
    };
    OptimizationParam::new(name.trim(), parse(parts[0])?, parse(parts[1])?, parse(parts[2])?)
}

fn command_format(command: &Commands) -> OutputFormat {
    match command {
        Commands::RunBacktest { format, .. }
        | Commands::ListStrategies { format, .. }
        | Commands::ListTickers { format, .. }
        | Commands::GetBacktestResults { format, .. } => *format,
        Commands::DailyUpdate { .. } => OutputFormat::Json,
        _ => OutputFormat::Human,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = command_format(&cli.command);

    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            let message = format!("{e:#}");
            eprintln!("error: {message}");
            if format == OutputFormat::Json {
                let payload = json!({ "success": false, "error": message });
                println!("{payload}");
            }
            match e.downcast_ref::<EngineError>() {
                Some(engine_err) => engine_err.exit_code(),
                None => 2,
            }
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands) -> Result<i32> {
    let config = Config::from_env();

    match command {
        Commands::RunBacktest {
            run_id,
            strategy,
            tickers,
            start_date,
            end_date,
            initial_capital,
            benchmark,
            params,
            optimize,
            opt,
            no_save,
            name,
            format,
        } => {
            let ctx = AppContext::init(config).await?;
            let _lock = JobLock::acquire(&ctx.config.var_dir, JobClass::Backtest.as_str())?;
            let runner = ctx.runner();

            let started = std::time::Instant::now();
            let (run, output) = match run_id {
                Some(id) => runner.execute(id, !no_save).await?,
                None => {
                    let strategy = strategy.ok_or_else(|| {
                        EngineError::InvalidInput("--strategy is required for a new run".into())
                    })?;
                    let (start_date, end_date) = match (start_date, end_date) {
                        (Some(s), Some(e)) => (s, e),
                        _ => {
                            return Err(EngineError::InvalidInput(
                                "--start-date and --end-date are required for a new run".into(),
                            )
                            .into());
                        }
                    };
                    if optimize && opt.is_empty() {
                        return Err(EngineError::InvalidInput(
                            "--optimize requires at least one --opt range".into(),
                        )
                        .into());
                    }

                    let mut parameters = ParamMap::new();
                    for (key, value) in params {
                        parameters.insert(key, ParamValue::parse(&value));
                    }
                    let spec = RunSpec {
                        name: name.unwrap_or_else(|| {
                            format!("{strategy} {start_date}..{end_date}")
                        }),
                        strategy,
                        parameters,
                        tickers,
                        benchmark,
                        start_date,
                        end_date,
                        initial_capital,
                        optimization: if optimize { opt } else { Vec::new() },
                    };

                    if no_save {
                        let run = spec.into_run();
                        let output = runner.execute_run(&run, false).await?;
                        (run, output)
                    } else {
                        let run = runner.create_run(spec).await?;
                        let output = runner.execute_run(&run, true).await?;
                        (run, output)
                    }
                }
            };
            let elapsed = started.elapsed().as_secs_f64();

            match format {
                OutputFormat::Json => {
                    println!("{}", backtest_json(&run, &output, elapsed));
                }
                OutputFormat::Human => print_backtest_human(&run, &output, elapsed),
            }
            Ok(0)
        }

        Commands::MonitorBacktest { monitor_id } => {
            let ctx = AppContext::init(config).await?;
            let _lock =
                JobLock::acquire(&ctx.config.var_dir, JobClass::MonitorBacktest.as_str())?;
            ctx.monitor_service()
                .initial_backtest(monitor_id, Utc::now().date_naive())
                .await?;
            println!("monitor #{monitor_id}: initial backtest completed, now active");
            Ok(0)
        }

        Commands::UpdateMonitor { monitor_id, date } => {
            let ctx = AppContext::init(config).await?;
            let lock_name = match monitor_id {
                Some(id) if ctx.config.monitor_scoped_locks => {
                    format!("{}-{id}", JobClass::UpdateMonitor.as_str())
                }
                _ => JobClass::UpdateMonitor.as_str().to_string(),
            };
            let _lock = JobLock::acquire(&ctx.config.var_dir, &lock_name)?;

            let service = ctx.monitor_service();
            let date = date.unwrap_or_else(|| Utc::now().date_naive());

            let targets = match monitor_id {
                Some(id) => vec![id],
                None => ctx
                    .monitors
                    .get_active()
                    .await?
                    .into_iter()
                    .map(|m| m.id)
                    .collect(),
            };

            let mut failures = 0;
            for id in targets {
                match service.advance(id, date).await {
                    Ok(outcome) => println!("monitor #{id}: {}", describe_outcome(&outcome)),
                    Err(e) => {
                        eprintln!("monitor #{id}: failed: {e:#}");
                        failures += 1;
                    }
                }
            }
            Ok(if failures > 0 { 1 } else { 0 })
        }

        Commands::UpdateQuotes { ticker_id, force } => {
            let ctx = AppContext::init(config).await?;
            let _lock = JobLock::acquire(&ctx.config.var_dir, JobClass::UpdateQuotes.as_str())?;

            let summary = ctx.quote_service().update(ticker_id, force).await?;
            for result in &summary.results {
                match &result.error {
                    None => println!("{}: {} bars", result.symbol, result.written),
                    Some(error) => println!("{}: failed: {error}", result.symbol),
                }
            }
            println!("updated {} tickers, {} failed", summary.updated, summary.failed);
            Ok(if summary.failed > 0 { 1 } else { 0 })
        }

        Commands::DailyUpdate {
            date,
            skip_quotes,
            skip_monitors,
        } => {
            let ctx = AppContext::init(config).await?;
            let _lock = JobLock::acquire(&ctx.config.var_dir, JobClass::DailyUpdate.as_str())?;
            // Hold the phase locks too so standalone jobs cannot interleave
            let _quotes_lock = if skip_quotes {
                None
            } else {
                Some(JobLock::acquire(
                    &ctx.config.var_dir,
                    JobClass::UpdateQuotes.as_str(),
                )?)
            };
            let _monitors_lock = if skip_monitors {
                None
            } else {
                Some(JobLock::acquire(
                    &ctx.config.var_dir,
                    JobClass::UpdateMonitor.as_str(),
                )?)
            };

            // Recover stalled runs before starting the day's work
            let health = ctx.dispatcher().health_check().await?;
            if !health.restarted.is_empty() || !health.timed_out.is_empty() {
                eprintln!(
                    "health check: restarted {:?}, timed out {:?}",
                    health.restarted, health.timed_out
                );
            }

            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let report = ctx
                .daily_update()
                .run(date, skip_quotes, skip_monitors)
                .await?;
            println!("{}", report.to_payload());
            Ok(report.exit_code())
        }

        Commands::ListStrategies {
            strategy,
            details,
            format,
        } => {
            let ctx = AppContext::init(config).await?;
            let descriptors = match strategy {
                Some(name) => vec![ctx.registry.describe(&name)?],
                None => ctx.registry.describe_all(),
            };

            match format {
                OutputFormat::Json => println!("{}", json!({ "strategies": descriptors })),
                OutputFormat::Human => {
                    for d in descriptors {
                        println!("{}  -  {}", d.name, d.description);
                        if details {
                            println!("    lookback: {} bars", d.lookback);
                            for (key, value) in &d.parameters {
                                println!("    param {key} = {value}");
                            }
                        }
                    }
                }
            }
            Ok(0)
        }

        Commands::ListTickers {
            enabled_only,
            with_stats,
            format,
        } => {
            let ctx = AppContext::init(config).await?;
            let tickers = if enabled_only {
                ctx.tickers.get_enabled().await?
            } else {
                ctx.tickers.get_all().await?
            };

            let mut rows = Vec::new();
            for ticker in tickers {
                let stats = if with_stats {
                    let count = ctx.quotes.count(ticker.id).await?;
                    let range = ctx.quotes.get_date_range(ticker.id).await?;
                    Some((count, range))
                } else {
                    None
                };
                rows.push((ticker, stats));
            }

            match format {
                OutputFormat::Json => {
                    let items: Vec<serde_json::Value> = rows
                        .iter()
                        .map(|(ticker, stats)| {
                            let mut item = json!({
                                "id": ticker.id,
                                "symbol": ticker.symbol,
                                "exchange": ticker.exchange,
                                "source": ticker.source,
                                "enabled": ticker.enabled,
                            });
                            if let Some((count, range)) = stats {
                                item["bars"] = json!(count);
                                item["range"] = json!(range.map(|(from, to)| {
                                    [from.to_string(), to.to_string()]
                                }));
                            }
                            item
                        })
                        .collect();
                    println!("{}", json!({ "tickers": items }));
                }
                OutputFormat::Human => {
                    for (ticker, stats) in rows {
                        let flag = if ticker.enabled { "" } else { " (disabled)" };
                        match stats {
                            Some((count, Some((from, to)))) => println!(
                                "#{} {} [{}]{} - {} bars, {} .. {}",
                                ticker.id, ticker.symbol, ticker.exchange, flag, count, from, to
                            ),
                            Some((_, None)) => println!(
                                "#{} {} [{}]{} - no data",
                                ticker.id, ticker.symbol, ticker.exchange, flag
                            ),
                            None => println!(
                                "#{} {} [{}]{}",
                                ticker.id, ticker.symbol, ticker.exchange, flag
                            ),
                        }
                    }
                }
            }
            Ok(0)
        }

        Commands::GetBacktestResults {
            id,
            strategy,
            last,
            compare,
            summary_only,
            format,
        } => {
            let ctx = AppContext::init(config).await?;
            let runs = match (id, strategy, last) {
                (Some(id), _, _) => {
                    let run = ctx.runs.get(id).await?.ok_or_else(|| {
                        EngineError::InvalidInput(format!("run #{id} not found"))
                    })?;
                    vec![run]
                }
                (None, Some(strategy), last) => {
                    ctx.runs.get_by_strategy(&strategy, last.unwrap_or(10)).await?
                }
                (None, None, last) => ctx.runs.get_recent(last.unwrap_or(10)).await?,
            };

            match format {
                OutputFormat::Json => {
                    let items: Vec<serde_json::Value> =
                        runs.iter().map(|run| run_summary_json(run, summary_only)).collect();
                    println!("{}", json!({ "runs": items }));
                }
                OutputFormat::Human if compare => print_comparison(&runs),
                OutputFormat::Human => {
                    for run in &runs {
                        print_run_record(run, summary_only);
                    }
                }
            }
            Ok(0)
        }
    }
}

fn describe_outcome(outcome: &AdvanceOutcome) -> String {
    match outcome {
        AdvanceOutcome::Processed { date, equity } => {
            format!("processed {date}, equity {equity}")
        }
        AdvanceOutcome::Skipped(SkipReason::AlreadyProcessed) => {
            "skipped (already processed)".to_string()
        }
        AdvanceOutcome::Skipped(SkipReason::NoQuotes) => "skipped (no quotes)".to_string(),
    }
}

fn backtest_json(run: &BacktestRun, output: &RunOutput, elapsed: f64) -> serde_json::Value {
    json!({
        "success": true,
        "run_id": run.id,
        "execution_time": elapsed,
        "metrics": output.primary_metrics().map(|m| m.to_flat_json()),
        "configuration": {
            "name": run.name,
            "strategy": run.strategy,
            "tickers": run.tickers,
            "start_date": run.start_date,
            "end_date": run.end_date,
            "initial_capital": run.initial_capital,
            "is_optimization": run.is_optimization,
        },
    })
}

fn print_backtest_human(run: &BacktestRun, output: &RunOutput, elapsed: f64) {
    println!("run '{}' finished in {elapsed:.2}s", run.name);
    if let RunOutput::Sweep(report) = output {
        println!(
            "optimization: {}/{} combinations succeeded",
            report.succeeded, report.combinations_total
        );
        for (rank, result) in report.results.iter().take(10).enumerate() {
            let params: Vec<String> = result
                .parameters
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            match (&result.metrics, &result.error) {
                (Some(metrics), _) => println!(
                    "  #{:<2} {}  net profit {}  drawdown {}%",
                    rank + 1,
                    params.join(" "),
                    metrics.net_profit.round_dp(2),
                    metrics.max_drawdown_percent.round_dp(2)
                ),
                (None, Some(error)) => {
                    println!("  #{:<2} {}  failed: {error}", rank + 1, params.join(" "));
                }
                (None, None) => {}
            }
        }
    }
    if let Some(metrics) = output.primary_metrics() {
        println!("  net profit:     {} ({}%)", metrics.net_profit.round_dp(2), metrics.net_profit_percent.round_dp(2));
        println!(
            "  transactions:   {} ({} wins / {} losses)",
            metrics.total_transactions,
            metrics.profitable_transactions,
            metrics.losing_transactions
        );
        println!("  profit factor:  {}", metrics.profit_factor_display());
        println!(
            "  max drawdown:   {} ({}%)",
            metrics.max_drawdown_value.round_dp(2),
            metrics.max_drawdown_percent.round_dp(2)
        );
        println!("  win rate:       {}%", metrics.win_rate.round_dp(2));
    }
}

fn run_summary_json(run: &BacktestRun, summary_only: bool) -> serde_json::Value {
    let mut item = json!({
        "run_id": run.id,
        "name": run.name,
        "strategy": run.strategy,
        "status": run.status,
        "metrics": run.metrics.as_ref().map(|m| m.to_flat_json()),
    });
    if !summary_only {
        item["tickers"] = json!(run.tickers);
        item["start_date"] = json!(run.start_date);
        item["end_date"] = json!(run.end_date);
        item["initial_capital"] = json!(run.initial_capital);
        item["is_optimization"] = json!(run.is_optimization);
        item["execution_seconds"] = json!(run.execution_seconds);
        item["error"] = json!(run.error_message);
    }
    item
}

fn print_run_record(run: &BacktestRun, summary_only: bool) {
    println!(
        "#{} '{}' [{}] {} {}..{}",
        run.id, run.name, run.status, run.strategy, run.start_date, run.end_date
    );
    if let Some(error) = &run.error_message {
        println!("    error: {error}");
    }
    if let Some(metrics) = &run.metrics {
        println!(
            "    net profit {} ({}%), {} trades, win rate {}%, profit factor {}",
            metrics.net_profit.round_dp(2),
            metrics.net_profit_percent.round_dp(2),
            metrics.total_transactions,
            metrics.win_rate.round_dp(2),
            metrics.profit_factor_display()
        );
    }
    if !summary_only {
        if let Some(seconds) = run.execution_seconds {
            println!("    executed in {seconds:.2}s");
        }
    }
}

fn print_comparison(runs: &[BacktestRun]) {
    println!(
        "{:<6} {:<20} {:<14} {:>12} {:>8} {:>10}",
        "id", "strategy", "status", "net profit", "trades", "win rate"
    );
    for run in runs {
        match &run.metrics {
            Some(metrics) => println!(
                "{:<6} {:<20} {:<14} {:>12} {:>8} {:>9}%",
                run.id,
                run.strategy,
                run.status.to_string(),
                metrics.net_profit.round_dp(2).to_string(),
                metrics.total_transactions,
                metrics.win_rate.round_dp(2).to_string()
            ),
            None => println!(
                "{:<6} {:<20} {:<14} {:>12}",
                run.id,
                run.strategy,
                run.status.to_string(),
                "-"
            ),
        }
    }
}
