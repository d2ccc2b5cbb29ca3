use crate::application::strategies::{Signal, Sizing, Strategy, StrategyContext};
use crate::domain::errors::EngineError;
use crate::domain::market::{Asset, AssetBook, Resolution};
use crate::domain::performance::{PerformanceMetrics, Stats};
use crate::domain::trading::{Ledger, TradeLogEntry};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, warn};

/// Everything a finished simulation hands back to its caller.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub metrics: PerformanceMetrics,
    pub final_equity: Decimal,
    pub trade_log: Vec<TradeLogEntry>,
    pub capital: Vec<(NaiveDate, Decimal)>,
    pub drawdown: Vec<(NaiveDate, Decimal, Decimal)>,
    pub benchmark: Option<Vec<(NaiveDate, Decimal)>>,
}

/// Per-date view passed to the observer after the date is fully processed.
pub struct DayRecord<'a> {
    pub date: NaiveDate,
    pub index: usize,
    pub total: usize,
    pub ledger: &'a Ledger,
    /// Trades closed on this date, in close order.
    pub new_trades: &'a [TradeLogEntry],
    pub strategy_variables: serde_json::Value,
}

/// The bar-stepping event loop.
///
/// Drives a strategy over the ordered union of bar dates, dispatching
/// `on_open` / `on_close` per date, executing queued signals at the open,
/// marking to market and snapshotting equity at the close.
pub struct Simulator {
    assets: AssetBook,
    benchmark: Option<Asset>,
}

impl Simulator {
    pub fn new(assets: AssetBook, resolution: Resolution) -> Self {
        Self {
            assets: assets.resample(resolution),
            benchmark: None,
        }
    }

    pub fn with_benchmark(mut self, benchmark: Asset) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    pub fn assets(&self) -> &AssetBook {
        &self.assets
    }

    /// Full backtest: drive the window, then `on_strategy_end` and force-
    /// close everything at the last close.
    pub fn run(
        &self,
        strategy: &mut dyn Strategy,
        ledger: &mut Ledger,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SimulationOutcome, EngineError> {
        self.drive(strategy, ledger, start, end, false, true, |_| Ok(()))?;
        Ok(self.outcome(ledger))
    }

    /// Incremental stepping with a per-date observer and no finalization;
    /// positions stay open across calls. Used by monitors.
    pub fn run_window<F>(
        &self,
        strategy: &mut dyn Strategy,
        ledger: &mut Ledger,
        start: NaiveDate,
        end: NaiveDate,
        is_live: bool,
        observer: F,
    ) -> Result<(), EngineError>
    where
        F: FnMut(DayRecord<'_>) -> anyhow::Result<()>,
    {
        self.drive(strategy, ledger, start, end, is_live, false, observer)
    }

    /// Full backtest with a per-date observer (monitor initial phase).
    pub fn run_observed<F>(
        &self,
        strategy: &mut dyn Strategy,
        ledger: &mut Ledger,
        start: NaiveDate,
        end: NaiveDate,
        observer: F,
    ) -> Result<SimulationOutcome, EngineError>
    where
        F: FnMut(DayRecord<'_>) -> anyhow::Result<()>,
    {
        self.drive(strategy, ledger, start, end, false, false, observer)?;
        Ok(self.outcome(ledger))
    }

    fn drive<F>(
        &self,
        strategy: &mut dyn Strategy,
        ledger: &mut Ledger,
        start: NaiveDate,
        end: NaiveDate,
        is_live: bool,
        finalize: bool,
        mut observer: F,
    ) -> Result<(), EngineError>
    where
        F: FnMut(DayRecord<'_>) -> anyhow::Result<()>,
    {
        if start > end {
            return Err(EngineError::InvalidInput(format!(
                "invalid window: start {start} is after end {end}"
            )));
        }
        if self.assets.is_empty() {
            return Err(EngineError::NoData("no assets loaded".into()));
        }
        let dates = self.assets.date_union(start, end);
        if dates.is_empty() {
            return Err(EngineError::NoData(format!(
                "no bars between {start} and {end}"
            )));
        }

        let lookback = strategy.max_lookback();
        let total = dates.len();
        let mut pending: Vec<Signal> = Vec::new();

        for (index, &date) in dates.iter().enumerate() {
            ledger.set_bar_index(index);
            let trades_before = ledger.closed_trades().len();

            let lookback_satisfied = self
                .assets
                .assets()
                .filter(|a| !a.is_empty())
                .all(|a| a.history_len(a.cursor_at(date)) >= lookback);

            if lookback_satisfied {
                let mut ctx =
                    StrategyContext::new(&self.assets, date, is_live, ledger, &mut pending);
                strategy.on_open(&mut ctx).map_err(|e| {
                    EngineError::strategy_fault(
                        format!("{}::on_open", strategy.name()),
                        format!("{e:#}"),
                    )
                })?;

                self.execute_signals(ledger, &mut pending, date)?;

                let mut ctx =
                    StrategyContext::new(&self.assets, date, is_live, ledger, &mut pending);
                strategy.on_close(&mut ctx).map_err(|e| {
                    EngineError::strategy_fault(
                        format!("{}::on_close", strategy.name()),
                        format!("{e:#}"),
                    )
                })?;
            } else {
                debug!(%date, lookback, "skipping date, lookback not satisfied");
            }

            let closes = self.assets.closes_at(date);
            ledger.mark_to_market(&closes);
            ledger.snapshot_equity(date);

            let variables = strategy.strategy_variables();
            let record = DayRecord {
                date,
                index,
                total,
                ledger,
                new_trades: &ledger.closed_trades()[trades_before..],
                strategy_variables: variables,
            };
            observer(record).map_err(|e| EngineError::PersistenceFault(format!("{e:#}")))?;
        }

        if finalize {
            let last = *dates.last().expect("dates checked non-empty");
            ledger.set_bar_index(total - 1);

            let mut ctx = StrategyContext::new(&self.assets, last, is_live, ledger, &mut pending);
            strategy.on_strategy_end(&mut ctx).map_err(|e| {
                EngineError::strategy_fault(
                    format!("{}::on_strategy_end", strategy.name()),
                    format!("{e:#}"),
                )
            })?;

            let closes = self.assets.closes_at(last);
            ledger
                .close_all(&closes, last, "end of simulation")
                .map_err(|e| {
                    EngineError::strategy_fault("simulator::finalize", e.to_string())
                })?;
        }

        Ok(())
    }

    /// Drain the signal queue at `date`, executing at open prices. Signals
    /// whose ticker did not trade on `date` stay queued for the next bar.
    fn execute_signals(
        &self,
        ledger: &mut Ledger,
        pending: &mut Vec<Signal>,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let mut deferred = Vec::new();

        for signal in pending.drain(..) {
            match signal {
                Signal::Enter {
                    side,
                    ticker,
                    sizing,
                    comment,
                } => {
                    let open = self
                        .assets
                        .get(&ticker)
                        .and_then(|a| a.bar_on(date))
                        .map(|b| b.open);
                    let Some(price) = open else {
                        deferred.push(Signal::Enter {
                            side,
                            ticker,
                            sizing,
                            comment,
                        });
                        continue;
                    };

                    let quantity = match sizing {
                        Sizing::Quantity(q) => q,
                        Sizing::CashFraction(fraction) => {
                            if price <= Decimal::ZERO {
                                warn!(%ticker, %date, "non-positive open price, dropping entry");
                                continue;
                            }
                            // Truncate so the reserved size never exceeds cash
                            (ledger.cash() * fraction / price)
                                .round_dp_with_strategy(12, RoundingStrategy::ToZero)
                        }
                    };
                    if quantity <= Decimal::ZERO {
                        warn!(%ticker, %date, "zero-quantity entry signal dropped");
                        continue;
                    }

                    ledger
                        .open_position(side, &ticker, price, quantity, date, &comment)
                        .map_err(|e| {
                            EngineError::strategy_fault("simulator::execute_signals", e.to_string())
                        })?;
                }
                Signal::Exit {
                    position_id,
                    comment,
                } => {
                    let Some(ticker) = ledger
                        .open_positions()
                        .find(|p| p.id == position_id)
                        .map(|p| p.ticker.clone())
                    else {
                        // Position already gone; the signal is stale
                        continue;
                    };
                    let open = self
                        .assets
                        .get(&ticker)
                        .and_then(|a| a.bar_on(date))
                        .map(|b| b.open);
                    let Some(price) = open else {
                        deferred.push(Signal::Exit {
                            position_id,
                            comment,
                        });
                        continue;
                    };
                    ledger
                        .close_position(position_id, price, date, &comment)
                        .map_err(|e| {
                            EngineError::strategy_fault("simulator::execute_signals", e.to_string())
                        })?;
                }
                Signal::ExitAll { comment } => {
                    let mut opens = std::collections::BTreeMap::new();
                    for asset in self.assets.assets() {
                        if let Some(bar) = asset.bar_on(date) {
                            opens.insert(asset.ticker().to_string(), bar.open);
                        }
                    }
                    ledger.close_all(&opens, date, &comment).map_err(|e| {
                        EngineError::strategy_fault("simulator::execute_signals", e.to_string())
                    })?;
                }
            }
        }

        *pending = deferred;
        Ok(())
    }

    fn outcome(&self, ledger: &Ledger) -> SimulationOutcome {
        let capital = ledger.capital_series().to_vec();
        let benchmark = self.benchmark.as_ref().map(|asset| {
            let dates: Vec<NaiveDate> = capital.iter().map(|(d, _)| *d).collect();
            benchmark_buy_and_hold(asset, &dates)
        });
        SimulationOutcome {
            metrics: PerformanceMetrics::from_ledger(ledger),
            final_equity: ledger.equity(),
            trade_log: ledger.closed_trades().to_vec(),
            capital,
            drawdown: ledger.drawdown_series().to_vec(),
            benchmark,
        }
    }
}

/// Buy-and-hold percent series for the benchmark, aligned to the capital
/// dates. Calendar mismatches are forward-filled: a date with no benchmark
/// bar observes the latest on-or-before close.
pub fn benchmark_buy_and_hold(
    benchmark: &Asset,
    dates: &[NaiveDate],
) -> Vec<(NaiveDate, Decimal)> {
    let mut out = Vec::with_capacity(dates.len());
    let mut baseline: Option<Decimal> = None;
    for &date in dates {
        let close = benchmark.latest_on_or_before(date).map(|b| b.close);
        let pct = match (baseline, close) {
            (None, Some(c)) => {
                baseline = Some(c);
                Decimal::ZERO
            }
            (Some(base), Some(c)) => Stats::percent_change(base, c),
            (_, None) => Decimal::ZERO,
        };
        out.push((date, pct));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::strategies::LongHoldStrategy;
    use crate::domain::market::Bar;
    use crate::domain::params::ParamMap;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(d: u32, open: Decimal, close: Decimal) -> Bar {
        Bar {
            date: day(d),
            open,
            high: open.max(close) + dec!(1),
            low: open.min(close) - dec!(1),
            close,
            volume: 1000,
        }
    }

    fn single_asset_book(bars: Vec<Bar>) -> AssetBook {
        let mut book = AssetBook::new();
        book.insert(Asset::from_bars("X", bars));
        book
    }

    /// Event-order probe: records the sequence of callbacks it receives.
    #[derive(Debug)]
    struct ProbeStrategy {
        events: Vec<String>,
    }

    impl Strategy for ProbeStrategy {
        fn name(&self) -> &'static str {
            "probe"
        }
        fn max_lookback(&self) -> usize {
            0
        }
        fn on_open(&mut self, ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
            self.events.push(format!("open:{}", ctx.date));
            Ok(())
        }
        fn on_close(&mut self, ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
            self.events.push(format!("close:{}", ctx.date));
            Ok(())
        }
        fn on_strategy_end(&mut self, ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
            self.events.push(format!("end:{}", ctx.date));
            Ok(())
        }
        fn parameters(&self) -> ParamMap {
            ParamMap::new()
        }
        fn apply_parameters(&mut self, _overrides: &ParamMap) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_open_precedes_close_in_strict_date_order() {
        let book = single_asset_book(vec![
            bar(2, dec!(100), dec!(105)),
            bar(3, dec!(110), dec!(115)),
        ]);
        let simulator = Simulator::new(book, Resolution::Daily);
        let mut strategy = ProbeStrategy { events: Vec::new() };
        let mut ledger = Ledger::new(dec!(1000));

        simulator
            .run(&mut strategy, &mut ledger, day(1), day(31))
            .unwrap();

        assert_eq!(
            strategy.events,
            vec![
                "open:2024-01-02",
                "close:2024-01-02",
                "open:2024-01-03",
                "close:2024-01-03",
                "end:2024-01-03",
            ]
        );
    }

    #[test]
    fn test_long_and_hold_arithmetic() {
        // Signal at D0 close, entry at D1 open (110) spending all cash,
        // forced close at D2 close (125).
        let book = single_asset_book(vec![
            bar(2, dec!(100), dec!(105)),
            bar(3, dec!(110), dec!(115)),
            bar(4, dec!(120), dec!(125)),
        ]);
        let simulator = Simulator::new(book, Resolution::Daily);
        let mut strategy = LongHoldStrategy::new();
        let mut ledger = Ledger::new(dec!(1000));

        let outcome = simulator
            .run(&mut strategy, &mut ledger, day(1), day(31))
            .unwrap();

        // qty = 1000 / 110 = 9.0909...; profit = (125 - 110) * qty = 136.36
        assert_eq!(outcome.metrics.total_transactions, 1);
        assert_eq!(outcome.metrics.profitable_transactions, 1);
        assert_eq!(outcome.metrics.win_rate, dec!(100));
        assert_eq!(outcome.metrics.profit_factor, None);
        assert_eq!(outcome.metrics.net_profit.round_dp(2), dec!(136.36));
        assert_eq!(outcome.metrics.net_profit_percent.round_dp(3), dec!(13.636));
        assert_eq!(outcome.final_equity.round_dp(2), dec!(1136.36));

        // Capital series: D0 flat, D1 marked at close 115, D2 after close
        assert_eq!(outcome.capital.len(), 3);
        assert_eq!(outcome.capital[0].1, dec!(1000));
        assert_eq!(outcome.capital[1].1.round_dp(2), dec!(1045.45));
        assert_eq!(outcome.capital[2].1.round_dp(2), dec!(1136.36));
    }

    #[test]
    fn test_single_bar_window() {
        let book = single_asset_book(vec![bar(2, dec!(100), dec!(105))]);
        let simulator = Simulator::new(book, Resolution::Daily);
        let mut strategy = ProbeStrategy { events: Vec::new() };
        let mut ledger = Ledger::new(dec!(1000));

        simulator
            .run(&mut strategy, &mut ledger, day(2), day(2))
            .unwrap();

        assert_eq!(
            strategy.events,
            vec!["open:2024-01-02", "close:2024-01-02", "end:2024-01-02"]
        );
        assert_eq!(ledger.capital_series().len(), 1);
    }

    #[test]
    fn test_invalid_window() {
        let book = single_asset_book(vec![bar(2, dec!(100), dec!(105))]);
        let simulator = Simulator::new(book, Resolution::Daily);
        let mut strategy = LongHoldStrategy::new();
        let mut ledger = Ledger::new(dec!(1000));

        let err = simulator
            .run(&mut strategy, &mut ledger, day(5), day(2))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_no_data() {
        let simulator = Simulator::new(AssetBook::new(), Resolution::Daily);
        let mut strategy = LongHoldStrategy::new();
        let mut ledger = Ledger::new(dec!(1000));

        let err = simulator
            .run(&mut strategy, &mut ledger, day(2), day(5))
            .unwrap_err();
        assert!(matches!(err, EngineError::NoData(_)));
    }

    #[test]
    fn test_lookback_never_satisfied_completes_trivially() {
        #[derive(Debug)]
        struct DeepLookback;
        impl Strategy for DeepLookback {
            fn name(&self) -> &'static str {
                "deep"
            }
            fn max_lookback(&self) -> usize {
                500
            }
            fn on_open(&mut self, _ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
                panic!("must never fire");
            }
            fn on_close(&mut self, _ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
                panic!("must never fire");
            }
            fn parameters(&self) -> ParamMap {
                ParamMap::new()
            }
            fn apply_parameters(&mut self, _overrides: &ParamMap) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let book = single_asset_book(vec![
            bar(2, dec!(100), dec!(105)),
            bar(3, dec!(110), dec!(115)),
        ]);
        let simulator = Simulator::new(book, Resolution::Daily);
        let mut strategy = DeepLookback;
        let mut ledger = Ledger::new(dec!(1000));

        let outcome = simulator
            .run(&mut strategy, &mut ledger, day(1), day(31))
            .unwrap();

        assert_eq!(outcome.metrics.total_transactions, 0);
        assert_eq!(outcome.metrics.net_profit, Decimal::ZERO);
        // Equity snapshots still cover every trading day
        assert_eq!(outcome.capital.len(), 2);
        assert!(outcome.capital.iter().all(|&(_, e)| e == dec!(1000)));
    }

    #[test]
    fn test_strategy_fault_captures_location() {
        #[derive(Debug)]
        struct Faulty;
        impl Strategy for Faulty {
            fn name(&self) -> &'static str {
                "faulty"
            }
            fn max_lookback(&self) -> usize {
                0
            }
            fn on_open(&mut self, _ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
                Ok(())
            }
            fn on_close(&mut self, _ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
                anyhow::bail!("index out of range")
            }
            fn parameters(&self) -> ParamMap {
                ParamMap::new()
            }
            fn apply_parameters(&mut self, _overrides: &ParamMap) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let book = single_asset_book(vec![bar(2, dec!(100), dec!(105))]);
        let simulator = Simulator::new(book, Resolution::Daily);
        let mut strategy = Faulty;
        let mut ledger = Ledger::new(dec!(1000));

        let err = simulator
            .run(&mut strategy, &mut ledger, day(1), day(31))
            .unwrap_err();
        match err {
            EngineError::StrategyFault { message, location } => {
                assert!(message.contains("index out of range"));
                assert_eq!(location, "faulty::on_close");
            }
            other => panic!("expected StrategyFault, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_bar_defers_signal() {
        // A trades on 2..4, B only on 2 and 4: a B entry queued on day 2
        // close cannot fill on day 3 and executes at day 4's open.
        let mut book = AssetBook::new();
        book.insert(Asset::from_bars(
            "A",
            vec![
                bar(2, dec!(10), dec!(10)),
                bar(3, dec!(10), dec!(10)),
                bar(4, dec!(10), dec!(10)),
            ],
        ));
        book.insert(Asset::from_bars(
            "B",
            vec![bar(2, dec!(50), dec!(50)), bar(4, dec!(60), dec!(62))],
        ));

        #[derive(Debug)]
        struct EnterBOnce {
            done: bool,
        }
        impl Strategy for EnterBOnce {
            fn name(&self) -> &'static str {
                "enter_b"
            }
            fn max_lookback(&self) -> usize {
                0
            }
            fn on_open(&mut self, _ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
                Ok(())
            }
            fn on_close(&mut self, ctx: &mut StrategyContext<'_>) -> anyhow::Result<()> {
                if !self.done {
                    ctx.enter(
                        crate::domain::trading::Side::Long,
                        "B",
                        Sizing::Quantity(dec!(1)),
                        "",
                    );
                    self.done = true;
                }
                Ok(())
            }
            fn parameters(&self) -> ParamMap {
                ParamMap::new()
            }
            fn apply_parameters(&mut self, _overrides: &ParamMap) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let simulator = Simulator::new(book, Resolution::Daily);
        let mut strategy = EnterBOnce { done: false };
        let mut ledger = Ledger::new(dec!(1000));

        let outcome = simulator
            .run(&mut strategy, &mut ledger, day(1), day(31))
            .unwrap();

        assert_eq!(outcome.trade_log.len(), 1);
        let trade = &outcome.trade_log[0];
        // Filled at day 4's open, not day 3 (no B bar there)
        assert_eq!(trade.open_date, day(4));
        assert_eq!(trade.open_price, dec!(60));
        assert_eq!(trade.close_price, dec!(62));
    }

    #[test]
    fn test_benchmark_forward_fill() {
        let benchmark = Asset::from_bars(
            "SPY",
            vec![bar(2, dec!(100), dec!(100)), bar(5, dec!(110), dec!(110))],
        );
        let dates = vec![day(2), day(3), day(5)];
        let series = benchmark_buy_and_hold(&benchmark, &dates);

        assert_eq!(series[0], (day(2), Decimal::ZERO));
        // Day 3 has no benchmark bar: forward-filled from day 2
        assert_eq!(series[1], (day(3), Decimal::ZERO));
        assert_eq!(series[2], (day(5), dec!(10)));
    }
}
