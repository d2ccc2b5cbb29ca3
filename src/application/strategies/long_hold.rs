use crate::application::strategies::{Sizing, Strategy, StrategyContext, check_known_keys};
use crate::domain::params::ParamMap;
use crate::domain::trading::Side;
use anyhow::Result;
use rust_decimal::Decimal;
use serde_json::json;

/// Buy-and-hold: on the first processed close, queue a long entry per
/// ticker splitting the available cash evenly; hold until the run ends.
#[derive(Debug, Clone, Default)]
pub struct LongHoldStrategy {
    entered: bool,
}

impl LongHoldStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for LongHoldStrategy {
    fn name(&self) -> &'static str {
        "long_hold"
    }

    fn max_lookback(&self) -> usize {
        0
    }

    fn on_open(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut StrategyContext<'_>) -> Result<()> {
        if self.entered {
            return Ok(());
        }
        let tickers: Vec<String> = ctx
            .assets
            .tickers()
            .filter(|t| ctx.latest_bar(t).is_some())
            .map(String::from)
            .collect();
        if tickers.is_empty() {
            return Ok(());
        }

        // Signals execute sequentially against a shrinking cash pool, so
        // 1/n, 1/(n-1), ... 1/1 yields an equal split.
        let n = tickers.len();
        for (i, ticker) in tickers.iter().enumerate() {
            let fraction = Decimal::ONE / Decimal::from(n - i);
            ctx.enter(
                Side::Long,
                ticker,
                Sizing::CashFraction(fraction),
                "initial entry",
            );
        }
        self.entered = true;
        Ok(())
    }

    fn parameters(&self) -> ParamMap {
        ParamMap::new()
    }

    fn apply_parameters(&mut self, overrides: &ParamMap) -> Result<()> {
        check_known_keys(overrides, &[])
    }

    fn strategy_variables(&self) -> serde_json::Value {
        json!({ "entered": self.entered })
    }

    fn set_strategy_variables(&mut self, vars: &serde_json::Value) {
        if let Some(entered) = vars.get("entered").and_then(|v| v.as_bool()) {
            self.entered = entered;
        }
    }
}
