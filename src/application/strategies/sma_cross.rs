use crate::application::strategies::{Sizing, Strategy, StrategyContext, check_known_keys};
use crate::domain::market::Bar;
use crate::domain::params::{ParamMap, ParamValue};
use crate::domain::trading::Side;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;

/// Dual-SMA crossover.
///
/// At each close, computes fast and slow simple moving averages over the
/// trailing window including the current bar. A fast-over-slow cross queues
/// a long entry at the next open; the reverse cross queues an exit.
#[derive(Debug, Clone)]
pub struct SmaCrossStrategy {
    fast: usize,
    slow: usize,
    /// Previous fast-minus-slow spread per ticker, for cross detection.
    prev_spread: BTreeMap<String, Decimal>,
}

impl Default for SmaCrossStrategy {
    fn default() -> Self {
        Self {
            fast: 20,
            slow: 50,
            prev_spread: BTreeMap::new(),
        }
    }
}

impl SmaCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self {
            fast,
            slow,
            prev_spread: BTreeMap::new(),
        }
    }

    fn sma(window: &[Bar], current: &Bar, period: usize) -> Option<Decimal> {
        if period == 0 || window.len() + 1 < period {
            return None;
        }
        let mut sum = current.close;
        for bar in window.iter().rev().take(period - 1) {
            sum += bar.close;
        }
        Some(sum / Decimal::from(period))
    }
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &'static str {
        "sma_cross"
    }

    fn max_lookback(&self) -> usize {
        self.slow
    }

    fn on_open(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut StrategyContext<'_>) -> Result<()> {
        let tickers: Vec<String> = ctx.assets.tickers().map(String::from).collect();
        let fraction = Decimal::ONE / Decimal::from(tickers.len().max(1));

        for ticker in tickers {
            let Some(current) = ctx.bar(&ticker).copied() else {
                continue;
            };
            let history = ctx.history(&ticker, self.slow);
            let (Some(fast), Some(slow)) = (
                Self::sma(history, &current, self.fast),
                Self::sma(history, &current, self.slow),
            ) else {
                continue;
            };

            let spread = fast - slow;
            let prev = self.prev_spread.insert(ticker.clone(), spread);

            let Some(prev) = prev else {
                continue;
            };
            let crossed_up = prev <= Decimal::ZERO && spread > Decimal::ZERO;
            let crossed_down = prev >= Decimal::ZERO && spread < Decimal::ZERO;

            if crossed_up && !ctx.ledger.has_open_position(&ticker) {
                ctx.enter(
                    Side::Long,
                    &ticker,
                    Sizing::CashFraction(fraction),
                    "golden cross",
                );
            } else if crossed_down {
                let ids: Vec<u64> = ctx
                    .ledger
                    .open_positions()
                    .filter(|p| p.ticker == ticker)
                    .map(|p| p.id)
                    .collect();
                for id in ids {
                    ctx.exit(id, "death cross");
                }
            }
        }
        Ok(())
    }

    fn parameters(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("fast".into(), ParamValue::from(self.fast));
        params.insert("slow".into(), ParamValue::from(self.slow));
        params
    }

    fn apply_parameters(&mut self, overrides: &ParamMap) -> Result<()> {
        check_known_keys(overrides, &["fast", "slow"])?;
        if let Some(v) = overrides.get("fast") {
            self.fast = v
                .as_usize()
                .with_context(|| format!("parameter 'fast' must be a positive integer, got {v}"))?;
        }
        if let Some(v) = overrides.get("slow") {
            self.slow = v
                .as_usize()
                .with_context(|| format!("parameter 'slow' must be a positive integer, got {v}"))?;
        }
        if self.fast == 0 || self.slow == 0 || self.fast >= self.slow {
            anyhow::bail!(
                "'fast' ({}) must be smaller than 'slow' ({}) and both positive",
                self.fast,
                self.slow
            );
        }
        Ok(())
    }

    fn strategy_variables(&self) -> serde_json::Value {
        json!({ "prev_spread": self.prev_spread })
    }

    fn set_strategy_variables(&mut self, vars: &serde_json::Value) {
        if let Some(map) = vars.get("prev_spread") {
            if let Ok(restored) = serde_json::from_value(map.clone()) {
                self.prev_spread = restored;
            }
        }
    }
}
