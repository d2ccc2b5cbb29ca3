use crate::application::strategies::{Sizing, Strategy, StrategyContext, check_known_keys};
use crate::domain::market::Bar;
use crate::domain::params::{ParamMap, ParamValue};
use crate::domain::trading::Side;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// RSI mean-reversion: long when RSI drops below the oversold bound,
/// exit when it recovers above the overbought bound.
#[derive(Debug, Clone)]
pub struct RsiReversionStrategy {
    period: usize,
    oversold: Decimal,
    overbought: Decimal,
}

impl Default for RsiReversionStrategy {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: dec!(30),
            overbought: dec!(70),
        }
    }
}

impl RsiReversionStrategy {
    /// Simple-average RSI over the last `period` close-to-close changes,
    /// ending at `current`.
    fn rsi(history: &[Bar], current: &Bar, period: usize) -> Option<Decimal> {
        if period == 0 || history.len() < period {
            return None;
        }
        let mut closes: Vec<Decimal> = history[history.len() - period..]
            .iter()
            .map(|b| b.close)
            .collect();
        closes.push(current.close);

        let mut gains = Decimal::ZERO;
        let mut losses = Decimal::ZERO;
        for pair in closes.windows(2) {
            let change = pair[1] - pair[0];
            if change > Decimal::ZERO {
                gains += change;
            } else {
                losses += -change;
            }
        }
        if losses.is_zero() {
            return Some(dec!(100));
        }
        let rs = gains / losses;
        Some(dec!(100) - dec!(100) / (Decimal::ONE + rs))
    }
}

impl Strategy for RsiReversionStrategy {
    fn name(&self) -> &'static str {
        "rsi_reversion"
    }

    fn max_lookback(&self) -> usize {
        self.period
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
            let history = ctx.history(&ticker, self.period);
            let Some(rsi) = Self::rsi(history, &current, self.period) else {
                continue;
            };

            if rsi < self.oversold && !ctx.ledger.has_open_position(&ticker) {
                ctx.enter(
                    Side::Long,
                    &ticker,
                    Sizing::CashFraction(fraction),
                    "oversold",
                );
            } else if rsi > self.overbought {
                let ids: Vec<u64> = ctx
                    .ledger
                    .open_positions()
                    .filter(|p| p.ticker == ticker)
                    .map(|p| p.id)
                    .collect();
                for id in ids {
                    ctx.exit(id, "overbought");
                }
            }
        }
        Ok(())
    }

    fn parameters(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("period".into(), ParamValue::from(self.period));
        params.insert("oversold".into(), ParamValue::Number(self.oversold));
        params.insert("overbought".into(), ParamValue::Number(self.overbought));
        params
    }

    fn apply_parameters(&mut self, overrides: &ParamMap) -> Result<()> {
        check_known_keys(overrides, &["period", "oversold", "overbought"])?;
        if let Some(v) = overrides.get("period") {
            self.period = v
                .as_usize()
                .with_context(|| format!("parameter 'period' must be a positive integer, got {v}"))?;
        }
        if let Some(v) = overrides.get("oversold") {
            self.oversold = v
                .as_decimal()
                .with_context(|| format!("parameter 'oversold' must be numeric, got {v}"))?;
        }
        if let Some(v) = overrides.get("overbought") {
            self.overbought = v
                .as_decimal()
                .with_context(|| format!("parameter 'overbought' must be numeric, got {v}"))?;
        }
        if self.period == 0 {
            anyhow::bail!("'period' must be positive");
        }
        if self.oversold >= self.overbought {
            anyhow::bail!(
                "'oversold' ({}) must be below 'overbought' ({})",
                self.oversold,
                self.overbought
            );
        }
        Ok(())
    }
}
