mod long_hold;
mod registry;
mod rsi_reversion;
mod sma_cross;

pub use long_hold::LongHoldStrategy;
pub use registry::{StrategyDescriptor, StrategyRegistry};
pub use rsi_reversion::RsiReversionStrategy;
pub use sma_cross::SmaCrossStrategy;

use crate::domain::market::{AssetBook, Bar};
use crate::domain::params::ParamMap;
use crate::domain::trading::{Ledger, Side};
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;

/// How an entry signal sizes its position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    /// Spend this fraction of available cash at the execution price.
    CashFraction(Decimal),
    /// Fixed quantity of units.
    Quantity(Decimal),
}

/// An intent recorded by a strategy, executed by the kernel at the next
/// signal drain (the open of the bar being processed).
#[derive(Debug, Clone)]
pub enum Signal {
    Enter {
        side: Side,
        ticker: String,
        sizing: Sizing,
        comment: String,
    },
    Exit {
        position_id: u64,
        comment: String,
    },
    ExitAll {
        comment: String,
    },
}

/// Per-event view handed to strategy callbacks: the loaded assets, the
/// current date, the ledger, and the signal queue.
///
/// Signals queued during `on_close` execute at the *next* bar's open
/// (the default policy). Signals queued during `on_open` execute at the
/// *current* bar's open immediately after the callback returns; that is
/// the explicit opt-in for same-bar entries, and such signals must not
/// derive from data unknown at the open.
pub struct StrategyContext<'a> {
    pub assets: &'a AssetBook,
    pub date: NaiveDate,
    pub is_live: bool,
    pub ledger: &'a mut Ledger,
    signals: &'a mut Vec<Signal>,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        assets: &'a AssetBook,
        date: NaiveDate,
        is_live: bool,
        ledger: &'a mut Ledger,
        signals: &'a mut Vec<Signal>,
    ) -> Self {
        Self {
            assets,
            date,
            is_live,
            ledger,
            signals,
        }
    }

    /// The current date's bar for `ticker`, if it traded.
    pub fn bar(&self, ticker: &str) -> Option<&Bar> {
        self.assets.get(ticker).and_then(|a| a.bar_on(self.date))
    }

    /// Latest bar at-or-before the current date (stale on gap days).
    pub fn latest_bar(&self, ticker: &str) -> Option<&Bar> {
        self.assets
            .get(ticker)
            .and_then(|a| a.latest_on_or_before(self.date))
    }

    /// At most `n` bars strictly before the current date, oldest first.
    pub fn history(&self, ticker: &str, n: usize) -> &[Bar] {
        match self.assets.get(ticker) {
            Some(asset) => asset.prefix_before(asset.cursor_at(self.date), n),
            None => &[],
        }
    }

    pub fn enter(&mut self, side: Side, ticker: &str, sizing: Sizing, comment: &str) {
        self.signals.push(Signal::Enter {
            side,
            ticker: ticker.to_string(),
            sizing,
            comment: comment.to_string(),
        });
    }

    pub fn exit(&mut self, position_id: u64, comment: &str) {
        self.signals.push(Signal::Exit {
            position_id,
            comment: comment.to_string(),
        });
    }

    pub fn exit_all(&mut self, comment: &str) {
        self.signals.push(Signal::ExitAll {
            comment: comment.to_string(),
        });
    }
}

/// The strategy capability set.
///
/// A strategy must tolerate being constructed, fed a prefix of history,
/// then resumed mid-stream from `set_strategy_variables` without observable
/// difference from linear execution.
pub trait Strategy: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Minimum number of historical bars required before events fire.
    fn max_lookback(&self) -> usize;

    fn on_open(&mut self, ctx: &mut StrategyContext<'_>) -> Result<()>;

    fn on_close(&mut self, ctx: &mut StrategyContext<'_>) -> Result<()>;

    /// Final-bar cleanup. The kernel force-closes any still-open positions
    /// at the last close afterwards, so the default is a no-op.
    fn on_strategy_end(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Current parameter values; the key set is fixed per strategy class.
    fn parameters(&self) -> ParamMap;

    /// Apply overrides; unknown keys and ill-typed values are errors.
    fn apply_parameters(&mut self, overrides: &ParamMap) -> Result<()>;

    /// Opaque state blob for monitor persistence.
    fn strategy_variables(&self) -> serde_json::Value {
        json!({})
    }

    fn set_strategy_variables(&mut self, _vars: &serde_json::Value) {}
}

/// Reject overrides whose key is not declared by the strategy.
pub(crate) fn check_known_keys(overrides: &ParamMap, known: &[&str]) -> Result<()> {
    for key in overrides.keys() {
        if !known.contains(&key.as_str()) {
            anyhow::bail!("unknown parameter '{key}' (expected one of: {})", known.join(", "));
        }
    }
    Ok(())
}
