use crate::domain::performance::Stats;
use crate::domain::trading::{Ledger, Side, TradeLogEntry};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Summary statistics over a completed (or in-flight) ledger.
///
/// Break-even trades (profit exactly zero) sit in their own bucket and are
/// excluded from both sides of the win rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub net_profit: Decimal,
    pub net_profit_percent: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub long_gross_profit: Decimal,
    pub long_gross_loss: Decimal,
    pub short_gross_profit: Decimal,
    pub short_gross_loss: Decimal,
    pub total_transactions: usize,
    pub profitable_transactions: usize,
    pub losing_transactions: usize,
    pub break_even_transactions: usize,
    /// `None` encodes an infinite factor (gross loss is zero while gross
    /// profit is positive); serialized as JSON `null`.
    pub profit_factor: Option<Decimal>,
    pub average_profit: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub average_bars_held: Decimal,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub max_drawdown_value: Decimal,
    pub max_drawdown_percent: Decimal,
    pub win_rate: Decimal,
}

impl PerformanceMetrics {
    pub fn from_ledger(ledger: &Ledger) -> Self {
        Self::compute(
            ledger.closed_trades(),
            ledger.initial_capital(),
            ledger.max_drawdown(),
        )
    }

    pub fn compute(
        trades: &[TradeLogEntry],
        initial_capital: Decimal,
        max_drawdown: (Decimal, Decimal),
    ) -> Self {
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;
        let mut long_gross_profit = Decimal::ZERO;
        let mut long_gross_loss = Decimal::ZERO;
        let mut short_gross_profit = Decimal::ZERO;
        let mut short_gross_loss = Decimal::ZERO;
        let mut wins = Vec::new();
        let mut losses = Vec::new();
        let mut break_even = 0usize;
        let mut bars_held = Vec::new();

        for trade in trades {
            bars_held.push(Decimal::from(trade.bars_held));
            if trade.profit > Decimal::ZERO {
                wins.push(trade.profit);
                gross_profit += trade.profit;
                match trade.side {
                    Side::Long => long_gross_profit += trade.profit,
                    Side::Short => short_gross_profit += trade.profit,
                }
            } else if trade.profit < Decimal::ZERO {
                let loss = trade.profit.abs();
                losses.push(loss);
                gross_loss += loss;
                match trade.side {
                    Side::Long => long_gross_loss += loss,
                    Side::Short => short_gross_loss += loss,
                }
            } else {
                break_even += 1;
            }
        }

        let net_profit = gross_profit - gross_loss;
        let net_profit_percent = Stats::percent_change(initial_capital, initial_capital + net_profit);

        let profit_factor = if trades.is_empty() || (gross_profit.is_zero() && gross_loss.is_zero())
        {
            Some(Decimal::ZERO)
        } else if gross_loss.is_zero() {
            None
        } else {
            Some(gross_profit / gross_loss)
        };

        let decided = wins.len() + losses.len();
        let win_rate = if decided == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(wins.len()) / Decimal::from(decided) * dec!(100)
        };

        let max_consecutive_wins =
            Stats::max_consecutive(trades.iter().map(|t| t.profit > Decimal::ZERO));
        let max_consecutive_losses =
            Stats::max_consecutive(trades.iter().map(|t| t.profit < Decimal::ZERO));

        Self {
            net_profit,
            net_profit_percent,
            gross_profit,
            gross_loss,
            long_gross_profit,
            long_gross_loss,
            short_gross_profit,
            short_gross_loss,
            total_transactions: trades.len(),
            profitable_transactions: wins.len(),
            losing_transactions: losses.len(),
            break_even_transactions: break_even,
            profit_factor,
            average_profit: Stats::mean(
                &trades.iter().map(|t| t.profit).collect::<Vec<_>>(),
            ),
            average_win: Stats::mean(&wins),
            average_loss: Stats::mean(&losses),
            largest_win: wins.iter().copied().max().unwrap_or(Decimal::ZERO),
            largest_loss: losses.iter().copied().max().unwrap_or(Decimal::ZERO),
            average_bars_held: Stats::mean(&bars_held),
            max_consecutive_wins,
            max_consecutive_losses,
            max_drawdown_value: max_drawdown.0,
            max_drawdown_percent: max_drawdown.1,
            win_rate,
        }
    }

    /// The flat numeric map exposed on the CLI JSON surface.
    pub fn to_flat_json(&self) -> serde_json::Value {
        json!({
            "net_profit": self.net_profit,
            "net_profit_percent": self.net_profit_percent,
            "total_transactions": self.total_transactions,
            "profitable_transactions": self.profitable_transactions,
            "losing_transactions": self.losing_transactions,
            "profit_factor": self.profit_factor,
            "max_drawdown_value": self.max_drawdown_value,
            "max_drawdown_percent": self.max_drawdown_percent,
            "win_rate": self.win_rate,
            "average_win": self.average_win,
            "average_loss": self.average_loss,
        })
    }

    pub fn profit_factor_display(&self) -> String {
        match self.profit_factor {
            Some(pf) => format!("{:.2}", pf),
            None => "inf".to_string(),
        }
    }
}
