use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Ok(Side::Long),
            "SHORT" => Ok(Side::Short),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A directional holding. Created `Open`, transitions exactly once to
/// `Closed`; reopening is forbidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub ticker: String,
    pub side: Side,
    pub open_price: Decimal,
    pub quantity: Decimal,
    /// Cash reserved at open: `open_price * quantity`.
    pub open_size: Decimal,
    /// Raw marked value `quantity * last_price`, updated on mark-to-market.
    pub current_size: Decimal,
    /// Most adverse side-corrected value observed while open.
    pub worst_value: Decimal,
    pub status: PositionStatus,
    pub open_date: NaiveDate,
    pub open_bar_index: usize,
    pub close_price: Option<Decimal>,
    pub close_size: Option<Decimal>,
    pub close_date: Option<NaiveDate>,
    pub close_bar_index: Option<usize>,
    pub comment: String,
}

impl Position {
    /// Side-corrected contribution to equity: a short gains when the raw
    /// marked value falls.
    pub fn market_value(&self) -> Decimal {
        match self.side {
            Side::Long => self.current_size,
            Side::Short => self.open_size + (self.open_size - self.current_size),
        }
    }

    /// Update the marked value and the adverse-excursion watermark.
    pub fn mark(&mut self, price: Decimal) {
        self.current_size = self.quantity * price;
        let value = self.market_value();
        if value < self.worst_value {
            self.worst_value = value;
        }
    }

    /// Realized profit, defined once the position is closed.
    /// Long: `close_size - open_size`; signs flipped for Short.
    pub fn profit(&self) -> Option<Decimal> {
        let close_size = self.close_size?;
        Some(match self.side {
            Side::Long => close_size - self.open_size,
            Side::Short => self.open_size - close_size,
        })
    }

    pub fn profit_percent(&self) -> Option<Decimal> {
        let close_size = self.close_size?;
        if self.open_size.is_zero() {
            return Some(Decimal::ZERO);
        }
        let raw = close_size / self.open_size * dec!(100) - dec!(100);
        Some(match self.side {
            Side::Long => raw,
            Side::Short => -raw,
        })
    }

    /// Worst unrealized loss seen while the position was open.
    pub fn drawdown_value(&self) -> Decimal {
        (self.open_size - self.worst_value).max(Decimal::ZERO)
    }

    pub fn drawdown_percent(&self) -> Decimal {
        if self.open_size.is_zero() {
            return Decimal::ZERO;
        }
        self.drawdown_value() / self.open_size * dec!(100)
    }
}

/// Ledger view of a closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub ticker: String,
    pub side: Side,
    pub open_date: NaiveDate,
    pub close_date: NaiveDate,
    pub open_price: Decimal,
    pub close_price: Decimal,
    pub quantity: Decimal,
    pub profit: Decimal,
    pub profit_percent: Decimal,
    pub balance_after: Decimal,
    pub drawdown_value: Decimal,
    pub drawdown_percent: Decimal,
    pub bars_held: usize,
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_position(side: Side, price: Decimal, qty: Decimal) -> Position {
        let open_size = price * qty;
        Position {
            id: 1,
            ticker: "X".into(),
            side,
            open_price: price,
            quantity: qty,
            open_size,
            current_size: open_size,
            worst_value: open_size,
            status: PositionStatus::Open,
            open_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open_bar_index: 0,
            close_price: None,
            close_size: None,
            close_date: None,
            close_bar_index: None,
            comment: String::new(),
        }
    }

    #[test]
    fn test_long_profit() {
        let mut pos = open_position(Side::Long, dec!(100), dec!(10));
        pos.close_size = Some(dec!(1100)); // closed at 110
        // profit = 1100 - 1000 = 100; pct = 10%
        assert_eq!(pos.profit().unwrap(), dec!(100));
        assert_eq!(pos.profit_percent().unwrap(), dec!(10));
    }

    #[test]
    fn test_short_profit_signs_flipped() {
        let mut pos = open_position(Side::Short, dec!(100), dec!(10));
        pos.close_size = Some(dec!(900)); // covered at 90
        // short gains when the close size shrinks
        assert_eq!(pos.profit().unwrap(), dec!(100));
        assert_eq!(pos.profit_percent().unwrap(), dec!(10));
    }

    #[test]
    fn test_short_market_value_moves_inversely() {
        let mut pos = open_position(Side::Short, dec!(100), dec!(10));
        pos.mark(dec!(110));
        // raw value 1100, side-corrected: 1000 - 100 = 900
        assert_eq!(pos.market_value(), dec!(900));
        pos.mark(dec!(90));
        assert_eq!(pos.market_value(), dec!(1100));
    }

    #[test]
    fn test_adverse_excursion_watermark() {
        let mut pos = open_position(Side::Long, dec!(100), dec!(10));
        pos.mark(dec!(95));
        pos.mark(dec!(105));
        pos.mark(dec!(98));
        // worst mark was 95 -> value 950, drawdown 50 (5%)
        assert_eq!(pos.drawdown_value(), dec!(50));
        assert_eq!(pos.drawdown_percent(), dec!(5));
    }
}
