use crate::domain::errors::TradingError;
use crate::domain::trading::types::{Position, PositionStatus, Side, TradeLogEntry};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

/// Capital accounting for one simulation: cash, open positions, the
/// closed-trade log, and the equity/drawdown series.
///
/// Invariant maintained by every operation:
/// `equity = cash + sum(open position market values)`.
#[derive(Debug, Clone)]
pub struct Ledger {
    initial_capital: Decimal,
    cash: Decimal,
    next_position_id: u64,
    open: BTreeMap<u64, Position>,
    closed: Vec<TradeLogEntry>,
    capital: Vec<(NaiveDate, Decimal)>,
    peak_equity: Decimal,
    drawdown: Vec<(NaiveDate, Decimal, Decimal)>,
    bar_index: usize,
}

impl Ledger {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            next_position_id: 1,
            open: BTreeMap::new(),
            closed: Vec::new(),
            capital: Vec::new(),
            peak_equity: initial_capital,
            drawdown: Vec::new(),
            bar_index: 0,
        }
    }

    /// Rebuild a ledger mid-stream from persisted monitor state. The peak
    /// restarts at the restored equity; historical drawdown is recomputed
    /// from persisted snapshots, not from this instance.
    pub fn restore(initial_capital: Decimal, cash: Decimal, positions: Vec<Position>) -> Self {
        let next_position_id = positions.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let open: BTreeMap<u64, Position> = positions
            .into_iter()
            .filter(|p| p.status == PositionStatus::Open)
            .map(|p| (p.id, p))
            .collect();
        let mut ledger = Self {
            initial_capital,
            cash,
            next_position_id,
            open,
            closed: Vec::new(),
            capital: Vec::new(),
            peak_equity: Decimal::ZERO,
            drawdown: Vec::new(),
            bar_index: 0,
        };
        ledger.peak_equity = ledger.equity();
        ledger
    }

    /// Current bar index, advanced by the kernel; recorded on positions for
    /// the bars-held statistic.
    pub fn set_bar_index(&mut self, index: usize) {
        self.bar_index = index;
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn equity(&self) -> Decimal {
        self.cash + self.open.values().map(Position::market_value).sum::<Decimal>()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn open_position_ids(&self) -> Vec<u64> {
        self.open.keys().copied().collect()
    }

    pub fn has_open_position(&self, ticker: &str) -> bool {
        self.open.values().any(|p| p.ticker == ticker)
    }

    pub fn closed_trades(&self) -> &[TradeLogEntry] {
        &self.closed
    }

    pub fn capital_series(&self) -> &[(NaiveDate, Decimal)] {
        &self.capital
    }

    pub fn drawdown_series(&self) -> &[(NaiveDate, Decimal, Decimal)] {
        &self.drawdown
    }

    /// Peak-relative worst point of the capital series so far.
    pub fn max_drawdown(&self) -> (Decimal, Decimal) {
        self.drawdown
            .iter()
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|&(_, value, pct)| (value, pct))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO))
    }

    /// Open a position, reserving `price * quantity` of cash.
    pub fn open_position(
        &mut self,
        side: Side,
        ticker: &str,
        price: Decimal,
        quantity: Decimal,
        date: NaiveDate,
        comment: &str,
    ) -> Result<u64, TradingError> {
        if quantity <= Decimal::ZERO {
            return Err(TradingError::InvalidQuantity { quantity });
        }
        if price <= Decimal::ZERO {
            return Err(TradingError::InvalidPrice { price });
        }
        let size = price * quantity;
        if side == Side::Long && size > self.cash {
            return Err(TradingError::InsufficientFunds {
                need: size,
                available: self.cash,
            });
        }

        let id = self.next_position_id;
        self.next_position_id += 1;
        self.cash -= size;
        self.open.insert(
            id,
            Position {
                id,
                ticker: ticker.to_string(),
                side,
                open_price: price,
                quantity,
                open_size: size,
                current_size: size,
                worst_value: size,
                status: PositionStatus::Open,
                open_date: date,
                open_bar_index: self.bar_index,
                close_price: None,
                close_size: None,
                close_date: None,
                close_bar_index: None,
                comment: comment.to_string(),
            },
        );
        Ok(id)
    }

    pub fn mark_position(&mut self, id: u64, price: Decimal) -> Result<(), TradingError> {
        let position = self
            .open
            .get_mut(&id)
            .ok_or(TradingError::PositionNotFound { id })?;
        position.mark(price);
        Ok(())
    }

    /// Mark every open position whose ticker has a price in the map.
    /// Tickers with no bar on the current date keep their stale mark.
    pub fn mark_to_market(&mut self, prices: &BTreeMap<String, Decimal>) {
        for position in self.open.values_mut() {
            if let Some(&price) = prices.get(&position.ticker) {
                position.mark(price);
            }
        }
    }

    /// Close a position at `price`, releasing reserved cash plus P&L.
    /// Returns the realized profit.
    pub fn close_position(
        &mut self,
        id: u64,
        price: Decimal,
        date: NaiveDate,
        comment: &str,
    ) -> Result<Decimal, TradingError> {
        if price <= Decimal::ZERO {
            return Err(TradingError::InvalidPrice { price });
        }
        let mut position = self
            .open
            .remove(&id)
            .ok_or(TradingError::PositionNotFound { id })?;

        position.mark(price);
        position.status = PositionStatus::Closed;
        position.close_price = Some(price);
        position.close_size = Some(position.quantity * price);
        position.close_date = Some(date);
        position.close_bar_index = Some(self.bar_index);
        if !comment.is_empty() {
            position.comment = comment.to_string();
        }

        let profit = position.profit().unwrap_or(Decimal::ZERO);
        self.cash += position.open_size + profit;

        let entry = TradeLogEntry {
            ticker: position.ticker.clone(),
            side: position.side,
            open_date: position.open_date,
            close_date: date,
            open_price: position.open_price,
            close_price: price,
            quantity: position.quantity,
            profit,
            profit_percent: position.profit_percent().unwrap_or(Decimal::ZERO),
            balance_after: self.equity(),
            drawdown_value: position.drawdown_value(),
            drawdown_percent: position.drawdown_percent(),
            bars_held: self.bar_index.saturating_sub(position.open_bar_index),
            comment: position.comment.clone(),
        };
        self.closed.push(entry);
        Ok(profit)
    }

    /// Close every open position at its latest known price.
    pub fn close_all(
        &mut self,
        prices: &BTreeMap<String, Decimal>,
        date: NaiveDate,
        comment: &str,
    ) -> Result<Decimal, TradingError> {
        let mut total = Decimal::ZERO;
        for id in self.open_position_ids() {
            let price = {
                let position = &self.open[&id];
                prices.get(&position.ticker).copied().unwrap_or_else(|| {
                    // No bar for this ticker: fall back to the last mark
                    if position.quantity.is_zero() {
                        position.open_price
                    } else {
                        position.current_size / position.quantity
                    }
                })
            };
            total += self.close_position(id, price, date, comment)?;
        }
        Ok(total)
    }

    /// Record `(date, equity)` and extend the drawdown series.
    pub fn snapshot_equity(&mut self, date: NaiveDate) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let dd_value = self.peak_equity - equity;
        let dd_pct = if self.peak_equity.is_zero() {
            Decimal::ZERO
        } else {
            dd_value / self.peak_equity * dec!(100)
        };
        self.capital.push((date, equity));
        self.drawdown.push((date, dd_value, dd_pct));
    }

    /// Take open positions out of the ledger for persistence.
    pub fn open_positions_owned(&self) -> Vec<Position> {
        self.open.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_open_reserves_cash() {
        let mut ledger = Ledger::new(dec!(1000));
        let id = ledger
            .open_position(Side::Long, "X", dec!(100), dec!(5), day(2), "")
            .unwrap();
        assert_eq!(ledger.cash(), dec!(500));
        // Conservation: equity unchanged at open
        assert_eq!(ledger.equity(), dec!(1000));
        assert_eq!(id, 1);
    }

    #[test]
    fn test_open_rejects_insufficient_cash() {
        let mut ledger = Ledger::new(dec!(1000));
        let err = ledger
            .open_position(Side::Long, "X", dec!(100), dec!(11), day(2), "")
            .unwrap_err();
        assert!(matches!(err, TradingError::InsufficientFunds { .. }));
        assert_eq!(ledger.cash(), dec!(1000));
    }

    #[test]
    fn test_open_rejects_bad_inputs() {
        let mut ledger = Ledger::new(dec!(1000));
        assert!(matches!(
            ledger.open_position(Side::Long, "X", dec!(100), dec!(0), day(2), ""),
            Err(TradingError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            ledger.open_position(Side::Long, "X", dec!(0), dec!(1), day(2), ""),
            Err(TradingError::InvalidPrice { .. })
        ));
    }

    #[test]
    fn test_close_releases_cash_plus_pnl() {
        let mut ledger = Ledger::new(dec!(1000));
        let id = ledger
            .open_position(Side::Long, "X", dec!(100), dec!(5), day(2), "")
            .unwrap();
        let profit = ledger.close_position(id, dec!(110), day(3), "").unwrap();

        // profit = (110 - 100) * 5 = 50
        assert_eq!(profit, dec!(50));
        assert_eq!(ledger.cash(), dec!(1050));
        assert_eq!(ledger.equity(), dec!(1050));
        assert_eq!(ledger.closed_trades().len(), 1);

        let trade = &ledger.closed_trades()[0];
        assert_eq!(trade.profit_percent, dec!(10));
        assert_eq!(trade.balance_after, dec!(1050));
    }

    #[test]
    fn test_close_twice_fails() {
        let mut ledger = Ledger::new(dec!(1000));
        let id = ledger
            .open_position(Side::Long, "X", dec!(100), dec!(5), day(2), "")
            .unwrap();
        ledger.close_position(id, dec!(110), day(3), "").unwrap();
        assert!(matches!(
            ledger.close_position(id, dec!(120), day(4), ""),
            Err(TradingError::PositionNotFound { .. })
        ));
    }

    #[test]
    fn test_short_round_trip() {
        let mut ledger = Ledger::new(dec!(1000));
        let id = ledger
            .open_position(Side::Short, "X", dec!(100), dec!(5), day(2), "")
            .unwrap();
        // price falls: short gains
        let profit = ledger.close_position(id, dec!(80), day(3), "").unwrap();
        assert_eq!(profit, dec!(100));
        assert_eq!(ledger.equity(), dec!(1100));
    }

    #[test]
    fn test_equity_conservation_under_marks() {
        let mut ledger = Ledger::new(dec!(1000));
        ledger
            .open_position(Side::Long, "X", dec!(100), dec!(5), day(2), "")
            .unwrap();

        let mut prices = BTreeMap::new();
        prices.insert("X".to_string(), dec!(120));
        ledger.mark_to_market(&prices);

        // equity = 500 cash + 5 * 120 = 1100
        assert_eq!(ledger.equity(), dec!(1100));
    }

    #[test]
    fn test_snapshot_tracks_peak_and_drawdown() {
        let mut ledger = Ledger::new(dec!(1000));
        ledger
            .open_position(Side::Long, "X", dec!(100), dec!(10), day(2), "")
            .unwrap();

        let mut prices = BTreeMap::new();
        prices.insert("X".to_string(), dec!(110));
        ledger.mark_to_market(&prices);
        ledger.snapshot_equity(day(2)); // equity 1100, peak 1100

        prices.insert("X".to_string(), dec!(99));
        ledger.mark_to_market(&prices);
        ledger.snapshot_equity(day(3)); // equity 990, dd 110 (10%)

        let (dd_value, dd_pct) = ledger.max_drawdown();
        assert_eq!(dd_value, dec!(110));
        assert_eq!(dd_pct, dec!(10));
    }

    #[test]
    fn test_close_all_uses_latest_prices() {
        let mut ledger = Ledger::new(dec!(2000));
        ledger
            .open_position(Side::Long, "A", dec!(100), dec!(5), day(2), "")
            .unwrap();
        ledger
            .open_position(Side::Long, "B", dec!(50), dec!(10), day(2), "")
            .unwrap();

        let mut prices = BTreeMap::new();
        prices.insert("A".to_string(), dec!(110));
        prices.insert("B".to_string(), dec!(45));
        let total = ledger.close_all(&prices, day(5), "end of run").unwrap();

        // A: +50, B: -50
        assert_eq!(total, dec!(0));
        assert_eq!(ledger.open_positions().count(), 0);
        assert_eq!(ledger.closed_trades().len(), 2);
        assert!(ledger.closed_trades().iter().all(|t| t.comment == "end of run"));
    }

    #[test]
    fn test_restore_mid_stream() {
        let mut original = Ledger::new(dec!(1000));
        original
            .open_position(Side::Long, "X", dec!(100), dec!(5), day(2), "")
            .unwrap();

        let restored = Ledger::restore(
            dec!(1000),
            original.cash(),
            original.open_positions_owned(),
        );
        assert_eq!(restored.equity(), original.equity());
        assert_eq!(restored.open_positions().count(), 1);

        // New positions get ids after the restored ones
        let mut restored = restored;
        let id = restored
            .open_position(Side::Long, "Y", dec!(10), dec!(1), day(3), "")
            .unwrap();
        assert_eq!(id, 2);
    }
}
