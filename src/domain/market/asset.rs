use crate::domain::market::{Bar, Resolution};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Opaque position into an asset's bar sequence.
///
/// A cursor at date D sits on the first bar with `bar.date >= D`; bars
/// strictly before the cursor form the lookback prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(pub usize);

/// A named, finite bar sequence, strictly increasing by date.
#[derive(Debug, Clone)]
pub struct Asset {
    ticker: String,
    bars: Vec<Bar>,
}

impl Asset {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            bars: Vec::new(),
        }
    }

    /// Build from unordered input. Later entries win on duplicate dates.
    pub fn from_bars(ticker: impl Into<String>, bars: Vec<Bar>) -> Self {
        let mut asset = Self::new(ticker);
        asset.append(bars);
        asset
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Upsert by date: duplicates are replaced, new dates inserted in order.
    pub fn append(&mut self, bars: Vec<Bar>) {
        for bar in bars {
            match self.bars.binary_search_by_key(&bar.date, |b| b.date) {
                Ok(i) => self.bars[i] = bar,
                Err(i) => self.bars.insert(i, bar),
            }
        }
    }

    /// Latest bar with `date <= at`, if any.
    pub fn latest_on_or_before(&self, at: NaiveDate) -> Option<&Bar> {
        let idx = self.bars.partition_point(|b| b.date <= at);
        if idx == 0 { None } else { self.bars.get(idx - 1) }
    }

    /// Bar exactly on `date`, if the market traded that day.
    pub fn bar_on(&self, date: NaiveDate) -> Option<&Bar> {
        self.bars
            .binary_search_by_key(&date, |b| b.date)
            .ok()
            .map(|i| &self.bars[i])
    }

    pub fn cursor_at(&self, date: NaiveDate) -> Cursor {
        Cursor(self.bars.partition_point(|b| b.date < date))
    }

    /// At most `n` bars strictly before the cursor, oldest first.
    pub fn prefix_before(&self, cursor: Cursor, n: usize) -> &[Bar] {
        let end = cursor.0.min(self.bars.len());
        let start = end.saturating_sub(n);
        &self.bars[start..end]
    }

    /// Number of bars strictly before the cursor.
    pub fn history_len(&self, cursor: Cursor) -> usize {
        cursor.0.min(self.bars.len())
    }

    /// Inclusive window copy.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> Asset {
        let bars = self
            .bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .copied()
            .collect();
        Asset {
            ticker: self.ticker.clone(),
            bars,
        }
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Collapse daily bars into ISO-week bars. The weekly bar carries the
    /// week's first open, last close, extreme high/low, summed volume, and
    /// is dated at the week's last trading day.
    pub fn resample(&self, resolution: Resolution) -> Asset {
        match resolution {
            Resolution::Daily => self.clone(),
            Resolution::Weekly => {
                let mut weeks: BTreeMap<(i32, u32), Bar> = BTreeMap::new();
                for bar in &self.bars {
                    let week = bar.date.iso_week();
                    let key = (week.year(), week.week());
                    weeks
                        .entry(key)
                        .and_modify(|agg| {
                            agg.high = agg.high.max(bar.high);
                            agg.low = agg.low.min(bar.low);
                            agg.close = bar.close;
                            agg.date = bar.date;
                            agg.volume += bar.volume;
                        })
                        .or_insert(*bar);
                }
                Asset {
                    ticker: self.ticker.clone(),
                    bars: weeks.into_values().collect(),
                }
            }
        }
    }
}

/// The set of assets a simulation runs over, keyed by ticker symbol.
#[derive(Debug, Clone, Default)]
pub struct AssetBook {
    assets: BTreeMap<String, Asset>,
}

impl AssetBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: Asset) {
        self.assets.insert(asset.ticker().to_string(), asset);
    }

    pub fn get(&self, ticker: &str) -> Option<&Asset> {
        self.assets.get(ticker)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() || self.assets.values().all(Asset::is_empty)
    }

    /// Ordered union of bar dates across all assets within the window.
    pub fn date_union(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = BTreeSet::new();
        for asset in self.assets.values() {
            for bar in asset.bars() {
                if bar.date >= start && bar.date <= end {
                    dates.insert(bar.date);
                }
            }
        }
        dates.into_iter().collect()
    }

    /// Latest known close per ticker at-or-before `date`. Tickers with no
    /// bar yet are absent from the map.
    pub fn closes_at(&self, date: NaiveDate) -> BTreeMap<String, Decimal> {
        self.assets
            .iter()
            .filter_map(|(ticker, asset)| {
                asset
                    .latest_on_or_before(date)
                    .map(|bar| (ticker.clone(), bar.close))
            })
            .collect()
    }

    pub fn resample(&self, resolution: Resolution) -> AssetBook {
        let mut book = AssetBook::new();
        for asset in self.assets.values() {
            book.insert(asset.resample(resolution));
        }
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(d: u32, close: Decimal) -> Bar {
        Bar {
            date: day(d),
            open: close - dec!(1),
            high: close + dec!(1),
            low: close - dec!(2),
            close,
            volume: 100,
        }
    }

    #[test]
    fn test_append_is_idempotent_and_upserts() {
        let mut asset = Asset::new("X");
        asset.append(vec![bar(2, dec!(10)), bar(3, dec!(11))]);
        asset.append(vec![bar(2, dec!(10)), bar(3, dec!(11))]);
        assert_eq!(asset.len(), 2);

        // Newer value for an existing date replaces the old bar
        asset.append(vec![bar(3, dec!(12))]);
        assert_eq!(asset.len(), 2);
        assert_eq!(asset.bars()[1].close, dec!(12));
    }

    #[test]
    fn test_append_keeps_date_order() {
        let mut asset = Asset::new("X");
        asset.append(vec![bar(5, dec!(10)), bar(2, dec!(9)), bar(3, dec!(8))]);
        let dates: Vec<_> = asset.bars().iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![day(2), day(3), day(5)]);
    }

    #[test]
    fn test_latest_on_or_before() {
        let asset = Asset::from_bars("X", vec![bar(2, dec!(10)), bar(5, dec!(11))]);
        assert_eq!(asset.latest_on_or_before(day(1)), None);
        assert_eq!(asset.latest_on_or_before(day(2)).unwrap().close, dec!(10));
        // Gap dates observe the stale latest bar
        assert_eq!(asset.latest_on_or_before(day(4)).unwrap().close, dec!(10));
        assert_eq!(asset.latest_on_or_before(day(9)).unwrap().close, dec!(11));
    }

    #[test]
    fn test_cursor_prefix() {
        let asset = Asset::from_bars(
            "X",
            vec![bar(2, dec!(10)), bar(3, dec!(11)), bar(4, dec!(12))],
        );
        let cursor = asset.cursor_at(day(4));
        assert_eq!(asset.history_len(cursor), 2);

        let prefix = asset.prefix_before(cursor, 5);
        assert_eq!(prefix.len(), 2);
        assert_eq!(prefix[0].close, dec!(10));
        assert_eq!(prefix[1].close, dec!(11));

        // Bounded by n
        assert_eq!(asset.prefix_before(cursor, 1).len(), 1);
        assert_eq!(asset.prefix_before(cursor, 1)[0].close, dec!(11));
    }

    #[test]
    fn test_date_union_across_tickers() {
        let mut book = AssetBook::new();
        book.insert(Asset::from_bars("A", vec![bar(2, dec!(1)), bar(4, dec!(2))]));
        book.insert(Asset::from_bars("B", vec![bar(3, dec!(5)), bar(4, dec!(6))]));

        let union = book.date_union(day(1), day(31));
        assert_eq!(union, vec![day(2), day(3), day(4)]);
    }

    #[test]
    fn test_weekly_resample() {
        // 2024-01-02 (Tue) .. 2024-01-05 (Fri) is one ISO week;
        // 2024-01-08 (Mon) starts the next.
        let asset = Asset::from_bars(
            "X",
            vec![
                bar(2, dec!(10)),
                bar(3, dec!(14)),
                bar(5, dec!(12)),
                bar(8, dec!(13)),
            ],
        );
        let weekly = asset.resample(Resolution::Weekly);
        assert_eq!(weekly.len(), 2);

        let first = weekly.bars()[0];
        assert_eq!(first.date, day(5));
        assert_eq!(first.open, dec!(9)); // open of 01-02
        assert_eq!(first.close, dec!(12)); // close of 01-05
        assert_eq!(first.high, dec!(15)); // high of 01-03
        assert_eq!(first.volume, 300);
    }
}
