mod csv_file;
mod stooq;

pub use csv_file::CsvFileSource;
pub use stooq::StooqSource;

use crate::domain::errors::EngineError;
use crate::domain::market::Bar;
use crate::domain::ports::QuoteSource;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Named quote-source plugins; tickers reference a source by name.
pub struct QuoteSourceRegistry {
    sources: BTreeMap<String, Arc<dyn QuoteSource>>,
}

impl QuoteSourceRegistry {
    pub fn empty() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    pub fn with_builtins(data_dir: &Path) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StooqSource::new()));
        registry.register(Arc::new(CsvFileSource::new(data_dir.join("csv"))));
        registry
    }

    pub fn register(&mut self, source: Arc<dyn QuoteSource>) {
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn QuoteSource>> {
        self.sources.get(name).cloned().ok_or_else(|| {
            EngineError::InvalidInput(format!("unknown quote source '{name}'")).into()
        })
    }
}

/// One `Date,Open,High,Low,Close,Volume` CSV row, the layout both the
/// remote and local-file sources deliver.
#[derive(Debug, Deserialize)]
struct CsvBarRow {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Open")]
    open: Decimal,
    #[serde(rename = "High")]
    high: Decimal,
    #[serde(rename = "Low")]
    low: Decimal,
    #[serde(rename = "Close")]
    close: Decimal,
    #[serde(rename = "Volume", default)]
    volume: Option<f64>,
}

/// Parse OHLCV CSV text into date-ordered bars, keeping at most the last
/// `n_bars`.
pub(crate) fn parse_ohlcv_csv(text: &str, n_bars: usize) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let mut bars = Vec::new();
    for row in reader.deserialize::<CsvBarRow>() {
        let row = row.context("malformed OHLCV row")?;
        bars.push(Bar {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.unwrap_or(0.0).max(0.0) as u64,
        });
    }
    bars.sort_by_key(|b| b.date);
    let skip = bars.len().saturating_sub(n_bars);
    Ok(bars.into_iter().skip(skip).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = "\
Date,Open,High,Low,Close,Volume
2024-01-03,101,106,100,105,1200
2024-01-02,100,105,99,104,1000
2024-01-04,102,108,101,107,
";

    #[test]
    fn test_parse_sorts_and_handles_missing_volume() {
        let bars = parse_ohlcv_csv(SAMPLE, 10).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date.to_string(), "2024-01-02");
        assert_eq!(bars[2].date.to_string(), "2024-01-04");
        assert_eq!(bars[1].close, dec!(105));
        assert_eq!(bars[2].volume, 0);
    }

    #[test]
    fn test_parse_keeps_last_n() {
        let bars = parse_ohlcv_csv(SAMPLE, 2).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date.to_string(), "2024-01-03");
    }

    #[test]
    fn test_unknown_source_name() {
        let registry = QuoteSourceRegistry::empty();
        let err = registry.get("mystery").unwrap_err();
        let engine_err = err.downcast_ref::<EngineError>().unwrap();
        assert!(matches!(engine_err, EngineError::InvalidInput(_)));
    }
}
