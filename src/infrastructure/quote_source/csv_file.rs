use crate::domain::market::{Bar, Resolution};
use crate::domain::ports::QuoteSource;
use crate::infrastructure::quote_source::parse_ohlcv_csv;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Reads `<dir>/<SYMBOL>.csv` files in `Date,Open,High,Low,Close,Volume`
/// layout. Useful for offline fixtures and development.
#[derive(Debug)]
pub struct CsvFileSource {
    dir: PathBuf,
}

impl CsvFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl QuoteSource for CsvFileSource {
    fn name(&self) -> &'static str {
        "csv-file"
    }

    async fn fetch(
        &self,
        symbol: &str,
        _exchange: &str,
        resolution: Resolution,
        n_bars: usize,
    ) -> Result<Vec<Bar>> {
        let path = self.dir.join(format!("{}.csv", symbol.to_ascii_uppercase()));
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let daily = parse_ohlcv_csv(&text, usize::MAX)
            .with_context(|| format!("parsing {}", path.display()))?;
        let bars = match resolution {
            Resolution::Daily => daily,
            Resolution::Weekly => crate::domain::market::Asset::from_bars(symbol, daily)
                .resample(Resolution::Weekly)
                .bars()
                .to_vec(),
        };

        let skip = bars.len().saturating_sub(n_bars);
        Ok(bars.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_symbol_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("TEST.csv")).unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        writeln!(file, "2024-01-02,100,105,99,104,1000").unwrap();
        writeln!(file, "2024-01-03,104,108,103,107,1100").unwrap();

        let source = CsvFileSource::new(dir.path());
        let bars = source
            .fetch("test", "NASDAQ", Resolution::Daily, 10)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].date.to_string(), "2024-01-03");
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvFileSource::new(dir.path());
        assert!(
            source
                .fetch("NOPE", "NASDAQ", Resolution::Daily, 10)
                .await
                .is_err()
        );
    }
}
