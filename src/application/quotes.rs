use crate::domain::market::{Resolution, TickerRecord};
use crate::domain::repositories::{QuoteRepo, TickerRepo};
use crate::infrastructure::quote_source::QuoteSourceRegistry;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Bars fetched when a ticker has no history yet (or `--force` is given).
const FULL_HISTORY_BARS: usize = 5000;

#[derive(Debug, Clone, Serialize)]
pub struct TickerUpdate {
    pub ticker_id: i64,
    pub symbol: String,
    pub written: u64,
    pub error: Option<String>,
}

/// Outcome of one update-quotes pass; partial success is normal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuoteUpdateSummary {
    pub updated: usize,
    pub failed: usize,
    pub results: Vec<TickerUpdate>,
}

impl QuoteUpdateSummary {
    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0 && self.updated > 0
    }

    pub fn is_total_failure(&self) -> bool {
        self.failed > 0 && self.updated == 0
    }
}

/// Pulls new daily bars from each ticker's named source plugin into the
/// quote repository.
pub struct QuoteUpdateService {
    tickers: Arc<dyn TickerRepo>,
    quotes: Arc<dyn QuoteRepo>,
    sources: Arc<QuoteSourceRegistry>,
}

impl QuoteUpdateService {
    pub fn new(
        tickers: Arc<dyn TickerRepo>,
        quotes: Arc<dyn QuoteRepo>,
        sources: Arc<QuoteSourceRegistry>,
    ) -> Self {
        Self {
            tickers,
            quotes,
            sources,
        }
    }

    /// Update every enabled ticker (or one, by id), continuing past
    /// per-ticker failures.
    pub async fn update(&self, ticker_id: Option<i64>, force: bool) -> Result<QuoteUpdateSummary> {
        let targets: Vec<TickerRecord> = match ticker_id {
            Some(id) => {
                let ticker = self.tickers.get(id).await?.ok_or_else(|| {
                    crate::domain::errors::EngineError::InvalidInput(format!(
                        "unknown ticker id {id}"
                    ))
                })?;
                vec![ticker]
            }
            None => self.tickers.get_enabled().await?,
        };

        let mut summary = QuoteUpdateSummary::default();
        for ticker in targets {
            match self.update_ticker(&ticker, force).await {
                Ok(written) => {
                    summary.updated += 1;
                    summary.results.push(TickerUpdate {
                        ticker_id: ticker.id,
                        symbol: ticker.symbol,
                        written,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(symbol = %ticker.symbol, error = %format!("{e:#}"), "quote update failed");
                    summary.failed += 1;
                    summary.results.push(TickerUpdate {
                        ticker_id: ticker.id,
                        symbol: ticker.symbol,
                        written: 0,
                        error: Some(format!("{e:#}")),
                    });
                }
            }
        }
        Ok(summary)
    }

    pub async fn update_ticker(&self, ticker: &TickerRecord, force: bool) -> Result<u64> {
        let source = self.sources.get(&ticker.source)?;

        let n_bars = if force {
            FULL_HISTORY_BARS
        } else {
            match self.quotes.get_date_range(ticker.id).await? {
                None => FULL_HISTORY_BARS,
                Some((_, latest)) => bars_since(latest, Utc::now().date_naive()),
            }
        };

        let fetched = source
            .fetch(&ticker.symbol, &ticker.exchange, Resolution::Daily, n_bars)
            .await
            .with_context(|| format!("fetching {} from '{}'", ticker.symbol, ticker.source))?;

        let (coherent, dropped): (Vec<_>, Vec<_>) =
            fetched.into_iter().partition(|bar| bar.is_coherent());
        if !dropped.is_empty() {
            warn!(
                symbol = %ticker.symbol,
                dropped = dropped.len(),
                "discarding incoherent bars"
            );
        }

        let written = self.quotes.batch_upsert(ticker.id, &coherent).await?;
        let detail = match coherent.last() {
            Some(last) => format!("{written} bars written through {}", last.date),
            None => "no new bars".to_string(),
        };
        self.tickers
            .append_audit(ticker.id, "quotes-updated", &detail)
            .await?;

        info!(symbol = %ticker.symbol, written, "quotes updated");
        Ok(written)
    }
}

/// Trading-day estimate between the last stored bar and today, with slack
/// for holidays and late sessions.
fn bars_since(latest: NaiveDate, today: NaiveDate) -> usize {
    let days = (today - latest).num_days().max(0) as usize;
    days + 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bars_since_includes_slack() {
        let latest = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();
        assert_eq!(bars_since(latest, today), 20);

        // Already current still requests a small refresh window
        assert_eq!(bars_since(today, today), 10);
    }

    #[test]
    fn test_summary_failure_classification() {
        let mut summary = QuoteUpdateSummary::default();
        assert!(!summary.is_partial_failure());
        assert!(!summary.is_total_failure());

        summary.updated = 2;
        summary.failed = 1;
        assert!(summary.is_partial_failure());

        summary.updated = 0;
        assert!(summary.is_total_failure());
    }
}
