use crate::domain::market::{Bar, Resolution};
use crate::domain::ports::QuoteSource;
use crate::infrastructure::quote_source::parse_ohlcv_csv;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://stooq.com";

/// Daily/weekly OHLCV over stooq.com's CSV download endpoint.
#[derive(Debug)]
pub struct StooqSource {
    client: reqwest::Client,
    base_url: String,
}

impl Default for StooqSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StooqSource {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Test seam: point at a local stub server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Stooq addresses instruments as `<symbol>.<market>`, e.g. `aapl.us`.
    fn remote_symbol(symbol: &str, exchange: &str) -> String {
        let suffix = match exchange.to_ascii_uppercase().as_str() {
            "NASDAQ" | "NYSE" | "AMEX" | "US" => "us".to_string(),
            other => other.to_ascii_lowercase(),
        };
        format!("{}.{suffix}", symbol.to_ascii_lowercase())
    }
}

#[async_trait]
impl QuoteSource for StooqSource {
    fn name(&self) -> &'static str {
        "stooq"
    }

    async fn fetch(
        &self,
        symbol: &str,
        exchange: &str,
        resolution: Resolution,
        n_bars: usize,
    ) -> Result<Vec<Bar>> {
        let interval = match resolution {
            Resolution::Daily => "d",
            Resolution::Weekly => "w",
        };
        let remote = Self::remote_symbol(symbol, exchange);
        let url = format!("{}/q/d/l/?s={}&i={}", self.base_url, remote, interval);
        debug!(%url, "fetching quotes");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("bad response for {remote}"))?;
        let text = response.text().await.context("reading response body")?;

        let bars = parse_ohlcv_csv(&text, n_bars)
            .with_context(|| format!("parsing quotes for {remote}"))?;
        if bars.is_empty() {
            anyhow::bail!("source returned no bars for {remote}");
        }
        Ok(bars)
    }
}
