use crate::domain::market::{Bar, Resolution};
use anyhow::Result;
use async_trait::async_trait;

/// A named quote-source plugin.
///
/// `fetch` returns at least `n_bars` daily bars ending on the most recent
/// trading day (fewer if history is short); duplicates across invocations
/// are de-duplicated by the quote repository's date upsert.
#[async_trait]
pub trait QuoteSource: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        symbol: &str,
        exchange: &str,
        resolution: Resolution,
        n_bars: usize,
    ) -> Result<Vec<Bar>>;
}
