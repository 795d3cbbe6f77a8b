use async_trait::async_trait;
use candles_core::candle::CandleRecord;

use crate::error::ProviderError;

/// Upper bound on candles per request accepted by the exchange.
pub const MAX_PAGE_SIZE: u32 = 200;

/// A source of minute candle pages, one request per call.
#[async_trait]
pub trait CandlePageSource: Send + Sync {
    /// Source name (for logging/display).
    fn name(&self) -> &str;

    /// Fetch up to `count` candles of `unit` minutes ending strictly before `to`
    /// (`YYYY-MM-DDTHH:mm:ssZ`), or the most recent candles when `to` is `None`.
    /// Returns candles newest-first. An empty vec means no older history exists.
    async fn fetch_page(
        &self,
        unit: u32,
        market: &str,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<CandleRecord>, ProviderError>;
}
