use async_trait::async_trait;
use candles_core::candle::CandleRecord;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{CandlePageSource, MAX_PAGE_SIZE};

const UPBIT_API_BASE_URL: &str = "https://api.upbit.com/v1";

/// Upbit quotation API provider.
/// Public endpoints, no authentication required.
pub struct UpbitProvider {
    client: Client,
    base_url: String,
}

impl UpbitProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: UPBIT_API_BASE_URL.to_string(),
        }
    }

    /// Create with a custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn minutes_url(&self, unit: u32) -> String {
        format!("{}/candles/minutes/{}", self.base_url, unit)
    }
}

impl Default for UpbitProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Query parameters for one page request. `to` is omitted when absent.
fn page_query(market: &str, count: u32, to: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("market", market.to_string()),
        ("count", count.clamp(1, MAX_PAGE_SIZE).to_string()),
    ];
    if let Some(to) = to {
        query.push(("to", to.to_string()));
    }
    query
}

/// Map a non-success response to an error. The body is passed through verbatim.
fn status_error(status: StatusCode, retry_after: Option<&str>, body: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(1);
        return ProviderError::RateLimited { retry_after_secs };
    }
    ProviderError::Api {
        status: status.as_u16(),
        message: body,
    }
}

fn parse_page(body: &str) -> Result<Vec<CandleRecord>, ProviderError> {
    serde_json::from_str(body)
        .map_err(|e| ProviderError::Parse(format!("failed to parse response: {e}")))
}

#[async_trait]
impl CandlePageSource for UpbitProvider {
    fn name(&self) -> &str {
        "upbit"
    }

    async fn fetch_page(
        &self,
        unit: u32,
        market: &str,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<CandleRecord>, ProviderError> {
        let url = self.minutes_url(unit);
        debug!("Fetching {market} {unit}m candles from {url} (count={count}, to={to:?})");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&page_query(market, count, to))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after.as_deref(), body));
        }

        let body = response.text().await?;
        parse_page(&body)
    }
}
