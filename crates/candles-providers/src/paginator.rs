use std::time::Duration;

use candles_core::candle::CandleRecord;
use candles_core::series::CandleSeries;
use candles_core::timezone::{
    SourceZone, format_utc_boundary, kst_to_utc, parse_boundary, to_utc_boundary,
};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::provider::{CandlePageSource, MAX_PAGE_SIZE};

/// Backoff ceiling for rate-limit retries
const MAX_BACKOFF: Duration = Duration::from_secs(16);

#[derive(Debug, Clone)]
pub struct PaginatorConfig {
    /// Candles requested per page (clamped to 1..=200)
    pub page_size: u32,
    /// Pause between consecutive page requests
    pub delay: Duration,
    /// Retries on `RateLimited` before giving up. Zero disables retrying.
    pub max_retries: u32,
    /// First retry backoff, doubled on each subsequent retry (capped at 16s)
    pub initial_backoff: Duration,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            delay: Duration::from_millis(100),
            max_retries: 0,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// What a freshly fetched page means for the walk.
#[derive(Debug, PartialEq)]
enum PageStep {
    /// Start boundary not reached yet; `oldest` becomes the next cursor.
    Continue {
        records: Vec<CandleRecord>,
        oldest: NaiveDateTime,
    },
    /// Start boundary lies inside this page; records already trimmed.
    Final(Vec<CandleRecord>),
    /// No older history.
    Exhausted,
    /// Page did not move back past the previous page's oldest record.
    Stalled(NaiveDateTime),
}

fn classify_page(
    page: Vec<CandleRecord>,
    start: NaiveDateTime,
    previous_oldest: Option<NaiveDateTime>,
) -> PageStep {
    let Some(oldest) = page.last().map(CandleRecord::local_timestamp) else {
        return PageStep::Exhausted;
    };

    if previous_oldest.is_some_and(|prev| oldest >= prev) {
        return PageStep::Stalled(oldest);
    }

    if oldest < start {
        let records = page
            .into_iter()
            .filter(|c| c.local_timestamp() >= start)
            .collect();
        return PageStep::Final(records);
    }

    PageStep::Continue {
        records: page,
        oldest,
    }
}

/// Walks an exchange's candle history backwards, one page at a time, until
/// the requested start boundary is crossed.
pub struct CandlePaginator<S> {
    source: S,
    config: PaginatorConfig,
}

impl<S: CandlePageSource> CandlePaginator<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, PaginatorConfig::default())
    }

    pub fn with_config(source: S, config: PaginatorConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &PaginatorConfig {
        &self.config
    }

    /// Fetch a single page of up to `count` candles ending at `end`
    /// (most recent when absent). Returned newest-first.
    pub async fn fetch_page(
        &self,
        unit: u32,
        market: &str,
        count: u32,
        end: Option<&str>,
        zone: SourceZone,
    ) -> Result<Vec<CandleRecord>, ProviderError> {
        validate_unit(unit)?;
        let to = end.map(|e| to_utc_boundary(e, zone)).transpose()?;
        self.request(unit, market, count.clamp(1, MAX_PAGE_SIZE), to.as_deref())
            .await
    }

    /// Fetch every candle from `start` up to `end` (most recent when absent).
    ///
    /// Both boundaries are interpreted in `zone`; a UTC `start` is shifted to
    /// KST before being compared with `candle_date_time_kst`. Records come back in fetch
    /// order, newest first. Any request failure aborts the walk and discards
    /// what was accumulated so far.
    pub async fn fetch_range(
        &self,
        unit: u32,
        market: &str,
        start: &str,
        end: Option<&str>,
        zone: SourceZone,
    ) -> Result<CandleSeries, ProviderError> {
        validate_unit(unit)?;
        let start_local = parse_boundary(start, zone)?;
        let mut cursor = match end {
            Some(end) => {
                parse_boundary(end, zone)?;
                Some(to_utc_boundary(end, zone)?)
            }
            None => None,
        };

        let page_size = self.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let mut series = CandleSeries::new();
        let mut previous_oldest = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .request(unit, market, page_size, cursor.as_deref())
                .await?;
            pages += 1;

            match classify_page(page, start_local, previous_oldest) {
                PageStep::Continue { records, oldest } => {
                    debug!(
                        "{market}: page {pages} with {} candle(s), oldest {oldest}",
                        records.len()
                    );
                    series.extend(records);
                    previous_oldest = Some(oldest);
                    cursor = Some(format_utc_boundary(kst_to_utc(oldest)));
                    if !self.config.delay.is_zero() {
                        tokio::time::sleep(self.config.delay).await;
                    }
                }
                PageStep::Final(records) => {
                    debug!(
                        "{market}: start {start_local} reached on page {pages}, keeping {} candle(s)",
                        records.len()
                    );
                    series.extend(records);
                    break;
                }
                PageStep::Exhausted => {
                    debug!("{market}: no history before {cursor:?}");
                    break;
                }
                PageStep::Stalled(oldest) => {
                    warn!(
                        "{market}: {} ignored cursor {cursor:?} (oldest {oldest}), stopping",
                        self.source.name()
                    );
                    break;
                }
            }
        }

        info!(
            "{market}: fetched {} {unit}m candle(s) from {} in {pages} page(s)",
            series.len(),
            self.source.name()
        );
        Ok(series)
    }

    async fn request(
        &self,
        unit: u32,
        market: &str,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<CandleRecord>, ProviderError> {
        let mut backoff = self.config.initial_backoff.min(MAX_BACKOFF);
        let mut attempt = 0;

        loop {
            match self.source.fetch_page(unit, market, count, to).await {
                Err(ProviderError::RateLimited { retry_after_secs })
                    if attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    let wait = backoff.max(Duration::from_secs(retry_after_secs));
                    warn!(
                        "{market}: rate limited, retry {attempt}/{} in {wait:?}",
                        self.config.max_retries
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                }
                result => return result,
            }
        }
    }
}

fn validate_unit(unit: u32) -> Result<(), ProviderError> {
    if unit == 0 {
        return Err(ProviderError::InvalidRequest(
            "candle unit must be at least one minute".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use async_trait::async_trait;
    use candles_core::error::CandleError;
    use candles_core::timezone::parse_local;

    /// Serves pre-scripted pages and records the `to` of every request.
    struct ScriptedSource {
        pages: Mutex<VecDeque<Result<Vec<CandleRecord>, ProviderError>>>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<Vec<CandleRecord>, ProviderError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn pages(pages: Vec<Vec<CandleRecord>>) -> Self {
            Self::new(pages.into_iter().map(Ok).collect())
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CandlePageSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_page(
            &self,
            _unit: u32,
            _market: &str,
            _count: u32,
            to: Option<&str>,
        ) -> Result<Vec<CandleRecord>, ProviderError> {
            self.calls.lock().unwrap().push(to.map(str::to_string));
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn candle(kst: &str) -> CandleRecord {
        let local = parse_local(kst).unwrap();
        CandleRecord::new(local)
            .with_field("market", "KRW-BTC")
            .with_field("candle_date_time_utc", kst_to_utc(local).format("%Y-%m-%dT%H:%M:%S").to_string())
            .with_field("trade_price", 38261000.0)
    }

    /// Minute `m` past noon KST on 2023-05-01.
    fn t(m: u32) -> String {
        format!("2023-05-01T12:{m:02}:00")
    }

    /// Newest-first page covering minutes `newest` down to `oldest`.
    fn page(newest: u32, oldest: u32) -> Vec<CandleRecord> {
        (oldest..=newest).rev().map(|m| candle(&t(m))).collect()
    }

    fn paginator(source: ScriptedSource) -> CandlePaginator<ScriptedSource> {
        CandlePaginator::with_config(
            source,
            PaginatorConfig {
                delay: Duration::ZERO,
                initial_backoff: Duration::ZERO,
                ..PaginatorConfig::default()
            },
        )
    }

    fn minutes(series: &CandleSeries) -> Vec<NaiveDateTime> {
        series.iter().map(CandleRecord::local_timestamp).collect()
    }

    #[tokio::test]
    async fn single_page_termination() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 5)]));
        let series = p
            .fetch_range(1, "KRW-BTC", &t(7), Some(&t(11)), SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(
            minutes(&series),
            [10, 9, 8, 7].map(|m| parse_local(&t(m)).unwrap())
        );
        assert_eq!(
            p.source().calls(),
            vec![Some("2023-05-01T03:11:00Z".to_string())]
        );
    }

    #[tokio::test]
    async fn multi_page_stitching() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 9), page(8, 5)]));
        let series = p
            .fetch_range(1, "KRW-BTC", &t(7), Some(&t(11)), SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(
            minutes(&series),
            [10, 9, 8, 7].map(|m| parse_local(&t(m)).unwrap())
        );
        let calls = p.source().calls();
        assert_eq!(calls.len(), 2);
        // Second cursor is page one's oldest record as a UTC boundary
        assert_eq!(calls[1].as_deref(), Some("2023-05-01T03:09:00Z"));
    }

    #[tokio::test]
    async fn boundary_is_inclusive() {
        let p = paginator(ScriptedSource::pages(vec![
            page(30, 21),
            page(20, 11),
            page(10, 1),
        ]));
        let start = parse_local(&t(15)).unwrap();
        let series = p
            .fetch_range(1, "KRW-BTC", &t(15), None, SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(series.len(), 16);
        assert!(series.iter().all(|c| c.local_timestamp() >= start));
        assert_eq!(series.earliest(), Some(start));
        assert_eq!(p.source().calls().len(), 2);
        assert_eq!(p.source().calls()[0], None);
    }

    #[tokio::test]
    async fn start_on_page_edge_fetches_next_page() {
        // Oldest record equals start: not crossed yet, so one more page is needed
        let p = paginator(ScriptedSource::pages(vec![page(10, 7), page(6, 3)]));
        let series = p
            .fetch_range(1, "KRW-BTC", &t(7), None, SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(series.len(), 4);
        assert_eq!(p.source().calls().len(), 2);
    }

    #[tokio::test]
    async fn identical_calls_are_deterministic() {
        let script = || ScriptedSource::pages(vec![page(10, 9), page(8, 5)]);
        let first = paginator(script())
            .fetch_range(1, "KRW-BTC", &t(6), Some(&t(11)), SourceZone::Kst)
            .await
            .unwrap();
        let second = paginator(script())
            .fetch_range(1, "KRW-BTC", &t(6), Some(&t(11)), SourceZone::Kst)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn start_after_latest_is_empty() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 1)]));
        let series = p
            .fetch_range(1, "KRW-BTC", &t(45), None, SourceZone::Kst)
            .await
            .unwrap();

        assert!(series.is_empty());
        assert_eq!(p.source().calls().len(), 1);
    }

    #[tokio::test]
    async fn start_after_end_is_empty() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 1)]));
        let series = p
            .fetch_range(1, "KRW-BTC", &t(30), Some(&t(11)), SourceZone::Kst)
            .await
            .unwrap();

        assert!(series.is_empty());
        assert_eq!(p.source().calls().len(), 1);
    }

    #[tokio::test]
    async fn empty_page_ends_walk() {
        // History begins at minute 5, after which the exchange returns nothing
        let p = paginator(ScriptedSource::pages(vec![page(10, 5), Vec::new()]));
        let series = p
            .fetch_range(1, "KRW-BTC", &t(0), None, SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(series.len(), 6);
        assert_eq!(p.source().calls().len(), 2);
    }

    #[tokio::test]
    async fn stalled_cursor_stops() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 5), page(10, 5)]));
        let series = p
            .fetch_range(1, "KRW-BTC", &t(0), None, SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(series.len(), 6);
        assert_eq!(p.source().calls().len(), 2);
    }

    #[tokio::test]
    async fn utc_boundaries() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 5)]));
        let series = p
            .fetch_range(
                1,
                "KRW-BTC",
                "2023-05-01T03:07:00Z",
                Some("2023-05-01T03:11:00Z"),
                SourceZone::Utc,
            )
            .await
            .unwrap();

        assert_eq!(series.len(), 4);
        assert_eq!(
            p.source().calls(),
            vec![Some("2023-05-01T03:11:00Z".to_string())]
        );
    }

    #[tokio::test]
    async fn malformed_start_fails_before_fetching() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 5)]));
        let err = p
            .fetch_range(1, "KRW-BTC", "2023-05-01 12:07", None, SourceZone::Kst)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProviderError::Format(CandleError::InvalidTimestamp { .. })
        ));
        assert!(p.source().calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_end_fails_before_fetching() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 5)]));
        let err = p
            .fetch_range(1, "KRW-BTC", &t(7), Some("yesterday"), SourceZone::Kst)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Format(_)));
        assert!(p.source().calls().is_empty());
    }

    #[tokio::test]
    async fn zero_unit_rejected() {
        let p = paginator(ScriptedSource::pages(vec![]));
        let err = p
            .fetch_range(0, "KRW-BTC", &t(7), None, SourceZone::Kst)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn transport_error_discards_accumulation() {
        let p = paginator(ScriptedSource::new(vec![
            Ok(page(10, 9)),
            Err(ProviderError::Api {
                status: 500,
                message: "internal error".to_string(),
            }),
        ]));
        let err = p
            .fetch_range(1, "KRW-BTC", &t(0), None, SourceZone::Kst)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Api { status: 500, .. }));
        assert_eq!(p.source().calls().len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_without_retries_propagates() {
        let p = paginator(ScriptedSource::new(vec![Err(
            ProviderError::RateLimited {
                retry_after_secs: 0,
            },
        )]));
        let err = p
            .fetch_range(1, "KRW-BTC", &t(0), None, SourceZone::Kst)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(p.source().calls().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_retried_when_enabled() {
        let source = ScriptedSource::new(vec![
            Err(ProviderError::RateLimited {
                retry_after_secs: 0,
            }),
            Ok(page(10, 5)),
        ]);
        let p = CandlePaginator::with_config(
            source,
            PaginatorConfig {
                delay: Duration::ZERO,
                max_retries: 2,
                initial_backoff: Duration::ZERO,
                ..PaginatorConfig::default()
            },
        );
        let series = p
            .fetch_range(1, "KRW-BTC", &t(7), None, SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(series.len(), 4);
        // Retry reuses the same cursor
        assert_eq!(p.source().calls(), vec![None, None]);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_backoff_is_capped() {
        let source = ScriptedSource::new(vec![
            Err(ProviderError::RateLimited {
                retry_after_secs: 0,
            }),
            Err(ProviderError::RateLimited {
                retry_after_secs: 0,
            }),
            Ok(page(10, 5)),
        ]);
        let p = CandlePaginator::with_config(
            source,
            PaginatorConfig {
                delay: Duration::ZERO,
                max_retries: 2,
                initial_backoff: Duration::MAX,
                ..PaginatorConfig::default()
            },
        );
        let started = tokio::time::Instant::now();
        let series = p
            .fetch_range(1, "KRW-BTC", &t(7), None, SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(series.len(), 4);
        // Two waits, each capped
        let elapsed = started.elapsed();
        assert!(elapsed >= MAX_BACKOFF * 2 && elapsed < MAX_BACKOFF * 3);
    }

    #[tokio::test]
    async fn fetch_page_converts_end() {
        let p = paginator(ScriptedSource::pages(vec![page(10, 5)]));
        let records = p
            .fetch_page(1, "KRW-BTC", 200, Some("2023-05-01T03:00:00"), SourceZone::Kst)
            .await
            .unwrap();

        assert_eq!(records.len(), 6);
        assert_eq!(
            p.source().calls(),
            vec![Some("2023-04-30T18:00:00Z".to_string())]
        );
    }

    #[test]
    fn classify_empty_page() {
        let start = parse_local(&t(0)).unwrap();
        assert_eq!(classify_page(Vec::new(), start, None), PageStep::Exhausted);
    }

    #[test]
    fn classify_trims_overshoot() {
        let start = parse_local(&t(7)).unwrap();
        match classify_page(page(10, 5), start, None) {
            PageStep::Final(records) => assert_eq!(records.len(), 4),
            other => panic!("expected Final, got {other:?}"),
        }
    }
}
