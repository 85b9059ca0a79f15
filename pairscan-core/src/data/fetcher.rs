//! Paginated historical fetcher.
//!
//! The klines endpoint returns at most `page_limit` candles per call, so a
//! long range is walked page by page, using the close time of the last
//! candle of each page as the start of the next request. Every request,
//! including the live ticker snapshot, first acquires weight from the shared
//! [`RateLimiter`].

use super::provider::{DataError, Interval, Kline, KlineQuery, MarketDataProvider, Ticker};
use super::rate_limit::{RateLimiter, Sleeper, ThreadSleeper};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Weight charged per API call.
pub const REQUEST_WEIGHT: u64 = 1;

/// Pagination settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    /// Max klines per request.
    pub page_limit: u16,
    /// Courtesy pause between pages, independent of the rate limiter.
    pub page_delay: std::time::Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_limit: 1000,
            page_delay: std::time::Duration::from_millis(100),
        }
    }
}

/// Issues every provider call of a run under one request budget.
pub struct HistoricalFetcher<'a> {
    provider: &'a dyn MarketDataProvider,
    limiter: Arc<RateLimiter>,
    sleeper: Arc<dyn Sleeper>,
    config: FetchConfig,
}

impl<'a> HistoricalFetcher<'a> {
    pub fn new(
        provider: &'a dyn MarketDataProvider,
        limiter: Arc<RateLimiter>,
        config: FetchConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            sleeper: Arc::new(ThreadSleeper),
            config,
        }
    }

    /// Replace the sleeper used for the inter-page pause.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Live ticker snapshot.
    pub fn ticker_snapshot(&self) -> Result<Vec<Ticker>, DataError> {
        self.limiter.acquire(REQUEST_WEIGHT)?;
        self.provider.ticker_snapshot()
    }

    /// All klines of `symbol` in `[start, end]`, in ascending order.
    ///
    /// Stops when the cursor reaches `end` or the provider returns an empty
    /// page. Both are normal completions; a short result just means the
    /// provider had no more data.
    pub fn fetch_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Kline>, DataError> {
        let mut all: Vec<Kline> = Vec::new();
        let mut cursor = start;
        let mut pages = 0usize;

        while cursor < end {
            if pages > 0 {
                self.sleeper.sleep(self.config.page_delay);
            }

            self.limiter.acquire(REQUEST_WEIGHT)?;
            let query = KlineQuery {
                symbol: symbol.to_string(),
                interval,
                start: cursor,
                end,
                limit: self.config.page_limit,
            };
            let page = self.provider.klines(&query)?;
            pages += 1;

            if page.is_empty() {
                tracing::debug!(symbol, pages, "empty page, history exhausted");
                break;
            }

            check_page_order(symbol, &page)?;

            let last_close = page[page.len() - 1].close_time;
            if last_close <= cursor {
                return Err(DataError::NonMonotonicPage {
                    symbol: symbol.to_string(),
                    detail: format!("page ends at {last_close}, cursor already at {cursor}"),
                });
            }

            // Drop candles already accumulated from an overlapping page.
            let fresh_from = match all.last() {
                Some(prev) => page.partition_point(|k| k.open_time <= prev.open_time),
                None => 0,
            };
            if fresh_from > 0 {
                tracing::debug!(symbol, overlap = fresh_from, "trimmed overlapping candles");
            }

            tracing::debug!(
                symbol,
                page = pages,
                klines = page.len() - fresh_from,
                %cursor,
                "fetched page"
            );
            all.extend(page.into_iter().skip(fresh_from));
            cursor = last_close;
        }

        Ok(all)
    }

    /// Klines covering the last `days` days up to `now`.
    pub fn fetch_lookback(
        &self,
        symbol: &str,
        interval: Interval,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Kline>, DataError> {
        let start = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| DataError::Other(format!("lookback of {days} days is out of range")))?;
        self.fetch_range(symbol, interval, start, now)
    }
}

/// Open times within a page must be strictly ascending.
fn check_page_order(symbol: &str, page: &[Kline]) -> Result<(), DataError> {
    for pair in page.windows(2) {
        if pair[1].open_time <= pair[0].open_time {
            return Err(DataError::NonMonotonicPage {
                symbol: symbol.to_string(),
                detail: format!(
                    "open time {} follows {} within one page",
                    pair[1].open_time, pair[0].open_time
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::rate_limit::{RateLimitConfig, RecordingSleeper};
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Serves pre-scripted pages in order and records the queries.
    struct ScriptedProvider {
        pages: Mutex<Vec<Result<Vec<Kline>, DataError>>>,
        queries: Mutex<Vec<KlineQuery>>,
    }

    impl ScriptedProvider {
        fn new(pages: Vec<Result<Vec<Kline>, DataError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    impl MarketDataProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn ticker_snapshot(&self) -> Result<Vec<Ticker>, DataError> {
            Ok(vec![])
        }

        fn klines(&self, query: &KlineQuery) -> Result<Vec<Kline>, DataError> {
            self.queries.lock().unwrap().push(query.clone());
            self.pages.lock().unwrap().pop().unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn kline(minute: i64) -> Kline {
        let open_time = t0() + Duration::minutes(minute);
        Kline {
            open_time,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0 + minute as f64,
            volume: 1.0,
            close_time: open_time + Duration::minutes(1) - Duration::milliseconds(1),
            quote_volume: 1.0,
            trades: 1,
        }
    }

    fn fetcher<'a>(
        provider: &'a dyn MarketDataProvider,
        sleeper: Arc<RecordingSleeper>,
    ) -> HistoricalFetcher<'a> {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), sleeper.clone()));
        HistoricalFetcher::new(provider, limiter, FetchConfig::default()).with_sleeper(sleeper)
    }

    #[test]
    fn advances_cursor_by_last_close_time() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![kline(0), kline(1)]),
            Ok(vec![kline(2), kline(3)]),
            Ok(vec![]),
        ]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let f = fetcher(&provider, sleeper.clone());

        let klines = f
            .fetch_range("BTCUSDT", Interval::OneMinute, t0(), t0() + Duration::hours(1))
            .unwrap();

        assert_eq!(klines.len(), 4);
        let queries = provider.queries.lock().unwrap();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].start, t0());
        assert_eq!(queries[1].start, kline(1).close_time);
        assert_eq!(queries[2].start, kline(3).close_time);
        assert!(queries.iter().all(|q| q.limit == 1000));
        // Courtesy pause before every page but the first.
        assert_eq!(sleeper.count_of(std::time::Duration::from_millis(100)), 2);
        assert_eq!(f.limiter().used(), 3);
    }

    #[test]
    fn stops_when_cursor_reaches_end() {
        let provider = ScriptedProvider::new(vec![Ok(vec![kline(0), kline(1)])]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let f = fetcher(&provider, sleeper);

        let end = kline(1).close_time;
        let klines = f.fetch_range("BTCUSDT", Interval::OneMinute, t0(), end).unwrap();

        assert_eq!(klines.len(), 2);
        assert_eq!(provider.queries.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_range_makes_no_request() {
        let provider = ScriptedProvider::new(vec![]);
        let f = fetcher(&provider, Arc::new(RecordingSleeper::new()));
        let klines = f.fetch_range("BTCUSDT", Interval::OneMinute, t0(), t0()).unwrap();
        assert!(klines.is_empty());
        assert!(provider.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn transport_error_propagates() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![kline(0)]),
            Err(DataError::Http {
                status: 500,
                message: "boom".into(),
            }),
        ]);
        let f = fetcher(&provider, Arc::new(RecordingSleeper::new()));
        let err = f
            .fetch_range("BTCUSDT", Interval::OneMinute, t0(), t0() + Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, DataError::Http { status: 500, .. }));
    }

    #[test]
    fn out_of_order_page_is_rejected() {
        let provider = ScriptedProvider::new(vec![Ok(vec![kline(1), kline(0)])]);
        let f = fetcher(&provider, Arc::new(RecordingSleeper::new()));
        let err = f
            .fetch_range("BTCUSDT", Interval::OneMinute, t0(), t0() + Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, DataError::NonMonotonicPage { .. }));
    }

    #[test]
    fn stalled_cursor_is_rejected() {
        // Second page repeats the first: the cursor would never advance.
        let provider = ScriptedProvider::new(vec![Ok(vec![kline(0)]), Ok(vec![kline(0)])]);
        let f = fetcher(&provider, Arc::new(RecordingSleeper::new()));
        let err = f
            .fetch_range("BTCUSDT", Interval::OneMinute, t0(), t0() + Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, DataError::NonMonotonicPage { .. }));
    }

    #[test]
    fn overlapping_page_is_trimmed() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![kline(0), kline(1), kline(2)]),
            Ok(vec![kline(2), kline(3)]),
        ]);
        let f = fetcher(&provider, Arc::new(RecordingSleeper::new()));
        let klines = f
            .fetch_range("BTCUSDT", Interval::OneMinute, t0(), kline(3).close_time)
            .unwrap();
        let minutes: Vec<i64> = klines
            .iter()
            .map(|k| (k.open_time - t0()).num_minutes())
            .collect();
        assert_eq!(minutes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn ticker_snapshot_charges_weight() {
        let provider = ScriptedProvider::new(vec![]);
        let f = fetcher(&provider, Arc::new(RecordingSleeper::new()));
        f.ticker_snapshot().unwrap();
        assert_eq!(f.limiter().used(), 1);
    }
}
