use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use screener_core::{MarketCatalog, ScoreResult, ScreenerError};
use serde::{Deserialize, Serialize};

use crate::cache::ResultCache;
use crate::clock::Clock;
use crate::export::rank_results;
use crate::scheduler::{normalize_tickers, BatchJob, CancellationFlag, FetchScheduler};

#[derive(Debug, Clone, Default)]
pub struct ScreenOptions {
    /// Staleness bound for cache hits; the cache default when unset
    pub max_age: Option<Duration>,
    /// Ignore the cache and re-analyze every constituent
    pub force_refresh: bool,
    pub cancel: CancellationFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningReport {
    pub market_id: String,
    /// Ranked: raw score desc, weighted score desc, symbol asc
    pub results: Vec<ScoreResult>,
    /// Tickers served from fresh cache entries
    pub from_cache: usize,
    /// Tickers analyzed in this run
    pub fetched: usize,
    pub failed: BTreeMap<String, ScreenerError>,
    pub skipped: Vec<String>,
    pub cancelled: bool,
    pub completed_at: DateTime<Utc>,
}

impl ScreeningReport {
    pub fn top(&self, n: usize) -> &[ScoreResult] {
        &self.results[..n.min(self.results.len())]
    }
}

/// Cache-aware screening of a whole market.
///
/// Fresh cache entries are served as-is; only stale or missing tickers go
/// through the scheduler, which writes its successes back to the cache.
pub struct MarketScreener {
    catalog: Arc<dyn MarketCatalog>,
    scheduler: FetchScheduler,
    cache: Arc<ResultCache>,
    clock: Arc<dyn Clock>,
}

impl MarketScreener {
    /// `scheduler` should write through to `cache`; see [`FetchScheduler::with_cache`]
    pub fn new(
        catalog: Arc<dyn MarketCatalog>,
        scheduler: FetchScheduler,
        cache: Arc<ResultCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            scheduler,
            cache,
            clock,
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub async fn screen(
        &self,
        market_id: &str,
        options: ScreenOptions,
    ) -> Result<ScreeningReport, ScreenerError> {
        let listings = self.catalog.constituents(market_id).await?;
        if listings.is_empty() {
            return Err(ScreenerError::InvalidData(format!(
                "Market {} has no constituents",
                market_id
            )));
        }
        tracing::info!("Resolved {} constituents for {}", listings.len(), market_id);

        let tickers = listings.into_iter().map(|l| l.symbol).collect();
        Ok(self.screen_tickers(market_id, tickers, options).await)
    }

    /// Screen an explicit ticker list, cached under `market_id`
    pub async fn screen_tickers(
        &self,
        market_id: &str,
        tickers: Vec<String>,
        options: ScreenOptions,
    ) -> ScreeningReport {
        let market_id = market_id.trim().to_uppercase();
        let max_age = options.max_age.unwrap_or_else(|| self.cache.default_max_age());

        let mut results = Vec::new();
        let mut to_fetch = Vec::new();
        for ticker in normalize_tickers(&tickers) {
            let cached = if options.force_refresh {
                None
            } else {
                self.cache.get(&ticker, &market_id, max_age)
            };
            match cached {
                Some(result) => results.push(result),
                None => to_fetch.push(ticker),
            }
        }
        let from_cache = results.len();

        tracing::info!(
            "Screening {}: {} fresh in cache, {} to analyze",
            market_id,
            from_cache,
            to_fetch.len()
        );

        let mut report = ScreeningReport {
            market_id: market_id.clone(),
            results: Vec::new(),
            from_cache,
            fetched: 0,
            failed: BTreeMap::new(),
            skipped: Vec::new(),
            cancelled: false,
            completed_at: self.clock.now(),
        };

        if !to_fetch.is_empty() {
            let job = BatchJob::new(to_fetch)
                .for_market(&market_id)
                .with_cancel(options.cancel.clone());
            let summary = self.scheduler.run_batch(job).await;

            report.fetched = summary.succeeded.len();
            results.extend(summary.succeeded);
            report.failed = summary.failed;
            report.skipped = summary.skipped;
            report.cancelled = summary.cancelled;
        }

        report.results = rank_results(results);
        report.completed_at = self.clock.now();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::score;
    use crate::catalog::StaticCatalog;
    use crate::clock::ManualClock;
    use crate::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use screener_core::{Listing, TickerAnalyzer};
    use std::sync::Mutex;

    /// Scores each ticker by its length so rankings are predictable
    struct CountingAnalyzer {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TickerAnalyzer for CountingAnalyzer {
        async fn analyze(&self, ticker: &str) -> Result<ScoreResult, ScreenerError> {
            self.calls.lock().unwrap().push(ticker.to_string());
            if ticker == "BAD" {
                return Err(ScreenerError::InsufficientData("no ratios".to_string()));
            }
            Ok(score(ticker, ticker.len() as u32, ticker.len() as f64 * 10.0))
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        analyzer: Arc<CountingAnalyzer>,
        screener: MarketScreener,
    }

    fn fixture() -> Fixture {
        let catalog = StaticCatalog::empty().with_symbols("WATCH", &["KO", "AXP", "BAD", "MMM"]);
        fixture_with(catalog)
    }

    fn fixture_with(catalog: StaticCatalog) -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let analyzer = Arc::new(CountingAnalyzer { calls: Mutex::new(Vec::new()) });
        let cache = Arc::new(ResultCache::new(clock.clone()));
        let scheduler = FetchScheduler::new(
            analyzer.clone(),
            SchedulerConfig { batch_size: 2, ..Default::default() },
            clock.clone(),
        )
        .with_cache(cache.clone());
        let screener = MarketScreener::new(Arc::new(catalog), scheduler, cache, clock.clone());
        Fixture { clock, analyzer, screener }
    }

    #[tokio::test]
    async fn test_first_run_fetches_and_ranks() {
        let f = fixture();
        let report = f.screener.screen("watch", ScreenOptions::default()).await.unwrap();

        assert_eq!(report.market_id, "WATCH");
        assert_eq!(report.from_cache, 0);
        assert_eq!(report.fetched, 3);
        assert!(report.failed.contains_key("BAD"));
        let order: Vec<&str> = report.results.iter().map(|r| r.security_id.as_str()).collect();
        assert_eq!(order, vec!["AXP", "MMM", "KO"]);
        assert_eq!(report.top(1).len(), 1);
        assert_eq!(report.top(10).len(), 3);
    }

    #[tokio::test]
    async fn test_second_run_served_from_cache() {
        let f = fixture();
        f.screener.screen("WATCH", ScreenOptions::default()).await.unwrap();
        let calls_after_first = f.analyzer.calls.lock().unwrap().len();

        f.clock.advance(Duration::hours(23));
        let report = f.screener.screen("WATCH", ScreenOptions::default()).await.unwrap();

        assert_eq!(report.from_cache, 3);
        assert_eq!(report.results.len(), 3);
        // Only the failed ticker is retried
        let calls = f.analyzer.calls.lock().unwrap();
        assert_eq!(calls.len(), calls_after_first + 1);
        assert_eq!(calls.last().map(String::as_str), Some("BAD"));
    }

    #[tokio::test]
    async fn test_stale_entries_refetched() {
        let f = fixture();
        f.screener.screen("WATCH", ScreenOptions::default()).await.unwrap();

        f.clock.advance(Duration::hours(25));
        let report = f.screener.screen("WATCH", ScreenOptions::default()).await.unwrap();
        assert_eq!(report.from_cache, 0);
        assert_eq!(report.fetched, 3);

        let options = ScreenOptions { max_age: Some(Duration::hours(48)), ..Default::default() };
        let report = f.screener.screen("WATCH", options).await.unwrap();
        assert_eq!(report.from_cache, 3);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let f = fixture();
        f.screener.screen("WATCH", ScreenOptions::default()).await.unwrap();
        let options = ScreenOptions { force_refresh: true, ..Default::default() };
        let report = f.screener.screen("WATCH", options).await.unwrap();
        assert_eq!(report.from_cache, 0);
        assert_eq!(report.fetched, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let f = fixture();
        let options = ScreenOptions::default();
        options.cancel.cancel();
        let report = f.screener.screen("WATCH", options).await.unwrap();
        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert_eq!(report.skipped.len(), 4);
    }

    #[tokio::test]
    async fn test_repeated_symbols_screened_once() {
        let listing = |symbol: &str| Listing {
            symbol: symbol.to_string(),
            name: String::new(),
            exchange: "MIXED".to_string(),
        };
        let catalog = StaticCatalog::empty()
            .with_market("MIXED", vec![listing("KO"), listing(" ko"), listing("MMM")]);
        let f = fixture_with(catalog);

        let first = f.screener.screen("MIXED", ScreenOptions::default()).await.unwrap();
        f.clock.advance(Duration::hours(1));
        let second = f.screener.screen("MIXED", ScreenOptions::default()).await.unwrap();

        let symbols = |report: &ScreeningReport| -> Vec<String> {
            report.results.iter().map(|r| r.security_id.clone()).collect()
        };
        assert_eq!(symbols(&first), vec!["MMM", "KO"]);
        assert_eq!(symbols(&second), symbols(&first));
        assert_eq!(first.fetched, 2);
        assert_eq!(second.from_cache, 2);
        assert_eq!(second.fetched, 0);
        assert_eq!(f.analyzer.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_market() {
        let f = fixture();
        let err = f.screener.screen("NOPE", ScreenOptions::default()).await.unwrap_err();
        assert!(matches!(err, ScreenerError::InvalidData(_)));
    }
}
