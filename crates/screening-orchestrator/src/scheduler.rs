use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use screener_core::{ScoreResult, ScreenerError, TickerAnalyzer};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::cache::ResultCache;
use crate::clock::Clock;

/// `(percent_complete, message)`, invoked after every chunk and at completion
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tickers per chunk; also the concurrency bound within a chunk
    pub batch_size: usize,
    /// External quota window. Consecutive chunks start at least this far apart.
    pub rate_window: Duration,
    /// How often a rate-limited ticker is re-queued before it counts as failed
    pub max_rate_limit_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            rate_window: Duration::from_secs(60),
            max_rate_limit_retries: 2,
        }
    }
}

/// Cooperative cancellation, checked at chunk boundaries only
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result slot of a single ticker
#[derive(Debug, Clone)]
pub struct TickerOutcome {
    pub ticker: String,
    pub result: Result<ScoreResult, ScreenerError>,
}

/// One screening run request
pub struct BatchJob {
    tickers: Vec<String>,
    market_id: Option<String>,
    cancel: CancellationFlag,
    outcomes: Option<mpsc::UnboundedSender<TickerOutcome>>,
}

impl BatchJob {
    pub fn new(tickers: Vec<String>) -> Self {
        Self {
            tickers,
            market_id: None,
            cancel: CancellationFlag::default(),
            outcomes: None,
        }
    }

    /// Successful results are written to the scheduler's cache under this market
    pub fn for_market(mut self, market_id: &str) -> Self {
        self.market_id = Some(market_id.to_string());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stream every outcome as soon as it completes
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<TickerOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: Vec<ScoreResult>,
    pub failed: BTreeMap<String, ScreenerError>,
    /// Tickers never attempted because the run was cancelled
    pub skipped: Vec<String>,
    pub chunks_run: usize,
    /// Inter-chunk waits that actually slept
    pub waits: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn completed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

struct QueuedTicker {
    ticker: String,
    rate_limit_retries: u32,
}

/// Runs an analyzer over many tickers in rate-limited chunks.
///
/// Tickers within a chunk run concurrently; chunks run strictly in sequence,
/// and chunk N+1 never starts before `rate_window` has passed since chunk N
/// started. A failing ticker is recorded and never aborts the batch.
pub struct FetchScheduler {
    analyzer: Arc<dyn TickerAnalyzer>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<ResultCache>>,
    progress: Option<ProgressCallback>,
}

impl FetchScheduler {
    pub fn new(
        analyzer: Arc<dyn TickerAnalyzer>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            analyzer,
            config: SchedulerConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            clock,
            cache: None,
            progress: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn report(&self, percent: f64, message: &str) {
        if let Some(progress) = &self.progress {
            progress(percent.clamp(0.0, 100.0), message);
        }
    }

    pub async fn run_batch(&self, job: BatchJob) -> BatchSummary {
        let mut queue: VecDeque<QueuedTicker> = normalize_tickers(&job.tickers)
            .into_iter()
            .map(|ticker| QueuedTicker { ticker, rate_limit_retries: 0 })
            .collect();

        let total = queue.len();
        let batch_size = self.config.batch_size;
        let mut summary = BatchSummary { total, ..Default::default() };
        let percent = |summary: &BatchSummary| {
            if total == 0 { 100.0 } else { summary.completed() as f64 / total as f64 * 100.0 }
        };

        tracing::info!(
            "Starting batch of {} tickers ({} per chunk, {}s window)",
            total,
            batch_size,
            self.config.rate_window.as_secs()
        );
        self.report(0.0, &format!("Starting analysis of {} tickers", total));

        let mut last_chunk_elapsed = Duration::ZERO;
        let mut rate_limited = false;

        while !queue.is_empty() {
            if job.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            if summary.chunks_run > 0 {
                let wait = if rate_limited {
                    self.config.rate_window
                } else {
                    self.config.rate_window.saturating_sub(last_chunk_elapsed)
                };
                if !wait.is_zero() {
                    tracing::info!("Waiting {:.1}s for rate limit window", wait.as_secs_f64());
                    self.report(
                        percent(&summary),
                        &format!("Waiting {}s for the API rate limit window", wait.as_secs()),
                    );
                    self.clock.sleep(wait).await;
                    summary.waits += 1;
                }
                if job.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
            }

            let take = batch_size.min(queue.len());
            let chunk: Vec<QueuedTicker> = queue.drain(..take).collect();
            let chunk_number = summary.chunks_run + 1;
            let chunk_start = self.clock.now();
            tracing::info!("Chunk {}: analyzing {} tickers", chunk_number, chunk.len());

            let mut pending: HashSet<String> = chunk.iter().map(|q| q.ticker.clone()).collect();
            let mut tasks = JoinSet::new();
            for queued in chunk {
                let analyzer = Arc::clone(&self.analyzer);
                tasks.spawn(async move {
                    let result = analyzer.analyze(&queued.ticker).await;
                    (queued, result)
                });
            }

            rate_limited = false;
            let mut requeue = Vec::new();

            while let Some(joined) = tasks.join_next().await {
                let (queued, result) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        tracing::error!("Analysis task error: {}", e);
                        continue;
                    }
                };
                pending.remove(&queued.ticker);

                let retries_left =
                    queued.rate_limit_retries < self.config.max_rate_limit_retries;
                match result {
                    Err(e) if e.is_rate_limit() && retries_left => {
                        tracing::warn!(
                            "{} hit the provider rate limit, re-queueing",
                            queued.ticker
                        );
                        rate_limited = true;
                        requeue.push(QueuedTicker {
                            rate_limit_retries: queued.rate_limit_retries + 1,
                            ..queued
                        });
                    }
                    result => {
                        if matches!(&result, Err(e) if e.is_rate_limit()) {
                            rate_limited = true;
                        }
                        self.record(&job, &mut summary, queued.ticker, result);
                    }
                }
            }

            // Tasks that panicked never report back
            let mut lost: Vec<String> = pending.into_iter().collect();
            lost.sort();
            for ticker in lost {
                let err = ScreenerError::ProviderError("analysis task aborted".to_string());
                self.record(&job, &mut summary, ticker, Err(err));
            }

            for queued in requeue.into_iter().rev() {
                queue.push_front(queued);
            }

            summary.chunks_run += 1;
            last_chunk_elapsed =
                (self.clock.now() - chunk_start).to_std().unwrap_or(Duration::ZERO);

            let message = format!(
                "Analyzed {}/{} tickers (chunk {}, {} failed)",
                summary.completed(),
                total,
                chunk_number,
                summary.failed.len()
            );
            tracing::info!("{}", message);
            self.report(percent(&summary), &message);
        }

        if summary.cancelled {
            summary.skipped = queue.into_iter().map(|q| q.ticker).collect();
            let message = format!(
                "Screening cancelled: {}/{} analyzed, {} skipped",
                summary.completed(),
                total,
                summary.skipped.len()
            );
            tracing::info!("{}", message);
            self.report(percent(&summary), &message);
        } else {
            let message = format!(
                "Screening complete: {} succeeded, {} failed",
                summary.succeeded.len(),
                summary.failed.len()
            );
            tracing::info!("{}", message);
            self.report(100.0, &message);
        }

        summary
    }

    fn record(
        &self,
        job: &BatchJob,
        summary: &mut BatchSummary,
        ticker: String,
        result: Result<ScoreResult, ScreenerError>,
    ) {
        if let Some(tx) = &job.outcomes {
            let _ = tx.send(TickerOutcome {
                ticker: ticker.clone(),
                result: result.clone(),
            });
        }

        match result {
            Ok(score) => {
                if let (Some(cache), Some(market_id)) = (&self.cache, &job.market_id) {
                    cache.put(&ticker, market_id, score.clone());
                }
                summary.succeeded.push(score);
            }
            Err(e) => {
                tracing::warn!("Failed to analyze {}: {}", ticker, e);
                summary.failed.insert(ticker, e);
            }
        }
    }
}

/// Trimmed, upper-cased symbols in first-seen order, blanks and repeats dropped
pub(crate) fn normalize_tickers(tickers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::score;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Analyzer with scripted failures; every call takes `cost` of clock time
    struct ScriptedAnalyzer {
        failures: HashMap<String, ScreenerError>,
        rate_limited_until_call: Mutex<HashMap<String, u32>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedAnalyzer {
        fn new() -> Self {
            Self {
                failures: HashMap::new(),
                rate_limited_until_call: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, ticker: &str, err: ScreenerError) -> Self {
            self.failures.insert(ticker.to_string(), err);
            self
        }

        /// Return `RateLimitExceeded` for the first `times` calls
        fn rate_limited(self, ticker: &str, times: u32) -> Self {
            self.rate_limited_until_call.lock().unwrap().insert(ticker.to_string(), times);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TickerAnalyzer for ScriptedAnalyzer {
        async fn analyze(&self, ticker: &str) -> Result<ScoreResult, ScreenerError> {
            self.calls.lock().unwrap().push(ticker.to_string());
            if let Some(remaining) = self.rate_limited_until_call.lock().unwrap().get_mut(ticker) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ScreenerError::RateLimitExceeded("quota".to_string()));
                }
            }
            match self.failures.get(ticker) {
                Some(e) => Err(e.clone()),
                None => Ok(score(ticker, 5, 50.0)),
            }
        }
    }

    fn tickers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{:03}", i)).collect()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 2, 14, 0, 0).unwrap()))
    }

    fn config(batch_size: usize) -> SchedulerConfig {
        SchedulerConfig {
            batch_size,
            rate_window: Duration::from_secs(60),
            max_rate_limit_retries: 2,
        }
    }

    #[tokio::test]
    async fn test_chunks_and_waits() {
        let clock = clock();
        let start = clock.now();
        let scheduler =
            FetchScheduler::new(Arc::new(ScriptedAnalyzer::new()), config(100), clock.clone());

        let summary = scheduler.run_batch(BatchJob::new(tickers(250))).await;

        assert_eq!(summary.chunks_run, 3);
        assert_eq!(summary.waits, 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 2]);
        assert!(clock.now() - start >= chrono::Duration::seconds(120));
        assert_eq!(summary.succeeded.len(), 250);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn test_wait_is_remainder_of_window() {
        /// Analyzer whose chunk takes 45s of clock time
        struct SlowAnalyzer(Arc<ManualClock>);

        #[async_trait]
        impl TickerAnalyzer for SlowAnalyzer {
            async fn analyze(&self, ticker: &str) -> Result<ScoreResult, ScreenerError> {
                if ticker.ends_with('0') {
                    self.0.advance(chrono::Duration::seconds(45));
                }
                Ok(score(ticker, 1, 10.0))
            }
        }

        let clock = clock();
        let scheduler =
            FetchScheduler::new(Arc::new(SlowAnalyzer(clock.clone())), config(2), clock.clone());
        let job = BatchJob::new(vec!["A0".into(), "B1".into(), "C0".into()]);
        let summary = scheduler.run_batch(job).await;

        assert_eq!(summary.chunks_run, 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(15)]);
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let clock = clock();
        let analyzer = ScriptedAnalyzer::new()
            .failing("T004", ScreenerError::InsufficientData("no profile".to_string()));
        let scheduler = FetchScheduler::new(Arc::new(analyzer), config(100), clock);

        let summary = scheduler.run_batch(BatchJob::new(tickers(10))).await;

        assert_eq!(summary.succeeded.len(), 9);
        assert_eq!(summary.failed.len(), 1);
        assert!(matches!(summary.failed.get("T004"), Some(ScreenerError::InsufficientData(_))));
    }

    #[tokio::test]
    async fn test_progress_reported_per_chunk_and_at_completion() {
        let clock = clock();
        let reports: Arc<Mutex<Vec<(f64, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let scheduler = FetchScheduler::new(Arc::new(ScriptedAnalyzer::new()), config(4), clock)
            .with_progress(Arc::new(move |pct: f64, msg: &str| {
                sink.lock().unwrap().push((pct, msg.to_string()))
            }));

        scheduler.run_batch(BatchJob::new(tickers(10))).await;

        let reports = reports.lock().unwrap();
        let chunk_reports: Vec<f64> = reports
            .iter()
            .filter(|(_, m)| m.starts_with("Analyzed"))
            .map(|(p, _)| *p)
            .collect();
        assert_eq!(chunk_reports, vec![40.0, 80.0, 100.0]);
        let (last_pct, last_msg) = reports.last().unwrap();
        assert_eq!(*last_pct, 100.0);
        assert!(last_msg.starts_with("Screening complete"));
    }

    #[tokio::test]
    async fn test_cancellation_between_chunks() {
        let clock = clock();
        let cancel = CancellationFlag::new();
        let flag = cancel.clone();
        let scheduler = FetchScheduler::new(Arc::new(ScriptedAnalyzer::new()), config(3), clock)
            .with_progress(Arc::new(move |_: f64, msg: &str| {
                if msg.starts_with("Analyzed") {
                    flag.cancel();
                }
            }));

        let summary = scheduler
            .run_batch(BatchJob::new(tickers(7)).with_cancel(cancel))
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.chunks_run, 1);
        assert_eq!(summary.succeeded.len(), 3);
        assert_eq!(summary.skipped, vec!["T003", "T004", "T005", "T006"]);
        assert_eq!(summary.waits, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_ticker_is_requeued_with_full_window() {
        let clock = clock();
        let analyzer = Arc::new(ScriptedAnalyzer::new().rate_limited("T001", 1));
        let scheduler = FetchScheduler::new(analyzer.clone(), config(2), clock.clone());

        let summary = scheduler.run_batch(BatchJob::new(tickers(3))).await;

        assert_eq!(summary.succeeded.len(), 3);
        assert!(summary.failed.is_empty());
        // Retried ticker leads the next chunk
        let calls = analyzer.calls();
        assert_eq!(calls.iter().filter(|t| *t == "T001").count(), 2);
        assert_eq!(summary.chunks_run, 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_exhausted() {
        let clock = clock();
        let analyzer = ScriptedAnalyzer::new().rate_limited("T000", 10);
        let scheduler = FetchScheduler::new(Arc::new(analyzer), config(5), clock);

        let summary = scheduler.run_batch(BatchJob::new(tickers(1))).await;

        assert_eq!(summary.chunks_run, 3);
        assert!(summary.failed.get("T000").map_or(false, |e| e.is_rate_limit()));
    }

    #[tokio::test]
    async fn test_writes_successes_to_cache_and_streams_outcomes() {
        let clock = clock();
        let cache = Arc::new(ResultCache::new(clock.clone()));
        let analyzer = ScriptedAnalyzer::new()
            .failing("T001", ScreenerError::ProviderError("HTTP 500".into()));
        let scheduler = FetchScheduler::new(Arc::new(analyzer), config(10), clock)
            .with_cache(cache.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = scheduler
            .run_batch(BatchJob::new(tickers(3)).for_market("TEST").with_outcomes(tx))
            .await;

        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(cache.stats("TEST").total, 2);
        assert!(cache.entry("T001", "TEST").is_none());

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.result.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_and_blank_tickers_are_dropped() {
        let clock = clock();
        let scheduler = FetchScheduler::new(Arc::new(ScriptedAnalyzer::new()), config(10), clock);
        let summary = scheduler
            .run_batch(BatchJob::new(vec!["ko".into(), "KO".into(), " ".into(), "MMM".into()]))
            .await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded.len(), 2);
    }
}
