//! screener: rank a market's constituents against the Buffett criteria.
//!
//! Usage:
//!   screener --market DJIA
//!   screener --market SP500 --top 25 --export sp500.csv
//!   screener --symbols KO AXP MMM --refresh
//!   screener --market NASDAQ100 --stats
//!   screener --market DJIA --clear-cache

mod config;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::Context;
use buffett_analysis::SecurityAnalyzer;
use config::ScreenerConfig;
use fmp_client::FmpClient;
use screener_core::ScoreResult;
use screening_orchestrator::{
    write_csv, CacheDb, CancellationFlag, Clock, FetchScheduler, MarketScreener, ResultCache,
    ScreenOptions, SystemClock,
};

const DEFAULT_MARKET: &str = "DJIA";
const CUSTOM_MARKET: &str = "CUSTOM";
const DEFAULT_TOP: usize = 20;

struct CliArgs {
    market: Option<String>,
    symbols: Vec<String>,
    refresh: bool,
    max_age_hours: Option<i64>,
    batch_size: Option<usize>,
    export: Option<String>,
    top: usize,
    stats: bool,
    clear_cache: bool,
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1))
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let symbols = match args.iter().position(|a| a == "--symbols") {
        Some(idx) => args[idx + 1..]
            .iter()
            .take_while(|a| !a.starts_with("--"))
            .map(|s| s.trim().to_uppercase())
            .collect(),
        None => Vec::new(),
    };

    Ok(CliArgs {
        market: flag_value(args, "--market").map(|m| m.trim().to_uppercase()),
        symbols,
        refresh: args.iter().any(|a| a == "--refresh"),
        max_age_hours: flag_value(args, "--max-age-hours")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("--max-age-hours must be an integer")?,
        batch_size: flag_value(args, "--batch-size")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("--batch-size must be a positive integer")?,
        export: flag_value(args, "--export").cloned(),
        top: flag_value(args, "--top")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("--top must be a positive integer")?
            .unwrap_or(DEFAULT_TOP),
        stats: args.iter().any(|a| a == "--stats"),
        clear_cache: args.iter().any(|a| a == "--clear-cache"),
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  screener --market ID               Screen a market or index (default: {})",
        DEFAULT_MARKET
    );
    eprintln!("  screener --symbols KO AXP ...      Screen specific symbols");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --refresh            Ignore cached results");
    eprintln!("  --max-age-hours N    Cache freshness bound (default: CACHE_MAX_AGE_HOURS)");
    eprintln!("  --batch-size N       Tickers per rate-limit window");
    eprintln!("  --export PATH        Write ranked results as CSV");
    eprintln!("  --top N              Rows to print (default: {})", DEFAULT_TOP);
    eprintln!("  --stats              Show cache statistics and exit");
    eprintln!("  --clear-cache        Drop cached results for the market and exit");
}

fn print_results(results: &[ScoreResult], total: usize) {
    println!();
    println!("{:>4}  {:<8} {:<36} {:>5} {:>8}", "#", "Symbol", "Name", "Raw", "Score");
    println!("{}", "-".repeat(66));
    for (i, r) in results.iter().enumerate() {
        let name: String = r.name.as_deref().unwrap_or("").chars().take(36).collect();
        println!(
            "{:>4}  {:<8} {:<36} {:>2}/{:<2} {:>8.1}",
            i + 1,
            r.security_id,
            name,
            r.raw_score,
            r.criteria_count(),
            r.weighted_score
        );
    }
    if total > results.len() {
        println!("... {} more", total - results.len());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let raw_args: Vec<String> = std::env::args().collect();
    if raw_args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let args = parse_args(&raw_args)?;

    let mut config = ScreenerConfig::from_env()?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(hours) = args.max_age_hours {
        config.cache_max_age_hours = hours;
    }
    config.validate()?;

    let market_id = match (&args.market, args.symbols.is_empty()) {
        (Some(market), _) => market.clone(),
        (None, false) => CUSTOM_MARKET.to_string(),
        (None, true) => DEFAULT_MARKET.to_string(),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache =
        Arc::new(ResultCache::new(clock.clone()).with_default_max_age(config.cache_max_age()));
    let db = CacheDb::new(&config.database_url)
        .await
        .with_context(|| format!("Failed to open cache database {}", config.database_url))?;
    let loaded = db.load_into(&cache).await?;
    tracing::info!("Loaded {} cached results from {}", loaded, config.database_url);

    if args.clear_cache {
        let removed = cache.clear(&market_id);
        let deleted = db.delete_market(&market_id).await?;
        tracing::info!(
            "Cleared {} cached results for {} ({} rows deleted)",
            removed,
            market_id,
            deleted
        );
        return Ok(());
    }

    if args.stats {
        let stats = cache.stats(&market_id);
        println!("Cache for {} (max age {}h)", market_id, config.cache_max_age_hours);
        println!("  entries:  {}", stats.total);
        println!("  fresh:    {}", stats.fresh);
        println!("  stale:    {}", stats.stale);
        println!("  hit rate: {:.1}%", stats.hit_rate * 100.0);
        return Ok(());
    }

    let fmp = Arc::new(FmpClient::with_settings(
        config.fmp_api_key.clone(),
        config.fmp_base_url.clone(),
        config.fmp_rate_limit,
    ));
    let analyzer =
        Arc::new(SecurityAnalyzer::new(fmp.clone()).with_history_years(config.history_years));
    let scheduler = FetchScheduler::new(analyzer, config.scheduler_config(), clock.clone())
        .with_cache(cache.clone())
        .with_progress(Arc::new(|pct: f64, msg: &str| tracing::info!("[{:>5.1}%] {}", pct, msg)));
    let screener = MarketScreener::new(fmp, scheduler, cache.clone(), clock);

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current chunk");
            on_signal.cancel();
        }
    });

    let options = ScreenOptions {
        max_age: None,
        force_refresh: args.refresh,
        cancel,
    };
    let report = if args.symbols.is_empty() {
        screener.screen(&market_id, options).await?
    } else {
        screener.screen_tickers(&market_id, args.symbols.clone(), options).await
    };

    let saved = db.save_market(&cache, &market_id).await?;
    tracing::info!("Persisted {} cached results for {}", saved, market_id);

    tracing::info!(
        "{}: {} ranked ({} from cache, {} fetched), {} failed, {} skipped{}",
        report.market_id,
        report.results.len(),
        report.from_cache,
        report.fetched,
        report.failed.len(),
        report.skipped.len(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    for (ticker, err) in &report.failed {
        tracing::debug!("  {}: {}", ticker, err);
    }

    print_results(report.top(args.top), report.results.len());

    if let Some(path) = &args.export {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path))?;
        let rows = write_csv(BufWriter::new(file), &report.results)?;
        tracing::info!("Exported {} rows to {}", rows, path);
    }

    Ok(())
}
