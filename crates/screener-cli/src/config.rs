use anyhow::{bail, Context, Result};
use screener_core::MAX_HISTORY_YEARS;
use screening_orchestrator::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    // Data provider
    pub fmp_api_key: String,
    pub fmp_base_url: String,
    pub fmp_rate_limit: usize, // requests per minute

    // Batch scheduling
    pub batch_size: usize,
    pub rate_window_secs: u64,
    pub max_rate_limit_retries: u32,

    // Cache
    pub cache_max_age_hours: i64,
    pub database_url: String,

    pub history_years: u32,
}

impl ScreenerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            fmp_api_key: lookup("FMP_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .context("FMP_API_KEY not set")?,
            fmp_base_url: get("FMP_BASE_URL", "https://financialmodelingprep.com"),
            fmp_rate_limit: get("FMP_RATE_LIMIT", "300")
                .parse()
                .context("FMP_RATE_LIMIT must be a positive integer")?,

            batch_size: get("SCREENER_BATCH_SIZE", "100")
                .parse()
                .context("SCREENER_BATCH_SIZE must be a positive integer")?,
            rate_window_secs: get("SCREENER_RATE_WINDOW_SECS", "60")
                .parse()
                .context("SCREENER_RATE_WINDOW_SECS must be a positive integer")?,
            max_rate_limit_retries: get("SCREENER_MAX_RATE_LIMIT_RETRIES", "2")
                .parse()
                .context("SCREENER_MAX_RATE_LIMIT_RETRIES must be a non-negative integer")?,

            cache_max_age_hours: get("CACHE_MAX_AGE_HOURS", "24")
                .parse()
                .context("CACHE_MAX_AGE_HOURS must be an integer")?,
            database_url: get("SCREENER_DB_URL", "sqlite:screener.db"),

            history_years: get("SCREENER_HISTORY_YEARS", "15")
                .parse()
                .context("SCREENER_HISTORY_YEARS must be an integer")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.rate_window_secs == 0 {
            bail!("rate window must be positive");
        }
        if self.fmp_rate_limit == 0 {
            bail!("FMP_RATE_LIMIT must be positive");
        }
        if self.cache_max_age_hours <= 0 {
            bail!("cache max age must be positive, got {}h", self.cache_max_age_hours);
        }
        if !(1..=MAX_HISTORY_YEARS).contains(&self.history_years) {
            bail!(
                "history years must be between 1 and {}, got {}",
                MAX_HISTORY_YEARS,
                self.history_years
            );
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            rate_window: Duration::from_secs(self.rate_window_secs),
            max_rate_limit_retries: self.max_rate_limit_retries,
        }
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_max_age_hours)
    }
}
