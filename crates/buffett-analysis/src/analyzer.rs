use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use screener_core::{
    MarketDataProvider, Period, RawFinancials, ScoreResult, ScreenerError, TickerAnalyzer,
    MAX_HISTORY_YEARS,
};

use crate::criteria::CriterionEvaluator;
use crate::derived::derive_metrics;
use crate::scoring::ScoreAggregator;

/// Fetches, derives, evaluates and scores a single security.
///
/// Read-only with respect to everything but the provider; caching is the caller's job.
pub struct SecurityAnalyzer<P: MarketDataProvider> {
    provider: Arc<P>,
    evaluator: CriterionEvaluator,
    aggregator: ScoreAggregator,
    history_years: u32,
}

impl<P: MarketDataProvider> SecurityAnalyzer<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            evaluator: CriterionEvaluator::default(),
            aggregator: ScoreAggregator::default(),
            history_years: MAX_HISTORY_YEARS,
        }
    }

    pub fn with_evaluator(mut self, evaluator: CriterionEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_aggregator(mut self, aggregator: ScoreAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Number of annual statements requested, capped at fifteen
    pub fn with_history_years(mut self, years: u32) -> Self {
        self.history_years = years.clamp(1, MAX_HISTORY_YEARS);
        self
    }

    /// Fetch every input concurrently.
    ///
    /// Profile and TTM ratios are checked before any other sub-fetch result so that
    /// their absence is always reported as `InsufficientData`.
    pub async fn fetch(&self, symbol: &str) -> Result<RawFinancials, ScreenerError> {
        let limit = self.history_years;
        let p = &self.provider;

        let (profile, quote, income, balance, cash_flow, ratios_ttm, key_metrics) = tokio::join!(
            p.profile(symbol),
            p.quote(symbol),
            p.income_statements(symbol, Period::Annual, limit),
            p.balance_sheets(symbol, Period::Annual, limit),
            p.cash_flow_statements(symbol, Period::Annual, limit),
            p.ratios_ttm(symbol),
            p.key_metrics(symbol, Period::Annual, limit),
        );

        let profile = profile?.ok_or_else(|| {
            ScreenerError::InsufficientData(format!("no company profile for {}", symbol))
        })?;
        let ratios_ttm = ratios_ttm?.ok_or_else(|| {
            ScreenerError::InsufficientData(format!("no TTM ratios for {}", symbol))
        })?;

        let mut income_statements = income?;
        let mut balance_sheets = balance?;
        let mut cash_flow_statements = cash_flow?;
        let mut key_metrics = key_metrics?;

        // Providers usually return newest first; don't rely on it
        income_statements.sort_by(|a, b| b.fiscal_year.cmp(&a.fiscal_year));
        balance_sheets.sort_by(|a, b| b.fiscal_year.cmp(&a.fiscal_year));
        cash_flow_statements.sort_by(|a, b| b.fiscal_year.cmp(&a.fiscal_year));
        key_metrics.sort_by(|a, b| b.fiscal_year.cmp(&a.fiscal_year));

        Ok(RawFinancials {
            symbol: symbol.to_string(),
            profile: Some(profile),
            quote: quote?,
            income_statements,
            balance_sheets,
            cash_flow_statements,
            ratios_ttm: Some(ratios_ttm),
            key_metrics,
        })
    }

    /// Score already fetched data.
    pub fn score(&self, raw: &RawFinancials) -> Result<ScoreResult, ScreenerError> {
        let profile = raw.profile.as_ref().ok_or_else(|| {
            ScreenerError::InsufficientData(format!("no company profile for {}", raw.symbol))
        })?;
        if raw.ratios_ttm.is_none() {
            return Err(ScreenerError::InsufficientData(format!(
                "no TTM ratios for {}",
                raw.symbol
            )));
        }

        let metrics = derive_metrics(raw);
        let criteria = self.evaluator.evaluate(&metrics);
        let (raw_score, weighted_score) = self.aggregator.aggregate(&criteria)?;

        Ok(ScoreResult {
            security_id: raw.symbol.clone(),
            name: profile.company_name.clone(),
            raw_score,
            weighted_score,
            criteria,
            metrics,
            computed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl<P: MarketDataProvider> TickerAnalyzer for SecurityAnalyzer<P> {
    async fn analyze(&self, ticker: &str) -> Result<ScoreResult, ScreenerError> {
        let symbol = ticker.trim().to_uppercase();
        tracing::debug!("Analyzing {}", symbol);

        let raw = self.fetch(&symbol).await?;
        let result = self.score(&raw)?;

        tracing::debug!(
            "{}: {}/{} criteria passed, weighted {:.1}",
            symbol,
            result.raw_score,
            result.criteria_count(),
            result.weighted_score
        );
        Ok(result)
    }
}
