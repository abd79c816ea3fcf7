use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criterion::Criterion;

/// Most statement histories are capped at fifteen fiscal years.
pub const MAX_HISTORY_YEARS: u32 = 15;

/// Reporting period requested from the market data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Annual,
    Quarter,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Annual => "annual",
            Period::Quarter => "quarter",
        }
    }
}

/// Company profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub symbol: String,
    pub company_name: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<f64>,
}

/// Live quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub eps: Option<f64>,
    pub pe: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One fiscal year of income statement data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
    pub operating_income: Option<f64>,
    pub ebitda: Option<f64>,
    pub eps: Option<f64>,
    pub weighted_average_shares: Option<f64>,
}

/// One fiscal year of balance sheet data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub fiscal_year: i32,
    pub total_assets: Option<f64>,
    pub total_debt: Option<f64>,
    pub cash_and_equivalents: Option<f64>,
    pub total_equity: Option<f64>,
}

/// One fiscal year of cash flow statement data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub fiscal_year: i32,
    pub operating_cash_flow: Option<f64>,
    pub capital_expenditure: Option<f64>,
    pub free_cash_flow: Option<f64>,
}

/// Trailing-twelve-month ratio snapshot. Ratios are fractions (0.15 = 15%).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatiosTtm {
    pub pe_ratio: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub net_profit_margin: Option<f64>,
    pub price_to_book: Option<f64>,
}

/// Historical annual key metrics. Ratios are fractions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub fiscal_year: i32,
    pub roic: Option<f64>,
    pub roe: Option<f64>,
    pub book_value_per_share: Option<f64>,
}

/// Everything fetched for one security. Statement arrays are most-recent-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinancials {
    pub symbol: String,
    pub profile: Option<CompanyProfile>,
    pub quote: Option<Quote>,
    pub income_statements: Vec<IncomeStatement>,
    pub balance_sheets: Vec<BalanceSheet>,
    pub cash_flow_statements: Vec<CashFlowStatement>,
    pub ratios_ttm: Option<RatiosTtm>,
    pub key_metrics: Vec<KeyMetrics>,
}

impl RawFinancials {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            profile: None,
            quote: None,
            income_statements: Vec::new(),
            balance_sheets: Vec::new(),
            cash_flow_statements: Vec::new(),
            ratios_ttm: None,
            key_metrics: Vec::new(),
        }
    }

    pub fn price(&self) -> Option<f64> {
        self.quote.as_ref().and_then(|q| q.price)
    }
}

/// A market constituent as resolved by a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
}

/// Direction of a metric over its last three periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
    Undetermined,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "rising",
            Trend::Falling => "falling",
            Trend::Stable => "stable",
            Trend::Undetermined => "undetermined",
        }
    }
}

/// Number of most recent fiscal years checked for losses
pub const RECENT_PROFITABILITY_YEARS: u32 = 3;

/// Profit/loss record over the most recent ten fiscal years
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitabilityRecord {
    /// Years with a reported net income (at most 10)
    pub years_observed: u32,
    pub years_profitable: u32,
    /// Recent years with a reported net income
    pub recent_observed: u32,
    /// Losses among the recent years
    pub recent_losses: u32,
}

impl ProfitabilityRecord {
    /// Every recent year reported, and none of them a loss
    pub fn recent_years_profitable(&self) -> bool {
        self.recent_observed == RECENT_PROFITABILITY_YEARS && self.recent_losses == 0
    }
}

/// Metrics derived from [`RawFinancials`]. Percentages are expressed as percent (15.0 = 15%).
///
/// Every field is `None` when its inputs are missing or its mathematical
/// precondition fails; absent data is never coerced to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub eps_cagr_3y: Option<f64>,
    pub eps_cagr_5y: Option<f64>,
    pub eps_cagr_10y: Option<f64>,
    pub revenue_cagr_3y: Option<f64>,
    pub revenue_cagr_5y: Option<f64>,
    pub revenue_cagr_10y: Option<f64>,
    pub fcf_margin: Option<f64>,
    pub fcf_margin_trend: Trend,
    pub roic: Option<f64>,
    pub roic_trend: Trend,
    pub roe: Option<f64>,
    pub net_margin: Option<f64>,
    pub net_debt_to_ebitda: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub profitability: Option<ProfitabilityRecord>,
    pub price: Option<f64>,
    pub intrinsic_value: Option<f64>,
    pub margin_of_safety: Option<f64>,
}

/// Outcome of one analysis run. Never mutated; superseded by the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub security_id: String,
    pub name: Option<String>,
    /// Number of passed criteria
    pub raw_score: u32,
    /// Weighted compatibility, 0-100
    pub weighted_score: f64,
    pub criteria: Vec<Criterion>,
    pub metrics: DerivedMetrics,
    pub computed_at: DateTime<Utc>,
}

impl ScoreResult {
    pub fn criteria_count(&self) -> usize {
        self.criteria.len()
    }
}
