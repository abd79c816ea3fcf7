use async_trait::async_trait;
use crate::{
    BalanceSheet, CashFlowStatement, CompanyProfile, IncomeStatement, KeyMetrics, Listing, Period,
    Quote, RatiosTtm, ScoreResult, ScreenerError,
};

/// Request/response source of raw financial data, keyed by ticker symbol.
///
/// `Ok(None)` means the provider answered but has no record for the symbol.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn profile(&self, symbol: &str) -> Result<Option<CompanyProfile>, ScreenerError>;

    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, ScreenerError>;

    async fn income_statements(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<IncomeStatement>, ScreenerError>;

    async fn balance_sheets(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<BalanceSheet>, ScreenerError>;

    async fn cash_flow_statements(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<CashFlowStatement>, ScreenerError>;

    async fn ratios_ttm(&self, symbol: &str) -> Result<Option<RatiosTtm>, ScreenerError>;

    async fn key_metrics(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<KeyMetrics>, ScreenerError>;
}

/// Resolves a market or index identifier to its constituents
#[async_trait]
pub trait MarketCatalog: Send + Sync {
    async fn constituents(&self, market_id: &str) -> Result<Vec<Listing>, ScreenerError>;
}

/// Full analysis of a single ticker
#[async_trait]
pub trait TickerAnalyzer: Send + Sync {
    async fn analyze(&self, ticker: &str) -> Result<ScoreResult, ScreenerError>;
}
