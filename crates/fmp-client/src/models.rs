//! Wire formats of the Financial Modeling Prep REST API and their conversion
//! into the screener data model.

use chrono::DateTime;
use screener_core::{
    BalanceSheet, CashFlowStatement, CompanyProfile, IncomeStatement, KeyMetrics, Listing, Quote,
    RatiosTtm,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// FMP reports the fiscal year as a string ("2023"); fall back to the statement date.
fn fiscal_year(calendar_year: Option<&str>, date: Option<&str>) -> Option<i32> {
    calendar_year
        .and_then(|y| y.trim().parse().ok())
        .or_else(|| date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok()))
}

/// A per-period statement row. Rows whose fiscal year cannot be determined
/// are unusable for year-aligned analysis and convert to `None`.
pub(crate) trait StatementRecord: DeserializeOwned {
    type Statement;

    fn into_statement(self) -> Option<Self::Statement>;
}

/// Accept numbers, numeric strings and null
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfileRecord {
    symbol: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    exchange_short_name: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    sector: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    mkt_cap: Option<f64>,
}

impl From<ProfileRecord> for CompanyProfile {
    fn from(r: ProfileRecord) -> Self {
        CompanyProfile {
            symbol: r.symbol,
            company_name: r.company_name,
            exchange: r.exchange_short_name,
            currency: r.currency,
            sector: r.sector,
            industry: r.industry,
            market_cap: r.mkt_cap,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuoteRecord {
    symbol: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    shares_outstanding: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    eps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pe: Option<f64>,
    #[serde(default)]
    timestamp: Option<i64>,
}

impl From<QuoteRecord> for Quote {
    fn from(r: QuoteRecord) -> Self {
        Quote {
            symbol: r.symbol,
            price: r.price,
            market_cap: r.market_cap,
            shares_outstanding: r.shares_outstanding,
            eps: r.eps,
            pe: r.pe,
            timestamp: r.timestamp.and_then(|t| DateTime::from_timestamp(t, 0)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IncomeStatementRecord {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    calendar_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    net_income: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    operating_income: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    ebitda: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    eps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    weighted_average_shs_out: Option<f64>,
}

impl StatementRecord for IncomeStatementRecord {
    type Statement = IncomeStatement;

    fn into_statement(self) -> Option<IncomeStatement> {
        Some(IncomeStatement {
            fiscal_year: fiscal_year(self.calendar_year.as_deref(), self.date.as_deref())?,
            revenue: self.revenue,
            net_income: self.net_income,
            operating_income: self.operating_income,
            ebitda: self.ebitda,
            eps: self.eps,
            weighted_average_shares: self.weighted_average_shs_out,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BalanceSheetRecord {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    calendar_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_assets: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_debt: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    cash_and_cash_equivalents: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_stockholders_equity: Option<f64>,
}

impl StatementRecord for BalanceSheetRecord {
    type Statement = BalanceSheet;

    fn into_statement(self) -> Option<BalanceSheet> {
        Some(BalanceSheet {
            fiscal_year: fiscal_year(self.calendar_year.as_deref(), self.date.as_deref())?,
            total_assets: self.total_assets,
            total_debt: self.total_debt,
            cash_and_equivalents: self.cash_and_cash_equivalents,
            total_equity: self.total_stockholders_equity,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CashFlowRecord {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    calendar_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    operating_cash_flow: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    capital_expenditure: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    free_cash_flow: Option<f64>,
}

impl StatementRecord for CashFlowRecord {
    type Statement = CashFlowStatement;

    fn into_statement(self) -> Option<CashFlowStatement> {
        Some(CashFlowStatement {
            fiscal_year: fiscal_year(self.calendar_year.as_deref(), self.date.as_deref())?,
            operating_cash_flow: self.operating_cash_flow,
            capital_expenditure: self.capital_expenditure,
            free_cash_flow: self.free_cash_flow,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RatiosTtmRecord {
    #[serde(default, rename = "peRatioTTM", deserialize_with = "lenient_f64")]
    pe_ratio: Option<f64>,
    #[serde(default, rename = "returnOnEquityTTM", deserialize_with = "lenient_f64")]
    return_on_equity: Option<f64>,
    // The API has shipped both spellings
    #[serde(
        default,
        rename = "dividendYieldTTM",
        alias = "dividendYielTTM",
        deserialize_with = "lenient_f64"
    )]
    dividend_yield: Option<f64>,
    #[serde(default, rename = "netProfitMarginTTM", deserialize_with = "lenient_f64")]
    net_profit_margin: Option<f64>,
    #[serde(default, rename = "priceToBookRatioTTM", deserialize_with = "lenient_f64")]
    price_to_book: Option<f64>,
}

impl From<RatiosTtmRecord> for RatiosTtm {
    fn from(r: RatiosTtmRecord) -> Self {
        RatiosTtm {
            pe_ratio: r.pe_ratio,
            return_on_equity: r.return_on_equity,
            dividend_yield: r.dividend_yield,
            net_profit_margin: r.net_profit_margin,
            price_to_book: r.price_to_book,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyMetricsRecord {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    calendar_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    roic: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    roe: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    book_value_per_share: Option<f64>,
}

impl StatementRecord for KeyMetricsRecord {
    type Statement = KeyMetrics;

    fn into_statement(self) -> Option<KeyMetrics> {
        Some(KeyMetrics {
            fiscal_year: fiscal_year(self.calendar_year.as_deref(), self.date.as_deref())?,
            roic: self.roic,
            roe: self.roe,
            book_value_per_share: self.book_value_per_share,
        })
    }
}

/// Index constituent (`/sp500_constituent` etc.)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConstituentRecord {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
}

impl ConstituentRecord {
    pub(crate) fn into_listing(self, exchange: &str) -> Listing {
        Listing {
            name: self.name.unwrap_or_else(|| self.symbol.clone()),
            symbol: self.symbol,
            exchange: exchange.to_string(),
        }
    }
}

/// Stock screener row, used to list an exchange
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScreenerRecord {
    symbol: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    exchange_short_name: Option<String>,
}

impl ScreenerRecord {
    pub(crate) fn into_listing(self, exchange: &str) -> Listing {
        Listing {
            name: self.company_name.unwrap_or_else(|| self.symbol.clone()),
            symbol: self.symbol,
            exchange: self.exchange_short_name.unwrap_or_else(|| exchange.to_string()),
        }
    }
}
