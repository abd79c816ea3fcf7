use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use screener_core::{
    BalanceSheet, CashFlowStatement, CompanyProfile, IncomeStatement, KeyMetrics, Listing,
    MarketCatalog, MarketDataProvider, Period, Quote, RatiosTtm, ScreenerError,
};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

mod models;

use models::{
    BalanceSheetRecord, CashFlowRecord, ConstituentRecord, IncomeStatementRecord, KeyMetricsRecord,
    ProfileRecord, QuoteRecord, RatiosTtmRecord, ScreenerRecord, StatementRecord,
};

pub const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com";
const DEFAULT_RATE_LIMIT: usize = 300;
const MAX_429_ATTEMPTS: u32 = 3;
const RETRY_AFTER_429_SECS: u64 = 15;
const EXCHANGE_LISTING_LIMIT: usize = 10_000;
/// Slack added to a computed wait so the freed slot has really expired
const SLOT_MARGIN: Duration = Duration::from_millis(50);

/// Caps outgoing calls at `capacity` within any rolling `period`.
#[derive(Clone)]
struct RateLimiter {
    sent: Arc<Mutex<VecDeque<Instant>>>,
    capacity: usize,
    period: Duration,
}

impl RateLimiter {
    fn new(capacity: usize, period: Duration) -> Self {
        Self {
            sent: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            period,
        }
    }

    /// Book a call at `now`, or return how long until the earliest booking expires.
    fn try_reserve(&self, sent: &mut VecDeque<Instant>, now: Instant) -> Result<(), Duration> {
        while sent.front().is_some_and(|&t| now.duration_since(t) >= self.period) {
            sent.pop_front();
        }
        match sent.front() {
            Some(&earliest) if sent.len() >= self.capacity => {
                Err((earliest + self.period).saturating_duration_since(now) + SLOT_MARGIN)
            }
            _ => {
                sent.push_back(now);
                Ok(())
            }
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut sent = self.sent.lock().await;
                match self.try_reserve(&mut sent, Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            tracing::debug!("FMP request budget spent, pausing {:.1}s", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }
}

fn transport_error(e: reqwest::Error) -> ScreenerError {
    ScreenerError::ProviderError(e.to_string())
}

/// How a market identifier is resolved against the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// Index constituents endpoint, e.g. `sp500_constituent`
    Index { endpoint: &'static str, label: &'static str },
    /// Every actively traded stock on an exchange
    Exchange(String),
}

impl CatalogSource {
    pub fn resolve(market_id: &str) -> Self {
        let id = market_id.trim().to_uppercase();
        let index = |endpoint, label| CatalogSource::Index { endpoint, label };
        match id.as_str() {
            "SP500" | "S&P500" | "S&P 500" => index("sp500_constituent", "SP500"),
            "NASDAQ100" | "NDX" => index("nasdaq_constituent", "NASDAQ100"),
            "DJIA" | "DOW30" | "DOWJONES" => index("dowjones_constituent", "DJIA"),
            _ => CatalogSource::Exchange(id),
        }
    }
}

/// Classify an error message the API returned inside a response body
fn body_error(message: &str) -> ScreenerError {
    let lower = message.to_lowercase();
    let throttled = ["limit reach", "rate limit", "too many requests"]
        .iter()
        .any(|needle| lower.contains(needle));
    if throttled {
        ScreenerError::RateLimitExceeded(message.to_string())
    } else {
        ScreenerError::ProviderError(message.to_string())
    }
}

/// Decode a JSON body, surfacing `{"Error Message": ...}` payloads as errors.
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ScreenerError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ScreenerError::ProviderError(format!("invalid JSON: {}", e)))?;

    if let Some(message) = value
        .get("Error Message")
        .or_else(|| value.get("error"))
        .and_then(|m| m.as_str())
    {
        return Err(body_error(message));
    }

    serde_json::from_value(value).map_err(|e| ScreenerError::InvalidData(e.to_string()))
}

#[derive(Clone)]
pub struct FmpClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
    retry_backoff: Duration,
}

impl FmpClient {
    /// Create a client; the request budget comes from `FMP_RATE_LIMIT` (requests per minute).
    pub fn new(api_key: String) -> Self {
        let rate_limit: usize = std::env::var("FMP_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT);
        Self::with_settings(api_key, DEFAULT_BASE_URL.to_string(), rate_limit)
    }

    pub fn with_settings(api_key: String, base_url: String, rate_limit_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit_per_minute, Duration::from_secs(60)),
            retry_backoff: Duration::from_secs(RETRY_AFTER_429_SECS),
        }
    }

    /// Pause between attempts after an HTTP 429
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Execute under the request budget. A 429 answer is retried after
    /// `retry_backoff`, up to `MAX_429_ATTEMPTS` requests in total.
    async fn send_request(&self, builder: RequestBuilder) -> Result<Response, ScreenerError> {
        let request = builder.build().map_err(transport_error)?;
        let mut attempt = 1;
        loop {
            self.rate_limiter.acquire().await;
            let replay = request.try_clone().ok_or_else(|| {
                ScreenerError::ProviderError("request body cannot be replayed".to_string())
            })?;
            let response = self.client.execute(replay).await.map_err(transport_error)?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            if attempt >= MAX_429_ATTEMPTS {
                return Err(ScreenerError::RateLimitExceeded(format!(
                    "FMP kept answering 429 across {} attempts",
                    attempt
                )));
            }
            tracing::warn!(
                "FMP throttled attempt {}/{}, backing off {:.0}s",
                attempt,
                MAX_429_ATTEMPTS,
                self.retry_backoff.as_secs_f64()
            );
            tokio::time::sleep(self.retry_backoff).await;
            attempt += 1;
        }
    }

    /// GET `{base_url}/api/v3/{path}` and decode the JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ScreenerError> {
        let url = format!("{}/api/v3/{}", self.base_url, path);
        let request = self.client.get(&url).query(query).query(&[("apikey", &self.api_key)]);
        let response = self.send_request(request).await?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(ScreenerError::ProviderError(format!(
                "HTTP {} for {}: check FMP_API_KEY",
                status, path
            )));
        }
        if !status.is_success() {
            return Err(ScreenerError::ProviderError(format!("HTTP {}: {}", status, body)));
        }

        decode(&body)
    }

    /// Fetch per-period statements, dropping rows with no usable fiscal year
    async fn statements<R: StatementRecord>(
        &self,
        endpoint: &str,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<R::Statement>, ScreenerError> {
        let query = [("period", period.as_str().to_string()), ("limit", limit.to_string())];
        let records: Vec<R> = self.get_json(&format!("{}/{}", endpoint, symbol), &query).await?;

        let received = records.len();
        let statements: Vec<R::Statement> =
            records.into_iter().filter_map(R::into_statement).collect();
        if statements.len() < received {
            tracing::debug!(
                "Dropped {} {} rows for {} without a fiscal year",
                received - statements.len(),
                endpoint,
                symbol
            );
        }
        Ok(statements)
    }
}

#[async_trait]
impl MarketDataProvider for FmpClient {
    async fn profile(&self, symbol: &str) -> Result<Option<CompanyProfile>, ScreenerError> {
        let records: Vec<ProfileRecord> =
            self.get_json(&format!("profile/{}", symbol), &[]).await?;
        Ok(records.into_iter().next().map(Into::into))
    }

    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, ScreenerError> {
        let records: Vec<QuoteRecord> = self.get_json(&format!("quote/{}", symbol), &[]).await?;
        Ok(records.into_iter().next().map(Into::into))
    }

    async fn income_statements(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<IncomeStatement>, ScreenerError> {
        self.statements::<IncomeStatementRecord>("income-statement", symbol, period, limit)
            .await
    }

    async fn balance_sheets(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<BalanceSheet>, ScreenerError> {
        self.statements::<BalanceSheetRecord>("balance-sheet-statement", symbol, period, limit)
            .await
    }

    async fn cash_flow_statements(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<CashFlowStatement>, ScreenerError> {
        self.statements::<CashFlowRecord>("cash-flow-statement", symbol, period, limit)
            .await
    }

    async fn ratios_ttm(&self, symbol: &str) -> Result<Option<RatiosTtm>, ScreenerError> {
        let records: Vec<RatiosTtmRecord> =
            self.get_json(&format!("ratios-ttm/{}", symbol), &[]).await?;
        Ok(records.into_iter().next().map(Into::into))
    }

    async fn key_metrics(
        &self,
        symbol: &str,
        period: Period,
        limit: u32,
    ) -> Result<Vec<KeyMetrics>, ScreenerError> {
        self.statements::<KeyMetricsRecord>("key-metrics", symbol, period, limit).await
    }
}

#[async_trait]
impl MarketCatalog for FmpClient {
    async fn constituents(&self, market_id: &str) -> Result<Vec<Listing>, ScreenerError> {
        let listings: Vec<Listing> = match CatalogSource::resolve(market_id) {
            CatalogSource::Index { endpoint, label } => {
                let records: Vec<ConstituentRecord> = self.get_json(endpoint, &[]).await?;
                records.into_iter().map(|r| r.into_listing(label)).collect()
            }
            CatalogSource::Exchange(exchange) => {
                let records: Vec<ScreenerRecord> = self
                    .get_json(
                        "stock-screener",
                        &[
                            ("exchange", exchange.clone()),
                            ("isActivelyTrading", "true".to_string()),
                            ("isEtf", "false".to_string()),
                            ("isFund", "false".to_string()),
                            ("limit", EXCHANGE_LISTING_LIMIT.to_string()),
                        ],
                    )
                    .await?;
                records.into_iter().map(|r| r.into_listing(&exchange)).collect()
            }
        };

        tracing::info!("Resolved market {} to {} listings", market_id, listings.len());
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP endpoint answering every request with one fixed response.
    /// Returns its base URL and a count of requests served.
    async fn fixed_responder(
        status: &'static str,
        body: &'static str,
    ) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), served)
    }

    async fn client_for(status: &'static str, body: &'static str) -> (FmpClient, Arc<AtomicUsize>) {
        let (base_url, served) = fixed_responder(status, body).await;
        let client = FmpClient::with_settings("test-key".to_string(), base_url, 1_000)
            .with_retry_backoff(Duration::from_millis(10));
        (client, served)
    }

    #[test]
    fn test_catalog_source_resolution() {
        assert_eq!(
            CatalogSource::resolve("sp500"),
            CatalogSource::Index { endpoint: "sp500_constituent", label: "SP500" }
        );
        assert_eq!(
            CatalogSource::resolve("Dow30"),
            CatalogSource::Index { endpoint: "dowjones_constituent", label: "DJIA" }
        );
        assert_eq!(CatalogSource::resolve(" xetra "), CatalogSource::Exchange("XETRA".to_string()));
    }

    #[test]
    fn test_decode_error_bodies() {
        let body = r#"{"Error Message": "Limit Reach . Please upgrade your plan"}"#;
        let err = decode::<Vec<serde_json::Value>>(body).unwrap_err();
        assert!(err.is_rate_limit());

        let err = decode::<Vec<serde_json::Value>>(r#"{"Error Message": "Invalid API KEY."}"#)
            .unwrap_err();
        assert!(matches!(err, ScreenerError::ProviderError(_)));

        let err = decode::<Vec<serde_json::Value>>("<html>").unwrap_err();
        assert!(matches!(err, ScreenerError::ProviderError(_)));
    }

    #[test]
    fn test_decode_profile_list() {
        let body = r#"[{"symbol":"KO","companyName":"Coca-Cola","exchangeShortName":"NYSE",
            "mktCap":260000000000}]"#;
        let records: Vec<ProfileRecord> = decode(body).unwrap();
        let profile: CompanyProfile = records.into_iter().next().unwrap().into();
        assert_eq!(profile.exchange.as_deref(), Some("NYSE"));

        let empty: Vec<ProfileRecord> = decode("[]").unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_provider_errors() {
        for status in ["401 Unauthorized", "403 Forbidden"] {
            let (client, served) = client_for(status, r#"{"message":"denied"}"#).await;
            let err = client.quote("KO").await.unwrap_err();
            match err {
                ScreenerError::ProviderError(message) => assert!(message.contains("FMP_API_KEY")),
                other => panic!("unexpected error for {}: {:?}", status, other),
            }
            assert_eq!(served.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let (client, served) = client_for("500 Internal Server Error", "upstream down").await;
        let err = client.profile("KO").await.unwrap_err();
        match err {
            ScreenerError::ProviderError(message) => {
                assert!(message.contains("500"));
                assert!(message.contains("upstream down"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_429_gives_up_after_three_attempts() {
        let (client, served) = client_for("429 Too Many Requests", "{}").await;
        let err = client.ratios_ttm("KO").await.unwrap_err();
        assert!(matches!(err, ScreenerError::RateLimitExceeded(_)));
        assert!(err.is_rate_limit());
        assert_eq!(served.load(Ordering::SeqCst), MAX_429_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_successful_response_is_decoded() {
        let body = r#"[{"calendarYear":"2024","revenue":"1000","netIncome":120},
            {"revenue":900,"netIncome":100}]"#;
        let (client, served) = client_for("200 OK", body).await;
        let statements = client.income_statements("KO", Period::Annual, 10).await.unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].fiscal_year, 2024);
        assert_eq!(statements[0].revenue, Some(1000.0));
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_message_body_on_success_status() {
        let (client, _) = client_for("200 OK", r#"{"Error Message":"Limit Reach ."}"#).await;
        let err = client.quote("KO").await.unwrap_err();
        assert!(err.is_rate_limit());
    }
}
