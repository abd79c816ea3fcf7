use std::collections::HashMap;

use async_trait::async_trait;
use screener_core::{Listing, MarketCatalog, ScreenerError};

const DJIA: [(&str, &str); 30] = [
    ("AAPL", "Apple Inc."),
    ("AMGN", "Amgen Inc."),
    ("AMZN", "Amazon.com, Inc."),
    ("AXP", "American Express Company"),
    ("BA", "The Boeing Company"),
    ("CAT", "Caterpillar Inc."),
    ("CRM", "Salesforce, Inc."),
    ("CSCO", "Cisco Systems, Inc."),
    ("CVX", "Chevron Corporation"),
    ("DIS", "The Walt Disney Company"),
    ("GS", "The Goldman Sachs Group, Inc."),
    ("HD", "The Home Depot, Inc."),
    ("HON", "Honeywell International Inc."),
    ("IBM", "International Business Machines Corporation"),
    ("JNJ", "Johnson & Johnson"),
    ("JPM", "JPMorgan Chase & Co."),
    ("KO", "The Coca-Cola Company"),
    ("MCD", "McDonald's Corporation"),
    ("MMM", "3M Company"),
    ("MRK", "Merck & Co., Inc."),
    ("MSFT", "Microsoft Corporation"),
    ("NKE", "NIKE, Inc."),
    ("NVDA", "NVIDIA Corporation"),
    ("PG", "The Procter & Gamble Company"),
    ("SHW", "The Sherwin-Williams Company"),
    ("TRV", "The Travelers Companies, Inc."),
    ("UNH", "UnitedHealth Group Incorporated"),
    ("V", "Visa Inc."),
    ("VZ", "Verizon Communications Inc."),
    ("WMT", "Walmart Inc."),
];

/// In-memory market catalog.
///
/// Ships with the Dow Jones Industrial Average under `DJIA`; other markets are
/// registered explicitly. Useful offline and as a test double for a remote catalog.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    markets: HashMap<String, Vec<Listing>>,
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticCatalog {
    pub fn new() -> Self {
        let djia = DJIA
            .iter()
            .map(|(symbol, name)| Listing {
                symbol: symbol.to_string(),
                name: name.to_string(),
                exchange: "NYSE".to_string(),
            })
            .collect();
        Self::empty().with_market("DJIA", djia)
    }

    pub fn empty() -> Self {
        Self { markets: HashMap::new() }
    }

    pub fn with_market(mut self, market_id: &str, listings: Vec<Listing>) -> Self {
        self.markets.insert(market_id.trim().to_uppercase(), listings);
        self
    }

    /// Register a market from bare symbols; names are left empty
    pub fn with_symbols(self, market_id: &str, symbols: &[&str]) -> Self {
        let listings = symbols
            .iter()
            .map(|s| Listing {
                symbol: s.trim().to_uppercase(),
                name: String::new(),
                exchange: market_id.trim().to_uppercase(),
            })
            .collect();
        self.with_market(market_id, listings)
    }

    pub fn market_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.markets.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MarketCatalog for StaticCatalog {
    async fn constituents(&self, market_id: &str) -> Result<Vec<Listing>, ScreenerError> {
        self.markets
            .get(&market_id.trim().to_uppercase())
            .cloned()
            .ok_or_else(|| ScreenerError::InvalidData(format!("Unknown market: {}", market_id)))
    }
}
