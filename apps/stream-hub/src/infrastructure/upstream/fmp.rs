//! FMP Quote Client
//!
//! Financial Modeling Prep adapter for the commodity lane. FMP quotes
//! commodity proxy pairs (`XAUUSD`, `CLUSD`, ...) that EODHD has no
//! real-time coverage for; the canonical `.CMD` suffix is ours, so it is
//! stripped on the way out and restored via the batch map on the way back.

use serde::Deserialize;

use crate::application::ports::FeedError;
use crate::domain::market::Tick;
use crate::domain::symbol::SymbolMap;

const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// FMP bulk quote client.
pub struct FmpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    symbol: String,
    price: Option<f64>,
    change: Option<f64>,
    #[serde(rename = "changesPercentage")]
    changes_percentage: Option<f64>,
    volume: Option<f64>,
    timestamp: Option<i64>,
}

impl FmpClient {
    /// Create a client against the production endpoint.
    #[must_use]
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self::with_base_url(http, api_key, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against an explicit base URL.
    #[must_use]
    pub fn with_base_url(http: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// Fetch one chunk of canonical `.CMD` symbols.
    ///
    /// # Errors
    ///
    /// `FeedError` on transport failure, non-success status, or an
    /// unparseable body.
    pub async fn fetch_bulk(&self, symbols: &[String]) -> Result<Vec<Tick>, FeedError> {
        let map = SymbolMap::build(symbols, fmp_code);
        if map.is_empty() {
            return Ok(Vec::new());
        }
        let mut codes = map.codes();
        codes.sort();

        let url = format!("{}/quote/{}", self.base_url, codes.join(","));
        let response = self
            .http
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        let quotes: Vec<RawQuote> = response
            .json()
            .await
            .map_err(|e| FeedError::Parse(e.to_string()))?;

        Ok(quotes
            .into_iter()
            .filter_map(|quote| to_tick(&map, quote))
            .collect())
    }
}

#[async_trait::async_trait]
impl crate::application::ports::QuoteFeed for FmpClient {
    async fn fetch_bulk(&self, symbols: &[String]) -> Result<Vec<Tick>, FeedError> {
        Self::fetch_bulk(self, symbols).await
    }
}

/// FMP speaks the proxy pair without our class suffix.
fn fmp_code(canonical: &str) -> String {
    canonical
        .strip_suffix(".CMD")
        .unwrap_or(canonical)
        .to_string()
}

fn to_tick(map: &SymbolMap, quote: RawQuote) -> Option<Tick> {
    let canonical = map.canonical(&quote.symbol)?.to_string();
    let price = quote.price.filter(|p| *p > 0.0)?;

    Some(Tick {
        symbol: canonical,
        price,
        change: quote.change.unwrap_or(0.0),
        percent_change: quote.changes_percentage.unwrap_or(0.0),
        volume: quote.volume,
        timestamp: quote.timestamp,
    })
}
