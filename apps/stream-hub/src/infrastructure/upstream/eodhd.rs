//! EODHD Quote Client
//!
//! Bulk real-time adapter for equities, indices, and crypto. One request
//! carries a whole lane chunk: the first code rides the path, the rest ride
//! the `s` query parameter, and the response is a single object for one
//! symbol or an array for many.
//!
//! The provider is lossy in two ways this adapter absorbs:
//!
//! - Numeric fields sometimes arrive as the string `"NA"`; those entries
//!   keep whatever fields did parse and default the rest.
//! - `close` is sometimes `0` for a halted or thin instrument. A zero price
//!   would render every client's chart as a 100% crash, so the tick falls
//!   back to `previousClose` with zero change.

use serde::Deserialize;

use crate::application::ports::FeedError;
use crate::domain::market::Tick;
use crate::domain::symbol::SymbolMap;

const DEFAULT_BASE_URL: &str = "https://eodhd.com/api/real-time";

/// EODHD bulk real-time quote client.
pub struct EodhdClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

/// One quote entry as the provider sends it. Every numeric field tolerates
/// the `"NA"` string form.
#[derive(Debug, Deserialize)]
struct RawQuote {
    code: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    close: Option<f64>,
    #[serde(default, rename = "previousClose", deserialize_with = "lenient_f64")]
    previous_close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    change_p: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    timestamp: Option<i64>,
}

/// Single-symbol requests answer with a bare object, multi-symbol with an
/// array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuoteResponse {
    One(RawQuote),
    Many(Vec<RawQuote>),
}

impl QuoteResponse {
    fn into_vec(self) -> Vec<RawQuote> {
        match self {
            Self::One(quote) => vec![quote],
            Self::Many(quotes) => quotes,
        }
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_i64())
}

impl EodhdClient {
    /// Create a client against the production endpoint.
    #[must_use]
    pub fn new(http: reqwest::Client, api_token: String) -> Self {
        Self::with_base_url(http, api_token, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against an explicit base URL.
    #[must_use]
    pub fn with_base_url(http: reqwest::Client, api_token: String, base_url: String) -> Self {
        Self {
            http,
            base_url,
            api_token,
        }
    }

    /// Fetch one chunk of canonical symbols.
    ///
    /// Entries the provider omits, returns under an unknown code, or garbles
    /// beyond a price are dropped individually; the rest of the chunk still
    /// comes back.
    ///
    /// # Errors
    ///
    /// `FeedError` on transport failure, non-success status, or an
    /// unparseable body.
    pub async fn fetch_bulk(&self, symbols: &[String]) -> Result<Vec<Tick>, FeedError> {
        // EODHD codes are the canonical symbols themselves; the map exists
        // because responses may echo the code back without its suffix.
        let map = SymbolMap::build(symbols, |canonical| canonical.to_string());
        let mut codes = map.codes();
        codes.sort();
        let Some((first, rest)) = codes.split_first() else {
            return Ok(Vec::new());
        };

        let url = format!("{}/{}", self.base_url, first);
        let mut request = self
            .http
            .get(&url)
            .query(&[("api_token", self.api_token.as_str()), ("fmt", "json")]);
        if !rest.is_empty() {
            request = request.query(&[("s", rest.join(","))]);
        }

        let response = request
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

        let quotes: QuoteResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Parse(e.to_string()))?;

        Ok(quotes
            .into_vec()
            .into_iter()
            .filter_map(|quote| to_tick(&map, quote))
            .collect())
    }
}

#[async_trait::async_trait]
impl crate::application::ports::QuoteFeed for EodhdClient {
    async fn fetch_bulk(&self, symbols: &[String]) -> Result<Vec<Tick>, FeedError> {
        Self::fetch_bulk(self, symbols).await
    }
}

/// Resolve one raw quote against the batch map and repair zero prices.
fn to_tick(map: &SymbolMap, quote: RawQuote) -> Option<Tick> {
    let canonical = match map.canonical(&quote.code) {
        Some(canonical) => canonical.to_string(),
        None => {
            tracing::debug!(code = %quote.code, "Quote for unrequested code dropped");
            return None;
        }
    };

    let close = quote.close.unwrap_or(0.0);
    let (price, change, percent_change) = if close > 0.0 {
        (
            close,
            quote.change.unwrap_or(0.0),
            quote.change_p.unwrap_or(0.0),
        )
    } else {
        // Zero-price repair: hold the previous close flat rather than
        // reporting a total loss.
        let previous = quote.previous_close.filter(|p| *p > 0.0)?;
        tracing::debug!(symbol = %canonical, "Zero price repaired from previous close");
        (previous, 0.0, 0.0)
    };

    Some(Tick {
        symbol: canonical,
        price,
        change,
        percent_change,
        volume: quote.volume,
        timestamp: quote.timestamp,
    })
}
