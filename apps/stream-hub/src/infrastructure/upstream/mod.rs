//! Upstream Feed Adapters
//!
//! `QuoteFeed` implementations for the polling lanes plus the optional
//! push lane. All HTTP clients share one connection pool.

use std::time::Duration;

/// EODHD bulk real-time client (equities, indices, crypto).
pub mod eodhd;

/// FMP bulk quote client (commodities).
pub mod fmp;

/// Push-based crypto lane.
pub mod push;

pub use eodhd::EodhdClient;
pub use fmp::FmpClient;
pub use push::{BinancePushLane, PushLaneConfig};

/// Shared HTTP client for every polling adapter.
///
/// Per-call deadlines come from each lane's `timeout`; the client-level
/// timeout here is only a hard upper bound against stuck connections.
///
/// # Errors
///
/// Returns the underlying builder error if TLS setup fails.
pub fn http_client(hard_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(hard_timeout)
        .user_agent(concat!("stream-hub/", env!("CARGO_PKG_VERSION")))
        .build()
}
