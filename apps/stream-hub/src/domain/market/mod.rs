//! Market Data Types
//!
//! Core domain types for the hub: the `Tick` price update that flows from
//! poller lanes through the data bus to subscribers, and the `Candle` OHLCV
//! bar consumed by the resampler.
//!
//! Ticks are ephemeral - only the most recent tick per symbol matters to a
//! consumer and nothing here is ever persisted.

use serde::{Deserialize, Serialize};

// =============================================================================
// Tick
// =============================================================================

/// One price update for a single instrument.
///
/// Serializes to the client wire format: camelCase fields, `volume` and
/// `timestamp` omitted when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    /// Canonical symbol this update belongs to.
    pub symbol: String,
    /// Last traded / quoted price.
    pub price: f64,
    /// Absolute change versus the previous close.
    pub change: f64,
    /// Percent change versus the previous close.
    pub percent_change: f64,
    /// Traded volume, when the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Provider-reported epoch seconds, or a wall-clock fallback set by the
    /// lane that produced the tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Tick {
    /// Create a tick with no volume or timestamp.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, change: f64, percent_change: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change,
            percent_change,
            volume: None,
            timestamp: None,
        }
    }
}

// =============================================================================
// Candle
// =============================================================================

/// One OHLCV bar.
///
/// `time` is the bucket-start in epoch seconds. A time-ordered slice of
/// candles forms a series; series are immutable inputs to the resampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket-start, epoch seconds.
    pub time: i64,
    /// First trade price in the bucket.
    pub open: f64,
    /// Highest trade price in the bucket.
    pub high: f64,
    /// Lowest trade price in the bucket.
    pub low: f64,
    /// Last trade price in the bucket.
    pub close: f64,
    /// Total traded volume in the bucket.
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_serializes_camel_case() {
        let tick = Tick {
            symbol: "BTC-USD.CC".to_string(),
            price: 64_250.5,
            change: 120.5,
            percent_change: 0.19,
            volume: Some(1234.0),
            timestamp: Some(1_700_000_000),
        };

        let json = serde_json::to_value(&tick).unwrap();
        assert_eq!(json["symbol"], "BTC-USD.CC");
        assert_eq!(json["percentChange"], 0.19);
        assert_eq!(json["volume"], 1234.0);
        assert_eq!(json["timestamp"], 1_700_000_000);
    }

    #[test]
    fn tick_omits_absent_optionals() {
        let tick = Tick::new("AAPL.US", 190.0, 1.5, 0.8);
        let json = serde_json::to_value(&tick).unwrap();
        assert!(json.get("volume").is_none());
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn tick_round_trips() {
        let tick = Tick {
            symbol: "NSEI.INDX".to_string(),
            price: 24_000.0,
            change: -50.0,
            percent_change: -0.21,
            volume: None,
            timestamp: Some(1_700_000_000),
        };
        let json = serde_json::to_string(&tick).unwrap();
        let back: Tick = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tick);
    }
}
