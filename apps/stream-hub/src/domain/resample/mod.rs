//! Chart Resampling
//!
//! Deterministic aggregation of a base-resolution OHLCV series into a coarser
//! series. One base-resolution fetch can serve every higher timeframe a chart
//! asks for, so upstream history endpoints are hit once per symbol instead of
//! once per timeframe.
//!
//! The resampler performs no I/O and never reads the clock: identical input
//! always yields identical output, and the input series is never mutated.

use std::collections::BTreeMap;

use crate::domain::market::Candle;

// =============================================================================
// Timeframe
// =============================================================================

/// Chart timeframes a client can request, mapped to bucket widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    /// Five minutes.
    M5,
    /// Fifteen minutes.
    M15,
    /// One hour.
    H1,
    /// Four hours.
    H4,
    /// One day.
    D1,
    /// One week.
    W1,
}

impl Timeframe {
    /// Bucket width in seconds.
    #[must_use]
    pub const fn bucket_secs(self) -> i64 {
        match self {
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
            Self::W1 => 604_800,
        }
    }

    /// Parse a chart range token ("5M", "1H", ...). Unknown tokens get the
    /// daily timeframe.
    #[must_use]
    pub fn from_range(range: &str) -> Self {
        match range.to_uppercase().as_str() {
            "5M" => Self::M5,
            "15M" => Self::M15,
            "1H" => Self::H1,
            "4H" => Self::H4,
            "1W" => Self::W1,
            _ => Self::D1,
        }
    }
}

// =============================================================================
// Resampling
// =============================================================================

#[derive(Debug)]
struct Bucket {
    first_time: i64,
    last_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Aggregate `base` candles into buckets of `bucket_secs` seconds.
///
/// Each candle lands in the window `floor(time / bucket_secs) * bucket_secs`.
/// Within a bucket: `open` is the earliest candle's open, `close` the latest
/// candle's close, `high`/`low` the extrema, `volume` the sum. Windows with
/// no base candles (market-closed gaps) are omitted, never synthesized.
///
/// Output is ordered by bucket time regardless of input order.
#[must_use]
pub fn resample(base: &[Candle], bucket_secs: i64) -> Vec<Candle> {
    if bucket_secs <= 0 {
        return base.to_vec();
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();

    for candle in base {
        let start = candle.time.div_euclid(bucket_secs) * bucket_secs;

        match buckets.get_mut(&start) {
            Some(bucket) => {
                if candle.time < bucket.first_time {
                    bucket.first_time = candle.time;
                    bucket.open = candle.open;
                }
                if candle.time >= bucket.last_time {
                    bucket.last_time = candle.time;
                    bucket.close = candle.close;
                }
                bucket.high = bucket.high.max(candle.high);
                bucket.low = bucket.low.min(candle.low);
                bucket.volume += candle.volume;
            }
            None => {
                buckets.insert(
                    start,
                    Bucket {
                        first_time: candle.time,
                        last_time: candle.time,
                        open: candle.open,
                        high: candle.high,
                        low: candle.low,
                        close: candle.close,
                        volume: candle.volume,
                    },
                );
            }
        }
    }

    buckets
        .into_iter()
        .map(|(time, b)| Candle {
            time,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn five_base_candles_collapse_to_one() {
        // Closes 10,11,9,12,13 at 60s spacing with 100 volume each.
        let base = vec![
            candle(600, 10.5, 11.0, 10.0, 10.0, 100.0),
            candle(660, 10.0, 11.5, 9.8, 11.0, 100.0),
            candle(720, 11.0, 11.2, 8.9, 9.0, 100.0),
            candle(780, 9.0, 12.4, 9.0, 12.0, 100.0),
            candle(840, 12.0, 13.1, 11.9, 13.0, 100.0),
        ];

        let out = resample(&base, 300);

        assert_eq!(out.len(), 1);
        let bar = out[0];
        assert_eq!(bar.time, 600);
        assert!((bar.open - 10.5).abs() < f64::EPSILON);
        assert!((bar.close - 13.0).abs() < f64::EPSILON);
        assert!((bar.high - 13.1).abs() < f64::EPSILON);
        assert!((bar.low - 8.9).abs() < f64::EPSILON);
        assert!((bar.volume - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gaps_are_omitted_not_synthesized() {
        // Two candles a full empty bucket apart.
        let base = vec![
            candle(0, 1.0, 1.0, 1.0, 1.0, 10.0),
            candle(600, 2.0, 2.0, 2.0, 2.0, 20.0),
        ];

        let out = resample(&base, 300);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].time, 0);
        assert_eq!(out[1].time, 600);
    }

    #[test]
    fn bucket_start_is_floored() {
        let base = vec![candle(5_430, 1.0, 2.0, 0.5, 1.5, 7.0)];
        let out = resample(&base, 3_600);
        assert_eq!(out[0].time, 3_600);
    }

    #[test]
    fn deterministic_and_input_untouched() {
        let base = vec![
            candle(0, 1.0, 3.0, 0.5, 2.0, 10.0),
            candle(60, 2.0, 4.0, 1.5, 3.0, 20.0),
        ];
        let snapshot = base.clone();

        let a = resample(&base, 300);
        let b = resample(&base, 300);

        assert_eq!(a, b);
        assert_eq!(base, snapshot);
    }

    #[test]
    fn empty_series_yields_empty() {
        assert!(resample(&[], 300).is_empty());
    }

    #[test]
    fn negative_times_bucket_correctly() {
        // div_euclid keeps pre-epoch candles in their own floored window.
        let base = vec![candle(-10, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let out = resample(&base, 300);
        assert_eq!(out[0].time, -300);
    }

    #[test]
    fn timeframe_mapping() {
        assert_eq!(Timeframe::from_range("5m").bucket_secs(), 300);
        assert_eq!(Timeframe::from_range("4H").bucket_secs(), 14_400);
        assert_eq!(Timeframe::from_range("anything"), Timeframe::D1);
    }
}
