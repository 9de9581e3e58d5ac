//! Domain layer - pure types and math with no I/O dependencies.

/// Market data types: ticks and candles.
pub mod market;

/// Chart resampling.
pub mod resample;

/// Symbol normalization and provider code mapping.
pub mod symbol;
