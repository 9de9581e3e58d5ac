#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Stream Hub - Real-Time Market Data Distribution
//!
//! A WebSocket hub that fans price updates for a working set of
//! instruments out to many subscribers while keeping exactly one process
//! polling the upstream quote feeds. Which symbols are worth polling is
//! driven entirely by who is connected: interest decays on a TTL, so the
//! upstream request volume tracks the audience.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and math with no I/O
//!   - `market`: Tick and Candle types
//!   - `symbol`: Normalization, asset classes, provider code mapping
//!   - `resample`: Deterministic OHLCV aggregation
//!
//! - **Application**: Port definitions and services
//!   - `ports`: Interest registry, leader lock, tick bus, quote feed
//!   - `services`: Leader election, cadence-driven poller lanes
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `store`: Redis adapters plus the in-process fallback
//!   - `upstream`: EODHD / FMP polling clients, push lane
//!   - `server`: Axum WebSocket fan-out and health endpoints
//!   - `config`: Environment-driven settings
//!   - `telemetry` / `metrics`: Tracing and Prometheus
//!
//! # Data Flow
//!
//! ```text
//! EODHD ──┐ (leader only)
//!         ├────► Poller lanes ────► Tick bus ────► Fan-out ──► Client 1
//! FMP  ───┤                     (redis/local)       task   ──► Client 2
//! Push ───┘                                                 ──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - pure types and math with no external dependencies.
pub mod domain;

/// Application layer - ports and services.
pub mod application;

/// Infrastructure layer - adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Candle, Tick};
pub use domain::resample::{Timeframe, resample};
pub use domain::symbol::{AssetClass, SymbolMap, asset_class, normalize};

// Ports and services
pub use application::ports::{FeedError, InterestRegistry, LeaderLock, QuoteFeed, StoreError, TickBus};
pub use application::services::{ElectionConfig, LaneConfig, LeaderElector, PollerLane, lane_targets};

// Infrastructure config
pub use infrastructure::config::{ApiKey, ConfigError, HubConfig};

// Store backend selection
pub use infrastructure::store::{Backend, BackendMode};

// Server (for integration tests)
pub use infrastructure::server::{AppState, ConnectionRegistry, HubServer, ServerError};

// Metrics and telemetry
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::init as init_telemetry;
