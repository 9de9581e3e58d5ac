//! Tracing Setup
//!
//! Structured logging via `tracing` with an env-filter layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard filter directives (default: `stream_hub=info,info`)

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "stream_hub=info,info";

/// Install the global tracing subscriber.
///
/// Safe to call once at startup; later calls are ignored because a global
/// subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
