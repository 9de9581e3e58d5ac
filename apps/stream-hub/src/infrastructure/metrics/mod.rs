//! Prometheus Metrics Module
//!
//! Exposes hub metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: published to the bus, delivered to clients, dropped
//! - **Fetches**: upstream failures per lane
//! - **State**: leadership, open connections, active symbols
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the hub server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            #[allow(clippy::expect_used)]
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_hub_ticks_published_total",
        "Ticks published to the data bus, by lane"
    );
    describe_counter!(
        "stream_hub_ticks_delivered_total",
        "Tick frames delivered to WebSocket clients"
    );
    describe_counter!(
        "stream_hub_ticks_dropped_total",
        "Tick frames dropped for slow WebSocket clients"
    );
    describe_counter!(
        "stream_hub_bus_publishes_total",
        "Publishes to the shared backend channel"
    );
    describe_counter!(
        "stream_hub_fetch_failures_total",
        "Failed or timed-out upstream fetches, by lane"
    );

    describe_gauge!(
        "stream_hub_leader",
        "1 while this process holds the polling lease"
    );
    describe_gauge!(
        "stream_hub_open_connections",
        "Open WebSocket client connections"
    );
    describe_gauge!(
        "stream_hub_active_symbols",
        "Symbols with unexpired interest"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a tick published to the bus by the named lane.
pub fn record_tick_published(lane: &'static str) {
    counter!("stream_hub_ticks_published_total", "lane" => lane).increment(1);
}

/// Record a tick frame handed to a client connection.
pub fn record_tick_delivered() {
    counter!("stream_hub_ticks_delivered_total").increment(1);
}

/// Record a tick frame dropped for a slow client.
pub fn record_tick_dropped() {
    counter!("stream_hub_ticks_dropped_total").increment(1);
}

/// Record a publish to the shared backend channel.
pub fn record_bus_publish() {
    counter!("stream_hub_bus_publishes_total").increment(1);
}

/// Record a failed or timed-out upstream fetch.
pub fn record_fetch_failure(lane: &'static str) {
    counter!("stream_hub_fetch_failures_total", "lane" => lane).increment(1);
}

/// Set the leadership gauge.
pub fn set_leader(leader: bool) {
    gauge!("stream_hub_leader").set(if leader { 1.0 } else { 0.0 });
}

/// Set the open-connection gauge.
pub fn set_open_connections(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("stream_hub_open_connections").set(count as f64);
}

/// Set the active-symbol gauge.
pub fn set_active_symbols(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("stream_hub_active_symbols").set(count as f64);
}
