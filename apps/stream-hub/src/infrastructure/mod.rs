//! Infrastructure layer - adapters binding the ports to the outside world.

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics.
pub mod metrics;

/// Client-facing HTTP/WebSocket server.
pub mod server;

/// Store backends: Redis and the in-process fallback.
pub mod store;

/// Tracing setup.
pub mod telemetry;

/// Upstream feed adapters.
pub mod upstream;
