//! Port Interfaces
//!
//! Contracts between the hub's services and the outside world, following the
//! Hexagonal Architecture pattern. Each port has two adapter families:
//!
//! - `InterestRegistry`, `LeaderLock`, `TickBus`: one Redis-backed adapter
//!   and one in-process fallback adapter (`infrastructure::store`). Which
//!   family is active is decided once at startup by a connectivity probe;
//!   nothing above this seam knows which mode is running.
//! - `QuoteFeed`: one adapter per upstream quote provider
//!   (`infrastructure::upstream`).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::market::Tick;

// =============================================================================
// Errors
// =============================================================================

/// Failure talking to the shared backing store.
///
/// Store errors never cross a component boundary the client can observe;
/// callers degrade (skip a cycle, stay Follower) and retry on their own
/// cadence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or dropped the operation.
    #[error("backend error: {0}")]
    Backend(String),
    /// Payload on the bus could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Failure fetching quotes from an upstream provider.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),
    /// Provider answered with a non-success status.
    #[error("upstream status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// Response body could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

// =============================================================================
// Active-Interest Registry
// =============================================================================

/// TTL set of symbols that currently have at least one live subscriber.
///
/// A symbol absent from `list_active` must not be fetched by any lane; a
/// symbol that stops being touched drops out within one TTL window.
#[async_trait]
pub trait InterestRegistry: Send + Sync {
    /// Insert the symbol or refresh its expiry to now + TTL. Idempotent.
    async fn touch(&self, symbol: &str);

    /// All unexpired symbols. Lazily evicts expired entries as a side
    /// effect; no separate reaper is required.
    async fn list_active(&self) -> Vec<String>;
}

// =============================================================================
// Leader Lock
// =============================================================================

/// Distributed mutual exclusion: at most one unexpired holder at any instant.
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Atomically claim the lock if it is unheld, expired, or already held
    /// by `holder`. Returns true iff `holder` owns it through now + `ttl`.
    ///
    /// Backend failures read as "not acquired"; they must not panic or hang
    /// past the operation's own short timeout.
    async fn try_acquire_or_extend(&self, holder: &str, ttl: Duration) -> bool;
}

// =============================================================================
// Tick Bus
// =============================================================================

/// Broadcast medium between the leader's lanes and every process's fan-out.
///
/// Delivery is at-least-once, in publish order per symbol, to subscribers
/// that were live at publish time. No durability: a late subscriber never
/// sees earlier ticks.
#[async_trait]
pub trait TickBus: Send + Sync {
    /// Publish a tick to every process's subscribers.
    async fn publish(&self, tick: &Tick) -> Result<(), StoreError>;

    /// New receiver over this process's view of the bus.
    fn subscribe(&self) -> broadcast::Receiver<Tick>;
}

// =============================================================================
// Quote Feed
// =============================================================================

/// Bulk real-time quote fetch for one asset-class lane.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Fetch the latest tick for each canonical symbol in one upstream call.
    ///
    /// Best-effort partial: symbols the provider omits or garbles are simply
    /// missing from the result, never an error for the whole batch.
    async fn fetch_bulk(&self, symbols: &[String]) -> Result<Vec<Tick>, FeedError>;
}
