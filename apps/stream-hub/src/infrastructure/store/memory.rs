//! In-Process Store Adapters
//!
//! Fallback implementations of the store ports for single-process mode,
//! selected when no shared backend is reachable at startup. Same contracts
//! as the Redis adapters, scoped to this process: the TTL semantics of the
//! interest registry and leader lock are identical, only the sharing is
//! gone. With no other contender, the local lock makes this process leader
//! on the first election pass.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::application::ports::{InterestRegistry, LeaderLock, StoreError, TickBus};
use crate::domain::market::Tick;

/// Broadcast capacity before slow subscribers start losing ticks.
const DEFAULT_BUS_CAPACITY: usize = 1_024;

// =============================================================================
// Interest Registry
// =============================================================================

/// TTL symbol set held in a process-local map.
///
/// Expired entries are evicted lazily inside `list_active`; there is no
/// background reaper.
pub struct InMemoryInterestRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryInterestRegistry {
    /// Create a registry whose entries expire `ttl` after their last touch.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl InterestRegistry for InMemoryInterestRegistry {
    async fn touch(&self, symbol: &str) {
        self.entries
            .lock()
            .insert(symbol.to_string(), Instant::now() + self.ttl);
    }

    async fn list_active(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, expiry| *expiry > now);
        entries.keys().cloned().collect()
    }
}

// =============================================================================
// Leader Lock
// =============================================================================

/// Process-local lock with the same claim-if-absent-expired-or-mine rule as
/// the shared one.
pub struct InMemoryLeaderLock {
    state: Mutex<Option<(String, Instant)>>,
}

impl InMemoryLeaderLock {
    /// Create an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

impl Default for InMemoryLeaderLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaderLock for InMemoryLeaderLock {
    async fn try_acquire_or_extend(&self, holder: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        let claimable = match state.as_ref() {
            None => true,
            Some((current, expiry)) => current == holder || *expiry <= now,
        };
        if claimable {
            *state = Some((holder.to_string(), now + ttl));
        }
        claimable
    }
}

// =============================================================================
// Tick Bus
// =============================================================================

/// Plain broadcast-channel bus for single-process mode.
pub struct LocalTickBus {
    sender: broadcast::Sender<Tick>,
}

impl LocalTickBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a bus with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[async_trait]
impl TickBus for LocalTickBus {
    async fn publish(&self, tick: &Tick) -> Result<(), StoreError> {
        // A send error only means zero subscribers, which is not a failure.
        let _ = self.sender.send(tick.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_then_list_round_trips() {
        let registry = InMemoryInterestRegistry::new(Duration::from_secs(15));
        registry.touch("AAPL.US").await;
        registry.touch("AAPL.US").await;
        registry.touch("BTC-USD.CC").await;

        let mut active = registry.list_active().await;
        active.sort();
        assert_eq!(active, vec!["AAPL.US", "BTC-USD.CC"]);
    }

    #[tokio::test]
    async fn untouched_symbols_expire() {
        let registry = InMemoryInterestRegistry::new(Duration::from_millis(50));
        registry.touch("AAPL.US").await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        registry.touch("TSLA.US").await;

        assert_eq!(registry.list_active().await, vec!["TSLA.US"]);
    }

    #[tokio::test]
    async fn lock_is_mutually_exclusive_until_expiry() {
        let lock = InMemoryLeaderLock::new();
        let ttl = Duration::from_millis(100);

        assert!(lock.try_acquire_or_extend("a", ttl).await);
        assert!(!lock.try_acquire_or_extend("b", ttl).await);
        // Holder renews its own lease freely.
        assert!(lock.try_acquire_or_extend("a", ttl).await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(lock.try_acquire_or_extend("b", ttl).await);
        assert!(!lock.try_acquire_or_extend("a", ttl).await);
    }

    #[tokio::test]
    async fn bus_fans_out_to_every_subscriber() {
        let bus = LocalTickBus::with_defaults();
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        let tick = Tick::new("AAPL.US".to_string(), 189.5, 1.2, 0.64);
        bus.publish(&tick).await.expect("publish");

        assert_eq!(rx_a.recv().await.expect("a").symbol, "AAPL.US");
        assert_eq!(rx_b.recv().await.expect("b").symbol, "AAPL.US");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = LocalTickBus::with_defaults();
        let tick = Tick::new("AAPL.US".to_string(), 189.5, 1.2, 0.64);
        assert!(bus.publish(&tick).await.is_ok());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_ticks() {
        let bus = LocalTickBus::with_defaults();
        let tick = Tick::new("AAPL.US".to_string(), 189.5, 1.2, 0.64);
        bus.publish(&tick).await.expect("publish");

        let mut rx = bus.subscribe();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
