//! Upstream Poller Lanes
//!
//! One lane per asset-class cadence. Each lane is an independent task: a
//! failure or slow cycle in one lane never blocks another. A lane only runs
//! while this process holds leadership, and re-checks leadership before every
//! publish so a lost lease stops publication mid-cycle.
//!
//! Lane cycle:
//!
//! 1. `targets` = active interest ∩ this lane's classes, minus classes any
//!    strictly-higher-priority lane claims (no duplicate fetches).
//! 2. Empty targets: sleep one cadence, no network call.
//! 3. Otherwise chunk targets and issue bulk fetches concurrently, each under
//!    the lane's per-call timeout (timeout < cadence, so a slow call never
//!    overlaps the next cycle's call to the same upstream). Failed chunks are
//!    logged and skipped; the next tick is the retry.
//! 4. Sleep until the next cadence tick.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{InterestRegistry, QuoteFeed, TickBus};
use crate::domain::symbol::{AssetClass, asset_class};
use crate::infrastructure::metrics;

// =============================================================================
// Lane Configuration
// =============================================================================

/// Static description of one lane.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    /// Lane name for logs and metric labels.
    pub name: &'static str,
    /// Asset classes this lane is responsible for.
    pub classes: Vec<AssetClass>,
    /// Claim priority; lower numbers claim their classes first.
    pub priority: u8,
    /// Fetch cycle interval.
    pub cadence: Duration,
    /// Per-call timeout, strictly less than the cadence.
    pub timeout: Duration,
    /// Maximum symbols per upstream call.
    pub chunk_size: usize,
}

impl LaneConfig {
    /// Whether this lane covers the given class.
    #[must_use]
    pub fn accepts(&self, class: AssetClass) -> bool {
        self.classes.contains(&class)
    }
}

/// Symbols this lane should fetch this cycle.
///
/// A symbol belongs to the highest-priority lane (lowest `priority` value)
/// in `all_lanes` that accepts its class; `lane` only keeps the symbols it
/// wins. Pure, so the exclusion rule is testable without any runtime.
#[must_use]
pub fn lane_targets(active: &[String], lane: &LaneConfig, all_lanes: &[LaneConfig]) -> Vec<String> {
    active
        .iter()
        .filter(|symbol| {
            let class = asset_class(symbol);
            lane.accepts(class)
                && !all_lanes
                    .iter()
                    .any(|other| other.priority < lane.priority && other.accepts(class))
        })
        .cloned()
        .collect()
}

// =============================================================================
// Poller Lane
// =============================================================================

/// A single cadence-driven fetch loop.
pub struct PollerLane {
    config: LaneConfig,
    all_lanes: Vec<LaneConfig>,
    feed: Arc<dyn QuoteFeed>,
    registry: Arc<dyn InterestRegistry>,
    bus: Arc<dyn TickBus>,
    leadership: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl PollerLane {
    /// Create a lane.
    ///
    /// `all_lanes` must contain the configs of every lane in the process
    /// (including this one and the push lane, if enabled) so priority
    /// exclusion sees the full claim table.
    #[must_use]
    pub fn new(
        config: LaneConfig,
        all_lanes: Vec<LaneConfig>,
        feed: Arc<dyn QuoteFeed>,
        registry: Arc<dyn InterestRegistry>,
        bus: Arc<dyn TickBus>,
        leadership: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            all_lanes,
            feed,
            registry,
            bus,
            leadership,
            cancel,
        }
    }

    /// Run the lane loop until cancelled.
    pub async fn run(mut self) {
        tracing::info!(
            lane = self.config.name,
            cadence_ms = self.config.cadence.as_millis(),
            "Poller lane started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !*self.leadership.borrow() {
                // Follower: park until leadership changes instead of spinning.
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    changed = self.leadership.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            self.run_cycle().await;

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.cadence) => {}
            }
        }

        tracing::info!(lane = self.config.name, "Poller lane stopped");
    }

    /// One fetch cycle. Failures are absorbed here; they self-heal on the
    /// next cadence tick.
    async fn run_cycle(&self) {
        let active = self.registry.list_active().await;
        metrics::set_active_symbols(active.len());
        let targets = lane_targets(&active, &self.config, &self.all_lanes);
        if targets.is_empty() {
            return;
        }

        tracing::trace!(lane = self.config.name, symbols = targets.len(), "Lane cycle");

        let fetches = targets
            .chunks(self.config.chunk_size.max(1))
            .map(|chunk| async {
                tokio::time::timeout(self.config.timeout, self.feed.fetch_bulk(chunk)).await
            });

        for outcome in join_all(fetches).await {
            let ticks = match outcome {
                Ok(Ok(ticks)) => ticks,
                Ok(Err(e)) => {
                    metrics::record_fetch_failure(self.config.name);
                    tracing::warn!(lane = self.config.name, error = %e, "Upstream fetch failed");
                    continue;
                }
                Err(_) => {
                    metrics::record_fetch_failure(self.config.name);
                    tracing::warn!(
                        lane = self.config.name,
                        timeout_ms = self.config.timeout.as_millis(),
                        "Upstream fetch timed out"
                    );
                    continue;
                }
            };

            for tick in ticks {
                // Leadership may have been lost mid-cycle; publishing past
                // that point would split-brain the stream.
                if !*self.leadership.borrow() {
                    tracing::debug!(lane = self.config.name, "Leadership lost mid-cycle");
                    return;
                }
                if let Err(e) = self.bus.publish(&tick).await {
                    tracing::warn!(lane = self.config.name, error = %e, "Bus publish failed");
                } else {
                    metrics::record_tick_published(self.config.name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::FeedError;
    use crate::domain::market::Tick;
    use crate::infrastructure::store::memory::{InMemoryInterestRegistry, LocalTickBus};

    fn lane(name: &'static str, classes: Vec<AssetClass>, priority: u8) -> LaneConfig {
        LaneConfig {
            name,
            classes,
            priority,
            cadence: Duration::from_millis(50),
            timeout: Duration::from_millis(40),
            chunk_size: 20,
        }
    }

    #[test]
    fn targets_partition_by_class() {
        let crypto = lane("crypto", vec![AssetClass::Crypto], 1);
        let equities = lane("equities", vec![AssetClass::Equity, AssetClass::Index], 2);
        let all = vec![crypto.clone(), equities.clone()];

        let active = vec![
            "BTC-USD.CC".to_string(),
            "AAPL.US".to_string(),
            "NSEI.INDX".to_string(),
        ];

        assert_eq!(lane_targets(&active, &crypto, &all), vec!["BTC-USD.CC"]);
        assert_eq!(
            lane_targets(&active, &equities, &all),
            vec!["AAPL.US", "NSEI.INDX"]
        );
    }

    #[test]
    fn higher_priority_lane_claims_shared_class() {
        // Push lane owns crypto at priority 0; the crypto poll lane yields.
        let push = lane("push", vec![AssetClass::Crypto], 0);
        let poll = lane("crypto", vec![AssetClass::Crypto], 1);
        let all = vec![push.clone(), poll.clone()];

        let active = vec!["BTC-USD.CC".to_string()];

        assert_eq!(lane_targets(&active, &push, &all), vec!["BTC-USD.CC"]);
        assert!(lane_targets(&active, &poll, &all).is_empty());
    }

    struct StubFeed {
        calls: AtomicUsize,
        requested: Mutex<Vec<String>>,
    }

    impl StubFeed {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QuoteFeed for StubFeed {
        async fn fetch_bulk(&self, symbols: &[String]) -> Result<Vec<Tick>, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().extend_from_slice(symbols);
            Ok(symbols
                .iter()
                .map(|s| Tick::new(s.clone(), 100.0, 1.0, 1.0))
                .collect())
        }
    }

    fn lane_under_test(
        feed: Arc<StubFeed>,
        registry: Arc<dyn InterestRegistry>,
        bus: Arc<dyn TickBus>,
        leader: bool,
    ) -> (PollerLane, watch::Sender<bool>, CancellationToken) {
        let config = lane("crypto", vec![AssetClass::Crypto], 1);
        let all = vec![config.clone()];
        let (leadership_tx, leadership_rx) = watch::channel(leader);
        let cancel = CancellationToken::new();
        let lane = PollerLane::new(
            config,
            all,
            feed,
            registry,
            bus,
            leadership_rx,
            cancel.clone(),
        );
        (lane, leadership_tx, cancel)
    }

    #[tokio::test]
    async fn leader_fetches_touched_symbols_and_publishes() {
        let feed = Arc::new(StubFeed::new());
        let registry: Arc<dyn InterestRegistry> =
            Arc::new(InMemoryInterestRegistry::new(Duration::from_secs(15)));
        let bus_impl = Arc::new(LocalTickBus::with_defaults());
        let bus: Arc<dyn TickBus> = Arc::clone(&bus_impl) as Arc<dyn TickBus>;

        registry.touch("BTC-USD.CC").await;
        registry.touch("AAPL.US").await; // different class - not this lane's
        let mut rx = bus.subscribe();

        let (lane, _leadership, cancel) =
            lane_under_test(Arc::clone(&feed), registry, Arc::clone(&bus), true);
        tokio::spawn(lane.run());

        let tick = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("tick published")
            .expect("bus open");
        assert_eq!(tick.symbol, "BTC-USD.CC");
        assert_eq!(feed.requested.lock().clone(), vec!["BTC-USD.CC"]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn follower_never_fetches() {
        let feed = Arc::new(StubFeed::new());
        let registry: Arc<dyn InterestRegistry> =
            Arc::new(InMemoryInterestRegistry::new(Duration::from_secs(15)));
        let bus: Arc<dyn TickBus> = Arc::new(LocalTickBus::with_defaults());

        registry.touch("BTC-USD.CC").await;

        let (lane, _leadership, cancel) =
            lane_under_test(Arc::clone(&feed), registry, bus, false);
        tokio::spawn(lane.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn empty_active_set_skips_the_network() {
        let feed = Arc::new(StubFeed::new());
        let registry: Arc<dyn InterestRegistry> =
            Arc::new(InMemoryInterestRegistry::new(Duration::from_secs(15)));
        let bus: Arc<dyn TickBus> = Arc::new(LocalTickBus::with_defaults());

        let (lane, _leadership, cancel) =
            lane_under_test(Arc::clone(&feed), registry, bus, true);
        tokio::spawn(lane.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
        cancel.cancel();
    }
}
