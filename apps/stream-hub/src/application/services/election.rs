//! Leader Election
//!
//! Explicit Follower/Leader state machine over the `LeaderLock` port. One
//! long-lived task per process; leadership is published on a `watch` channel
//! so poller lanes and the push lane can gate on it without touching the
//! lock themselves.
//!
//! - Leader renews every `ttl / 3`, well before expiry.
//! - A failed renewal (contested, expired, backend down) transitions back to
//!   Follower immediately; lanes observe the watch flip and stop.
//! - No step-down message exists. Correctness rests on TTL expiry alone, so
//!   a crashed leader and a graceful one look identical to other
//!   participants, and failover is bounded by the TTL.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::ports::LeaderLock;

/// Jitter applied to the follower retry interval, as a fraction.
const RETRY_JITTER_FACTOR: f64 = 0.2;

/// Configuration for the election loop.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Lease duration for each successful claim.
    pub ttl: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
        }
    }
}

/// Follower/Leader election task.
pub struct LeaderElector {
    lock: Arc<dyn LeaderLock>,
    holder_id: String,
    config: ElectionConfig,
    leadership_tx: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl LeaderElector {
    /// Create an elector and the leadership receiver lanes will gate on.
    ///
    /// The receiver starts at `false`; nothing polls upstream until the
    /// first successful claim.
    #[must_use]
    pub fn new(
        lock: Arc<dyn LeaderLock>,
        holder_id: String,
        config: ElectionConfig,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<bool>) {
        let (leadership_tx, leadership_rx) = watch::channel(false);
        (
            Self {
                lock,
                holder_id,
                config,
                leadership_tx,
                cancel,
            },
            leadership_rx,
        )
    }

    /// Run the election loop until cancelled.
    pub async fn run(self) {
        tracing::info!(holder = %self.holder_id, ttl_secs = self.config.ttl.as_secs(), "Election loop started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let was_leader = *self.leadership_tx.borrow();
            let acquired = self
                .lock
                .try_acquire_or_extend(&self.holder_id, self.config.ttl)
                .await;

            match (was_leader, acquired) {
                (false, true) => {
                    tracing::info!(holder = %self.holder_id, "Acquired stream leadership");
                    crate::infrastructure::metrics::set_leader(true);
                }
                (true, false) => {
                    tracing::warn!(holder = %self.holder_id, "Lost stream leadership");
                    crate::infrastructure::metrics::set_leader(false);
                }
                _ => {}
            }
            // send_if_modified keeps lane wakeups to actual transitions.
            self.leadership_tx.send_if_modified(|state| {
                let changed = *state != acquired;
                *state = acquired;
                changed
            });

            let delay = if acquired {
                // Renew well before the lease runs out.
                self.config.ttl / 3
            } else {
                self.jittered_retry_delay()
            };

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        // Leadership is surrendered implicitly: the lease simply expires.
        let _ = self.leadership_tx.send(false);
        tracing::info!("Election loop stopped");
    }

    /// Follower retry delay: ttl/3 with jitter so contenders spread out.
    fn jittered_retry_delay(&self) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let base_millis = (self.config.ttl / 3).as_millis() as f64;
        let jitter_range = base_millis * RETRY_JITTER_FACTOR;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((base_millis + jitter).max(1.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::memory::InMemoryLeaderLock;

    fn spawn_elector(
        lock: Arc<dyn LeaderLock>,
        holder: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> watch::Receiver<bool> {
        let (elector, rx) = LeaderElector::new(
            lock,
            holder.to_string(),
            ElectionConfig { ttl },
            cancel.clone(),
        );
        tokio::spawn(elector.run());
        rx
    }

    #[tokio::test]
    async fn single_process_becomes_leader() {
        let lock: Arc<dyn LeaderLock> = Arc::new(InMemoryLeaderLock::new());
        let cancel = CancellationToken::new();
        let mut rx = spawn_elector(Arc::clone(&lock), "solo", Duration::from_millis(300), &cancel);

        rx.wait_for(|leader| *leader)
            .await
            .expect("elector task alive");
        cancel.cancel();
    }

    #[tokio::test]
    async fn at_most_one_leader_among_contenders() {
        let lock: Arc<dyn LeaderLock> = Arc::new(InMemoryLeaderLock::new());
        let cancel = CancellationToken::new();
        let ttl = Duration::from_millis(300);

        let rx_a = spawn_elector(Arc::clone(&lock), "a", ttl, &cancel);
        let rx_b = spawn_elector(Arc::clone(&lock), "b", ttl, &cancel);

        tokio::time::sleep(Duration::from_millis(500)).await;
        for _ in 0..5 {
            let leaders = usize::from(*rx_a.borrow()) + usize::from(*rx_b.borrow());
            assert!(leaders <= 1, "both processes believed they were leader");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn follower_takes_over_after_leader_stops() {
        let lock: Arc<dyn LeaderLock> = Arc::new(InMemoryLeaderLock::new());
        let ttl = Duration::from_millis(200);

        let cancel_a = CancellationToken::new();
        let mut rx_a = spawn_elector(Arc::clone(&lock), "a", ttl, &cancel_a);
        rx_a.wait_for(|leader| *leader).await.expect("a elected");

        let cancel_b = CancellationToken::new();
        let mut rx_b = spawn_elector(Arc::clone(&lock), "b", ttl, &cancel_b);

        // Stop the leader; b must take over within one TTL of the last renewal.
        cancel_a.cancel();
        let takeover = tokio::time::timeout(ttl * 4, rx_b.wait_for(|leader| *leader)).await;
        assert!(takeover.is_ok(), "failover exceeded the TTL bound");
        cancel_b.cancel();
    }
}
