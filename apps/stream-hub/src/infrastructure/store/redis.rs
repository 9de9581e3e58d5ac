//! Redis Store Adapters
//!
//! Shared-backend implementations of the store ports, active whenever the
//! startup probe reaches Redis. These are what make multi-process
//! deployments coherent: the interest set, the leader lease, and the tick
//! stream all live in one place every replica can see.
//!
//! Key layout:
//!
//! - `active_symbols`            - set of symbols with live interest
//! - `heartbeat:<symbol>`        - per-symbol TTL key carrying the expiry
//! - `stream-leader` (config)    - leader lease, value is the holder id
//! - `market-feed` (channel)     - pub/sub channel carrying JSON ticks

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{InterestRegistry, LeaderLock, StoreError, TickBus};
use crate::domain::market::Tick;
use crate::infrastructure::metrics;

/// Set holding every symbol with at least one recent subscriber.
const ACTIVE_SET_KEY: &str = "active_symbols";

/// Prefix of the per-symbol TTL keys backing the active set.
const HEARTBEAT_PREFIX: &str = "heartbeat:";

/// Pub/sub channel carrying serialized ticks.
const FEED_CHANNEL: &str = "market-feed";

/// Local relay capacity per process.
const RELAY_CAPACITY: usize = 1_024;

fn heartbeat_key(symbol: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{symbol}")
}

// =============================================================================
// Interest Registry
// =============================================================================

/// Interest registry over a shared set plus per-symbol TTL heartbeat keys.
///
/// Redis sets have no per-member expiry, so each member gets a companion
/// `heartbeat:<symbol>` key with the real TTL. `list_active` treats a set
/// member whose heartbeat has expired as dead and removes it on the spot.
pub struct RedisInterestRegistry {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisInterestRegistry {
    /// Create a registry with the given touch TTL.
    #[must_use]
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl InterestRegistry for RedisInterestRegistry {
    async fn touch(&self, symbol: &str) {
        let mut conn = self.conn.clone();
        let ttl_secs = self.ttl.as_secs().max(1);

        let mut pipe = redis::pipe();
        pipe.sadd(ACTIVE_SET_KEY, symbol)
            .set_ex(heartbeat_key(symbol), 1, ttl_secs);
        if let Err(e) = pipe.query_async::<()>(&mut conn).await {
            // Interest refresh is best-effort; a miss just shortens the
            // symbol's window until the next touch.
            tracing::warn!(symbol, error = %e, "Interest touch failed");
        }
    }

    async fn list_active(&self) -> Vec<String> {
        let mut conn = self.conn.clone();

        let members: Vec<String> = match conn.smembers(ACTIVE_SET_KEY).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(error = %e, "Active-set read failed");
                return Vec::new();
            }
        };

        let mut active = Vec::with_capacity(members.len());
        for symbol in members {
            let alive: bool = conn.exists(heartbeat_key(&symbol)).await.unwrap_or(false);
            if alive {
                active.push(symbol);
            } else {
                let _: Result<(), _> = conn.srem(ACTIVE_SET_KEY, &symbol).await;
                tracing::debug!(symbol, "Evicted expired interest");
            }
        }
        active
    }
}

// =============================================================================
// Leader Lock
// =============================================================================

/// Atomic claim-if-absent-expired-or-mine over a single lease key.
///
/// GET + SET would race between two contenders observing an expired lease;
/// the check and the claim run as one Lua script so the lock upholds its
/// at-most-one-holder guarantee.
const ACQUIRE_OR_EXTEND: &str = r"
local current = redis.call('GET', KEYS[1])
if current == false or current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  return 1
end
return 0
";

/// Leader lock backed by a Redis lease key.
pub struct RedisLeaderLock {
    conn: ConnectionManager,
    key: String,
    script: redis::Script,
}

impl RedisLeaderLock {
    /// Create a lock over `key`.
    #[must_use]
    pub fn new(conn: ConnectionManager, key: String) -> Self {
        Self {
            conn,
            key,
            script: redis::Script::new(ACQUIRE_OR_EXTEND),
        }
    }
}

#[async_trait]
impl LeaderLock for RedisLeaderLock {
    async fn try_acquire_or_extend(&self, holder: &str, ttl: Duration) -> bool {
        let mut conn = self.conn.clone();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let outcome: Result<i64, _> = self
            .script
            .key(&self.key)
            .arg(holder)
            .arg(ttl_millis)
            .invoke_async(&mut conn)
            .await;

        match outcome {
            Ok(claimed) => claimed == 1,
            Err(e) => {
                // An unreachable backend reads as "not acquired": the
                // process stays Follower and keeps retrying.
                tracing::warn!(error = %e, "Leader lock claim failed");
                false
            }
        }
    }
}

// =============================================================================
// Tick Bus
// =============================================================================

/// Pub/sub tick bus bridged into a process-local broadcast channel.
///
/// `publish` goes straight to the Redis channel. On the receive side one
/// relay task per process holds the single pub/sub subscription and copies
/// every tick into a local broadcast channel; `subscribe` hands out
/// receivers on that channel, so client count never multiplies the Redis
/// subscription count.
pub struct RedisTickBus {
    conn: ConnectionManager,
    sender: broadcast::Sender<Tick>,
}

impl RedisTickBus {
    /// Create the bus and spawn its relay task.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the pub/sub subscription cannot be
    /// established.
    pub async fn connect(
        client: &redis::Client,
        conn: ConnectionManager,
        cancel: CancellationToken,
    ) -> Result<Self, StoreError> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        pubsub
            .subscribe(FEED_CHANNEL)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let (sender, _) = broadcast::channel(RELAY_CAPACITY);
        let relay_tx = sender.clone();

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    message = stream.next() => {
                        let Some(message) = message else {
                            tracing::warn!("Feed subscription closed");
                            break;
                        };
                        let payload: String = match message.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::warn!(error = %e, "Unreadable feed payload");
                                continue;
                            }
                        };
                        match serde_json::from_str::<Tick>(&payload) {
                            Ok(tick) => {
                                let _ = relay_tx.send(tick);
                            }
                            // Malformed ticks are skipped, never fatal.
                            Err(e) => {
                                tracing::warn!(error = %e, "Malformed tick on feed channel");
                            }
                        }
                    }
                }
            }
            tracing::info!("Feed relay stopped");
        });

        Ok(Self { conn, sender })
    }
}

#[async_trait]
impl TickBus for RedisTickBus {
    async fn publish(&self, tick: &Tick) -> Result<(), StoreError> {
        let payload = serde_json::to_string(tick).map_err(|e| StoreError::Codec(e.to_string()))?;

        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(FEED_CHANNEL, payload)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::trace!(symbol = %tick.symbol, receivers, "Published tick");
        metrics::record_bus_publish();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.sender.subscribe()
    }
}
