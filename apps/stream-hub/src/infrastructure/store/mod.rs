//! Store Backend Selection
//!
//! The hub runs over one of two adapter families for its store ports:
//! Redis-backed (multi-process) or in-process (single-process fallback).
//! The choice is made exactly once at startup by a short connectivity
//! probe and never revisited: a mid-flight re-probe could flip modes and
//! split the interest set and leader lease across backends.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{InterestRegistry, LeaderLock, StoreError, TickBus};

/// Redis adapters.
pub mod redis;

/// In-process fallback adapters.
pub mod memory;

/// Probe budget for the startup PING.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Which adapter family is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// Shared Redis backend; leader election spans processes.
    Redis,
    /// Process-local fallback; this process is its own leader.
    Local,
}

impl BackendMode {
    /// Label for logs and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Local => "local",
        }
    }
}

/// The selected store adapters, behind their port traits.
pub struct Backend {
    /// Which family was selected.
    pub mode: BackendMode,
    /// Active-interest registry.
    pub registry: Arc<dyn InterestRegistry>,
    /// Leader lock.
    pub lock: Arc<dyn LeaderLock>,
    /// Tick bus.
    pub bus: Arc<dyn TickBus>,
}

impl Backend {
    /// Probe the configured backend once and build the matching adapters.
    ///
    /// No configured URL, a failed connection, or a PING that misses the
    /// one-second budget all select local mode; the hub stays up either way.
    pub async fn detect(
        redis_url: Option<&str>,
        interest_ttl: Duration,
        lock_key: &str,
        cancel: CancellationToken,
    ) -> Self {
        if let Some(url) = redis_url {
            match Self::connect_redis(url, interest_ttl, lock_key, cancel).await {
                Ok(backend) => {
                    tracing::info!("Store backend: redis");
                    return backend;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unreachable, falling back to local mode");
                }
            }
        } else {
            tracing::info!("No REDIS_URL configured, running in local mode");
        }

        Self::local(interest_ttl)
    }

    /// Build the in-process adapter set directly.
    #[must_use]
    pub fn local(interest_ttl: Duration) -> Self {
        Self {
            mode: BackendMode::Local,
            registry: Arc::new(memory::InMemoryInterestRegistry::new(interest_ttl)),
            lock: Arc::new(memory::InMemoryLeaderLock::new()),
            bus: Arc::new(memory::LocalTickBus::with_defaults()),
        }
    }

    async fn connect_redis(
        url: &str,
        interest_ttl: Duration,
        lock_key: &str,
        cancel: CancellationToken,
    ) -> Result<Self, StoreError> {
        let client =
            ::redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut conn = tokio::time::timeout(
            PROBE_TIMEOUT,
            ::redis::aio::ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| StoreError::Backend(format!("connect timed out after {PROBE_TIMEOUT:?}")))?
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        // One PING decides the mode for the life of the process.
        tokio::time::timeout(
            PROBE_TIMEOUT,
            ::redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Backend(format!("ping timed out after {PROBE_TIMEOUT:?}")))?
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let bus = redis::RedisTickBus::connect(&client, conn.clone(), cancel).await?;

        Ok(Self {
            mode: BackendMode::Redis,
            registry: Arc::new(redis::RedisInterestRegistry::new(
                conn.clone(),
                interest_ttl,
            )),
            lock: Arc::new(redis::RedisLeaderLock::new(conn, lock_key.to_string())),
            bus: Arc::new(bus),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_selects_local_mode() {
        let backend = Backend::detect(
            None,
            Duration::from_secs(15),
            "stream-leader",
            CancellationToken::new(),
        )
        .await;
        assert_eq!(backend.mode, BackendMode::Local);
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back_to_local() {
        // Reserved TEST-NET-1 address; the probe must fail within its budget.
        let backend = Backend::detect(
            Some("redis://192.0.2.1:6379"),
            Duration::from_secs(15),
            "stream-leader",
            CancellationToken::new(),
        )
        .await;
        assert_eq!(backend.mode, BackendMode::Local);
    }

    #[tokio::test]
    async fn local_mode_elects_itself() {
        let backend = Backend::local(Duration::from_secs(15));
        assert!(
            backend
                .lock
                .try_acquire_or_extend("solo", Duration::from_secs(10))
                .await
        );
    }
}
