//! Hub Configuration Settings
//!
//! Configuration types for the hub, loaded from environment variables.

use std::time::Duration;

/// An upstream provider API key.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// The raw key value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey").field(&"[REDACTED]").finish()
    }
}

/// Listen settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP/WebSocket listen port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Shared-store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Redis connection URL; absent means local single-process mode.
    pub redis_url: Option<String>,
    /// Active-interest TTL.
    pub interest_ttl: Duration,
    /// Leader lease key.
    pub lock_key: String,
    /// Leader lease TTL.
    pub lock_ttl: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            interest_ttl: Duration::from_secs(15),
            lock_key: "stream-leader".to_string(),
            lock_ttl: Duration::from_secs(10),
        }
    }
}

/// Polling lane settings. Each per-call timeout stays below its cadence so a
/// slow upstream never overlaps the next cycle.
#[derive(Debug, Clone)]
pub struct LaneSettings {
    /// Crypto lane cadence.
    pub crypto_cadence: Duration,
    /// Crypto lane per-call timeout.
    pub crypto_timeout: Duration,
    /// Equity + index lane cadence.
    pub equity_cadence: Duration,
    /// Equity + index lane per-call timeout.
    pub equity_timeout: Duration,
    /// Commodity lane cadence.
    pub commodity_cadence: Duration,
    /// Commodity lane per-call timeout.
    pub commodity_timeout: Duration,
    /// Maximum symbols per upstream call.
    pub chunk_size: usize,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            crypto_cadence: Duration::from_secs(1),
            crypto_timeout: Duration::from_millis(900),
            equity_cadence: Duration::from_secs(2),
            equity_timeout: Duration::from_millis(1_800),
            commodity_cadence: Duration::from_secs(5),
            commodity_timeout: Duration::from_secs(4),
            chunk_size: 20,
        }
    }
}

/// Push lane settings.
#[derive(Debug, Clone)]
pub struct PushSettings {
    /// Whether the push lane runs at all.
    pub enabled: bool,
    /// Combined-stream endpoint override; empty uses the built-in default.
    pub url: Option<String>,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// EODHD API token (equities, indices, crypto polling).
    pub eodhd_token: ApiKey,
    /// FMP API key (commodities); absent disables the commodity lane.
    pub fmp_key: Option<ApiKey>,
    /// Listen settings.
    pub server: ServerSettings,
    /// Shared-store settings.
    pub store: StoreSettings,
    /// Polling lane settings.
    pub lanes: LaneSettings,
    /// Push lane settings.
    pub push: PushSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let eodhd_token = std::env::var("EODHD_API_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("EODHD_API_TOKEN".to_string()))?;
        if eodhd_token.is_empty() {
            return Err(ConfigError::EmptyValue("EODHD_API_TOKEN".to_string()));
        }

        let fmp_key = std::env::var("FMP_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(ApiKey::new);

        let server = ServerSettings {
            port: parse_env_u16("STREAM_HUB_PORT", ServerSettings::default().port),
        };

        let store = StoreSettings {
            redis_url: std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            interest_ttl: parse_env_duration_secs(
                "STREAM_HUB_INTEREST_TTL_SECS",
                StoreSettings::default().interest_ttl,
            ),
            lock_key: std::env::var("STREAM_HUB_LOCK_KEY")
                .unwrap_or_else(|_| StoreSettings::default().lock_key),
            lock_ttl: parse_env_duration_secs(
                "STREAM_HUB_LOCK_TTL_SECS",
                StoreSettings::default().lock_ttl,
            ),
        };

        let lanes = LaneSettings {
            crypto_cadence: parse_env_duration_millis(
                "STREAM_HUB_CRYPTO_CADENCE_MS",
                LaneSettings::default().crypto_cadence,
            ),
            crypto_timeout: parse_env_duration_millis(
                "STREAM_HUB_CRYPTO_TIMEOUT_MS",
                LaneSettings::default().crypto_timeout,
            ),
            equity_cadence: parse_env_duration_millis(
                "STREAM_HUB_EQUITY_CADENCE_MS",
                LaneSettings::default().equity_cadence,
            ),
            equity_timeout: parse_env_duration_millis(
                "STREAM_HUB_EQUITY_TIMEOUT_MS",
                LaneSettings::default().equity_timeout,
            ),
            commodity_cadence: parse_env_duration_millis(
                "STREAM_HUB_COMMODITY_CADENCE_MS",
                LaneSettings::default().commodity_cadence,
            ),
            commodity_timeout: parse_env_duration_millis(
                "STREAM_HUB_COMMODITY_TIMEOUT_MS",
                LaneSettings::default().commodity_timeout,
            ),
            chunk_size: parse_env_usize(
                "STREAM_HUB_CHUNK_SIZE",
                LaneSettings::default().chunk_size,
            ),
        };

        let push = PushSettings {
            enabled: parse_env_bool("STREAM_HUB_PUSH_ENABLED", PushSettings::default().enabled),
            url: std::env::var("STREAM_HUB_PUSH_URL")
                .ok()
                .filter(|url| !url.is_empty()),
        };

        Ok(Self {
            eodhd_token: ApiKey::new(eodhd_token),
            fmp_key,
            server,
            store,
            lanes,
            push,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
