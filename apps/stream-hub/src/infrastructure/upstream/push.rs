//! Push Upstream Lane
//!
//! Optional WebSocket client for the crypto class, replacing the crypto
//! polling lane with sub-second pushed updates when enabled. Registered at
//! the highest lane priority, so target exclusion makes the crypto poll
//! lane stand down by itself.
//!
//! Session rules mirror the polling lanes' leadership discipline:
//!
//! - Connect only while leader; losing leadership tears the session down.
//! - Every inbound message re-checks leadership before publishing.
//! - The target set is re-read from the interest registry once per interest
//!   TTL; a changed set reconnects with a fresh stream subscription.
//! - Connection failures back off exponentially with jitter, reset on a
//!   successful connect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{InterestRegistry, TickBus};
use crate::domain::symbol::{AssetClass, asset_class};
use crate::infrastructure::metrics;

const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/stream";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_JITTER_FACTOR: f64 = 0.2;

/// Push lane settings.
#[derive(Debug, Clone)]
pub struct PushLaneConfig {
    /// Combined-stream endpoint base URL.
    pub url: String,
    /// How often the target set is re-read from the registry.
    pub refresh: Duration,
}

impl PushLaneConfig {
    /// Default endpoint with the given refresh interval.
    #[must_use]
    pub fn new(refresh: Duration) -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            refresh,
        }
    }
}

/// Combined-stream frame wrapper.
#[derive(Debug, Deserialize)]
struct CombinedFrame {
    #[allow(dead_code)]
    stream: String,
    data: MiniTicker,
}

/// The miniTicker event. Prices arrive as strings.
#[derive(Debug, Deserialize)]
struct MiniTicker {
    /// Event time, epoch milliseconds.
    #[serde(rename = "E")]
    event_time: i64,
    /// Exchange symbol, e.g. `BTCUSDT`.
    #[serde(rename = "s")]
    symbol: String,
    /// Close (latest) price.
    #[serde(rename = "c")]
    close: String,
    /// Open price of the rolling 24h window.
    #[serde(rename = "o")]
    open: String,
    /// Base asset volume.
    #[serde(rename = "v")]
    volume: String,
}

/// Exchange symbol for a canonical crypto pair: `BTC-USD.CC` → `BTCUSDT`.
fn exchange_symbol(canonical: &str) -> Option<String> {
    let base = canonical.strip_suffix("-USD.CC")?;
    Some(format!("{base}USDT"))
}

/// Combined-stream URL for a set of exchange symbols.
fn stream_url(base: &str, exchange_symbols: &[String]) -> String {
    let streams: Vec<String> = exchange_symbols
        .iter()
        .map(|s| format!("{}@miniTicker", s.to_lowercase()))
        .collect();
    format!("{base}?streams={}", streams.join("/"))
}

/// Active crypto canonicals, sorted so set comparisons are order-free.
async fn crypto_targets(registry: &Arc<dyn InterestRegistry>) -> Vec<String> {
    let mut targets: Vec<String> = registry
        .list_active()
        .await
        .into_iter()
        .filter(|symbol| asset_class(symbol) == AssetClass::Crypto)
        .collect();
    targets.sort();
    targets
}

/// Push-based crypto lane over the exchange's combined stream.
pub struct BinancePushLane {
    config: PushLaneConfig,
    registry: Arc<dyn InterestRegistry>,
    bus: Arc<dyn TickBus>,
    leadership: watch::Receiver<bool>,
    cancel: CancellationToken,
    backoff: Duration,
}

/// Why a session ended; decides whether the next connect backs off.
enum SessionEnd {
    Shutdown,
    LostLeadership,
    TargetsChanged,
    StreamFailed,
}

impl BinancePushLane {
    /// Create the lane.
    #[must_use]
    pub fn new(
        config: PushLaneConfig,
        registry: Arc<dyn InterestRegistry>,
        bus: Arc<dyn TickBus>,
        leadership: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            bus,
            leadership,
            cancel,
            backoff: INITIAL_BACKOFF,
        }
    }

    /// Run connect/stream/reconnect until cancelled.
    pub async fn run(mut self) {
        tracing::info!(url = %self.config.url, "Push lane started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !*self.leadership.borrow() {
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

            let targets = crypto_targets(&self.registry).await;
            if targets.is_empty() {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(self.config.refresh) => {}
                }
                continue;
            }

            match self.run_session(&targets).await {
                SessionEnd::Shutdown => break,
                SessionEnd::LostLeadership | SessionEnd::TargetsChanged => {
                    self.backoff = INITIAL_BACKOFF;
                }
                SessionEnd::StreamFailed => {
                    let delay = jittered(self.backoff);
                    tracing::warn!(delay_ms = delay.as_millis(), "Push stream reconnecting");
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        tracing::info!("Push lane stopped");
    }

    /// One connected session. Returns why it ended.
    async fn run_session(&mut self, targets: &[String]) -> SessionEnd {
        let exchange_symbols: Vec<String> = targets
            .iter()
            .filter_map(|canonical| exchange_symbol(canonical))
            .collect();
        if exchange_symbols.is_empty() {
            return SessionEnd::TargetsChanged;
        }
        let by_exchange: HashMap<String, String> = targets
            .iter()
            .filter_map(|canonical| {
                exchange_symbol(canonical).map(|code| (code, canonical.clone()))
            })
            .collect();

        let url = stream_url(&self.config.url, &exchange_symbols);
        let mut stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Push stream connect failed");
                return SessionEnd::StreamFailed;
            }
        };
        self.backoff = INITIAL_BACKOFF;
        tracing::info!(symbols = targets.len(), "Push stream connected");

        let mut refresh = tokio::time::interval(self.config.refresh);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        refresh.reset();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = stream.close(None).await;
                    return SessionEnd::Shutdown;
                }
                changed = self.leadership.changed() => {
                    if changed.is_err() || !*self.leadership.borrow() {
                        tracing::info!("Push stream closing: leadership lost");
                        let _ = stream.close(None).await;
                        return SessionEnd::LostLeadership;
                    }
                }
                _ = refresh.tick() => {
                    let current = crypto_targets(&self.registry).await;
                    if current != targets {
                        tracing::info!(
                            was = targets.len(),
                            now = current.len(),
                            "Push stream resubscribing: targets changed"
                        );
                        let _ = stream.close(None).await;
                        return SessionEnd::TargetsChanged;
                    }
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(text.as_str(), &by_exchange).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if stream.send(Message::Pong(payload)).await.is_err() {
                                return SessionEnd::StreamFailed;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::warn!("Push stream closed by peer");
                            return SessionEnd::StreamFailed;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Push stream read failed");
                            return SessionEnd::StreamFailed;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str, by_exchange: &HashMap<String, String>) {
        let frame: CombinedFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Unrecognized push frame skipped");
                return;
            }
        };

        // Leadership may flip between receive and publish.
        if !*self.leadership.borrow() {
            return;
        }

        let Some(tick) = to_tick(&frame.data, by_exchange) else {
            return;
        };
        if let Err(e) = self.bus.publish(&tick).await {
            tracing::warn!(error = %e, "Bus publish failed");
        } else {
            metrics::record_tick_published("push");
        }
    }
}

fn to_tick(
    event: &MiniTicker,
    by_exchange: &HashMap<String, String>,
) -> Option<crate::domain::market::Tick> {
    let canonical = by_exchange.get(&event.symbol)?.clone();
    let close: f64 = event.close.parse().ok()?;
    let open: f64 = event.open.parse().ok()?;
    if close <= 0.0 {
        return None;
    }

    let change = close - open;
    let percent_change = if open > 0.0 {
        change / open * 100.0
    } else {
        0.0
    };

    Some(crate::domain::market::Tick {
        symbol: canonical,
        price: close,
        change,
        percent_change,
        volume: event.volume.parse().ok(),
        timestamp: Some(event.event_time / 1_000),
    })
}

fn jittered(base: Duration) -> Duration {
    #[allow(clippy::cast_precision_loss)]
    let base_millis = base.as_millis() as f64;
    let jitter_range = base_millis * BACKOFF_JITTER_FACTOR;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_millis((base_millis + jitter).max(1.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_symbol_maps_usd_pairs() {
        assert_eq!(exchange_symbol("BTC-USD.CC").as_deref(), Some("BTCUSDT"));
        assert_eq!(exchange_symbol("AAPL.US"), None);
    }

    #[test]
    fn combined_stream_url_joins_lowercased_streams() {
        let url = stream_url(
            "wss://example.test/stream",
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        );
        assert_eq!(
            url,
            "wss://example.test/stream?streams=btcusdt@miniTicker/ethusdt@miniTicker"
        );
    }

    #[test]
    fn mini_ticker_becomes_a_tick() {
        let by_exchange: HashMap<String, String> =
            [("BTCUSDT".to_string(), "BTC-USD.CC".to_string())].into();
        let event: MiniTicker = serde_json::from_value(serde_json::json!({
            "e": "24hrMiniTicker",
            "E": 1_700_000_000_123_i64,
            "s": "BTCUSDT",
            "c": "64250.50",
            "o": "64000.00",
            "h": "64500.00",
            "l": "63800.00",
            "v": "1234.5",
            "q": "79000000.0",
        }))
        .unwrap();

        let tick = to_tick(&event, &by_exchange).unwrap();
        assert_eq!(tick.symbol, "BTC-USD.CC");
        assert!((tick.price - 64_250.5).abs() < f64::EPSILON);
        assert!((tick.change - 250.5).abs() < 1e-9);
        assert_eq!(tick.timestamp, Some(1_700_000_000));
    }

    #[test]
    fn unknown_exchange_symbol_is_dropped() {
        let by_exchange: HashMap<String, String> = HashMap::new();
        let event: MiniTicker = serde_json::from_value(serde_json::json!({
            "E": 1_i64,
            "s": "SOLUSDT",
            "c": "150.0",
            "o": "149.0",
            "v": "10.0",
        }))
        .unwrap();

        assert!(to_tick(&event, &by_exchange).is_none());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let delay = jittered(Duration::from_secs(10));
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_secs(12));
        }
    }
}
