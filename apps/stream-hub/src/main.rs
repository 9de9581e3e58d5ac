//! Stream Hub Binary
//!
//! Starts the market data distribution hub.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stream-hub
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `EODHD_API_TOKEN`: EODHD API token
//!
//! ## Optional
//! - `FMP_API_KEY`: FMP API key; absent disables the commodity lane
//! - `REDIS_URL`: shared backend; absent runs single-process local mode
//! - `STREAM_HUB_PORT`: HTTP/WebSocket port (default: 8080)
//! - `STREAM_HUB_INTEREST_TTL_SECS`: interest TTL (default: 15)
//! - `STREAM_HUB_LOCK_TTL_SECS`: leader lease TTL (default: 10)
//! - `STREAM_HUB_PUSH_ENABLED`: push-based crypto lane (default: false)
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use stream_hub::application::ports::QuoteFeed;
use stream_hub::application::services::{ElectionConfig, LaneConfig, LeaderElector, PollerLane};
use stream_hub::domain::symbol::AssetClass;
use stream_hub::infrastructure::server::{AppState, ConnectionRegistry, HubServer};
use stream_hub::infrastructure::store::Backend;
use stream_hub::infrastructure::upstream::{
    BinancePushLane, EodhdClient, FmpClient, PushLaneConfig, http_client,
};
use stream_hub::{HubConfig, init_metrics, init_telemetry};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Hard upper bound on any upstream HTTP call.
const HTTP_HARD_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();
    init_telemetry();

    tracing::info!("Starting Stream Hub");

    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Backend probe runs once; the mode holds for the life of the process.
    let backend = Backend::detect(
        config.store.redis_url.as_deref(),
        config.store.interest_ttl,
        &config.store.lock_key,
        shutdown_token.clone(),
    )
    .await;

    // Leader election.
    let holder_id = format!("stream-hub-{}", uuid::Uuid::new_v4());
    let (elector, leadership) = LeaderElector::new(
        Arc::clone(&backend.lock),
        holder_id,
        ElectionConfig {
            ttl: config.store.lock_ttl,
        },
        shutdown_token.clone(),
    );
    tokio::spawn(elector.run());

    // Poller lanes. The lane table is assembled first so priority exclusion
    // sees every claim, including the push lane's.
    let mut lane_configs = vec![
        LaneConfig {
            name: "crypto",
            classes: vec![AssetClass::Crypto],
            priority: 1,
            cadence: config.lanes.crypto_cadence,
            timeout: config.lanes.crypto_timeout,
            chunk_size: config.lanes.chunk_size,
        },
        LaneConfig {
            name: "equities",
            classes: vec![AssetClass::Equity, AssetClass::Index],
            priority: 2,
            cadence: config.lanes.equity_cadence,
            timeout: config.lanes.equity_timeout,
            chunk_size: config.lanes.chunk_size,
        },
    ];
    if config.fmp_key.is_some() {
        lane_configs.push(LaneConfig {
            name: "commodities",
            classes: vec![AssetClass::Commodity],
            priority: 3,
            cadence: config.lanes.commodity_cadence,
            timeout: config.lanes.commodity_timeout,
            chunk_size: config.lanes.chunk_size,
        });
    }
    if config.push.enabled {
        lane_configs.push(LaneConfig {
            name: "push",
            classes: vec![AssetClass::Crypto],
            priority: 0,
            cadence: config.store.interest_ttl,
            timeout: config.store.interest_ttl,
            chunk_size: config.lanes.chunk_size,
        });
    }

    let http = http_client(HTTP_HARD_TIMEOUT)?;
    let eodhd: Arc<dyn QuoteFeed> = Arc::new(EodhdClient::new(
        http.clone(),
        config.eodhd_token.expose().to_string(),
    ));

    for lane_config in lane_configs
        .iter()
        .filter(|lane| lane.name == "crypto" || lane.name == "equities")
    {
        let lane = PollerLane::new(
            lane_config.clone(),
            lane_configs.clone(),
            Arc::clone(&eodhd),
            Arc::clone(&backend.registry),
            Arc::clone(&backend.bus),
            leadership.clone(),
            shutdown_token.clone(),
        );
        tokio::spawn(lane.run());
    }

    if let Some(fmp_key) = &config.fmp_key {
        let fmp: Arc<dyn QuoteFeed> =
            Arc::new(FmpClient::new(http.clone(), fmp_key.expose().to_string()));
        let lane_config = lane_configs
            .iter()
            .find(|lane| lane.name == "commodities")
            .expect("commodity lane registered alongside its key")
            .clone();
        let lane = PollerLane::new(
            lane_config,
            lane_configs.clone(),
            fmp,
            Arc::clone(&backend.registry),
            Arc::clone(&backend.bus),
            leadership.clone(),
            shutdown_token.clone(),
        );
        tokio::spawn(lane.run());
    } else {
        tracing::info!("No FMP_API_KEY, commodity lane disabled");
    }

    if config.push.enabled {
        let mut push_config = PushLaneConfig::new(config.store.interest_ttl);
        if let Some(url) = &config.push.url {
            push_config.url.clone_from(url);
        }
        let push_lane = BinancePushLane::new(
            push_config,
            Arc::clone(&backend.registry),
            Arc::clone(&backend.bus),
            leadership.clone(),
            shutdown_token.clone(),
        );
        tokio::spawn(push_lane.run());
    }

    // Client-facing server.
    let state = Arc::new(AppState::new(
        Arc::new(ConnectionRegistry::new()),
        Arc::clone(&backend.registry),
        Arc::clone(&backend.bus),
        leadership,
        backend.mode,
        shutdown_token.clone(),
    ));
    let server = HubServer::new(config.server.port, state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Hub server error");
        }
    });

    tracing::info!("Stream hub ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Stream hub stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        port = config.server.port,
        redis = config.store.redis_url.is_some(),
        interest_ttl_secs = config.store.interest_ttl.as_secs(),
        lock_ttl_secs = config.store.lock_ttl.as_secs(),
        commodities = config.fmp_key.is_some(),
        push = config.push.enabled,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("signal handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }

    shutdown_token.cancel();
}
