//! End-to-end fan-out tests over a real listener.
//!
//! A hub server is bound to an ephemeral port and exercised with real
//! WebSocket clients, with ticks injected straight onto the local bus.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use stream_hub::application::ports::{InterestRegistry, TickBus};
use stream_hub::domain::market::Tick;
use stream_hub::infrastructure::server::{AppState, ConnectionRegistry, HubServer};
use stream_hub::infrastructure::store::Backend;

struct TestHub {
    addr: SocketAddr,
    registry: Arc<dyn InterestRegistry>,
    bus: Arc<dyn TickBus>,
    _leadership: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl TestHub {
    fn url(&self, symbol: &str) -> String {
        format!("ws://{}/live/{}", self.addr, symbol)
    }
}

async fn spawn_hub(interest_ttl: Duration) -> TestHub {
    let backend = Backend::local(interest_ttl);
    let (leadership_tx, leadership_rx) = watch::channel(true);
    let cancel = CancellationToken::new();

    let state = Arc::new(AppState::new(
        Arc::new(ConnectionRegistry::new()),
        Arc::clone(&backend.registry),
        Arc::clone(&backend.bus),
        leadership_rx,
        backend.mode,
        cancel.clone(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let app = HubServer::router(state);
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(serve_cancel.cancelled_owned())
            .await
            .expect("serve");
    });

    TestHub {
        addr,
        registry: backend.registry,
        bus: backend.bus,
        _leadership: leadership_tx,
        cancel,
    }
}

async fn next_text(
    stream: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("frame ok");
        match message {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn tick_reaches_every_subscriber_exactly_once() {
    let hub = spawn_hub(Duration::from_secs(15)).await;

    let (mut client_a, _) = connect_async(hub.url("AAPL")).await.expect("connect a");
    let (mut client_b, _) = connect_async(hub.url("aapl.us")).await.expect("connect b");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let first = Tick::new("AAPL.US", 189.5, 1.2, 0.64);
    let second = Tick::new("AAPL.US", 189.6, 1.3, 0.69);
    hub.bus.publish(&first).await.expect("publish");
    hub.bus.publish(&second).await.expect("publish");

    for client in [&mut client_a, &mut client_b] {
        let one: Tick = serde_json::from_str(&next_text(client).await).expect("json");
        let two: Tick = serde_json::from_str(&next_text(client).await).expect("json");
        assert_eq!(one, first);
        assert_eq!(two, second);
    }

    hub.cancel.cancel();
}

#[tokio::test]
async fn other_symbols_are_isolated() {
    let hub = spawn_hub(Duration::from_secs(15)).await;

    let (mut apple, _) = connect_async(hub.url("AAPL")).await.expect("connect");
    let (mut bitcoin, _) = connect_async(hub.url("BTC")).await.expect("connect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    hub.bus
        .publish(&Tick::new("BTC-USD.CC", 64_250.5, 120.5, 0.19))
        .await
        .expect("publish");

    let tick: Tick = serde_json::from_str(&next_text(&mut bitcoin).await).expect("json");
    assert_eq!(tick.symbol, "BTC-USD.CC");

    // The equity client must see nothing.
    let leaked = tokio::time::timeout(Duration::from_millis(300), apple.next()).await;
    assert!(leaked.is_err(), "tick leaked across symbols");

    hub.cancel.cancel();
}

#[tokio::test]
async fn connecting_registers_interest_under_the_canonical_symbol() {
    let hub = spawn_hub(Duration::from_secs(15)).await;

    let (_client, _) = connect_async(hub.url("nifty")).await.expect("connect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let active = hub.registry.list_active().await;
    assert_eq!(active, vec!["NSEI.INDX"]);

    hub.cancel.cancel();
}

#[tokio::test]
async fn inbound_frames_keep_interest_alive() {
    let hub = spawn_hub(Duration::from_millis(400)).await;

    let (mut client, _) = connect_async(hub.url("AAPL")).await.expect("connect");

    // Ping past two TTL windows; interest must survive.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        client
            .send(Message::Text("ping".into()))
            .await
            .expect("send");
    }
    assert_eq!(hub.registry.list_active().await, vec!["AAPL.US"]);

    // Gone quiet: one TTL later the symbol has decayed, connection or not.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(hub.registry.list_active().await.is_empty());

    hub.cancel.cancel();
}
