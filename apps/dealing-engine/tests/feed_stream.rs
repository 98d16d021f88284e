//! Feed Stream Integration Tests
//!
//! Runs the WebSocket client against a local server: frame decoding,
//! reconnection with a reset backoff schedule, skip-on-malformed handling,
//! and the attempt budget.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use dealing_engine::{
    FeedClient, FeedClientConfig, FeedClientError, FeedEvent, FeedMessage, FeedStatus, Quote,
    ReconnectConfig,
};

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts,
    }
}

fn trade_frame(price: &str) -> String {
    format!(
        r#"{{"stream":"btcusdt@trade","data":{{"e":"trade","E":1718000000100,"s":"BTCUSDT","t":42,"p":"{price}","q":"0.5","T":1718000000099,"m":false,"M":true}}}}"#
    )
}

fn depth_frame() -> String {
    r#"{"stream":"btcusdt@depth20@100ms","data":{"lastUpdateId":7,"bids":[["96999.5","1.2"]],"asks":[["97000.5","0.8"]]}}"#
        .to_string()
}

/// Spawn a client against `url` and return the pieces the tests poke at.
///
/// The spawned task owns the only client handle, so the event channel closes
/// once the run loop finishes.
fn start_client(
    url: String,
    reconnect: ReconnectConfig,
) -> (
    mpsc::Receiver<FeedEvent>,
    Arc<FeedStatus>,
    CancellationToken,
    tokio::task::JoinHandle<Result<(), FeedClientError>>,
) {
    let (event_tx, event_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let status = Arc::new(FeedStatus::new());

    let mut config = FeedClientConfig::new(url);
    config.reconnect = reconnect;

    let client = Arc::new(FeedClient::new(
        config,
        event_tx,
        cancel.clone(),
        Arc::clone(&status),
    ));
    let run = tokio::spawn(client.run());

    (event_rx, status, cancel, run)
}

async fn next_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a feed event")
        .expect("event channel closed early")
}

async fn expect_trade(rx: &mut mpsc::Receiver<FeedEvent>) -> Quote {
    match next_event(rx).await {
        FeedEvent::Message(FeedMessage::Trade(quote)) => quote,
        other => panic!("expected a trade, got {other:?}"),
    }
}

// =============================================================================
// Connection Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_client_decodes_and_reconnects_after_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // First connection sends one trade and closes; the second sends another
    // and stays open until the client hangs up.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(trade_frame("97000.10"))).await.unwrap();
        ws.close(None).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(trade_frame("97001.25"))).await.unwrap();
        while let Some(msg) = ws.next().await {
            if msg.is_err() {
                break;
            }
        }
    });

    let (mut rx, status, cancel, run) = start_client(
        format!("ws://{addr}/stream?streams=btcusdt@trade"),
        fast_reconnect(0),
    );

    assert!(matches!(next_event(&mut rx).await, FeedEvent::Connected));
    assert_eq!(expect_trade(&mut rx).await.price, dec!(97000.10));

    assert!(matches!(next_event(&mut rx).await, FeedEvent::Disconnected));
    assert!(matches!(
        next_event(&mut rx).await,
        FeedEvent::Reconnecting { attempt: 1 }
    ));

    assert!(matches!(next_event(&mut rx).await, FeedEvent::Connected));
    let second = expect_trade(&mut rx).await;
    assert_eq!(second.price, dec!(97001.25));
    assert_eq!(second.symbol.as_str(), "BTCUSDT");

    assert!(status.is_connected());
    // The successful reconnect restarted the attempt count.
    assert_eq!(status.reconnect_attempts(), 0);

    cancel.cancel();
    run.await.unwrap().unwrap();
    server.abort();

    // Cancellation silences the stream.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_malformed_frame_is_skipped_not_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text("{not json")).await.unwrap();
        ws.send(Message::text(depth_frame())).await.unwrap();
        ws.send(Message::text(trade_frame("96950.00"))).await.unwrap();
        while let Some(msg) = ws.next().await {
            if msg.is_err() {
                break;
            }
        }
    });

    let (mut rx, status, cancel, run) = start_client(
        format!("ws://{addr}/stream?streams=btcusdt@trade/btcusdt@depth20@100ms"),
        fast_reconnect(0),
    );

    assert!(matches!(next_event(&mut rx).await, FeedEvent::Connected));
    assert!(matches!(next_event(&mut rx).await, FeedEvent::Error(_)));

    let depth = match next_event(&mut rx).await {
        FeedEvent::Message(FeedMessage::Depth(depth)) => depth,
        other => panic!("expected a depth snapshot, got {other:?}"),
    };
    assert_eq!(depth.symbol.as_str(), "BTCUSDT");
    assert_eq!(depth.bids[0].price, dec!(96999.5));
    assert_eq!(depth.asks[0].quantity, dec!(0.8));

    assert_eq!(expect_trade(&mut rx).await.price, dec!(96950.00));

    assert!(status.is_connected());
    assert_eq!(status.malformed_frames(), 1);
    assert_eq!(status.messages_received(), 2);

    cancel.cancel();
    run.await.unwrap().unwrap();
    server.abort();
}

// =============================================================================
// Reconnection Budget Tests
// =============================================================================

#[tokio::test]
async fn test_attempt_budget_exhausts_against_dead_endpoint() {
    // Bind and drop to get a port with nothing listening on it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (mut rx, status, _cancel, run) = start_client(
        format!("ws://{addr}/stream?streams=btcusdt@trade"),
        fast_reconnect(2),
    );

    let err = timeout(Duration::from_secs(5), run)
        .await
        .expect("client did not give up in time")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, FeedClientError::MaxReconnectAttemptsExceeded));

    // Three dials, two retries in between.
    let mut reconnects = 0;
    let mut connects = 0;
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Reconnecting { .. } => reconnects += 1,
            FeedEvent::Connected => connects += 1,
            _ => {}
        }
    }
    assert_eq!(reconnects, 2);
    assert_eq!(connects, 0);
    assert!(!status.is_connected());
}

#[tokio::test]
async fn test_cancel_during_reconnect_delay_stops_cleanly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    // A long delay so the client is parked in its backoff sleep.
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(60),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: 0,
    };
    let (mut rx, _status, cancel, run) = start_client(
        format!("ws://{addr}/stream?streams=btcusdt@trade"),
        reconnect,
    );

    assert!(matches!(next_event(&mut rx).await, FeedEvent::Disconnected));
    assert!(matches!(
        next_event(&mut rx).await,
        FeedEvent::Reconnecting { attempt: 1 }
    ));

    cancel.cancel();
    timeout(Duration::from_secs(2), run)
        .await
        .expect("client did not stop")
        .unwrap()
        .unwrap();
}
