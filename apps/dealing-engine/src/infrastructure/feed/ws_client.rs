//! Market Data WebSocket Client
//!
//! Connects to the combined market data stream and emits decoded ticks and
//! depth snapshots as [`FeedEvent`]s. The set of instruments is fixed in the
//! stream URL at connect time; there is no subscribe handshake.
//!
//! # Lifecycle
//!
//! `run` keeps the connection alive until the cancellation token fires:
//! connect, read frames, and on any failure back off per [`ReconnectPolicy`]
//! and dial again. A successful connect resets the backoff schedule.
//! Malformed frames are counted and skipped, never fatal. Once `run`
//! returns, no further events are emitted.

use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::FeedStatus;
use super::codec::FeedCodec;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::{FeedMessage, Symbol};

// =============================================================================
// Failure Modes
// =============================================================================

/// Errors that can occur in the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// Transport-level WebSocket failure.
    #[error("websocket transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server closed the connection or the stream ended.
    #[error("connection closed by the stream")]
    ConnectionClosed,

    /// Reconnection attempt budget spent.
    #[error("reconnect attempt budget exhausted")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Feed Client Events
// =============================================================================

/// Events emitted by the feed client.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connected to the stream.
    Connected,
    /// Lost the connection.
    Disconnected,
    /// Dialing again after a failure.
    Reconnecting {
        /// Reconnection attempt number since the last successful connect.
        attempt: u32,
    },
    /// A decoded market data message.
    Message(FeedMessage),
    /// A non-fatal stream error.
    Error(String),
}

// =============================================================================
// Feed Client Configuration
// =============================================================================

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Full combined-stream WebSocket URL.
    pub url: String,
    /// Backoff schedule for redials.
    pub reconnect: ReconnectConfig,
}

impl FeedClientConfig {
    /// Wrap a prebuilt URL with the default backoff schedule.
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            url,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Build a combined-stream URL subscribing the given instruments to
    /// trade and partial-depth streams.
    ///
    /// Stream names are lowercase on the wire, e.g.
    /// `wss://host/stream?streams=btcusdt@trade/btcusdt@depth20@100ms`.
    #[must_use]
    pub fn combined(base_url: &str, symbols: &[Symbol], with_depth: bool) -> Self {
        let mut streams = Vec::with_capacity(symbols.len() * 2);
        for symbol in symbols {
            let lower = symbol.as_str().to_lowercase();
            streams.push(format!("{lower}@trade"));
            if with_depth {
                streams.push(format!("{lower}@depth20@100ms"));
            }
        }

        Self::new(format!(
            "{}/stream?streams={}",
            base_url.trim_end_matches('/'),
            streams.join("/")
        ))
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// WebSocket client for the combined market data stream.
///
/// Owns the connection lifecycle end to end: dialing, frame decoding with
/// skip-on-malformed semantics, backoff-driven redials, and state reporting
/// through [`FeedStatus`].
pub struct FeedClient {
    config: FeedClientConfig,
    codec: FeedCodec,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    status: Arc<FeedStatus>,
}

impl FeedClient {
    /// Create a new feed client.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
        status: Arc<FeedStatus>,
    ) -> Self {
        Self {
            config,
            codec: FeedCodec::new(),
            event_tx,
            cancel,
            status,
        }
    }

    /// Run the feed connection loop.
    ///
    /// Dials, pumps frames, and redials on failure until cancelled. Returns
    /// `Ok(())` on cancellation; after that no events are emitted.
    ///
    /// # Errors
    ///
    /// Returns an error only when the reconnection attempt budget is spent.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedClientError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("feed client stopped");
                return Ok(());
            }

            match self.connect_and_pump(&mut policy).await {
                Ok(()) => {
                    tracing::info!("feed connection closed, shutting down");
                    self.status.set_disconnected();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "feed connection lost");
                    self.status.set_error(e.to_string());
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;
                    self.backoff(&mut policy).await?;
                }
            }
        }
    }

    /// Announce the redial and sleep out the backoff delay. Cancellation cuts
    /// the sleep short; the caller's loop then observes the token and exits.
    async fn backoff(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedClientError> {
        let Some(delay) = policy.next_delay() else {
            return Err(FeedClientError::MaxReconnectAttemptsExceeded);
        };

        let attempt = policy.attempt_count();
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis(),
            "redialing market data stream"
        );
        self.status.record_reconnect_attempt();
        let _ = self.event_tx.send(FeedEvent::Reconnecting { attempt }).await;

        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
        Ok(())
    }

    /// Dial once and pump frames until an error or cancellation.
    async fn connect_and_pump(
        &self,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedClientError> {
        tracing::info!(url = %self.config.url, "dialing market data stream");

        let (stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;

        // A successful connect restarts the backoff schedule.
        policy.reset();
        self.status.set_connected();
        let _ = self.event_tx.send(FeedEvent::Connected).await;

        let (mut sink, mut frames) = stream.split();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                frame = frames.next() => {
                    let Some(frame) = frame else {
                        tracing::info!("market data stream ended");
                        return Err(FeedClientError::ConnectionClosed);
                    };

                    match frame? {
                        Message::Text(text) => self.handle_frame(&text).await,
                        Message::Ping(payload) => sink.send(Message::Pong(payload)).await?,
                        Message::Close(_) => {
                            tracing::info!("server sent close frame");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                        // Pongs and binary frames carry nothing for us.
                        _ => {}
                    }
                }
            }
        }
    }

    /// Decode one frame and forward it. Malformed frames are skipped;
    /// well-formed frames on unrecognized streams are counted and dropped.
    async fn handle_frame(&self, text: &str) {
        match self.codec.decode(text, Utc::now()) {
            Ok(FeedMessage::Unknown) => {
                self.status.record_unknown_frame();
                tracing::trace!("dropping frame from unrecognized stream");
            }
            Ok(message) => {
                self.status.record_message();
                let _ = self.event_tx.send(FeedEvent::Message(message)).await;
            }
            Err(e) => {
                self.status.record_malformed_frame();
                tracing::warn!(error = %e, "skipping malformed feed frame");
                let _ = self.event_tx.send(FeedEvent::Error(e.to_string())).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_url_includes_trade_and_depth_streams() {
        let config = FeedClientConfig::combined(
            "wss://stream.example.com",
            &[Symbol::new("BTCUSDT"), Symbol::new("ETHUSDT")],
            true,
        );

        assert_eq!(
            config.url,
            "wss://stream.example.com/stream?streams=btcusdt@trade/btcusdt@depth20@100ms/ethusdt@trade/ethusdt@depth20@100ms"
        );
    }

    #[test]
    fn combined_url_trade_only() {
        let config =
            FeedClientConfig::combined("wss://stream.example.com/", &[Symbol::new("EURUSD")], false);

        assert_eq!(
            config.url,
            "wss://stream.example.com/stream?streams=eurusd@trade"
        );
    }
}
