//! Tick Source Adapters
//!
//! WebSocket client for the combined market data stream:
//!
//! - **Codec**: combined-stream JSON frames into [`crate::domain::FeedMessage`]
//! - **Reconnect**: exponential backoff, 1s doubling to a 60s cap
//! - **Client**: connection loop with skip-on-malformed frame handling

pub mod codec;
pub mod reconnect;
pub mod ws_client;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

pub use codec::{CodecError, FeedCodec};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use ws_client::{FeedClient, FeedClientConfig, FeedClientError, FeedEvent};

/// Connection state of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedConnectionState {
    /// Not connected.
    Disconnected,
    /// Connected and reading frames.
    Connected,
    /// Last connection attempt failed.
    Error,
}

/// Shared connection state and counters for one feed.
///
/// Written by the feed client, read by the health endpoint.
#[derive(Debug)]
pub struct FeedStatus {
    state: parking_lot::RwLock<FeedConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    malformed_frames: AtomicU64,
    unknown_frames: AtomicU64,
}

impl FeedStatus {
    /// Create a status tracker in the disconnected state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: parking_lot::RwLock::new(FeedConnectionState::Disconnected),
            last_connected_at: parking_lot::RwLock::new(None),
            error_message: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            unknown_frames: AtomicU64::new(0),
        }
    }

    /// Mark the feed connected. Clears the error and the attempt counter.
    pub fn set_connected(&self) {
        *self.state.write() = FeedConnectionState::Connected;
        *self.last_connected_at.write() = Some(Utc::now());
        *self.error_message.write() = None;
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Mark the feed disconnected without an error.
    pub fn set_disconnected(&self) {
        *self.state.write() = FeedConnectionState::Disconnected;
    }

    /// Mark the feed errored with a message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = FeedConnectionState::Error;
        *self.error_message.write() = Some(message);
    }

    /// Count a reconnection attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a decoded message.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a skipped malformed frame.
    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped frame from an unrecognized stream.
    pub fn record_unknown_frame(&self) {
        self.unknown_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> FeedConnectionState {
        *self.state.read()
    }

    /// Whether the feed is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == FeedConnectionState::Connected
    }

    /// Time of the last successful connect, if any.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last error message, if the feed is in the error state.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Reconnection attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Messages decoded and forwarded.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Malformed frames skipped.
    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    /// Well-formed frames dropped for lack of a recognized stream.
    #[must_use]
    pub fn unknown_frames(&self) -> u64 {
        self.unknown_frames.load(Ordering::Relaxed)
    }
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::new()
    }
}
