//! Fan-out Broadcaster
//!
//! Distributes decoded feed messages to every registered consumer without
//! letting a slow consumer stall the publisher or its peers.
//!
//! # Architecture
//!
//! Each consumer owns a fixed-capacity queue. Publishing never blocks: a
//! message that finds a consumer's queue full is dropped for that consumer
//! only and counted against it, while delivery to the others proceeds.
//! The trigger engine registers with a deeper queue than dashboard-style
//! consumers since dropped ticks there mean missed executions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::domain::FeedMessage;

// =============================================================================
// Configuration
// =============================================================================

/// Queue capacities for the broadcast hub.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Queue capacity for ordinary consumers.
    pub default_capacity: usize,
    /// Queue capacity for the trigger engine consumer.
    pub trigger_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            default_capacity: 256,
            trigger_capacity: 4_096,
        }
    }
}

// =============================================================================
// Consumer Handle
// =============================================================================

/// Receiving half of one consumer's queue.
///
/// Dropping the subscription unregisters the consumer: the hub prunes its
/// slot on the next publish.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    name: String,
    rx: mpsc::Receiver<FeedMessage>,
}

impl Subscription {
    /// Receive the next message, or `None` once unregistered from the hub.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }

    /// Consumer id assigned by the hub.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Consumer name, used in stats and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Sending half plus counters for one consumer.
#[derive(Debug)]
struct ConsumerSlot {
    id: u64,
    name: String,
    capacity: usize,
    tx: mpsc::Sender<FeedMessage>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Central fan-out point between the feed clients and all consumers.
///
/// # Example
///
/// ```rust
/// use dealing_engine::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let mut subscription = hub.register("dashboard");
///
/// // In another task: hub.publish(message);
/// // subscription.recv().await yields messages in publish order.
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    consumers: parking_lot::RwLock<Vec<Arc<ConsumerSlot>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    /// Create a new hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            consumers: parking_lot::RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Register a consumer with the default queue capacity.
    #[must_use]
    pub fn register(&self, name: &str) -> Subscription {
        self.register_with_capacity(name, self.config.default_capacity)
    }

    /// Register the trigger engine consumer with its deeper queue.
    #[must_use]
    pub fn register_trigger(&self, name: &str) -> Subscription {
        self.register_with_capacity(name, self.config.trigger_capacity)
    }

    /// Register a consumer with an explicit queue capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn register_with_capacity(&self, name: &str, capacity: usize) -> Subscription {
        assert!(capacity > 0, "consumer queue capacity must be non-zero");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity);

        let slot = Arc::new(ConsumerSlot {
            id,
            name: name.to_string(),
            capacity,
            tx,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        self.consumers.write().push(slot);
        tracing::debug!(consumer = name, id, capacity, "consumer registered");

        Subscription {
            id,
            name: name.to_string(),
            rx,
        }
    }

    /// Remove a consumer by id. Its subscription starts yielding `None`.
    pub fn unregister(&self, id: u64) {
        self.consumers.write().retain(|slot| slot.id != id);
    }

    /// Publish a message to every registered consumer.
    ///
    /// Never blocks. A consumer whose queue is full misses this message and
    /// has its drop counter bumped; the rest still receive it. Consumers
    /// whose subscription was dropped are pruned. Returns the number of
    /// consumers the message was delivered to.
    pub fn publish(&self, message: &FeedMessage) -> usize {
        let consumers = self.consumers.read();

        let mut delivered = 0;
        let mut closed: Vec<u64> = Vec::new();

        for slot in consumers.iter() {
            match slot.tx.try_send(message.clone()) {
                Ok(()) => {
                    slot.delivered.fetch_add(1, Ordering::Relaxed);
                    delivered += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(consumer = %slot.name, "queue full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(slot.id);
                }
            }
        }

        drop(consumers);

        if !closed.is_empty() {
            self.consumers
                .write()
                .retain(|slot| !closed.contains(&slot.id));
        }

        delivered
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    /// Per-consumer delivery statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let consumers = self
            .consumers
            .read()
            .iter()
            .map(|slot| ConsumerStats {
                name: slot.name.clone(),
                capacity: slot.capacity,
                delivered: slot.delivered.load(Ordering::Relaxed),
                dropped: slot.dropped.load(Ordering::Relaxed),
            })
            .collect();

        BroadcastStats { consumers }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

// =============================================================================
// Statistics
// =============================================================================

/// Delivery statistics for one consumer.
#[derive(Debug, Clone)]
pub struct ConsumerStats {
    /// Consumer name.
    pub name: String,
    /// Queue capacity.
    pub capacity: usize,
    /// Messages delivered.
    pub delivered: u64,
    /// Messages dropped because the queue was full.
    pub dropped: u64,
}

/// Delivery statistics for all consumers.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    /// Per-consumer entries, in registration order.
    pub consumers: Vec<ConsumerStats>,
}

impl BroadcastStats {
    /// Total messages dropped across all consumers.
    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        self.consumers.iter().map(|c| c.dropped).sum()
    }

    /// Total messages delivered across all consumers.
    #[must_use]
    pub fn total_delivered(&self) -> u64 {
        self.consumers.iter().map(|c| c.delivered).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================
