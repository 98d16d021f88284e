//! Order Trigger Engine
//!
//! Consumes ticks from the broadcast hub and executes pending orders whose
//! trigger condition the tick satisfies.
//!
//! # Architecture
//!
//! Two stages connected by a bounded queue, so database latency never blocks
//! tick ingestion:
//!
//! 1. **Parse stage** — extracts `{symbol, price}` from trade messages,
//!    drops everything else, and enqueues without blocking. Under overload
//!    the queue fills and ticks are dropped, never buffered unboundedly.
//! 2. **Match stage** — per tick, loads the pending orders for that symbol,
//!    evaluates each trigger predicate, and executes matches one at a time.
//!    The stage only ever sees the latest tick it actually received; ticks
//!    dropped under overload are not retroactively evaluated.
//!
//! Execution is a single guarded transaction per order. A concurrent
//! evaluation losing the guard is a no-op success, and a persistence error
//! is scoped to that one order — the rest of the batch still runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ExecuteOutcome, PendingOrderRepository};
use crate::application::services::routing_engine::{OrderRouter, RouteOutcome};
use crate::domain::{FeedMessage, Symbol};
use crate::infrastructure::broadcast::Subscription;
use crate::infrastructure::metrics;

/// Configuration for the trigger engine.
#[derive(Debug, Clone)]
pub struct TriggerEngineConfig {
    /// Capacity of the parse-to-match queue.
    pub queue_capacity: usize,
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
        }
    }
}

/// Output of the parse stage.
#[derive(Debug)]
struct Tick {
    symbol: Symbol,
    price: Decimal,
    parsed_at: Instant,
}

/// Counters exposed by the engine.
#[derive(Debug, Default)]
pub struct TriggerEngineStats {
    /// Ticks forwarded from the parse stage.
    pub ticks_parsed: AtomicU64,
    /// Ticks dropped because the match stage was behind.
    pub ticks_dropped: AtomicU64,
    /// Orders executed by this instance.
    pub orders_executed: AtomicU64,
    /// Evaluations that lost the execution guard to a concurrent instance.
    pub guard_conflicts: AtomicU64,
    /// Per-order persistence failures.
    pub order_errors: AtomicU64,
    /// Pending-order queries that failed outright.
    pub query_errors: AtomicU64,
}

/// Join handles for the two engine stages.
///
/// Cancel the engine's token, then await [`Self::stopped`]; once it returns,
/// no further execution is attempted.
#[derive(Debug)]
pub struct TriggerEngineHandle {
    parse: JoinHandle<()>,
    matcher: JoinHandle<()>,
}

impl TriggerEngineHandle {
    /// Wait for both stages to finish.
    pub async fn stopped(self) {
        let _ = self.parse.await;
        let _ = self.matcher.await;
    }
}

/// The trigger engine service.
pub struct TriggerEngine<R, Rt>
where
    R: PendingOrderRepository,
    Rt: OrderRouter,
{
    config: TriggerEngineConfig,
    orders: Arc<R>,
    router: Arc<Rt>,
    stats: Arc<TriggerEngineStats>,
    cancel: CancellationToken,
}

impl<R, Rt> TriggerEngine<R, Rt>
where
    R: PendingOrderRepository + 'static,
    Rt: OrderRouter + 'static,
{
    /// Create a new trigger engine.
    #[must_use]
    pub fn new(
        config: TriggerEngineConfig,
        orders: Arc<R>,
        router: Arc<Rt>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            orders,
            router,
            stats: Arc::new(TriggerEngineStats::default()),
            cancel,
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<TriggerEngineStats> {
        Arc::clone(&self.stats)
    }

    /// Start both stages, consuming messages from `subscription`.
    ///
    /// The subscription should come from
    /// [`crate::infrastructure::broadcast::BroadcastHub::register_trigger`]
    /// so the engine rides the deeper queue.
    #[must_use]
    pub fn start(self: Arc<Self>, subscription: Subscription) -> TriggerEngineHandle {
        let (tick_tx, tick_rx) = mpsc::channel(self.config.queue_capacity);

        let parse = tokio::spawn(Arc::clone(&self).parse_stage(subscription, tick_tx));
        let matcher = tokio::spawn(self.match_stage(tick_rx));

        TriggerEngineHandle { parse, matcher }
    }

    /// Pull messages off the hub queue, keep trades, drop the rest.
    async fn parse_stage(
        self: Arc<Self>,
        mut subscription: Subscription,
        tick_tx: mpsc::Sender<Tick>,
    ) {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("trigger parse stage cancelled");
                    return;
                }
                message = subscription.recv() => message,
            };

            let Some(message) = message else {
                tracing::info!("trigger subscription closed, parse stage ending");
                return;
            };

            let FeedMessage::Trade(quote) = message else {
                continue;
            };

            let tick = Tick {
                symbol: quote.symbol,
                price: quote.price,
                parsed_at: Instant::now(),
            };

            match tick_tx.try_send(tick) {
                Ok(()) => {
                    self.stats.ticks_parsed.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(tick)) => {
                    // The match stage is behind; this tick is lost to it.
                    self.stats.ticks_dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::record_tick_dropped();
                    tracing::trace!(symbol = %tick.symbol, "match stage behind, tick dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::info!("match stage gone, parse stage ending");
                    return;
                }
            }
        }
    }

    /// Drain the tick queue and evaluate pending orders per tick.
    async fn match_stage(self: Arc<Self>, mut tick_rx: mpsc::Receiver<Tick>) {
        loop {
            let tick = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("trigger match stage cancelled");
                    return;
                }
                tick = tick_rx.recv() => tick,
            };

            let Some(tick) = tick else {
                tracing::info!("tick queue closed, match stage ending");
                return;
            };

            self.evaluate_tick(&tick.symbol, tick.price).await;
            metrics::record_match_latency(tick.parsed_at.elapsed());
        }
    }

    /// Evaluate every pending order for one symbol against one price.
    ///
    /// A failed query skips the whole tick (the next tick retries); a failed
    /// execution skips only that order.
    async fn evaluate_tick(&self, symbol: &Symbol, price: Decimal) {
        let pending = match self.orders.pending_for_symbol(symbol).await {
            Ok(pending) => pending,
            Err(e) => {
                self.stats.query_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %symbol, error = %e, "pending-order query failed");
                return;
            }
        };

        for order in pending {
            if !order.should_execute(price) {
                continue;
            }

            let execution_price = order.execution_price(price);

            match self
                .orders
                .execute_order(&order, execution_price, Utc::now())
                .await
            {
                Ok(ExecuteOutcome::Applied) => {
                    self.stats.orders_executed.fetch_add(1, Ordering::Relaxed);
                    metrics::record_order_executed(order.side);
                    tracing::info!(
                        order_id = %order.id,
                        symbol = %order.symbol,
                        side = %order.side,
                        price = %execution_price,
                        "pending order executed"
                    );

                    self.route_executed_order(&order, execution_price).await;
                }
                Ok(ExecuteOutcome::AlreadyExecuted) => {
                    // Another instance won the guard. No-op success.
                    self.stats.guard_conflicts.fetch_add(1, Ordering::Relaxed);
                    metrics::record_order_conflict();
                    tracing::debug!(
                        order_id = %order.id,
                        "order already executed by a concurrent evaluation"
                    );
                }
                Err(e) => {
                    self.stats.order_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        order_id = %order.id,
                        error = %e,
                        "execution failed, order stays pending"
                    );
                }
            }
        }
    }

    /// Hand a freshly executed order to the routing engine.
    async fn route_executed_order(&self, order: &crate::domain::PendingOrder, price: Decimal) {
        let outcome = self.router.route(order, price).await;

        match outcome {
            RouteOutcome::Internal => {
                tracing::info!(order_id = %order.id, "order absorbed internally");
            }
            RouteOutcome::External { ref provider_order_id } => {
                tracing::info!(
                    order_id = %order.id,
                    provider_order_id,
                    "order routed externally"
                );
            }
            RouteOutcome::ReconciliationPending => {
                tracing::warn!(
                    order_id = %order.id,
                    "provider outcome indeterminate, reconciliation entry created"
                );
            }
            RouteOutcome::Failed { ref reason } => {
                tracing::error!(order_id = %order.id, reason, "routing failed");
            }
        }

        metrics::record_route_outcome(&outcome);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::application::ports::RepositoryError;
    use crate::domain::{OrderKind, OrderSide, OrderStatus, PendingOrder};

    /// Pending-order store with a real status guard, so at-most-once
    /// semantics are exercised rather than mocked away.
    #[derive(Default)]
    struct GuardedOrderStore {
        orders: Mutex<Vec<PendingOrder>>,
        executions: Mutex<Vec<(Uuid, Decimal)>>,
        fail_next_execute: Mutex<bool>,
    }

    impl GuardedOrderStore {
        fn seed(&self, order: PendingOrder) {
            self.orders.lock().push(order);
        }

        fn status_of(&self, id: Uuid) -> OrderStatus {
            self.orders
                .lock()
                .iter()
                .find(|o| o.id == id)
                .map(|o| o.status)
                .unwrap()
        }

        fn executions(&self) -> Vec<(Uuid, Decimal)> {
            self.executions.lock().clone()
        }
    }

    #[async_trait]
    impl PendingOrderRepository for GuardedOrderStore {
        async fn pending_for_symbol(
            &self,
            symbol: &Symbol,
        ) -> Result<Vec<PendingOrder>, RepositoryError> {
            Ok(self
                .orders
                .lock()
                .iter()
                .filter(|o| o.symbol == *symbol && o.status == OrderStatus::Pending)
                .cloned()
                .collect())
        }

        async fn execute_order(
            &self,
            order: &PendingOrder,
            price: Decimal,
            _executed_at: DateTime<Utc>,
        ) -> Result<ExecuteOutcome, RepositoryError> {
            if std::mem::take(&mut *self.fail_next_execute.lock()) {
                return Err(RepositoryError::Connection("injected".to_string()));
            }

            let mut orders = self.orders.lock();
            let stored = orders
                .iter_mut()
                .find(|o| o.id == order.id)
                .ok_or_else(|| RepositoryError::Integrity("unknown order".to_string()))?;

            if stored.status != OrderStatus::Pending {
                return Ok(ExecuteOutcome::AlreadyExecuted);
            }

            stored.status = OrderStatus::Executed;
            self.executions.lock().push((order.id, price));
            Ok(ExecuteOutcome::Applied)
        }
    }

    /// Router that records calls and always absorbs internally.
    #[derive(Default)]
    struct RecordingRouter {
        routed: Mutex<Vec<(Uuid, Decimal)>>,
    }

    #[async_trait]
    impl OrderRouter for RecordingRouter {
        async fn route(&self, order: &PendingOrder, execution_price: Decimal) -> RouteOutcome {
            self.routed.lock().push((order.id, execution_price));
            RouteOutcome::Internal
        }
    }

    fn buy_limit(symbol: &str, trigger: Decimal, limit: Option<Decimal>) -> PendingOrder {
        PendingOrder {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            symbol: Symbol::new(symbol),
            side: OrderSide::Buy,
            kind: OrderKind::Limit,
            quantity: dec!(1),
            trigger_price: trigger,
            limit_price: limit,
            status: OrderStatus::Pending,
            leverage: 1,
            created_at: Utc::now(),
        }
    }

    fn engine(
        store: Arc<GuardedOrderStore>,
        router: Arc<RecordingRouter>,
    ) -> TriggerEngine<GuardedOrderStore, RecordingRouter> {
        TriggerEngine::new(
            TriggerEngineConfig::default(),
            store,
            router,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn tick_below_buy_limit_trigger_executes_at_limit_price() {
        let store = Arc::new(GuardedOrderStore::default());
        let router = Arc::new(RecordingRouter::default());
        let order = buy_limit("BTCUSDT", dec!(100), Some(dec!(100)));
        let order_id = order.id;
        store.seed(order);

        let engine = engine(Arc::clone(&store), Arc::clone(&router));
        engine.evaluate_tick(&Symbol::new("BTCUSDT"), dec!(99.5)).await;

        assert_eq!(store.status_of(order_id), OrderStatus::Executed);
        assert_eq!(store.executions(), vec![(order_id, dec!(100))]);
        assert_eq!(router.routed.lock().len(), 1);
    }

    #[tokio::test]
    async fn tick_without_limit_price_executes_at_tick_price() {
        let store = Arc::new(GuardedOrderStore::default());
        let router = Arc::new(RecordingRouter::default());
        let order = buy_limit("BTCUSDT", dec!(100), None);
        let order_id = order.id;
        store.seed(order);

        let engine = engine(Arc::clone(&store), Arc::clone(&router));
        engine.evaluate_tick(&Symbol::new("BTCUSDT"), dec!(99.5)).await;

        assert_eq!(store.executions(), vec![(order_id, dec!(99.5))]);
    }

    #[tokio::test]
    async fn tick_above_buy_limit_trigger_changes_nothing() {
        let store = Arc::new(GuardedOrderStore::default());
        let router = Arc::new(RecordingRouter::default());
        let order = buy_limit("BTCUSDT", dec!(100), Some(dec!(100)));
        let order_id = order.id;
        store.seed(order);

        let engine = engine(Arc::clone(&store), Arc::clone(&router));
        engine.evaluate_tick(&Symbol::new("BTCUSDT"), dec!(100.5)).await;

        assert_eq!(store.status_of(order_id), OrderStatus::Pending);
        assert!(store.executions().is_empty());
        assert!(router.routed.lock().is_empty());
    }

    #[tokio::test]
    async fn duplicate_concurrent_ticks_execute_exactly_once() {
        let store = Arc::new(GuardedOrderStore::default());
        let router = Arc::new(RecordingRouter::default());
        let order = buy_limit("BTCUSDT", dec!(100), None);
        let order_id = order.id;
        store.seed(order);

        let engine = Arc::new(engine(Arc::clone(&store), Arc::clone(&router)));

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine.evaluate_tick(&Symbol::new("BTCUSDT"), dec!(99.5)).await;
            })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine.evaluate_tick(&Symbol::new("BTCUSDT"), dec!(99.5)).await;
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(store.executions().len(), 1);
        assert_eq!(store.executions()[0].0, order_id);
        let stats = engine.stats();
        assert_eq!(stats.orders_executed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn persistence_error_is_scoped_to_one_order() {
        let store = Arc::new(GuardedOrderStore::default());
        let router = Arc::new(RecordingRouter::default());

        let failing = buy_limit("BTCUSDT", dec!(100), None);
        let failing_id = failing.id;
        let surviving = buy_limit("BTCUSDT", dec!(100), None);
        let surviving_id = surviving.id;
        store.seed(failing);
        store.seed(surviving);
        *store.fail_next_execute.lock() = true;

        let engine = engine(Arc::clone(&store), Arc::clone(&router));
        engine.evaluate_tick(&Symbol::new("BTCUSDT"), dec!(99)).await;

        // First order hit the injected failure and stays pending; the
        // second still executed in the same batch.
        assert_eq!(store.status_of(failing_id), OrderStatus::Pending);
        assert_eq!(store.status_of(surviving_id), OrderStatus::Executed);
        assert_eq!(engine.stats.order_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn parse_stage_forwards_trades_and_skips_the_rest() {
        use crate::infrastructure::broadcast::BroadcastHub;

        let store = Arc::new(GuardedOrderStore::default());
        let router = Arc::new(RecordingRouter::default());
        let order = buy_limit("BTCUSDT", dec!(100), None);
        let order_id = order.id;
        store.seed(order);

        let cancel = CancellationToken::new();
        let engine = Arc::new(TriggerEngine::new(
            TriggerEngineConfig::default(),
            Arc::clone(&store),
            Arc::clone(&router),
            cancel.clone(),
        ));

        let hub = BroadcastHub::with_defaults();
        let subscription = hub.register_trigger("trigger");
        let handle = engine.start(subscription);

        hub.publish(&FeedMessage::Unknown);
        hub.publish(&FeedMessage::Trade(crate::domain::Quote::new(
            "BTCUSDT",
            dec!(99.5),
            Utc::now(),
        )));

        // Wait until the execution lands.
        for _ in 0..100 {
            if !store.executions().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(store.executions(), vec![(order_id, dec!(99.5))]);

        cancel.cancel();
        handle.stopped().await;
    }
}
