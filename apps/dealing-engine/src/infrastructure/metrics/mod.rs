//! Prometheus Metrics
//!
//! Counter, gauge, and histogram helpers for every pipeline stage, rendered
//! as exposition text by the health server's `/metrics` route.
//!
//! Families:
//!
//! - **Feed**: ticks received by kind, reconnects, malformed frames
//! - **Fan-out**: deliveries and per-consumer drops
//! - **Triggers**: match latency, executed orders, guard conflicts
//! - **Routing**: outcomes by kind
//! - **Reconciliation**: enqueued, resolved, and failed entries

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::services::RouteOutcome;
use crate::domain::{FeedMessage, OrderSide};

// =============================================================================
// Recorder Handle
// =============================================================================

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe every metric family.
///
/// Idempotent; later calls return the handle installed first.
///
/// # Panics
///
/// Panics when the global recorder cannot be installed, for example when
/// something else installed one first.
pub fn init_metrics() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("the global metrics recorder must install once at startup");
            describe_metrics();
            handle
        })
        .clone()
}

/// Handle for rendering the exposition text, `None` before [`init_metrics`].
#[must_use]
pub fn recorder_handle() -> Option<PrometheusHandle> {
    RECORDER.get().cloned()
}

// =============================================================================
// Descriptions
// =============================================================================

fn describe_metrics() {
    // Feed counters
    describe_counter!(
        "dealing_engine_ticks_received_total",
        "Total market data messages decoded from the feed"
    );
    describe_counter!(
        "dealing_engine_feed_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_counter!(
        "dealing_engine_malformed_frames_total",
        "Total feed frames skipped because they would not decode"
    );

    // Fan-out counters
    describe_counter!(
        "dealing_engine_broadcast_delivered_total",
        "Total messages delivered across all consumers"
    );
    describe_counter!(
        "dealing_engine_ticks_dropped_total",
        "Total ticks dropped on the trigger path due to backpressure"
    );
    describe_gauge!(
        "dealing_engine_broadcast_dropped",
        "Messages dropped per consumer since startup"
    );

    // Trigger counters
    describe_histogram!(
        "dealing_engine_match_latency_seconds",
        "Time from tick decode to trigger evaluation completing"
    );
    describe_counter!(
        "dealing_engine_orders_executed_total",
        "Total pending orders moved to executed"
    );
    describe_counter!(
        "dealing_engine_order_conflicts_total",
        "Total guard misses where another evaluation executed the order first"
    );

    // Routing counters
    describe_counter!(
        "dealing_engine_route_outcomes_total",
        "Total routing decisions by outcome"
    );

    // Reconciliation counters
    describe_counter!(
        "dealing_engine_reconciliation_enqueued_total",
        "Total reconciliation entries created for indeterminate provider calls"
    );
    describe_counter!(
        "dealing_engine_reconciliation_resolved_total",
        "Total reconciliation entries settled with a definitive status"
    );
    describe_counter!(
        "dealing_engine_reconciliation_failed_total",
        "Total reconciliation entries that exhausted their retries"
    );
}

// =============================================================================
// Recording Helpers
// =============================================================================

const fn feed_message_kind(message: &FeedMessage) -> &'static str {
    match message {
        FeedMessage::Trade(_) => "trade",
        FeedMessage::Depth(_) => "depth",
        FeedMessage::Unknown => "unknown",
    }
}

/// Record a decoded market data message.
pub fn record_feed_message(message: &FeedMessage) {
    counter!(
        "dealing_engine_ticks_received_total",
        "kind" => feed_message_kind(message)
    )
    .increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_feed_reconnect() {
    counter!("dealing_engine_feed_reconnects_total").increment(1);
}

/// Record a feed frame skipped because it would not decode.
pub fn record_malformed_frame() {
    counter!("dealing_engine_malformed_frames_total").increment(1);
}

/// Record messages delivered by one publish.
pub fn record_broadcast_delivered(count: u64) {
    counter!("dealing_engine_broadcast_delivered_total").increment(count);
}

/// Update the drop count for one consumer.
pub fn set_broadcast_dropped(consumer: &str, dropped: f64) {
    gauge!(
        "dealing_engine_broadcast_dropped",
        "consumer" => consumer.to_string()
    )
    .set(dropped);
}

/// Record a tick dropped on the trigger path.
pub fn record_tick_dropped() {
    counter!("dealing_engine_ticks_dropped_total").increment(1);
}

/// Record tick-to-evaluation latency.
pub fn record_match_latency(duration: Duration) {
    histogram!("dealing_engine_match_latency_seconds").record(duration.as_secs_f64());
}

/// Record a pending order moved to executed.
pub fn record_order_executed(side: OrderSide) {
    counter!(
        "dealing_engine_orders_executed_total",
        "side" => side.as_str()
    )
    .increment(1);
}

/// Record a guard miss on the pending-to-executed transition.
pub fn record_order_conflict() {
    counter!("dealing_engine_order_conflicts_total").increment(1);
}

/// Record a routing decision.
pub fn record_route_outcome(outcome: &RouteOutcome) {
    counter!(
        "dealing_engine_route_outcomes_total",
        "outcome" => outcome.label()
    )
    .increment(1);
}

/// Record a reconciliation entry created for an indeterminate provider call.
pub fn record_reconciliation_enqueued() {
    counter!("dealing_engine_reconciliation_enqueued_total").increment(1);
}

/// Record a reconciliation entry settled with a definitive status.
pub fn record_reconciliation_resolved() {
    counter!("dealing_engine_reconciliation_resolved_total").increment(1);
}

/// Record a reconciliation entry that exhausted its retries.
pub fn record_reconciliation_failed() {
    counter!("dealing_engine_reconciliation_failed_total").increment(1);
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::Quote;

    #[test]
    fn feed_message_kinds() {
        let trade = FeedMessage::Trade(Quote::new("BTCUSDT", dec!(97000), Utc::now()));
        assert_eq!(feed_message_kind(&trade), "trade");
        assert_eq!(feed_message_kind(&FeedMessage::Unknown), "unknown");
    }

    #[test]
    fn route_outcome_labels_are_stable() {
        assert_eq!(RouteOutcome::Internal.label(), "internal");
        assert_eq!(RouteOutcome::ReconciliationPending.label(), "reconciliation_pending");
    }
}
