//! Reconciliation Sweep
//!
//! Settles provider calls whose outcome was never observed. The routing
//! engine enqueues an entry whenever an external execute times out or loses
//! its connection; this service periodically re-queries `order_status` for
//! due entries until the outcome is known or the attempt budget runs out.
//!
//! A definitive provider status resolves the entry — a filled hedge also
//! marks the originating position as hedged. A still-working or unreachable
//! provider reschedules the entry with exponentially increasing backoff.
//! Once the attempt limit is exceeded the entry turns `failed` and is
//! surfaced for operator action; it is never silently dropped and never
//! retried again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    PositionRepository, ProviderOrderStatus, ReconciliationRepository,
};
use crate::application::services::routing_engine::ProviderRegistry;
use crate::domain::ReconciliationEntry;
use crate::infrastructure::metrics;

/// Configuration for the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often the sweep wakes up.
    pub sweep_interval: Duration,
    /// Backoff for the first retry; doubles with each attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Attempts before an entry turns `failed`.
    pub max_attempts: u32,
    /// Entries examined per sweep.
    pub batch_limit: u32,
    /// Deadline for each `order_status` call.
    pub provider_deadline: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(900),
            max_attempts: 10,
            batch_limit: 50,
            provider_deadline: Duration::from_secs(5),
        }
    }
}

impl ReconcilerConfig {
    /// Backoff before retry number `attempts + 1`.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempts.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Due entries examined.
    pub examined: usize,
    /// Entries settled by a definitive provider status.
    pub resolved: usize,
    /// Entries rescheduled for another attempt.
    pub rescheduled: usize,
    /// Entries that exhausted their attempt budget this sweep.
    pub failed: usize,
}

/// The reconciliation sweep service.
pub struct Reconciler<Q, P>
where
    Q: ReconciliationRepository,
    P: PositionRepository,
{
    config: ReconcilerConfig,
    queue: Arc<Q>,
    positions: Arc<P>,
    providers: Arc<ProviderRegistry>,
    cancel: CancellationToken,
}

impl<Q, P> Reconciler<Q, P>
where
    Q: ReconciliationRepository + 'static,
    P: PositionRepository + 'static,
{
    /// Create a new sweep service.
    #[must_use]
    pub fn new(
        config: ReconcilerConfig,
        queue: Arc<Q>,
        positions: Arc<P>,
        providers: Arc<ProviderRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            queue,
            positions,
            providers,
            cancel,
        }
    }

    /// Run sweeps on the configured interval until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("reconciliation sweep cancelled");
                    return;
                }
                _ = interval.tick() => {}
            }

            let summary = self.sweep(Utc::now()).await;
            if summary.examined > 0 {
                tracing::info!(
                    examined = summary.examined,
                    resolved = summary.resolved,
                    rescheduled = summary.rescheduled,
                    failed = summary.failed,
                    "reconciliation sweep finished"
                );
            }
        }
    }

    /// Examine every due entry once.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepSummary {
        let due = match self.queue.due_entries(now, self.config.batch_limit).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load due reconciliation entries");
                return SweepSummary::default();
            }
        };

        let mut summary = SweepSummary {
            examined: due.len(),
            ..SweepSummary::default()
        };

        for entry in due {
            match self.process_entry(entry, now).await {
                EntryOutcome::Resolved => summary.resolved += 1,
                EntryOutcome::Rescheduled => summary.rescheduled += 1,
                EntryOutcome::Failed => summary.failed += 1,
                EntryOutcome::Skipped => {}
            }
        }

        summary
    }

    /// Re-query one entry and apply the outcome.
    async fn process_entry(&self, entry: ReconciliationEntry, now: DateTime<Utc>) -> EntryOutcome {
        let Some(provider) = self.providers.get(&entry.provider) else {
            // Provider vanished from the registry (config change); burn an
            // attempt so the entry still terminates.
            tracing::warn!(
                entry_id = %entry.id,
                provider = %entry.provider,
                "reconciliation entry references unregistered provider"
            );
            return self.reschedule(entry, now).await;
        };

        let report = provider
            .order_status(entry.order_id, self.config.provider_deadline)
            .await;

        match report {
            Ok(report) if report.status.is_definitive() => {
                self.settle(entry, report.status, now).await
            }
            Ok(report) => {
                tracing::debug!(
                    entry_id = %entry.id,
                    status = ?report.status,
                    "order still working at provider"
                );
                self.reschedule(entry, now).await
            }
            Err(e) => {
                tracing::debug!(entry_id = %entry.id, error = %e, "status lookup failed");
                self.reschedule(entry, now).await
            }
        }
    }

    /// Apply a definitive provider status and resolve the entry.
    async fn settle(
        &self,
        mut entry: ReconciliationEntry,
        status: ProviderOrderStatus,
        now: DateTime<Utc>,
    ) -> EntryOutcome {
        if status == ProviderOrderStatus::Filled {
            match self.positions.mark_hedged(entry.order_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        order_id = %entry.order_id,
                        "hedge filled but no open position row matched"
                    );
                }
                Err(e) => {
                    // Position update failed; keep the entry in flight so
                    // the next sweep replays (mark_hedged is idempotent).
                    tracing::warn!(
                        entry_id = %entry.id,
                        error = %e,
                        "failed to mark position hedged"
                    );
                    return self.reschedule(entry, now).await;
                }
            }
        } else {
            tracing::info!(
                entry_id = %entry.id,
                order_id = %entry.order_id,
                status = ?status,
                "hedge did not execute, exposure stays internal"
            );
        }

        if let Err(e) = entry.resolve() {
            tracing::warn!(entry_id = %entry.id, error = %e, "entry not resolvable");
            return EntryOutcome::Skipped;
        }

        if let Err(e) = self.queue.update(&entry).await {
            tracing::warn!(entry_id = %entry.id, error = %e, "failed to persist resolution");
            return EntryOutcome::Skipped;
        }

        metrics::record_reconciliation_resolved();
        tracing::info!(
            entry_id = %entry.id,
            order_id = %entry.order_id,
            status = ?status,
            "reconciliation entry resolved"
        );
        EntryOutcome::Resolved
    }

    /// Count the attempt and either schedule the next one or fail the entry.
    async fn reschedule(&self, mut entry: ReconciliationEntry, now: DateTime<Utc>) -> EntryOutcome {
        let delay = self.config.delay_for(entry.attempts);
        let next = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);

        if let Err(e) = entry.record_attempt(now, next) {
            tracing::warn!(entry_id = %entry.id, error = %e, "entry not retryable");
            return EntryOutcome::Skipped;
        }

        let exhausted = entry.attempts >= self.config.max_attempts;
        if exhausted {
            if let Err(e) = entry.fail() {
                tracing::warn!(entry_id = %entry.id, error = %e, "entry not failable");
                return EntryOutcome::Skipped;
            }
        }

        if let Err(e) = self.queue.update(&entry).await {
            tracing::warn!(entry_id = %entry.id, error = %e, "failed to persist attempt");
            return EntryOutcome::Skipped;
        }

        if exhausted {
            metrics::record_reconciliation_failed();
            tracing::error!(
                entry_id = %entry.id,
                order_id = %entry.order_id,
                attempts = entry.attempts,
                provider = %entry.provider,
                "reconciliation retries exhausted, operator action required"
            );
            EntryOutcome::Failed
        } else {
            tracing::debug!(
                entry_id = %entry.id,
                attempts = entry.attempts,
                next_attempt_at = %entry.next_attempt_at,
                "reconciliation attempt rescheduled"
            );
            EntryOutcome::Rescheduled
        }
    }
}

enum EntryOutcome {
    Resolved,
    Rescheduled,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mockall::predicate;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::application::ports::{
        ExecutionReport, MockLiquidityProvider, MockPositionRepository, ProviderError,
        RepositoryError,
    };
    use crate::domain::ReconciliationStatus;

    /// Reconciliation store backed by a vec, preserving entry semantics.
    #[derive(Default)]
    struct EntryStore {
        entries: Mutex<Vec<ReconciliationEntry>>,
    }

    impl EntryStore {
        fn seed(&self, entry: ReconciliationEntry) {
            self.entries.lock().push(entry);
        }

        fn get(&self, id: Uuid) -> ReconciliationEntry {
            self.entries
                .lock()
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl ReconciliationRepository for EntryStore {
        async fn enqueue(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError> {
            self.entries.lock().push(entry.clone());
            Ok(())
        }

        async fn due_entries(
            &self,
            now: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<ReconciliationEntry>, RepositoryError> {
            Ok(self
                .entries
                .lock()
                .iter()
                .filter(|e| e.is_due(now))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn update(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError> {
            let mut entries = self.entries.lock();
            let stored = entries
                .iter_mut()
                .find(|e| e.id == entry.id)
                .ok_or_else(|| RepositoryError::Integrity("unknown entry".to_string()))?;
            *stored = entry.clone();
            Ok(())
        }

        async fn failed_entries(&self) -> Result<Vec<ReconciliationEntry>, RepositoryError> {
            Ok(self
                .entries
                .lock()
                .iter()
                .filter(|e| e.status == ReconciliationStatus::Failed)
                .cloned()
                .collect())
        }

        async fn abandon(&self, entry_id: Uuid) -> Result<bool, RepositoryError> {
            let mut entries = self.entries.lock();
            match entries.iter_mut().find(|e| e.id == entry_id) {
                Some(entry) => Ok(entry.abandon().is_ok()),
                None => Ok(false),
            }
        }
    }

    fn filled_report(client_order_id: Uuid) -> ExecutionReport {
        ExecutionReport {
            provider_order_id: "SIM-7".to_string(),
            client_order_id,
            status: ProviderOrderStatus::Filled,
            filled_quantity: dec!(10),
            remaining_quantity: Decimal::ZERO,
            average_price: Some(dec!(100)),
            fee: Decimal::ZERO,
            error: None,
        }
    }

    fn due_entry(provider: &str) -> ReconciliationEntry {
        ReconciliationEntry::new(
            Uuid::new_v4(),
            provider,
            "execute timed out",
            Utc::now() - chrono::Duration::seconds(1),
        )
    }

    fn reconciler(
        config: ReconcilerConfig,
        store: Arc<EntryStore>,
        positions: MockPositionRepository,
        provider: MockLiquidityProvider,
    ) -> Reconciler<EntryStore, MockPositionRepository> {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider));
        Reconciler::new(
            config,
            store,
            Arc::new(positions),
            Arc::new(registry),
            CancellationToken::new(),
        )
    }

    fn sim_provider() -> MockLiquidityProvider {
        let mut p = MockLiquidityProvider::new();
        p.expect_name().return_const("sim".to_string());
        p
    }

    #[tokio::test]
    async fn filled_status_resolves_entry_and_marks_position_hedged() {
        let store = Arc::new(EntryStore::default());
        let entry = due_entry("sim");
        let entry_id = entry.id;
        let order_id = entry.order_id;
        store.seed(entry);

        let mut provider = sim_provider();
        provider
            .expect_order_status()
            .with(predicate::eq(order_id), predicate::always())
            .returning(move |id, _| Ok(filled_report(id)));

        let mut positions = MockPositionRepository::new();
        positions
            .expect_mark_hedged()
            .with(predicate::eq(order_id))
            .times(1)
            .returning(|_| Ok(true));

        let r = reconciler(
            ReconcilerConfig::default(),
            Arc::clone(&store),
            positions,
            provider,
        );
        let summary = r.sweep(Utc::now()).await;

        assert_eq!(summary.examined, 1);
        assert_eq!(summary.resolved, 1);
        assert_eq!(store.get(entry_id).status, ReconciliationStatus::Resolved);
    }

    #[tokio::test]
    async fn cancelled_status_resolves_without_touching_positions() {
        let store = Arc::new(EntryStore::default());
        let entry = due_entry("sim");
        let entry_id = entry.id;
        store.seed(entry);

        let mut provider = sim_provider();
        provider.expect_order_status().returning(|id, _| {
            Ok(ExecutionReport {
                status: ProviderOrderStatus::Cancelled,
                filled_quantity: Decimal::ZERO,
                remaining_quantity: dec!(10),
                average_price: None,
                ..filled_report(id)
            })
        });

        // No mark_hedged expectation: a call would panic the mock.
        let positions = MockPositionRepository::new();

        let r = reconciler(
            ReconcilerConfig::default(),
            Arc::clone(&store),
            positions,
            provider,
        );
        let summary = r.sweep(Utc::now()).await;

        assert_eq!(summary.resolved, 1);
        assert_eq!(store.get(entry_id).status, ReconciliationStatus::Resolved);
    }

    #[tokio::test]
    async fn indeterminate_lookup_reschedules_with_growing_backoff() {
        let store = Arc::new(EntryStore::default());
        let entry = due_entry("sim");
        let entry_id = entry.id;
        store.seed(entry);

        let mut provider = sim_provider();
        provider
            .expect_order_status()
            .returning(|_, _| Err(ProviderError::Timeout { timeout_ms: 5000 }));

        let config = ReconcilerConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(900),
            max_attempts: 10,
            ..ReconcilerConfig::default()
        };
        let r = reconciler(
            config,
            Arc::clone(&store),
            MockPositionRepository::new(),
            provider,
        );

        let now = Utc::now();
        let summary = r.sweep(now).await;
        assert_eq!(summary.rescheduled, 1);

        let after = store.get(entry_id);
        assert_eq!(after.attempts, 1);
        assert_eq!(after.status, ReconciliationStatus::InFlight);
        // First retry backs off by the base delay.
        assert!(after.next_attempt_at >= now + chrono::Duration::seconds(60));

        // Second failed attempt doubles the backoff.
        let later = after.next_attempt_at + chrono::Duration::seconds(1);
        let _ = r.sweep(later).await;
        let after = store.get(entry_id);
        assert_eq!(after.attempts, 2);
        assert!(after.next_attempt_at >= later + chrono::Duration::seconds(120));
    }

    #[tokio::test]
    async fn exhausted_attempts_turn_failed_and_never_retry() {
        let store = Arc::new(EntryStore::default());
        let entry = due_entry("sim");
        let entry_id = entry.id;
        store.seed(entry);

        let mut provider = sim_provider();
        provider
            .expect_order_status()
            .times(2)
            .returning(|_, _| Err(ProviderError::Timeout { timeout_ms: 5000 }));

        let config = ReconcilerConfig {
            base_delay: Duration::ZERO,
            max_attempts: 2,
            ..ReconcilerConfig::default()
        };
        let r = reconciler(
            config,
            Arc::clone(&store),
            MockPositionRepository::new(),
            provider,
        );

        let _ = r.sweep(Utc::now()).await;
        let summary = r.sweep(Utc::now() + chrono::Duration::seconds(1)).await;
        assert_eq!(summary.failed, 1);

        let failed = store.get(entry_id);
        assert_eq!(failed.status, ReconciliationStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert_eq!(store.failed_entries().await.unwrap().len(), 1);

        // Failed entries are no longer due; the provider mock's times(2)
        // bound proves no further lookup happens.
        let summary = r.sweep(Utc::now() + chrono::Duration::seconds(2)).await;
        assert_eq!(summary, SweepSummary::default());
    }

    #[tokio::test]
    async fn mark_hedged_failure_keeps_entry_in_flight() {
        let store = Arc::new(EntryStore::default());
        let entry = due_entry("sim");
        let entry_id = entry.id;
        store.seed(entry);

        let mut provider = sim_provider();
        provider
            .expect_order_status()
            .returning(move |id, _| Ok(filled_report(id)));

        let mut positions = MockPositionRepository::new();
        positions
            .expect_mark_hedged()
            .returning(|_| Err(RepositoryError::Connection("db down".to_string())));

        let r = reconciler(
            ReconcilerConfig::default(),
            Arc::clone(&store),
            positions,
            provider,
        );
        let summary = r.sweep(Utc::now()).await;

        assert_eq!(summary.rescheduled, 1);
        let after = store.get(entry_id);
        assert_eq!(after.status, ReconciliationStatus::InFlight);
        assert_eq!(after.attempts, 1);
    }

    #[test]
    fn backoff_doubles_to_the_cap() {
        let config = ReconcilerConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(900),
            ..ReconcilerConfig::default()
        };

        assert_eq!(config.delay_for(0), Duration::from_secs(60));
        assert_eq!(config.delay_for(1), Duration::from_secs(120));
        assert_eq!(config.delay_for(2), Duration::from_secs(240));
        assert_eq!(config.delay_for(3), Duration::from_secs(480));
        assert_eq!(config.delay_for(4), Duration::from_secs(900));
        assert_eq!(config.delay_for(30), Duration::from_secs(900));
    }
}
