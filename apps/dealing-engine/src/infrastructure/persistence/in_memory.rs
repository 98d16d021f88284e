//! In-memory store for tests and development.
//!
//! Implements every repository port over maps, with the same guarded
//! transition semantics as the PostgreSQL adapter: `execute_order` applies
//! at most once per order, keyed on the stored row's status. Not for
//! production use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::ports::{
    ExecuteOutcome, PendingOrderRepository, PositionRepository, ReconciliationRepository,
    RepositoryError, RoutingConfigRepository,
};
use crate::domain::{
    Fill, OpenPosition, OrderStatus, PendingOrder, PositionStatus, ReconciliationEntry,
    ReconciliationStatus, Symbol,
};

/// Map-backed implementation of the store ports.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    orders: RwLock<HashMap<Uuid, PendingOrder>>,
    fills: RwLock<Vec<Fill>>,
    positions: RwLock<Vec<OpenPosition>>,
    config: RwLock<HashMap<String, serde_json::Value>>,
    entries: RwLock<HashMap<Uuid, ReconciliationEntry>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pending order (test setup).
    pub fn seed_order(&self, order: PendingOrder) {
        self.orders.write().insert(order.id, order);
    }

    /// Seed an open position (test setup).
    pub fn seed_position(&self, position: OpenPosition) {
        self.positions.write().push(position);
    }

    /// Seed a routing-config value (test setup).
    pub fn seed_config(&self, key: impl Into<String>, value: serde_json::Value) {
        self.config.write().insert(key.into(), value);
    }

    /// Current copy of an order.
    #[must_use]
    pub fn order(&self, id: Uuid) -> Option<PendingOrder> {
        self.orders.read().get(&id).cloned()
    }

    /// All fills booked so far.
    #[must_use]
    pub fn fills(&self) -> Vec<Fill> {
        self.fills.read().clone()
    }

    /// All positions booked so far.
    #[must_use]
    pub fn positions(&self) -> Vec<OpenPosition> {
        self.positions.read().clone()
    }

    /// The position opened by an order, if any.
    #[must_use]
    pub fn position_for_order(&self, order_id: Uuid) -> Option<OpenPosition> {
        self.positions
            .read()
            .iter()
            .find(|p| p.order_id == order_id)
            .cloned()
    }

    /// Current copy of a reconciliation entry.
    #[must_use]
    pub fn entry(&self, id: Uuid) -> Option<ReconciliationEntry> {
        self.entries.read().get(&id).cloned()
    }

    /// All reconciliation entries, any status.
    #[must_use]
    pub fn entries(&self) -> Vec<ReconciliationEntry> {
        self.entries.read().values().cloned().collect()
    }
}

#[async_trait]
impl PendingOrderRepository for InMemoryStore {
    async fn pending_for_symbol(
        &self,
        symbol: &Symbol,
    ) -> Result<Vec<PendingOrder>, RepositoryError> {
        let mut pending: Vec<PendingOrder> = self
            .orders
            .read()
            .values()
            .filter(|o| o.symbol == *symbol && o.status == OrderStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|o| o.created_at);
        Ok(pending)
    }

    async fn execute_order(
        &self,
        order: &PendingOrder,
        price: Decimal,
        executed_at: DateTime<Utc>,
    ) -> Result<ExecuteOutcome, RepositoryError> {
        // Guard against the stored row, not the caller's copy, while holding
        // the write lock: the transition applies at most once.
        {
            let mut orders = self.orders.write();
            match orders.get_mut(&order.id) {
                Some(stored) if stored.status == OrderStatus::Pending => {
                    stored.status = OrderStatus::Executed;
                }
                _ => return Ok(ExecuteOutcome::AlreadyExecuted),
            }
        }

        self.fills
            .write()
            .push(Fill::for_order(order, price, executed_at));
        self.positions
            .write()
            .push(OpenPosition::for_order(order, price, executed_at));

        Ok(ExecuteOutcome::Applied)
    }
}

#[async_trait]
impl PositionRepository for InMemoryStore {
    async fn net_exposure(&self, symbol: &Symbol) -> Result<Decimal, RepositoryError> {
        Ok(self
            .positions
            .read()
            .iter()
            .filter(|p| p.symbol == *symbol && p.status == PositionStatus::Open)
            .map(OpenPosition::signed_quantity)
            .sum())
    }

    async fn total_net_notional(&self) -> Result<Decimal, RepositoryError> {
        Ok(self
            .positions
            .read()
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
            .map(OpenPosition::signed_notional)
            .sum())
    }

    async fn mark_hedged(&self, order_id: Uuid) -> Result<bool, RepositoryError> {
        let mut positions = self.positions.write();
        let mut changed = false;
        for position in positions
            .iter_mut()
            .filter(|p| p.order_id == order_id && p.status == PositionStatus::Open)
        {
            position.hedged = true;
            changed = true;
        }
        Ok(changed)
    }
}

#[async_trait]
impl RoutingConfigRepository for InMemoryStore {
    async fn load_all(&self) -> Result<HashMap<String, serde_json::Value>, RepositoryError> {
        Ok(self.config.read().clone())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.config.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        self.config.write().insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[async_trait]
impl ReconciliationRepository for InMemoryStore {
    async fn enqueue(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError> {
        self.entries.write().insert(entry.id, entry.clone());
        Ok(())
    }

    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReconciliationEntry>, RepositoryError> {
        let mut due: Vec<ReconciliationEntry> = self
            .entries
            .read()
            .values()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_attempt_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn update(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write();
        if !entries.contains_key(&entry.id) {
            return Err(RepositoryError::Integrity(format!(
                "unknown reconciliation entry {}",
                entry.id
            )));
        }
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn failed_entries(&self) -> Result<Vec<ReconciliationEntry>, RepositoryError> {
        let mut failed: Vec<ReconciliationEntry> = self
            .entries
            .read()
            .values()
            .filter(|e| e.status == ReconciliationStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|e| e.created_at);
        Ok(failed)
    }

    async fn abandon(&self, entry_id: Uuid) -> Result<bool, RepositoryError> {
        let mut entries = self.entries.write();
        match entries.get_mut(&entry_id) {
            Some(entry) => Ok(entry.abandon().is_ok()),
            None => Ok(false),
        }
    }
}
