//! Repository Ports (Driven Ports)
//!
//! Interfaces to the relational store. The engine holds no long-lived cache
//! over any of these; every evaluation reads committed state, so multiple
//! engine instances stay consistent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::PendingOrder;
use crate::domain::reconciliation::ReconciliationEntry;
use crate::domain::symbol::Symbol;

/// Repository errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// Connection-level failure.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Query execution failure.
    #[error("Query error: {0}")]
    Query(String),

    /// Stored data failed to map onto domain types.
    #[error("Data integrity error: {0}")]
    Integrity(String),
}

impl From<DomainError> for RepositoryError {
    fn from(err: DomainError) -> Self {
        Self::Integrity(err.to_string())
    }
}

/// Outcome of the status-guarded pending -> executed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// This evaluation won the transition; fill and position are booked.
    Applied,
    /// The guard missed: another evaluation already moved the order out of
    /// pending. A no-op success.
    AlreadyExecuted,
}

/// Port over the pending-orders table.
///
/// The store must serve `pending_for_symbol` off a `(symbol, status)` index;
/// the match stage issues it on every tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PendingOrderRepository: Send + Sync {
    /// All orders for `symbol` still in `pending` status.
    async fn pending_for_symbol(
        &self,
        symbol: &Symbol,
    ) -> Result<Vec<PendingOrder>, RepositoryError>;

    /// Execute a triggered order as one transaction: transition the order to
    /// `executed` (guarded on `status = 'pending'`), insert the fill, open
    /// the position. Any failure rolls the whole transaction back, leaving
    /// the order pending for the next tick.
    async fn execute_order(
        &self,
        order: &PendingOrder,
        price: Decimal,
        executed_at: DateTime<Utc>,
    ) -> Result<ExecuteOutcome, RepositoryError>;
}

/// Port over the open-positions table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// Net exposure for an instrument: the signed sum of open-position
    /// quantities, computed from committed rows at call time.
    async fn net_exposure(&self, symbol: &Symbol) -> Result<Decimal, RepositoryError>;

    /// Signed notional summed across all open positions (book-wide).
    async fn total_net_notional(&self) -> Result<Decimal, RepositoryError>;

    /// Flag the position opened by `order_id` as externally hedged. Returns
    /// whether a row changed.
    async fn mark_hedged(&self, order_id: Uuid) -> Result<bool, RepositoryError>;
}

/// Port over the runtime-mutable routing configuration table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoutingConfigRepository: Send + Sync {
    /// All configuration rows.
    async fn load_all(&self) -> Result<HashMap<String, serde_json::Value>, RepositoryError>;

    /// One configuration value by key.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError>;

    /// Upsert one configuration value.
    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError>;
}

/// Port over the reconciliation-entries table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    /// Persist a fresh in-flight entry.
    async fn enqueue(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError>;

    /// In-flight entries whose next-attempt time has passed, oldest first.
    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReconciliationEntry>, RepositoryError>;

    /// Persist updated attempt counts / status for an entry.
    async fn update(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError>;

    /// Entries in `failed` status, awaiting operator action.
    async fn failed_entries(&self) -> Result<Vec<ReconciliationEntry>, RepositoryError>;

    /// Operator action: close an entry as `abandoned`. Returns whether a row
    /// changed.
    async fn abandon(&self, entry_id: Uuid) -> Result<bool, RepositoryError>;
}
