//! PostgreSQL store adapter.
//!
//! Implements every repository port over one connection pool. The schema is
//! owned by the platform API (the writer of pending orders); this adapter
//! expects:
//!
//! - `pending_orders(id, account_id, symbol, side, kind, quantity,
//!   trigger_price, limit_price, status, leverage, created_at)` with an
//!   index on `(symbol, status)` — the match stage queries it per tick
//! - `order_fills(id, order_id, account_id, symbol, side, quantity, price,
//!   executed_at)`
//! - `open_positions(id, order_id, account_id, symbol, side, quantity,
//!   entry_price, status, hedged, opened_at)`
//! - `routing_config(key, value jsonb, updated_at)`
//! - `reconciliation_entries(id, order_id, provider, attempts,
//!   last_attempt_at, next_attempt_at, status, detail, created_at)`
//!
//! Exposure reads aggregate committed rows at call time; nothing here is
//! cached, so multiple engine instances stay consistent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::application::ports::{
    ExecuteOutcome, PendingOrderRepository, PositionRepository, ReconciliationRepository,
    RepositoryError, RoutingConfigRepository,
};
use crate::domain::{Fill, OpenPosition, PendingOrder, ReconciliationEntry, Symbol};

/// PostgreSQL-backed store for orders, positions, routing config and
/// reconciliation entries.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect a pool and wrap it.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "postgres connection pool initialized");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<PendingOrder, RepositoryError> {
        let side: String = row
            .try_get("side")
            .map_err(|e| RepositoryError::Integrity(format!("side: {e}")))?;
        let kind: String = row
            .try_get("kind")
            .map_err(|e| RepositoryError::Integrity(format!("kind: {e}")))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| RepositoryError::Integrity(format!("status: {e}")))?;
        let symbol: String = row
            .try_get("symbol")
            .map_err(|e| RepositoryError::Integrity(format!("symbol: {e}")))?;

        Ok(PendingOrder {
            id: row
                .try_get("id")
                .map_err(|e| RepositoryError::Integrity(format!("id: {e}")))?,
            account_id: row
                .try_get("account_id")
                .map_err(|e| RepositoryError::Integrity(format!("account_id: {e}")))?,
            symbol: Symbol::new(symbol),
            side: side.parse()?,
            kind: kind.parse()?,
            quantity: row
                .try_get("quantity")
                .map_err(|e| RepositoryError::Integrity(format!("quantity: {e}")))?,
            trigger_price: row
                .try_get("trigger_price")
                .map_err(|e| RepositoryError::Integrity(format!("trigger_price: {e}")))?,
            limit_price: row
                .try_get("limit_price")
                .map_err(|e| RepositoryError::Integrity(format!("limit_price: {e}")))?,
            status: status.parse()?,
            leverage: row
                .try_get::<i32, _>("leverage")
                .map(|l| u32::try_from(l).unwrap_or(1))
                .map_err(|e| RepositoryError::Integrity(format!("leverage: {e}")))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| RepositoryError::Integrity(format!("created_at: {e}")))?,
        })
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<ReconciliationEntry, RepositoryError> {
        let status: String = row
            .try_get("status")
            .map_err(|e| RepositoryError::Integrity(format!("status: {e}")))?;

        Ok(ReconciliationEntry {
            id: row
                .try_get("id")
                .map_err(|e| RepositoryError::Integrity(format!("id: {e}")))?,
            order_id: row
                .try_get("order_id")
                .map_err(|e| RepositoryError::Integrity(format!("order_id: {e}")))?,
            provider: row
                .try_get("provider")
                .map_err(|e| RepositoryError::Integrity(format!("provider: {e}")))?,
            attempts: row
                .try_get::<i32, _>("attempts")
                .map(|a| u32::try_from(a).unwrap_or(0))
                .map_err(|e| RepositoryError::Integrity(format!("attempts: {e}")))?,
            last_attempt_at: row
                .try_get("last_attempt_at")
                .map_err(|e| RepositoryError::Integrity(format!("last_attempt_at: {e}")))?,
            next_attempt_at: row
                .try_get("next_attempt_at")
                .map_err(|e| RepositoryError::Integrity(format!("next_attempt_at: {e}")))?,
            status: status.parse()?,
            detail: row
                .try_get("detail")
                .map_err(|e| RepositoryError::Integrity(format!("detail: {e}")))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| RepositoryError::Integrity(format!("created_at: {e}")))?,
        })
    }
}

#[async_trait]
impl PendingOrderRepository for PostgresStore {
    async fn pending_for_symbol(
        &self,
        symbol: &Symbol,
    ) -> Result<Vec<PendingOrder>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, account_id, symbol, side, kind, quantity, trigger_price,
                   limit_price, status, leverage, created_at
            FROM pending_orders
            WHERE symbol = $1 AND status = 'pending'
            ORDER BY created_at
            ",
        )
        .bind(symbol.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(Self::row_to_order).collect()
    }

    async fn execute_order(
        &self,
        order: &PendingOrder,
        price: Decimal,
        executed_at: DateTime<Utc>,
    ) -> Result<ExecuteOutcome, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;

        // The status guard makes the transition at-most-once: a concurrent
        // evaluation that already moved the order out of pending leaves zero
        // rows for this update.
        let updated = sqlx::query(
            "UPDATE pending_orders SET status = 'executed' WHERE id = $1 AND status = 'pending'",
        )
        .bind(order.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            return Ok(ExecuteOutcome::AlreadyExecuted);
        }

        let fill = Fill::for_order(order, price, executed_at);
        sqlx::query(
            r"
            INSERT INTO order_fills (id, order_id, account_id, symbol, side, quantity, price, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(fill.id)
        .bind(fill.order_id)
        .bind(fill.account_id)
        .bind(fill.symbol.as_str())
        .bind(fill.side.as_str())
        .bind(fill.quantity)
        .bind(fill.price)
        .bind(fill.executed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let position = OpenPosition::for_order(order, price, executed_at);
        sqlx::query(
            r"
            INSERT INTO open_positions (id, order_id, account_id, symbol, side, quantity,
                                        entry_price, status, hedged, opened_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(position.id)
        .bind(position.order_id)
        .bind(position.account_id)
        .bind(position.symbol.as_str())
        .bind(position.side.as_str())
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.status.as_str())
        .bind(position.hedged)
        .bind(position.opened_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(ExecuteOutcome::Applied)
    }
}

#[async_trait]
impl PositionRepository for PostgresStore {
    async fn net_exposure(&self, symbol: &Symbol) -> Result<Decimal, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT COALESCE(SUM(CASE WHEN side = 'long' THEN quantity ELSE -quantity END), 0) AS net
            FROM open_positions
            WHERE symbol = $1 AND status = 'open'
            ",
        )
        .bind(symbol.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.try_get("net")
            .map_err(|e| RepositoryError::Integrity(format!("net: {e}")))
    }

    async fn total_net_notional(&self) -> Result<Decimal, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT COALESCE(SUM(CASE WHEN side = 'long'
                                     THEN quantity * entry_price
                                     ELSE -(quantity * entry_price) END), 0) AS net
            FROM open_positions
            WHERE status = 'open'
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.try_get("net")
            .map_err(|e| RepositoryError::Integrity(format!("net: {e}")))
    }

    async fn mark_hedged(&self, order_id: Uuid) -> Result<bool, RepositoryError> {
        let updated =
            sqlx::query("UPDATE open_positions SET hedged = TRUE WHERE order_id = $1 AND status = 'open'")
                .bind(order_id)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(updated.rows_affected() > 0)
    }
}

#[async_trait]
impl RoutingConfigRepository for PostgresStore {
    async fn load_all(&self) -> Result<HashMap<String, serde_json::Value>, RepositoryError> {
        let rows = sqlx::query("SELECT key, value FROM routing_config")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut config = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| RepositoryError::Integrity(format!("key: {e}")))?;
            let value: serde_json::Value = row
                .try_get("value")
                .map_err(|e| RepositoryError::Integrity(format!("value: {e}")))?;
            config.insert(key, value);
        }
        Ok(config)
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM routing_config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.map(|r| {
            r.try_get("value")
                .map_err(|e| RepositoryError::Integrity(format!("value: {e}")))
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO routing_config (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ReconciliationRepository for PostgresStore {
    async fn enqueue(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO reconciliation_entries (id, order_id, provider, attempts,
                                                last_attempt_at, next_attempt_at,
                                                status, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(entry.id)
        .bind(entry.order_id)
        .bind(&entry.provider)
        .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
        .bind(entry.last_attempt_at)
        .bind(entry.next_attempt_at)
        .bind(entry.status.as_str())
        .bind(&entry.detail)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReconciliationEntry>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, order_id, provider, attempts, last_attempt_at,
                   next_attempt_at, status, detail, created_at
            FROM reconciliation_entries
            WHERE status = 'in_flight' AND next_attempt_at <= $1
            ORDER BY next_attempt_at
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn update(&self, entry: &ReconciliationEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE reconciliation_entries SET
                attempts = $2,
                last_attempt_at = $3,
                next_attempt_at = $4,
                status = $5,
                detail = $6
            WHERE id = $1
            ",
        )
        .bind(entry.id)
        .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
        .bind(entry.last_attempt_at)
        .bind(entry.next_attempt_at)
        .bind(entry.status.as_str())
        .bind(&entry.detail)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn failed_entries(&self) -> Result<Vec<ReconciliationEntry>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, order_id, provider, attempts, last_attempt_at,
                   next_attempt_at, status, detail, created_at
            FROM reconciliation_entries
            WHERE status = 'failed'
            ORDER BY created_at
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn abandon(&self, entry_id: Uuid) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            r"
            UPDATE reconciliation_entries SET status = 'abandoned'
            WHERE id = $1 AND status IN ('in_flight', 'failed')
            ",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(updated.rows_affected() > 0)
    }
}

// Status strings bound above must stay in sync with the domain parsers.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderStatus, PositionStatus, ReconciliationStatus};

    #[test]
    fn bound_status_literals_parse_back() {
        assert_eq!(
            "pending".parse::<OrderStatus>().ok(),
            Some(OrderStatus::Pending)
        );
        assert_eq!(
            "executed".parse::<OrderStatus>().ok(),
            Some(OrderStatus::Executed)
        );
        assert_eq!(
            "open".parse::<PositionStatus>().ok(),
            Some(PositionStatus::Open)
        );
        assert_eq!(
            "in_flight".parse::<ReconciliationStatus>().ok(),
            Some(ReconciliationStatus::InFlight)
        );
        assert_eq!(
            "abandoned".parse::<ReconciliationStatus>().ok(),
            Some(ReconciliationStatus::Abandoned)
        );
    }
}
