//! Liquidity Provider Port (Driven Port)
//!
//! Timeout-bounded request/response interface to an external liquidity
//! provider. Every call takes an explicit deadline; exceeding it surfaces
//! [`ProviderError::Timeout`] instead of hanging the caller.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::OrderSide;
use crate::domain::symbol::Symbol;

// =============================================================================
// Requests
// =============================================================================

/// Order kind on the provider wire.
///
/// Routed orders have already triggered, so they go out as market or limit;
/// stop semantics never cross the provider boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOrderKind {
    /// Execute at the provider's price.
    Market,
    /// Execute at the limit price or better.
    Limit,
}

/// Request to execute an order at a provider.
///
/// `client_order_id` is generated by the caller before the call leaves the
/// process, so an indeterminate outcome can later be reconciled by status
/// lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteOrderRequest {
    /// Caller-generated id, echoed back by the provider.
    pub client_order_id: Uuid,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Order side.
    pub side: OrderSide,
    /// Market or limit.
    pub kind: ProviderOrderKind,
    /// Quantity to execute.
    pub quantity: Decimal,
    /// Limit price (for limit orders).
    pub limit_price: Option<Decimal>,
}

impl ExecuteOrderRequest {
    /// Create a market execute request.
    #[must_use]
    pub const fn market(
        client_order_id: Uuid,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
    ) -> Self {
        Self {
            client_order_id,
            symbol,
            side,
            kind: ProviderOrderKind::Market,
            quantity,
            limit_price: None,
        }
    }

    /// Create a limit execute request.
    #[must_use]
    pub const fn limit(
        client_order_id: Uuid,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            client_order_id,
            symbol,
            side,
            kind: ProviderOrderKind::Limit,
            quantity,
            limit_price: Some(limit_price),
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Order status as reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOrderStatus {
    /// Accepted, not yet filled.
    Pending,
    /// Partially filled, still working.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Rejected by the provider.
    Rejected,
    /// Cancelled at the provider.
    Cancelled,
    /// The provider has no record of this order.
    NotFound,
}

impl ProviderOrderStatus {
    /// Definitive statuses settle a reconciliation entry; working statuses
    /// keep it in flight.
    #[must_use]
    pub const fn is_definitive(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Rejected | Self::Cancelled | Self::NotFound
        )
    }
}

/// Execution report returned by provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Provider-assigned order id.
    pub provider_order_id: String,
    /// Client order id echoed back.
    pub client_order_id: Uuid,
    /// Current status at the provider.
    pub status: ProviderOrderStatus,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Quantity still working.
    pub remaining_quantity: Decimal,
    /// Average fill price, if anything filled.
    pub average_price: Option<Decimal>,
    /// Provider fee for the execution.
    pub fee: Decimal,
    /// Provider-side error text, if the provider attached one.
    pub error: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// Liquidity provider errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The provider cannot fill the requested size.
    #[error("Insufficient liquidity: {detail}")]
    InsufficientLiquidity {
        /// Provider-reported detail.
        detail: String,
    },

    /// Explicit rejection.
    #[error("Order rejected: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// The deadline elapsed before the provider answered. The call may have
    /// executed.
    #[error("Provider call timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Transport-level failure. The call may have executed.
    #[error("Provider connection failed: {detail}")]
    ConnectionFailed {
        /// Transport error detail.
        detail: String,
    },
}

impl ProviderError {
    /// Whether the outcome of the call is unknown (execute calls returning
    /// these must be reconciled, never assumed).
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionFailed { .. })
    }

    /// Whether this is a definitive rejection (safe to fall back).
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::InsufficientLiquidity { .. } | Self::Rejected { .. })
    }
}

// =============================================================================
// Port
// =============================================================================

/// Port for external liquidity provider interactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiquidityProvider: Send + Sync {
    /// Stable provider name (used in routing config and reconciliation
    /// entries).
    fn name(&self) -> &str;

    /// Execute an order, bounded by `deadline`.
    async fn execute_order(
        &self,
        request: &ExecuteOrderRequest,
        deadline: Duration,
    ) -> Result<ExecutionReport, ProviderError>;

    /// Look up the status of a previously submitted order by client order
    /// id.
    async fn order_status(
        &self,
        client_order_id: Uuid,
        deadline: Duration,
    ) -> Result<ExecutionReport, ProviderError>;

    /// Available balance for a currency at the provider.
    async fn balance(&self, currency: &str, deadline: Duration)
    -> Result<Decimal, ProviderError>;

    /// Cancel a working order by client order id.
    async fn cancel_order(
        &self,
        client_order_id: Uuid,
        deadline: Duration,
    ) -> Result<(), ProviderError>;

    /// Liveness probe.
    async fn health_check(&self, deadline: Duration) -> Result<(), ProviderError>;
}

/// Bound a provider call by a deadline, mapping elapsed time onto
/// [`ProviderError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>> + Send,
{
    (tokio::time::timeout(deadline, call).await).map_or(
        Err(ProviderError::Timeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }),
        |result| result,
    )
}
