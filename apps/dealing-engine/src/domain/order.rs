//! Pending orders and trigger evaluation.
//!
//! A pending order rests in the store until a tick crosses its trigger
//! price. The side x kind comparator table lives here, in one place, so the
//! boundary semantics are pinned by unit tests rather than scattered across
//! the match stage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::symbol::Symbol;

// =============================================================================
// Value objects
// =============================================================================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Stable lowercase form used by the persistence layer.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Returns the opposite side.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Sign for exposure calculations: buy = +1, sell = -1.
    #[must_use]
    pub const fn sign(&self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(DomainError::InvalidValue {
                field: "side".to_string(),
                message: format!("unknown order side '{other}'"),
            }),
        }
    }
}

/// Conditional order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Limit order: executes at the trigger price or better.
    Limit,
    /// Stop-limit order: arms at the trigger price, bounded by the limit
    /// price on the far side.
    StopLimit,
}

impl OrderKind {
    /// Stable lowercase form used by the persistence layer.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::StopLimit => "stop_limit",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "limit" => Ok(Self::Limit),
            "stop_limit" => Ok(Self::StopLimit),
            other => Err(DomainError::InvalidValue {
                field: "kind".to_string(),
                message: format!("unknown order kind '{other}'"),
            }),
        }
    }
}

/// Lifecycle status of a pending order.
///
/// The trigger engine is the sole writer of the pending -> executed
/// transition; cancellation belongs to the order-entry API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Resting, waiting for a trigger.
    Pending,
    /// Triggered and filled.
    Executed,
    /// Cancelled by its owner before triggering.
    Cancelled,
}

impl OrderStatus {
    /// Stable lowercase form used by the persistence layer.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "executed" => Ok(Self::Executed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::InvalidValue {
                field: "status".to_string(),
                message: format!("unknown order status '{other}'"),
            }),
        }
    }
}

// =============================================================================
// Pending order
// =============================================================================

/// A conditional order resting in the store until its trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    /// Order id.
    pub id: Uuid,
    /// Owning account.
    pub account_id: Uuid,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: OrderSide,
    /// Limit or stop-limit.
    pub kind: OrderKind,
    /// Order quantity, in instrument units.
    pub quantity: Decimal,
    /// Price at which the order arms.
    pub trigger_price: Decimal,
    /// Optional limit price; doubles as the execution price when present.
    pub limit_price: Option<Decimal>,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Account leverage applied to the resulting position.
    pub leverage: u32,
    /// Creation time, set by the order-entry API.
    pub created_at: DateTime<Utc>,
}

impl PendingOrder {
    /// Whether a tick at `price` fires this order.
    ///
    /// All comparisons are inclusive at the boundary:
    ///
    /// - buy limit: `price <= trigger`
    /// - sell limit: `price >= trigger`
    /// - buy stop-limit: `price >= trigger` and `price <= limit`
    /// - sell stop-limit: `price <= trigger` and `price >= limit`
    ///
    /// Stop-limit orders carry gap protection: a price that jumps past both
    /// trigger and limit leaves the order pending.
    #[must_use]
    pub fn should_execute(&self, price: Decimal) -> bool {
        if self.status != OrderStatus::Pending {
            return false;
        }

        match (self.side, self.kind) {
            (OrderSide::Buy, OrderKind::Limit) => price <= self.trigger_price,
            (OrderSide::Sell, OrderKind::Limit) => price >= self.trigger_price,
            (OrderSide::Buy, OrderKind::StopLimit) => {
                price >= self.trigger_price
                    && self.limit_price.is_none_or(|limit| price <= limit)
            }
            (OrderSide::Sell, OrderKind::StopLimit) => {
                price <= self.trigger_price
                    && self.limit_price.is_none_or(|limit| price >= limit)
            }
        }
    }

    /// Price the order executes at once triggered: the stored limit price if
    /// present, otherwise the tick price that fired it.
    #[must_use]
    pub fn execution_price(&self, tick_price: Decimal) -> Decimal {
        self.limit_price.unwrap_or(tick_price)
    }

    /// Order notional at the given price.
    #[must_use]
    pub fn notional(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Validate order parameters before evaluation.
    ///
    /// # Errors
    ///
    /// Returns an error for non-positive quantity or prices, or zero
    /// leverage.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.symbol.validate()?;

        if self.quantity <= Decimal::ZERO {
            return Err(DomainError::InvalidValue {
                field: "quantity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.trigger_price <= Decimal::ZERO {
            return Err(DomainError::InvalidValue {
                field: "trigger_price".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if let Some(limit) = self.limit_price {
            if limit <= Decimal::ZERO {
                return Err(DomainError::InvalidValue {
                    field: "limit_price".to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }
        if self.leverage == 0 {
            return Err(DomainError::InvalidValue {
                field: "leverage".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Fill
// =============================================================================

/// Ledger record written in the same transaction as the pending -> executed
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Fill id.
    pub id: Uuid,
    /// Order that produced this fill.
    pub order_id: Uuid,
    /// Owning account.
    pub account_id: Uuid,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Side of the originating order.
    pub side: OrderSide,
    /// Filled quantity.
    pub quantity: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Execution time.
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    /// Build the fill for a triggered order.
    #[must_use]
    pub fn for_order(order: &PendingOrder, price: Decimal, executed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            account_id: order.account_id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            executed_at,
        }
    }
}
