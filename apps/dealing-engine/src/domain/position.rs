//! Open positions and per-instrument exposure.
//!
//! Net exposure is always derived on demand from committed open positions;
//! nothing in the pipeline caches it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{OrderSide, PendingOrder};
use crate::domain::symbol::Symbol;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    /// Long the instrument.
    Long,
    /// Short the instrument.
    Short,
}

impl PositionSide {
    /// Stable lowercase form used by the persistence layer.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    /// Sign for exposure sums: long = +1, short = -1.
    #[must_use]
    pub const fn sign(&self) -> i64 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }
}

impl From<OrderSide> for PositionSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::Long,
            OrderSide::Sell => Self::Short,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PositionSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(DomainError::InvalidValue {
                field: "position side".to_string(),
                message: format!("unknown position side '{other}'"),
            }),
        }
    }
}

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Contributing to exposure.
    Open,
    /// Closed out; excluded from exposure.
    Closed,
}

impl PositionStatus {
    /// Stable lowercase form used by the persistence layer.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(DomainError::InvalidValue {
                field: "position status".to_string(),
                message: format!("unknown position status '{other}'"),
            }),
        }
    }
}

/// A booked position, opened when a pending order executes (or by the
/// order-entry API for market orders).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Position id.
    pub id: Uuid,
    /// Order that opened this position.
    pub order_id: Uuid,
    /// Owning account.
    pub account_id: Uuid,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Long or short.
    pub side: PositionSide,
    /// Position quantity, in instrument units.
    pub quantity: Decimal,
    /// Entry price.
    pub entry_price: Decimal,
    /// Lifecycle status.
    pub status: PositionStatus,
    /// Whether an external route for this position has been confirmed
    /// filled.
    pub hedged: bool,
    /// Open time.
    pub opened_at: DateTime<Utc>,
}

impl OpenPosition {
    /// Build the position opened by a triggered order.
    #[must_use]
    pub fn for_order(order: &PendingOrder, entry_price: Decimal, opened_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            account_id: order.account_id,
            symbol: order.symbol.clone(),
            side: order.side.into(),
            quantity: order.quantity,
            entry_price,
            status: PositionStatus::Open,
            hedged: false,
            opened_at,
        }
    }

    /// Signed quantity this position contributes to net exposure.
    #[must_use]
    pub fn signed_quantity(&self) -> Decimal {
        self.quantity * Decimal::from(self.side.sign())
    }

    /// Signed notional at entry.
    #[must_use]
    pub fn signed_notional(&self) -> Decimal {
        self.signed_quantity() * self.entry_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderKind, OrderStatus};
    use rust_decimal_macros::dec;

    fn position(side: PositionSide, quantity: Decimal) -> OpenPosition {
        OpenPosition {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            symbol: Symbol::new("EURUSD"),
            side,
            quantity,
            entry_price: dec!(1.10),
            status: PositionStatus::Open,
            hedged: false,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn signed_quantity_follows_side() {
        assert_eq!(
            position(PositionSide::Long, dec!(1000)).signed_quantity(),
            dec!(1000)
        );
        assert_eq!(
            position(PositionSide::Short, dec!(1000)).signed_quantity(),
            dec!(-1000)
        );
    }

    #[test]
    fn signed_notional_scales_entry_price() {
        assert_eq!(
            position(PositionSide::Short, dec!(1000)).signed_notional(),
            dec!(-1100.00)
        );
    }

    #[test]
    fn position_side_from_order_side() {
        assert_eq!(PositionSide::from(OrderSide::Buy), PositionSide::Long);
        assert_eq!(PositionSide::from(OrderSide::Sell), PositionSide::Short);
    }

    #[test]
    fn for_order_books_the_fill() {
        let order = PendingOrder {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            symbol: Symbol::new("BTCUSDT"),
            side: OrderSide::Sell,
            kind: OrderKind::Limit,
            quantity: dec!(0.5),
            trigger_price: dec!(42000),
            limit_price: None,
            status: OrderStatus::Pending,
            leverage: 5,
            created_at: Utc::now(),
        };

        let opened = OpenPosition::for_order(&order, dec!(42010), Utc::now());
        assert_eq!(opened.order_id, order.id);
        assert_eq!(opened.side, PositionSide::Short);
        assert_eq!(opened.entry_price, dec!(42010));
        assert_eq!(opened.status, PositionStatus::Open);
        assert!(!opened.hedged);
    }

    #[test]
    fn side_round_trips_through_str() {
        assert_eq!("long".parse::<PositionSide>().unwrap(), PositionSide::Long);
        assert_eq!(
            "SHORT".parse::<PositionSide>().unwrap(),
            PositionSide::Short
        );
        assert!("flat".parse::<PositionSide>().is_err());
        assert_eq!(
            "closed".parse::<PositionStatus>().unwrap(),
            PositionStatus::Closed
        );
    }
}
