//! Market data types produced by tick source adapters.
//!
//! Adapters normalize their wire formats into these shapes; nothing
//! downstream of an adapter ever sees raw feed bytes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::symbol::Symbol;

/// A single trade price observation for an instrument.
///
/// Ephemeral: quotes flow through the pipeline and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Traded price.
    pub price: Decimal,
    /// Exchange timestamp of the trade.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Create a new quote.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }
}

/// One price level of an order book side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Quantity resting at this price.
    pub quantity: Decimal,
}

/// Point-in-time order book snapshot for an instrument.
///
/// Latest-wins per symbol: consumers keep at most the most recent snapshot,
/// no history is retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Bid levels, best (highest) first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<PriceLevel>,
    /// Snapshot timestamp.
    pub timestamp: DateTime<Utc>,
}

impl DepthSnapshot {
    /// Best bid price, if the bid side is non-empty.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }

    /// Best ask price, if the ask side is non-empty.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level.price)
    }

    /// Midpoint of best bid and best ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Normalized message emitted by every tick source adapter.
///
/// The tagged union is the typed boundary between feed wire formats and the
/// rest of the pipeline: consumers match on the variant instead of reparsing
/// raw payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// A trade tick.
    Trade(Quote),
    /// An order book snapshot.
    Depth(DepthSnapshot),
    /// A recognized frame the pipeline has no use for (subscription acks,
    /// heartbeats, venue-specific noise). Counted and skipped, never an error.
    Unknown,
}

impl FeedMessage {
    /// The symbol this message concerns, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Trade(quote) => Some(&quote.symbol),
            Self::Depth(depth) => Some(&depth.symbol),
            Self::Unknown => None,
        }
    }

    /// Whether this is a trade tick.
    #[must_use]
    pub const fn is_trade(&self) -> bool {
        matches!(self, Self::Trade(_))
    }
}
