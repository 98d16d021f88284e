//! Market State Service
//!
//! Latest-wins cache of the most recent tick and depth snapshot per symbol.
//! Updated by a broadcast consumer, read by the health endpoint and anything
//! that needs a current price without waiting on the stream.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::domain::{DepthSnapshot, FeedMessage, Quote, Symbol};

/// Thread-safe latest-value store for quotes and depth.
///
/// Intermediate values are intentionally lost: only the newest observation
/// per symbol matters to readers.
#[derive(Debug, Default)]
pub struct MarketStateService {
    quotes: RwLock<HashMap<Symbol, Quote>>,
    depth: RwLock<HashMap<Symbol, DepthSnapshot>>,
}

impl MarketStateService {
    /// Create an empty market state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one feed message, replacing the previous value for its symbol.
    pub fn apply(&self, message: &FeedMessage) {
        match message {
            FeedMessage::Trade(quote) => {
                self.quotes
                    .write()
                    .insert(quote.symbol.clone(), quote.clone());
            }
            FeedMessage::Depth(snapshot) => {
                self.depth
                    .write()
                    .insert(snapshot.symbol.clone(), snapshot.clone());
            }
            FeedMessage::Unknown => {}
        }
    }

    /// Latest quote for a symbol, regardless of age.
    #[must_use]
    pub fn latest_quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Latest quote for a symbol if it is younger than `max_age`.
    ///
    /// Stale prices must not feed execution decisions, so callers that act
    /// on the answer use this instead of [`Self::latest_quote`].
    #[must_use]
    pub fn fresh_quote(&self, symbol: &Symbol, max_age: Duration, now: DateTime<Utc>) -> Option<Quote> {
        self.quotes
            .read()
            .get(symbol)
            .filter(|quote| now.signed_duration_since(quote.timestamp) <= max_age)
            .cloned()
    }

    /// Latest depth snapshot for a symbol.
    #[must_use]
    pub fn latest_depth(&self, symbol: &Symbol) -> Option<DepthSnapshot> {
        self.depth.read().get(symbol).cloned()
    }

    /// Number of symbols with at least one quote.
    #[must_use]
    pub fn quoted_symbol_count(&self) -> usize {
        self.quotes.read().len()
    }

    /// Snapshot of all latest quotes, for diagnostics.
    #[must_use]
    pub fn all_quotes(&self) -> Vec<Quote> {
        self.quotes.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn quote_at(price: rust_decimal::Decimal, timestamp: DateTime<Utc>) -> FeedMessage {
        FeedMessage::Trade(Quote::new("BTCUSDT", price, timestamp))
    }

    #[test]
    fn newest_quote_wins() {
        let state = MarketStateService::new();
        let now = Utc::now();

        state.apply(&quote_at(dec!(97000), now));
        state.apply(&quote_at(dec!(97001), now));

        let latest = state.latest_quote(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(latest.price, dec!(97001));
        assert_eq!(state.quoted_symbol_count(), 1);
    }

    #[test]
    fn stale_quote_is_withheld_from_fresh_reads() {
        let state = MarketStateService::new();
        let now = Utc::now();
        let old = now - Duration::seconds(120);

        state.apply(&quote_at(dec!(97000), old));

        let symbol = Symbol::new("BTCUSDT");
        assert!(state.latest_quote(&symbol).is_some());
        assert!(state.fresh_quote(&symbol, Duration::seconds(60), now).is_none());
    }

    #[test]
    fn unknown_messages_change_nothing() {
        let state = MarketStateService::new();
        state.apply(&FeedMessage::Unknown);
        assert_eq!(state.quoted_symbol_count(), 0);
    }
}
