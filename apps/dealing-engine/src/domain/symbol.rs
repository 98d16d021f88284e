//! Instrument symbol value object.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Instrument identifier, held uppercase.
///
/// The feed publishes lowercase stream names ("btcusdt") while orders and
/// positions carry the uppercase form ("BTCUSDT"); construction normalizes
/// the input so both sides compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Longest accepted identifier.
    pub const MAX_LEN: usize = 20;

    /// Build a symbol, folding the input to uppercase.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().to_uppercase())
    }

    /// Borrow the uppercase identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the owned identifier.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Check the identifier before it reaches a query or a subscription list.
    ///
    /// # Errors
    ///
    /// Rejects empty input, anything longer than [`Self::MAX_LEN`], and
    /// non-alphanumeric characters.
    pub fn validate(&self) -> Result<(), DomainError> {
        let reason = if self.0.is_empty() {
            "symbol is empty"
        } else if self.0.len() > Self::MAX_LEN {
            "symbol is too long"
        } else if self.0.bytes().any(|b| !b.is_ascii_alphanumeric()) {
            "symbol holds non-alphanumeric characters"
        } else {
            return Ok(());
        };
        Err(DomainError::InvalidValue {
            field: "symbol".to_string(),
            message: reason.to_string(),
        })
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_folds_to_uppercase() {
        for raw in ["btcusdt", "BtcUsdt", "BTCUSDT"] {
            assert_eq!(Symbol::new(raw).as_str(), "BTCUSDT");
        }
    }

    #[test]
    fn display_and_as_ref_expose_the_same_text() {
        let s = Symbol::new("EURUSD");
        assert_eq!(s.to_string(), "EURUSD");
        assert_eq!(s.as_ref(), "EURUSD");
    }

    #[test]
    fn well_formed_pairs_validate() {
        assert!(Symbol::new("EURUSD").validate().is_ok());
        assert!(Symbol::new("XAUUSD").validate().is_ok());
        assert!(Symbol::new("BTCUSDT").validate().is_ok());
    }

    #[test]
    fn empty_symbol_is_rejected() {
        assert!(Symbol::new("").validate().is_err());
    }

    #[test]
    fn length_cap_is_inclusive() {
        assert!(Symbol::new("A".repeat(Symbol::MAX_LEN)).validate().is_ok());
        assert!(Symbol::new("A".repeat(Symbol::MAX_LEN + 1)).validate().is_err());
    }

    #[test]
    fn punctuation_is_rejected() {
        assert!(Symbol::new("BTC/USDT").validate().is_err());
        assert!(Symbol::new("EUR USD").validate().is_err());
        assert!(Symbol::new("BTC-USDT").validate().is_err());
    }

    #[test]
    fn from_impls_normalize_like_new() {
        let borrowed: Symbol = "ethusdt".into();
        let owned: Symbol = String::from("gbpusd").into();
        assert_eq!(borrowed.as_str(), "ETHUSDT");
        assert_eq!(owned.as_str(), "GBPUSD");
    }

    #[test]
    fn serializes_as_a_bare_string() {
        let s = Symbol::new("BTCUSDT");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"BTCUSDT\"");
        assert_eq!(serde_json::from_str::<Symbol>(&json).unwrap(), s);
    }

    #[test]
    fn case_variants_collapse_in_sets() {
        let set: std::collections::HashSet<Symbol> = ["BTCUSDT", "btcusdt", "EURUSD"]
            .into_iter()
            .map(Symbol::new)
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn into_inner_returns_the_normalized_form() {
        assert_eq!(Symbol::new("xauusd").into_inner(), "XAUUSD");
    }
}
