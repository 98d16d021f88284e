//! Reconciliation entries for provider calls without a definitive outcome.
//!
//! When an external execute times out or loses its connection mid-call, the
//! router records an entry here instead of guessing. A background sweep
//! re-queries the provider until the outcome is known or retries run out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Lifecycle status of a reconciliation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Outcome unknown; the sweep will re-query the provider.
    InFlight,
    /// A definitive provider status was obtained and applied.
    Resolved,
    /// Retries exhausted; requires operator action.
    Failed,
    /// Closed by an operator without resolution.
    Abandoned,
}

impl ReconciliationStatus {
    /// Stable lowercase form used by the persistence layer.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Terminal statuses are never retried.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::InFlight)
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReconciliationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_flight" => Ok(Self::InFlight),
            "resolved" => Ok(Self::Resolved),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(DomainError::InvalidValue {
                field: "reconciliation status".to_string(),
                message: format!("unknown reconciliation status '{other}'"),
            }),
        }
    }
}

/// Durable record of a routing attempt whose outcome is not yet known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    /// Entry id.
    pub id: Uuid,
    /// The routed order; also the client order id sent to the provider.
    pub order_id: Uuid,
    /// Provider the order was sent to.
    pub provider: String,
    /// Status-lookup attempts made so far.
    pub attempts: u32,
    /// Time of the last attempt (the execute call itself, initially).
    pub last_attempt_at: DateTime<Utc>,
    /// Earliest time the sweep may try again.
    pub next_attempt_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ReconciliationStatus,
    /// What made the outcome indeterminate, for operators.
    pub detail: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ReconciliationEntry {
    /// Create a fresh in-flight entry for an indeterminate execute call.
    #[must_use]
    pub fn new(
        order_id: Uuid,
        provider: impl Into<String>,
        detail: impl Into<String>,
        next_attempt_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            provider: provider.into(),
            attempts: 0,
            last_attempt_at: now,
            next_attempt_at,
            status: ReconciliationStatus::InFlight,
            detail: detail.into(),
            created_at: now,
        }
    }

    /// Whether the sweep should pick this entry up at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReconciliationStatus::InFlight && self.next_attempt_at <= now
    }

    /// Record one more unsuccessful attempt and schedule the next.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is already terminal; attempt counts only
    /// move while in flight.
    pub fn record_attempt(
        &mut self,
        attempted_at: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_in_flight(ReconciliationStatus::InFlight)?;
        self.attempts += 1;
        self.last_attempt_at = attempted_at;
        self.next_attempt_at = next_attempt_at;
        Ok(())
    }

    /// Mark the entry resolved after a definitive provider status.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is already terminal.
    pub fn resolve(&mut self) -> Result<(), DomainError> {
        self.ensure_in_flight(ReconciliationStatus::Resolved)?;
        self.status = ReconciliationStatus::Resolved;
        Ok(())
    }

    /// Mark the entry failed once the attempt limit is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is already terminal.
    pub fn fail(&mut self) -> Result<(), DomainError> {
        self.ensure_in_flight(ReconciliationStatus::Failed)?;
        self.status = ReconciliationStatus::Failed;
        Ok(())
    }

    /// Close the entry without resolution (operator action).
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is already resolved.
    pub fn abandon(&mut self) -> Result<(), DomainError> {
        if self.status == ReconciliationStatus::Resolved {
            return Err(self.transition_error(ReconciliationStatus::Abandoned));
        }
        self.status = ReconciliationStatus::Abandoned;
        Ok(())
    }

    fn ensure_in_flight(&self, to: ReconciliationStatus) -> Result<(), DomainError> {
        if self.status == ReconciliationStatus::InFlight {
            Ok(())
        } else {
            Err(self.transition_error(to))
        }
    }

    fn transition_error(&self, to: ReconciliationStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            entity: "ReconciliationEntry".to_string(),
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry() -> ReconciliationEntry {
        ReconciliationEntry::new(
            Uuid::new_v4(),
            "sim",
            "execute timed out after 5s",
            Utc::now() + Duration::seconds(60),
        )
    }

    #[test]
    fn new_entry_is_in_flight() {
        let e = entry();
        assert_eq!(e.status, ReconciliationStatus::InFlight);
        assert_eq!(e.attempts, 0);
        assert!(!e.status.is_terminal());
    }

    #[test]
    fn due_only_after_next_attempt_time() {
        let e = entry();
        assert!(!e.is_due(Utc::now()));
        assert!(e.is_due(Utc::now() + Duration::seconds(120)));
    }

    #[test]
    fn attempts_increase_monotonically() {
        let mut e = entry();
        for expected in 1..=3 {
            let now = Utc::now();
            e.record_attempt(now, now + Duration::seconds(60)).unwrap();
            assert_eq!(e.attempts, expected);
        }
    }

    #[test]
    fn resolve_is_terminal() {
        let mut e = entry();
        e.resolve().unwrap();
        assert!(e.status.is_terminal());

        let now = Utc::now();
        assert!(e.record_attempt(now, now).is_err());
        assert!(e.fail().is_err());
        assert!(!e.is_due(now + Duration::days(1)));
    }

    #[test]
    fn failed_entries_never_retry() {
        let mut e = entry();
        e.fail().unwrap();

        let now = Utc::now();
        assert!(e.record_attempt(now, now).is_err());
        assert!(e.resolve().is_err());
        assert!(!e.is_due(now + Duration::days(1)));
    }

    #[test]
    fn abandon_allowed_from_failed_but_not_resolved() {
        let mut failed = entry();
        failed.fail().unwrap();
        assert!(failed.abandon().is_ok());

        let mut resolved = entry();
        resolved.resolve().unwrap();
        assert!(resolved.abandon().is_err());
    }
}
