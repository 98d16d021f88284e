//! Errors raised by the trading types.

use thiserror::Error;

/// Rule violations inside the domain itself.
///
/// Transport and storage failures carry their own error types in the
/// infrastructure layer; this enum never wraps them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A field failed validation.
    #[error("invalid {field}: {message}")]
    InvalidValue {
        /// Offending field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// A lifecycle move the state machine does not allow.
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidStateTransition {
        /// Entity the move was attempted on.
        entity: String,
        /// State it is in.
        from: String,
        /// State the caller asked for.
        to: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_names_the_field() {
        let err = DomainError::InvalidValue {
            field: "quantity".to_string(),
            message: "must be positive".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("quantity"));
        assert!(rendered.contains("must be positive"));
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = DomainError::InvalidStateTransition {
            entity: "ReconciliationEntry".to_string(),
            from: "failed".to_string(),
            to: "in_flight".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("failed"));
        assert!(rendered.contains("in_flight"));
    }

    #[test]
    fn boxes_as_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(DomainError::InvalidValue {
            field: "symbol".to_string(),
            message: "symbol is empty".to_string(),
        });
        assert!(!err.to_string().is_empty());
    }
}
