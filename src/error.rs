//! Core error taxonomy
//!
//! Four failure classes, with four very different handling rules:
//!
//! - [`CoreError::Validation`] - malformed input, rejected before any write
//! - [`CoreError::Precondition`] - target missing or in the wrong state,
//!   optimistic guard matched zero rows; aborts the enclosing transaction
//! - [`CoreError::Consistency`] - stored state violates an invariant; always
//!   fatal, the transaction must roll back, never coerced
//! - [`CoreError::Database`] / [`CoreError::RateUnavailable`] - infrastructure
//!
//! Remote exchange failures are NOT errors here: the dispatcher records them
//! as terminal request status rows, so later retries need no exception path.

use crate::core_types::CurrencyId;

/// Crate-wide error type. Modules return `Result<_, CoreError>` and
/// propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed for field '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("no USD rate available for currency {0}")]
    RateUnavailable(CurrencyId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    /// Build a validation error naming the offending field.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Build a precondition error.
    pub fn precondition(msg: impl Into<String>) -> Self {
        CoreError::Precondition(msg.into())
    }

    /// Build a consistency error.
    pub fn consistency(msg: impl Into<String>) -> Self {
        CoreError::Consistency(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field() {
        let err = CoreError::validation("amount", "must be positive");
        assert_eq!(
            err.to_string(),
            "validation failed for field 'amount': must be positive"
        );
    }

    #[test]
    fn sqlx_errors_convert() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::Database(_)));
    }
}
