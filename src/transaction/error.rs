//! Transaction error types.

use thiserror::Error;

use crate::pool::PoolError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A transaction is already active in this context.
    #[error("already in a transaction")]
    AlreadyInTransaction,

    /// No transaction is active in this context.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// MANDATORY propagation was requested with no transaction active.
    #[error("transaction is required but none is active")]
    TransactionRequired,

    /// NEVER propagation was requested while a transaction is active.
    #[error("transaction is not allowed here")]
    TransactionNotAllowed,

    /// Operation attempted on a transaction connection in a terminal state.
    #[error("cannot {operation} transaction connection in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The data source does not wrap a pool of the requested type.
    #[error("cannot unwrap data source as {requested}")]
    Unwrap { requested: &'static str },

    /// Pass-through failure from the backing pool or connection.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
}

impl TransactionError {
    /// Check whether this error is a propagation policy violation.
    ///
    /// Policy violations are configuration/programming errors raised before
    /// any connection is touched; retrying them is pointless.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            TransactionError::TransactionRequired | TransactionError::TransactionNotAllowed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violations() {
        assert!(TransactionError::TransactionRequired.is_policy_violation());
        assert!(TransactionError::TransactionNotAllowed.is_policy_violation());
        assert!(!TransactionError::NoActiveTransaction.is_policy_violation());
        assert!(!TransactionError::Pool(PoolError::Exhausted).is_policy_violation());
    }

    #[test]
    fn test_pool_error_converts() {
        let err: TransactionError = PoolError::Exhausted.into();
        assert!(matches!(err, TransactionError::Pool(_)));
    }
}
