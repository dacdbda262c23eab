//! Transaction synchronization callbacks.
//!
//! A synchronization is a listener registered against the current
//! transaction and invoked exactly once after completion with the final
//! status. Callback failures are isolated: they are logged and never stop
//! the remaining callbacks or change the already-decided outcome.

use std::fmt;

use tracing::error;

/// Terminal outcome of a transaction, reported to each callback once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
}

impl CompletionStatus {
    /// Whether the transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, CompletionStatus::Committed)
    }

    /// Whether the transaction rolled back.
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, CompletionStatus::RolledBack)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Committed => write!(f, "COMMITTED"),
            CompletionStatus::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Error returned by a synchronization callback.
///
/// These never propagate past the completion path; they are logged and
/// swallowed.
pub type SynchronizationError = Box<dyn std::error::Error + Send + Sync>;

/// A completion listener for the current transaction.
pub trait Synchronization: Send {
    /// Called once after the transaction completes.
    fn after_completion(&mut self, status: CompletionStatus) -> Result<(), SynchronizationError>;
}

impl<F> Synchronization for F
where
    F: FnMut(CompletionStatus) -> Result<(), SynchronizationError> + Send,
{
    fn after_completion(&mut self, status: CompletionStatus) -> Result<(), SynchronizationError> {
        self(status)
    }
}

/// Notify every registered callback once, in registration order.
///
/// The list is consumed: completion is terminal and callbacks never fire
/// twice. A failing callback does not stop the rest.
pub(crate) fn notify_all(synchronizations: Vec<Box<dyn Synchronization>>, status: CompletionStatus) {
    for mut synchronization in synchronizations {
        if let Err(err) = synchronization.after_completion(status) {
            error!(%status, error = %err, "synchronization callback failed after completion");
        }
    }
}
