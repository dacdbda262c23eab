//! Per-execution-context transaction state.
//!
//! One `TransactionContext` exists per logical execution context (thread,
//! task). It is mutated only by the propagation engine and the data source
//! façade, and it nests with strict stack discipline: every policy-driven
//! call that owns a scope suspends the surrounding state into a snapshot
//! and restores it on the way out, whatever the outcome.

use std::fmt;
use std::mem;

use crate::pool::Connection;
use crate::transaction::connection::TransactionalConnection;
use crate::transaction::synchronization::Synchronization;

/// Transaction state bound to one execution context.
pub struct TransactionContext<C: Connection> {
    /// Whether a transaction scope is active, even before a connection has
    /// been acquired for it.
    pub(crate) active: bool,
    /// The connection owned by the active transaction, once acquired.
    pub(crate) connection: Option<TransactionalConnection<C>>,
    /// Completion callbacks registered against the active transaction,
    /// in registration order.
    pub(crate) synchronizations: Vec<Box<dyn Synchronization>>,
}

impl<C: Connection> TransactionContext<C> {
    /// Create an empty, inactive context.
    pub fn new() -> Self {
        Self {
            active: false,
            connection: None,
            synchronizations: Vec::new(),
        }
    }

    /// Whether a transaction is active in this context.
    pub fn in_transaction(&self) -> bool {
        self.active || self.connection.is_some()
    }

    /// Move the entire current state into a snapshot, leaving the context
    /// empty and inactive.
    pub(crate) fn suspend(&mut self) -> ContextSnapshot<C> {
        ContextSnapshot {
            active: mem::replace(&mut self.active, false),
            connection: self.connection.take(),
            synchronizations: mem::take(&mut self.synchronizations),
        }
    }

    /// Reinstate a previously suspended snapshot, discarding whatever state
    /// the finished inner scope left behind.
    pub(crate) fn restore(&mut self, snapshot: ContextSnapshot<C>) {
        self.active = snapshot.active;
        self.connection = snapshot.connection;
        self.synchronizations = snapshot.synchronizations;
    }

    /// Reset to empty and inactive.
    pub(crate) fn clear(&mut self) {
        self.active = false;
        self.connection = None;
        self.synchronizations.clear();
    }
}

impl<C: Connection> Default for TransactionContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> fmt::Debug for TransactionContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("active", &self.active)
            .field("connection", &self.connection)
            .field("synchronizations", &self.synchronizations.len())
            .finish()
    }
}

/// Saved context state, restored when the owning scope completes.
pub(crate) struct ContextSnapshot<C: Connection> {
    active: bool,
    connection: Option<TransactionalConnection<C>>,
    synchronizations: Vec<Box<dyn Synchronization>>,
}

impl<C: Connection> ContextSnapshot<C> {
    /// Snapshot representing "no surrounding transaction".
    pub(crate) fn inactive() -> Self {
        Self {
            active: false,
            connection: None,
            synchronizations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{ConnectionPool, MemoryConnection, MemoryPool};
    use crate::transaction::synchronization::SynchronizationError;

    fn context_with_transaction(pool: &MemoryPool) -> TransactionContext<MemoryConnection> {
        let mut ctx = TransactionContext::new();
        ctx.active = true;
        ctx.connection = Some(TransactionalConnection::new(pool.open().unwrap()));
        ctx.synchronizations.push(Box::new(
            |_: crate::transaction::CompletionStatus| -> Result<(), SynchronizationError> {
                Ok(())
            },
        ));
        ctx
    }

    #[test]
    fn test_suspend_empties_context() {
        let pool = MemoryPool::new();
        let mut ctx = context_with_transaction(&pool);
        assert!(ctx.in_transaction());

        let snapshot = ctx.suspend();
        assert!(!ctx.in_transaction());
        assert!(ctx.connection.is_none());
        assert!(ctx.synchronizations.is_empty());

        ctx.restore(snapshot);
        assert!(ctx.in_transaction());
        assert!(ctx.connection.is_some());
        assert_eq!(ctx.synchronizations.len(), 1);
    }

    #[test]
    fn test_snapshots_nest() {
        let pool = MemoryPool::new();
        let mut ctx = context_with_transaction(&pool);
        let outer_id = ctx.connection.as_ref().unwrap().id().to_string();

        let outer = ctx.suspend();
        ctx.active = true;
        ctx.connection = Some(TransactionalConnection::new(pool.open().unwrap()));
        let inner = ctx.suspend();

        // Restoring in reverse order reinstates each frame exactly.
        ctx.restore(inner);
        assert!(ctx.connection.is_some());
        assert_ne!(ctx.connection.as_ref().unwrap().id(), outer_id);

        ctx.clear();
        ctx.restore(outer);
        assert_eq!(ctx.connection.as_ref().unwrap().id(), outer_id);
    }

    #[test]
    fn test_active_scope_without_connection_counts() {
        let mut ctx = TransactionContext::<MemoryConnection>::new();
        assert!(!ctx.in_transaction());
        ctx.active = true;
        assert!(ctx.in_transaction());
    }
}
