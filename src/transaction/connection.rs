//! Transactional connection wrapper.
//!
//! Wraps exactly one pooled connection for the lifetime of a transaction.
//! The handle is cheap to clone and shared between the owning scope (which
//! completes the transaction) and any code that borrows the connection to
//! do work. Physical release is deferred: the ordinary `close` is a no-op,
//! and only `really_close` gives the connection back to the pool.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ulid::Ulid;

use crate::pool::Connection;
use crate::transaction::error::{TransactionError, TransactionResult};

/// Lifecycle state of a transactional connection.
///
/// `Open → Committed | RolledBack → Closed`. Commit and rollback are
/// one-shot; operating on a terminal state is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// The transaction is in progress; work and completion are allowed.
    Open,
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
    /// The underlying connection has been physically released.
    Closed,
}

impl TxState {
    /// String form used in error messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Open => "open",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled-back",
            TxState::Closed => "closed",
        }
    }

    /// Whether commit/rollback already happened.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxState::Open)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner<C> {
    conn: C,
    state: TxState,
}

impl<C> Inner<C> {
    fn ensure_open(&self, operation: &'static str) -> TransactionResult<()> {
        if self.state != TxState::Open {
            return Err(TransactionError::InvalidState {
                operation,
                state: self.state.as_str(),
            });
        }
        Ok(())
    }
}

/// A pooled connection participating in a transaction.
pub struct TransactionalConnection<C: Connection> {
    id: String,
    started_at: DateTime<Utc>,
    inner: Arc<Mutex<Inner<C>>>,
}

impl<C: Connection> Clone for TransactionalConnection<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            started_at: self.started_at,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> TransactionalConnection<C> {
    /// Wrap a freshly opened pooled connection.
    pub(crate) fn new(conn: C) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            started_at: Utc::now(),
            inner: Arc::new(Mutex::new(Inner {
                conn,
                state: TxState::Open,
            })),
        }
    }

    /// Unique id of this transaction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the transaction started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.inner.lock().state
    }

    /// Whether the transaction is still in progress.
    pub fn is_open(&self) -> bool {
        self.state() == TxState::Open
    }

    /// Commit the transaction. Owner-only; callable exactly once.
    pub fn commit(&self) -> TransactionResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open("commit")?;
        inner.conn.commit()?;
        inner.state = TxState::Committed;
        tracing::debug!(tx = %self.id, "transaction committed");
        Ok(())
    }

    /// Roll back the transaction. Owner-only; callable exactly once.
    pub fn rollback(&self) -> TransactionResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open("rollback")?;
        inner.conn.rollback()?;
        inner.state = TxState::RolledBack;
        tracing::debug!(tx = %self.id, "transaction rolled back");
        Ok(())
    }

    /// Deferred close: a no-op while the transaction owns the connection.
    ///
    /// Nested query code may call this freely without ending the
    /// transaction; only [`really_close`](Self::really_close) releases the
    /// underlying connection.
    pub fn close(&self) -> TransactionResult<()> {
        Ok(())
    }

    /// Physically release the underlying connection.
    pub fn really_close(&self) -> TransactionResult<()> {
        let mut inner = self.inner.lock();
        if inner.state == TxState::Closed {
            return Err(TransactionError::InvalidState {
                operation: "close",
                state: TxState::Closed.as_str(),
            });
        }
        inner.conn.close()?;
        inner.state = TxState::Closed;
        tracing::debug!(tx = %self.id, "transaction connection released");
        Ok(())
    }

    /// Borrow the raw connection to do work.
    ///
    /// Fails with `InvalidState` once the transaction reaches a terminal
    /// state; non-owning joiners use the connection only through here.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut C) -> R) -> TransactionResult<R> {
        let mut inner = self.inner.lock();
        inner.ensure_open("use")?;
        Ok(f(&mut inner.conn))
    }
}

impl<C: Connection> fmt::Debug for TransactionalConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalConnection")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("state", &self.state())
            .finish()
    }
}
