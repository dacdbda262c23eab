//! Transaction-aware data source façade.
//!
//! [`TransactionalDataSource`] wraps a real connection pool and exposes the
//! same pool-shaped interface, with one twist: while a transaction is
//! active in the current execution context, `get_connection` hands out the
//! transaction's connection instead of opening a fresh one. It also carries
//! the manual transaction API (start/commit/rollback/end, pause/resume)
//! for code that needs transaction control without policy-driven calls.
//!
//! One data source instance corresponds to one execution context; state
//! never crosses contexts except through the explicit
//! [`pause_transaction`](TransactionalDataSource::pause_transaction) /
//! [`resume_transaction`](TransactionalDataSource::resume_transaction)
//! handoff.

use std::any::{self, Any};
use std::fmt;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::pool::{Connection, ConnectionPool, Credentials, PoolError, PoolResult};
use crate::transaction::{
    AllowList, Propagation, PropagationEngine, Synchronization, TransactionContext,
    TransactionError, TransactionResult, TransactionalConnection,
};

/// A connection handed out by the façade.
///
/// Either a shared handle to the context's active transaction, or a fresh
/// pooled connection with no transaction semantics attached.
pub enum DataSourceConnection<C: Connection> {
    /// Handle to the active transaction's connection.
    Transactional(TransactionalConnection<C>),
    /// Fresh connection straight from the backing pool.
    Direct(C),
}

impl<C: Connection> DataSourceConnection<C> {
    /// Whether this connection participates in the active transaction.
    pub fn is_transactional(&self) -> bool {
        matches!(self, DataSourceConnection::Transactional(_))
    }

    /// Borrow the raw pooled connection to do work.
    pub fn with_raw<R>(&mut self, f: impl FnOnce(&mut C) -> R) -> TransactionResult<R> {
        match self {
            DataSourceConnection::Transactional(connection) => connection.with_connection(f),
            DataSourceConnection::Direct(connection) => Ok(f(connection)),
        }
    }
}

impl<C: Connection> Connection for DataSourceConnection<C> {
    fn commit(&mut self) -> PoolResult<()> {
        match self {
            DataSourceConnection::Transactional(connection) => {
                connection.commit().map_err(PoolError::backend)
            }
            DataSourceConnection::Direct(connection) => connection.commit(),
        }
    }

    fn rollback(&mut self) -> PoolResult<()> {
        match self {
            DataSourceConnection::Transactional(connection) => {
                connection.rollback().map_err(PoolError::backend)
            }
            DataSourceConnection::Direct(connection) => connection.rollback(),
        }
    }

    fn close(&mut self) -> PoolResult<()> {
        match self {
            // Deferred: the owning transaction scope releases it.
            DataSourceConnection::Transactional(_) => Ok(()),
            DataSourceConnection::Direct(connection) => connection.close(),
        }
    }
}

/// Transaction-aware façade over a connection pool.
pub struct TransactionalDataSource<P: ConnectionPool> {
    delegate: P,
    context: Mutex<TransactionContext<P::Conn>>,
}

impl<P: ConnectionPool> TransactionalDataSource<P> {
    /// Wrap the given pool.
    pub fn new(delegate: P) -> Self {
        Self {
            delegate,
            context: Mutex::new(TransactionContext::new()),
        }
    }

    /// The wrapped pool.
    pub fn delegate(&self) -> &P {
        &self.delegate
    }

    /// Unwrap, returning the backing pool.
    pub fn into_delegate(self) -> P {
        self.delegate
    }

    pub(crate) fn context(&self) -> MutexGuard<'_, TransactionContext<P::Conn>> {
        self.context.lock()
    }

    /// Whether a transaction is active in this context.
    pub fn in_transaction(&self) -> bool {
        self.context.lock().in_transaction()
    }

    /// Get a connection.
    ///
    /// Returns the active transaction's connection when one exists. When a
    /// transaction scope is active but has not yet touched the database,
    /// the connection is opened and installed now. Otherwise a fresh,
    /// untransacted connection comes straight from the pool.
    pub fn get_connection(&self) -> PoolResult<DataSourceConnection<P::Conn>> {
        self.connection_via(|| self.delegate.open())
    }

    /// Get a connection authenticating with the given credentials.
    ///
    /// The active transaction's connection wins over the credentials, as
    /// with [`get_connection`](Self::get_connection).
    pub fn get_connection_with_credentials(
        &self,
        credentials: &Credentials,
    ) -> PoolResult<DataSourceConnection<P::Conn>> {
        self.connection_via(|| self.delegate.open_with_credentials(credentials))
    }

    fn connection_via(
        &self,
        open: impl Fn() -> PoolResult<P::Conn>,
    ) -> PoolResult<DataSourceConnection<P::Conn>> {
        let mut ctx = self.context.lock();
        if let Some(connection) = &ctx.connection {
            return Ok(DataSourceConnection::Transactional(connection.clone()));
        }
        if ctx.active {
            let connection = TransactionalConnection::new(open()?);
            debug!(tx = connection.id(), "opened connection for active transaction scope");
            ctx.connection = Some(connection.clone());
            return Ok(DataSourceConnection::Transactional(connection));
        }
        drop(ctx);
        Ok(DataSourceConnection::Direct(open()?))
    }

    /// Manually start a transaction in this context.
    pub fn start_transaction(&self) -> TransactionResult<()> {
        let mut ctx = self.context.lock();
        if ctx.in_transaction() {
            return Err(TransactionError::AlreadyInTransaction);
        }
        let connection = TransactionalConnection::new(self.delegate.open()?);
        debug!(tx = connection.id(), "started manual transaction");
        ctx.connection = Some(connection);
        ctx.active = true;
        Ok(())
    }

    /// Commit the active transaction. The connection stays installed until
    /// [`end_transaction`](Self::end_transaction).
    pub fn commit_transaction(&self) -> TransactionResult<()> {
        self.active_connection()?.commit()
    }

    /// Roll back the active transaction. The connection stays installed
    /// until [`end_transaction`](Self::end_transaction).
    pub fn rollback_transaction(&self) -> TransactionResult<()> {
        self.active_connection()?.rollback()
    }

    /// End the active transaction, physically releasing its connection.
    ///
    /// Context state is cleared before the close is attempted, so the
    /// context ends up clean even when closing fails; the close failure
    /// still reaches the caller.
    pub fn end_transaction(&self) -> TransactionResult<()> {
        let connection = {
            let mut ctx = self.context.lock();
            let connection = ctx
                .connection
                .take()
                .ok_or(TransactionError::NoActiveTransaction)?;
            ctx.clear();
            connection
        };
        connection.really_close()
    }

    /// Atomically read and clear the active transaction, returning it as a
    /// transferable handle, or `None` when no transaction is active.
    ///
    /// The caller is responsible for guaranteeing no other context holds
    /// or uses the handle concurrently.
    pub fn pause_transaction(&self) -> Option<TransactionalConnection<P::Conn>> {
        let mut ctx = self.context.lock();
        let connection = ctx.connection.take();
        if connection.is_some() {
            ctx.active = false;
        }
        connection
    }

    /// Install a previously paused transaction as this context's active
    /// transaction.
    pub fn resume_transaction(
        &self,
        connection: TransactionalConnection<P::Conn>,
    ) -> TransactionResult<()> {
        let mut ctx = self.context.lock();
        if ctx.in_transaction() {
            return Err(TransactionError::AlreadyInTransaction);
        }
        debug!(tx = connection.id(), "resumed paused transaction");
        ctx.connection = Some(connection);
        ctx.active = true;
        Ok(())
    }

    /// Register a completion callback against the current transaction.
    ///
    /// The list in scope at registration time receives the callback, so a
    /// joiner registers against its owner's transaction.
    pub fn register_synchronization(&self, synchronization: impl Synchronization + 'static) {
        self.context
            .lock()
            .synchronizations
            .push(Box::new(synchronization));
    }

    /// Run a unit of work under the given propagation policy.
    ///
    /// Convenience for [`PropagationEngine::run`].
    pub fn transactional<T, E, F>(
        &self,
        policy: Propagation,
        allow: &AllowList<E>,
        unit: F,
    ) -> Result<T, E>
    where
        E: From<TransactionError>,
        F: FnOnce() -> Result<T, E>,
    {
        PropagationEngine::new(self).run(policy, allow, unit)
    }

    /// Whether the backing pool is of type `T`.
    pub fn is_wrapper_for<T: Any>(&self) -> bool
    where
        P: Any,
    {
        (&self.delegate as &dyn Any).is::<T>()
    }

    /// Downcast the backing pool to `T`, failing if the type does not
    /// match.
    pub fn unwrap_as<T: Any>(&self) -> TransactionResult<&T>
    where
        P: Any,
    {
        (&self.delegate as &dyn Any)
            .downcast_ref::<T>()
            .ok_or(TransactionError::Unwrap {
                requested: any::type_name::<T>(),
            })
    }

    fn active_connection(&self) -> TransactionResult<TransactionalConnection<P::Conn>> {
        self.context
            .lock()
            .connection
            .clone()
            .ok_or(TransactionError::NoActiveTransaction)
    }
}

/// The façade is itself pool-shaped: code written against
/// [`ConnectionPool`] can run transactionally without knowing it.
impl<P: ConnectionPool> ConnectionPool for TransactionalDataSource<P> {
    type Conn = DataSourceConnection<P::Conn>;

    fn open(&self) -> PoolResult<Self::Conn> {
        self.get_connection()
    }

    fn open_with_credentials(&self, credentials: &Credentials) -> PoolResult<Self::Conn> {
        self.get_connection_with_credentials(credentials)
    }

    fn connection_timeout(&self) -> Option<Duration> {
        self.delegate.connection_timeout()
    }

    fn set_connection_timeout(&self, timeout: Option<Duration>) {
        self.delegate.set_connection_timeout(timeout);
    }
}

impl<P: ConnectionPool> fmt::Debug for TransactionalDataSource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalDataSource")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{ConnectionEvent, MemoryPool};
    use crate::transaction::TxState;

    fn datasource() -> (MemoryPool, TransactionalDataSource<MemoryPool>) {
        let pool = MemoryPool::new();
        (pool.clone(), TransactionalDataSource::new(pool))
    }

    #[test]
    fn test_manual_transaction_lifecycle() {
        let (pool, ds) = datasource();
        assert!(!ds.in_transaction());

        ds.start_transaction().unwrap();
        assert!(ds.in_transaction());

        let mut conn = ds.get_connection().unwrap();
        assert!(conn.is_transactional());
        conn.with_raw(|raw| raw.execute("INSERT INTO t VALUES (1)"))
            .unwrap()
            .unwrap();

        ds.commit_transaction().unwrap();
        // Committed but not yet released.
        assert!(ds.in_transaction());

        ds.end_transaction().unwrap();
        assert!(!ds.in_transaction());

        assert_eq!(
            pool.events(),
            vec![
                ConnectionEvent::Opened(1),
                ConnectionEvent::Statement(1, "INSERT INTO t VALUES (1)".to_string()),
                ConnectionEvent::Committed(1),
                ConnectionEvent::Closed(1),
            ]
        );
    }

    #[test]
    fn test_start_twice_fails() {
        let (_pool, ds) = datasource();
        ds.start_transaction().unwrap();
        assert!(matches!(
            ds.start_transaction(),
            Err(TransactionError::AlreadyInTransaction)
        ));
    }

    #[test]
    fn test_manual_ops_require_active_transaction() {
        let (_pool, ds) = datasource();
        assert!(matches!(
            ds.commit_transaction(),
            Err(TransactionError::NoActiveTransaction)
        ));
        assert!(matches!(
            ds.rollback_transaction(),
            Err(TransactionError::NoActiveTransaction)
        ));
        assert!(matches!(
            ds.end_transaction(),
            Err(TransactionError::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_double_commit_is_invalid_state() {
        let (_pool, ds) = datasource();
        ds.start_transaction().unwrap();
        ds.commit_transaction().unwrap();
        assert!(matches!(
            ds.commit_transaction(),
            Err(TransactionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_end_clears_context_even_when_close_fails() {
        let (pool, ds) = datasource();
        ds.start_transaction().unwrap();
        pool.fail_next_close();

        assert!(ds.end_transaction().is_err());
        assert!(!ds.in_transaction());

        // A new transaction can start immediately.
        ds.start_transaction().unwrap();
        ds.end_transaction().unwrap();
    }

    #[test]
    fn test_connection_reused_while_active_then_fresh_after_end() {
        let (pool, ds) = datasource();
        ds.start_transaction().unwrap();

        let first = ds.get_connection().unwrap();
        let second = ds.get_connection().unwrap();
        assert!(first.is_transactional());
        assert!(second.is_transactional());
        assert_eq!(pool.opened_count(), 1);

        ds.commit_transaction().unwrap();
        ds.end_transaction().unwrap();

        // Fresh connection from the backing pool afterwards.
        let fresh = ds.get_connection().unwrap();
        assert!(!fresh.is_transactional());
        assert_eq!(pool.opened_count(), 2);
    }

    #[test]
    fn test_direct_connection_close_is_real() {
        let (pool, ds) = datasource();
        let mut conn = ds.get_connection().unwrap();
        Connection::close(&mut conn).unwrap();
        assert_eq!(
            pool.events(),
            vec![ConnectionEvent::Opened(1), ConnectionEvent::Closed(1)]
        );
    }

    #[test]
    fn test_credentials_ignored_while_transaction_active() {
        let (pool, ds) = datasource();
        ds.start_transaction().unwrap();

        let conn = ds
            .get_connection_with_credentials(&Credentials::new("alice", "secret"))
            .unwrap();
        assert!(conn.is_transactional());
        assert_eq!(pool.opened_count(), 1);
    }

    #[test]
    fn test_pause_and_resume_across_contexts() {
        let pool = MemoryPool::new();
        let origin = TransactionalDataSource::new(pool.clone());
        let target = TransactionalDataSource::new(pool.clone());

        origin.start_transaction().unwrap();
        let handle = origin.pause_transaction().unwrap();
        assert!(!origin.in_transaction());

        target.resume_transaction(handle).unwrap();
        assert!(target.in_transaction());

        // Identical commit behavior as if never paused.
        target.commit_transaction().unwrap();
        target.end_transaction().unwrap();
        assert_eq!(
            pool.events(),
            vec![
                ConnectionEvent::Opened(1),
                ConnectionEvent::Committed(1),
                ConnectionEvent::Closed(1),
            ]
        );
    }

    #[test]
    fn test_pause_without_transaction_returns_none() {
        let (_pool, ds) = datasource();
        assert!(ds.pause_transaction().is_none());
    }

    #[test]
    fn test_resume_over_active_transaction_fails() {
        let pool = MemoryPool::new();
        let origin = TransactionalDataSource::new(pool.clone());
        let target = TransactionalDataSource::new(pool);

        origin.start_transaction().unwrap();
        let handle = origin.pause_transaction().unwrap();

        target.start_transaction().unwrap();
        let err = target.resume_transaction(handle).unwrap_err();
        assert!(matches!(err, TransactionError::AlreadyInTransaction));
    }

    #[test]
    fn test_paused_handle_stays_usable() {
        let (_pool, ds) = datasource();
        ds.start_transaction().unwrap();
        let handle = ds.pause_transaction().unwrap();
        assert_eq!(handle.state(), TxState::Open);
    }

    #[test]
    fn test_wrapper_identity_and_unwrap() {
        let (_pool, ds) = datasource();

        assert!(ds.is_wrapper_for::<MemoryPool>());
        assert!(!ds.is_wrapper_for::<u32>());

        assert!(ds.unwrap_as::<MemoryPool>().is_ok());
        assert!(matches!(
            ds.unwrap_as::<u32>(),
            Err(TransactionError::Unwrap { .. })
        ));
    }

    #[test]
    fn test_timeout_passthrough() {
        let (pool, ds) = datasource();
        ds.set_connection_timeout(Some(Duration::from_secs(5)));
        assert_eq!(pool.connection_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(ds.connection_timeout(), Some(Duration::from_secs(5)));
    }
}
