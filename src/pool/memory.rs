//! In-memory connection pool.
//!
//! A lightweight pool backed by nothing but a shared event log. Every
//! lifecycle step of every connection (open, statement, commit, rollback,
//! close) is recorded in order, which is what the transaction tests assert
//! against. Commit and close failures can be injected to exercise the
//! error paths.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Connection, ConnectionPool, PoolError, PoolResult};

/// A recorded connection lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was opened, with its pool-assigned id.
    Opened(u64),
    /// A statement was executed on the connection.
    Statement(u64, String),
    /// The connection committed.
    Committed(u64),
    /// The connection rolled back.
    RolledBack(u64),
    /// The connection was physically closed.
    Closed(u64),
}

struct MemoryPoolInner {
    next_id: Mutex<u64>,
    events: Mutex<Vec<ConnectionEvent>>,
    fail_next_commit: Mutex<bool>,
    fail_next_close: Mutex<bool>,
    timeout: Mutex<Option<Duration>>,
}

/// An in-memory pool that records connection lifecycle events.
///
/// Cloning is cheap and all clones share the same event log.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<MemoryPoolInner>,
}

impl MemoryPool {
    /// Create a new empty pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryPoolInner {
                next_id: Mutex::new(0),
                events: Mutex::new(Vec::new()),
                fail_next_commit: Mutex::new(false),
                fail_next_close: Mutex::new(false),
                timeout: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of all recorded events, in order.
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.inner.events.lock().clone()
    }

    /// Number of connections opened so far.
    pub fn opened_count(&self) -> u64 {
        *self.inner.next_id.lock()
    }

    /// Make the next commit on any connection fail.
    pub fn fail_next_commit(&self) {
        *self.inner.fail_next_commit.lock() = true;
    }

    /// Make the next physical close on any connection fail.
    pub fn fail_next_close(&self) {
        *self.inner.fail_next_close.lock() = true;
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool for MemoryPool {
    type Conn = MemoryConnection;

    fn open(&self) -> PoolResult<Self::Conn> {
        let id = {
            let mut next_id = self.inner.next_id.lock();
            *next_id += 1;
            *next_id
        };
        self.inner.events.lock().push(ConnectionEvent::Opened(id));
        Ok(MemoryConnection {
            id,
            pool: Arc::clone(&self.inner),
            closed: false,
        })
    }

    fn connection_timeout(&self) -> Option<Duration> {
        *self.inner.timeout.lock()
    }

    fn set_connection_timeout(&self, timeout: Option<Duration>) {
        *self.inner.timeout.lock() = timeout;
    }
}

/// A connection handed out by [`MemoryPool`].
pub struct MemoryConnection {
    id: u64,
    pool: Arc<MemoryPoolInner>,
    closed: bool,
}

impl MemoryConnection {
    /// The pool-assigned id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record a statement as executed on this connection.
    pub fn execute(&mut self, statement: impl Into<String>) -> PoolResult<()> {
        if self.closed {
            return Err(PoolError::ConnectionClosed);
        }
        self.pool
            .events
            .lock()
            .push(ConnectionEvent::Statement(self.id, statement.into()));
        Ok(())
    }

    fn take_flag(flag: &Mutex<bool>) -> bool {
        std::mem::take(&mut *flag.lock())
    }
}

impl Connection for MemoryConnection {
    fn commit(&mut self) -> PoolResult<()> {
        if self.closed {
            return Err(PoolError::ConnectionClosed);
        }
        if Self::take_flag(&self.pool.fail_next_commit) {
            return Err(PoolError::Backend("injected commit failure".into()));
        }
        self.pool
            .events
            .lock()
            .push(ConnectionEvent::Committed(self.id));
        Ok(())
    }

    fn rollback(&mut self) -> PoolResult<()> {
        if self.closed {
            return Err(PoolError::ConnectionClosed);
        }
        self.pool
            .events
            .lock()
            .push(ConnectionEvent::RolledBack(self.id));
        Ok(())
    }

    fn close(&mut self) -> PoolResult<()> {
        if self.closed {
            return Err(PoolError::ConnectionClosed);
        }
        self.closed = true;
        if Self::take_flag(&self.pool.fail_next_close) {
            return Err(PoolError::Backend("injected close failure".into()));
        }
        self.pool.events.lock().push(ConnectionEvent::Closed(self.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increment() {
        let pool = MemoryPool::new();
        let first = pool.open().unwrap();
        let second = pool.open().unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(pool.opened_count(), 2);
    }

    #[test]
    fn test_events_recorded_in_order() {
        let pool = MemoryPool::new();
        let mut conn = pool.open().unwrap();
        conn.execute("INSERT INTO users VALUES (1)").unwrap();
        conn.commit().unwrap();
        conn.close().unwrap();

        assert_eq!(
            pool.events(),
            vec![
                ConnectionEvent::Opened(1),
                ConnectionEvent::Statement(1, "INSERT INTO users VALUES (1)".to_string()),
                ConnectionEvent::Committed(1),
                ConnectionEvent::Closed(1),
            ]
        );
    }

    #[test]
    fn test_injected_commit_failure() {
        let pool = MemoryPool::new();
        let mut conn = pool.open().unwrap();
        pool.fail_next_commit();
        assert!(conn.commit().is_err());
        // The flag is one-shot.
        assert!(conn.commit().is_ok());
    }

    #[test]
    fn test_closed_connection_rejects_work() {
        let pool = MemoryPool::new();
        let mut conn = pool.open().unwrap();
        conn.close().unwrap();
        assert!(matches!(
            conn.execute("SELECT 1"),
            Err(PoolError::ConnectionClosed)
        ));
        assert!(matches!(conn.close(), Err(PoolError::ConnectionClosed)));
    }
}
