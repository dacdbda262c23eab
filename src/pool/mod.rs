//! Connection pool abstraction.
//!
//! The transaction layer never talks to a database driver directly. It
//! consumes a pool-shaped capability: something that can open connections
//! and connections that can commit, roll back and close. Any real pool
//! (r2d2-style, a driver's built-in pool, a test double) plugs in by
//! implementing [`ConnectionPool`] and [`Connection`].

mod memory;

pub use memory::{ConnectionEvent, MemoryConnection, MemoryPool};

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the backing pool or its connections.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection could be handed out.
    #[error("connection pool exhausted")]
    Exhausted,

    /// The connection was already physically closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Error from the underlying driver or backend.
    #[error("backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl PoolError {
    /// Wrap an arbitrary driver error as a backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        PoolError::Backend(Box::new(err))
    }
}

/// Credentials for pools that authenticate per connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create a new set of credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Get the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single relational connection handed out by a pool.
pub trait Connection: Send {
    /// Commit the work performed on this connection.
    fn commit(&mut self) -> PoolResult<()>;

    /// Roll back the work performed on this connection.
    fn rollback(&mut self) -> PoolResult<()>;

    /// Physically release the connection back to the pool (or drop it).
    fn close(&mut self) -> PoolResult<()>;
}

/// A pool of relational connections.
pub trait ConnectionPool {
    /// The connection type this pool hands out.
    type Conn: Connection;

    /// Open a connection from the pool.
    fn open(&self) -> PoolResult<Self::Conn>;

    /// Open a connection authenticating with the given credentials.
    ///
    /// Pools without per-connection authentication ignore the credentials.
    fn open_with_credentials(&self, credentials: &Credentials) -> PoolResult<Self::Conn> {
        let _ = credentials;
        self.open()
    }

    /// How long `open` may block waiting for a connection, if the backend
    /// enforces a limit.
    fn connection_timeout(&self) -> Option<Duration> {
        None
    }

    /// Set the timeout applied by `open`. Pools without one ignore this.
    fn set_connection_timeout(&self, timeout: Option<Duration>) {
        let _ = timeout;
    }
}
