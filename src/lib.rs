//! Txnscope - Declarative Transaction Demarcation
//!
//! This crate decides, per unit of work, whether to start a transaction,
//! join the one already active, suspend it, or refuse to run, based on a
//! propagation policy. It drives commit/rollback, completion callbacks and
//! connection release so that calling code never manages connections
//! directly.
//!
//! # Example
//!
//! ```
//! use txnscope::pool::MemoryPool;
//! use txnscope::{AllowList, Propagation, TransactionError, TransactionalDataSource};
//!
//! let ds = TransactionalDataSource::new(MemoryPool::new());
//!
//! let result: Result<(), TransactionError> =
//!     ds.transactional(Propagation::Required, &AllowList::none(), || {
//!         let mut conn = ds.get_connection()?;
//!         conn.with_raw(|raw| raw.execute("INSERT INTO users VALUES (1)"))??;
//!         Ok(())
//!     });
//! result.unwrap();
//! ```

pub mod datasource;
pub mod pool;
pub mod transaction;

pub use datasource::{DataSourceConnection, TransactionalDataSource};
pub use pool::{Connection, ConnectionPool, Credentials, PoolError, PoolResult};
pub use transaction::{
    AllowList, CompletionStatus, Propagation, PropagationEngine, Synchronization,
    SynchronizationError, TransactionContext, TransactionError, TransactionResult,
    TransactionalConnection, TxState,
};
