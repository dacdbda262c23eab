//! Declarative transaction demarcation.
//!
//! This module implements propagation-driven transactions over a pooled
//! connection: a unit of work is marked with a propagation policy, and the
//! engine decides whether to start a new transaction, join the one in
//! flight, suspend it, or reject the call, then drives commit/rollback,
//! synchronization notification and resource release.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PropagationEngine                        │
//! │   (decision table, owner completion, context restoration)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐      ┌──────────────┐      ┌──────────────┐
//!  │ Transaction │      │ Transactional│      │ Synchroniza- │
//!  │   Context   │      │  Connection  │      │ tion registry│
//!  └─────────────┘      └──────────────┘      └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txnscope::{AllowList, Propagation, TransactionalDataSource};
//!
//! let ds = TransactionalDataSource::new(pool);
//!
//! ds.transactional(Propagation::Required, &AllowList::none(), || {
//!     let mut conn = ds.get_connection()?;
//!     // ... unit of work ...
//!     Ok(())
//! })?;
//! ```

mod connection;
mod context;
mod engine;
mod error;
mod propagation;
mod synchronization;

pub use connection::{TransactionalConnection, TxState};
pub use context::TransactionContext;
pub use engine::{AllowList, PropagationEngine};
pub use error::{TransactionError, TransactionResult};
pub use propagation::Propagation;
pub use synchronization::{CompletionStatus, Synchronization, SynchronizationError};
