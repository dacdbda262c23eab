//! Propagation engine.
//!
//! Given the context's current state and a requested policy, the engine
//! decides whether a unit of work starts a new transaction, joins the one
//! in flight, suspends it, or is rejected outright, then drives completion
//! for the scopes it owns.
//!
//! Decision table (policy × "transaction already active"):
//!
//! | Active? | Policy                    | Action                               |
//! |---------|---------------------------|--------------------------------------|
//! | no      | REQUIRED / REQUIRES_NEW   | start a new transaction, own it      |
//! | no      | MANDATORY                 | fail with `TransactionRequired`      |
//! | no      | anything else             | run inline, no transaction           |
//! | yes     | REQUIRES_NEW              | suspend, start an independent one    |
//! | yes     | NOT_SUPPORTED             | suspend, run inline                  |
//! | yes     | NEVER                     | fail with `TransactionNotAllowed`    |
//! | yes     | anything else             | join; completion stays with owner    |
//!
//! Only an owner completes: commit or rollback, synchronization
//! notification, physical close, and restoration of the saved context
//! frame. Joiners simply return.

use std::fmt;
use std::mem;

use tracing::{debug, warn};

use crate::datasource::TransactionalDataSource;
use crate::pool::ConnectionPool;
use crate::transaction::context::ContextSnapshot;
use crate::transaction::error::TransactionError;
use crate::transaction::propagation::Propagation;
use crate::transaction::synchronization::{self, CompletionStatus};

/// Classifier for "commit despite failure" errors.
///
/// When a unit of work fails, the owner consults the allow-list: a matching
/// error still commits the transaction (and is then re-raised); anything
/// else rolls back. The default is to allow nothing.
pub struct AllowList<E> {
    predicate: Option<Box<dyn Fn(&E) -> bool + Send + Sync>>,
}

impl<E> AllowList<E> {
    /// Allow nothing: every failure rolls back.
    pub fn none() -> Self {
        Self { predicate: None }
    }

    /// Allow errors matching the given predicate.
    pub fn matching(predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Some(Box::new(predicate)),
        }
    }

    /// Whether the given error should commit rather than roll back.
    pub fn allows(&self, error: &E) -> bool {
        self.predicate.as_ref().is_some_and(|predicate| predicate(error))
    }
}

impl<E> Default for AllowList<E> {
    fn default() -> Self {
        Self::none()
    }
}

impl<E> fmt::Debug for AllowList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllowList")
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Drives propagation decisions and completion for one data source.
pub struct PropagationEngine<'a, P: ConnectionPool> {
    datasource: &'a TransactionalDataSource<P>,
}

impl<'a, P: ConnectionPool> PropagationEngine<'a, P> {
    /// Create an engine over the given data source.
    pub fn new(datasource: &'a TransactionalDataSource<P>) -> Self {
        Self { datasource }
    }

    /// Execute a unit of work under the given propagation policy.
    ///
    /// Runs synchronously on the calling execution context. The unit of
    /// work observes the data source as its connection source; the engine
    /// handles acquisition, completion and context restoration for scopes
    /// it owns.
    pub fn run<T, E, F>(&self, policy: Propagation, allow: &AllowList<E>, unit: F) -> Result<T, E>
    where
        E: From<TransactionError>,
        F: FnOnce() -> Result<T, E>,
    {
        let saved = match self.enter(policy) {
            Ok(saved) => saved,
            Err(err) => return Err(E::from(err)),
        };

        // Joiners and inline runs leave context management to their owner.
        let Some(saved) = saved else {
            return unit();
        };

        let result = unit();
        self.complete(saved, allow, result)
    }

    /// Apply the decision table. Returns the saved context frame when this
    /// invocation owns a scope, `None` when it joins or runs inline.
    fn enter(
        &self,
        policy: Propagation,
    ) -> Result<Option<ContextSnapshot<P::Conn>>, TransactionError> {
        let mut ctx = self.datasource.context();
        if ctx.in_transaction() {
            match policy {
                Propagation::RequiresNew => {
                    let saved = ctx.suspend();
                    ctx.active = true;
                    debug!(policy = %policy, "suspended active transaction, starting a new one");
                    Ok(Some(saved))
                }
                Propagation::NotSupported => {
                    debug!(policy = %policy, "suspended active transaction, running without one");
                    Ok(Some(ctx.suspend()))
                }
                Propagation::Never => Err(TransactionError::TransactionNotAllowed),
                // REQUIRED, MANDATORY and anything else join the
                // transaction already in flight.
                _ => Ok(None),
            }
        } else {
            match policy {
                Propagation::Required | Propagation::RequiresNew => {
                    ctx.active = true;
                    debug!(policy = %policy, "starting transaction scope");
                    Ok(Some(ContextSnapshot::inactive()))
                }
                Propagation::Mandatory => Err(TransactionError::TransactionRequired),
                // Nothing to join: run inline without a transaction.
                _ => Ok(None),
            }
        }
    }

    /// Owner completion: decide commit vs rollback, notify callbacks,
    /// release the connection, restore the saved frame. The frame is
    /// restored even when commit or close fails.
    fn complete<T, E>(
        &self,
        saved: ContextSnapshot<P::Conn>,
        allow: &AllowList<E>,
        result: Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<TransactionError>,
    {
        let (was_active, connection, synchronizations) = {
            let mut ctx = self.datasource.context();
            (
                ctx.active,
                ctx.connection.take(),
                mem::take(&mut ctx.synchronizations),
            )
        };

        let status = match &result {
            Ok(_) => CompletionStatus::Committed,
            Err(err) if allow.allows(err) => CompletionStatus::Committed,
            Err(_) => CompletionStatus::RolledBack,
        };

        let mut completion_failure = None;
        if let Some(connection) = &connection {
            let finished = match status {
                CompletionStatus::Committed => connection.commit(),
                CompletionStatus::RolledBack => connection.rollback(),
            };
            match finished {
                Ok(()) => synchronization::notify_all(synchronizations, status),
                Err(err) => completion_failure = Some(err),
            }
        } else if was_active {
            // The scope was a transaction even though no connection was
            // ever acquired; registered callbacks still fire exactly once.
            synchronization::notify_all(synchronizations, status);
        }

        let close_failure = connection
            .as_ref()
            .and_then(|connection| connection.really_close().err());

        // Restore happens unconditionally, after close, before any error
        // is surfaced.
        self.datasource.context().restore(saved);

        let cleanup_failure = match (completion_failure, close_failure) {
            (Some(err), Some(close_err)) => {
                warn!(error = %close_err, "discarding close failure in favor of completion failure");
                Some(err)
            }
            (Some(err), None) | (None, Some(err)) => Some(err),
            (None, None) => None,
        };

        match (result, cleanup_failure) {
            (Ok(value), None) => Ok(value),
            (Ok(_), Some(err)) => Err(E::from(err)),
            (Err(err), None) => Err(err),
            (Err(err), Some(cleanup_err)) => {
                // The original failure wins; the cleanup failure is logged.
                warn!(error = %cleanup_err, "discarding cleanup failure in favor of original error");
                Err(err)
            }
        }
    }
}
