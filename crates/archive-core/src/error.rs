//! Error types shared by the context bag, clock, and savepoint manager.

use thiserror::Error;

/// Errors produced by the ambient plumbing ([`crate::Runtime`], [`crate::Clock`],
/// [`crate::Savepoint`]).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A collaborator was looked up in the [`crate::Runtime`] but never registered.
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    /// A scripted clock ran out of queued results.
    #[error("no times left")]
    NoTimesLeft,

    /// A stacked clock exhausted every sub-clock without producing a value.
    #[error("no clock in stack produced a time: {0}")]
    StackExhausted(String),

    /// A savepoint operation was attempted after [`crate::Savepoint::release`].
    #[error("savepoint already released")]
    AlreadyReleased,

    /// A savepoint operation was attempted after [`crate::Savepoint::rollback`].
    #[error("savepoint already rolled back")]
    AlreadyRolledBack,

    /// An optimistic-concurrency check lost a race against another writer
    /// (e.g. two workers both tried to reserve the same row). Routine under
    /// concurrent access — callers should treat it like "nothing available",
    /// not surface it as a failure.
    #[error("{0}")]
    Conflict(&'static str),

    /// A database error bubbled up from `sqlx`.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Two or more errors occurred while unwinding (e.g. a handler failed and
    /// the rollback that followed it also failed).
    #[error("{0:?}")]
    Multiple(Vec<RuntimeError>),
}

impl RuntimeError {
    /// Join an error that occurred with a second error encountered while
    /// cleaning up after it (e.g. rollback failing after the handler itself
    /// failed). Mirrors `errors.Join` in the original implementation.
    pub fn join(primary: RuntimeError, secondary: RuntimeError) -> RuntimeError {
        match primary {
            RuntimeError::Multiple(mut errs) => {
                errs.push(secondary);
                RuntimeError::Multiple(errs)
            }
            primary => RuntimeError::Multiple(vec![primary, secondary]),
        }
    }

    /// True if this error (or, for a joined error, any component of it)
    /// represents SQLite reporting contention ("database is locked").
    pub fn is_database_locked(&self) -> bool {
        match self {
            RuntimeError::Database(e) => e.to_string().contains("database is locked"),
            RuntimeError::Multiple(errs) => errs.iter().any(RuntimeError::is_database_locked),
            _ => false,
        }
    }

    /// True if this error (or, for a joined error, any component of it) is
    /// an optimistic-concurrency conflict, per [`RuntimeError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        match self {
            RuntimeError::Conflict(_) => true,
            RuntimeError::Multiple(errs) => errs.iter().any(RuntimeError::is_conflict),
            _ => false,
        }
    }
}
