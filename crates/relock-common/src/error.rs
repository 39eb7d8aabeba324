//! Error types for relock
//!
//! Contention is never an error at the primitive level: `try_lock` and
//! `obtain_lock` report acquisition as a boolean. Everything that is not
//! plain contention surfaces as a `LockError` carrying the lock name.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// A critical section required the lock and it could not be obtained
    /// within the allotted wait.
    #[error("lock '{0}' could not be obtained")]
    NotAcquired(String),

    /// The calling context was cancelled while waiting for the lock.
    /// Distinct from a timeout, which is reported as an unacquired lock.
    #[error("lock '{0}' wait was cancelled")]
    Cancelled(String),

    /// The backing store was unreachable or rejected a statement for a
    /// reason other than the expected uniqueness violation.
    #[error("lock '{name}' store operation failed: {source}")]
    Store {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The critical section itself failed; release has already happened.
    #[error("lock '{name}' critical section failed: {source}")]
    Execution {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// No lock family matches the descriptor's (type, mode) pair.
    #[error("no lock family for type '{lock_type}' and mode '{lock_mode}'")]
    UnknownFamily { lock_type: String, lock_mode: String },
}

impl LockError {
    pub fn store(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        LockError::Store {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn execution(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        LockError::Execution {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Name of the lock this error relates to, if it carries one.
    pub fn lock_name(&self) -> Option<&str> {
        match self {
            LockError::NotAcquired(name) | LockError::Cancelled(name) => Some(name),
            LockError::Store { name, .. } | LockError::Execution { name, .. } => Some(name),
            LockError::UnknownFamily { .. } => None,
        }
    }
}
