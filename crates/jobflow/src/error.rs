use thiserror::Error;

/// Errors produced by [`crate::jobs::Store`] operations.
///
/// `NotFound` is part of the normal read-side contract (the HTTP façade maps
/// it to 404); everything else surfaces the underlying driver error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Transient faults are retried by the caller on its next tick rather
    /// than propagated as job failures.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::NotFound => false,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
        }
    }
}
