use thiserror::Error;

/// Errors surfaced by repository backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A record could not be encoded/decoded for storage.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// The store could not be reached at startup. Fatal: the pipeline must
    /// not start without durable persistence.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
