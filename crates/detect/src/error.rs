use thiserror::Error;

/// Errors surfaced by the detection stage.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The packet source failed to produce the next record.
    #[error("packet source error: {0}")]
    Source(String),

    /// A scorer returned the wrong batch shape or failed outright.
    #[error("scorer error: {0}")]
    Scorer(String),

    /// A malformed input record was dropped.
    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
