use thiserror::Error;

/// Top-level error type for the Vigil pipeline.
///
/// Component crates define their own error enums; this type is the common
/// denominator used at wiring boundaries (pipeline assembly, the server).
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("bus error: {0}")]
    Bus(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("detection error: {0}")]
    Detection(String),

    #[error("investigation error: {0}")]
    Investigation(String),

    #[error("response error: {0}")]
    Response(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}
