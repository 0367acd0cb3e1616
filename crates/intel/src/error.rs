use thiserror::Error;

/// Errors surfaced by threat-intel lookups.
///
/// Individual provider failures never abort an investigation; they are
/// recorded in the report's findings map under an `error` field.
#[derive(Debug, Error)]
pub enum IntelError {
    #[error("http error: {0}")]
    Http(String),

    #[error("provider response malformed: {0}")]
    Malformed(String),

    #[error("rate limited")]
    RateLimited,

    #[error("provider disabled")]
    Disabled,

    #[error("lookup timed out")]
    Timeout,
}

impl From<reqwest::Error> for IntelError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}
