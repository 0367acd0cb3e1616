use thiserror::Error;

/// Errors surfaced by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bounded topic queue stayed full past the publish timeout.
    #[error("publish to '{topic}' timed out after {timeout_ms}ms, payload dropped")]
    PublishTimeout { topic: String, timeout_ms: u64 },

    /// The payload could not be serialized for the wire.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The bus has been closed; no further publishes are accepted.
    #[error("bus is closed")]
    Closed,

    /// Broker transport failure (connection, protocol).
    #[error("broker error: {0}")]
    Broker(String),
}
