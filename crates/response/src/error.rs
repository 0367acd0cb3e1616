use thiserror::Error;

/// Errors surfaced by the response stage.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The decision matrix references an action type nobody registered.
    /// Fatal at startup.
    #[error("unknown action type '{0}' referenced by decision matrix")]
    UnknownActionType(String),

    /// No record exists for the requested revert.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// The record exists but cannot be reverted.
    #[error("action '{0}' is not reversible")]
    NotReversible(String),

    /// The action plug-in failed to execute.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The revert token was rejected by the plug-in.
    #[error("invalid revert token: {0}")]
    InvalidToken(String),

    #[error("store error: {0}")]
    Store(String),
}

impl ResponseError {
    /// Short kind used in the audit record's `error:<kind>` result.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownActionType(_) => "unknown_action_type",
            Self::UnknownAction(_) => "unknown_action",
            Self::NotReversible(_) => "not_reversible",
            Self::Execution(_) => "execution",
            Self::InvalidToken(_) => "invalid_token",
            Self::Store(_) => "store",
        }
    }
}
