use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors surfaced by the server layer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Fatal startup configuration problem.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<vigil_store::StoreError> for ServerError {
    fn from(e: vigil_store::StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<vigil_response::ResponseError> for ServerError {
    fn from(e: vigil_response::ResponseError) -> Self {
        use vigil_response::ResponseError as R;
        match e {
            R::UnknownAction(id) => Self::NotFound(format!("action {id}")),
            R::NotReversible(id) => Self::Conflict(format!("action {id} is not reversible")),
            other => Self::Store(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Configuration(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
