use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vigil_core::{ActionId, ActionRecord, AlertEvent, InvestigationReport};
use vigil_pipeline::Pipeline;
use vigil_store::repository::effective_limit;
use vigil_store::{Page, Repository, StoreStats};

use crate::error::ServerError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub pipeline: Arc<Pipeline>,
}

/// Build the HTTP surface over a running pipeline.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stats", get(stats))
        .route("/v1/alerts", get(list_alerts))
        .route("/v1/investigations", get(list_investigations))
        .route("/v1/actions", get(list_actions))
        .route("/v1/actions/{id}/revert", post(revert_action))
        .route("/v1/stream", get(stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// `GET /v1/health` -- liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /v1/stats` -- aggregate counts with per-bucket breakdowns.
async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ServerError> {
    Ok(Json(state.repository.stats().await?))
}

/// `GET /v1/alerts?limit&offset` -- newest first.
async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<AlertEvent>>, ServerError> {
    let page = state
        .repository
        .list_alerts(effective_limit(params.limit), params.offset)
        .await?;
    Ok(Json(page))
}

/// `GET /v1/investigations?limit&offset` -- newest first.
async fn list_investigations(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<InvestigationReport>>, ServerError> {
    let page = state
        .repository
        .list_investigations(effective_limit(params.limit), params.offset)
        .await?;
    Ok(Json(page))
}

/// `GET /v1/actions?limit&offset` -- newest first.
async fn list_actions(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<ActionRecord>>, ServerError> {
    let page = state
        .repository
        .list_actions(effective_limit(params.limit), params.offset)
        .await?;
    Ok(Json(page))
}

/// `POST /v1/actions/{id}/revert` -- undo a reversible action. Reverting an
/// already-reverted action returns the existing revert record.
async fn revert_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionRecord>, ServerError> {
    let record = state
        .pipeline
        .response()
        .revert(&ActionId::new(id))
        .await?;
    Ok(Json(record))
}

/// `GET /v1/stream` -- live counter snapshots as server-sent events, one
/// per second.
async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let pipeline = Arc::clone(&state.pipeline);
    let events = IntervalStream::new(tokio::time::interval(Duration::from_secs(1))).map(move |_| {
        let snapshot = pipeline.snapshot();
        let event = Event::default()
            .json_data(&snapshot)
            .unwrap_or_else(|_| Event::default().comment("snapshot unavailable"));
        Ok(event)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
