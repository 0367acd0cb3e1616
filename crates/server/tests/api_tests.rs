//! HTTP surface tests over an in-memory pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum_test::TestServer;

use vigil_bus::{EventBus, MemoryBus};
use vigil_core::{AlertEvent, SensorId, SeverityThresholds};
use vigil_pipeline::PipelineBuilder;
use vigil_response::DataPlane;
use vigil_server::api::{router, AppState};
use vigil_store::Repository;
use vigil_store_memory::MemoryRepository;

struct TestContext {
    server: TestServer,
    repo: Arc<MemoryRepository>,
}

fn context() -> TestContext {
    let bus = Arc::new(MemoryBus::default());
    let repo = Arc::new(MemoryRepository::new());
    let pipeline = Arc::new(
        PipelineBuilder::new()
            .bus(Arc::clone(&bus) as Arc<dyn EventBus>)
            .repository(Arc::clone(&repo) as Arc<dyn Repository>)
            .data_plane(DataPlane::production())
            .build()
            .expect("pipeline assembles"),
    );
    let state = AppState {
        repository: Arc::clone(&repo) as Arc<dyn Repository>,
        pipeline,
    };
    TestContext {
        server: TestServer::new(router(state)).expect("test server"),
        repo,
    }
}

fn alert(score: f64) -> AlertEvent {
    AlertEvent::new(
        "203.0.113.7".parse().unwrap(),
        "10.0.0.5".parse().unwrap(),
        "tcp",
        BTreeMap::new(),
        score,
        score,
        &SeverityThresholds::default(),
        SensorId::new("s1"),
    )
}

#[tokio::test]
async fn health_is_ok() {
    let ctx = context();
    let response = ctx.server.get("/v1/health").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn stats_reflect_saved_records() {
    let ctx = context();
    ctx.repo.save_alert(&alert(0.9)).await.unwrap();
    ctx.repo.save_alert(&alert(0.1)).await.unwrap();

    let response = ctx.server.get("/v1/stats").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["alerts"], 2);
    assert_eq!(body["alert_severities"]["high"], 1);
    assert_eq!(body["alert_severities"]["low"], 1);
    assert_eq!(body["actions"], 0);
}

#[tokio::test]
async fn alert_listing_paginates() {
    let ctx = context();
    for _ in 0..5 {
        ctx.repo.save_alert(&alert(0.5)).await.unwrap();
    }

    let response = ctx.server.get("/v1/alerts?limit=2&offset=1").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 5);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["offset"], 1);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn revert_of_missing_action_is_404() {
    let ctx = context();
    let response = ctx.server.post("/v1/actions/nope/revert").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn empty_listings_are_well_formed() {
    let ctx = context();
    for path in ["/v1/alerts", "/v1/investigations", "/v1/actions"] {
        let response = ctx.server.get(path).await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["total"], 0);
        assert!(body["items"].as_array().unwrap().is_empty());
    }
}
