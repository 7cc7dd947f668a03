//! HTTP-level scenario tests: a cold `/splits` read schedules a backfill and reports
//! not-ready, then becomes ready once the relevant cache entries exist; a webhook event
//! is accepted and triggers a state refresh; malformed query parameters are rejected.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use cf_api::AppState;
use cf_cache::CacheStore;
use cf_graph::ProcessingGraph;
use cf_hub::StubHubClient;
use cf_protocol::{JobStatus, StepKind, SystemConfig};
use cf_queue::QueueStore;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

async fn test_state(hub: StubHubClient) -> AppState {
    let cache_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
    let cache = CacheStore::new(cache_pool);
    cache.init().await.unwrap();

    let queue_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
    let queue = QueueStore::new(queue_pool);
    queue.init().await.unwrap();

    AppState::with_allow_all(
        Arc::new(ProcessingGraph::new().unwrap()),
        Arc::new(cache),
        Arc::new(queue),
        Arc::new(hub),
        Arc::new(SystemConfig::from_env()),
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthcheck_is_ok() {
    let state = test_state(StubHubClient::new()).await;
    let router = cf_api::build_router(state);

    let response = router
        .oneshot(Request::builder().uri("/healthcheck").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cold_splits_read_schedules_backfill_and_reports_not_ready() {
    let hub = StubHubClient::new().with_dataset("squad", "r1");
    let state = test_state(hub).await;
    let queue = state.queue.clone();
    let router = cf_api::build_router(state);

    let response = router
        .oneshot(Request::builder().uri("/splits?dataset=squad").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.headers().get("X-Error-Code").unwrap(), "ResponseNotReady");

    let counts = queue.counts_by_status().await.unwrap();
    assert!(*counts.get(&JobStatus::Waiting).unwrap_or(&0) > 0);
}

#[tokio::test]
async fn splits_becomes_ready_once_config_and_split_names_are_cached() {
    let hub = StubHubClient::new().with_dataset("squad", "r1");
    let state = test_state(hub).await;
    let cache = state.cache.clone();

    cache
        .upsert(
            StepKind::DatasetConfigNames,
            "squad",
            None,
            None,
            "r1",
            br#"{"config_names":[{"config":"default"}]}"#.to_vec(),
            200,
            None,
            None,
            1.0,
            1,
        )
        .await
        .unwrap();
    cache
        .upsert(
            StepKind::ConfigSplitNamesFromInfo,
            "squad",
            Some("default".to_string()),
            None,
            "r1",
            br#"{"split_names":[{"split":"train"},{"split":"test"}]}"#.to_vec(),
            200,
            None,
            None,
            1.0,
            1,
        )
        .await
        .unwrap();

    let router = cf_api::build_router(state);
    let response = router
        .oneshot(Request::builder().uri("/splits?dataset=squad").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-Revision").unwrap(), "r1");
    let body = body_json(response).await;
    let splits = body["splits"].as_array().unwrap();
    assert_eq!(splits.len(), 2);
}

#[tokio::test]
async fn webhook_add_event_schedules_a_backfill() {
    let hub = StubHubClient::new().with_dataset("squad", "r1");
    let state = test_state(hub).await;
    let queue = state.queue.clone();
    let router = cf_api::build_router(state);

    let payload = serde_json::json!({
        "event": "add",
        "repo": {"type": "dataset", "name": "squad"},
    });
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let counts = queue.counts_by_status().await.unwrap();
    assert!(*counts.get(&JobStatus::Waiting).unwrap_or(&0) > 0);
}

#[tokio::test]
async fn webhook_rejects_non_dataset_repos() {
    let state = test_state(StubHubClient::new()).await;
    let router = cf_api::build_router(state);

    let payload = serde_json::json!({
        "event": "update",
        "repo": {"type": "model", "name": "squad"},
    });
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rows_rejects_length_outside_bounds() {
    let state = test_state(StubHubClient::new()).await;
    let router = cf_api::build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/rows?dataset=squad&config=default&split=train&offset=0&length=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.headers().get("X-Error-Code").unwrap(), "InvalidParameter");
}

#[tokio::test]
async fn filter_rejects_empty_where_clause() {
    let state = test_state(StubHubClient::new()).await;
    let router = cf_api::build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/filter?dataset=squad&config=default&split=train&offset=0&length=10&where=")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
