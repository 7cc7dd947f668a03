//! The HTTP read path: `/is-valid`, `/splits`, `/first-rows`, `/rows`, `/filter`,
//! `/search`, the hub `/webhook`, `/metrics`, and `/healthcheck`. A thin shaping layer
//! over the cache/queue stores and the orchestrator's `onApiRead`/`onHubEvent` entry
//! points — this crate owns no compute, only request validation, auth, and response
//! envelopes.
//!
//! There is no HTTP framework in the repo this engine's worker/queue/cache layers are
//! grounded on, so this surface is new: an `axum::Router`, enriched from the wider
//! pack's service patterns rather than imitated line-for-line from one file.

pub mod auth;
pub mod response;
pub mod rows;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use cf_cache::{CacheEntry, CacheStore};
use cf_graph::ProcessingGraph;
use cf_hub::{HubClient, HubLookup};
use cf_orchestrator::{ApiReadOutcome, Orchestrator};
use cf_protocol::{ErrorCode, Metric, Priority, StepKind, SystemConfig};
use cf_queue::QueueStore;

use auth::{AllowAllAuthorizer, AuthDecision, Authorizer};
use response::JsonResponse;
use rows::paginate_and_truncate;
use webhook::WebhookPayload;

/// Hard caps on the `/first-rows` preview, independent of the `/rows` pagination cap
/// (`SystemConfig::max_num_rows_per_page`): a preview is meant to be small regardless of
/// how many rows the split actually has.
const FIRST_ROWS_MAX_BYTES: usize = 1_000_000;
const FIRST_ROWS_MAX_NUMBER: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<ProcessingGraph>,
    pub cache: Arc<CacheStore>,
    pub queue: Arc<QueueStore>,
    pub hub: Arc<dyn HubClient>,
    pub authorizer: Arc<dyn Authorizer>,
    pub config: Arc<SystemConfig>,
}

impl AppState {
    pub fn new(
        graph: Arc<ProcessingGraph>,
        cache: Arc<CacheStore>,
        queue: Arc<QueueStore>,
        hub: Arc<dyn HubClient>,
        authorizer: Arc<dyn Authorizer>,
        config: Arc<SystemConfig>,
    ) -> Self {
        Self { graph, cache, queue, hub, authorizer, config }
    }

    /// Convenience constructor wiring the default allow-all authorizer, for tests and
    /// local runs where no real authorization collaborator is configured.
    pub fn with_allow_all(
        graph: Arc<ProcessingGraph>,
        cache: Arc<CacheStore>,
        queue: Arc<QueueStore>,
        hub: Arc<dyn HubClient>,
        config: Arc<SystemConfig>,
    ) -> Self {
        Self::new(graph, cache, queue, hub, Arc::new(AllowAllAuthorizer), config)
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(&self.graph, &self.cache, &self.queue, self.hub.as_ref())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/is-valid", get(is_valid))
        .route("/splits", get(splits))
        .route("/first-rows", get(first_rows))
        .route("/rows", get(rows_handler))
        .route("/filter", get(filter))
        .route("/search", get(search))
        .route("/webhook", post(webhook_handler))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct DatasetQuery {
    dataset: String,
}

#[derive(Debug, Deserialize)]
struct SplitScopedQuery {
    dataset: String,
    config: String,
    split: String,
}

#[derive(Debug, Deserialize)]
struct RowsQuery {
    dataset: String,
    config: String,
    split: String,
    offset: i64,
    length: i64,
}

#[derive(Debug, Deserialize)]
struct FilterQuery {
    dataset: String,
    config: String,
    split: String,
    offset: i64,
    length: i64,
    r#where: String,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    dataset: String,
    config: String,
    split: String,
    offset: i64,
    length: i64,
    query: String,
}

#[derive(Debug, Deserialize)]
struct ConfigNameItem {
    config: String,
}

#[derive(Debug, Deserialize)]
struct ConfigNamesContent {
    config_names: Vec<ConfigNameItem>,
}

#[derive(Debug, Deserialize)]
struct SplitNameItem {
    split: String,
}

#[derive(Debug, Deserialize)]
struct SplitNamesContent {
    split_names: Vec<SplitNameItem>,
}

#[derive(Debug, Deserialize, Default)]
struct RowsContent {
    #[serde(default)]
    features: Value,
    #[serde(default)]
    rows: Vec<Value>,
}

async fn healthcheck() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    let counts = match state.queue.counts_by_status().await {
        Ok(counts) => counts,
        Err(err) => return internal_error(err),
    };
    let metrics: Vec<Metric> = counts
        .into_iter()
        .map(|(status, count)| {
            Metric::new("cf_queue_jobs", "jobs in the queue by status", count as f64).with_label("status", status.as_str())
        })
        .collect();
    let body = cf_protocol::render_metrics(&metrics);
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

async fn is_valid(State(state): State<AppState>, Query(q): Query<DatasetQuery>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &q.dataset, bearer_token(&headers).as_deref()).await {
        return resp;
    }

    let outcome = match state.orchestrator().on_api_read(&q.dataset, &[StepKind::DatasetIsValid], None, None).await {
        Ok(outcome) => outcome,
        Err(err) => return internal_error(err),
    };

    match outcome {
        ApiReadOutcome::Ready(entry) => match serde_json::from_slice::<Value>(&entry.content) {
            Ok(body) => JsonResponse::ok(&body, Some(&entry.revision), state.config.api_max_age_long),
            Err(err) => internal_error(anyhow::anyhow!(err)),
        },
        ApiReadOutcome::CachedError(entry) => cached_error_response(&entry),
        ApiReadOutcome::NotReady => JsonResponse::not_ready(),
    }
}

async fn splits(State(state): State<AppState>, Query(q): Query<DatasetQuery>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &q.dataset, bearer_token(&headers).as_deref()).await {
        return resp;
    }

    let root_header = match state.cache.get_without_content(StepKind::DatasetConfigNames, &q.dataset, None, None).await {
        Ok(header) => header,
        Err(err) => return internal_error(err),
    };

    let Some(root_header) = root_header else {
        schedule_backfill(&state, &q.dataset).await;
        return JsonResponse::not_ready();
    };
    if !root_header.is_success() {
        schedule_backfill(&state, &q.dataset).await;
        return JsonResponse::not_ready();
    }

    let root_entry = match state.cache.get(StepKind::DatasetConfigNames, &q.dataset, None, None).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return JsonResponse::not_ready(),
        Err(err) => return internal_error(err),
    };
    let configs: Vec<String> = match serde_json::from_slice::<ConfigNamesContent>(&root_entry.content) {
        Ok(content) => content.config_names.into_iter().map(|item| item.config).collect(),
        Err(err) => return internal_error(anyhow::anyhow!(err)),
    };

    let mut splits = Vec::new();
    for config in &configs {
        let header = match state
            .cache
            .best(&[StepKind::ConfigSplitNamesFromInfo, StepKind::ConfigSplitNamesFromStreaming], &q.dataset, Some(config.as_str()), None)
            .await
        {
            Ok(header) => header,
            Err(err) => return internal_error(err),
        };
        if !header.is_success() {
            continue;
        }
        let entry = match state.cache.get(header.kind, &q.dataset, Some(config.as_str()), None).await {
            Ok(Some(entry)) => entry,
            _ => continue,
        };
        match serde_json::from_slice::<SplitNamesContent>(&entry.content) {
            Ok(content) => {
                for split_item in content.split_names {
                    splits.push(json!({"config": config, "split": split_item.split}));
                }
            }
            Err(err) => warn!("malformed split-names content for {}/{config}: {err}", q.dataset),
        }
    }

    if splits.is_empty() {
        schedule_backfill(&state, &q.dataset).await;
        return JsonResponse::not_ready();
    }

    JsonResponse::ok(&json!({"splits": splits}), Some(&root_entry.revision), state.config.api_max_age_long)
}

async fn first_rows(State(state): State<AppState>, Query(q): Query<SplitScopedQuery>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &q.dataset, bearer_token(&headers).as_deref()).await {
        return resp;
    }

    let outcome = match state
        .orchestrator()
        .on_api_read(&q.dataset, &[StepKind::SplitFirstRows], Some(q.config.as_str()), Some(q.split.as_str()))
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return internal_error(err),
    };

    match outcome {
        ApiReadOutcome::Ready(entry) => {
            let content = match serde_json::from_slice::<RowsContent>(&entry.content) {
                Ok(content) => content,
                Err(err) => return internal_error(anyhow::anyhow!(err)),
            };
            let page = paginate_and_truncate(&content.rows, 0, content.rows.len(), FIRST_ROWS_MAX_BYTES, FIRST_ROWS_MAX_NUMBER);
            let body = json!({"features": content.features, "rows": page.rows, "truncated": page.truncated});
            JsonResponse::ok(&body, Some(&entry.revision), state.config.api_max_age_long)
        }
        ApiReadOutcome::CachedError(entry) => cached_error_response(&entry),
        ApiReadOutcome::NotReady => JsonResponse::not_ready(),
    }
}

async fn rows_handler(State(state): State<AppState>, Query(q): Query<RowsQuery>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &q.dataset, bearer_token(&headers).as_deref()).await {
        return resp;
    }
    let offset = match validate_offset(q.offset) {
        Ok(offset) => offset,
        Err(resp) => return resp,
    };
    let length = match validate_length(q.length, state.config.max_num_rows_per_page) {
        Ok(length) => length,
        Err(resp) => return resp,
    };

    let outcome = match state
        .orchestrator()
        .on_api_read(&q.dataset, &[StepKind::SplitFirstRows], Some(q.config.as_str()), Some(q.split.as_str()))
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return internal_error(err),
    };

    shape_paginated_outcome(outcome, offset, length, state.config.api_max_age_short)
}

async fn filter(State(state): State<AppState>, Query(q): Query<FilterQuery>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &q.dataset, bearer_token(&headers).as_deref()).await {
        return resp;
    }
    if let Err(resp) = validate_nonempty("where", &q.r#where) {
        return resp;
    }
    let offset = match validate_offset(q.offset) {
        Ok(offset) => offset,
        Err(resp) => return resp,
    };
    let length = match validate_length(q.length, state.config.max_num_rows_per_page) {
        Ok(length) => length,
        Err(resp) => return resp,
    };

    let outcome = match state
        .orchestrator()
        .on_api_read(&q.dataset, &[StepKind::SplitDuckdbIndex], Some(q.config.as_str()), Some(q.split.as_str()))
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return internal_error(err),
    };

    shape_paginated_outcome(outcome, offset, length, state.config.api_max_age_short)
}

async fn search(State(state): State<AppState>, Query(q): Query<SearchQuery>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &q.dataset, bearer_token(&headers).as_deref()).await {
        return resp;
    }
    if let Err(resp) = validate_nonempty("query", &q.query) {
        return resp;
    }
    let offset = match validate_offset(q.offset) {
        Ok(offset) => offset,
        Err(resp) => return resp,
    };
    let length = match validate_length(q.length, state.config.max_num_rows_per_page) {
        Ok(length) => length,
        Err(resp) => return resp,
    };

    let outcome = match state
        .orchestrator()
        .on_api_read(&q.dataset, &[StepKind::SplitDuckdbIndex], Some(q.config.as_str()), Some(q.split.as_str()))
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return internal_error(err),
    };

    shape_paginated_outcome(outcome, offset, length, state.config.api_max_age_short)
}

fn shape_paginated_outcome(outcome: ApiReadOutcome, offset: usize, length: usize, max_age: Duration) -> Response {
    match outcome {
        ApiReadOutcome::Ready(entry) => {
            let content = match serde_json::from_slice::<RowsContent>(&entry.content) {
                Ok(content) => content,
                Err(err) => return internal_error(anyhow::anyhow!(err)),
            };
            let page = paginate_and_truncate(&content.rows, offset, length, FIRST_ROWS_MAX_BYTES, length.max(1));
            let body = json!({"rows": page.rows, "truncated": page.truncated});
            JsonResponse::ok(&body, Some(&entry.revision), max_age)
        }
        ApiReadOutcome::CachedError(entry) => cached_error_response(&entry),
        ApiReadOutcome::NotReady => JsonResponse::not_ready(),
    }
}

async fn webhook_handler(State(state): State<AppState>, Json(payload): Json<WebhookPayload>) -> Response {
    let (dataset, event) = match webhook::to_hub_event(&payload) {
        Ok(resolved) => resolved,
        Err(err) => return JsonResponse::error(StatusCode::BAD_REQUEST, ErrorCode::InvalidParameter, err.to_string()),
    };

    if let Err(err) = state.orchestrator().on_hub_event(&dataset, event).await {
        return internal_error(err);
    }
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn schedule_backfill(state: &AppState, dataset: &str) {
    if let Ok(HubLookup::Found { revision }) = state.hub.lookup(dataset).await {
        if let Err(err) = state.orchestrator().plan_backfill(dataset, &revision, Priority::Normal).await {
            warn!("failed to schedule backfill for {dataset}: {err}");
        }
    }
}

async fn authorize(state: &AppState, dataset: &str, token: Option<&str>) -> Result<(), Response> {
    match state.authorizer.authorize(dataset, token).await {
        AuthDecision::Allow => Ok(()),
        AuthDecision::Unauthenticated => {
            Err(JsonResponse::error(StatusCode::UNAUTHORIZED, ErrorCode::ExternalUnauthenticated, "authentication required"))
        }
        AuthDecision::Deny => {
            Err(JsonResponse::error(StatusCode::FORBIDDEN, ErrorCode::ExternalAuthenticated, "not authorized for this dataset"))
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn cached_error_response(entry: &CacheEntry) -> Response {
    JsonResponse::cached_error(entry.error_code.unwrap_or(ErrorCode::Unexpected), "cached error response")
}

fn internal_error(err: anyhow::Error) -> Response {
    JsonResponse::error(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Unexpected, err.to_string())
}

fn validate_offset(offset: i64) -> Result<usize, Response> {
    if offset < 0 {
        return Err(JsonResponse::error(StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::InvalidParameter, "offset must be >= 0"));
    }
    Ok(offset as usize)
}

fn validate_length(length: i64, max: u32) -> Result<usize, Response> {
    if length < 1 || length > max as i64 {
        return Err(JsonResponse::error(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InvalidParameter,
            format!("length must be in [1, {max}]"),
        ));
    }
    Ok(length as usize)
}

fn validate_nonempty(name: &str, value: &str) -> Result<(), Response> {
    if value.trim().is_empty() {
        return Err(JsonResponse::error(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InvalidParameter,
            format!("{name} must not be empty"),
        ));
    }
    Ok(())
}
