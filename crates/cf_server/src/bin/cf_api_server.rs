//! `cf-api-server`: serves the HTTP read path. Env-configured, no CLI flags (out of
//! scope per the engine's external-collaborator boundary).

use std::env;
use std::sync::Arc;

use cf_api::AppState;
use cf_cache::CacheStore;
use cf_graph::ProcessingGraph;
use cf_hub::StubHubClient;
use cf_protocol::SystemConfig;
use cf_queue::QueueStore;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cf_logging::init_logging(cf_logging::LogConfig { app_name: "cf_api", verbose: env::var("CF_VERBOSE").is_ok() })?;

    let config = SystemConfig::from_env();
    info!("starting cf-api-server, hub endpoint {}", config.hf_endpoint);

    let cache_pool = SqlitePoolOptions::new().connect(&cache_db_url()).await?;
    let cache = CacheStore::new(cache_pool);
    cache.init().await?;

    let queue_pool = SqlitePoolOptions::new().connect(&queue_db_url()).await?;
    let queue = QueueStore::new(queue_pool);
    queue.init().await?;

    let graph = ProcessingGraph::new().map_err(|err| anyhow::anyhow!(err))?;
    let hub = StubHubClient::new();

    let state = AppState::with_allow_all(Arc::new(graph), Arc::new(cache), Arc::new(queue), Arc::new(hub), Arc::new(config));
    let router = cf_api::build_router(state);

    let bind_addr = env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    info!("listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn cache_db_url() -> String {
    env::var("CF_CACHE_DB_URL").unwrap_or_else(|_| "sqlite://cf_cache.db?mode=rwc".to_string())
}

fn queue_db_url() -> String {
    env::var("CF_QUEUE_DB_URL").unwrap_or_else(|_| "sqlite://cf_queue.db?mode=rwc".to_string())
}
