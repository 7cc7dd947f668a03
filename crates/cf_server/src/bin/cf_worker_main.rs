//! `cf-worker`: leases jobs from the queue and drives them through the registered
//! step computations. Env-configured, no CLI flags (out of scope per the engine's
//! external-collaborator boundary).

use std::env;
use std::sync::Arc;

use cf_cache::CacheStore;
use cf_graph::ProcessingGraph;
use cf_protocol::SystemConfig;
use cf_queue::QueueStore;
use cf_worker::{stub_steps::stub_registry, Worker, WorkerConfig};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cf_logging::init_logging(cf_logging::LogConfig { app_name: "cf_worker", verbose: env::var("CF_VERBOSE").is_ok() })?;

    let system_config = SystemConfig::from_env();

    let cache_pool = SqlitePoolOptions::new().connect(&cache_db_url()).await?;
    let cache = CacheStore::new(cache_pool);
    cache.init().await?;

    let queue_pool = SqlitePoolOptions::new().connect(&queue_db_url()).await?;
    let queue = QueueStore::new(queue_pool);
    queue.init().await?;

    let graph = ProcessingGraph::new().map_err(anyhow::Error::from)?;

    let worker_id = env::var("WORKER_ID").unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4()));
    let worker_config = WorkerConfig {
        worker_id: worker_id.clone(),
        max_jobs_per_namespace: system_config.max_jobs_per_namespace,
        content_max_bytes: system_config.worker_content_max_bytes,
        heartbeat_interval: system_config.worker_heartbeat_interval,
        ..WorkerConfig::default()
    };

    info!("starting cf-worker {worker_id}");
    let worker = Worker::new(worker_config, Arc::new(graph), Arc::new(cache), Arc::new(queue), stub_registry());
    worker.run().await
}

fn cache_db_url() -> String {
    env::var("CF_CACHE_DB_URL").unwrap_or_else(|_| "sqlite://cf_cache.db?mode=rwc".to_string())
}

fn queue_db_url() -> String {
    env::var("CF_QUEUE_DB_URL").unwrap_or_else(|_| "sqlite://cf_queue.db?mode=rwc".to_string())
}
