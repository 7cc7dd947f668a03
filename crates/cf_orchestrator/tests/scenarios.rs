//! End-to-end scenario tests combining the orchestrator, cache, queue, graph, and a
//! worker running a stub step registry against an in-memory sqlite store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cf_cache::CacheStore;
use cf_graph::ProcessingGraph;
use cf_hub::StubHubClient;
use cf_orchestrator::{ApiReadOutcome, HubEvent, Orchestrator};
use cf_protocol::{JobStatus, Priority, StepError, StepKind};
use cf_queue::QueueStore;
use cf_step::{JobParams, JobResult, StepCompute, StepContext};
use cf_worker::{StepRegistry, Worker, WorkerConfig};
use sqlx::sqlite::SqlitePoolOptions;

struct DatasetConfigNamesStep;

#[async_trait]
impl StepCompute for DatasetConfigNamesStep {
    fn job_runner_version(&self) -> u32 {
        1
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(br#"{"config_names":[{"config":"C"}]}"#.to_vec()))
    }
}

struct SplitNamesFromInfoStep;

#[async_trait]
impl StepCompute for SplitNamesFromInfoStep {
    fn job_runner_version(&self) -> u32 {
        1
    }

    fn parallel_step(&self) -> Option<StepKind> {
        Some(StepKind::ConfigSplitNamesFromStreaming)
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(br#"{"split_names":[{"split":"train"}]}"#.to_vec()))
    }

    fn new_split_keys(&self, content: &[u8]) -> Vec<(String, String)> {
        #[derive(serde::Deserialize)]
        struct Item {
            split: String,
        }
        #[derive(serde::Deserialize)]
        struct Content {
            split_names: Vec<Item>,
        }
        let parsed: Content = serde_json::from_slice(content).unwrap();
        parsed.split_names.into_iter().map(|s| ("C".to_string(), s.split)).collect()
    }
}

struct SplitNamesFromStreamingStep;

#[async_trait]
impl StepCompute for SplitNamesFromStreamingStep {
    fn job_runner_version(&self) -> u32 {
        1
    }

    fn parallel_step(&self) -> Option<StepKind> {
        Some(StepKind::ConfigSplitNamesFromInfo)
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        panic!("heavy compute should have been short-circuited by the parallel pair");
    }
}

struct NoopStep;

#[async_trait]
impl StepCompute for NoopStep {
    fn job_runner_version(&self) -> u32 {
        1
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(b"{}".to_vec()))
    }
}

async fn setup() -> (Arc<CacheStore>, Arc<QueueStore>, Arc<ProcessingGraph>) {
    let cache_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
    let cache = CacheStore::new(cache_pool);
    cache.init().await.unwrap();

    let queue_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
    let queue = QueueStore::new(queue_pool);
    queue.init().await.unwrap();

    (Arc::new(cache), Arc::new(queue), Arc::new(ProcessingGraph::new().unwrap()))
}

fn full_registry() -> StepRegistry {
    let mut registry: StepRegistry = HashMap::new();
    registry.insert(StepKind::DatasetConfigNames, Arc::new(DatasetConfigNamesStep));
    registry.insert(StepKind::ConfigSplitNamesFromInfo, Arc::new(SplitNamesFromInfoStep));
    for &kind in StepKind::ALL {
        registry.entry(kind).or_insert_with(|| Arc::new(NoopStep) as Arc<dyn StepCompute>);
    }
    registry
}

#[tokio::test]
async fn scenario_1_cold_read_becomes_ready() {
    let (cache, queue, graph) = setup().await;
    let hub = StubHubClient::new().with_dataset("A", "r1");
    let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);

    let outcome = orchestrator
        .on_api_read("A", &[StepKind::ConfigSplitNamesFromInfo, StepKind::ConfigSplitNamesFromStreaming], Some("C"), None)
        .await
        .unwrap();
    assert!(matches!(outcome, ApiReadOutcome::NotReady));

    // Cold read funnels to plan_backfill, which enqueues all three dataset-scope
    // steps, not just the one that was read.
    let counts = queue.counts_by_status().await.unwrap();
    assert_eq!(*counts.get(&JobStatus::Waiting).unwrap_or(&0), 3);

    let worker = Worker::new(WorkerConfig::default(), Arc::clone(&graph), Arc::clone(&cache), Arc::clone(&queue), full_registry());
    assert!(worker.run_once().await.unwrap());

    let header = cache.get_without_content(StepKind::DatasetConfigNames, "A", None, None).await.unwrap().unwrap();
    assert!(header.is_success());

    // Config-scoped successors of dataset-config-names were fanned out.
    let counts = queue.counts_by_status().await.unwrap();
    assert!(*counts.get(&JobStatus::Waiting).unwrap_or(&0) > 0);
}

#[tokio::test]
async fn scenario_2_webhook_triggered_refresh_replaces_revision() {
    let (cache, queue, graph) = setup().await;
    let hub = StubHubClient::new().with_dataset("A", "r1");

    cache
        .upsert(StepKind::DatasetConfigNames, "A", None, None, "r1", br#"{"config_names":[{"config":"C"}]}"#.to_vec(), 200, None, None, 1.0, 1)
        .await
        .unwrap();

    {
        let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);
        hub.set_revision("A", "r2");
        orchestrator.on_hub_event("A", HubEvent::Updated).await.unwrap();
    }

    let counts = queue.counts_by_status().await.unwrap();
    assert_eq!(*counts.get(&JobStatus::Waiting).unwrap_or(&0), 1);

    let worker = Worker::new(WorkerConfig::default(), Arc::clone(&graph), Arc::clone(&cache), Arc::clone(&queue), full_registry());
    assert!(worker.run_once().await.unwrap());

    let header = cache.get_without_content(StepKind::DatasetConfigNames, "A", None, None).await.unwrap().unwrap();
    assert!(header.is_success());
    assert_eq!(header.revision, "r2");
}

#[tokio::test]
async fn scenario_3_parallel_short_circuit() {
    let (cache, queue, graph) = setup().await;
    cache
        .upsert(
            StepKind::ConfigSplitNamesFromInfo,
            "A",
            Some("C".to_string()),
            None,
            "r1",
            br#"{"split_names":[{"split":"train"}]}"#.to_vec(),
            200,
            None,
            None,
            1.0,
            3,
        )
        .await
        .unwrap();

    queue
        .upsert(StepKind::ConfigSplitNamesFromStreaming, "A", Some("C".to_string()), None, "r1", Priority::Normal, 1)
        .await
        .unwrap();

    let mut registry: StepRegistry = HashMap::new();
    registry.insert(StepKind::ConfigSplitNamesFromStreaming, Arc::new(SplitNamesFromStreamingStep));
    let worker = Worker::new(WorkerConfig::default(), Arc::clone(&graph), Arc::clone(&cache), Arc::clone(&queue), registry);
    assert!(worker.run_once().await.unwrap());

    let header = cache
        .get_without_content(StepKind::ConfigSplitNamesFromStreaming, "A", Some("C"), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header.error_code, Some(cf_protocol::ErrorCode::ResponseAlreadyComputedError));
}

#[tokio::test]
async fn scenario_4_zombie_recovery_rejects_old_owner() {
    let (_, queue, _) = setup().await;
    queue.upsert(StepKind::DatasetConfigNames, "A", None, None, "r1", Priority::Normal, 1).await.unwrap();
    let job = queue.start_one(None, "w_old", 20).await.unwrap().unwrap();

    let far_future = job.started_at.unwrap() + chrono::Duration::seconds(1000);
    let reclaimed = queue.reclaim_zombies(far_future, chrono::Duration::seconds(180)).await.unwrap();
    assert_eq!(reclaimed, vec![job.job_id.clone()]);

    assert!(!queue.finish(&job.job_id, "w_old", JobStatus::Success).await.unwrap());

    let relet = queue.start_one(None, "w_new", 20).await.unwrap().unwrap();
    assert_eq!(relet.job_id, job.job_id);
    assert!(queue.finish(&relet.job_id, "w_new", JobStatus::Success).await.unwrap());
}

#[tokio::test]
async fn scenario_5_fairness_cap_limits_concurrent_starts_per_namespace() {
    let (_, queue, _) = setup().await;
    for i in 0..300 {
        queue
            .upsert(StepKind::DatasetConfigNames, &format!("dataset-{i}"), None, None, "r1", Priority::Normal, 1)
            .await
            .unwrap();
    }

    let mut started = 0;
    for w in 0..50 {
        if queue.start_one(None, &format!("worker-{w}"), 1).await.unwrap().is_some() {
            started += 1;
        }
    }
    assert_eq!(started, 50);

    let counts = queue.counts_by_status().await.unwrap();
    assert_eq!(*counts.get(&JobStatus::Started).unwrap_or(&0), 50);
}
