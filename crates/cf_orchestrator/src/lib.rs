//! The three orchestrator entrypoints — hub webhook, API cold-read, and the periodic
//! maintenance tick — plus the backfill planner they all funnel through. Grounded on
//! `casparian_sentinel/sentinel.rs`'s dispatch loop (event in, state read, jobs written),
//! adapted from the ZMQ/session-oriented dispatch there to a direct store-backed planner.

use cf_cache::CacheEntry;
use cf_graph::ProcessingGraph;
use cf_hub::{HubClient, HubLookup};
use cf_protocol::{Priority, StepKind};
use cf_queue::{QueueStore, RetryPolicy};
use cf_state::DatasetStateBuilder;
use tracing::{info, warn};

/// A hub-side change notification.
#[derive(Debug, Clone)]
pub enum HubEvent {
    Created,
    Updated,
    Moved { old_dataset: String },
    Deleted,
}

/// Outcome of a cold API read against the cache.
#[derive(Debug, Clone)]
pub enum ApiReadOutcome {
    /// A successful, current entry.
    Ready(CacheEntry),
    /// A cached error, returned as-is rather than re-triggering compute.
    CachedError(CacheEntry),
    /// Nothing usable yet; a backfill was scheduled (or the dataset is unsupported).
    NotReady,
}

pub struct Orchestrator<'a> {
    pub graph: &'a ProcessingGraph,
    pub cache: &'a cf_cache::CacheStore,
    pub queue: &'a QueueStore,
    pub hub: &'a dyn HubClient,
    pub retry_policy: RetryPolicy,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        graph: &'a ProcessingGraph,
        cache: &'a cf_cache::CacheStore,
        queue: &'a QueueStore,
        hub: &'a dyn HubClient,
    ) -> Self {
        Self { graph, cache, queue, hub, retry_policy: RetryPolicy::default() }
    }

    /// Materializes dataset state and upserts every resulting backfill task, raising
    /// each task's (fixed-LOW) priority to at least `priority`.
    pub async fn plan_backfill(&self, dataset: &str, revision: &str, priority: Priority) -> anyhow::Result<usize> {
        let builder = DatasetStateBuilder::new(self.graph, self.cache, self.queue);
        let state = builder.build(dataset, revision).await?;
        let tasks = cf_state::backfill_tasks(&state, self.graph, &self.retry_policy.retryable);

        let mut enqueued = 0;
        for task in tasks {
            let difficulty = self.graph.bonus_difficulty(task.kind, self.hub.dataset_size_bytes(dataset).await?);
            self.queue
                .upsert(
                    task.kind,
                    dataset,
                    task.config,
                    task.split,
                    revision,
                    task.priority.raised_to(priority),
                    difficulty as i64,
                )
                .await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    pub async fn on_hub_event(&self, dataset: &str, event: HubEvent) -> anyhow::Result<()> {
        match event {
            HubEvent::Deleted => {
                self.retire_dataset(dataset).await?;
            }
            HubEvent::Moved { old_dataset } => {
                self.retire_dataset(&old_dataset).await?;
                self.refresh_or_rebuild(dataset).await?;
            }
            HubEvent::Created | HubEvent::Updated => {
                self.refresh_or_rebuild(dataset).await?;
            }
        }
        Ok(())
    }

    async fn retire_dataset(&self, dataset: &str) -> anyhow::Result<()> {
        let deleted = self.cache.delete_by_dataset(dataset).await?;
        let cancelled = self.queue.cancel_all_for_dataset(dataset).await?;
        info!("retired dataset {dataset}: {deleted} cache entries deleted, {cancelled} jobs cancelled");
        Ok(())
    }

    async fn refresh_or_rebuild(&self, dataset: &str) -> anyhow::Result<()> {
        let revision = match self.hub.lookup(dataset).await? {
            HubLookup::Found { revision } => revision,
            HubLookup::Gated => {
                warn!("dataset {dataset} is gated; skipping refresh");
                return Ok(());
            }
            HubLookup::NotFound => {
                warn!("dataset {dataset} not found on hub; skipping refresh");
                return Ok(());
            }
        };

        let root = self
            .cache
            .get_without_content(StepKind::DatasetConfigNames, dataset, None, None)
            .await?;

        let up_to_date_root = root.as_ref().is_some_and(|h| h.revision == revision);

        if up_to_date_root {
            self.plan_backfill(dataset, &revision, Priority::Normal).await?;
        } else {
            let difficulty = self.graph.bonus_difficulty(StepKind::DatasetConfigNames, None);
            self.queue
                .upsert(StepKind::DatasetConfigNames, dataset, None, None, &revision, Priority::Normal, difficulty as i64)
                .await?;
        }
        Ok(())
    }

    pub async fn on_api_read(
        &self,
        dataset: &str,
        kinds: &[StepKind],
        config: Option<&str>,
        split: Option<&str>,
    ) -> anyhow::Result<ApiReadOutcome> {
        let header = self.cache.best(kinds, dataset, config, split).await?;
        let is_absent = header.attempts == 0 && header.error_code == Some(cf_protocol::ErrorCode::ResponseNotFound);

        if !is_absent {
            let entry = self.cache.get(header.kind, dataset, config, split).await?;
            if let Some(entry) = entry {
                let revision = match self.hub.lookup(dataset).await? {
                    HubLookup::Found { revision } => Some(revision),
                    _ => None,
                };
                if header.is_success() && revision.as_deref() == Some(entry.revision.as_str()) {
                    return Ok(ApiReadOutcome::Ready(entry));
                }
                if !header.is_success() {
                    return Ok(ApiReadOutcome::CachedError(entry));
                }
            }
        }

        match self.hub.lookup(dataset).await? {
            HubLookup::Found { revision } => {
                self.plan_backfill(dataset, &revision, Priority::Normal).await?;
            }
            HubLookup::Gated | HubLookup::NotFound => {}
        }
        Ok(ApiReadOutcome::NotReady)
    }

    /// Periodic maintenance: for each dataset in the sample, plan a LOW-priority
    /// backfill against its current hub revision. Returns the number of tasks enqueued.
    pub async fn tick(&self, dataset_sample: &[String]) -> anyhow::Result<usize> {
        let mut total = 0;
        for dataset in dataset_sample {
            let revision = match self.hub.lookup(dataset).await? {
                HubLookup::Found { revision } => revision,
                HubLookup::Gated | HubLookup::NotFound => continue,
            };
            total += self.plan_backfill(dataset, &revision, Priority::Low).await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_hub::StubHubClient;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (cf_cache::CacheStore, QueueStore, ProcessingGraph) {
        let cache_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let cache = cf_cache::CacheStore::new(cache_pool);
        cache.init().await.unwrap();

        let queue_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let queue = QueueStore::new(queue_pool);
        queue.init().await.unwrap();

        (cache, queue, ProcessingGraph::new().unwrap())
    }

    #[tokio::test]
    async fn cold_read_with_no_entry_schedules_backfill_and_reports_not_ready() {
        let (cache, queue, graph) = setup().await;
        let hub = StubHubClient::new().with_dataset("squad", "r1");
        let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);

        let outcome = orchestrator
            .on_api_read("squad", &[StepKind::DatasetIsValid], None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ApiReadOutcome::NotReady));

        let counts = queue.counts_by_status().await.unwrap();
        assert!(*counts.get(&cf_protocol::JobStatus::Waiting).unwrap_or(&0) > 0);
    }

    #[tokio::test]
    async fn successful_current_entry_is_returned_ready() {
        let (cache, queue, graph) = setup().await;
        let hub = StubHubClient::new().with_dataset("squad", "r1");
        cache
            .upsert(StepKind::DatasetIsValid, "squad", None, None, "r1", b"{}".to_vec(), 200, None, None, 1.0, 2)
            .await
            .unwrap();

        let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);
        let outcome = orchestrator
            .on_api_read("squad", &[StepKind::DatasetIsValid], None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ApiReadOutcome::Ready(_)));
    }

    #[tokio::test]
    async fn hub_deleted_event_clears_cache_and_cancels_jobs() {
        let (cache, queue, graph) = setup().await;
        let hub = StubHubClient::new().with_dataset("squad", "r1");
        cache
            .upsert(StepKind::DatasetConfigNames, "squad", None, None, "r1", b"{}".to_vec(), 200, None, None, 1.0, 1)
            .await
            .unwrap();
        queue
            .upsert(StepKind::DatasetIsValid, "squad", None, None, "r1", Priority::Normal, 1)
            .await
            .unwrap();

        let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);
        orchestrator.on_hub_event("squad", HubEvent::Deleted).await.unwrap();

        assert!(cache
            .get_without_content(StepKind::DatasetConfigNames, "squad", None, None)
            .await
            .unwrap()
            .is_none());
        let counts = queue.counts_by_status().await.unwrap();
        assert_eq!(*counts.get(&cf_protocol::JobStatus::Waiting).unwrap_or(&0), 0);
    }

    #[tokio::test]
    async fn hub_updated_event_with_stale_revision_rebuilds_from_root() {
        let (cache, queue, graph) = setup().await;
        let hub = StubHubClient::new().with_dataset("squad", "r2");
        cache
            .upsert(StepKind::DatasetConfigNames, "squad", None, None, "r1", b"{}".to_vec(), 200, None, None, 1.0, 1)
            .await
            .unwrap();

        let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);
        orchestrator.on_hub_event("squad", HubEvent::Updated).await.unwrap();

        let job = queue.start_one(None, "w", 20).await.unwrap().unwrap();
        assert_eq!(job.kind, StepKind::DatasetConfigNames);
        assert_eq!(job.revision, "r2");
    }

    #[tokio::test]
    async fn tick_plans_backfill_for_sampled_datasets() {
        let (cache, queue, graph) = setup().await;
        let hub = StubHubClient::new().with_dataset("a", "r1").with_dataset("b", "r1");
        let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);

        let enqueued = orchestrator.tick(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert!(enqueued > 0);

        let counts = queue.counts_by_status().await.unwrap();
        assert!(*counts.get(&cf_protocol::JobStatus::Waiting).unwrap_or(&0) >= 2);
    }

    #[tokio::test]
    async fn planner_is_idempotent_with_no_worker_progress() {
        let (cache, queue, graph) = setup().await;
        let hub = StubHubClient::new().with_dataset("squad", "r1");
        let orchestrator = Orchestrator::new(&graph, &cache, &queue, &hub);

        let first = orchestrator.plan_backfill("squad", "r1", Priority::Low).await.unwrap();
        assert!(first > 0);

        let counts = queue.counts_by_status().await.unwrap();
        let waiting_after_first = *counts.get(&cf_protocol::JobStatus::Waiting).unwrap_or(&0);
        assert_eq!(waiting_after_first, first as i64);

        let second = orchestrator.plan_backfill("squad", "r1", Priority::Low).await.unwrap();
        assert_eq!(second, 0);

        let counts = queue.counts_by_status().await.unwrap();
        assert_eq!(*counts.get(&cf_protocol::JobStatus::Waiting).unwrap_or(&0), waiting_after_first);
    }
}
