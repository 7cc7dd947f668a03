//! The worker loop: lease a job, decide whether to skip it, invoke its step computation,
//! commit the result, fan out to successors, and release the lease. Grounded on
//! `casparian_worker/worker.rs`'s `run`/`execute_job`/`execute_job_inner` split, adapted
//! from a ZMQ dealer-socket transport to direct polling of the queue store.

pub mod stub_steps;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cf_cache::CacheStore;
use cf_graph::ProcessingGraph;
use cf_protocol::{ErrorCode, InputScope, JobStatus, StepKind};
use cf_queue::{JobRecord, QueueStore, RetryPolicy};
use cf_step::{JobParams, StepCompute, StepContext};
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

/// Worker configuration (plain data), in the teacher's `WorkerConfig` style.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub allowed_kinds: Option<Vec<StepKind>>,
    pub max_jobs_per_namespace: u32,
    pub content_max_bytes: u64,
    pub heartbeat_interval: Duration,
    pub poll_backoff_floor: Duration,
    pub poll_backoff_ceiling: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            allowed_kinds: None,
            max_jobs_per_namespace: 20,
            content_max_bytes: 10_000_000,
            heartbeat_interval: Duration::from_secs(60),
            poll_backoff_floor: Duration::from_millis(50),
            poll_backoff_ceiling: Duration::from_secs(5),
        }
    }
}

/// The set of pluggable step computations a worker can invoke, keyed by the step kind
/// they implement.
pub type StepRegistry = HashMap<StepKind, Arc<dyn StepCompute>>;

#[derive(Debug, Clone, Deserialize)]
struct ConfigNameItem {
    config: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigNamesContent {
    config_names: Vec<ConfigNameItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct SplitNameItem {
    split: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SplitNamesContent {
    split_names: Vec<SplitNameItem>,
}

/// Active worker, holding references to the shared cache/queue stores and the graph.
pub struct Worker {
    config: WorkerConfig,
    graph: Arc<ProcessingGraph>,
    cache: Arc<CacheStore>,
    queue: Arc<QueueStore>,
    registry: StepRegistry,
    retry_policy: RetryPolicy,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        graph: Arc<ProcessingGraph>,
        cache: Arc<CacheStore>,
        queue: Arc<QueueStore>,
        registry: StepRegistry,
    ) -> Self {
        Self {
            config,
            graph,
            cache,
            queue,
            registry,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Polls once, leasing and fully processing at most one job. Returns `true` if a job
    /// was leased, `false` if the queue had nothing eligible.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let allowed = self.config.allowed_kinds.as_deref();
        let Some(job) = self
            .queue
            .start_one(allowed, &self.config.worker_id, self.config.max_jobs_per_namespace)
            .await?
        else {
            return Ok(false);
        };

        self.process(job).await?;
        Ok(true)
    }

    /// Runs forever, polling the queue with bounded exponential backoff between empty
    /// polls. Intended to run inside a `tokio::spawn`ed task per concurrent worker slot.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut backoff = self.config.poll_backoff_floor;
        loop {
            match self.run_once().await {
                Ok(true) => {
                    backoff = self.config.poll_backoff_floor;
                }
                Ok(false) => {
                    tokio::time::sleep(self.jittered(backoff)).await;
                    backoff = (backoff * 2).min(self.config.poll_backoff_ceiling);
                }
                Err(err) => {
                    warn!("worker {} poll error: {err}", self.config.worker_id);
                    tokio::time::sleep(self.jittered(backoff)).await;
                    backoff = (backoff * 2).min(self.config.poll_backoff_ceiling);
                }
            }
        }
    }

    /// Adds up to 20% random jitter to a backoff duration, so many idle workers polling
    /// in lockstep don't all retry in the same instant.
    fn jittered(&self, backoff: Duration) -> Duration {
        let jitter_fraction = rand::thread_rng().gen_range(0.0..0.2);
        backoff + backoff.mul_f64(jitter_fraction)
    }

    async fn process(&self, job: JobRecord) -> anyhow::Result<()> {
        info!(
            "worker {} leased job {} ({} {} {:?} {:?})",
            self.config.worker_id, job.job_id, job.kind, job.dataset, job.config, job.split
        );

        if self.should_skip(&job).await? {
            self.queue.finish(&job.job_id, &self.config.worker_id, JobStatus::Skipped).await?;
            return Ok(());
        }

        let Some(compute) = self.registry.get(&job.kind).cloned() else {
            warn!("no StepCompute registered for {}", job.kind);
            self.queue.finish(&job.job_id, &self.config.worker_id, JobStatus::Error).await?;
            return Ok(());
        };

        let heartbeat_handle = self.spawn_heartbeat(job.job_id.clone());

        let params = JobParams {
            kind: job.kind,
            dataset: job.dataset.clone(),
            config: job.config.clone(),
            split: job.split.clone(),
            revision: job.revision.clone(),
        };
        let ctx = StepContext { cache: &self.cache };
        let outcome = cf_step::run_step(compute.as_ref(), &ctx, &params, self.config.content_max_bytes).await;

        heartbeat_handle.abort();

        self.cache
            .upsert(
                job.kind,
                &job.dataset,
                job.config.clone(),
                job.split.clone(),
                &job.revision,
                outcome.content.clone(),
                outcome.http_status,
                outcome.error_code,
                None,
                outcome.progress,
                compute.job_runner_version() as i64,
            )
            .await?;

        let final_status = if outcome.is_success() { JobStatus::Success } else { JobStatus::Error };

        if outcome.is_success() {
            self.fan_out(&job, &outcome.content, compute.as_ref()).await?;
        }

        self.queue.finish(&job.job_id, &self.config.worker_id, final_status).await?;
        Ok(())
    }

    /// Skip a job whose cache entry is already current: same revision, step version at
    /// least the step's own, not an error slated for retry, and fully computed.
    async fn should_skip(&self, job: &JobRecord) -> anyhow::Result<bool> {
        let Some(compute) = self.registry.get(&job.kind) else {
            return Ok(false);
        };
        let Some(header) = self
            .cache
            .get_without_content(job.kind, &job.dataset, job.config.as_deref(), job.split.as_deref())
            .await?
        else {
            return Ok(false);
        };

        let retryable = self.retry_policy.retryable.contains(&header.error_code.unwrap_or(ErrorCode::Unexpected));
        let current = header.revision == job.revision
            && header.job_runner_version >= compute.job_runner_version() as i64
            && !retryable
            && header.is_success()
            && header.progress >= 1.0;
        Ok(current)
    }

    fn spawn_heartbeat(&self, job_id: String) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let worker_id = self.config.worker_id.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = queue.heartbeat(&job_id, &worker_id).await {
                    warn!("heartbeat failed for job {job_id}: {err}");
                    break;
                }
            }
        })
    }

    async fn fan_out(&self, job: &JobRecord, content: &[u8], compute: &dyn StepCompute) -> anyhow::Result<()> {
        for &successor in self.graph.successors(job.kind) {
            let spec = self.graph.get(successor)?;
            match spec.input_scope {
                InputScope::Dataset => {
                    self.enqueue(successor, &job.dataset, None, None, job).await?;
                }
                InputScope::Config => {
                    if job.kind == StepKind::DatasetConfigNames {
                        for config in self.produced_configs(content) {
                            self.enqueue(successor, &job.dataset, Some(config), None, job).await?;
                        }
                    } else if let Some(config) = &job.config {
                        self.enqueue(successor, &job.dataset, Some(config.clone()), None, job).await?;
                    }
                }
                InputScope::Split => {
                    if let Some(config) = &job.config {
                        let split_keys = compute.new_split_keys(content);
                        if !split_keys.is_empty() {
                            for (cfg, split) in split_keys {
                                self.enqueue(successor, &job.dataset, Some(cfg), Some(split), job).await?;
                            }
                        } else {
                            for split in self.known_splits(&job.dataset, config).await? {
                                self.enqueue(successor, &job.dataset, Some(config.clone()), Some(split), job).await?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        kind: StepKind,
        dataset: &str,
        config: Option<String>,
        split: Option<String>,
        parent: &JobRecord,
    ) -> anyhow::Result<()> {
        let difficulty = self.graph.bonus_difficulty(kind, None);
        self.queue
            .upsert(kind, dataset, config, split, &parent.revision, parent.priority, difficulty as i64)
            .await?;
        Ok(())
    }

    fn produced_configs(&self, content: &[u8]) -> Vec<String> {
        match serde_json::from_slice::<ConfigNamesContent>(content) {
            Ok(parsed) => parsed.config_names.into_iter().map(|item| item.config).collect(),
            Err(err) => {
                warn!("failed to parse config_names content: {err}");
                Vec::new()
            }
        }
    }

    async fn known_splits(&self, dataset: &str, config: &str) -> anyhow::Result<Vec<String>> {
        const SPLIT_NAME_KINDS: &[StepKind] =
            &[StepKind::ConfigSplitNamesFromInfo, StepKind::ConfigSplitNamesFromStreaming];

        let header = self.cache.best(SPLIT_NAME_KINDS, dataset, Some(config), None).await?;
        if !header.is_success() {
            return Ok(Vec::new());
        }
        let Some(entry) = self.cache.get(header.kind, dataset, Some(config), None).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<SplitNamesContent>(&entry.content) {
            Ok(parsed) => Ok(parsed.split_names.into_iter().map(|item| item.split).collect()),
            Err(err) => {
                warn!("failed to parse split_names content: {err}");
                Ok(Vec::new())
            }
        }
    }
}
