//! The step runtime contract: `preCompute`/`compute`/`postCompute`, the size guard, and
//! the parallel-step short-circuit. Grounded on the outer/inner split of
//! `casparian_worker/worker.rs`'s `execute_job`/`execute_job_inner` (catch, map to a
//! receipt, log), adapted from a job-receipt shape to a cache outcome shape.

use async_trait::async_trait;
use cf_cache::CacheStore;
use cf_protocol::{ErrorCode, StepError, StepKind};

#[derive(Debug, Clone)]
pub struct JobParams {
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
    pub revision: String,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub content: Vec<u8>,
    /// `1.0` once complete; lower while a fan-in entry is still waiting on inputs.
    pub progress: f64,
}

impl JobResult {
    pub fn complete(content: Vec<u8>) -> Self {
        Self { content, progress: 1.0 }
    }
}

/// Read-only handle to collaborators a step's `compute` may consult (currently just the
/// cache, for `best(...)` predecessor lookups).
pub struct StepContext<'a> {
    pub cache: &'a CacheStore,
}

/// A step's computation contract. Individual step computations (parsing parquet, running
/// search-index SQL, extracting statistics) are pluggable implementations of this trait;
/// this crate only defines the seam and the runtime that drives it.
#[async_trait]
pub trait StepCompute: Send + Sync {
    /// Version stamped on every cache entry this step produces.
    fn job_runner_version(&self) -> u32;

    /// The step kind, if any, whose output is interchangeable with this one's (§4.6).
    fn parallel_step(&self) -> Option<StepKind> {
        None
    }

    /// Optional resource acquisition; implementers are responsible for releasing any
    /// resource they acquire here on every exit path.
    async fn pre_compute(&self, _params: &JobParams) -> Result<(), StepError> {
        Ok(())
    }

    async fn compute(&self, ctx: &StepContext<'_>, params: &JobParams) -> Result<JobResult, StepError>;

    /// Always invoked, even when `pre_compute` or `compute` failed.
    async fn post_compute(&self, _params: &JobParams) {}

    /// For dataset/config-scoped steps that discover splits: the `(config, split)` pairs
    /// the given output content names. Split-scoped steps never need this.
    fn new_split_keys(&self, _content: &[u8]) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Outcome of driving a `StepCompute` through the runtime, ready for `cache.upsert`.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub content: Vec<u8>,
    pub http_status: u16,
    pub error_code: Option<ErrorCode>,
    pub progress: f64,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }

    fn from_result(result: Result<JobResult, StepError>) -> Self {
        match result {
            Ok(job_result) => Self {
                content: job_result.content,
                http_status: 200,
                error_code: None,
                progress: job_result.progress,
            },
            Err(err) => Self {
                content: err.message.clone().into_bytes(),
                http_status: err.http_status(),
                error_code: Some(err.code),
                progress: 0.0,
            },
        }
    }

    fn already_computed() -> Self {
        Self {
            content: Vec::new(),
            http_status: 200,
            error_code: Some(ErrorCode::ResponseAlreadyComputedError),
            progress: 1.0,
        }
    }

    fn too_big() -> Self {
        Self {
            content: Vec::new(),
            http_status: ErrorCode::TooBigContent.http_status(),
            error_code: Some(ErrorCode::TooBigContent),
            progress: 0.0,
        }
    }
}

/// Builds a [`StepError`] that propagates a failed predecessor's error code verbatim,
/// the mechanism behind `CachedArtifactError` in the original: a step that depends on an
/// unsuccessful predecessor fails with the predecessor's own code rather than inventing
/// a new one.
pub fn propagate_predecessor_error(predecessor_kind: StepKind, predecessor: &cf_cache::CacheHeader) -> StepError {
    let code = predecessor.error_code.unwrap_or(ErrorCode::Unexpected);
    StepError::new(code, format!("predecessor step {predecessor_kind} did not succeed"))
}

/// Drives `preCompute` -> parallel short-circuit check -> `compute` -> size guard ->
/// `postCompute` (always) for one job, returning the outcome to commit to the cache.
pub async fn run_step(
    compute: &dyn StepCompute,
    ctx: &StepContext<'_>,
    params: &JobParams,
    content_max_bytes: u64,
) -> StepOutcome {
    let outcome = run_step_inner(compute, ctx, params, content_max_bytes).await;
    compute.post_compute(params).await;
    outcome
}

async fn run_step_inner(
    compute: &dyn StepCompute,
    ctx: &StepContext<'_>,
    params: &JobParams,
    content_max_bytes: u64,
) -> StepOutcome {
    if let Err(err) = compute.pre_compute(params).await {
        return StepOutcome::from_result(Err(err));
    }

    if let Some(parallel_kind) = compute.parallel_step() {
        if let Ok(Some(header)) = ctx
            .cache
            .get_without_content(parallel_kind, &params.dataset, params.config.as_deref(), params.split.as_deref())
            .await
        {
            if header.is_success()
                && header.revision == params.revision
                && header.job_runner_version >= compute.job_runner_version() as i64
            {
                return StepOutcome::already_computed();
            }
        }
    }

    let result = compute.compute(ctx, params).await;
    let outcome = StepOutcome::from_result(result);

    if outcome.is_success() && outcome.content.len() as u64 > content_max_bytes {
        return StepOutcome::too_big();
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    struct AlwaysSucceeds;

    #[async_trait]
    impl StepCompute for AlwaysSucceeds {
        fn job_runner_version(&self) -> u32 {
            1
        }

        async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
            Ok(JobResult::complete(b"ok".to_vec()))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl StepCompute for AlwaysFails {
        fn job_runner_version(&self) -> u32 {
            1
        }

        async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
            Err(StepError::new(ErrorCode::ClientConnectionError, "boom"))
        }
    }

    struct HasParallel;

    #[async_trait]
    impl StepCompute for HasParallel {
        fn job_runner_version(&self) -> u32 {
            3
        }

        fn parallel_step(&self) -> Option<StepKind> {
            Some(StepKind::ConfigSplitNamesFromInfo)
        }

        async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
            panic!("heavy compute should have been short-circuited");
        }
    }

    async fn setup_cache() -> CacheStore {
        let pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let cache = CacheStore::new(pool);
        cache.init().await.unwrap();
        cache
    }

    fn params(kind: StepKind) -> JobParams {
        JobParams {
            kind,
            dataset: "squad".to_string(),
            config: Some("plain_text".to_string()),
            split: None,
            revision: "r1".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_compute_yields_ok_outcome() {
        let cache = setup_cache().await;
        let ctx = StepContext { cache: &cache };
        let outcome = run_step(&AlwaysSucceeds, &ctx, &params(StepKind::ConfigSplitNamesFromStreaming), 1_000).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.content, b"ok");
    }

    #[tokio::test]
    async fn failed_compute_maps_error_code_and_status() {
        let cache = setup_cache().await;
        let ctx = StepContext { cache: &cache };
        let outcome = run_step(&AlwaysFails, &ctx, &params(StepKind::ConfigSplitNamesFromStreaming), 1_000).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_code, Some(ErrorCode::ClientConnectionError));
    }

    #[tokio::test]
    async fn oversized_content_becomes_too_big_content() {
        let cache = setup_cache().await;
        let ctx = StepContext { cache: &cache };
        let outcome = run_step(&AlwaysSucceeds, &ctx, &params(StepKind::ConfigSplitNamesFromStreaming), 1).await;
        assert_eq!(outcome.error_code, Some(ErrorCode::TooBigContent));
    }

    #[tokio::test]
    async fn parallel_step_already_succeeded_short_circuits() {
        let cache = setup_cache().await;
        cache
            .upsert(
                StepKind::ConfigSplitNamesFromInfo,
                "squad",
                Some("plain_text".into()),
                None,
                "r1",
                b"already there".to_vec(),
                200,
                None,
                None,
                1.0,
                3,
            )
            .await
            .unwrap();

        let ctx = StepContext { cache: &cache };
        let outcome = run_step(&HasParallel, &ctx, &params(StepKind::ConfigSplitNamesFromStreaming), 1_000).await;
        assert_eq!(outcome.error_code, Some(ErrorCode::ResponseAlreadyComputedError));
    }

    #[test]
    fn propagated_error_copies_predecessor_code() {
        let header = cf_cache::CacheHeader {
            kind: StepKind::DatasetConfigNames,
            dataset: "squad".to_string(),
            config: None,
            split: None,
            revision: "r1".to_string(),
            http_status: 500,
            error_code: Some(ErrorCode::ClientConnectionError),
            progress: 0.0,
            job_runner_version: 1,
            attempts: 1,
        };
        let err = propagate_predecessor_error(StepKind::DatasetConfigNames, &header);
        assert_eq!(err.code, ErrorCode::ClientConnectionError);
    }
}
