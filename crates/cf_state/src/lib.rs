//! Dataset state materialization: a pure, in-memory view built by reading the cache and
//! queue stores for one `(dataset, revision)`, plus the `shouldRefresh`/backfill-task
//! derivation over it.
//!
//! Grounded on `libcommon/state.py` (`CacheState.should_be_refreshed`,
//! `StepState.get_backfill_tasks`) from a prior Python implementation of this engine.

use cf_cache::CacheStore;
use cf_graph::ProcessingGraph;
use cf_protocol::{ErrorCode, InputScope, Priority, StepKind};
use cf_queue::QueueStore;
use serde::Deserialize;

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

/// Steps that may produce a config's split list, tried in this preferred order
/// (`cf_cache::CacheStore::best`'s tie-break).
const SPLIT_NAME_KINDS: &[StepKind] = &[StepKind::ConfigSplitNamesFromInfo, StepKind::ConfigSplitNamesFromStreaming];

/// Mirrors `CacheState` in the original: the header-level facts a backfill decision needs.
#[derive(Debug, Clone)]
pub struct CacheState {
    pub exists: bool,
    pub is_success: bool,
    pub revision: Option<String>,
    pub runner_version: i64,
    pub progress: f64,
    pub error_code: Option<ErrorCode>,
}

impl CacheState {
    fn absent() -> Self {
        Self {
            exists: false,
            is_success: false,
            revision: None,
            runner_version: 0,
            progress: 0.0,
            error_code: None,
        }
    }

    fn from_header(header: &cf_cache::CacheHeader) -> Self {
        Self {
            exists: true,
            is_success: header.is_success(),
            revision: Some(header.revision.clone()),
            runner_version: header.job_runner_version,
            progress: header.progress,
            error_code: header.error_code,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobState {
    pub in_process: bool,
}

/// The state of one step for one `(dataset, config?, split?)` input, the unit the
/// backfill derivation operates on.
#[derive(Debug, Clone)]
pub struct StepState {
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
    pub cache_state: CacheState,
    pub job_state: JobState,
}

impl StepState {
    /// True if the cache entry is absent, stale against the current revision/graph
    /// version, a retryable error, or an unfinished fan-in (`progress < 1.0`).
    pub fn should_refresh(&self, current_revision: &str, step_version: u32, retryable: &[ErrorCode]) -> bool {
        if !self.cache_state.exists {
            return true;
        }
        if self.cache_state.revision.as_deref() != Some(current_revision) {
            return true;
        }
        if self.cache_state.runner_version < step_version as i64 {
            return true;
        }
        if let Some(code) = self.cache_state.error_code {
            if retryable.contains(&code) {
                return true;
            }
        }
        self.cache_state.progress < 1.0
    }

    /// A single-element backfill task list if this step should be refreshed and has no
    /// job already in flight, mirroring `StepState.get_backfill_tasks`.
    pub fn backfill_tasks(&self, current_revision: &str, step_version: u32, retryable: &[ErrorCode]) -> Vec<BackfillTask> {
        if self.should_refresh(current_revision, step_version, retryable) && !self.job_state.in_process {
            vec![BackfillTask {
                kind: self.kind,
                dataset: self.dataset.clone(),
                config: self.config.clone(),
                split: self.split.clone(),
                priority: Priority::Low,
            }]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigState {
    pub name: String,
    pub splits: Vec<String>,
    /// Step states for every config-scoped step applying to this config.
    pub config_step_states: Vec<StepState>,
    /// Step states for every split-scoped step applying to each of this config's splits.
    pub split_step_states: Vec<StepState>,
}

/// Materialized view of one dataset at one revision: known configs, their known splits,
/// and a `StepState` for every (step, key) pair the graph defines over them.
#[derive(Debug, Clone)]
pub struct DatasetState {
    pub dataset: String,
    pub revision: String,
    pub configs: Vec<ConfigState>,
    pub dataset_step_states: Vec<StepState>,
}

#[derive(Debug, Clone)]
pub struct BackfillTask {
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
    pub priority: Priority,
}

/// Builds a [`DatasetState`] by reading the cache and queue stores; never mutates them.
pub struct DatasetStateBuilder<'a> {
    pub graph: &'a ProcessingGraph,
    pub cache: &'a CacheStore,
    pub queue: &'a QueueStore,
}

impl<'a> DatasetStateBuilder<'a> {
    pub fn new(graph: &'a ProcessingGraph, cache: &'a CacheStore, queue: &'a QueueStore) -> Self {
        Self { graph, cache, queue }
    }

    pub async fn build(&self, dataset: &str, revision: &str) -> anyhow::Result<DatasetState> {
        let config_names = self.fetch_config_names(dataset).await?;

        let mut configs = Vec::with_capacity(config_names.len());
        for config in &config_names {
            let splits = self.fetch_split_names(dataset, config).await?;

            let mut config_step_states = Vec::new();
            for &kind in self.graph.steps_for(InputScope::Config) {
                config_step_states.push(self.step_state(dataset, kind, Some(config.clone()), None).await?);
            }

            let mut split_step_states = Vec::new();
            for split in &splits {
                for &kind in self.graph.steps_for(InputScope::Split) {
                    split_step_states.push(
                        self.step_state(dataset, kind, Some(config.clone()), Some(split.clone())).await?,
                    );
                }
            }

            configs.push(ConfigState {
                name: config.clone(),
                splits,
                config_step_states,
                split_step_states,
            });
        }

        let mut dataset_step_states = Vec::new();
        for &kind in self.graph.steps_for(InputScope::Dataset) {
            dataset_step_states.push(self.step_state(dataset, kind, None, None).await?);
        }

        Ok(DatasetState {
            dataset: dataset.to_string(),
            revision: revision.to_string(),
            configs,
            dataset_step_states,
        })
    }

    async fn fetch_config_names(&self, dataset: &str) -> anyhow::Result<Vec<String>> {
        let Some(entry) = self.cache.get(StepKind::DatasetConfigNames, dataset, None, None).await? else {
            return Ok(Vec::new());
        };
        if !entry.is_success() {
            return Ok(Vec::new());
        }
        match serde_json::from_slice::<ConfigNamesContent>(&entry.content) {
            Ok(content) => Ok(content.config_names.into_iter().map(|c| c.config).collect()),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn fetch_split_names(&self, dataset: &str, config: &str) -> anyhow::Result<Vec<String>> {
        let best = self.cache.best(SPLIT_NAME_KINDS, dataset, Some(config), None).await?;
        if !best.is_success() {
            return Ok(Vec::new());
        }
        let Some(entry) = self.cache.get(best.kind, dataset, Some(config), None).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<SplitNamesContent>(&entry.content) {
            Ok(content) => Ok(content.split_names.into_iter().map(|s| s.split).collect()),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn step_state(
        &self,
        dataset: &str,
        kind: StepKind,
        config: Option<String>,
        split: Option<String>,
    ) -> anyhow::Result<StepState> {
        let header = self
            .cache
            .get_without_content(kind, dataset, config.as_deref(), split.as_deref())
            .await?;
        let cache_state = header.as_ref().map(CacheState::from_header).unwrap_or_else(CacheState::absent);

        let in_process = self
            .queue
            .counts_in_flight_for_key(kind, dataset, config.as_deref(), split.as_deref())
            .await?;

        Ok(StepState {
            kind,
            dataset: dataset.to_string(),
            config,
            split,
            cache_state,
            job_state: JobState { in_process },
        })
    }
}

/// Every step state across `state`, independent of scope.
fn all_step_states(state: &DatasetState) -> Vec<&StepState> {
    let mut all: Vec<&StepState> = state.dataset_step_states.iter().collect();
    for config in &state.configs {
        all.extend(config.config_step_states.iter());
        all.extend(config.split_step_states.iter());
    }
    all
}

/// For each step state where `should_refresh` holds and no job is already in flight,
/// a `BackfillTask` at LOW priority, mirroring `get_backfill_tasks` in the original.
pub fn backfill_tasks(state: &DatasetState, graph: &ProcessingGraph, retryable: &[ErrorCode]) -> Vec<BackfillTask> {
    let mut tasks = Vec::new();
    for step_state in all_step_states(state) {
        let Ok(spec) = graph.get(step_state.kind) else {
            continue;
        };
        tasks.extend(step_state.backfill_tasks(&state.revision, spec.version, retryable));
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_protocol::RETRYABLE_DEFAULT;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (ProcessingGraph, CacheStore, QueueStore) {
        let graph = ProcessingGraph::new().unwrap();
        let cache_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let cache = CacheStore::new(cache_pool);
        cache.init().await.unwrap();
        let queue_pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let queue = QueueStore::new(queue_pool);
        queue.init().await.unwrap();
        (graph, cache, queue)
    }

    #[tokio::test]
    async fn empty_store_yields_empty_configs_and_missing_dataset_step_states() {
        let (graph, cache, queue) = setup().await;
        let builder = DatasetStateBuilder::new(&graph, &cache, &queue);
        let state = builder.build("squad", "r1").await.unwrap();
        assert!(state.configs.is_empty());
        assert!(state.dataset_step_states.iter().all(|s| !s.cache_state.exists));
    }

    #[tokio::test]
    async fn missing_entry_should_be_refreshed() {
        let (graph, cache, queue) = setup().await;
        let builder = DatasetStateBuilder::new(&graph, &cache, &queue);
        let state = builder.build("squad", "r1").await.unwrap();
        let tasks = backfill_tasks(&state, &graph, RETRYABLE_DEFAULT);
        assert!(tasks.iter().any(|t| t.kind == StepKind::DatasetConfigNames));
    }

    #[tokio::test]
    async fn up_to_date_success_entry_does_not_need_refresh() {
        let (graph, cache, queue) = setup().await;
        cache
            .upsert(
                StepKind::DatasetConfigNames,
                "squad",
                None,
                None,
                "r1",
                br#"{"config_names":[]}"#.to_vec(),
                200,
                None,
                None,
                1.0,
                1,
            )
            .await
            .unwrap();

        let builder = DatasetStateBuilder::new(&graph, &cache, &queue);
        let state = builder.build("squad", "r1").await.unwrap();
        let tasks = backfill_tasks(&state, &graph, RETRYABLE_DEFAULT);
        assert!(!tasks.iter().any(|t| t.kind == StepKind::DatasetConfigNames));
    }

    #[tokio::test]
    async fn stale_revision_triggers_refresh() {
        let (graph, cache, queue) = setup().await;
        cache
            .upsert(
                StepKind::DatasetConfigNames,
                "squad",
                None,
                None,
                "r1",
                br#"{"config_names":[]}"#.to_vec(),
                200,
                None,
                None,
                1.0,
                1,
            )
            .await
            .unwrap();

        let builder = DatasetStateBuilder::new(&graph, &cache, &queue);
        let state = builder.build("squad", "r2").await.unwrap();
        let tasks = backfill_tasks(&state, &graph, RETRYABLE_DEFAULT);
        assert!(tasks.iter().any(|t| t.kind == StepKind::DatasetConfigNames));
    }

    #[tokio::test]
    async fn in_process_step_is_not_rebackfilled() {
        let (graph, cache, queue) = setup().await;
        queue
            .upsert(StepKind::DatasetConfigNames, "squad", None, None, "r1", Priority::Normal, 20)
            .await
            .unwrap();

        let builder = DatasetStateBuilder::new(&graph, &cache, &queue);
        let state = builder.build("squad", "r1").await.unwrap();
        let tasks = backfill_tasks(&state, &graph, RETRYABLE_DEFAULT);
        assert!(!tasks.iter().any(|t| t.kind == StepKind::DatasetConfigNames));
    }

    #[tokio::test]
    async fn known_configs_and_splits_are_parsed_from_cache_content() {
        let (graph, cache, queue) = setup().await;
        cache
            .upsert(
                StepKind::DatasetConfigNames,
                "squad",
                None,
                None,
                "r1",
                br#"{"config_names":[{"config":"plain_text"}]}"#.to_vec(),
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
                Some("plain_text".into()),
                None,
                "r1",
                br#"{"split_names":[{"split":"train"},{"split":"validation"}]}"#.to_vec(),
                200,
                None,
                None,
                1.0,
                1,
            )
            .await
            .unwrap();

        let builder = DatasetStateBuilder::new(&graph, &cache, &queue);
        let state = builder.build("squad", "r1").await.unwrap();
        assert_eq!(state.configs.len(), 1);
        assert_eq!(state.configs[0].name, "plain_text");
        assert_eq!(state.configs[0].splits, vec!["train".to_string(), "validation".to_string()]);
    }
}
