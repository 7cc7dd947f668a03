//! A deterministic, in-memory `StepRegistry` for the eleven processing-graph step
//! kinds. Individual step computations (parsing parquet, running search-index SQL,
//! talking to the hub) are pluggable pure functions this crate only defines the seam
//! for; this module is the same kind of stand-in [`cf_hub::StubHubClient`] is for the
//! hub client, useful to exercise the worker loop end to end before a real
//! implementation of a given step is plugged in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cf_protocol::{StepError, StepKind};
use serde::{Deserialize, Serialize};
use serde_json::json;

use cf_step::{JobParams, JobResult, StepCompute, StepContext};

use crate::StepRegistry;

#[derive(Serialize, Deserialize)]
struct SplitNamesStub {
    config: String,
    split_names: Vec<SplitNameStub>,
}

#[derive(Serialize, Deserialize)]
struct SplitNameStub {
    split: String,
}

struct DatasetConfigNamesStub;

#[async_trait]
impl StepCompute for DatasetConfigNamesStub {
    fn job_runner_version(&self) -> u32 {
        1
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(json!({"config_names": [{"config": "default"}]}).to_string().into_bytes()))
    }
}

/// Shared by both `config-split-names-from-info` and `config-split-names-from-streaming`:
/// same stub content, differing only in which kind the worker registers them under and
/// which one declares the other as its `parallel_step`.
struct ConfigSplitNamesStub {
    parallel: StepKind,
    version: u32,
}

#[async_trait]
impl StepCompute for ConfigSplitNamesStub {
    fn job_runner_version(&self) -> u32 {
        self.version
    }

    fn parallel_step(&self) -> Option<StepKind> {
        Some(self.parallel)
    }

    async fn compute(&self, _ctx: &StepContext<'_>, params: &JobParams) -> Result<JobResult, StepError> {
        let config = params.config.clone().unwrap_or_default();
        let content = SplitNamesStub { config, split_names: vec![SplitNameStub { split: "train".to_string() }] };
        Ok(JobResult::complete(serde_json::to_vec(&content).expect("stub content always serializes")))
    }

    fn new_split_keys(&self, content: &[u8]) -> Vec<(String, String)> {
        let Ok(parsed) = serde_json::from_slice::<SplitNamesStub>(content) else {
            return Vec::new();
        };
        parsed.split_names.into_iter().map(|item| (parsed.config.clone(), item.split)).collect()
    }
}

struct ConfigParquetAndInfoStub;

#[async_trait]
impl StepCompute for ConfigParquetAndInfoStub {
    fn job_runner_version(&self) -> u32 {
        2
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(json!({"num_bytes_parquet_files": 0}).to_string().into_bytes()))
    }
}

struct ConfigParquetStub;

#[async_trait]
impl StepCompute for ConfigParquetStub {
    fn job_runner_version(&self) -> u32 {
        4
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(json!({"parquet_files": []}).to_string().into_bytes()))
    }
}

struct ConfigInfoStub;

#[async_trait]
impl StepCompute for ConfigInfoStub {
    fn job_runner_version(&self) -> u32 {
        2
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(json!({"dataset_info": {}}).to_string().into_bytes()))
    }
}

struct ConfigSizeStub;

#[async_trait]
impl StepCompute for ConfigSizeStub {
    fn job_runner_version(&self) -> u32 {
        2
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(json!({"num_rows": 0, "num_bytes": 0}).to_string().into_bytes()))
    }
}

struct SplitFirstRowsStub;

#[async_trait]
impl StepCompute for SplitFirstRowsStub {
    fn job_runner_version(&self) -> u32 {
        3
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(json!({"features": [], "rows": []}).to_string().into_bytes()))
    }
}

struct SplitDuckdbIndexStub;

#[async_trait]
impl StepCompute for SplitDuckdbIndexStub {
    fn job_runner_version(&self) -> u32 {
        2
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(json!({"rows": []}).to_string().into_bytes()))
    }
}

struct DatasetIsValidStub;

#[async_trait]
impl StepCompute for DatasetIsValidStub {
    fn job_runner_version(&self) -> u32 {
        2
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(
            json!({"valid": true, "preview": true, "viewer": true, "search": true}).to_string().into_bytes(),
        ))
    }
}

struct DatasetHubCacheStub;

#[async_trait]
impl StepCompute for DatasetHubCacheStub {
    fn job_runner_version(&self) -> u32 {
        2
    }

    async fn compute(&self, _ctx: &StepContext<'_>, _params: &JobParams) -> Result<JobResult, StepError> {
        Ok(JobResult::complete(b"{}".to_vec()))
    }
}

/// Builds a registry covering every step kind with a deterministic placeholder
/// computation, so `cf-worker` has something to run out of the box.
pub fn stub_registry() -> StepRegistry {
    let mut registry: StepRegistry = HashMap::new();
    registry.insert(StepKind::DatasetConfigNames, Arc::new(DatasetConfigNamesStub));
    registry.insert(
        StepKind::ConfigSplitNamesFromInfo,
        Arc::new(ConfigSplitNamesStub { parallel: StepKind::ConfigSplitNamesFromStreaming, version: 3 }),
    );
    registry.insert(
        StepKind::ConfigSplitNamesFromStreaming,
        Arc::new(ConfigSplitNamesStub { parallel: StepKind::ConfigSplitNamesFromInfo, version: 3 }),
    );
    registry.insert(StepKind::ConfigParquetAndInfo, Arc::new(ConfigParquetAndInfoStub));
    registry.insert(StepKind::ConfigParquet, Arc::new(ConfigParquetStub));
    registry.insert(StepKind::ConfigInfo, Arc::new(ConfigInfoStub));
    registry.insert(StepKind::ConfigSize, Arc::new(ConfigSizeStub));
    registry.insert(StepKind::SplitFirstRows, Arc::new(SplitFirstRowsStub));
    registry.insert(StepKind::SplitDuckdbIndex, Arc::new(SplitDuckdbIndexStub));
    registry.insert(StepKind::DatasetIsValid, Arc::new(DatasetIsValidStub));
    registry.insert(StepKind::DatasetHubCache, Arc::new(DatasetHubCacheStub));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_every_step_kind() {
        let registry = stub_registry();
        for &kind in StepKind::ALL {
            assert!(registry.contains_key(&kind), "missing stub for {kind:?}");
        }
    }
}
