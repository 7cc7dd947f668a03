//! Step kind — the closed enumeration of processing-step identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scope of the artifact a step produces: the dataset as a whole, one config, or one split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputScope {
    Dataset,
    Config,
    Split,
}

impl InputScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputScope::Dataset => "dataset",
            InputScope::Config => "config",
            InputScope::Split => "split",
        }
    }
}

impl fmt::Display for InputScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of processing-step identifiers this orchestrator knows about.
///
/// New step kinds are added here and wired into `cf_graph::PROCESSING_GRAPH`; the set
/// is never extended at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepKind {
    DatasetConfigNames,
    ConfigSplitNamesFromInfo,
    ConfigSplitNamesFromStreaming,
    ConfigParquetAndInfo,
    ConfigParquet,
    ConfigInfo,
    ConfigSize,
    SplitFirstRows,
    SplitDuckdbIndex,
    DatasetIsValid,
    DatasetHubCache,
}

impl StepKind {
    pub const ALL: &'static [StepKind] = &[
        StepKind::DatasetConfigNames,
        StepKind::ConfigSplitNamesFromInfo,
        StepKind::ConfigSplitNamesFromStreaming,
        StepKind::ConfigParquetAndInfo,
        StepKind::ConfigParquet,
        StepKind::ConfigInfo,
        StepKind::ConfigSize,
        StepKind::SplitFirstRows,
        StepKind::SplitDuckdbIndex,
        StepKind::DatasetIsValid,
        StepKind::DatasetHubCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::DatasetConfigNames => "dataset-config-names",
            StepKind::ConfigSplitNamesFromInfo => "config-split-names-from-info",
            StepKind::ConfigSplitNamesFromStreaming => "config-split-names-from-streaming",
            StepKind::ConfigParquetAndInfo => "config-parquet-and-info",
            StepKind::ConfigParquet => "config-parquet",
            StepKind::ConfigInfo => "config-info",
            StepKind::ConfigSize => "config-size",
            StepKind::SplitFirstRows => "split-first-rows",
            StepKind::SplitDuckdbIndex => "split-duckdb-index",
            StepKind::DatasetIsValid => "dataset-is-valid",
            StepKind::DatasetHubCache => "dataset-hub-cache",
        }
    }

    pub fn input_scope(&self) -> InputScope {
        match self {
            StepKind::DatasetConfigNames | StepKind::DatasetIsValid | StepKind::DatasetHubCache => {
                InputScope::Dataset
            }
            StepKind::ConfigSplitNamesFromInfo
            | StepKind::ConfigSplitNamesFromStreaming
            | StepKind::ConfigParquetAndInfo
            | StepKind::ConfigParquet
            | StepKind::ConfigInfo
            | StepKind::ConfigSize => InputScope::Config,
            StepKind::SplitFirstRows | StepKind::SplitDuckdbIndex => InputScope::Split,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStepKindError(String);

impl fmt::Display for ParseStepKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized step kind: '{}'", self.0)
    }
}

impl std::error::Error for ParseStepKindError {}

impl FromStr for StepKind {
    type Err = ParseStepKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseStepKindError(s.to_string()))
    }
}

/// A capability a step may provide, consumed by the planner/API to pick predecessors
/// and by the API read path to decide which endpoints a dataset currently supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    ProvidesConfigSplitNames,
    EnablesPreview,
    EnablesViewer,
    EnablesSearch,
    ProvidesConfigParquetMetadata,
}
