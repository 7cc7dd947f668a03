//! The processing graph: step metadata and trigger relations, closed at process start.
//!
//! Grounded on the concrete step table of a prior Python implementation of this
//! orchestration engine (`libcommon/constants.py` step names and versions), reshaped
//! into the closed `StepKind` enumeration from `cf_protocol`.

use std::collections::HashMap;

use cf_protocol::{Capability, InputScope, StepKind};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown step kind: {0:?}")]
    NotFound(StepKind),
    #[error("step {step:?} declares unknown predecessor {predecessor:?}")]
    UnknownPredecessor { step: StepKind, predecessor: StepKind },
    #[error("step {0:?} declares itself as its own predecessor")]
    SelfLoop(StepKind),
}

/// Static metadata for one step kind: scope, declared triggers, version, base difficulty,
/// capability flags, and an optional parallel counterpart (§3.1, §4.6 short-circuit rule).
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub kind: StepKind,
    pub input_scope: InputScope,
    pub triggered_by: &'static [StepKind],
    pub version: u32,
    pub difficulty: u32,
    pub capabilities: &'static [Capability],
    pub parallel_step: Option<StepKind>,
    /// Extra difficulty added when the dataset's known byte size exceeds this threshold.
    pub bonus_above_bytes: Option<(u64, u32)>,
}

use StepKind::*;

const TABLE: &[StepSpec] = &[
    StepSpec {
        kind: DatasetConfigNames,
        input_scope: InputScope::Dataset,
        triggered_by: &[],
        version: 1,
        difficulty: 20,
        capabilities: &[],
        parallel_step: None,
        bonus_above_bytes: None,
    },
    StepSpec {
        kind: ConfigSplitNamesFromInfo,
        input_scope: InputScope::Config,
        triggered_by: &[DatasetConfigNames],
        version: 3,
        difficulty: 20,
        capabilities: &[Capability::ProvidesConfigSplitNames],
        parallel_step: Some(ConfigSplitNamesFromStreaming),
        bonus_above_bytes: None,
    },
    StepSpec {
        kind: ConfigSplitNamesFromStreaming,
        input_scope: InputScope::Config,
        triggered_by: &[DatasetConfigNames],
        version: 3,
        difficulty: 60,
        capabilities: &[Capability::ProvidesConfigSplitNames],
        parallel_step: Some(ConfigSplitNamesFromInfo),
        bonus_above_bytes: None,
    },
    StepSpec {
        kind: ConfigParquetAndInfo,
        input_scope: InputScope::Config,
        triggered_by: &[DatasetConfigNames],
        version: 2,
        difficulty: 50,
        capabilities: &[Capability::ProvidesConfigParquetMetadata],
        parallel_step: None,
        bonus_above_bytes: Some((3_000_000_000, 20)),
    },
    StepSpec {
        kind: ConfigParquet,
        input_scope: InputScope::Config,
        triggered_by: &[ConfigParquetAndInfo],
        version: 4,
        difficulty: 20,
        capabilities: &[],
        parallel_step: None,
        bonus_above_bytes: None,
    },
    StepSpec {
        kind: ConfigInfo,
        input_scope: InputScope::Config,
        triggered_by: &[ConfigParquetAndInfo],
        version: 2,
        difficulty: 20,
        capabilities: &[],
        parallel_step: None,
        bonus_above_bytes: None,
    },
    StepSpec {
        kind: ConfigSize,
        input_scope: InputScope::Config,
        triggered_by: &[ConfigParquetAndInfo],
        version: 2,
        difficulty: 20,
        capabilities: &[],
        parallel_step: None,
        bonus_above_bytes: None,
    },
    StepSpec {
        kind: SplitFirstRows,
        input_scope: InputScope::Split,
        triggered_by: &[ConfigSplitNamesFromInfo, ConfigSplitNamesFromStreaming, ConfigParquetAndInfo],
        version: 3,
        difficulty: 70,
        capabilities: &[Capability::EnablesPreview],
        parallel_step: None,
        bonus_above_bytes: Some((3_000_000_000, 20)),
    },
    StepSpec {
        kind: SplitDuckdbIndex,
        input_scope: InputScope::Split,
        triggered_by: &[ConfigParquetAndInfo],
        version: 2,
        difficulty: 70,
        capabilities: &[Capability::EnablesSearch],
        parallel_step: None,
        bonus_above_bytes: Some((3_000_000_000, 20)),
    },
    StepSpec {
        kind: DatasetIsValid,
        input_scope: InputScope::Dataset,
        triggered_by: &[ConfigSplitNamesFromInfo, ConfigSplitNamesFromStreaming, SplitFirstRows, SplitDuckdbIndex],
        version: 2,
        difficulty: 20,
        capabilities: &[],
        parallel_step: None,
        bonus_above_bytes: None,
    },
    StepSpec {
        kind: DatasetHubCache,
        input_scope: InputScope::Dataset,
        triggered_by: &[DatasetIsValid, ConfigParquetAndInfo],
        version: 2,
        difficulty: 20,
        capabilities: &[Capability::EnablesViewer],
        parallel_step: None,
        bonus_above_bytes: None,
    },
];

/// The closed, immutable processing graph. Built once at process start via [`ProcessingGraph::new`]
/// and never mutated afterward (§3.1 "closed at process start").
pub struct ProcessingGraph {
    specs: HashMap<StepKind, StepSpec>,
    successors: HashMap<StepKind, Vec<StepKind>>,
    by_scope: HashMap<InputScope, Vec<StepKind>>,
    by_capability: HashMap<Capability, Vec<StepKind>>,
    topo_order: Vec<StepKind>,
}

impl ProcessingGraph {
    /// Build the graph from the built-in step table, validating trigger references and
    /// rejecting self-loops.
    pub fn new() -> Result<Self, GraphError> {
        Self::from_table(TABLE)
    }

    fn from_table(table: &[StepSpec]) -> Result<Self, GraphError> {
        let mut specs = HashMap::new();
        for spec in table {
            specs.insert(spec.kind, spec.clone());
        }

        for spec in table {
            for &pred in spec.triggered_by {
                if pred == spec.kind {
                    return Err(GraphError::SelfLoop(spec.kind));
                }
                if !specs.contains_key(&pred) {
                    return Err(GraphError::UnknownPredecessor {
                        step: spec.kind,
                        predecessor: pred,
                    });
                }
            }
        }

        let mut successors: HashMap<StepKind, Vec<StepKind>> = HashMap::new();
        for spec in table {
            successors.entry(spec.kind).or_default();
            for &pred in spec.triggered_by {
                successors.entry(pred).or_default().push(spec.kind);
            }
        }

        let mut by_scope: HashMap<InputScope, Vec<StepKind>> = HashMap::new();
        let mut by_capability: HashMap<Capability, Vec<StepKind>> = HashMap::new();
        for spec in table {
            by_scope.entry(spec.input_scope).or_default().push(spec.kind);
            for &cap in spec.capabilities {
                by_capability.entry(cap).or_default().push(spec.kind);
            }
        }

        let topo_order = topological_order(table)?;

        Ok(Self {
            specs,
            successors,
            by_scope,
            by_capability,
            topo_order,
        })
    }

    pub fn get(&self, kind: StepKind) -> Result<&StepSpec, GraphError> {
        self.specs.get(&kind).ok_or(GraphError::NotFound(kind))
    }

    /// Declared predecessors, in the order given in the step table.
    pub fn predecessors(&self, kind: StepKind) -> &[StepKind] {
        self.specs
            .get(&kind)
            .map(|s| s.triggered_by)
            .unwrap_or(&[])
    }

    /// Steps that declare `kind` as a trigger, in first-seen order.
    pub fn successors(&self, kind: StepKind) -> &[StepKind] {
        self.successors.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn steps_for(&self, scope: InputScope) -> &[StepKind] {
        self.by_scope.get(&scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn steps_providing(&self, capability: Capability) -> &[StepKind] {
        self.by_capability.get(&capability).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A topological order over all steps, used only for diagnostics (planning and fan-out
    /// walk the graph step-by-step and do not require this).
    pub fn topological_order(&self) -> &[StepKind] {
        &self.topo_order
    }

    pub fn parallel_step(&self, kind: StepKind) -> Option<StepKind> {
        self.specs.get(&kind).and_then(|s| s.parallel_step)
    }

    /// Base difficulty plus the bonus this step incurs when `dataset_size_bytes` exceeds
    /// its configured threshold.
    pub fn bonus_difficulty(&self, kind: StepKind, dataset_size_bytes: Option<u64>) -> u32 {
        let Some(spec) = self.specs.get(&kind) else {
            return 0;
        };
        let bonus = match (spec.bonus_above_bytes, dataset_size_bytes) {
            (Some((threshold, bonus)), Some(size)) if size > threshold => bonus,
            _ => 0,
        };
        spec.difficulty + bonus
    }
}

fn topological_order(table: &[StepSpec]) -> Result<Vec<StepKind>, GraphError> {
    let mut order = Vec::with_capacity(table.len());
    let mut visited: HashMap<StepKind, bool> = HashMap::new();

    fn visit(
        kind: StepKind,
        table: &[StepSpec],
        visited: &mut HashMap<StepKind, bool>,
        order: &mut Vec<StepKind>,
    ) {
        if visited.get(&kind).copied().unwrap_or(false) {
            return;
        }
        visited.insert(kind, true);
        if let Some(spec) = table.iter().find(|s| s.kind == kind) {
            for &pred in spec.triggered_by {
                visit(pred, table, visited, order);
            }
        }
        order.push(kind);
    }

    for spec in table {
        visit(spec.kind, table, &mut visited, &mut order);
    }
    Ok(order)
}
