//! Artifact key — canonical identifier of a step output.

use std::fmt;

use crate::step_kind::StepKind;

/// The hub commit hash a cache entry or job was produced/queued against.
pub type Revision = String;

/// Tuple identifying a cache entry or a job: `(kind, dataset, config?, split?, revision)`.
///
/// `config` is present iff the step's input scope is `Config` or `Split`; `split` iff `Split`.
/// Equality is structural; ordering is lexicographic on the tuple, which is what makes
/// `ArtifactKey` usable as a BTreeMap key for stable iteration in tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
    pub revision: Revision,
}

impl ArtifactKey {
    pub fn dataset(kind: StepKind, dataset: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            kind,
            dataset: dataset.into(),
            config: None,
            split: None,
            revision: revision.into(),
        }
    }

    pub fn config(
        kind: StepKind,
        dataset: impl Into<String>,
        config: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            dataset: dataset.into(),
            config: Some(config.into()),
            split: None,
            revision: revision.into(),
        }
    }

    pub fn split(
        kind: StepKind,
        dataset: impl Into<String>,
        config: impl Into<String>,
        split: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            dataset: dataset.into(),
            config: Some(config.into()),
            split: Some(split.into()),
            revision: revision.into(),
        }
    }

    /// The key with `revision` cleared, used wherever job identity must ignore revision:
    /// the at-most-one-in-flight rule is keyed on kind/dataset/config/split only.
    pub fn dispatch_key(&self) -> DispatchKey {
        DispatchKey {
            kind: self.kind,
            dataset: self.dataset.clone(),
            config: self.config.clone(),
            split: self.split.clone(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}@{}",
            self.kind.as_str(),
            self.dataset,
            self.config.as_deref().unwrap_or("-"),
            self.split.as_deref().unwrap_or("-"),
            self.revision
        )
    }
}

/// `(kind, dataset, config, split)` without the revision component. This is the identity
/// used by the queue's at-most-one-in-flight rule and by cache lookups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatchKey {
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
}

impl DispatchKey {
    pub fn dataset(kind: StepKind, dataset: impl Into<String>) -> Self {
        Self {
            kind,
            dataset: dataset.into(),
            config: None,
            split: None,
        }
    }

    pub fn config(kind: StepKind, dataset: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            kind,
            dataset: dataset.into(),
            config: Some(config.into()),
            split: None,
        }
    }

    pub fn split(
        kind: StepKind,
        dataset: impl Into<String>,
        config: impl Into<String>,
        split: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            dataset: dataset.into(),
            config: Some(config.into()),
            split: Some(split.into()),
        }
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.kind.as_str(),
            self.dataset,
            self.config.as_deref().unwrap_or("-"),
            self.split.as_deref().unwrap_or("-")
        )
    }
}
