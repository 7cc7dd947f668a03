//! Canonical domain types shared across the Casparian Flow orchestration engine:
//! artifact keys, step kinds, priorities, job status, the error taxonomy, runtime
//! configuration, and small helpers (namespace extraction, metrics rendering) used
//! by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod namespace;
pub mod priority;
pub mod status;
pub mod step_kind;

pub use config::SystemConfig;
pub use error::{ErrorCode, StepError, RETRYABLE_DEFAULT};
pub use key::{ArtifactKey, DispatchKey, Revision};
pub use metrics::{render as render_metrics, Metric};
pub use namespace::namespace_of;
pub use priority::Priority;
pub use status::JobStatus;
pub use step_kind::{Capability, InputScope, ParseStepKindError, StepKind};
