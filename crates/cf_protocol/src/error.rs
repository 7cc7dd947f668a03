//! Error taxonomy, modeled on the `GeneralJobRunnerError` hierarchy of a prior
//! Python implementation of this orchestration engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error code stored alongside a cache entry or returned to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Input
    ParameterMissing,
    InvalidParameter,
    DatasetInBlockList,

    // Auth
    ExternalUnauthenticated,
    ExternalAuthenticated,

    // Availability
    DatasetNotFound,
    ConfigNotFound,
    SplitNotFound,
    ResponseNotFound,
    ResponseNotReady,

    // Transient (retryable by default, see `RETRYABLE_DEFAULT`)
    ClientConnectionError,
    NoGitRevisionError,

    // Capacity
    TooBigContent,
    DatasetTooBigFromHub,
    DatasetTooBigFromDatasets,

    // Internal
    PreviousStepFormatError,
    StatsComputationError,
    JobRunnerCrashedError,
    JobRunnerExceededMaximumDurationError,
    ResponseAlreadyComputedError,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ParameterMissing => "ParameterMissing",
            ErrorCode::InvalidParameter => "InvalidParameter",
            ErrorCode::DatasetInBlockList => "DatasetInBlockList",
            ErrorCode::ExternalUnauthenticated => "ExternalUnauthenticated",
            ErrorCode::ExternalAuthenticated => "ExternalAuthenticated",
            ErrorCode::DatasetNotFound => "DatasetNotFound",
            ErrorCode::ConfigNotFound => "ConfigNotFound",
            ErrorCode::SplitNotFound => "SplitNotFound",
            ErrorCode::ResponseNotFound => "ResponseNotFound",
            ErrorCode::ResponseNotReady => "ResponseNotReady",
            ErrorCode::ClientConnectionError => "ClientConnectionError",
            ErrorCode::NoGitRevisionError => "NoGitRevisionError",
            ErrorCode::TooBigContent => "TooBigContent",
            ErrorCode::DatasetTooBigFromHub => "DatasetTooBigFromHub",
            ErrorCode::DatasetTooBigFromDatasets => "DatasetTooBigFromDatasets",
            ErrorCode::PreviousStepFormatError => "PreviousStepFormatError",
            ErrorCode::StatsComputationError => "StatsComputationError",
            ErrorCode::JobRunnerCrashedError => "JobRunnerCrashedError",
            ErrorCode::JobRunnerExceededMaximumDurationError => "JobRunnerExceededMaximumDurationError",
            ErrorCode::ResponseAlreadyComputedError => "ResponseAlreadyComputedError",
            ErrorCode::Unexpected => "Unexpected",
        }
    }

    /// HTTP status a response carrying this error code is given.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ParameterMissing | ErrorCode::InvalidParameter => 422,
            ErrorCode::DatasetInBlockList => 403,
            ErrorCode::ExternalUnauthenticated => 401,
            ErrorCode::ExternalAuthenticated => 403,
            ErrorCode::DatasetNotFound
            | ErrorCode::ConfigNotFound
            | ErrorCode::SplitNotFound
            | ErrorCode::ResponseNotFound => 404,
            ErrorCode::ResponseNotReady => 500,
            ErrorCode::ClientConnectionError | ErrorCode::NoGitRevisionError => 500,
            ErrorCode::TooBigContent
            | ErrorCode::DatasetTooBigFromHub
            | ErrorCode::DatasetTooBigFromDatasets => 413,
            ErrorCode::PreviousStepFormatError
            | ErrorCode::StatsComputationError
            | ErrorCode::JobRunnerCrashedError
            | ErrorCode::JobRunnerExceededMaximumDurationError
            | ErrorCode::ResponseAlreadyComputedError
            | ErrorCode::Unexpected => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The default retryable-error set. `cf_queue::RetryPolicy` lets callers override this;
/// this is the sane out-of-the-box default.
pub const RETRYABLE_DEFAULT: &[ErrorCode] = &[ErrorCode::ClientConnectionError];

/// Error produced by a step's `compute` (or by the runtime around it). Always maps to a
/// cache entry except for `DatasetNotFound`, which is intentionally not cached to avoid
/// DoS on random dataset names.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct StepError {
    pub code: ErrorCode,
    pub message: String,
    /// Not wired as `#[source]`: `anyhow::Error` does not implement `std::error::Error`.
    pub cause: Option<anyhow::Error>,
}

impl StepError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(code: ErrorCode, message: impl Into<String>, cause: anyhow::Error) -> Self {
        Self {
            code,
            message: message.into(),
            cause: Some(cause),
        }
    }

    /// Map any error a step's compute did not declare into `Unexpected`, preserving the cause.
    pub fn unexpected(cause: anyhow::Error) -> Self {
        Self::with_cause(ErrorCode::Unexpected, cause.to_string(), cause)
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    pub fn should_cache(&self) -> bool {
        self.code != ErrorCode::DatasetNotFound
    }
}
