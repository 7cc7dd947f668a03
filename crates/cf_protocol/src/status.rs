//! Job status lifecycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job record.
///
/// `Waiting -> Started` on lease; `Started -> {Success, Error, Skipped}` on commit;
/// `Started -> Waiting` on zombie recovery; `Cancelled` on dataset deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Waiting,
    Started,
    Success,
    Error,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "WAITING",
            JobStatus::Started => "STARTED",
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Skipped => "SKIPPED",
        }
    }

    /// Whether a job in this state counts toward the at-most-one-in-flight invariant.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Waiting | JobStatus::Started)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Error | JobStatus::Cancelled | JobStatus::Skipped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "WAITING" => Ok(JobStatus::Waiting),
            "STARTED" => Ok(JobStatus::Started),
            "SUCCESS" => Ok(JobStatus::Success),
            "ERROR" => Ok(JobStatus::Error),
            "CANCELLED" | "CANCELED" => Ok(JobStatus::Cancelled),
            "SKIPPED" => Ok(JobStatus::Skipped),
            _ => Err(format!("invalid job status: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_set_matches_invariant_1() {
        assert!(JobStatus::Waiting.is_in_flight());
        assert!(JobStatus::Started.is_in_flight());
        assert!(!JobStatus::Success.is_in_flight());
        assert!(!JobStatus::Cancelled.is_in_flight());
    }

    #[test]
    fn terminal_states_are_disjoint_from_in_flight() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Started,
            JobStatus::Success,
            JobStatus::Error,
            JobStatus::Cancelled,
            JobStatus::Skipped,
        ] {
            assert_ne!(status.is_in_flight(), status.is_terminal());
        }
    }
}
