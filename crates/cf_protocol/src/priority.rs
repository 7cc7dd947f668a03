//! Job priority.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Job priority. Higher wins in the queue's `startOne` selection.
///
/// Priority may be raised (e.g. LOW -> NORMAL during an API on-demand backfill) but is
/// never lowered; see `cf_queue::QueueStore::upsert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
        }
    }

    /// Raise `self` to at least `other`, never lowering it.
    pub fn raised_to(self, other: Priority) -> Priority {
        self.max(other)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "NORMAL" => Ok(Priority::Normal),
            "HIGH" => Ok(Priority::High),
            _ => Err(format!("invalid priority: '{}'", s)),
        }
    }
}
