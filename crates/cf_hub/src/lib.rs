//! The hub HTTP client is an external collaborator this engine does not implement
//! (revision lookup, gate/permission check). This crate defines the seam it plugs
//! into and a deterministic in-memory stub for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubLookup {
    /// The dataset exists at this revision.
    Found { revision: String },
    /// The dataset exists but requires authorization this caller does not hold.
    Gated,
    /// No such dataset.
    NotFound,
}

/// Seam for hub revision/gate lookups. Implementations talk to the hub's HTTP API;
/// this crate ships only [`StubHubClient`], a deterministic in-memory stand-in.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn lookup(&self, dataset: &str) -> anyhow::Result<HubLookup>;

    /// Known byte size of the dataset on the hub, if any, used for the graph's bonus
    /// difficulty calculation. `None` means unknown.
    async fn dataset_size_bytes(&self, dataset: &str) -> anyhow::Result<Option<u64>>;
}

/// A deterministic, in-memory stand-in for the hub, keyed by dataset name.
#[derive(Default)]
pub struct StubHubClient {
    datasets: Mutex<HashMap<String, (String, Option<u64>)>>,
    gated: Mutex<Vec<String>>,
}

impl StubHubClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(self, dataset: impl Into<String>, revision: impl Into<String>) -> Self {
        self.datasets.lock().unwrap().insert(dataset.into(), (revision.into(), None));
        self
    }

    pub fn with_dataset_size(self, dataset: impl Into<String>, revision: impl Into<String>, size_bytes: u64) -> Self {
        self.datasets
            .lock()
            .unwrap()
            .insert(dataset.into(), (revision.into(), Some(size_bytes)));
        self
    }

    pub fn with_gated(self, dataset: impl Into<String>) -> Self {
        self.gated.lock().unwrap().push(dataset.into());
        self
    }

    /// Simulates a hub-side update by rewriting a dataset's current revision.
    pub fn set_revision(&self, dataset: &str, revision: impl Into<String>) {
        if let Some(entry) = self.datasets.lock().unwrap().get_mut(dataset) {
            entry.0 = revision.into();
        }
    }
}

#[async_trait]
impl HubClient for StubHubClient {
    async fn lookup(&self, dataset: &str) -> anyhow::Result<HubLookup> {
        if self.gated.lock().unwrap().iter().any(|d| d == dataset) {
            return Ok(HubLookup::Gated);
        }
        match self.datasets.lock().unwrap().get(dataset) {
            Some((revision, _)) => Ok(HubLookup::Found { revision: revision.clone() }),
            None => Ok(HubLookup::NotFound),
        }
    }

    async fn dataset_size_bytes(&self, dataset: &str) -> anyhow::Result<Option<u64>> {
        Ok(self.datasets.lock().unwrap().get(dataset).and_then(|(_, size)| *size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_dataset_is_not_found() {
        let hub = StubHubClient::new();
        assert_eq!(hub.lookup("nope").await.unwrap(), HubLookup::NotFound);
    }

    #[tokio::test]
    async fn known_dataset_reports_its_revision() {
        let hub = StubHubClient::new().with_dataset("squad", "r1");
        assert_eq!(hub.lookup("squad").await.unwrap(), HubLookup::Found { revision: "r1".to_string() });
    }

    #[tokio::test]
    async fn gated_dataset_reports_gated_even_if_known() {
        let hub = StubHubClient::new().with_dataset("private/ds", "r1").with_gated("private/ds");
        assert_eq!(hub.lookup("private/ds").await.unwrap(), HubLookup::Gated);
    }

    #[tokio::test]
    async fn set_revision_simulates_a_hub_update() {
        let hub = StubHubClient::new().with_dataset("squad", "r1");
        hub.set_revision("squad", "r2");
        assert_eq!(hub.lookup("squad").await.unwrap(), HubLookup::Found { revision: "r2".to_string() });
    }

    #[tokio::test]
    async fn dataset_size_is_reported_when_configured() {
        let hub = StubHubClient::new().with_dataset_size("big", "r1", 5_000_000_000);
        assert_eq!(hub.dataset_size_bytes("big").await.unwrap(), Some(5_000_000_000));
        assert_eq!(hub.dataset_size_bytes("unknown").await.unwrap(), None);
    }
}
