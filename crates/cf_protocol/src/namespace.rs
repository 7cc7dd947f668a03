//! Dataset namespace extraction, used by the queue store's per-namespace fairness cap.

/// The namespace a dataset belongs to: the `owner` in `owner/name`, or the dataset name
/// itself for unnamespaced (canonical) datasets.
pub fn namespace_of(dataset: &str) -> &str {
    match dataset.split_once('/') {
        Some((owner, _name)) => owner,
        None => dataset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_dataset_yields_owner() {
        assert_eq!(namespace_of("bigscience/P3"), "bigscience");
    }

    #[test]
    fn canonical_dataset_is_its_own_namespace() {
        assert_eq!(namespace_of("squad"), "squad");
    }

    #[test]
    fn only_first_slash_counts() {
        assert_eq!(namespace_of("owner/name/extra"), "owner");
    }
}
