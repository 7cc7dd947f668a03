//! Hub webhook payload: `{event, repo: {type, name, gitalyUid?}, movedTo?}`.

use serde::Deserialize;
use thiserror::Error;

use cf_orchestrator::HubEvent;

#[derive(Debug, Deserialize)]
pub struct WebhookRepo {
    #[serde(rename = "type")]
    pub repo_type: String,
    pub name: String,
    #[serde(rename = "gitalyUid")]
    #[allow(dead_code)]
    pub gitaly_uid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub repo: WebhookRepo,
    #[serde(rename = "movedTo")]
    pub moved_to: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("repo.type must be 'dataset'")]
    NotADataset,
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("'move' event requires movedTo")]
    MissingMovedTo,
}

/// Resolve a webhook payload to the dataset it targets and the orchestrator event to
/// raise for it. `move` targets the new (`movedTo`) name; the old name is carried inside
/// `HubEvent::Moved`.
pub fn to_hub_event(payload: &WebhookPayload) -> Result<(String, HubEvent), WebhookError> {
    if payload.repo.repo_type != "dataset" {
        return Err(WebhookError::NotADataset);
    }
    match payload.event.as_str() {
        "add" => Ok((payload.repo.name.clone(), HubEvent::Created)),
        "update" => Ok((payload.repo.name.clone(), HubEvent::Updated)),
        "remove" | "doesnotexist" => Ok((payload.repo.name.clone(), HubEvent::Deleted)),
        "move" => {
            let moved_to = payload.moved_to.clone().ok_or(WebhookError::MissingMovedTo)?;
            Ok((moved_to, HubEvent::Moved { old_dataset: payload.repo.name.clone() }))
        }
        other => Err(WebhookError::UnknownEvent(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_dataset_repo_is_rejected() {
        let payload = WebhookPayload {
            event: "update".to_string(),
            repo: WebhookRepo { repo_type: "model".to_string(), name: "A".to_string(), gitaly_uid: None },
            moved_to: None,
        };
        assert_eq!(to_hub_event(&payload), Err(WebhookError::NotADataset));
    }

    #[test]
    fn move_without_moved_to_is_rejected() {
        let payload = WebhookPayload {
            event: "move".to_string(),
            repo: WebhookRepo { repo_type: "dataset".to_string(), name: "A".to_string(), gitaly_uid: None },
            moved_to: None,
        };
        assert_eq!(to_hub_event(&payload), Err(WebhookError::MissingMovedTo));
    }

    #[test]
    fn move_targets_the_new_name() {
        let payload = WebhookPayload {
            event: "move".to_string(),
            repo: WebhookRepo { repo_type: "dataset".to_string(), name: "A".to_string(), gitaly_uid: None },
            moved_to: Some("B".to_string()),
        };
        let (dataset, event) = to_hub_event(&payload).unwrap();
        assert_eq!(dataset, "B");
        assert!(matches!(event, HubEvent::Moved { old_dataset } if old_dataset == "A"));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let payload = WebhookPayload {
            event: "explode".to_string(),
            repo: WebhookRepo { repo_type: "dataset".to_string(), name: "A".to_string(), gitaly_uid: None },
            moved_to: None,
        };
        assert!(matches!(to_hub_event(&payload), Err(WebhookError::UnknownEvent(_))));
    }

    #[test]
    fn doesnotexist_event_maps_to_deleted() {
        let payload = WebhookPayload {
            event: "doesnotexist".to_string(),
            repo: WebhookRepo { repo_type: "dataset".to_string(), name: "A".to_string(), gitaly_uid: None },
            moved_to: None,
        };
        let (dataset, event) = to_hub_event(&payload).unwrap();
        assert_eq!(dataset, "A");
        assert!(matches!(event, HubEvent::Deleted));
    }
}
