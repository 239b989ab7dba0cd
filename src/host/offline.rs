use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

use super::{CodeHost, HostError, PullRequestDraft, PullRequestInfo};
use crate::issue::Issue;

/// Something the pipeline asked the host to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HostAction {
    Comment { issue: u64, body: String },
    Labels { issue: u64, labels: Vec<String> },
    PullRequest { draft: PullRequestDraft, number: u64 },
}

/// Host that records every outgoing action instead of calling GitHub.
/// Used for `--offline` and `--mock` runs; the report prints the record.
pub struct OfflineHost {
    issue: Option<Issue>,
    actions: Mutex<Vec<HostAction>>,
}

impl OfflineHost {
    pub fn new(issue: Option<Issue>) -> Self {
        Self {
            issue,
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn actions(&self) -> Vec<HostAction> {
        self.actions
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn record(&self, action: HostAction) {
        if let Ok(mut guard) = self.actions.lock() {
            guard.push(action);
        }
    }

    fn pull_request_count(&self) -> u64 {
        self.actions
            .lock()
            .map(|guard| {
                guard
                    .iter()
                    .filter(|a| matches!(a, HostAction::PullRequest { .. }))
                    .count() as u64
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl CodeHost for OfflineHost {
    async fn fetch_issue(&self, number: u64) -> Result<Issue, HostError> {
        match &self.issue {
            Some(issue) if issue.id == number => Ok(issue.clone()),
            _ => Err(HostError::IssueNotFound(number)),
        }
    }

    async fn post_comment(&self, issue: u64, body: &str) -> Result<(), HostError> {
        info!(issue, chars = body.len(), "recording comment");
        self.record(HostAction::Comment {
            issue,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn add_labels(&self, issue: u64, labels: &[String]) -> Result<(), HostError> {
        info!(issue, ?labels, "recording labels");
        self.record(HostAction::Labels {
            issue,
            labels: labels.to_vec(),
        });
        Ok(())
    }

    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestInfo, HostError> {
        let number = self.pull_request_count() + 1;
        info!(head = %draft.head, draft = draft.draft, "recording pull request");
        self.record(HostAction::PullRequest {
            draft: draft.clone(),
            number,
        });
        Ok(PullRequestInfo {
            number,
            url: format!("offline://pull/{}", number),
        })
    }
}
