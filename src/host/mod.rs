pub mod github;
pub mod offline;

pub use github::GitHubHost;
pub use offline::{HostAction, OfflineHost};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::issue::Issue;
use crate::retry::RetryableError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("GitHub API rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("GitHub API call timed out after {0:?}")]
    Timeout(Duration),

    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("GitHub API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Issue #{0} not found")]
    IssueNotFound(u64),
}

impl RetryableError for HostError {
    fn is_transient(&self) -> bool {
        match self {
            HostError::RateLimited { .. } | HostError::Timeout(_) => true,
            HostError::Api { status, .. } => *status >= 500,
            HostError::Request(e) => e.is_timeout() || e.is_connect(),
            HostError::IssueNotFound(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HostError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        HostError::Timeout(after)
    }
}

/// Pull request to open for a fixed issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    /// Source branch
    pub head: String,
    /// Target branch
    pub base: String,
    pub draft: bool,
    pub labels: Vec<String>,
    pub reviewers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
}

/// The issue tracker / code host a run reports to.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn fetch_issue(&self, number: u64) -> Result<Issue, HostError>;

    async fn post_comment(&self, issue: u64, body: &str) -> Result<(), HostError>;

    async fn add_labels(&self, issue: u64, labels: &[String]) -> Result<(), HostError>;

    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestInfo, HostError>;
}
