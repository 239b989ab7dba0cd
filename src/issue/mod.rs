pub mod types;

pub use types::{Issue, IssueUrl};

use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Invalid issue URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to read issue file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse issue file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where the issue for a run comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueSource {
    Url(IssueUrl),
    File(std::path::PathBuf),
}

/// Interpret a CLI argument as either a GitHub issue URL or a JSON file path.
pub fn parse_source(arg: &str) -> Result<IssueSource, IssueError> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        return parse_issue_url(arg).map(IssueSource::Url);
    }
    Ok(IssueSource::File(arg.into()))
}

/// Parse a GitHub issue URL into its component parts.
/// Expected format: https://github.com/{owner}/{repo}/issues/{number}
pub fn parse_issue_url(url: &str) -> Result<IssueUrl, IssueError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| IssueError::InvalidUrl(url.to_string()))?;

    if parsed.host_str() != Some("github.com") {
        return Err(IssueError::InvalidUrl(url.to_string()));
    }

    let segments: Vec<_> = parsed
        .path_segments()
        .ok_or_else(|| IssueError::InvalidUrl(url.to_string()))?
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.len() != 4 || segments[2] != "issues" {
        return Err(IssueError::InvalidUrl(url.to_string()));
    }

    let number = segments[3]
        .parse::<u64>()
        .map_err(|_| IssueError::InvalidUrl(url.to_string()))?;

    Ok(IssueUrl {
        owner: segments[0].to_string(),
        repo: segments[1].to_string(),
        number,
    })
}

/// Load an issue from a JSON document (`{id|number, title, body, labels, author}`).
pub fn load_issue_file(path: &Path) -> Result<Issue, IssueError> {
    let contents = std::fs::read_to_string(path)?;
    let issue: Issue = serde_json::from_str(&contents)?;
    debug!(issue = issue.id, path = %path.display(), "loaded issue from file");
    Ok(issue)
}
