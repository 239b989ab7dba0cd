use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{CodeHost, HostError, PullRequestDraft, PullRequestInfo};
use crate::issue::Issue;
use crate::llm::parse::truncate_str;
use crate::retry::{parse_retry_after, with_retry, RetryPolicy};

/// GitHub REST implementation of [`CodeHost`] for one repository.
pub struct GitHubHost {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    token: String,
    policy: RetryPolicy,
}

#[derive(Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<LabelResponse>,
    user: Option<UserResponse>,
}

#[derive(Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}

#[derive(Serialize)]
struct CreatePull<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
    draft: bool,
}

impl GitHubHost {
    pub fn new(
        api_url: &str,
        owner: &str,
        repo: &str,
        token: String,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
            policy,
        }
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.repo, tail)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("User-Agent", "issue-autofix")
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(&self.token)
    }

    async fn get_issue_once(&self, number: u64) -> Result<Issue, HostError> {
        let response = self
            .request(reqwest::Method::GET, &self.url(&format!("issues/{}", number)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HostError::IssueNotFound(number));
        }
        let parsed: IssueResponse = check_response(response).await?.json().await?;
        Ok(Issue {
            id: parsed.number,
            title: parsed.title,
            body: parsed.body.unwrap_or_default(),
            labels: parsed.labels.into_iter().map(|l| l.name).collect(),
            author: parsed.user.map(|u| u.login).unwrap_or_default(),
        })
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        tail: &str,
        payload: &T,
    ) -> Result<reqwest::Response, HostError> {
        let response = self
            .request(reqwest::Method::POST, &self.url(tail))
            .json(payload)
            .send()
            .await?;
        check_response(response).await
    }
}

/// Map error statuses onto [`HostError`], keeping rate-limit hints.
async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, HostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    if status.as_u16() == 429 || (status.as_u16() == 403 && exhausted) {
        return Err(HostError::RateLimited {
            retry_after: rate_limit_delay(&headers, chrono::Utc::now().timestamp()),
        });
    }
    let text = response.text().await.unwrap_or_default();
    Err(HostError::Api {
        status: status.as_u16(),
        message: truncate_str(&text, 200).to_string(),
    })
}

/// Delay from `Retry-After`, else from the `x-ratelimit-reset` epoch.
pub fn rate_limit_delay(headers: &HeaderMap, now_epoch: i64) -> Option<Duration> {
    if let Some(delay) = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
    {
        return Some(delay);
    }
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    Some(Duration::from_secs(reset.saturating_sub(now_epoch).max(0) as u64))
}

/// Parse `(owner, repo)` from a GitHub remote URL (https or ssh form).
pub fn parse_owner_repo(url: &str) -> Option<(String, String)> {
    let url = url.trim();
    let path = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))?;
        let rest = match rest.find('@') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        rest.strip_prefix("github.com/")?
    };
    let path = path.strip_suffix(".git").unwrap_or(path);
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
        Some((parts[0].to_string(), parts[1].to_string()))
    } else {
        None
    }
}

#[async_trait]
impl CodeHost for GitHubHost {
    #[instrument(skip(self), fields(owner = %self.owner, repo = %self.repo))]
    async fn fetch_issue(&self, number: u64) -> Result<Issue, HostError> {
        let issue = with_retry(&self.policy, "fetch issue", || self.get_issue_once(number)).await?;
        debug!(title = %issue.title, labels = issue.labels.len(), "fetched issue");
        Ok(issue)
    }

    #[instrument(skip(self, body), fields(owner = %self.owner, repo = %self.repo))]
    async fn post_comment(&self, issue: u64, body: &str) -> Result<(), HostError> {
        let payload = serde_json::json!({ "body": body });
        let tail = format!("issues/{}/comments", issue);
        with_retry(&self.policy, "post comment", || self.post_json(&tail, &payload)).await?;
        debug!(chars = body.len(), "posted comment");
        Ok(())
    }

    #[instrument(skip(self), fields(owner = %self.owner, repo = %self.repo))]
    async fn add_labels(&self, issue: u64, labels: &[String]) -> Result<(), HostError> {
        if labels.is_empty() {
            return Ok(());
        }
        let payload = serde_json::json!({ "labels": labels });
        let tail = format!("issues/{}/labels", issue);
        with_retry(&self.policy, "add labels", || self.post_json(&tail, &payload)).await?;
        Ok(())
    }

    #[instrument(skip(self, draft), fields(head = %draft.head, base = %draft.base, draft = draft.draft))]
    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestInfo, HostError> {
        let payload = CreatePull {
            title: &draft.title,
            body: &draft.body,
            head: &draft.head,
            base: &draft.base,
            draft: draft.draft,
        };
        let response =
            with_retry(&self.policy, "create pull request", || self.post_json("pulls", &payload))
                .await?;
        let created: PullResponse = response.json().await?;
        let info = PullRequestInfo {
            number: created.number,
            url: created.html_url,
        };

        self.add_labels(info.number, &draft.labels).await?;
        if !draft.reviewers.is_empty() {
            let payload = serde_json::json!({ "reviewers": draft.reviewers });
            let tail = format!("pulls/{}/requested_reviewers", info.number);
            // Reviewers that are not collaborators are rejected by the API.
            if let Err(e) = self.post_json(&tail, &payload).await {
                warn!(error = %e, "could not request reviewers");
            }
        }
        debug!(number = info.number, url = %info.url, "created pull request");
        Ok(info)
    }
}
