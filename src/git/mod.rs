//! Branch, commit and push for a fix, and rollback when anything after
//! branch creation fails.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::errors::ErrorCode;
use crate::issue::Issue;
use crate::triage::Classification;

/// Longest slug kept in a branch name.
const BRANCH_SLUG_LEN: usize = 40;
const SUBJECT_MAX_CHARS: usize = 72;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("git reported a conflict: {0}")]
    Conflict(String),

    #[error("git {args} timed out after {after:?}")]
    Timeout { args: String, after: Duration },

    #[error("Failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GitError::Conflict(_) => ErrorCode::GitConflict,
            GitError::Timeout { .. } => ErrorCode::Timeout,
            GitError::Command { .. } | GitError::Io(_) => ErrorCode::GitError,
        }
    }
}

/// Version-control operations a run needs.
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn current_branch(&self) -> Result<String, GitError>;

    async fn head_sha(&self) -> Result<String, GitError>;

    async fn branch_exists(&self, name: &str) -> Result<bool, GitError>;

    async fn checkout(&self, name: &str) -> Result<(), GitError>;

    /// Create `name` from `from` and switch to it.
    async fn create_branch(&self, name: &str, from: &str) -> Result<(), GitError>;

    async fn stage(&self, paths: &[String]) -> Result<(), GitError>;

    /// Commit staged changes and return the new commit's sha.
    async fn commit(&self, message: &str) -> Result<String, GitError>;

    async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError>;

    async fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Head of `branch` on `remote`, or None when the remote lacks it.
    async fn remote_head(&self, remote: &str, branch: &str) -> Result<Option<String>, GitError>;

    /// Move `branch` on `remote` back to `sha`, refusing if someone else
    /// pushed to it in the meantime.
    async fn restore_remote_branch(
        &self,
        remote: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitError>;

    async fn delete_branch(&self, name: &str) -> Result<(), GitError>;

    /// Discard tracked changes and move the current branch to `target`.
    async fn reset_hard(&self, target: &str) -> Result<(), GitError>;
}

/// [`Vcs`] backed by the `git` binary.
pub struct GitCli {
    root: PathBuf,
    call_timeout: Duration,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>, call_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            call_timeout,
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        let joined = args.join(" ");
        debug!(args = %joined, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = match timeout(self.call_timeout, output).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GitError::Timeout {
                    args: joined,
                    after: self.call_timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout);
            if is_conflict(&stderr) || is_conflict(&stdout) {
                return Err(GitError::Conflict(stderr));
            }
            return Err(GitError::Command {
                args: joined,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn is_conflict(output: &str) -> bool {
    output.contains("CONFLICT")
        || output.contains("Merge conflict")
        || output.contains("needs merge")
        || output.contains("non-fast-forward")
        || output.contains("[rejected]")
}

#[async_trait]
impl Vcs for GitCli {
    async fn current_branch(&self) -> Result<String, GitError> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn head_sha(&self) -> Result<String, GitError> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, GitError> {
        let reference = format!("refs/heads/{}", name);
        match self
            .git(&["show-ref", "--verify", "--quiet", &reference])
            .await
        {
            Ok(_) => Ok(true),
            Err(GitError::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn checkout(&self, name: &str) -> Result<(), GitError> {
        self.git(&["checkout", name]).await.map(|_| ())
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<(), GitError> {
        self.git(&["checkout", "-b", name, from]).await.map(|_| ())
    }

    async fn stage(&self, paths: &[String]) -> Result<(), GitError> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git(&args).await.map(|_| ())
    }

    async fn commit(&self, message: &str) -> Result<String, GitError> {
        self.git(&["commit", "-m", message]).await?;
        self.head_sha().await
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.git(&["push", "-u", remote, branch]).await.map(|_| ())
    }

    async fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.git(&["push", remote, "--delete", branch])
            .await
            .map(|_| ())
    }

    async fn remote_head(&self, remote: &str, branch: &str) -> Result<Option<String>, GitError> {
        let refname = format!("refs/heads/{}", branch);
        let out = self.git(&["ls-remote", "--heads", remote, &refname]).await?;
        Ok(out
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .find(|(_, name)| *name == refname)
            .map(|(sha, _)| sha.to_string()))
    }

    async fn restore_remote_branch(
        &self,
        remote: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitError> {
        let refspec = format!("{}:refs/heads/{}", sha, branch);
        self.git(&["push", "--force-with-lease", remote, &refspec])
            .await
            .map(|_| ())
    }

    async fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        self.git(&["branch", "-D", name]).await.map(|_| ())
    }

    async fn reset_hard(&self, target: &str) -> Result<(), GitError> {
        self.git(&["reset", "--hard", target]).await.map(|_| ())
    }
}

/// Convert a title to a branch-safe slug of at most `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Conventional commit message: `type: subject (#id)`.
pub fn commit_message(classification: Classification, message: &str, issue_id: u64) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let subject = strip_conventional_prefix(first_line);
    let subject = if subject.is_empty() {
        "apply automated fix"
    } else {
        subject
    };
    let subject: String = if subject.chars().count() > SUBJECT_MAX_CHARS {
        subject.chars().take(SUBJECT_MAX_CHARS).collect::<String>().trim_end().to_string()
    } else {
        subject.to_string()
    };
    format!("{}: {} (#{})", classification.commit_type(), subject, issue_id)
}

/// `fix(ui): thing` and `docs: thing` become `thing`.
fn strip_conventional_prefix(line: &str) -> &str {
    let Some((head, rest)) = line.split_once(':') else {
        return line;
    };
    let kind = head.split('(').next().unwrap_or(head).trim_end_matches('!');
    let known = [
        "fix", "feat", "docs", "chore", "refactor", "style", "test", "perf", "build", "ci",
    ];
    if known.contains(&kind.trim()) {
        rest.trim()
    } else {
        line
    }
}

/// The branch a run works on and the state to roll back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchLease {
    pub name: String,
    /// False when the branch already existed and the run continued on it
    pub created: bool,
    /// Branch head when the run took it over
    pub base_sha: String,
    /// Remote head when the run took the branch over; None when the remote
    /// did not have it or pushing is disabled
    pub remote_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub branch: String,
    pub message: String,
    pub files_changed: Vec<String>,
    pub sha: String,
    pub pushed: bool,
}

/// What a rollback managed to undo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub steps: Vec<String>,
    pub failures: Vec<String>,
}

impl RollbackReport {
    pub fn clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn absorb(&mut self, other: RollbackReport) {
        self.steps.extend(other.steps);
        self.failures.extend(other.failures);
    }

    fn record(&mut self, step: String, result: Result<(), GitError>) {
        match result {
            Ok(()) => self.steps.push(step),
            Err(e) => {
                warn!(%step, error = %e, "rollback step failed");
                self.failures.push(format!("{}: {}", step, e));
            }
        }
    }
}

pub struct CommitPipeline<'a> {
    vcs: &'a dyn Vcs,
    config: &'a PipelineConfig,
}

impl<'a> CommitPipeline<'a> {
    pub fn new(vcs: &'a dyn Vcs, config: &'a PipelineConfig) -> Self {
        Self { vcs, config }
    }

    /// `{prefix}/issue-{id}-{slug}`
    pub fn branch_name(&self, issue: &Issue) -> String {
        let slug = slugify(&issue.title, BRANCH_SLUG_LEN);
        if slug.is_empty() {
            format!("{}/issue-{}", self.config.branch_prefix, issue.id)
        } else {
            format!("{}/issue-{}-{}", self.config.branch_prefix, issue.id, slug)
        }
    }

    /// Check out the issue branch, creating it from the default branch when
    /// it does not exist yet.
    #[instrument(skip(self))]
    pub async fn acquire_branch(&self, name: &str) -> Result<BranchLease, GitError> {
        let created = if self.vcs.branch_exists(name).await? {
            info!("continuing on existing branch");
            if self.vcs.current_branch().await? != name {
                self.vcs.checkout(name).await?;
            }
            false
        } else {
            info!(from = %self.config.default_branch, "creating branch");
            self.vcs
                .create_branch(name, &self.config.default_branch)
                .await?;
            true
        };
        let base_sha = self.vcs.head_sha().await?;
        let remote_sha = if self.config.push {
            self.vcs.remote_head(&self.config.remote, name).await?
        } else {
            None
        };
        Ok(BranchLease {
            name: name.to_string(),
            created,
            base_sha,
            remote_sha,
        })
    }

    /// Stage exactly `paths`, commit, and push when pushing is enabled.
    #[instrument(skip_all, fields(branch = %lease.name, files = paths.len()))]
    pub async fn commit_and_push(
        &self,
        lease: &BranchLease,
        paths: &[String],
        message: &str,
    ) -> Result<Commit, GitError> {
        self.vcs.stage(paths).await?;
        let sha = self.vcs.commit(message).await?;
        info!(%sha, "committed");

        let pushed = if self.config.push {
            self.vcs.push(&self.config.remote, &lease.name).await?;
            info!(remote = %self.config.remote, "pushed");
            true
        } else {
            info!("push disabled, leaving commit local");
            false
        };

        Ok(Commit {
            branch: lease.name.clone(),
            message: message.to_string(),
            files_changed: paths.to_vec(),
            sha,
            pushed,
        })
    }

    /// Undo this run's push: move the remote branch back to where the run
    /// found it, or delete it when the run published it.
    pub async fn retract_push(&self, lease: &BranchLease) -> RollbackReport {
        let mut report = RollbackReport::default();
        if !self.config.push {
            return report;
        }
        let remote = &self.config.remote;
        match &lease.remote_sha {
            Some(sha) => {
                let result = self
                    .vcs
                    .restore_remote_branch(remote, &lease.name, sha)
                    .await;
                report.record(
                    format!("restored {}/{} to {}", remote, lease.name, short_sha(sha)),
                    result,
                );
            }
            None => {
                let result = self.vcs.delete_remote_branch(remote, &lease.name).await;
                report.record(format!("deleted {}/{}", remote, lease.name), result);
            }
        }
        report
    }

    /// Hard-reset the working tree and return to the default branch. Every
    /// step is attempted even when an earlier one fails.
    #[instrument(skip_all)]
    pub async fn rollback(&self, lease: Option<&BranchLease>) -> RollbackReport {
        let mut report = RollbackReport::default();
        let target = lease.map(|l| l.base_sha.as_str()).unwrap_or("HEAD");
        let result = self.vcs.reset_hard(target).await;
        report.record(format!("reset working tree to {}", short_sha(target)), result);

        let result = self.vcs.checkout(&self.config.default_branch).await;
        report.record(format!("checked out {}", self.config.default_branch), result);

        if let Some(lease) = lease.filter(|l| l.created) {
            let result = self.vcs.delete_branch(&lease.name).await;
            report.record(format!("deleted local branch {}", lease.name), result);
        }
        info!(steps = report.steps.len(), failures = report.failures.len(), "rollback finished");
        report
    }
}

fn short_sha(sha: &str) -> &str {
    if sha.len() > 12 && sha.chars().all(|c| c.is_ascii_hexdigit()) {
        &sha[..12]
    } else {
        sha
    }
}
