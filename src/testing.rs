//! Fakes and fixtures shared by unit tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use crate::git::{GitError, Vcs};
use crate::host::{CodeHost, HostAction, HostError, OfflineHost, PullRequestDraft, PullRequestInfo};
use crate::issue::Issue;
use crate::llm::{GenerationParams, LlmError, TextGenerator};
use crate::validation::{CommandRunner, ValidationError, ValidationOutcome};

pub fn sample_issue(id: u64, title: &str, body: &str) -> Issue {
    Issue {
        id,
        title: title.to_string(),
        body: body.to_string(),
        labels: Vec::new(),
        author: "alice".to_string(),
    }
}

/// Write `files` (relative path, content) into a fresh temporary directory.
pub fn write_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    dir
}

/// Replies with canned responses in order; errors once they run out.
pub struct ScriptedGenerator {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<String>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or(LlmError::Api {
                status: 500,
                message: "no scripted response left".to_string(),
            })
    }
}

#[derive(Debug, Default)]
struct VcsState {
    current: String,
    /// Commit shas per local branch, oldest first
    branches: BTreeMap<String, Vec<String>>,
    /// How many of a branch's commits it inherited when it was created
    forked_at: BTreeMap<String, usize>,
    staged: Vec<String>,
    /// Paths per commit sha
    committed: BTreeMap<String, Vec<String>>,
    /// Remote branch heads
    remote: BTreeMap<String, String>,
    resets: Vec<String>,
    next_sha: usize,
}

/// In-memory [`Vcs`]. Tracks refs only; it never touches files.
pub struct FakeVcs {
    state: Mutex<VcsState>,
    fail_push: bool,
}

impl FakeVcs {
    /// Branches start with a single root commit; the first is checked out.
    pub fn new(branches: &[&str]) -> Self {
        let state = VcsState {
            current: branches.first().map(|b| b.to_string()).unwrap_or_default(),
            branches: branches
                .iter()
                .map(|b| (b.to_string(), vec![format!("root-{}", b)]))
                .collect(),
            forked_at: branches.iter().map(|b| (b.to_string(), 1)).collect(),
            ..VcsState::default()
        };
        Self {
            state: Mutex::new(state),
            fail_push: false,
        }
    }

    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    /// Publish the current heads of `branches` to the remote.
    pub fn with_remote(self, branches: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for branch in branches {
                let head = state.branches.get(*branch).and_then(|c| c.last().cloned());
                if let Some(head) = head {
                    state.remote.insert(branch.to_string(), head);
                }
            }
        }
        self
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.keys().cloned().collect()
    }

    /// Commits made on `branch` itself, not inherited from where it forked.
    pub fn commits(&self, branch: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let fork = state.forked_at.get(branch).copied().unwrap_or(0);
        state
            .branches
            .get(branch)
            .map(|c| c.iter().skip(fork).cloned().collect())
            .unwrap_or_default()
    }

    /// Paths that went into commit `sha`.
    pub fn committed_paths(&self, sha: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(sha)
            .cloned()
            .unwrap_or_default()
    }

    pub fn staged(&self) -> Vec<String> {
        self.state.lock().unwrap().staged.clone()
    }

    /// Branches present on the remote.
    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().unwrap().remote.keys().cloned().collect()
    }

    pub fn resets(&self) -> Vec<String> {
        self.state.lock().unwrap().resets.clone()
    }
}

fn missing(args: &str) -> GitError {
    GitError::Command {
        args: args.to_string(),
        stderr: "pathspec did not match".to_string(),
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.state.lock().unwrap().current.clone())
    }

    async fn head_sha(&self) -> Result<String, GitError> {
        let state = self.state.lock().unwrap();
        state
            .branches
            .get(&state.current)
            .and_then(|c| c.last().cloned())
            .ok_or_else(|| missing("rev-parse HEAD"))
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, GitError> {
        Ok(self.state.lock().unwrap().branches.contains_key(name))
    }

    async fn checkout(&self, name: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        if !state.branches.contains_key(name) {
            return Err(missing(&format!("checkout {}", name)));
        }
        state.current = name.to_string();
        Ok(())
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        let commits = state
            .branches
            .get(from)
            .cloned()
            .ok_or_else(|| missing(&format!("checkout -b {} {}", name, from)))?;
        state.forked_at.insert(name.to_string(), commits.len());
        state.branches.insert(name.to_string(), commits);
        state.current = name.to_string();
        Ok(())
    }

    async fn stage(&self, paths: &[String]) -> Result<(), GitError> {
        self.state.lock().unwrap().staged.extend(paths.iter().cloned());
        Ok(())
    }

    async fn commit(&self, _message: &str) -> Result<String, GitError> {
        let mut state = self.state.lock().unwrap();
        state.next_sha += 1;
        let sha = format!("c{:07}", state.next_sha);
        let current = state.current.clone();
        state
            .branches
            .get_mut(&current)
            .ok_or_else(|| missing("commit"))?
            .push(sha.clone());
        let paths = std::mem::take(&mut state.staged);
        state.committed.insert(sha.clone(), paths);
        Ok(sha)
    }

    async fn push(&self, _remote: &str, branch: &str) -> Result<(), GitError> {
        if self.fail_push {
            return Err(GitError::Conflict(
                " ! [rejected] (non-fast-forward)".to_string(),
            ));
        }
        let mut state = self.state.lock().unwrap();
        let head = state
            .branches
            .get(branch)
            .and_then(|c| c.last().cloned())
            .ok_or_else(|| missing(&format!("push {}", branch)))?;
        state.remote.insert(branch.to_string(), head);
        Ok(())
    }

    async fn delete_remote_branch(&self, _remote: &str, branch: &str) -> Result<(), GitError> {
        self.state.lock().unwrap().remote.remove(branch);
        Ok(())
    }

    async fn remote_head(&self, _remote: &str, branch: &str) -> Result<Option<String>, GitError> {
        Ok(self.state.lock().unwrap().remote.get(branch).cloned())
    }

    async fn restore_remote_branch(
        &self,
        _remote: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitError> {
        self.state
            .lock()
            .unwrap()
            .remote
            .insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        if state.current == name {
            return Err(GitError::Command {
                args: format!("branch -D {}", name),
                stderr: "cannot delete the branch you are on".to_string(),
            });
        }
        state.branches.remove(name);
        state.forked_at.remove(name);
        Ok(())
    }

    async fn reset_hard(&self, target: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        state.resets.push(target.to_string());
        state.staged.clear();
        let current = state.current.clone();
        if let Some(commits) = state.branches.get_mut(&current) {
            if let Some(pos) = commits.iter().position(|c| c == target) {
                commits.truncate(pos + 1);
            }
        }
        Ok(())
    }
}

/// Passes every command except those listed as failing.
pub struct ScriptedRunner {
    failing: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn passing() -> Self {
        Self::failing(&[])
    }

    pub fn failing(commands: &[&str]) -> Self {
        Self {
            failing: commands.iter().map(|c| c.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &str,
        _cwd: &Path,
        _limit: Duration,
    ) -> Result<ValidationOutcome, ValidationError> {
        self.calls.lock().unwrap().push(command.to_string());
        let failed = self.failing.iter().any(|c| c == command);
        Ok(ValidationOutcome {
            command: command.to_string(),
            exit_code: if failed { 1 } else { 0 },
            stdout: String::new(),
            stderr: if failed {
                "src/App.tsx(3,7): error TS2322: Type 'string' is not assignable to type 'number'."
                    .to_string()
            } else {
                String::new()
            },
            duration_ms: 12,
        })
    }
}

/// Offline host whose pull request creation always fails.
pub struct RejectingHost {
    inner: OfflineHost,
}

impl RejectingHost {
    pub fn new() -> Self {
        Self {
            inner: OfflineHost::new(None),
        }
    }

    pub fn actions(&self) -> Vec<HostAction> {
        self.inner.actions()
    }
}

#[async_trait]
impl CodeHost for RejectingHost {
    async fn fetch_issue(&self, number: u64) -> Result<Issue, HostError> {
        self.inner.fetch_issue(number).await
    }

    async fn post_comment(&self, issue: u64, body: &str) -> Result<(), HostError> {
        self.inner.post_comment(issue, body).await
    }

    async fn add_labels(&self, issue: u64, labels: &[String]) -> Result<(), HostError> {
        self.inner.add_labels(issue, labels).await
    }

    async fn create_pull_request(
        &self,
        _draft: &PullRequestDraft,
    ) -> Result<PullRequestInfo, HostError> {
        Err(HostError::Api {
            status: 422,
            message: "Validation Failed: a pull request already exists".to_string(),
        })
    }
}
