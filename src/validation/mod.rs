//! Post-edit checks: lint, type-check and build commands run against the
//! working copy. Test suites are never run here.

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::ValidationConfig;
use crate::source::is_typed_file;
use crate::triage::RiskLevel;

/// Output kept per stream when attaching outputs to errors and reports.
const MAX_CAPTURED_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("`{command}` exited with code {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        /// Every command run so far, the failing one last
        outputs: Vec<ValidationOutcome>,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },
}

impl ValidationError {
    pub fn outputs(&self) -> &[ValidationOutcome] {
        match self {
            ValidationError::CommandFailed { outputs, .. } => outputs,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Lint,
    TypeCheck,
    Build,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckKind::Lint => write!(f, "lint"),
            CheckKind::TypeCheck => write!(f, "type-check"),
            CheckKind::Build => write!(f, "build"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one shell command in the working copy.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        limit: Duration,
    ) -> Result<ValidationOutcome, ValidationError>;
}

/// Runs commands through `sh -c`.
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        limit: Duration,
    ) -> Result<ValidationOutcome, ValidationError> {
        let started = Instant::now();
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ValidationError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ValidationError::Spawn {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ValidationError::Timeout {
                    command: command.to_string(),
                    after: limit,
                })
            }
        };

        Ok(ValidationOutcome {
            command: command.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: tail(&String::from_utf8_lossy(&output.stdout)),
            stderr: tail(&String::from_utf8_lossy(&output.stderr)),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Keep the end of long output; compiler errors usually sit there.
fn tail(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_CAPTURED_CHARS {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - MAX_CAPTURED_CHARS).collect();
    format!("[... {} chars omitted]\n{}", count - MAX_CAPTURED_CHARS, skipped)
}

pub struct ValidationRunner<'a> {
    config: &'a ValidationConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> ValidationRunner<'a> {
    pub fn new(config: &'a ValidationConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Commands to run for a change touching `paths` at risk `level`.
    pub fn plan(&self, paths: &[String], level: RiskLevel) -> Vec<(CheckKind, String)> {
        let mut checks = Vec::new();
        if let Some(lint) = configured(&self.config.lint) {
            checks.push((CheckKind::Lint, lint));
        }
        if paths.iter().any(|p| is_typed_file(p)) {
            if let Some(type_check) = configured(&self.config.type_check) {
                checks.push((CheckKind::TypeCheck, type_check));
            }
        }
        if level >= RiskLevel::Medium {
            if let Some(build) = configured(&self.config.build) {
                checks.push((CheckKind::Build, build));
            }
        }
        checks
    }

    /// Run the planned commands in order, stopping at the first failure.
    #[instrument(skip_all, fields(files = paths.len(), risk = %level))]
    pub async fn run(
        &self,
        cwd: &Path,
        paths: &[String],
        level: RiskLevel,
    ) -> Result<Vec<ValidationOutcome>, ValidationError> {
        let checks = self.plan(paths, level);
        if checks.is_empty() {
            info!("no validation commands configured for this change");
            return Ok(Vec::new());
        }

        let mut outputs = Vec::with_capacity(checks.len());
        for (kind, command) in checks {
            debug!(%kind, %command, "running validation command");
            let outcome = self.runner.run(&command, cwd, self.config.timeout()).await?;
            let passed = outcome.passed();
            let exit_code = outcome.exit_code;
            info!(%kind, exit_code, duration_ms = outcome.duration_ms, "validation command finished");
            outputs.push(outcome);
            if !passed {
                warn!(%kind, %command, exit_code, "validation failed");
                return Err(ValidationError::CommandFailed {
                    command,
                    exit_code,
                    outputs,
                });
            }
        }
        Ok(outputs)
    }
}

fn configured(command: &Option<String>) -> Option<String> {
    command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Answers each command with a fixed exit code and records the call order.
    struct FakeRunner {
        failing: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(failing: Option<&'static str>) -> Self {
            Self {
                failing,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            command: &str,
            _cwd: &Path,
            _limit: Duration,
        ) -> Result<ValidationOutcome, ValidationError> {
            self.calls.lock().unwrap().push(command.to_string());
            let exit_code = if self.failing == Some(command) { 2 } else { 0 };
            Ok(ValidationOutcome {
                command: command.to_string(),
                exit_code,
                stdout: String::new(),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "error TS2322".to_string()
                },
                duration_ms: 5,
            })
        }
    }

    fn config() -> ValidationConfig {
        ValidationConfig {
            lint: Some("npm run lint".to_string()),
            type_check: Some("npx tsc --noEmit".to_string()),
            build: Some("npm run build".to_string()),
            ..ValidationConfig::default()
        }
    }

    #[test]
    fn test_plan_selects_by_file_type_and_risk() {
        let config = config();
        let runner = FakeRunner::new(None);
        let validation = ValidationRunner::new(&config, &runner);

        let docs = validation.plan(&["README.md".to_string()], RiskLevel::Low);
        assert_eq!(docs, vec![(CheckKind::Lint, "npm run lint".to_string())]);

        let typed = validation.plan(&["src/App.tsx".to_string()], RiskLevel::Low);
        assert_eq!(typed.len(), 2);
        assert_eq!(typed[1].0, CheckKind::TypeCheck);

        let medium = validation.plan(&["src/App.tsx".to_string()], RiskLevel::Medium);
        assert_eq!(
            medium.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec![CheckKind::Lint, CheckKind::TypeCheck, CheckKind::Build]
        );
    }

    #[test]
    fn test_unconfigured_commands_are_skipped() {
        let config = ValidationConfig {
            lint: Some("  ".to_string()),
            ..ValidationConfig::default()
        };
        let runner = FakeRunner::new(None);
        let validation = ValidationRunner::new(&config, &runner);
        assert!(validation
            .plan(&["src/a.ts".to_string()], RiskLevel::High)
            .is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_aborts_with_outputs() {
        let config = config();
        let runner = FakeRunner::new(Some("npx tsc --noEmit"));
        let validation = ValidationRunner::new(&config, &runner);
        let err = validation
            .run(Path::new("."), &["src/App.tsx".to_string()], RiskLevel::High)
            .await
            .unwrap_err();

        match &err {
            ValidationError::CommandFailed {
                command, exit_code, ..
            } => {
                assert_eq!(command, "npx tsc --noEmit");
                assert_eq!(*exit_code, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.outputs().len(), 2);
        assert!(err.outputs()[1].stderr.contains("TS2322"));
        // build never ran
        assert_eq!(runner.calls(), vec!["npm run lint", "npx tsc --noEmit"]);
    }

    #[tokio::test]
    async fn test_all_passing_returns_outcomes() {
        let config = config();
        let runner = FakeRunner::new(None);
        let validation = ValidationRunner::new(&config, &runner);
        let outputs = validation
            .run(Path::new("."), &["README.md".to_string()], RiskLevel::Low)
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].passed());
    }

    #[tokio::test]
    async fn test_shell_runner_captures_exit_code_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ShellRunner
            .run("echo out; echo err >&2; exit 3", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_shell_runner_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellRunner
            .run("sleep 5", dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Timeout { .. }));
    }

    #[test]
    fn test_tail_keeps_end_of_output() {
        let long = format!("{}END", "x".repeat(MAX_CAPTURED_CHARS + 10));
        let kept = tail(&long);
        assert!(kept.starts_with("[... 13 chars omitted]"));
        assert!(kept.ends_with("END"));
    }
}
