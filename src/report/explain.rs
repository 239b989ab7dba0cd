use serde::Serialize;
use std::error::Error;

use crate::changes::ApplyError;
use crate::errors::{ErrorCode, PipelineError};
use crate::git::RollbackReport;
use crate::validation::ValidationError;

/// Longest stderr excerpt quoted per failed command.
const DETAIL_EXCERPT_CHARS: usize = 800;

/// Human-facing cause and next step for a failure code.
pub fn explain(code: ErrorCode) -> (&'static str, &'static str) {
    match code {
        ErrorCode::ConfigError => (
            "The run is misconfigured or its inputs could not be read.",
            "Check `.autofix.toml`, the GitHub token and the model API key, then re-run.",
        ),
        ErrorCode::GithubRateLimit => (
            "GitHub rate-limited the run and retries were exhausted.",
            "Wait for the rate limit window to reset, or use a token with a higher quota.",
        ),
        ErrorCode::GithubTimeout => (
            "GitHub did not answer in time, even after retries.",
            "Re-run later; if it persists raise `pipeline.call_timeout_secs`.",
        ),
        ErrorCode::GithubApiError => (
            "GitHub rejected a request.",
            "Check the token's permissions on the repository and the details below.",
        ),
        ErrorCode::AiRateLimit => (
            "The text-generation service rate-limited the run and retries were exhausted.",
            "Re-run once the provider quota resets.",
        ),
        ErrorCode::AiTimeout => (
            "The text-generation service did not answer in time.",
            "Re-run later, or lower `llm.max_output_tokens`.",
        ),
        ErrorCode::AiApiError => (
            "The text-generation service returned an error.",
            "Check the model name, API URL and key in the configuration.",
        ),
        ErrorCode::GitError => (
            "A git operation failed.",
            "Make sure the working copy is clean and the remote is reachable.",
        ),
        ErrorCode::GitConflict => (
            "The fix conflicts with the current state of the branch or remote.",
            "Rebase or delete the issue branch, then re-run.",
        ),
        ErrorCode::ValidationFailed => (
            "The proposed change did not pass validation.",
            "Review the command output below; add detail to the issue or fix it by hand.",
        ),
        ErrorCode::SecurityViolation => (
            "The change touches security-sensitive files or content.",
            "A maintainer must make this change manually.",
        ),
        ErrorCode::ArchitectureViolation => (
            "The proposed change breaks the project's architecture rules.",
            "Describe where the change belongs in the issue, or make it by hand.",
        ),
        ErrorCode::InvalidAiOutput => (
            "The generated plan could not be understood.",
            "Re-run; if it keeps failing, restate the issue with a concrete expected result.",
        ),
        ErrorCode::NoFilesFound => (
            "No files relevant to the issue could be identified.",
            "Specify exact file paths in the issue body.",
        ),
        ErrorCode::SearchNotFound => (
            "The generated edit targets text that is not in the file.",
            "Quote the exact text to change in the issue and re-run.",
        ),
        ErrorCode::InvalidLine => (
            "The generated edit points at a line outside the file.",
            "Re-run, or name the file and the surrounding code in the issue.",
        ),
        ErrorCode::NoStrategy => (
            "The generated edit did not say how to change the file.",
            "Re-run; the plan was malformed.",
        ),
        ErrorCode::Timeout => (
            "The run exceeded its time limit.",
            "Re-run, or raise `pipeline.run_deadline_secs` for large repositories.",
        ),
    }
}

/// A surfaced failure, ready for the issue comment and artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    pub cause: String,
    pub remediation: String,
    pub details: Vec<String>,
    /// None when nothing needed undoing
    pub rollback: Option<RollbackReport>,
}

impl ErrorReport {
    pub fn new(error: &PipelineError, rollback: Option<RollbackReport>) -> Self {
        let code = error.code();
        let (cause, remediation) = explain(code);
        Self {
            code,
            message: error.to_string(),
            cause: cause.to_string(),
            remediation: remediation.to_string(),
            details: details(error),
            rollback,
        }
    }

    pub fn with_details(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.details.extend(extra);
        self
    }
}

fn details(error: &PipelineError) -> Vec<String> {
    match error {
        PipelineError::Validation(ValidationError::CommandFailed { outputs, .. }) => outputs
            .iter()
            .map(|o| {
                let stream = if o.stderr.trim().is_empty() {
                    &o.stdout
                } else {
                    &o.stderr
                };
                format!(
                    "`{}` exited {} after {}ms: {}",
                    o.command,
                    o.exit_code,
                    o.duration_ms,
                    excerpt(stream.trim())
                )
            })
            .collect(),
        PipelineError::Apply(ApplyError::SuspectedHallucination { path, reason }) => vec![
            format!("{}: {}", path, reason),
            "Use search_replace, insert or patch edits instead of rewriting the whole file."
                .to_string(),
        ],
        _ => {
            let mut chain = Vec::new();
            let mut source = error.source();
            while let Some(cause) = source {
                let text = cause.to_string();
                if !error.to_string().contains(&text) {
                    chain.push(text);
                }
                source = cause.source();
            }
            chain
        }
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= DETAIL_EXCERPT_CHARS {
        return text.to_string();
    }
    let start = text.chars().count() - DETAIL_EXCERPT_CHARS;
    format!("...{}", text.chars().skip(start).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationOutcome;

    #[test]
    fn test_every_code_has_an_explanation() {
        let codes = [
            ErrorCode::ConfigError,
            ErrorCode::GithubRateLimit,
            ErrorCode::GithubTimeout,
            ErrorCode::GithubApiError,
            ErrorCode::AiRateLimit,
            ErrorCode::AiTimeout,
            ErrorCode::AiApiError,
            ErrorCode::GitError,
            ErrorCode::GitConflict,
            ErrorCode::ValidationFailed,
            ErrorCode::SecurityViolation,
            ErrorCode::ArchitectureViolation,
            ErrorCode::InvalidAiOutput,
            ErrorCode::NoFilesFound,
            ErrorCode::SearchNotFound,
            ErrorCode::InvalidLine,
            ErrorCode::NoStrategy,
            ErrorCode::Timeout,
        ];
        for code in codes {
            let (cause, remediation) = explain(code);
            assert!(!cause.is_empty() && !remediation.is_empty(), "{code}");
        }
        assert!(explain(ErrorCode::NoFilesFound).1.contains("exact file paths"));
    }

    #[test]
    fn test_validation_failure_details_quote_output() {
        let error = PipelineError::from(ValidationError::CommandFailed {
            command: "npx tsc".to_string(),
            exit_code: 2,
            outputs: vec![ValidationOutcome {
                command: "npx tsc".to_string(),
                exit_code: 2,
                stdout: String::new(),
                stderr: "error TS2322\n".to_string(),
                duration_ms: 40,
            }],
        });
        let report = ErrorReport::new(&error, Some(RollbackReport::default()));
        assert_eq!(report.code, ErrorCode::ValidationFailed);
        assert_eq!(report.details, vec!["`npx tsc` exited 2 after 40ms: error TS2322"]);
        assert!(report.rollback.is_some());
    }

    #[test]
    fn test_excerpt_keeps_the_end() {
        let long = format!("{}tail", "a".repeat(DETAIL_EXCERPT_CHARS));
        let cut = excerpt(&long);
        assert!(cut.starts_with("..."));
        assert!(cut.ends_with("tail"));
        assert_eq!(cut.chars().count(), DETAIL_EXCERPT_CHARS + 3);
    }
}
