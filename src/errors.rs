//! Failure taxonomy for a whole run.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::budget::BudgetError;
use crate::changes::ApplyError;
use crate::config::ConfigError;
use crate::git::GitError;
use crate::host::HostError;
use crate::issue::IssueError;
use crate::llm::LlmError;
use crate::prompt::PromptError;
use crate::report::ReportError;
use crate::triage::TriageError;
use crate::validation::ValidationError;

/// Machine-readable failure code attached to every surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigError,
    GithubRateLimit,
    GithubTimeout,
    GithubApiError,
    AiRateLimit,
    AiTimeout,
    AiApiError,
    GitError,
    GitConflict,
    ValidationFailed,
    SecurityViolation,
    ArchitectureViolation,
    InvalidAiOutput,
    NoFilesFound,
    SearchNotFound,
    InvalidLine,
    NoStrategy,
    Timeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::GithubRateLimit => "GITHUB_RATE_LIMIT",
            ErrorCode::GithubTimeout => "GITHUB_TIMEOUT",
            ErrorCode::GithubApiError => "GITHUB_API_ERROR",
            ErrorCode::AiRateLimit => "AI_RATE_LIMIT",
            ErrorCode::AiTimeout => "AI_TIMEOUT",
            ErrorCode::AiApiError => "AI_API_ERROR",
            ErrorCode::GitError => "GIT_ERROR",
            ErrorCode::GitConflict => "GIT_CONFLICT",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::SecurityViolation => "SECURITY_VIOLATION",
            ErrorCode::ArchitectureViolation => "ARCHITECTURE_VIOLATION",
            ErrorCode::InvalidAiOutput => "INVALID_AI_OUTPUT",
            ErrorCode::NoFilesFound => "NO_FILES_FOUND",
            ErrorCode::SearchNotFound => "SEARCH_NOT_FOUND",
            ErrorCode::InvalidLine => "INVALID_LINE",
            ErrorCode::NoStrategy => "NO_STRATEGY",
            ErrorCode::Timeout => "TIMEOUT",
        }
    }

    /// Failures caused by the generated plan rather than by the environment.
    /// A fresh plan may succeed where this one did not.
    pub fn is_plan_defect(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidAiOutput
                | ErrorCode::SearchNotFound
                | ErrorCode::InvalidLine
                | ErrorCode::NoStrategy
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error("Cannot read working copy: {0}")]
    WorkingCopy(#[source] std::io::Error),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Triage(#[from] TriageError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Security gate blocked the change: {0}")]
    SecurityViolation(String),

    #[error("{count} architecture rule(s) violated: {summary}")]
    ArchitectureViolation { count: usize, summary: String },

    #[error("Invalid AI output: {0}")]
    InvalidAiOutput(String),

    #[error("No relevant files found for the issue")]
    NoFilesFound,

    #[error("Run exceeded its {0:?} deadline")]
    Timeout(Duration),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Config(_) | PipelineError::Issue(_) | PipelineError::WorkingCopy(_) => {
                ErrorCode::ConfigError
            }
            PipelineError::Host(e) => host_code(e),
            PipelineError::Llm(e) => llm_code(e),
            PipelineError::Triage(TriageError::InvalidAiOutput(_)) => ErrorCode::InvalidAiOutput,
            PipelineError::Triage(TriageError::Llm(e)) => llm_code(e),
            PipelineError::Budget(_) => ErrorCode::ConfigError,
            PipelineError::Prompt(e) => e.code(),
            PipelineError::Apply(e) => e.code(),
            PipelineError::Validation(_) => ErrorCode::ValidationFailed,
            PipelineError::Git(e) => e.code(),
            PipelineError::Report(_) => ErrorCode::ConfigError,
            PipelineError::SecurityViolation(_) => ErrorCode::SecurityViolation,
            PipelineError::ArchitectureViolation { .. } => ErrorCode::ArchitectureViolation,
            PipelineError::InvalidAiOutput(_) => ErrorCode::InvalidAiOutput,
            PipelineError::NoFilesFound => ErrorCode::NoFilesFound,
            PipelineError::Timeout(_) => ErrorCode::Timeout,
        }
    }

    /// Whether asking the generator for a new plan could get past this.
    pub fn warrants_new_plan(&self) -> bool {
        self.code().is_plan_defect()
            || matches!(
                self,
                PipelineError::Apply(ApplyError::SuspectedHallucination { .. })
            )
    }
}

fn host_code(e: &HostError) -> ErrorCode {
    match e {
        HostError::RateLimited { .. } => ErrorCode::GithubRateLimit,
        HostError::Timeout(_) => ErrorCode::GithubTimeout,
        HostError::Request(err) if err.is_timeout() => ErrorCode::GithubTimeout,
        _ => ErrorCode::GithubApiError,
    }
}

pub(crate) fn llm_code(e: &LlmError) -> ErrorCode {
    match e {
        LlmError::RateLimited { .. } => ErrorCode::AiRateLimit,
        LlmError::Timeout(_) => ErrorCode::AiTimeout,
        LlmError::Request(err) if err.is_timeout() => ErrorCode::AiTimeout,
        LlmError::MissingApiKey => ErrorCode::ConfigError,
        LlmError::EmptyResponse => ErrorCode::InvalidAiOutput,
        LlmError::Api { .. } | LlmError::Request(_) => ErrorCode::AiApiError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::SearchNotFound).unwrap();
        assert_eq!(json, "\"SEARCH_NOT_FOUND\"");
        assert_eq!(
            serde_json::to_string(&ErrorCode::GithubRateLimit).unwrap(),
            format!("\"{}\"", ErrorCode::GithubRateLimit)
        );
    }

    #[test]
    fn test_external_errors_map_by_collaborator() {
        let host = PipelineError::from(HostError::RateLimited { retry_after: None });
        assert_eq!(host.code(), ErrorCode::GithubRateLimit);
        let ai = PipelineError::from(LlmError::Timeout(Duration::from_secs(1)));
        assert_eq!(ai.code(), ErrorCode::AiTimeout);
        let triage = PipelineError::from(TriageError::Llm(LlmError::RateLimited {
            retry_after: None,
        }));
        assert_eq!(triage.code(), ErrorCode::AiRateLimit);
        assert_eq!(
            PipelineError::from(LlmError::MissingApiKey).code(),
            ErrorCode::ConfigError
        );
    }

    #[test]
    fn test_stage_errors_map_to_their_codes() {
        assert_eq!(PipelineError::NoFilesFound.code(), ErrorCode::NoFilesFound);
        assert_eq!(
            PipelineError::Timeout(Duration::from_secs(5)).code(),
            ErrorCode::Timeout
        );
        assert_eq!(
            PipelineError::ArchitectureViolation {
                count: 1,
                summary: String::new()
            }
            .code(),
            ErrorCode::ArchitectureViolation
        );
        let apply = PipelineError::from(ApplyError::InvalidLine {
            path: "a.ts".to_string(),
            line: 9,
            lines: 2,
        });
        assert_eq!(apply.code(), ErrorCode::InvalidLine);
    }

    #[test]
    fn test_plan_defects() {
        assert!(ErrorCode::SearchNotFound.is_plan_defect());
        assert!(ErrorCode::InvalidAiOutput.is_plan_defect());
        assert!(!ErrorCode::ArchitectureViolation.is_plan_defect());
        assert!(!ErrorCode::ValidationFailed.is_plan_defect());

        let hallucinated = PipelineError::from(ApplyError::SuspectedHallucination {
            path: "src/App.tsx".to_string(),
            reason: "boilerplate".to_string(),
        });
        assert_eq!(hallucinated.code(), ErrorCode::ValidationFailed);
        assert!(hallucinated.warrants_new_plan());
        assert!(!PipelineError::NoFilesFound.warrants_new_plan());
    }
}
