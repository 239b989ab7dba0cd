use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ErrorReport, ReportError};
use crate::errors::ErrorCode;

pub const TRIAGE_ARTIFACT: &str = "triage-result.json";
pub const PLAN_ARTIFACT: &str = "fix-plan.json";
pub const COMMIT_ARTIFACT: &str = "commit-result.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Vec<String>,
}

/// Envelope every stage artifact is written in.
#[derive(Debug, Clone, Serialize)]
pub struct RunArtifact<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ArtifactError>,
    pub generated_at: DateTime<Utc>,
}

impl<T: Serialize> RunArtifact<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            generated_at: Utc::now(),
        }
    }

    pub fn failure(report: &ErrorReport) -> Self {
        let mut details = report.details.clone();
        if let Some(rollback) = &report.rollback {
            details.extend(rollback.steps.iter().map(|s| format!("rollback: {}", s)));
            details.extend(
                rollback
                    .failures
                    .iter()
                    .map(|f| format!("rollback failed: {}", f)),
            );
        }
        Self {
            success: false,
            data: None,
            error: Some(ArtifactError {
                code: report.code,
                message: report.message.clone(),
                details,
            }),
            generated_at: Utc::now(),
        }
    }
}

/// Writes artifacts into a directory, or nowhere when none is configured.
pub struct ArtifactWriter {
    dir: Option<PathBuf>,
}

impl ArtifactWriter {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn write<T: Serialize>(
        &self,
        name: &str,
        artifact: &RunArtifact<T>,
    ) -> Result<Option<PathBuf>, ReportError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir).map_err(|source| ReportError::Write {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(name);
        let json = serde_json::to_string_pretty(artifact)?;
        std::fs::write(&path, json).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), success = artifact.success, "wrote artifact");
        Ok(Some(path))
    }

    /// Like [`write`](Self::write), but a failure is only logged. Used on
    /// paths that are already reporting another error.
    pub fn write_quietly<T: Serialize>(&self, name: &str, artifact: &RunArtifact<T>) {
        if let Err(e) = self.write(name, artifact) {
            warn!(artifact = name, error = %e, "failed to write artifact");
        }
    }
}
