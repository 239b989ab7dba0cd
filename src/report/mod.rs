pub mod artifact;
pub mod explain;

pub use artifact::{ArtifactWriter, RunArtifact, COMMIT_ARTIFACT, PLAN_ARTIFACT, TRIAGE_ARTIFACT};
pub use explain::{explain, ErrorReport};

use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::architecture::Violation;
use crate::changes::ComputedChange;
use crate::git::Commit;
use crate::host::{HostAction, PullRequestInfo};
use crate::issue::Issue;
use crate::triage::{Decision, RiskLevel, TriageResult};
use crate::validation::ValidationOutcome;

/// Marker appended to every comment the tool posts.
const SIGNATURE: &str = "<sub>Posted by autofix</sub>";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Stopped after triage on request
    TriageOnly,
    /// Gate decided a human must handle it
    HeldForReview,
    Committed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::TriageOnly => write!(f, "triaged"),
            RunStatus::HeldForReview => write!(f, "held for human review"),
            RunStatus::Committed => write!(f, "committed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Everything a run produced, for the terminal summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub issue_id: u64,
    pub issue_title: String,
    pub status: RunStatus,
    pub triage: Option<TriageResult>,
    /// Effective decision after the plan was re-gated
    pub decision: Option<Decision>,
    pub changes: Vec<ComputedChange>,
    pub warnings: Vec<Violation>,
    pub validations: Vec<ValidationOutcome>,
    pub commit: Option<Commit>,
    pub pull_request: Option<PullRequestInfo>,
    pub error: Option<ErrorReport>,
}

impl RunReport {
    pub fn new(issue: &Issue) -> Self {
        Self {
            issue_id: issue.id,
            issue_title: issue.title.clone(),
            status: RunStatus::Failed,
            triage: None,
            decision: None,
            changes: Vec::new(),
            warnings: Vec::new(),
            validations: Vec::new(),
            commit: None,
            pull_request: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status != RunStatus::Failed
    }
}

/// Issue comment summarizing triage.
pub fn triage_comment(triage: &TriageResult) -> String {
    let classification = &triage.classification;
    let risk = &triage.risk;
    let mut md = String::from("## Automated triage\n\n");
    md.push_str("| | |\n|---|---|\n");
    md.push_str(&format!(
        "| Classification | **{}** ({:.0}% confidence, {}) |\n",
        classification.classification,
        classification.confidence * 100.0,
        source_label(classification.source)
    ));
    md.push_str(&format!("| Risk | **{}** (score {}/100) |\n", risk.level, risk.score));
    md.push_str(&format!("| Decision | **{}** |\n", risk.decision));
    md.push_str(&format!("| Files in scope | {} |\n\n", risk.file_count));

    if !classification.rationale.is_empty() {
        md.push_str(&format!("_{}_\n\n", classification.rationale));
    }
    if !triage.files.is_empty() {
        md.push_str("**Files:**\n");
        for file in &triage.files {
            md.push_str(&format!("- `{}`\n", file));
        }
        md.push('\n');
    }
    if triage.security.flagged() {
        md.push_str("**Security gate:**\n");
        for m in &triage.security.matches {
            let location = match &m.path {
                Some(path) => format!(" in `{}`", path),
                None => String::new(),
            };
            md.push_str(&format!("- {}: {} (`{}`){}\n", m.category, m.label, m.matched, location));
        }
        md.push('\n');
    }
    if !risk.reasoning.is_empty() {
        md.push_str("**Reasoning:**\n");
        for reason in &risk.reasoning {
            md.push_str(&format!("- {}\n", reason));
        }
        md.push('\n');
    }
    md.push_str(decision_note(risk.decision));
    md.push_str("\n\n");
    md.push_str(SIGNATURE);
    md
}

fn source_label(source: crate::triage::ClassificationSource) -> &'static str {
    match source {
        crate::triage::ClassificationSource::Label => "from labels",
        crate::triage::ClassificationSource::Keywords => "keyword match",
        crate::triage::ClassificationSource::Model => "model classification",
    }
}

fn decision_note(decision: Decision) -> &'static str {
    match decision {
        Decision::AutoFix => "A fix will be attempted and opened as a pull request.",
        Decision::DraftPr => {
            "A fix will be attempted and opened as a draft pull request for review."
        }
        Decision::HumanReviewRequired => {
            "No automatic fix will be attempted. A maintainer needs to review this issue."
        }
    }
}

/// Comment posted when the generated plan is stricter-gated than triage.
pub fn held_for_review_comment(paths: &[String], reasons: &[String]) -> String {
    let mut md = String::from("## Automated fix held for review\n\n");
    md.push_str("The proposed change reaches beyond what triage cleared, so it was not applied.\n\n");
    if !paths.is_empty() {
        md.push_str("**Files the plan would touch:**\n");
        for path in paths {
            md.push_str(&format!("- `{}`\n", path));
        }
        md.push('\n');
    }
    if !reasons.is_empty() {
        md.push_str("**Why:**\n");
        for reason in reasons {
            md.push_str(&format!("- {}\n", reason));
        }
        md.push('\n');
    }
    md.push_str(SIGNATURE);
    md
}

/// Comment posted when a run fails after triage.
pub fn error_comment(report: &ErrorReport) -> String {
    let mut md = String::from("## Automated fix failed\n\n");
    md.push_str(&format!("**Code:** `{}`\n\n", report.code));
    md.push_str(&format!("**Cause:** {}\n\n", report.cause));
    md.push_str(&format!("**What to do:** {}\n\n", report.remediation));
    md.push_str(&format!("**Error:** {}\n\n", report.message));

    match &report.rollback {
        None => md.push_str("**Rollback:** nothing to roll back.\n\n"),
        Some(rollback) if rollback.clean() => {
            md.push_str("**Rollback:** completed, no changes were left behind.\n\n");
        }
        Some(rollback) => {
            md.push_str("**Rollback:** incomplete, manual cleanup needed:\n");
            for failure in &rollback.failures {
                md.push_str(&format!("- {}\n", failure));
            }
            md.push('\n');
        }
    }

    if !report.details.is_empty() {
        md.push_str("<details><summary>Details</summary>\n\n");
        for detail in &report.details {
            md.push_str(&format!("- {}\n", detail));
        }
        md.push_str("\n</details>\n\n");
    }
    md.push_str(SIGNATURE);
    md
}

pub struct PullRequestContent<'a> {
    pub issue: &'a Issue,
    pub triage: &'a TriageResult,
    pub decision: Decision,
    pub changes: &'a [ComputedChange],
    pub validations: &'a [ValidationOutcome],
    pub warnings: &'a [Violation],
}

pub fn pull_request_body(content: &PullRequestContent<'_>) -> String {
    let mut md = format!("Fixes #{}\n\n## Summary\n\n", content.issue.id);
    for change in content.changes {
        let strategies: Vec<String> = change.strategies.iter().map(|s| s.to_string()).collect();
        let kind = if change.created {
            "new file".to_string()
        } else {
            strategies.join(", ")
        };
        md.push_str(&format!("- `{}` ({}): {}\n", change.path, kind, change.summary));
    }
    md.push_str(&format!(
        "\n## Triage\n\n- Classification: **{}**\n- Risk: **{}** (score {}/100)\n- Decision: **{}**\n",
        content.triage.classification.classification,
        content.triage.risk.level,
        content.triage.risk.score,
        content.decision
    ));

    if !content.validations.is_empty() {
        md.push_str("\n## Validation\n\n");
        for outcome in content.validations {
            md.push_str(&format!(
                "- `{}`: exit {} ({}ms)\n",
                outcome.command, outcome.exit_code, outcome.duration_ms
            ));
        }
    }
    if !content.warnings.is_empty() {
        md.push_str("\n## Architecture warnings\n\n");
        for warning in content.warnings {
            md.push_str(&format!(
                "- `{}` [{}]: {}\n",
                warning.path, warning.rule_id, warning.message
            ));
        }
    }
    if content.decision == Decision::DraftPr {
        md.push_str("\n> Opened as a draft: this change needs human review before merging.\n");
    }
    md.push('\n');
    md.push_str(SIGNATURE);
    md
}

/// Print the run summary to the terminal.
pub fn print_summary(report: &RunReport) {
    println!();
    println!("Issue #{}: \"{}\"", report.issue_id, report.issue_title);

    if let Some(triage) = &report.triage {
        println!(
            "Classification: {} | Risk: {} ({}/100) | Decision: {}",
            triage.classification.classification,
            colorize_risk(triage.risk.level),
            triage.risk.score,
            colorize_decision(report.decision.unwrap_or(triage.risk.decision))
        );
        for reason in &triage.risk.reasoning {
            println!("  • {}", reason);
        }
    }
    println!();

    if !report.changes.is_empty() {
        println!("═══ Changes ═══");
        for change in &report.changes {
            println!("  • {} ({})", change.path, change.summary);
        }
        println!();
    }
    if !report.warnings.is_empty() {
        println!("═══ Architecture warnings ═══");
        for warning in &report.warnings {
            println!("  • {} [{}] {}", warning.path, warning.rule_id, warning.message);
        }
        println!();
    }
    for outcome in &report.validations {
        let status = if outcome.passed() {
            "passed".green()
        } else {
            "failed".red()
        };
        println!("  {} {} ({}ms)", status, outcome.command, outcome.duration_ms);
    }
    if let Some(commit) = &report.commit {
        println!("Branch: {} | Commit: {}", commit.branch, commit.sha);
    }
    if let Some(pr) = &report.pull_request {
        println!("Pull request #{}: {}", pr.number, pr.url);
    }
    if let Some(error) = &report.error {
        println!("{} {}", error.code.to_string().red().bold(), error.message);
        println!("  Cause: {}", error.cause);
        println!("  Next step: {}", error.remediation);
    }

    let status = match report.status {
        RunStatus::Failed => report.status.to_string().red().bold(),
        RunStatus::HeldForReview => report.status.to_string().yellow().bold(),
        RunStatus::TriageOnly | RunStatus::Committed => report.status.to_string().green().bold(),
    };
    println!();
    println!("═══ Result: {} ═══", status);
    println!();
}

/// Print what an offline run would have sent to the code host.
pub fn print_host_actions(actions: &[HostAction]) {
    if actions.is_empty() {
        return;
    }
    println!("═══ Recorded host actions ═══");
    for action in actions {
        match action {
            HostAction::Comment { issue, body } => {
                println!("{} on #{}:", "comment".cyan().bold(), issue);
                for line in body.lines() {
                    println!("  │ {}", line);
                }
            }
            HostAction::Labels { issue, labels } => {
                println!("{} on #{}: {}", "labels".cyan().bold(), issue, labels.join(", "));
            }
            HostAction::PullRequest { draft, number } => {
                let kind = if draft.draft { "draft pull request" } else { "pull request" };
                println!(
                    "{} #{}: {} ({} → {})",
                    kind.cyan().bold(),
                    number,
                    draft.title,
                    draft.head,
                    draft.base
                );
            }
        }
    }
    println!();
}

fn colorize_risk(level: RiskLevel) -> colored::ColoredString {
    match level {
        RiskLevel::High => "HIGH".red().bold(),
        RiskLevel::Medium => "MEDIUM".yellow().bold(),
        RiskLevel::Low => "LOW".green().bold(),
    }
}

fn colorize_decision(decision: Decision) -> colored::ColoredString {
    match decision {
        Decision::HumanReviewRequired => decision.to_string().red().bold(),
        Decision::DraftPr => decision.to_string().yellow().bold(),
        Decision::AutoFix => decision.to_string().green().bold(),
    }
}
