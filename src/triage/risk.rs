use std::collections::HashMap;
use tracing::debug;

use super::security::SecurityGate;
use super::types::{Decision, RiskAssessment, RiskLevel, SecurityReport};

/// Sensitivity used when no file is known yet.
pub const UNKNOWN_FILE_SENSITIVITY: u8 = 5;

/// Files at or below this count may be fixed without review.
pub const AUTO_FIX_MAX_FILES: usize = 3;

/// Known basenames and their sensitivity (0-10).
const SENSITIVE_BASENAMES: &[(&str, u8)] = &[
    (".env", 10),
    ("auth.ts", 9),
    ("auth.js", 9),
    ("middleware.ts", 8),
    ("middleware.js", 8),
    ("dockerfile", 8),
    ("docker-compose.yml", 8),
    ("package.json", 7),
    ("webpack.config.js", 7),
    ("next.config.js", 6),
    ("next.config.mjs", 6),
    ("vite.config.ts", 6),
    ("vite.config.js", 6),
    ("tsconfig.json", 6),
    ("package-lock.json", 6),
    ("yarn.lock", 6),
    ("pnpm-lock.yaml", 6),
    (".eslintrc.json", 4),
    (".eslintrc.js", 4),
    (".prettierrc", 2),
    ("license", 2),
    ("changelog.md", 1),
    ("contributing.md", 1),
    ("readme.md", 1),
];

/// Risk Assessor
///
/// Scores file sensitivity × change scope:
/// - per-file sensitivity from a basename table, then path heuristics
/// - `score = min(100, round(avg_sensitivity * 10 * scope_multiplier))`
/// - level thresholds: <30 LOW, <60 MEDIUM, else HIGH
/// - a security flag always forces HIGH
pub struct RiskAssessor {
    table: HashMap<&'static str, u8>,
    gate: SecurityGate,
}

impl RiskAssessor {
    pub fn new(gate: SecurityGate) -> Self {
        Self {
            table: SENSITIVE_BASENAMES.iter().copied().collect(),
            gate,
        }
    }

    pub fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    /// Sensitivity of one path, 0-10.
    pub fn file_sensitivity(&self, path: &str) -> u8 {
        let lower = path.to_ascii_lowercase();
        let basename = lower.rsplit('/').next().unwrap_or(&lower);
        if let Some(score) = self.table.get(basename) {
            return *score;
        }
        if !self.gate.check_path(path).is_empty() {
            return 8;
        }
        if is_docs_path(&lower) {
            return 1;
        }
        if is_test_path(&lower) {
            return 2;
        }
        if lower.ends_with(".css") || lower.ends_with(".scss") || lower.ends_with(".less") {
            return 2;
        }
        if lower.contains("config")
            || lower.ends_with(".json")
            || lower.ends_with(".yml")
            || lower.ends_with(".yaml")
            || lower.ends_with(".toml")
        {
            return 5;
        }
        if lower.contains("/auth") || lower.contains("session") || lower.contains("permission") {
            return 7;
        }
        if lower.contains("/api/") || lower.contains("/services/") || lower.contains("/store/") {
            return 4;
        }
        if crate::source::is_script_file(&lower) {
            return 3;
        }
        4
    }

    /// Average sensitivity; an empty set counts as one unknown file.
    pub fn average_sensitivity<S: AsRef<str>>(&self, paths: &[S]) -> f64 {
        if paths.is_empty() {
            return f64::from(UNKNOWN_FILE_SENSITIVITY);
        }
        let total: u32 = paths
            .iter()
            .map(|p| u32::from(self.file_sensitivity(p.as_ref())))
            .sum();
        f64::from(total) / paths.len() as f64
    }

    /// Assess a file set against a security report.
    pub fn assess<S: AsRef<str>>(&self, paths: &[S], security: &SecurityReport) -> RiskAssessment {
        let avg = self.average_sensitivity(paths);
        let file_count = paths.len().max(1);
        let multiplier = scope_multiplier(file_count);
        let score = risk_score(avg, file_count);
        let computed = level_for(score);
        let security_flagged = security.flagged();
        let level = if security_flagged {
            RiskLevel::High
        } else {
            computed
        };
        let decision = decide(level, security_flagged, file_count);

        let mut reasoning = vec![
            format!(
                "{} file(s), average sensitivity {:.1}/10, scope multiplier {:.1}",
                file_count, avg, multiplier
            ),
            format!("risk score {} → {}", score, computed),
        ];
        if security_flagged {
            let labels: Vec<&str> = security.matches.iter().map(|m| m.label.as_str()).collect();
            reasoning.push(format!(
                "security gate matched ({}), level forced to HIGH",
                labels.join(", ")
            ));
        }
        if level == RiskLevel::Low && file_count > AUTO_FIX_MAX_FILES {
            reasoning.push(format!(
                "more than {} files cannot be fixed automatically",
                AUTO_FIX_MAX_FILES
            ));
        }
        debug!(score, %level, %decision, file_count, "risk assessed");

        RiskAssessment {
            score,
            level,
            security_flagged,
            decision,
            file_count,
            reasoning,
        }
    }
}

fn is_docs_path(lower: &str) -> bool {
    lower.ends_with(".md")
        || lower.ends_with(".mdx")
        || lower.ends_with(".txt")
        || lower.ends_with(".rst")
        || lower.starts_with("docs/")
        || lower.contains("/docs/")
}

fn is_test_path(lower: &str) -> bool {
    lower.contains(".test.")
        || lower.contains(".spec.")
        || lower.contains("__tests__/")
        || lower.starts_with("tests/")
        || lower.contains("/tests/")
        || lower.starts_with("test/")
        || lower.contains("/test/")
}

/// Scope multiplier by number of files touched.
pub fn scope_multiplier(file_count: usize) -> f64 {
    match file_count {
        0 | 1 => 1.0,
        2..=3 => 1.5,
        4..=5 => 2.0,
        _ => 3.0,
    }
}

/// `min(100, round(avg * 10 * multiplier))`
pub fn risk_score(avg_sensitivity: f64, file_count: usize) -> u8 {
    let raw = (avg_sensitivity * 10.0 * scope_multiplier(file_count)).round();
    raw.clamp(0.0, 100.0) as u8
}

pub fn level_for(score: u8) -> RiskLevel {
    match score {
        0..=29 => RiskLevel::Low,
        30..=59 => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}

/// Decision matrix:
/// flagged or HIGH → review; MEDIUM → draft; LOW with ≤3 files → auto; else review.
pub fn decide(level: RiskLevel, security_flagged: bool, file_count: usize) -> Decision {
    if security_flagged || level == RiskLevel::High {
        return Decision::HumanReviewRequired;
    }
    match level {
        RiskLevel::Medium => Decision::DraftPr,
        RiskLevel::Low if file_count <= AUTO_FIX_MAX_FILES => Decision::AutoFix,
        _ => Decision::HumanReviewRequired,
    }
}
