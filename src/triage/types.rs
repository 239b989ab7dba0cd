use serde::{Deserialize, Serialize};

/// Risk level for a file set or overall assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Fixed issue taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Bug,
    Feature,
    Docs,
    Chore,
    Other,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::Bug,
        Classification::Feature,
        Classification::Docs,
        Classification::Chore,
        Classification::Other,
    ];

    /// Parse a label as emitted by the generator (`BUG`, `bug`, ...).
    pub fn from_label(label: &str) -> Option<Classification> {
        match label.trim().to_ascii_uppercase().as_str() {
            "BUG" => Some(Classification::Bug),
            "FEATURE" => Some(Classification::Feature),
            "DOCS" => Some(Classification::Docs),
            "CHORE" => Some(Classification::Chore),
            "OTHER" => Some(Classification::Other),
            _ => None,
        }
    }

    /// Conventional-commit type for changes of this class.
    pub fn commit_type(&self) -> &'static str {
        match self {
            Classification::Bug => "fix",
            Classification::Feature => "feat",
            Classification::Docs => "docs",
            Classification::Chore | Classification::Other => "chore",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Bug => write!(f, "BUG"),
            Classification::Feature => write!(f, "FEATURE"),
            Classification::Docs => write!(f, "DOCS"),
            Classification::Chore => write!(f, "CHORE"),
            Classification::Other => write!(f, "OTHER"),
        }
    }
}

/// How a classification was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Label,
    Keywords,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: Classification,
    pub confidence: f64,
    pub source: ClassificationSource,
    pub rationale: String,
    /// Files the classifier believes are involved
    #[serde(default)]
    pub file_hints: Vec<String>,
}

/// What to do with an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    AutoFix,
    DraftPr,
    HumanReviewRequired,
}

impl Decision {
    /// The more cautious of two decisions.
    pub fn stricter(self, other: Decision) -> Decision {
        self.max(other)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::AutoFix => write!(f, "AUTO_FIX"),
            Decision::DraftPr => write!(f, "DRAFT_PR"),
            Decision::HumanReviewRequired => write!(f, "HUMAN_REVIEW_REQUIRED"),
        }
    }
}

/// Which gate check produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCategory {
    Keyword,
    Path,
    ChangeType,
}

impl std::fmt::Display for SecurityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityCategory::Keyword => write!(f, "sensitive keyword"),
            SecurityCategory::Path => write!(f, "sensitive path"),
            SecurityCategory::ChangeType => write!(f, "blocked change type"),
        }
    }
}

/// A single gate match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityMatch {
    pub category: SecurityCategory,
    /// Human-readable description of what matched
    pub label: String,
    /// Matched text
    pub matched: String,
    /// File path, or None when the match is in the issue text
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub matches: Vec<SecurityMatch>,
}

impl SecurityReport {
    pub fn flagged(&self) -> bool {
        !self.matches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0-100
    pub score: u8,
    pub level: RiskLevel,
    pub security_flagged: bool,
    pub decision: Decision,
    pub file_count: usize,
    pub reasoning: Vec<String>,
}

/// Output of the triage stage, persisted as `triage-result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub issue_id: u64,
    pub classification: ClassificationResult,
    pub risk: RiskAssessment,
    pub security: SecurityReport,
    /// Paths the assessment was computed over
    pub files: Vec<String>,
}
