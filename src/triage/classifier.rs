use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::types::{Classification, ClassificationResult, ClassificationSource};
use super::TriageError;
use crate::issue::Issue;
use crate::llm::{parse, GenerationParams, TextGenerator};

/// Keyword verdicts at or above this confidence skip the model.
pub const KEYWORD_ACCEPT_CONFIDENCE: f64 = 0.7;

/// Confidence assigned when a tracker label names the class outright.
const LABEL_CONFIDENCE: f64 = 0.95;

const BUG_PATTERNS: &[&str] = &[
    r"\bbug\b",
    r"\bbroken\b",
    r"\berrors?\b",
    r"\bcrash(?:es|ed|ing)?\b",
    r"\bfix(?:es|ed)?\b",
    r"\bdoes(?:n't| not) work",
    r"\bnot working\b",
    r"\bfail(?:s|ed|ing|ure)?\b",
    r"\bincorrect(?:ly)?\b",
    r"\bwrong\b",
    r"\bregression\b",
    r"\bexception\b",
];

const FEATURE_PATTERNS: &[&str] = &[
    r"\badd(?:s|ing)?\b",
    r"\bnew\b",
    r"\bfeature\b",
    r"\bimplement\b",
    r"\bsupport for\b",
    r"\benhance(?:ment)?\b",
    r"\ballow(?:s)?\b",
    r"\bability to\b",
    r"\bwould be nice\b",
];

const DOCS_PATTERNS: &[&str] = &[
    r"\btypos?\b",
    r"\breadme\b",
    r"\bdocs?\b",
    r"\bdocumentation\b",
    r"\bspelling\b",
    r"\bmisspel",
    r"\bgrammar\b",
    r"\.mdx?\b",
    r"\bchangelog\b",
    r"\bguide\b",
];

const CHORE_PATTERNS: &[&str] = &[
    r"\bchore\b",
    r"\brefactor",
    r"\bclean ?up\b",
    r"\bbump\b",
    r"\bupgrade\b",
    r"\bdependenc(?:y|ies)\b",
    r"\blint(?:ing)?\b",
    r"\bformatting\b",
    r"\brename\b",
    r"\bunused\b",
];

const OTHER_PATTERNS: &[&str] = &[
    r"\bquestion\b",
    r"\bhow (?:do|can|to)\b",
    r"\bdiscussion\b",
    r"\bwondering\b",
];

/// Result of the keyword pass.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordVerdict {
    pub counts: Vec<(Classification, usize)>,
    /// The top category when it is unique and has at least one match
    pub top: Option<Classification>,
    pub confidence: f64,
}

/// `min(0.9, 0.5 + 0.15 * max_matches)`
pub fn keyword_confidence(max_matches: usize) -> f64 {
    (0.5 + 0.15 * max_matches as f64).min(0.9)
}

/// Issue Classifier
///
/// Keyword pattern sets per taxonomy member first; when the top category is
/// ambiguous or weak, one call to the text generator decides.
pub struct Classifier {
    patterns: Vec<(Classification, Vec<Regex>)>,
}

#[derive(Debug, Deserialize)]
struct ModelClassification {
    classification: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    files: Vec<String>,
}

impl Classifier {
    pub fn new() -> Self {
        let sets = [
            (Classification::Bug, BUG_PATTERNS),
            (Classification::Feature, FEATURE_PATTERNS),
            (Classification::Docs, DOCS_PATTERNS),
            (Classification::Chore, CHORE_PATTERNS),
            (Classification::Other, OTHER_PATTERNS),
        ];
        let patterns = sets
            .iter()
            .map(|(class, list)| {
                let compiled = list
                    .iter()
                    .map(|p| {
                        Regex::new(&format!("(?i){}", p))
                            .expect("built-in classifier pattern should compile")
                    })
                    .collect();
                (*class, compiled)
            })
            .collect();
        Self { patterns }
    }

    /// Map tracker labels that name a class directly.
    pub fn classify_by_labels(labels: &[String]) -> Option<Classification> {
        labels.iter().find_map(|label| {
            match label.trim().to_ascii_lowercase().as_str() {
                "bug" | "type: bug" | "defect" => Some(Classification::Bug),
                "enhancement" | "feature" | "type: feature" => Some(Classification::Feature),
                "documentation" | "docs" | "type: docs" => Some(Classification::Docs),
                "chore" | "maintenance" | "dependencies" => Some(Classification::Chore),
                "question" => Some(Classification::Other),
                _ => None,
            }
        })
    }

    /// Count distinct pattern matches per category.
    pub fn keyword_verdict(&self, text: &str) -> KeywordVerdict {
        let counts: Vec<(Classification, usize)> = self
            .patterns
            .iter()
            .map(|(class, regexes)| (*class, regexes.iter().filter(|r| r.is_match(text)).count()))
            .collect();
        let max = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let leaders: Vec<Classification> = counts
            .iter()
            .filter(|(_, n)| *n == max)
            .map(|(c, _)| *c)
            .collect();
        let top = if max > 0 && leaders.len() == 1 {
            Some(leaders[0])
        } else {
            None
        };
        KeywordVerdict {
            counts,
            top,
            confidence: keyword_confidence(max),
        }
    }

    /// Classify an issue: labels, then keywords, then the model.
    #[instrument(skip_all, fields(issue = issue.id))]
    pub async fn classify(
        &self,
        issue: &Issue,
        generator: &dyn TextGenerator,
        params: &GenerationParams,
    ) -> Result<ClassificationResult, TriageError> {
        if let Some(classification) = Self::classify_by_labels(&issue.labels) {
            debug!(%classification, "classified from labels");
            return Ok(ClassificationResult {
                classification,
                confidence: LABEL_CONFIDENCE,
                source: ClassificationSource::Label,
                rationale: "issue label names the category".to_string(),
                file_hints: Vec::new(),
            });
        }

        let verdict = self.keyword_verdict(&issue.text());
        debug!(counts = ?verdict.counts, confidence = verdict.confidence, "keyword verdict");
        if let Some(classification) = verdict.top {
            if verdict.confidence >= KEYWORD_ACCEPT_CONFIDENCE {
                return Ok(ClassificationResult {
                    classification,
                    confidence: verdict.confidence,
                    source: ClassificationSource::Keywords,
                    rationale: describe_counts(&verdict),
                    file_hints: Vec::new(),
                });
            }
        }

        info!("keyword pass inconclusive, asking the model");
        let raw = generator
            .generate(&classification_prompt(issue), params)
            .await?;
        parse_model_classification(&raw)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn describe_counts(verdict: &KeywordVerdict) -> String {
    let parts: Vec<String> = verdict
        .counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(c, n)| format!("{}={}", c, n))
        .collect();
    format!("keyword matches: {}", parts.join(", "))
}

fn classification_prompt(issue: &Issue) -> String {
    format!(
        "Classify the following issue into exactly one of: BUG, FEATURE, DOCS, CHORE, OTHER.\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"classification\": \"<BUG|FEATURE|DOCS|CHORE|OTHER>\", \"confidence\": <0.0-1.0>, \
         \"rationale\": \"<one sentence>\", \"files\": [\"<repository paths likely involved, may be empty>\"]}}\n\n\
         Title: {}\n\nBody:\n{}\n",
        issue.title,
        if issue.body.is_empty() {
            "(empty)"
        } else {
            issue.body.as_str()
        }
    )
}

/// Parse the model's classification object; anything off-contract is invalid.
pub fn parse_model_classification(raw: &str) -> Result<ClassificationResult, TriageError> {
    let json = parse::extract_json_object(raw)
        .ok_or_else(|| TriageError::InvalidAiOutput("no JSON object in response".to_string()))?;
    let parsed: ModelClassification = serde_json::from_str(json)
        .map_err(|e| TriageError::InvalidAiOutput(format!("malformed classification: {}", e)))?;
    let classification = Classification::from_label(&parsed.classification).ok_or_else(|| {
        TriageError::InvalidAiOutput(format!(
            "unknown classification label `{}`",
            parsed.classification
        ))
    })?;
    if !(0.0..=1.0).contains(&parsed.confidence) {
        return Err(TriageError::InvalidAiOutput(format!(
            "confidence {} outside 0..1",
            parsed.confidence
        )));
    }
    Ok(ClassificationResult {
        classification,
        confidence: parsed.confidence,
        source: ClassificationSource::Model,
        rationale: parsed.rationale,
        file_hints: parsed.files,
    })
}
