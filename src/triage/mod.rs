pub mod classifier;
pub mod risk;
pub mod security;
pub mod types;

pub use classifier::Classifier;
pub use risk::RiskAssessor;
pub use security::SecurityGate;
pub use types::{
    Classification, ClassificationResult, ClassificationSource, Decision, RiskAssessment,
    RiskLevel, SecurityCategory, SecurityMatch, SecurityReport, TriageResult,
};

use thiserror::Error;
use tracing::{info, info_span, instrument, Instrument};

use crate::issue::Issue;
use crate::llm::{GenerationParams, LlmError, TextGenerator};
use crate::repo::RepoTree;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Invalid AI output: {0}")]
    InvalidAiOutput(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Classification + security gate + risk assessment for one issue.
pub struct Triager {
    classifier: Classifier,
    assessor: RiskAssessor,
}

impl Triager {
    pub fn new(gate: SecurityGate) -> Self {
        Self {
            classifier: Classifier::new(),
            assessor: RiskAssessor::new(gate),
        }
    }

    pub fn assessor(&self) -> &RiskAssessor {
        &self.assessor
    }

    pub fn gate(&self) -> &SecurityGate {
        self.assessor.gate()
    }

    /// Run triage. The file set is the explicitly mentioned paths plus the
    /// classifier's hints, both resolved against the working tree.
    #[instrument(skip_all, fields(issue = issue.id))]
    pub async fn triage(
        &self,
        issue: &Issue,
        tree: &RepoTree,
        generator: &dyn TextGenerator,
        params: &GenerationParams,
    ) -> Result<TriageResult, TriageError> {
        let classification = self
            .classifier
            .classify(issue, generator, params)
            .instrument(info_span!("classify"))
            .await?;

        let files = triage_files(issue, tree, &classification.file_hints);
        let security = self.gate().evaluate(&issue.text(), &files);
        let risk = self.assessor.assess(&files, &security);

        info!(
            classification = %classification.classification,
            confidence = classification.confidence,
            files = files.len(),
            score = risk.score,
            level = %risk.level,
            decision = %risk.decision,
            security_flagged = risk.security_flagged,
            "triage complete"
        );

        Ok(TriageResult {
            issue_id: issue.id,
            classification,
            risk,
            security,
            files,
        })
    }
}

/// Paths mentioned in the issue and hinted by the classifier that exist in the tree.
pub fn triage_files(issue: &Issue, tree: &RepoTree, hints: &[String]) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    let mentions = issue.mentioned_paths();
    for mention in mentions.iter().chain(hints.iter()) {
        for entry in tree.resolve_mention(mention) {
            if !files.contains(&entry.path) {
                files.push(entry.path.clone());
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_issue, write_tree, ScriptedGenerator};

    fn params() -> GenerationParams {
        GenerationParams {
            temperature: 0.0,
            max_output_tokens: 100,
        }
    }

    #[tokio::test]
    async fn test_typo_issue_triages_to_auto_fix() {
        let dir = write_tree(&[("README.md", "teh form builder\n"), ("src/index.ts", "x\n")]);
        let tree = RepoTree::scan(dir.path()).unwrap();
        let issue = sample_issue(
            101,
            "fix typo: 'teh' → 'the' in README.md",
            "The getting started section of README.md says teh form builder.",
        );
        let generator = ScriptedGenerator::new(vec![]);
        let result = Triager::new(SecurityGate::new())
            .triage(&issue, &tree, &generator, &params())
            .await
            .unwrap();
        assert_eq!(result.classification.classification, Classification::Docs);
        assert_eq!(result.files, vec!["README.md"]);
        assert_eq!(result.risk.level, RiskLevel::Low);
        assert_eq!(result.risk.decision, Decision::AutoFix);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_secret_rotation_requires_review() {
        let dir = write_tree(&[("README.md", "x\n")]);
        let tree = RepoTree::scan(dir.path()).unwrap();
        let issue = sample_issue(
            7,
            "Rotate API key",
            "The key in .env leaked. Please rotate API key and fix the config.",
        );
        let generator = ScriptedGenerator::new(vec![
            r#"{"classification": "CHORE", "confidence": 0.6, "rationale": "rotation"}"#
                .to_string(),
        ]);
        let result = Triager::new(SecurityGate::new())
            .triage(&issue, &tree, &generator, &params())
            .await
            .unwrap();
        assert!(result.security.flagged());
        assert_eq!(result.risk.decision, Decision::HumanReviewRequired);
    }

    #[test]
    fn test_triage_files_merges_hints_and_skips_unknown() {
        let dir = write_tree(&[
            ("src/components/Button.tsx", "x\n"),
            ("src/pages/Home.tsx", "x\n"),
        ]);
        let tree = RepoTree::scan(dir.path()).unwrap();
        let issue = sample_issue(1, "Button.tsx renders twice", "and Missing.tsx too");
        let files = triage_files(&issue, &tree, &["src/pages/Home.tsx".to_string()]);
        assert_eq!(files, vec!["src/components/Button.tsx", "src/pages/Home.tsx"]);
    }
}
