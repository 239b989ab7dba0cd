//! Prompt Builder
//!
//! Assembles the fix instruction: issue, architecture rules and as much file
//! content as the input budget allows. Small context windows get the compact
//! template and only the top rules.

pub mod contract;

pub use contract::{parse_edit_plan, EditPlan};

use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::budget::{compress, estimate_tokens, BudgetError, CompressionStrategy, Provider, TokenBudget};
use crate::changes::ApplyError;
use crate::discovery::DiscoveredFile;
use crate::errors::ErrorCode;
use crate::issue::Issue;
use crate::project::ProjectContext;
use crate::repo::RepoTree;
use crate::triage::ClassificationResult;

/// Input ceilings below this use the compact template.
pub const COMPACT_THRESHOLD: usize = 16_000;
/// Rules of each kind rendered by the compact template.
const COMPACT_RULE_LIMIT: usize = 5;
/// Issue bodies are cut to this many characters in the compact template.
const COMPACT_BODY_CHARS: usize = 1_500;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Invalid AI output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Edit(#[from] ApplyError),

    #[error("Instruction does not fit the input budget: {0}")]
    Budget(#[from] BudgetError),

    #[error("None of the discovered files fit the instruction budget")]
    NoFilesFit,
}

impl PromptError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PromptError::InvalidOutput(_) => ErrorCode::InvalidAiOutput,
            PromptError::Edit(e) => e.code(),
            PromptError::Budget(_) => ErrorCode::ConfigError,
            PromptError::NoFilesFit => ErrorCode::NoFilesFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Compact,
    Standard,
}

impl Template {
    pub fn for_ceiling(input_ceiling: usize) -> Template {
        if input_ceiling < COMPACT_THRESHOLD {
            Template::Compact
        } else {
            Template::Standard
        }
    }
}

/// A file as it went into the instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptFile {
    pub path: String,
    pub strategy: CompressionStrategy,
    pub tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltPrompt {
    #[serde(skip)]
    pub text: String,
    pub template: Template,
    pub tokens: usize,
    pub files: Vec<PromptFile>,
    /// Files dropped for lack of budget
    pub omitted: Vec<String>,
}

pub struct PromptInput<'a> {
    pub issue: &'a Issue,
    pub classification: &'a ClassificationResult,
    pub context: &'a ProjectContext,
    pub tree: &'a RepoTree,
    pub files: &'a [DiscoveredFile],
    /// Why the previous plan was rejected, when asking again
    pub feedback: Option<&'a str>,
}

pub struct PromptBuilder {
    provider: Provider,
    input_ceiling: usize,
}

impl PromptBuilder {
    pub fn new(provider: Provider, input_ceiling: usize) -> Self {
        Self {
            provider,
            input_ceiling,
        }
    }

    pub fn template(&self) -> Template {
        Template::for_ceiling(self.input_ceiling)
    }

    #[instrument(skip_all, fields(issue = input.issue.id, ceiling = self.input_ceiling))]
    pub fn build(&self, input: &PromptInput<'_>) -> Result<BuiltPrompt, PromptError> {
        let template = self.template();
        let mut budget = TokenBudget::new(self.input_ceiling);

        let mut text = self.header(template, input);
        text.push_str("\n## Files\n");
        budget.consume(estimate_tokens(&text, self.provider))?;

        let mut files = Vec::new();
        let mut omitted = Vec::new();
        for file in input.files {
            match self.file_section(file, input.tree, &mut budget) {
                Some((section, included)) => {
                    text.push_str(&section);
                    files.push(included);
                }
                None => omitted.push(file.path.clone()),
            }
        }
        if files.is_empty() {
            return Err(PromptError::NoFilesFit);
        }

        let tokens = estimate_tokens(&text, self.provider);
        info!(
            ?template,
            tokens,
            files = files.len(),
            omitted = omitted.len(),
            "built fix instruction"
        );
        Ok(BuiltPrompt {
            text,
            template,
            tokens,
            files,
            omitted,
        })
    }

    fn header(&self, template: Template, input: &PromptInput<'_>) -> String {
        let mut out = String::new();
        let issue = input.issue;
        match template {
            Template::Compact => {
                let _ = writeln!(
                    out,
                    "Fix GitHub issue #{} ({}) with minimal edits.",
                    issue.id, input.classification.classification
                );
                let _ = writeln!(out, "\n## Issue\n{}", issue.title);
                if !issue.body.is_empty() {
                    let body = crate::llm::parse::truncate_str(&issue.body, COMPACT_BODY_CHARS);
                    let _ = writeln!(out, "{}", body);
                }
                let rules = render_rules(input.context, template);
                if !rules.is_empty() {
                    let _ = write!(out, "\n## Rules\n{}", rules);
                }
                let _ = writeln!(out, "\n{}", contract::CONTRACT_COMPACT);
            }
            Template::Standard => {
                let _ = writeln!(
                    out,
                    "You are fixing GitHub issue #{} in a {} project written in {}.",
                    issue.id, input.context.framework, input.context.language
                );
                let _ = writeln!(
                    out,
                    "The issue was classified as {} ({:.0}% confidence): {}",
                    input.classification.classification,
                    input.classification.confidence * 100.0,
                    input.classification.rationale
                );
                let _ = writeln!(out, "Make the smallest change that resolves it.");
                let _ = writeln!(out, "\n## Issue: {}\n", issue.title);
                if !issue.body.is_empty() {
                    let _ = writeln!(out, "{}", issue.body);
                }
                if !issue.labels.is_empty() {
                    let _ = writeln!(out, "\nLabels: {}", issue.labels.join(", "));
                }
                let rules = render_rules(input.context, template);
                if !rules.is_empty() {
                    let _ = write!(out, "\n## Architecture rules\n{}", rules);
                }
                let _ = writeln!(out, "\n{}", contract::CONTRACT_STANDARD);
            }
        }
        if let Some(feedback) = input.feedback {
            let _ = writeln!(
                out,
                "\n## Previous attempt rejected\n{}\nReturn a corrected plan.",
                feedback
            );
        }
        out
    }

    /// Render one file within its allotment, compressing when needed.
    fn file_section(
        &self,
        file: &DiscoveredFile,
        tree: &RepoTree,
        budget: &mut TokenBudget,
    ) -> Option<(String, PromptFile)> {
        let content = match tree.read(&file.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %file.path, error = %e, "skipping unreadable file");
                return None;
            }
        };
        let heading = |strategy: CompressionStrategy| match strategy {
            CompressionStrategy::None => format!("\n### {}\n```\n", file.path),
            other => format!("\n### {} (compressed: {})\n```\n", file.path, other),
        };
        let overhead = estimate_tokens(&heading(CompressionStrategy::StructuralSections), self.provider)
            + estimate_tokens("\n```\n", self.provider);
        // The allotment covers content only; headings come out of what is left.
        let content_budget = file
            .allotted
            .max(1)
            .min(budget.remaining().saturating_sub(overhead));
        let compressed = match compress(&file.path, &content, content_budget, self.provider) {
            Ok(compressed) => compressed,
            Err(e) => {
                debug!(path = %file.path, error = %e, "file does not fit its allotment");
                return None;
            }
        };

        let mut section = heading(compressed.strategy);
        section.push_str(&compressed.content);
        if !compressed.content.ends_with('\n') {
            section.push('\n');
        }
        section.push_str("```\n");
        let tokens = estimate_tokens(&section, self.provider);
        if let Err(e) = budget.consume(tokens) {
            debug!(path = %file.path, error = %e, "file section does not fit");
            return None;
        }
        Some((
            section,
            PromptFile {
                path: file.path.clone(),
                strategy: compressed.strategy,
                tokens,
            },
        ))
    }
}

/// Architecture rules as bullet lists. The compact template keeps only the
/// first prohibitions and requirements.
pub fn render_rules(context: &ProjectContext, template: Template) -> String {
    let rules = &context.spec_rules;
    let mut out = String::new();
    match template {
        Template::Compact => {
            for directive in rules.prohibitions.iter().take(COMPACT_RULE_LIMIT) {
                let _ = writeln!(out, "- {}", directive.statement);
            }
            for directive in rules.requirements.iter().take(COMPACT_RULE_LIMIT) {
                let _ = writeln!(out, "- {}", directive.statement);
            }
        }
        Template::Standard => {
            for layer in &rules.layers {
                let _ = writeln!(out, "- {} layer: {}", layer.name, layer.responsibility);
            }
            for rule in &rules.presentational {
                let _ = writeln!(out, "- Presentational: {}", rule.statement);
            }
            for rule in &rules.data_flow {
                let _ = writeln!(out, "- Data flow ({}): {}", rule.location, rule.statement);
            }
            for directive in &rules.prohibitions {
                let _ = writeln!(out, "- MUST NOT: {}", directive.statement);
            }
            for directive in &rules.requirements {
                let _ = writeln!(out, "- MUST: {}", directive.statement);
            }
            for note in &rules.directories {
                let _ = writeln!(out, "- `{}/`: {}", note.path, note.description);
            }
            if !context.conventions.is_empty() {
                let dirs: Vec<String> = context
                    .conventions
                    .iter()
                    .map(|c| format!("{} ({:?})", c.path, c.role).to_lowercase())
                    .collect();
                let _ = writeln!(out, "- Directory roles: {}", dirs.join(", "));
            }
        }
    }
    out
}
