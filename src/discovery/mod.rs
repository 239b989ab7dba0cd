//! File Discovery
//!
//! Finds the files an issue is about. Independent strategies each award
//! weighted points to paths; points accumulate per path, candidates are
//! ranked, then trimmed to the file-count ceiling and the token budget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::budget::{estimate_tokens, Provider, TokenBudget};
use crate::issue::Issue;
use crate::llm::parse::extract_json_object;
use crate::llm::{GenerationParams, TextGenerator};
use crate::project::{DirectoryRole, ProjectContext};
use crate::repo::RepoTree;
use crate::source::{extension, extract_imports, is_script_file};
use crate::triage::{Classification, ClassificationResult};

pub const EXPLICIT_WEIGHT: u32 = 100;
pub const HINT_WEIGHT: u32 = 90;
/// Semantic tiers: exact file-name match, directory match, partial name match
pub const SEMANTIC_WEIGHTS: [u32; 3] = [50, 40, 30];
pub const CONVENTION_WEIGHT: u32 = 25;
pub const MODEL_WEIGHT: u32 = 20;
pub const IMPORT_WEIGHT: u32 = 15;

/// The model is asked for suggestions only below this many candidates.
const MODEL_ASSIST_THRESHOLD: usize = 3;
/// Imports are followed from this many top candidates.
const IMPORT_EXPANSION_SOURCES: usize = 5;
/// Files a single directory-convention match may add.
const CONVENTION_FILES_PER_ROLE: usize = 10;
/// Paths listed in the model-assisted instruction.
const MODEL_LISTING_LIMIT: usize = 300;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "bug", "does", "doesn", "error", "file",
    "files", "from", "have", "into", "issue", "just", "like", "make", "more", "need", "only",
    "please", "should", "some", "still", "that", "than", "the", "then", "there", "these", "this",
    "when", "where", "which", "while", "will", "with", "would", "fix", "fixed", "page", "work",
    "works", "working", "instead", "says", "shows", "show",
];

/// Extensions worth handing to the generator.
const TEXT_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts", "vue", "svelte", "astro", "html", "css",
    "scss", "sass", "less", "md", "mdx", "json", "yml", "yaml", "toml", "py", "rs", "go", "txt",
];

const IMPORT_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".vue",
    ".svelte",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCandidate {
    pub path: String,
    pub score: u32,
    pub reasons: Vec<String>,
}

/// A candidate that survived validation and trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFile {
    pub path: String,
    pub score: u32,
    pub reasons: Vec<String>,
    /// Estimate of the full content
    pub tokens: usize,
    /// Tokens reserved for this file's content in the budget
    pub allotted: usize,
}

/// Everything the strategies look at.
pub struct DiscoveryInput<'a> {
    pub issue: &'a Issue,
    pub classification: &'a ClassificationResult,
    pub tree: &'a RepoTree,
    pub context: &'a ProjectContext,
}

/// Accumulates points per path.
#[derive(Debug, Default)]
pub struct Candidates {
    by_path: BTreeMap<String, FileCandidate>,
}

impl Candidates {
    pub fn award(&mut self, path: &str, points: u32, reason: impl Into<String>) {
        let entry = self
            .by_path
            .entry(path.to_string())
            .or_insert_with(|| FileCandidate {
                path: path.to_string(),
                score: 0,
                reasons: Vec::new(),
            });
        entry.score += points;
        entry.reasons.push(reason.into());
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Highest score first; ties broken by path.
    pub fn ranked(&self) -> Vec<FileCandidate> {
        let mut ranked: Vec<FileCandidate> = self.by_path.values().cloned().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        ranked
    }
}

/// A synchronous strategy over the issue and the tree.
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn discover(&self, input: &DiscoveryInput<'_>, candidates: &mut Candidates);
}

/// Paths spelled out in the issue.
pub struct ExplicitMentions;

/// Files named by the classifier.
pub struct ClassifierHints;

/// Issue keywords against file names and directories.
pub struct SemanticMatch;

/// Directory roles implied by the issue.
pub struct ConventionMatch;

impl DiscoveryStrategy for ExplicitMentions {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn discover(&self, input: &DiscoveryInput<'_>, candidates: &mut Candidates) {
        for mention in input.issue.mentioned_paths() {
            for entry in input.tree.resolve_mention(&mention) {
                candidates.award(&entry.path, EXPLICIT_WEIGHT, format!("mentioned as {}", mention));
            }
        }
    }
}

impl DiscoveryStrategy for ClassifierHints {
    fn name(&self) -> &'static str {
        "hints"
    }

    fn discover(&self, input: &DiscoveryInput<'_>, candidates: &mut Candidates) {
        for hint in &input.classification.file_hints {
            for entry in input.tree.resolve_mention(hint) {
                candidates.award(&entry.path, HINT_WEIGHT, "classifier hint");
            }
        }
    }
}

impl DiscoveryStrategy for SemanticMatch {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn discover(&self, input: &DiscoveryInput<'_>, candidates: &mut Candidates) {
        let keywords = keywords(&input.issue.text());
        if keywords.is_empty() {
            return;
        }
        for entry in input.tree.entries() {
            if !is_text_file(&entry.path) {
                continue;
            }
            let stem = squash(entry.stem());
            let dirs: Vec<String> = entry.dir().split('/').map(squash).collect();
            for keyword in &keywords {
                let tier = if stem == *keyword {
                    Some(0)
                } else if dirs.iter().any(|d| d == keyword) {
                    Some(1)
                } else if keyword.len() >= 4 && stem.contains(keyword.as_str()) {
                    Some(2)
                } else {
                    None
                };
                if let Some(tier) = tier {
                    candidates.award(
                        &entry.path,
                        SEMANTIC_WEIGHTS[tier],
                        format!("keyword '{}'", keyword),
                    );
                }
            }
        }
    }
}

impl DiscoveryStrategy for ConventionMatch {
    fn name(&self) -> &'static str {
        "convention"
    }

    fn discover(&self, input: &DiscoveryInput<'_>, candidates: &mut Candidates) {
        let roles = implied_roles(input);
        for role in roles {
            let dirs: Vec<&str> = input.context.dirs_with_role(role).collect();
            let files = input
                .tree
                .entries()
                .iter()
                .filter(|e| is_text_file(&e.path))
                .filter(|e| {
                    dirs.iter()
                        .any(|d| e.path.starts_with(d) && e.path[d.len()..].starts_with('/'))
                        || (role == DirectoryRole::Docs && is_root_readme(&e.path))
                })
                .take(CONVENTION_FILES_PER_ROLE);
            for entry in files {
                candidates.award(
                    &entry.path,
                    CONVENTION_WEIGHT,
                    format!("{:?} directory", role).to_lowercase(),
                );
            }
        }
    }
}

fn is_root_readme(path: &str) -> bool {
    !path.contains('/') && path.to_ascii_lowercase().starts_with("readme")
}

/// Directory roles the issue points at, by classification and wording.
fn implied_roles(input: &DiscoveryInput<'_>) -> BTreeSet<DirectoryRole> {
    let mut roles = BTreeSet::new();
    if input.classification.classification == Classification::Docs {
        roles.insert(DirectoryRole::Docs);
    }
    let text = input.issue.text().to_lowercase();
    let cues: &[(&[&str], DirectoryRole)] = &[
        (&["component", "button", "modal", "input", "field", "widget"], DirectoryRole::Components),
        (&["hook", "composable"], DirectoryRole::Hooks),
        (&["style", "css", "color", "colour", "theme", "layout"], DirectoryRole::Styles),
        (&["endpoint", "api route", "handler"], DirectoryRole::Api),
        (&["service", "client", "request"], DirectoryRole::Services),
        (&["store", "state", "reducer"], DirectoryRole::Store),
        (&["type", "interface", "schema"], DirectoryRole::Types),
        (&["readme", "documentation", "docs"], DirectoryRole::Docs),
    ];
    for (words, role) in cues {
        if words.iter().any(|w| text.contains(w)) {
            roles.insert(*role);
        }
    }
    roles
}

/// Lowercase alphanumerics only, so `login-form`, `LoginForm` and `login_form` agree.
fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Distinct significant words of the issue, squashed.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_')) {
        let word = squash(raw);
        if word.len() < 3 || word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            out.push(word);
        }
    }
    out
}

fn is_text_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
        && !path.ends_with("package-lock.json")
        && !path.ends_with(".min.js")
}

/// Resolve a relative or `@/` import from `from` to a tree path.
fn resolve_import(tree: &RepoTree, from: &str, spec: &str) -> Option<String> {
    let base = if let Some(rest) = spec.strip_prefix("@/").or_else(|| spec.strip_prefix("~/")) {
        format!("src/{}", rest)
    } else if spec.starts_with("./") || spec.starts_with("../") {
        let dir = match from.rfind('/') {
            Some(idx) => &from[..idx],
            None => "",
        };
        join_relative(dir, spec)?
    } else {
        return None;
    };
    IMPORT_SUFFIXES
        .iter()
        .map(|suffix| format!("{}{}", base, suffix))
        .find(|candidate| tree.contains(candidate))
}

fn join_relative(dir: &str, spec: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

#[derive(Debug, Deserialize)]
struct ModelSuggestion {
    #[serde(default)]
    files: Vec<String>,
}

/// Asks the generator which files matter. Failures only cost the suggestions.
#[async_trait]
pub trait ModelAssist: Send + Sync {
    async fn suggest(&self, issue: &Issue, listing: &[&str]) -> Vec<String>;
}

/// [`ModelAssist`] over any [`TextGenerator`].
pub struct GeneratorAssist<'a> {
    pub generator: &'a dyn TextGenerator,
    pub params: &'a GenerationParams,
}

#[async_trait]
impl ModelAssist for GeneratorAssist<'_> {
    async fn suggest(&self, issue: &Issue, listing: &[&str]) -> Vec<String> {
        let prompt = format!(
            "Which files in this repository most likely need to change to resolve the issue?\n\
             Respond with JSON only: {{\"files\": [\"path\", ...]}} using at most 5 paths from the list.\n\n\
             ## Issue #{}: {}\n{}\n\n## Files\n{}\n",
            issue.id,
            issue.title,
            issue.body,
            listing.join("\n")
        );
        let response = match self.generator.generate(&prompt, self.params).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "model-assisted discovery failed, continuing without it");
                return Vec::new();
            }
        };
        extract_json_object(&response)
            .and_then(|json| serde_json::from_str::<ModelSuggestion>(json).ok())
            .map(|s| s.files)
            .unwrap_or_else(|| {
                warn!("model-assisted discovery returned no usable file list");
                Vec::new()
            })
    }
}

pub struct FileDiscovery {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
    max_files: usize,
    provider: Provider,
}

impl FileDiscovery {
    pub fn new(max_files: usize, provider: Provider) -> Self {
        Self {
            strategies: vec![
                Box::new(ExplicitMentions),
                Box::new(ClassifierHints),
                Box::new(SemanticMatch),
                Box::new(ConventionMatch),
            ],
            max_files,
            provider,
        }
    }

    /// Run every strategy and return candidates fitted to `budget`.
    /// An empty result means nothing relevant was found.
    #[instrument(skip_all, fields(issue = input.issue.id, budget = budget.limit()))]
    pub async fn discover(
        &self,
        input: &DiscoveryInput<'_>,
        assist: &dyn ModelAssist,
        budget: &mut TokenBudget,
    ) -> Vec<DiscoveredFile> {
        let mut candidates = Candidates::default();
        for strategy in &self.strategies {
            let before = candidates.len();
            info_span!("strategy", name = strategy.name()).in_scope(|| {
                strategy.discover(input, &mut candidates);
                debug!(added = candidates.len() - before, "strategy finished");
            });
        }

        if candidates.len() < MODEL_ASSIST_THRESHOLD {
            self.model_assisted(input, assist, &mut candidates)
                .instrument(info_span!("strategy", name = "model"))
                .await;
        }

        self.expand_imports(input.tree, &mut candidates);

        let ranked = candidates.ranked();
        let selected = self.select(input.tree, &ranked, budget);
        info!(
            candidates = ranked.len(),
            selected = selected.len(),
            tokens = budget.used(),
            "file discovery finished"
        );
        selected
    }

    async fn model_assisted(
        &self,
        input: &DiscoveryInput<'_>,
        assist: &dyn ModelAssist,
        candidates: &mut Candidates,
    ) {
        let listing: Vec<&str> = input
            .tree
            .entries()
            .iter()
            .map(|e| e.path.as_str())
            .filter(|p| is_text_file(p))
            .take(MODEL_LISTING_LIMIT)
            .collect();
        if listing.is_empty() {
            return;
        }
        for path in assist.suggest(input.issue, &listing).await {
            match input.tree.get(path.trim_start_matches("./")) {
                Some(entry) => candidates.award(&entry.path, MODEL_WEIGHT, "model suggestion"),
                None => debug!(path = %path, "ignoring suggested path not in tree"),
            }
        }
    }

    /// Follow local imports of the top candidates.
    fn expand_imports(&self, tree: &RepoTree, candidates: &mut Candidates) {
        let sources: Vec<String> = candidates
            .ranked()
            .into_iter()
            .take(IMPORT_EXPANSION_SOURCES)
            .map(|c| c.path)
            .filter(|p| is_script_file(p))
            .collect();
        for source in sources {
            let Ok(content) = tree.read(&source) else {
                continue;
            };
            for spec in extract_imports(&content) {
                if let Some(target) = resolve_import(tree, &source, &spec) {
                    if target != source {
                        candidates.award(&target, IMPORT_WEIGHT, format!("imported by {}", source));
                    }
                }
            }
        }
    }

    /// Validate ranked candidates against the tree and fit them into the
    /// budget. The top `max_files` readable candidates are admitted smallest
    /// first; a file larger than half the budget is reserved at half the
    /// budget and compressed later.
    pub fn select(
        &self,
        tree: &RepoTree,
        ranked: &[FileCandidate],
        budget: &mut TokenBudget,
    ) -> Vec<DiscoveredFile> {
        let per_file_cap = (budget.limit() / 2).max(1);
        let mut pool: Vec<DiscoveredFile> = Vec::new();
        for candidate in ranked {
            if pool.len() >= self.max_files {
                break;
            }
            let content = match tree.read(&candidate.path) {
                Ok(content) => content,
                Err(e) => {
                    debug!(path = %candidate.path, error = %e, "dropping unreadable candidate");
                    continue;
                }
            };
            let tokens = estimate_tokens(&content, self.provider);
            pool.push(DiscoveredFile {
                path: candidate.path.clone(),
                score: candidate.score,
                reasons: candidate.reasons.clone(),
                tokens,
                allotted: tokens.min(per_file_cap),
            });
        }

        let mut by_size: Vec<DiscoveredFile> = pool;
        by_size.sort_by(|a, b| a.allotted.cmp(&b.allotted).then_with(|| b.score.cmp(&a.score)));
        let mut selected = Vec::new();
        for file in by_size {
            match budget.consume(file.allotted) {
                Ok(()) => selected.push(file),
                Err(e) => debug!(path = %file.path, error = %e, "candidate does not fit budget"),
            }
        }
        selected.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        selected
    }
}
