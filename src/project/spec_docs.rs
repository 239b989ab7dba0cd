//! Best-effort extraction of architecture rules from prose documents.
//!
//! Every extractor is a regex over single sentences. Nothing here fails: a
//! document that yields no matches simply contributes no rules.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::types::{
    DataFlowRule, Directive, DirectoryNote, LayerRule, PresentationalRule, SpecRules,
};
use crate::repo::RepoTree;

/// At most this many documents are parsed per run.
const MAX_DOCUMENTS: usize = 5;

/// File-name fragments that mark a document as architecture guidance.
const DOC_NAME_HINTS: &[&str] = &[
    "architecture",
    "design",
    "conventions",
    "guidelines",
    "structure",
    "adr",
];

static LAYER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:the\s+)?([A-Za-z][\w /-]{1,40}?)\s+layer\s*(?::|-|is responsible for|handles|contains|owns)\s*(.+)$",
    )
    .expect("LAYER_RE regex should compile")
});

static PRESENTATIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:presentational|dumb|pure[- ]ui|stateless|display[- ]only)\b")
        .expect("PRESENTATIONAL_RE regex should compile")
});

static DATA_FLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:data[- ]fetching|fetching|api calls?|data access|data loading|network requests?)\b.*?\b(?:happens?|lives?|belongs?|is done|are made|occurs?|goes|is handled|are handled)\s+(?:only\s+)?(?:in|inside|within|through|via)\s+(.+)$",
    )
    .expect("DATA_FLOW_RE regex should compile")
});

static PROHIBITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:must not|mustn't|must never|should not|shouldn't|never|do not|don't|cannot|may not|not allowed to|forbidden)\b",
    )
    .expect("PROHIBITION_RE regex should compile")
});

static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:must|always|should|required to|shall)\b")
        .expect("REQUIREMENT_RE regex should compile")
});

static DIRECTORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)`?((?:\./)?[\w.@-]+(?:/[\w.@*-]+)*/?)`?\s+(?:contains|holds|is for|are for|stores|houses|is where)\s+(.+)$",
    )
    .expect("DIRECTORY_RE regex should compile")
});

static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("BACKTICK_RE regex should compile"));

static BARE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:src|app|lib|pages|components|packages)/[\w./*@-]*)")
        .expect("BARE_PATH_RE regex should compile")
});

/// Architecture documents in the tree, plus configured extras that exist.
pub fn discover_documents(tree: &RepoTree, extra: &[String]) -> Vec<String> {
    let mut docs: Vec<String> = extra
        .iter()
        .filter(|p| tree.contains(p))
        .cloned()
        .collect();
    for entry in tree.entries() {
        if docs.len() >= MAX_DOCUMENTS {
            break;
        }
        let name = entry.file_name().to_ascii_lowercase();
        if !(name.ends_with(".md") || name.ends_with(".mdx")) {
            continue;
        }
        let in_docs = entry.path.starts_with("docs/") || !entry.path.contains('/');
        if in_docs
            && DOC_NAME_HINTS.iter().any(|hint| name.contains(hint))
            && !docs.contains(&entry.path)
        {
            docs.push(entry.path.clone());
        }
    }
    docs.truncate(MAX_DOCUMENTS);
    docs
}

/// Read and parse every discovered document. Unreadable documents are skipped.
pub fn load_spec_rules(tree: &RepoTree, extra: &[String]) -> SpecRules {
    let mut rules = SpecRules::default();
    for path in discover_documents(tree, extra) {
        match tree.read(&path) {
            Ok(text) => {
                let parsed = parse_document(&path, &text);
                debug!(path = %path, rules = parsed.rule_count(), "parsed architecture document");
                merge(&mut rules, parsed);
            }
            Err(e) => debug!(path = %path, error = %e, "skipping unreadable document"),
        }
    }
    rules
}

fn merge(into: &mut SpecRules, from: SpecRules) {
    into.sources.extend(from.sources);
    into.layers.extend(from.layers);
    into.presentational.extend(from.presentational);
    into.data_flow.extend(from.data_flow);
    into.prohibitions.extend(from.prohibitions);
    into.requirements.extend(from.requirements);
    into.directories.extend(from.directories);
}

/// Split prose into sentences: one per line, lines split further on `. `.
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_code_block = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let stripped = trimmed
            .trim_start_matches(|c: char| c == '-' || c == '*' || c == '>' || c.is_ascii_digit())
            .trim_start_matches('.')
            .trim()
            .replace("**", "");
        for part in stripped.split(". ") {
            let sentence = part.trim().trim_end_matches('.').trim();
            if sentence.len() > 3 {
                out.push(sentence.to_string());
            }
        }
    }
    out
}

fn normalize_path(token: &str) -> String {
    token
        .trim_start_matches("./")
        .trim_end_matches("/**")
        .trim_end_matches("/*")
        .trim_end_matches('/')
        .to_string()
}

fn is_path_token(token: &str) -> bool {
    !token.contains(' ')
        && !token.starts_with('@')
        && (token.contains('/') || token.ends_with('/'))
}

/// Paths and other backticked terms named in a sentence.
fn references(sentence: &str) -> (Vec<String>, Vec<String>) {
    let mut paths = Vec::new();
    let mut terms = Vec::new();
    for caps in BACKTICK_RE.captures_iter(sentence) {
        let token = caps[1].trim();
        if is_path_token(token) {
            let path = normalize_path(token);
            if !path.is_empty() && !paths.contains(&path) {
                paths.push(path);
            }
        } else if !terms.iter().any(|t| t == token) {
            terms.push(token.to_string());
        }
    }
    let without_code = BACKTICK_RE.replace_all(sentence, " ");
    for caps in BARE_PATH_RE.captures_iter(&without_code) {
        let path = normalize_path(caps[1].trim_end_matches(|c: char| c == ',' || c == ')'));
        if !path.is_empty() && !paths.contains(&path) {
            paths.push(path);
        }
    }
    (paths, terms)
}

/// Extract rules from one document.
pub fn parse_document(source: &str, text: &str) -> SpecRules {
    let mut rules = SpecRules {
        sources: vec![source.to_string()],
        ..SpecRules::default()
    };

    for sentence in sentences(text) {
        let (paths, terms) = references(&sentence);

        if let Some(caps) = LAYER_RE.captures(&sentence) {
            rules.layers.push(LayerRule {
                name: caps[1].trim().to_string(),
                responsibility: caps[2].trim().to_string(),
            });
        }

        if PRESENTATIONAL_RE.is_match(&sentence) {
            rules.presentational.push(PresentationalRule {
                paths: paths.clone(),
                statement: sentence.clone(),
            });
        }

        if let Some(caps) = DATA_FLOW_RE.captures(&sentence) {
            let (tail_paths, _) = references(&caps[1]);
            let location = tail_paths
                .into_iter()
                .next()
                .unwrap_or_else(|| caps[1].trim().trim_matches('`').to_string());
            rules.data_flow.push(DataFlowRule {
                location,
                statement: sentence.clone(),
            });
        }

        if let Some(caps) = DIRECTORY_RE.captures(&sentence) {
            let path = normalize_path(&caps[1]);
            if caps[1].contains('/') && !path.is_empty() {
                rules.directories.push(DirectoryNote {
                    path,
                    description: caps[2].trim().to_string(),
                });
            }
        }

        let directive = Directive {
            statement: sentence.clone(),
            paths,
            terms,
        };
        if PROHIBITION_RE.is_match(&sentence) {
            rules.prohibitions.push(directive);
        } else if REQUIREMENT_RE.is_match(&sentence) {
            rules.requirements.push(directive);
        }
    }
    rules
}
