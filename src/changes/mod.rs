//! File Change Handler
//!
//! Applies an edit plan to the working copy. Every edit is computed in
//! memory first; files are only written once the whole plan has applied
//! cleanly, so a failing edit leaves the working copy untouched.

pub mod hallucination;
pub mod patch;

pub use hallucination::{HallucinationCheck, RewriteStats};
pub use patch::{apply_patch, PatchError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::errors::ErrorCode;
use crate::llm::parse::truncate_str;
use crate::repo::is_safe_relative;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{path}: search text not found: {search:?}")]
    SearchNotFound { path: String, search: String },

    #[error("{path}: search text matches {count} times, add context or set replace_all: {search:?}")]
    AmbiguousSearch {
        path: String,
        search: String,
        count: usize,
    },

    #[error("{path}: cannot insert after line {line}, file has {lines} lines")]
    InvalidLine {
        path: String,
        line: usize,
        lines: usize,
    },

    #[error("{path}: {source}")]
    Patch {
        path: String,
        #[source]
        source: PatchError,
    },

    #[error("{0}: edit names no strategy (search_replace, insert, patch or content)")]
    NoStrategy(String),

    #[error("{path}: suspected hallucinated rewrite ({reason}); use search_replace or patch for targeted edits")]
    SuspectedHallucination { path: String, reason: String },

    #[error("Refusing to edit unsafe path: {0}")]
    UnsafePath(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ApplyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApplyError::SearchNotFound { .. } | ApplyError::AmbiguousSearch { .. } => {
                ErrorCode::SearchNotFound
            }
            ApplyError::Patch {
                source: PatchError::Mismatch { .. },
                ..
            } => ErrorCode::SearchNotFound,
            ApplyError::Patch {
                source: PatchError::Parse(_),
                ..
            } => ErrorCode::InvalidAiOutput,
            ApplyError::InvalidLine { .. } => ErrorCode::InvalidLine,
            ApplyError::NoStrategy(_) => ErrorCode::NoStrategy,
            ApplyError::SuspectedHallucination { .. } => ErrorCode::ValidationFailed,
            ApplyError::UnsafePath(_) => ErrorCode::SecurityViolation,
            ApplyError::Io { .. } => ErrorCode::GitError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReplace {
    pub search: String,
    pub replace: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insertion {
    pub text: String,
    /// 1-based line the text goes after; 0 inserts at the top
    pub anchor_line: usize,
}

/// How one file is changed. Exactly one strategy per edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FileEdit {
    SearchReplace { edits: Vec<SearchReplace> },
    Insert(Insertion),
    Patch { diff: String },
    FullReplace { content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStrategy {
    SearchReplace,
    Insert,
    Patch,
    FullReplace,
}

impl std::fmt::Display for EditStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditStrategy::SearchReplace => write!(f, "search_replace"),
            EditStrategy::Insert => write!(f, "insert"),
            EditStrategy::Patch => write!(f, "patch"),
            EditStrategy::FullReplace => write!(f, "full_replace"),
        }
    }
}

impl FileEdit {
    pub fn strategy(&self) -> EditStrategy {
        match self {
            FileEdit::SearchReplace { .. } => EditStrategy::SearchReplace,
            FileEdit::Insert(_) => EditStrategy::Insert,
            FileEdit::Patch { .. } => EditStrategy::Patch,
            FileEdit::FullReplace { .. } => EditStrategy::FullReplace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    #[serde(flatten)]
    pub edit: FileEdit,
    pub summary: String,
}

/// One file edit as the generator writes it: any subset of strategy fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFileChange {
    pub path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, alias = "searchReplace")]
    pub search_replace: Option<Vec<SearchReplace>>,
    pub insert: Option<RawInsertion>,
    pub patch: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInsertion {
    pub text: String,
    #[serde(alias = "anchorLine", alias = "line", default)]
    pub anchor_line: usize,
}

impl TryFrom<RawFileChange> for FileChange {
    type Error = ApplyError;

    /// Pick the first populated strategy in priority order
    /// search_replace > insert > patch > content.
    fn try_from(raw: RawFileChange) -> Result<Self, Self::Error> {
        let RawFileChange {
            path,
            summary,
            search_replace,
            insert,
            patch,
            content,
        } = raw;
        let search_replace = search_replace.filter(|pairs| !pairs.is_empty());
        let given = [
            search_replace.is_some(),
            insert.is_some(),
            patch.is_some(),
            content.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        let edit = if let Some(edits) = search_replace {
            FileEdit::SearchReplace { edits }
        } else if let Some(ins) = insert {
            FileEdit::Insert(Insertion {
                text: ins.text,
                anchor_line: ins.anchor_line,
            })
        } else if let Some(diff) = patch {
            FileEdit::Patch { diff }
        } else if let Some(content) = content {
            FileEdit::FullReplace { content }
        } else {
            return Err(ApplyError::NoStrategy(path));
        };
        if given > 1 {
            warn!(path = %path, strategy = %edit.strategy(), "edit names several strategies, using the first");
        }
        Ok(FileChange {
            path,
            edit,
            summary,
        })
    }
}

/// The outcome of computing one file's edits, before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputedChange {
    pub path: String,
    /// Content before the plan; None for new files
    #[serde(skip)]
    pub original: Option<String>,
    #[serde(skip)]
    pub content: String,
    pub strategies: Vec<EditStrategy>,
    pub summary: String,
    pub created: bool,
}

pub struct FileChangeHandler {
    root: PathBuf,
    hallucination: HallucinationCheck,
}

impl FileChangeHandler {
    pub fn new(root: impl Into<PathBuf>, hallucination: HallucinationCheck) -> Self {
        Self {
            root: root.into(),
            hallucination,
        }
    }

    /// Apply one edit to `current` (None when the file does not exist yet).
    pub fn compute(&self, change: &FileChange, current: Option<&str>) -> Result<String, ApplyError> {
        let path = change.path.as_str();
        let base = current.unwrap_or("");
        match &change.edit {
            FileEdit::SearchReplace { edits } => apply_search_replace(path, base, edits),
            FileEdit::Insert(insertion) => apply_insertion(path, base, insertion),
            FileEdit::Patch { diff } => apply_patch(base, diff).map_err(|source| ApplyError::Patch {
                path: path.to_string(),
                source,
            }),
            FileEdit::FullReplace { content } => match current {
                Some(existing) => {
                    self.hallucination
                        .check(existing, content)
                        .map_err(|reason| ApplyError::SuspectedHallucination {
                            path: path.to_string(),
                            reason,
                        })?;
                    Ok(match_trailing_newline(existing, content.clone()))
                }
                None => Ok(content.clone()),
            },
        }
    }

    /// Compute every edit of a plan. Later edits to the same path apply on top
    /// of earlier ones. Edits that leave a file unchanged are dropped.
    #[instrument(skip_all, fields(edits = changes.len()))]
    pub fn compute_all(&self, changes: &[FileChange]) -> Result<Vec<ComputedChange>, ApplyError> {
        let mut computed: Vec<ComputedChange> = Vec::new();
        for change in changes {
            self.check_path(&change.path)?;
            let position = computed.iter().position(|c| c.path == change.path);
            let current = match position {
                Some(idx) => Some(computed[idx].content.clone()),
                None => self.read_existing(&change.path)?,
            };
            let content = self.compute(change, current.as_deref())?;
            debug!(path = %change.path, strategy = %change.edit.strategy(), "computed edit");

            match position {
                Some(idx) => {
                    let entry = &mut computed[idx];
                    entry.content = content;
                    entry.strategies.push(change.edit.strategy());
                    if !change.summary.is_empty() {
                        entry.summary = format!("{}; {}", entry.summary, change.summary);
                    }
                }
                None => computed.push(ComputedChange {
                    path: change.path.clone(),
                    created: current.is_none(),
                    original: current,
                    content,
                    strategies: vec![change.edit.strategy()],
                    summary: change.summary.clone(),
                }),
            }
        }

        computed.retain(|c| {
            let unchanged = c.original.as_deref() == Some(c.content.as_str());
            if unchanged {
                warn!(path = %c.path, "edit leaves file unchanged, dropping it");
            }
            !unchanged
        });
        Ok(computed)
    }

    /// Write computed contents, creating parent directories as needed.
    #[instrument(skip_all, fields(files = computed.len()))]
    pub fn write_all(&self, computed: &[ComputedChange]) -> Result<Vec<String>, ApplyError> {
        let mut written = Vec::with_capacity(computed.len());
        for change in computed {
            let full = self.root.join(&change.path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                    path: change.path.clone(),
                    source,
                })?;
            }
            std::fs::write(&full, &change.content).map_err(|source| ApplyError::Io {
                path: change.path.clone(),
                source,
            })?;
            written.push(change.path.clone());
        }
        info!(files = written.len(), "applied edits to working copy");
        Ok(written)
    }

    /// Delete files the plan created. A hard reset does not touch untracked
    /// files, so rollback removes them here.
    pub fn discard_created(&self, computed: &[ComputedChange]) {
        for change in computed.iter().filter(|c| c.created) {
            let full = self.root.join(&change.path);
            if let Err(e) = std::fs::remove_file(&full) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %change.path, error = %e, "could not remove created file");
                }
            }
        }
    }

    fn check_path(&self, path: &str) -> Result<(), ApplyError> {
        let normalized = path.trim_start_matches("./");
        if !is_safe_relative(path) || normalized == ".git" || normalized.starts_with(".git/") {
            return Err(ApplyError::UnsafePath(path.to_string()));
        }
        Ok(())
    }

    fn read_existing(&self, path: &str) -> Result<Option<String>, ApplyError> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Ok(None);
        }
        std::fs::read_to_string(&full)
            .map(Some)
            .map_err(|source| ApplyError::Io {
                path: path.to_string(),
                source,
            })
    }
}

fn apply_search_replace(
    path: &str,
    content: &str,
    edits: &[SearchReplace],
) -> Result<String, ApplyError> {
    let mut current = content.to_string();
    for edit in edits {
        if edit.search.is_empty() {
            if current.trim().is_empty() {
                current = edit.replace.clone();
                continue;
            }
            return Err(ApplyError::SearchNotFound {
                path: path.to_string(),
                search: String::new(),
            });
        }

        let count = current.matches(edit.search.as_str()).count();
        if count > 0 {
            if count > 1 && !edit.replace_all {
                return Err(ambiguous(path, &edit.search, count));
            }
            current = if edit.replace_all {
                current.replace(edit.search.as_str(), &edit.replace)
            } else {
                current.replacen(edit.search.as_str(), &edit.replace, 1)
            };
            continue;
        }

        let windows = whitespace_tolerant_matches(&current, &edit.search);
        match windows.len() {
            0 => {
                return Err(ApplyError::SearchNotFound {
                    path: path.to_string(),
                    search: truncate_str(&edit.search, 100).to_string(),
                })
            }
            n if n > 1 && !edit.replace_all => return Err(ambiguous(path, &edit.search, n)),
            _ => {}
        }
        let replacement = edit.replace.trim_end_matches('\n');
        for (start, end) in windows.into_iter().rev() {
            current.replace_range(start..end, replacement);
        }
    }
    Ok(current)
}

fn ambiguous(path: &str, search: &str, count: usize) -> ApplyError {
    ApplyError::AmbiguousSearch {
        path: path.to_string(),
        search: truncate_str(search, 100).to_string(),
        count,
    }
}

/// Byte ranges of line windows whose trimmed lines equal the trimmed lines of
/// `search`. Ranges cover whole lines without the final line break.
fn whitespace_tolerant_matches(content: &str, search: &str) -> Vec<(usize, usize)> {
    let wanted: Vec<&str> = {
        let all: Vec<&str> = search.lines().map(str::trim).collect();
        let first = all.iter().position(|l| !l.is_empty());
        let last = all.iter().rposition(|l| !l.is_empty());
        match (first, last) {
            (Some(f), Some(l)) => all[f..=l].to_vec(),
            _ => return Vec::new(),
        }
    };

    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for raw in content.split_inclusive('\n') {
        lines.push((offset, raw));
        offset += raw.len();
    }

    let mut found = Vec::new();
    let mut i = 0;
    while i + wanted.len() <= lines.len() {
        let hit = wanted
            .iter()
            .enumerate()
            .all(|(k, w)| lines[i + k].1.trim() == *w);
        if hit {
            let (start, _) = lines[i];
            let (last_start, last_raw) = lines[i + wanted.len() - 1];
            let end = last_start + last_raw.trim_end_matches(['\n', '\r']).len();
            found.push((start, end));
            i += wanted.len();
        } else {
            i += 1;
        }
    }
    found
}

fn apply_insertion(path: &str, content: &str, insertion: &Insertion) -> Result<String, ApplyError> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if insertion.anchor_line > lines.len() {
        return Err(ApplyError::InvalidLine {
            path: path.to_string(),
            line: insertion.anchor_line,
            lines: lines.len(),
        });
    }
    let split: usize = lines[..insertion.anchor_line].iter().map(|l| l.len()).sum();
    let mut text = insertion.text.clone();
    if !text.ends_with('\n') {
        text.push('\n');
    }

    let mut result = String::with_capacity(content.len() + text.len() + 1);
    result.push_str(&content[..split]);
    if split > 0 && !result.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(&text);
    result.push_str(&content[split..]);
    Ok(result)
}

/// Match the original's trailing-newline convention.
fn match_trailing_newline(original: &str, mut content: String) -> String {
    if original.ends_with('\n') {
        if !content.ends_with('\n') {
            content.push_str(if original.ends_with("\r\n") { "\r\n" } else { "\n" });
        }
    } else {
        while content.ends_with('\n') {
            content.pop();
            if content.ends_with('\r') {
                content.pop();
            }
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_tree;
    use std::path::Path;

    fn search_replace(path: &str, search: &str, replace: &str) -> FileChange {
        FileChange {
            path: path.to_string(),
            edit: FileEdit::SearchReplace {
                edits: vec![SearchReplace {
                    search: search.to_string(),
                    replace: replace.to_string(),
                    replace_all: false,
                }],
            },
            summary: "edit".to_string(),
        }
    }

    fn full_replace(path: &str, content: &str) -> FileChange {
        FileChange {
            path: path.to_string(),
            edit: FileEdit::FullReplace {
                content: content.to_string(),
            },
            summary: "rewrite".to_string(),
        }
    }

    fn handler(root: &Path) -> FileChangeHandler {
        FileChangeHandler::new(root, HallucinationCheck::default())
    }

    fn apply(
        handler: &FileChangeHandler,
        changes: &[FileChange],
    ) -> Result<Vec<ComputedChange>, ApplyError> {
        let computed = handler.compute_all(changes)?;
        handler.write_all(&computed)?;
        Ok(computed)
    }

    #[test]
    fn test_search_replace_typo() {
        let dir = write_tree(&[("README.md", "# Forms\n\nUse teh form builder.\n")]);
        let applied = apply(&handler(dir.path()), &[search_replace("README.md", "teh", "the")])
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].strategies, vec![EditStrategy::SearchReplace]);
        let written = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert_eq!(written, "# Forms\n\nUse the form builder.\n");
    }

    #[test]
    fn test_search_not_found_leaves_file_unmodified() {
        let original = "export const a = 1;\n";
        let dir = write_tree(&[("src/a.ts", original)]);
        let err = apply(&handler(dir.path()), &[search_replace("src/a.ts", "const b = 2;", "const b = 3;")])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SearchNotFound);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap(),
            original
        );
    }

    #[test]
    fn test_failure_in_later_edit_writes_nothing() {
        let dir = write_tree(&[("a.md", "alpha\n"), ("b.md", "beta\n")]);
        let err = apply(&handler(dir.path()), &[
                search_replace("a.md", "alpha", "ALPHA"),
                search_replace("b.md", "gamma", "GAMMA"),
            ])
            .unwrap_err();
        assert!(matches!(err, ApplyError::SearchNotFound { .. }));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.md")).unwrap(),
            "alpha\n"
        );
    }

    #[test]
    fn test_ambiguous_search_needs_replace_all() {
        let content = "let x = 1;\nlet x = 1;\n";
        let ambiguous = apply_search_replace(
            "a.js",
            content,
            &[SearchReplace {
                search: "let x = 1;".to_string(),
                replace: "let x = 2;".to_string(),
                replace_all: false,
            }],
        );
        assert!(matches!(
            ambiguous,
            Err(ApplyError::AmbiguousSearch { count: 2, .. })
        ));
        let all = apply_search_replace(
            "a.js",
            content,
            &[SearchReplace {
                search: "let x = 1;".to_string(),
                replace: "let x = 2;".to_string(),
                replace_all: true,
            }],
        )
        .unwrap();
        assert_eq!(all, "let x = 2;\nlet x = 2;\n");
    }

    #[test]
    fn test_whitespace_tolerant_search() {
        let content = "function f() {\n    if (a) {\n        go();\n    }\n}\n";
        let result = apply_search_replace(
            "f.js",
            content,
            &[SearchReplace {
                search: "if (a) {\n  go();\n}".to_string(),
                replace: "    if (a && b) {\n        go();\n    }\n".to_string(),
                replace_all: false,
            }],
        )
        .unwrap();
        assert_eq!(
            result,
            "function f() {\n    if (a && b) {\n        go();\n    }\n}\n"
        );
    }

    #[test]
    fn test_empty_search_creates_new_file() {
        let dir = write_tree(&[("README.md", "x\n")]);
        let applied = apply(&handler(dir.path()), &[search_replace("docs/new.md", "", "# New\n")])
            .unwrap();
        assert!(applied[0].created);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("docs/new.md")).unwrap(),
            "# New\n"
        );

        let err = apply_search_replace(
            "a.md",
            "not empty",
            &[SearchReplace {
                search: String::new(),
                replace: "x".to_string(),
                replace_all: false,
            }],
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SearchNotFound);
    }

    #[test]
    fn test_insert_after_line_and_at_top() {
        let content = "a\nb\nc\n";
        let after_two = apply_insertion(
            "x.txt",
            content,
            &Insertion {
                text: "inserted".to_string(),
                anchor_line: 2,
            },
        )
        .unwrap();
        assert_eq!(after_two, "a\nb\ninserted\nc\n");

        let top = apply_insertion(
            "x.txt",
            content,
            &Insertion {
                text: "first\n".to_string(),
                anchor_line: 0,
            },
        )
        .unwrap();
        assert_eq!(top, "first\na\nb\nc\n");

        let end_without_newline = apply_insertion(
            "x.txt",
            "a",
            &Insertion {
                text: "b".to_string(),
                anchor_line: 1,
            },
        )
        .unwrap();
        assert_eq!(end_without_newline, "a\nb\n");
    }

    #[test]
    fn test_insert_past_end_is_invalid_line() {
        let err = apply_insertion(
            "x.txt",
            "a\nb\n",
            &Insertion {
                text: "z".to_string(),
                anchor_line: 7,
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidLine);
        assert!(err.to_string().contains("file has 2 lines"));
    }

    #[test]
    fn test_hallucinated_rewrite_is_rejected() {
        let mut original = String::new();
        for i in 0..40 {
            original.push_str(&format!(
                "export function rule{}(v) {{\n  if (!v) {{\n    return 'required';\n  }}\n}}\n",
                i
            ));
        }
        let dir = write_tree(&[("src/rules.js", original.as_str())]);
        let mut hello = String::from("export default function App() {\n  return 'Hello, world';\n}\n");
        hello.push_str(&"\n".repeat(17));

        let err = apply(&handler(dir.path()), &[full_replace("src/rules.js", &hello)])
            .unwrap_err();
        assert!(matches!(err, ApplyError::SuspectedHallucination { .. }));
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/rules.js")).unwrap(),
            original
        );
    }

    #[test]
    fn test_full_replace_keeps_newline_convention() {
        let dir = write_tree(&[("a.txt", "old")]);
        let applied = handler(dir.path())
            .compute_all(&[full_replace("a.txt", "new\n")])
            .unwrap();
        assert_eq!(applied[0].content, "new");
    }

    #[test]
    fn test_unsafe_paths_are_refused() {
        let dir = write_tree(&[("a.txt", "x")]);
        for path in ["../outside.txt", "/etc/passwd", ".git/config"] {
            let err = apply(&handler(dir.path()), &[full_replace(path, "x")])
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::SecurityViolation, "{}", path);
        }
    }

    #[test]
    fn test_edits_to_same_file_stack() {
        let dir = write_tree(&[("a.txt", "one\ntwo\n")]);
        let computed = handler(dir.path())
            .compute_all(&[
                search_replace("a.txt", "one", "uno"),
                FileChange {
                    path: "a.txt".to_string(),
                    edit: FileEdit::Insert(Insertion {
                        text: "three".to_string(),
                        anchor_line: 2,
                    }),
                    summary: "append".to_string(),
                },
            ])
            .unwrap();
        assert_eq!(computed.len(), 1);
        assert_eq!(computed[0].content, "uno\ntwo\nthree\n");
        assert_eq!(computed[0].original.as_deref(), Some("one\ntwo\n"));
        assert_eq!(
            computed[0].strategies,
            vec![EditStrategy::SearchReplace, EditStrategy::Insert]
        );
    }

    #[test]
    fn test_unchanged_edits_are_dropped() {
        let dir = write_tree(&[("a.txt", "same\n")]);
        let computed = handler(dir.path())
            .compute_all(&[search_replace("a.txt", "same", "same")])
            .unwrap();
        assert!(computed.is_empty());
    }

    #[test]
    fn test_discard_created_removes_new_files_only() {
        let dir = write_tree(&[("keep.txt", "k\n")]);
        let h = handler(dir.path());
        let applied = apply(&h, &[
                full_replace("new/file.txt", "n\n"),
                search_replace("keep.txt", "k", "K"),
            ])
            .unwrap();
        h.discard_created(&applied);
        assert!(!dir.path().join("new/file.txt").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_raw_change_strategy_priority() {
        let raw: RawFileChange = serde_json::from_value(serde_json::json!({
            "path": "README.md",
            "summary": "fix typo",
            "content": "whole file",
            "search_replace": [{"search": "teh", "replace": "the"}]
        }))
        .unwrap();
        let change = FileChange::try_from(raw).unwrap();
        assert_eq!(change.edit.strategy(), EditStrategy::SearchReplace);

        let raw: RawFileChange = serde_json::from_value(serde_json::json!({
            "path": "a.ts",
            "insert": {"text": "x", "anchorLine": 3},
            "patch": "@@ -1 +1 @@\n-a\n+b\n"
        }))
        .unwrap();
        let change = FileChange::try_from(raw).unwrap();
        assert_eq!(
            change.edit,
            FileEdit::Insert(Insertion {
                text: "x".to_string(),
                anchor_line: 3
            })
        );

        let none = RawFileChange {
            path: "a.ts".to_string(),
            search_replace: Some(vec![]),
            ..RawFileChange::default()
        };
        let err = FileChange::try_from(none).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoStrategy);
    }

    #[test]
    fn test_patch_mismatch_maps_to_search_not_found() {
        let dir = write_tree(&[("a.txt", "one\n")]);
        let change = FileChange {
            path: "a.txt".to_string(),
            edit: FileEdit::Patch {
                diff: "@@ -1 +1 @@\n-two\n+2\n".to_string(),
            },
            summary: String::new(),
        };
        let err = apply(&handler(dir.path()), &[change]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SearchNotFound);
    }

    #[test]
    fn test_change_serializes_with_strategy_tag() {
        let json = serde_json::to_value(search_replace("README.md", "teh", "the")).unwrap();
        assert_eq!(json["strategy"], "search_replace");
        assert_eq!(json["edits"][0]["search"], "teh");
        assert_eq!(json["path"], "README.md");
    }
}
