//! The structured result the generator must return for a fix.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::PromptError;
use crate::changes::{FileChange, RawFileChange};
use crate::llm::parse::{extract_json_object, truncate_str};

/// Output contract, compact form.
pub const CONTRACT_COMPACT: &str = r#"Respond with one JSON object and nothing else:
{"changes":[{"path":"...","summary":"...","search_replace":[{"search":"exact text","replace":"new text"}]}],"commit_message":"..."}
Per change use exactly one of: "search_replace" (preferred), "insert" {"text","anchor_line"}, "patch" (unified diff), "content" (new files only)."#;

/// Output contract, full form.
pub const CONTRACT_STANDARD: &str = r#"## Output contract
Respond with a single JSON object and nothing else:

{
  "changes": [
    {
      "path": "relative/path/to/file",
      "summary": "one line describing the change",
      "search_replace": [
        {"search": "exact existing text", "replace": "replacement text", "replace_all": false}
      ]
    }
  ],
  "commit_message": "short imperative summary"
}

Each change uses exactly ONE strategy field:
- "search_replace": list of exact find/replace pairs. Preferred. Each "search" must appear exactly once in the file unless "replace_all" is true; copy it verbatim including indentation.
- "insert": {"text": "...", "anchor_line": N} inserts text after line N (0 = top of file).
- "patch": a unified diff for the file.
- "content": the complete file. Only for new files; never rewrite an existing file this way.

Change only what the issue requires. Do not touch tests, CI, secrets or environment files."#;

/// A parsed, strategy-checked plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditPlan {
    pub changes: Vec<FileChange>,
    pub commit_message: String,
}

impl EditPlan {
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for change in &self.changes {
            if !paths.contains(&change.path) {
                paths.push(change.path.clone());
            }
        }
        paths
    }
}

#[derive(Debug, Deserialize)]
struct RawEditPlan {
    #[serde(default, alias = "edits", alias = "files")]
    changes: Vec<RawFileChange>,
    #[serde(default, alias = "commitMessage")]
    commit_message: Option<String>,
}

/// Parse generator output into an [`EditPlan`].
pub fn parse_edit_plan(raw: &str) -> Result<EditPlan, PromptError> {
    let json = extract_json_object(raw).ok_or_else(|| {
        PromptError::InvalidOutput(format!(
            "no JSON object in response: {:?}",
            truncate_str(raw.trim(), 120)
        ))
    })?;
    let plan: RawEditPlan = serde_json::from_str(json)
        .map_err(|e| PromptError::InvalidOutput(format!("edit plan does not match the contract: {}", e)))?;
    if plan.changes.is_empty() {
        return Err(PromptError::InvalidOutput("edit plan contains no changes".to_string()));
    }

    let changes = plan
        .changes
        .into_iter()
        .map(FileChange::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let commit_message = match plan.commit_message.map(|m| m.trim().to_string()) {
        Some(message) if !message.is_empty() => message,
        _ => {
            warn!("edit plan has no commit message, using the first change summary");
            changes
                .iter()
                .map(|c| c.summary.trim())
                .find(|s| !s.is_empty())
                .unwrap_or("apply automated fix")
                .to_string()
        }
    };

    Ok(EditPlan {
        changes,
        commit_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{EditStrategy, FileEdit};
    use crate::errors::ErrorCode;

    #[test]
    fn test_parse_fenced_plan() {
        let raw = r#"Here is the fix:
```json
{
  "changes": [
    {"path": "README.md", "summary": "fix typo",
     "search_replace": [{"search": "teh", "replace": "the"}]}
  ],
  "commit_message": "correct typo in README"
}
```"#;
        let plan = parse_edit_plan(raw).unwrap();
        assert_eq!(plan.commit_message, "correct typo in README");
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].edit.strategy(), EditStrategy::SearchReplace);
        assert_eq!(plan.paths(), vec!["README.md"]);
    }

    #[test]
    fn test_camel_case_fields_and_missing_message() {
        let raw = r#"{"edits": [{"path": "a.ts", "summary": "add guard", "insert": {"text": "x", "anchorLine": 0}}]}"#;
        let plan = parse_edit_plan(raw).unwrap();
        assert_eq!(plan.commit_message, "add guard");
        assert!(matches!(plan.changes[0].edit, FileEdit::Insert(_)));
    }

    #[test]
    fn test_malformed_output_is_invalid() {
        let err = parse_edit_plan("I could not find the problem.").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAiOutput);
        let err = parse_edit_plan(r#"{"changes": []}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAiOutput);
        let err = parse_edit_plan(r#"{"changes": "nope"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAiOutput);
    }

    #[test]
    fn test_change_without_strategy_is_no_strategy() {
        let err = parse_edit_plan(r#"{"changes": [{"path": "a.ts", "summary": "?"}], "commit_message": "m"}"#)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoStrategy);
    }
}
