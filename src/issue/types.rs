use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Path-like tokens: optional directories, a file name and an extension.
static PATH_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[\s`'\x22(\[])((?:\./)?[A-Za-z0-9_.@-]*(?:/[A-Za-z0-9_.@\[\]-]+)*\.[A-Za-z][A-Za-z0-9]{0,7})\b",
    )
    .expect("PATH_MENTION_RE regex should compile")
});

/// An issue as reported on the tracker. Read-only input to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number (e.g., 42)
    #[serde(alias = "number")]
    pub id: u64,
    pub title: String,
    /// Markdown body; GitHub sends null for empty bodies
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Author's GitHub login
    #[serde(default)]
    pub author: String,
}

impl Issue {
    /// Title and body joined, the text every pattern check runs over.
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }

    /// File paths written out in the title or body, in order of appearance.
    pub fn mentioned_paths(&self) -> Vec<String> {
        let text = self.text();
        let mut seen = Vec::new();
        for caps in PATH_MENTION_RE.captures_iter(&text) {
            let path = caps[1].trim_start_matches("./").to_string();
            if !seen.contains(&path) {
                seen.push(path);
            }
        }
        seen
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Represents the parsed components of a GitHub issue URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueUrl {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}
