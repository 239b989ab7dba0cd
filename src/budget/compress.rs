use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::debug;

use super::{estimate_tokens, BudgetError, Provider};
use crate::source::extension;

/// Lines kept verbatim when shrinking code: imports, exports, type and
/// function signatures.
static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:import\b|export\b|from\s+\S+\s+import\b|use\s|(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s|(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|type)\s|impl\b|interface\s|(?:abstract\s+)?class\s|(?:async\s+)?function\b|def\s|@\w+|(?:const|let)\s+\w+\s*(?::[^=]+)?=\s*(?:async\s*)?(?:\([^)]*\)|\w+)\s*=>)",
    )
    .expect("SIGNATURE_RE regex should compile")
});

/// Structural sections of single-file components, highest priority first.
const MARKUP_SECTIONS: &[&str] = &["script", "template", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Single-file components and pages with tag-delimited sections
    Markup,
    Code,
    Plain,
}

impl ContentKind {
    pub fn of(path: &str) -> ContentKind {
        match extension(path).as_deref() {
            Some("vue" | "svelte" | "html" | "htm" | "astro") => ContentKind::Markup,
            Some(
                "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" | "mts" | "cts" | "rs" | "py" | "go"
                | "java" | "kt",
            ) => ContentKind::Code,
            _ => ContentKind::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Content already fit
    None,
    StructuralSections,
    Signatures,
    LineTruncation,
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionStrategy::None => write!(f, "none"),
            CompressionStrategy::StructuralSections => write!(f, "structural-sections"),
            CompressionStrategy::Signatures => write!(f, "signatures"),
            CompressionStrategy::LineTruncation => write!(f, "line-truncation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub content: String,
    pub strategy: CompressionStrategy,
    /// Estimate of `content`; always within the requested budget
    pub tokens: usize,
    pub original_tokens: usize,
}

/// Shrink `content` to at most `budget` tokens using the strategy suited to
/// the file type, falling back to plain line truncation.
pub fn compress(
    path: &str,
    content: &str,
    budget: usize,
    provider: Provider,
) -> Result<Compressed, BudgetError> {
    let original_tokens = estimate_tokens(content, provider);
    if original_tokens <= budget {
        return Ok(Compressed {
            content: content.to_string(),
            strategy: CompressionStrategy::None,
            tokens: original_tokens,
            original_tokens,
        });
    }

    let kind = ContentKind::of(path);
    let attempt = match kind {
        ContentKind::Markup => keep_sections(content, budget, provider)
            .map(|c| (c, CompressionStrategy::StructuralSections)),
        ContentKind::Code => keep_signatures(path, content, budget, provider)
            .map(|c| (c, CompressionStrategy::Signatures)),
        ContentKind::Plain => None,
    };
    let (content, strategy) = match attempt {
        Some(found) => found,
        None => truncate_lines(content, budget, provider)
            .map(|c| (c, CompressionStrategy::LineTruncation))
            .ok_or_else(|| BudgetError::CompressionRejected {
                path: path.to_string(),
                budget,
            })?,
    };

    let tokens = estimate_tokens(&content, provider);
    debug!(path, original_tokens, tokens, budget, %strategy, "compressed file content");
    Ok(Compressed {
        content,
        strategy,
        tokens,
        original_tokens,
    })
}

/// Largest `k` in `0..n` for which `fits(k)` holds, given `fits` is monotone
/// (true up to some point, false afterwards). None when even `fits(0)` fails.
fn largest_fitting(n: usize, fits: impl Fn(usize) -> bool) -> Option<usize> {
    if n == 0 || !fits(0) {
        return None;
    }
    let (mut lo, mut hi) = (0usize, n - 1);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some(lo)
}

fn truncation_marker(omitted: usize) -> String {
    format!("... [{} lines truncated]", omitted)
}

/// Keep the longest line prefix that fits, followed by a truncation marker.
pub fn truncate_lines(content: &str, budget: usize, provider: Provider) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let render = |k: usize| {
        let mut out = lines[..k].join("\n");
        if k > 0 {
            out.push('\n');
        }
        out.push_str(&truncation_marker(lines.len() - k));
        out
    };
    let k = largest_fitting(lines.len(), |k| {
        estimate_tokens(&render(k), provider) <= budget
    })?;
    Some(render(k))
}

/// Keep every signature line; fill the rest of the budget with the longest
/// prefix of body lines.
fn keep_signatures(path: &str, content: &str, budget: usize, provider: Provider) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let is_signature: Vec<bool> = lines.iter().map(|l| SIGNATURE_RE.is_match(l)).collect();
    let comment = if extension(path).as_deref() == Some("py") {
        "#"
    } else {
        "//"
    };
    let marker = format!("{} ... function bodies truncated ...", comment);

    let render = |k: usize| {
        let mut out: Vec<&str> = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if i == k {
                out.push(&marker);
            }
            if i < k || is_signature[i] {
                out.push(line);
            }
        }
        out.join("\n")
    };
    let k = largest_fitting(lines.len(), |k| {
        estimate_tokens(&render(k), provider) <= budget
    })?;
    Some(render(k))
}

/// Reorder tag sections by priority and truncate from the lowest-priority end.
fn keep_sections(content: &str, budget: usize, provider: Provider) -> Option<String> {
    let sections: Vec<&str> = MARKUP_SECTIONS
        .iter()
        .filter_map(|tag| find_section(content, tag))
        .collect();
    if sections.is_empty() {
        return None;
    }
    let ordered = sections.join("\n\n");
    if estimate_tokens(&ordered, provider) <= budget {
        return Some(ordered);
    }
    truncate_lines(&ordered, budget, provider)
}

/// The text of the first `<tag ...>...</tag>` block, tags included.
fn find_section<'a>(content: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find(&open) {
        let start = search_from + rel;
        let after = content[start + open.len()..].chars().next();
        if matches!(after, Some('>') | Some(' ') | Some('\n') | Some('\t')) {
            let end = content[start..].find(&close)? + start + close.len();
            return Some(&content[start..end]);
        }
        search_from = start + open.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_code() -> String {
        let mut s = String::from("import React from \"react\";\nimport { api } from \"../api\";\n\n");
        for i in 0..40 {
            s.push_str(&format!("export function handler{}(value: number) {{\n", i));
            for j in 0..8 {
                s.push_str(&format!("  const step{} = value * {} + {};\n", j, i, j));
            }
            s.push_str("  return value;\n}\n\n");
        }
        s
    }

    #[test]
    fn test_content_that_fits_is_untouched() {
        let c = compress("a.ts", "const a = 1;", 100, Provider::OpenAi).unwrap();
        assert_eq!(c.strategy, CompressionStrategy::None);
        assert_eq!(c.content, "const a = 1;");
        assert_eq!(c.tokens, c.original_tokens);
    }

    #[test]
    fn test_code_keeps_signatures() {
        let code = long_code();
        let c = compress("src/handlers.ts", &code, 800, Provider::OpenAi).unwrap();
        assert_eq!(c.strategy, CompressionStrategy::Signatures);
        assert!(c.tokens <= 800);
        assert!(c.content.contains("import { api } from \"../api\";"));
        assert!(c.content.contains("export function handler39(value: number) {"));
        assert!(c.content.contains("function bodies truncated"));
    }

    #[test]
    fn test_code_falls_back_to_line_truncation_when_signatures_do_not_fit() {
        let code = long_code();
        let c = compress("src/handlers.ts", &code, 60, Provider::OpenAi).unwrap();
        assert_eq!(c.strategy, CompressionStrategy::LineTruncation);
        assert!(c.tokens <= 60);
    }

    #[test]
    fn test_markup_keeps_script_first() {
        let mut vue = String::from("<template>\n");
        for i in 0..200 {
            vue.push_str(&format!("  <div class=\"row-{}\">{{{{ item{} }}}}</div>\n", i, i));
        }
        vue.push_str("</template>\n\n<script setup lang=\"ts\">\nimport { ref } from 'vue';\nconst count = ref(0);\n</script>\n\n<style>\n.row { color: red; }\n</style>\n");
        let c = compress("src/components/List.vue", &vue, 300, Provider::OpenAi).unwrap();
        assert_eq!(c.strategy, CompressionStrategy::StructuralSections);
        assert!(c.tokens <= 300);
        assert!(c.content.starts_with("<script setup lang=\"ts\">"));
        assert!(c.content.contains("const count = ref(0);"));
    }

    #[test]
    fn test_plain_text_is_line_truncated() {
        let text = "lorem ipsum dolor sit amet\n".repeat(200);
        let c = compress("docs/notes.md", &text, 120, Provider::OpenAi).unwrap();
        assert_eq!(c.strategy, CompressionStrategy::LineTruncation);
        assert!(c.tokens <= 120);
        assert!(c.content.ends_with("lines truncated]"));
    }

    #[test]
    fn test_impossible_budget_is_rejected() {
        let text = "word ".repeat(500);
        let err = compress("notes.txt", &text, 2, Provider::OpenAi).unwrap_err();
        assert!(matches!(err, BudgetError::CompressionRejected { .. }));
    }

    #[test]
    fn test_result_never_exceeds_budget() {
        let code = long_code();
        for budget in [5, 20, 50, 100, 250, 500, 1_000, 5_000] {
            for path in ["a.ts", "a.vue", "a.md"] {
                if let Ok(c) = compress(path, &code, budget, Provider::Anthropic) {
                    assert!(c.tokens <= budget, "{} at {}: {}", path, budget, c.tokens);
                }
            }
        }
    }

    #[test]
    fn test_find_section_ignores_similar_tags() {
        let html = "<scripts>x</scripts>\n<script>let a = 1;</script>";
        assert_eq!(find_section(html, "script"), Some("<script>let a = 1;</script>"));
    }
}
