//! Pull structured JSON out of free-form model responses.

/// Strip a surrounding markdown code fence, if any.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Extract a JSON fragment between the first `open` and the last `close`.
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// The outermost JSON object in a response, fences removed.
pub fn extract_json_object(response: &str) -> Option<&str> {
    extract_json_fragment(strip_markdown_fences(response), '{', '}')
}

/// Truncate for logs and error messages without splitting a character.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
