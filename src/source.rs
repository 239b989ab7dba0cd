//! Regex-level helpers over source text shared by discovery, the
//! architecture validator and the hallucination check.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static IMPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:import|export)\b[^'"\n]*?\bfrom\s*['"]([^'"]+)['"]"#)
        .expect("IMPORT_FROM_RE regex should compile")
});

static IMPORT_BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s*['"]([^'"]+)['"]"#).expect("IMPORT_BARE_RE regex should compile")
});

static REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"]+)['"]\s*\)"#)
        .expect("REQUIRE_RE regex should compile")
});

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)\b(?:function\*?|class|interface|type|enum|const|let|var|def|fn|struct|trait)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("IDENTIFIER_RE regex should compile")
});

static EXPORT_NAMED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*export\s+(?:declare\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("EXPORT_NAMED_RE regex should compile")
});

static EXPORT_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*export\s+default\s+(?:async\s+)?(?:function\*?\s+|class\s+)?([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("EXPORT_DEFAULT_RE regex should compile")
});

/// Keywords that `export default` may be followed by without naming anything.
const ANONYMOUS_DEFAULTS: &[&str] = &["function", "class", "async"];

/// Module specifiers imported by a JS/TS-family file, in order of appearance.
pub fn extract_imports(content: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut imports = Vec::new();
    for re in [&*IMPORT_FROM_RE, &*IMPORT_BARE_RE, &*REQUIRE_RE] {
        for caps in re.captures_iter(content) {
            let spec = caps[1].to_string();
            if seen.insert(spec.clone()) {
                imports.push(spec);
            }
        }
    }
    imports
}

/// Declared names (functions, classes, consts, types) in a source file.
pub fn extract_identifiers(content: &str) -> BTreeSet<String> {
    IDENTIFIER_RE
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .filter(|name| name.len() > 1)
        .collect()
}

/// Exported names; a named default export is reported as well.
pub fn extract_exports(content: &str) -> Vec<String> {
    let mut exports: Vec<String> = EXPORT_NAMED_RE
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .collect();
    for caps in EXPORT_DEFAULT_RE.captures_iter(content) {
        let name = &caps[1];
        if !ANONYMOUS_DEFAULTS.contains(&name) && !exports.iter().any(|e| e == name) {
            exports.push(name.to_string());
        }
    }
    exports
}

/// Lower-cased extension of a path, without the dot.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(name[idx + 1..].to_ascii_lowercase()),
    }
}

/// Files carrying static types (or markup with typed script blocks).
pub fn is_typed_file(path: &str) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("ts" | "tsx" | "mts" | "cts" | "vue" | "svelte")
    )
}

/// Files whose imports can be followed.
pub fn is_script_file(path: &str) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("ts" | "tsx" | "mts" | "cts" | "js" | "jsx" | "mjs" | "cjs" | "vue" | "svelte")
    )
}
