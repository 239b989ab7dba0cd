use regex::Regex;
use serde::Serialize;

use crate::source::{extract_exports, extract_imports};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub path: String,
    pub message: String,
    pub suggestion: String,
}

/// A rule evaluated independently against each proposed file.
pub trait ArchitectureRule: Send + Sync {
    fn id(&self) -> &str;

    fn severity(&self) -> Severity;

    fn applies_to(&self, path: &str) -> bool;

    fn evaluate(&self, path: &str, content: &str) -> Option<Violation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingConvention {
    PascalCase,
    CamelCase,
}

impl NamingConvention {
    pub fn matches(&self, name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        let rest_ok = name.chars().all(|c| c.is_ascii_alphanumeric());
        match self {
            NamingConvention::PascalCase => first.is_ascii_uppercase() && rest_ok,
            NamingConvention::CamelCase => first.is_ascii_lowercase() && rest_ok,
        }
    }
}

impl std::fmt::Display for NamingConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingConvention::PascalCase => write!(f, "PascalCase"),
            NamingConvention::CamelCase => write!(f, "camelCase"),
        }
    }
}

/// What a declarative rule checks.
#[derive(Debug, Clone)]
pub enum RuleCheck {
    /// Content must not match the pattern
    ForbiddenContent(Regex),
    /// None of these modules (or their subpaths) may be imported
    ForbiddenImport(Vec<String>),
    /// This module must be imported
    RequiredImport(String),
    /// Exported names must follow the convention
    ExportNaming(NamingConvention),
}

/// Rule built from data: path scope, check and messages.
#[derive(Debug, Clone)]
pub struct DeclarativeRule {
    pub id: String,
    pub severity: Severity,
    pub scope: Regex,
    pub exclude: Option<Regex>,
    pub check: RuleCheck,
    pub message: String,
    pub suggestion: String,
}

/// True when `import` is `module` or one of its subpaths.
fn import_matches(import: &str, module: &str) -> bool {
    import == module
        || import
            .strip_prefix(module)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl DeclarativeRule {
    fn violation(&self, path: &str, detail: String) -> Violation {
        Violation {
            rule_id: self.id.clone(),
            severity: self.severity,
            path: path.to_string(),
            message: format!("{}: {}", self.message, detail),
            suggestion: self.suggestion.clone(),
        }
    }
}

impl ArchitectureRule for DeclarativeRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn applies_to(&self, path: &str) -> bool {
        self.scope.is_match(path) && !self.exclude.as_ref().is_some_and(|ex| ex.is_match(path))
    }

    fn evaluate(&self, path: &str, content: &str) -> Option<Violation> {
        match &self.check {
            RuleCheck::ForbiddenContent(pattern) => {
                let line = content.lines().position(|l| pattern.is_match(l))?;
                Some(self.violation(path, format!("line {}", line + 1)))
            }
            RuleCheck::ForbiddenImport(modules) => {
                let hits: Vec<String> = extract_imports(content)
                    .into_iter()
                    .filter(|i| modules.iter().any(|m| import_matches(i, m)))
                    .collect();
                if hits.is_empty() {
                    None
                } else {
                    Some(self.violation(path, format!("imports {}", hits.join(", "))))
                }
            }
            RuleCheck::RequiredImport(module) => {
                if extract_imports(content)
                    .iter()
                    .any(|i| import_matches(i, module))
                {
                    None
                } else {
                    Some(self.violation(path, format!("missing import of {}", module)))
                }
            }
            RuleCheck::ExportNaming(convention) => {
                let bad: Vec<String> = extract_exports(content)
                    .into_iter()
                    .filter(|name| !convention.matches(name))
                    .collect();
                if bad.is_empty() {
                    None
                } else {
                    Some(self.violation(
                        path,
                        format!("exports not in {}: {}", convention, bad.join(", ")),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(check: RuleCheck) -> DeclarativeRule {
        DeclarativeRule {
            id: "test-rule".to_string(),
            severity: Severity::Error,
            scope: Regex::new(r"^src/components/").unwrap(),
            exclude: Some(Regex::new(r"\.test\.").unwrap()),
            check,
            message: "not allowed".to_string(),
            suggestion: "do something else".to_string(),
        }
    }

    #[test]
    fn test_scope_and_exclude() {
        let r = rule(RuleCheck::ForbiddenContent(Regex::new("x").unwrap()));
        assert!(r.applies_to("src/components/Button.tsx"));
        assert!(!r.applies_to("src/components/Button.test.tsx"));
        assert!(!r.applies_to("src/pages/index.tsx"));
    }

    #[test]
    fn test_forbidden_import_matches_subpaths_only() {
        let r = rule(RuleCheck::ForbiddenImport(vec!["axios".to_string()]));
        let v = r
            .evaluate("src/components/A.tsx", "import axios from 'axios/dist';\n")
            .unwrap();
        assert!(v.message.contains("axios/dist"));
        assert!(r
            .evaluate("src/components/A.tsx", "import x from 'axios-mock';\n")
            .is_none());
    }

    #[test]
    fn test_forbidden_content_reports_line() {
        let r = rule(RuleCheck::ForbiddenContent(
            Regex::new(r"\bfetch\s*\(").unwrap(),
        ));
        let v = r
            .evaluate("src/components/A.tsx", "const a = 1;\nfetch('/api');\n")
            .unwrap();
        assert!(v.message.ends_with("line 2"));
    }

    #[test]
    fn test_required_import() {
        let r = rule(RuleCheck::RequiredImport("@angular/core".to_string()));
        assert!(r
            .evaluate("a.ts", "import { Component } from '@angular/core';")
            .is_none());
        assert!(r.evaluate("a.ts", "export class A {}").is_some());
    }

    #[test]
    fn test_export_naming() {
        let r = rule(RuleCheck::ExportNaming(NamingConvention::PascalCase));
        assert!(r
            .evaluate("a.tsx", "export function Button() {}\nexport default Button;")
            .is_none());
        let v = r.evaluate("a.tsx", "export const useThing = 1;").unwrap();
        assert!(v.message.contains("useThing"));
        assert!(NamingConvention::CamelCase.matches("useThing"));
        assert!(!NamingConvention::CamelCase.matches("Use_thing"));
    }
}
