use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use super::types::{SecurityCategory, SecurityMatch, SecurityReport};
use crate::config::{ConfigError, SecurityConfig};

/// Security Gate
///
/// Pure pattern checks that decide whether an issue may be touched by
/// automation at all:
/// - Sensitive keywords (credentials, secrets, tokens, infra terms)
/// - Sensitive paths (.env files, keys/certificates, CI workflows, IaC)
/// - Blocked change types (migrations, CI/CD pipelines, infra config)
///
/// All three sets run over the issue text and over every candidate path.
pub struct SecurityGate {
    keywords: Vec<GatePattern>,
    paths: Vec<GatePattern>,
    change_types: Vec<GatePattern>,
    secrets: Vec<GatePattern>,
}

struct GatePattern {
    regex: Regex,
    label: String,
}

const KEYWORD_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\b(?:passwords?|passwd|credentials?)\b", "credentials"),
    (r"(?i)\bsecrets?\b", "secrets"),
    (
        r"(?i)\b(?:api|access|auth|bearer|refresh|secret|session)[ _-]?(?:keys?|tokens?)\b",
        "API keys / tokens",
    ),
    (
        r"(?i)\b(?:private|ssh|encryption|signing)[ _-]?keys?\b",
        "private keys",
    ),
    (r"(?i)\b(?:oauth2?|jwt|saml|sso)\b", "authentication"),
    (r"(?i)\b(?:certificates?|ssl|tls)\b", "certificates"),
    (r"(?i)\b(?:aws|gcp|azure|iam|firewall|vpc)\b", "infrastructure"),
    (r"AKIA[0-9A-Z]{16}", "AWS access key"),
];

const PATH_PATTERNS: &[(&str, &str)] = &[
    (
        r"(?i)(?:^|[^A-Za-z0-9_])\.env(?:\.[A-Za-z0-9_-]+)?\b",
        "environment file",
    ),
    (
        r"(?i)[\w-]+\.(?:pem|key|p12|pfx|crt|cer|jks|keystore)(?:$|[\s`'),;])",
        "key / certificate file",
    ),
    (
        r"(?i)\.github/workflows/|\.gitlab-ci\.ya?ml|jenkinsfile|\.circleci/|azure-pipelines\.ya?ml",
        "CI/CD configuration",
    ),
    (
        r"(?im)(?:^|[/\s`'])(?:terraform|infra|infrastructure|k8s|kubernetes|helm|ansible|deploy)/",
        "infrastructure-as-code directory",
    ),
    (
        r"(?i)\.tf(?:vars)?\b|\bdockerfile\b|docker-compose\.ya?ml",
        "container / IaC definition",
    ),
];

const CHANGE_TYPE_PATTERNS: &[(&str, &str)] = &[
    (
        r"(?i)\b(?:database|db|schema)\s+migrations?\b|\bmigrations?/|\balter\s+table\b|\bdrop\s+(?:table|column)\b",
        "database migration",
    ),
    (
        r"(?i)\bci\s*/\s*cd\b|\b(?:ci|cd|deploy(?:ment)?|release)\s+pipelines?\b|\bgithub\s+actions?\b|\bworkflow\s+files?\b",
        "CI/CD pipeline change",
    ),
    (
        r"(?i)\b(?:infrastructure|terraform|kubernetes|k8s|helm\s+charts?|load\s+balancers?|nginx\s+config(?:uration)?)\b",
        "infrastructure configuration",
    ),
];

/// Secrets written into code by a proposed edit.
const HARDCODED_SECRET_PATTERNS: &[(&str, &str)] = &[
    (
        r#"(?i)\b(?:password|passwd|api_?key|secret|token)\s*[:=]\s*["'][^"'\s]{4,}["']"#,
        "hardcoded secret",
    ),
    (r"AKIA[0-9A-Z]{16}", "AWS access key"),
    (
        r"-----BEGIN (?:RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----",
        "private key material",
    ),
];

fn compile_builtin(patterns: &[(&str, &str)]) -> Vec<GatePattern> {
    patterns
        .iter()
        .map(|(pattern, label)| GatePattern {
            regex: Regex::new(pattern).expect("built-in gate pattern should compile"),
            label: label.to_string(),
        })
        .collect()
}

fn compile_custom(
    section: &'static str,
    patterns: &[String],
) -> Result<Vec<GatePattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map(|regex| GatePattern {
                    regex,
                    label: format!("custom pattern `{}`", pattern),
                })
                .map_err(|e| ConfigError::InvalidPattern {
                    section,
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

impl SecurityGate {
    pub fn new() -> Self {
        Self {
            keywords: compile_builtin(KEYWORD_PATTERNS),
            paths: compile_builtin(PATH_PATTERNS),
            change_types: compile_builtin(CHANGE_TYPE_PATTERNS),
            secrets: compile_builtin(HARDCODED_SECRET_PATTERNS),
        }
    }

    /// Built-in patterns extended with the `[security]` config section.
    pub fn with_config(config: &SecurityConfig) -> Result<Self, ConfigError> {
        let mut gate = Self::new();
        gate.keywords
            .extend(compile_custom("security.keywords", &config.keywords)?);
        gate.paths
            .extend(compile_custom("security.paths", &config.paths)?);
        gate.change_types
            .extend(compile_custom("security.change_types", &config.change_types)?);
        Ok(gate)
    }

    fn scan(&self, subject: &str, path: Option<&str>) -> Vec<SecurityMatch> {
        let sets = [
            (SecurityCategory::Keyword, &self.keywords),
            (SecurityCategory::Path, &self.paths),
            (SecurityCategory::ChangeType, &self.change_types),
        ];
        let mut found = Vec::new();
        for (category, patterns) in sets {
            for pattern in patterns {
                if let Some(m) = pattern.regex.find(subject) {
                    found.push(SecurityMatch {
                        category,
                        label: pattern.label.clone(),
                        matched: m.as_str().trim().to_string(),
                        path: path.map(str::to_string),
                    });
                }
            }
        }
        found
    }

    /// Check the issue text (title + body).
    pub fn check_text(&self, text: &str) -> Vec<SecurityMatch> {
        self.scan(text, None)
    }

    /// Check a single repository path.
    pub fn check_path(&self, path: &str) -> Vec<SecurityMatch> {
        self.scan(path, Some(path))
    }

    /// Run every check over the issue text and the candidate paths.
    pub fn evaluate<S: AsRef<str>>(&self, issue_text: &str, paths: &[S]) -> SecurityReport {
        let mut matches = self.check_text(issue_text);
        for path in paths {
            matches.extend(self.check_path(path.as_ref()));
        }
        let mut seen = HashSet::new();
        matches.retain(|m| seen.insert((m.category, m.label.clone(), m.path.clone())));
        debug!(
            matches = matches.len(),
            paths = paths.len(),
            "security gate evaluated"
        );
        SecurityReport { matches }
    }

    /// Scan lines a proposed edit introduces for hardcoded secrets.
    pub fn check_added_lines(
        &self,
        path: &str,
        original: Option<&str>,
        proposed: &str,
    ) -> Vec<SecurityMatch> {
        let existing: HashSet<&str> = original
            .map(|o| o.lines().map(str::trim).collect())
            .unwrap_or_default();
        let mut findings = Vec::new();
        for line in proposed.lines() {
            if existing.contains(line.trim()) {
                continue;
            }
            for pattern in &self.secrets {
                if let Some(m) = pattern.regex.find(line) {
                    findings.push(SecurityMatch {
                        category: SecurityCategory::Keyword,
                        label: pattern.label.clone(),
                        matched: m.as_str().to_string(),
                        path: Some(path.to_string()),
                    });
                    break;
                }
            }
        }
        findings
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new()
    }
}
