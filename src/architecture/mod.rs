pub mod rules;

pub use rules::{ArchitectureRule, DeclarativeRule, NamingConvention, RuleCheck, Severity, Violation};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::project::types::Directive;
use crate::project::{DirectoryRole, Framework, ProjectContext, SpecRules};

/// Modules that perform HTTP calls or data fetching.
pub const HTTP_MODULES: &[&str] = &[
    "axios",
    "ky",
    "got",
    "node-fetch",
    "cross-fetch",
    "isomorphic-fetch",
    "superagent",
    "swr",
    "@tanstack/react-query",
    "react-query",
    "@apollo/client",
    "graphql-request",
    "@angular/common/http",
];

const SCRIPT_FILES: &str = r"\.(?:[cm]?[jt]sx?|vue|svelte)$";
const TEST_FILES: &str = r"(?:\.(?:test|spec|stories)\.|(?:^|/)(?:__tests__|tests?)/)";

/// Registry of rules for one run. Built per project and passed by value.
pub struct RuleRegistry {
    rules: Vec<Box<dyn ArchitectureRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Framework defaults plus rules synthesized from architecture documents.
    pub fn for_project(ctx: &ProjectContext) -> Self {
        let mut registry = Self::new();
        for rule in framework_defaults(ctx.framework) {
            registry.register(Box::new(rule));
        }
        for rule in synthesize_rules(&ctx.spec_rules, ctx) {
            registry.register(Box::new(rule));
        }
        debug!(rules = registry.len(), framework = %ctx.framework, "built rule registry");
        registry
    }

    pub fn register(&mut self, rule: Box<dyn ArchitectureRule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[Box<dyn ArchitectureRule>] {
        &self.rules
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in rule pattern should compile")
}

fn declarative(
    id: &str,
    severity: Severity,
    scope: Regex,
    check: RuleCheck,
    message: &str,
    suggestion: &str,
) -> DeclarativeRule {
    DeclarativeRule {
        id: id.to_string(),
        severity,
        scope,
        exclude: Some(pattern(TEST_FILES)),
        check,
        message: message.to_string(),
        suggestion: suggestion.to_string(),
    }
}

/// Warning-level rules every project of a framework gets.
pub fn framework_defaults(framework: Framework) -> Vec<DeclarativeRule> {
    let mut rules = vec![
        declarative(
            "no-console-log",
            Severity::Warning,
            pattern(SCRIPT_FILES),
            RuleCheck::ForbiddenContent(pattern(r"\bconsole\.log\s*\(")),
            "Leftover console.log",
            "Remove debug logging or use the project's logger",
        ),
        declarative(
            "no-debugger",
            Severity::Warning,
            pattern(SCRIPT_FILES),
            RuleCheck::ForbiddenContent(pattern(r"^\s*debugger;?\s*$")),
            "Leftover debugger statement",
            "Remove the debugger statement",
        ),
    ];
    match framework {
        Framework::React | Framework::NextJs => {
            rules.push(declarative(
                "component-export-naming",
                Severity::Warning,
                pattern(r"(?:^|/)components/.*\.(?:tsx|jsx)$"),
                RuleCheck::ExportNaming(NamingConvention::PascalCase),
                "Component exports should be PascalCase",
                "Rename the exported component to PascalCase",
            ));
        }
        Framework::Vue | Framework::Svelte => {
            let scope = if framework == Framework::Vue {
                r"\.vue$"
            } else {
                r"\.svelte$"
            };
            rules.push(declarative(
                "no-direct-dom-access",
                Severity::Warning,
                pattern(scope),
                RuleCheck::ForbiddenContent(pattern(
                    r"\bdocument\.(?:getElementById|querySelector(?:All)?)\s*\(",
                )),
                "Direct DOM access in a component",
                "Use template refs instead of querying the document",
            ));
        }
        Framework::Angular => {
            rules.push(declarative(
                "angular-component-core-import",
                Severity::Warning,
                pattern(r"\.component\.ts$"),
                RuleCheck::RequiredImport("@angular/core".to_string()),
                "Angular component without @angular/core",
                "Declare the component with the @Component decorator",
            ));
        }
        Framework::Generic => {}
    }
    if framework == Framework::NextJs {
        rules.push(declarative(
            "api-route-no-react",
            Severity::Warning,
            pattern(r"^(?:src/)?(?:pages|app)/api/"),
            RuleCheck::ForbiddenImport(vec!["react".to_string(), "react-dom".to_string()]),
            "API route imports React",
            "Keep API routes free of UI code",
        ));
    }
    rules
}

/// `^(?:a|b)/` for a set of directory prefixes.
fn prefix_scope(paths: &[String]) -> Option<Regex> {
    if paths.is_empty() {
        return None;
    }
    let alternatives: Vec<String> = paths.iter().map(|p| regex::escape(p)).collect();
    Regex::new(&format!("^(?:{})/", alternatives.join("|"))).ok()
}

/// The paths a statement names, or the component directories when it only
/// talks about components.
fn statement_paths(paths: &[String], statement: &str, ctx: &ProjectContext) -> Vec<String> {
    if !paths.is_empty() {
        return paths.to_vec();
    }
    if statement.to_ascii_lowercase().contains("component") {
        return ctx
            .dirs_with_role(DirectoryRole::Components)
            .map(str::to_string)
            .collect();
    }
    Vec::new()
}

fn is_module_term(term: &str) -> bool {
    !term.is_empty()
        && !term.contains(char::is_whitespace)
        && term
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@/-_.".contains(c))
}

/// Turn parsed document statements into enforceable rules.
pub fn synthesize_rules(spec: &SpecRules, ctx: &ProjectContext) -> Vec<DeclarativeRule> {
    let mut rules = Vec::new();
    let http_modules: Vec<String> = HTTP_MODULES.iter().map(|m| m.to_string()).collect();

    for (i, statement) in spec.presentational.iter().enumerate() {
        let paths = statement_paths(&statement.paths, &statement.statement, ctx);
        let Some(scope) = prefix_scope(&paths) else {
            continue;
        };
        rules.push(declarative(
            &format!("presentational-no-http-{}", i + 1),
            Severity::Error,
            scope.clone(),
            RuleCheck::ForbiddenImport(http_modules.clone()),
            "Presentational component imports an HTTP client",
            "Move data fetching into a hook or service and pass data in via props",
        ));
        rules.push(declarative(
            &format!("presentational-no-fetch-{}", i + 1),
            Severity::Error,
            scope,
            RuleCheck::ForbiddenContent(pattern(r"\bfetch\s*\(")),
            "Presentational component calls fetch",
            "Move data fetching into a hook or service and pass data in via props",
        ));
    }

    let presentational_statements: Vec<&str> = spec
        .presentational
        .iter()
        .map(|p| p.statement.as_str())
        .collect();

    for (i, flow) in spec.data_flow.iter().enumerate() {
        let location = flow.location.trim_end_matches('/');
        if location.is_empty() || location.contains(' ') {
            continue;
        }
        let ui_dirs: Vec<String> = ctx
            .dirs_with_role(DirectoryRole::Components)
            .chain(ctx.dirs_with_role(DirectoryRole::Pages))
            .filter(|d| !d.starts_with(location))
            .map(str::to_string)
            .collect();
        let Some(scope) = prefix_scope(&ui_dirs) else {
            continue;
        };
        let mut rule = declarative(
            &format!("data-flow-{}", i + 1),
            Severity::Warning,
            scope,
            RuleCheck::ForbiddenImport(http_modules.clone()),
            "Data fetching outside its documented location",
            &format!("Data fetching belongs in {}", location),
        );
        rule.exclude = Regex::new(&format!(
            "{}|^{}/",
            TEST_FILES,
            regex::escape(location)
        ))
        .ok();
        rules.push(rule);
    }

    for (i, prohibition) in spec.prohibitions.iter().enumerate() {
        if presentational_statements.contains(&prohibition.statement.as_str()) {
            continue;
        }
        if let Some(rule) = import_prohibition(i + 1, prohibition, ctx) {
            rules.push(rule);
        }
    }

    for (i, requirement) in spec.requirements.iter().enumerate() {
        let lower = requirement.statement.to_ascii_lowercase();
        let convention = if lower.contains("pascalcase") {
            NamingConvention::PascalCase
        } else if lower.contains("camelcase") {
            NamingConvention::CamelCase
        } else {
            continue;
        };
        let paths = statement_paths(&requirement.paths, &requirement.statement, ctx);
        let Some(scope) = prefix_scope(&paths) else {
            continue;
        };
        rules.push(declarative(
            &format!("documented-naming-{}", i + 1),
            Severity::Warning,
            scope,
            RuleCheck::ExportNaming(convention),
            &format!("Exports should be {}", convention),
            &requirement.statement,
        ));
    }
    rules
}

/// "Never import `x`" statements become forbidden-import rules.
fn import_prohibition(n: usize, directive: &Directive, ctx: &ProjectContext) -> Option<DeclarativeRule> {
    if !directive.statement.to_ascii_lowercase().contains("import") {
        return None;
    }
    let modules: Vec<String> = directive
        .terms
        .iter()
        .filter(|t| is_module_term(t))
        .cloned()
        .collect();
    if modules.is_empty() {
        return None;
    }
    let paths = statement_paths(&directive.paths, &directive.statement, ctx);
    let scope = prefix_scope(&paths).unwrap_or_else(|| pattern(SCRIPT_FILES));
    Some(declarative(
        &format!("documented-forbidden-import-{}", n),
        Severity::Error,
        scope,
        RuleCheck::ForbiddenImport(modules),
        "Import forbidden by the architecture documents",
        &directive.statement,
    ))
}

/// Violations partitioned by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchitectureReport {
    pub errors: Vec<Violation>,
    pub warnings: Vec<Violation>,
}

impl ArchitectureReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Architecture Validator
///
/// Runs every registered rule against every proposed file. ERROR violations
/// block the commit; WARNING violations are logged only.
pub struct ArchitectureValidator {
    registry: RuleRegistry,
}

impl ArchitectureValidator {
    pub fn new(registry: RuleRegistry) -> Self {
        Self { registry }
    }

    /// Validate proposed `(path, content)` pairs.
    #[instrument(skip_all, fields(files = files.len(), rules = self.registry.len()))]
    pub fn validate(&self, files: &[(String, String)]) -> ArchitectureReport {
        let mut report = ArchitectureReport::default();
        for (path, content) in files {
            for rule in self.registry.rules() {
                if !rule.applies_to(path) {
                    continue;
                }
                if let Some(mut violation) = rule.evaluate(path, content) {
                    // the rule's declared severity decides whether it blocks
                    violation.severity = rule.severity();
                    match violation.severity {
                        Severity::Error => report.errors.push(violation),
                        Severity::Warning => {
                            warn!(rule = rule.id(), path = %violation.path, message = %violation.message, "architecture warning");
                            report.warnings.push(violation);
                        }
                    }
                }
            }
        }
        info!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "architecture validation complete"
        );
        report
    }
}
