pub mod spec_docs;
pub mod types;

pub use types::{DirectoryConvention, DirectoryRole, Framework, Language, ProjectContext, SpecRules};

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

use crate::repo::RepoTree;
use crate::source::extension;

/// What detectors look at.
pub struct ProjectSignals<'a> {
    pub tree: &'a RepoTree,
    /// Names from package.json `dependencies` and `devDependencies`
    pub dependencies: BTreeSet<String>,
}

impl ProjectSignals<'_> {
    fn has_dep(&self, name: &str) -> bool {
        self.dependencies.contains(name)
    }

    fn has_file_named(&self, names: &[&str]) -> bool {
        self.tree
            .entries()
            .iter()
            .any(|e| !e.path.contains('/') && names.contains(&e.path.as_str()))
    }

    fn has_extension(&self, ext: &str) -> bool {
        self.tree
            .entries()
            .iter()
            .any(|e| extension(&e.path).as_deref() == Some(ext))
    }
}

/// One framework detector. Detectors are tried in order; the last one
/// always matches.
pub trait FrameworkDetector: Send + Sync {
    fn framework(&self) -> Framework;

    fn detect(&self, signals: &ProjectSignals<'_>) -> bool;
}

struct NextJsDetector;
struct AngularDetector;
struct SvelteDetector;
struct VueDetector;
struct ReactDetector;
struct GenericDetector;

impl FrameworkDetector for NextJsDetector {
    fn framework(&self) -> Framework {
        Framework::NextJs
    }

    fn detect(&self, signals: &ProjectSignals<'_>) -> bool {
        signals.has_dep("next")
            || signals.has_file_named(&["next.config.js", "next.config.mjs", "next.config.ts"])
    }
}

impl FrameworkDetector for AngularDetector {
    fn framework(&self) -> Framework {
        Framework::Angular
    }

    fn detect(&self, signals: &ProjectSignals<'_>) -> bool {
        signals.has_dep("@angular/core") || signals.has_file_named(&["angular.json"])
    }
}

impl FrameworkDetector for SvelteDetector {
    fn framework(&self) -> Framework {
        Framework::Svelte
    }

    fn detect(&self, signals: &ProjectSignals<'_>) -> bool {
        signals.has_dep("svelte") || signals.has_extension("svelte")
    }
}

impl FrameworkDetector for VueDetector {
    fn framework(&self) -> Framework {
        Framework::Vue
    }

    fn detect(&self, signals: &ProjectSignals<'_>) -> bool {
        signals.has_dep("vue") || signals.has_extension("vue")
    }
}

impl FrameworkDetector for ReactDetector {
    fn framework(&self) -> Framework {
        Framework::React
    }

    fn detect(&self, signals: &ProjectSignals<'_>) -> bool {
        signals.has_dep("react") || signals.has_extension("tsx") || signals.has_extension("jsx")
    }
}

impl FrameworkDetector for GenericDetector {
    fn framework(&self) -> Framework {
        Framework::Generic
    }

    fn detect(&self, _signals: &ProjectSignals<'_>) -> bool {
        true
    }
}

/// Built-in detectors, most specific first.
pub fn default_detectors() -> Vec<Box<dyn FrameworkDetector>> {
    vec![
        Box::new(NextJsDetector),
        Box::new(AngularDetector),
        Box::new(SvelteDetector),
        Box::new(VueDetector),
        Box::new(ReactDetector),
        Box::new(GenericDetector),
    ]
}

/// Project Analyzer
///
/// Builds the read-only [`ProjectContext`] for a run: framework, language,
/// directory conventions and rules parsed from architecture documents.
pub struct ProjectAnalyzer {
    detectors: Vec<Box<dyn FrameworkDetector>>,
    extra_documents: Vec<String>,
}

impl ProjectAnalyzer {
    pub fn new(extra_documents: Vec<String>) -> Self {
        Self {
            detectors: default_detectors(),
            extra_documents,
        }
    }

    #[instrument(skip_all, fields(files = tree.len()))]
    pub fn analyze(&self, tree: &RepoTree) -> ProjectContext {
        let signals = ProjectSignals {
            tree,
            dependencies: package_dependencies(tree),
        };
        let framework = self
            .detectors
            .iter()
            .find(|d| d.detect(&signals))
            .map(|d| d.framework())
            .unwrap_or(Framework::Generic);
        let language = detect_language(tree);
        let conventions = detect_conventions(tree);
        let spec_rules = spec_docs::load_spec_rules(tree, &self.extra_documents);

        info!(
            %framework,
            %language,
            conventions = conventions.len(),
            spec_rules = spec_rules.rule_count(),
            "analyzed project"
        );
        ProjectContext {
            framework,
            language,
            conventions,
            spec_rules,
        }
    }
}

fn package_dependencies(tree: &RepoTree) -> BTreeSet<String> {
    let Ok(text) = tree.read("package.json") else {
        return BTreeSet::new();
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&text) else {
        debug!("package.json is not valid JSON");
        return BTreeSet::new();
    };
    ["dependencies", "devDependencies", "peerDependencies"]
        .iter()
        .filter_map(|key| manifest.get(key).and_then(|v| v.as_object()))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

/// Language by manifest first, then by the most common source extension.
pub fn detect_language(tree: &RepoTree) -> Language {
    if tree.contains("tsconfig.json") {
        return Language::TypeScript;
    }
    if tree.contains("Cargo.toml") {
        return Language::Rust;
    }
    if tree.contains("go.mod") {
        return Language::Go;
    }
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for entry in tree.entries() {
        let lang = match extension(&entry.path).as_deref() {
            Some("ts" | "tsx" | "mts" | "cts") => "ts",
            Some("js" | "jsx" | "mjs" | "cjs") => "js",
            Some("py") => "py",
            Some("rs") => "rs",
            Some("go") => "go",
            _ => continue,
        };
        *counts.entry(lang).or_default() += 1;
    }
    match counts.into_iter().max_by_key(|(_, n)| *n).map(|(l, _)| l) {
        Some("ts") => Language::TypeScript,
        Some("js") => Language::JavaScript,
        Some("py") => Language::Python,
        Some("rs") => Language::Rust,
        Some("go") => Language::Go,
        _ if tree.contains("package.json") => Language::JavaScript,
        _ => Language::Unknown,
    }
}

/// Directory-to-role map from directory names in the tree.
pub fn detect_conventions(tree: &RepoTree) -> Vec<DirectoryConvention> {
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    for entry in tree.entries() {
        let mut prefix = String::new();
        for segment in entry.dir().split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            dirs.insert(prefix.clone());
        }
    }
    dirs.into_iter()
        .filter_map(|dir| {
            let name = dir.rsplit('/').next().unwrap_or(&dir).to_string();
            DirectoryRole::from_dir_name(&name).map(|role| DirectoryConvention { path: dir, role })
        })
        .collect()
}
