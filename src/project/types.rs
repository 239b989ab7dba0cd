use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    NextJs,
    React,
    Vue,
    Angular,
    Svelte,
    Generic,
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Framework::NextJs => write!(f, "Next.js"),
            Framework::React => write!(f, "React"),
            Framework::Vue => write!(f, "Vue"),
            Framework::Angular => write!(f, "Angular"),
            Framework::Svelte => write!(f, "Svelte"),
            Framework::Generic => write!(f, "generic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
    Go,
    Unknown,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::TypeScript => write!(f, "TypeScript"),
            Language::JavaScript => write!(f, "JavaScript"),
            Language::Python => write!(f, "Python"),
            Language::Rust => write!(f, "Rust"),
            Language::Go => write!(f, "Go"),
            Language::Unknown => write!(f, "unknown"),
        }
    }
}

/// What a directory is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryRole {
    Components,
    Pages,
    Api,
    Hooks,
    Services,
    Store,
    Utils,
    Styles,
    Types,
    Tests,
    Docs,
    Config,
}

impl DirectoryRole {
    /// Role implied by a directory name, if any.
    pub fn from_dir_name(name: &str) -> Option<DirectoryRole> {
        match name.to_ascii_lowercase().as_str() {
            "components" | "ui" | "widgets" => Some(DirectoryRole::Components),
            "pages" | "app" | "routes" | "views" | "screens" => Some(DirectoryRole::Pages),
            "api" | "server" | "handlers" => Some(DirectoryRole::Api),
            "hooks" | "composables" => Some(DirectoryRole::Hooks),
            "services" | "clients" | "lib" => Some(DirectoryRole::Services),
            "store" | "stores" | "state" | "redux" => Some(DirectoryRole::Store),
            "utils" | "helpers" | "shared" => Some(DirectoryRole::Utils),
            "styles" | "css" | "theme" => Some(DirectoryRole::Styles),
            "types" | "interfaces" | "models" => Some(DirectoryRole::Types),
            "tests" | "test" | "__tests__" | "spec" | "e2e" => Some(DirectoryRole::Tests),
            "docs" | "documentation" => Some(DirectoryRole::Docs),
            "config" | "configs" | ".github" => Some(DirectoryRole::Config),
            _ => None,
        }
    }
}

/// A directory of the working copy and its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryConvention {
    pub path: String,
    pub role: DirectoryRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerRule {
    pub name: String,
    pub responsibility: String,
}

/// "Components under X are presentational" statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentationalRule {
    /// Path prefixes the statement names
    pub paths: Vec<String>,
    pub statement: String,
}

/// "Fetching happens in Y" statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataFlowRule {
    pub location: String,
    pub statement: String,
}

/// A must-not / must statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub statement: String,
    /// Paths the statement names, if any
    pub paths: Vec<String>,
    /// Backticked identifiers other than paths (modules, APIs)
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryNote {
    pub path: String,
    pub description: String,
}

/// Rules extracted from free-text architecture documents. Best effort:
/// an empty value is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpecRules {
    /// Documents the rules were read from
    pub sources: Vec<String>,
    pub layers: Vec<LayerRule>,
    pub presentational: Vec<PresentationalRule>,
    pub data_flow: Vec<DataFlowRule>,
    pub prohibitions: Vec<Directive>,
    pub requirements: Vec<Directive>,
    pub directories: Vec<DirectoryNote>,
}

impl SpecRules {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
            && self.presentational.is_empty()
            && self.data_flow.is_empty()
            && self.prohibitions.is_empty()
            && self.requirements.is_empty()
            && self.directories.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.layers.len()
            + self.presentational.len()
            + self.data_flow.len()
            + self.prohibitions.len()
            + self.requirements.len()
            + self.directories.len()
    }
}

/// Everything learned about the working copy, built once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectContext {
    pub framework: Framework,
    pub language: Language,
    pub conventions: Vec<DirectoryConvention>,
    pub spec_rules: SpecRules,
}

impl ProjectContext {
    /// Directories with the given role.
    pub fn dirs_with_role(&self, role: DirectoryRole) -> impl Iterator<Item = &str> {
        self.conventions
            .iter()
            .filter(move |c| c.role == role)
            .map(|c| c.path.as_str())
    }
}
