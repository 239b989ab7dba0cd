use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::budget::Provider;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid pattern in [{section}]: {pattern}: {reason}")]
    InvalidPattern {
        section: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("GitHub token not found in config or GITHUB_TOKEN")]
    MissingToken,

    #[error("LLM API key not found in config or AUTOFIX_LLM_API_KEY")]
    MissingApiKey,

    #[error("{0}")]
    Invalid(String),
}

/// Name of the config file looked up in the working copy root.
pub const CONFIG_FILE_NAME: &str = ".autofix.toml";

/// Top-level configuration loaded from .autofix.toml.
/// All fields are optional; the tool works with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Extra gate patterns on top of the built-in sets
    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub hallucination: HallucinationConfig,

    #[serde(default)]
    pub architecture: ArchitectureConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    pub owner: Option<String>,
    pub repo: Option<String>,
    /// Reviewers requested on draft pull requests
    #[serde(default)]
    pub reviewers: Vec<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_github_api_url(),
            owner: None,
            repo: None,
            reviewers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key. If None, falls back to AUTOFIX_LLM_API_KEY env var.
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    /// Optional cap below the provider's own context window
    pub max_input_tokens: Option<usize>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_url: default_llm_api_url(),
            model: default_llm_model(),
            api_key: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_input_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Additional regex patterns matched against issue text and paths as keywords
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Additional regex patterns for sensitive paths
    #[serde(default)]
    pub paths: Vec<String>,
    /// Additional regex patterns for blocked change types
    #[serde(default)]
    pub change_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum number of files handed to the prompt
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Share of the input budget reserved for file contents (0.0 - 1.0)
    #[serde(default = "default_file_budget_share")]
    pub file_budget_share: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            file_budget_share: default_file_budget_share(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    pub lint: Option<String>,
    pub type_check: Option<String>,
    pub build: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            lint: None,
            type_check: None,
            build: None,
            timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Push and open a pull request after committing
    #[serde(default = "default_true")]
    pub push: bool,
    /// Wall-clock deadline for a whole run
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    /// Timeout applied to each external call attempt
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_plan_attempts")]
    pub max_plan_attempts: u32,
    /// Directory for triage/fix-plan/commit JSON artifacts
    pub artifacts_dir: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            remote: default_remote(),
            branch_prefix: default_branch_prefix(),
            push: true,
            run_deadline_secs: default_run_deadline_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_plan_attempts: default_max_plan_attempts(),
            artifacts_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            ..RetryPolicy::default()
        }
    }
}

/// Thresholds for rejecting suspicious full-file rewrites.
#[derive(Debug, Clone, Deserialize)]
pub struct HallucinationConfig {
    /// Files with fewer significant lines are never checked
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
    /// Minimum fraction of original identifiers that must survive
    #[serde(default = "default_identifier_preservation")]
    pub identifier_preservation: f64,
    /// New/old line ratio below which the rewrite counts as a shrink
    #[serde(default = "default_shrink_ratio")]
    pub shrink_ratio: f64,
}

impl Default for HallucinationConfig {
    fn default() -> Self {
        Self {
            min_lines: default_min_lines(),
            identifier_preservation: default_identifier_preservation(),
            shrink_ratio: default_shrink_ratio(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchitectureConfig {
    /// Extra specification documents, relative to the working copy root
    #[serde(default)]
    pub spec_documents: Vec<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_llm_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> usize {
    4_096
}
fn default_max_files() -> usize {
    8
}
fn default_file_budget_share() -> f64 {
    0.7
}
fn default_command_timeout_secs() -> u64 {
    300
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_remote() -> String {
    "origin".to_string()
}
fn default_branch_prefix() -> String {
    "autofix".to_string()
}
fn default_true() -> bool {
    true
}
fn default_run_deadline_secs() -> u64 {
    900
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_max_plan_attempts() -> u32 {
    2
}
fn default_min_lines() -> usize {
    25
}
fn default_identifier_preservation() -> f64 {
    0.3
}
fn default_shrink_ratio() -> f64 {
    0.5
}

impl Config {
    /// Load configuration from `.autofix.toml` in `root`.
    /// Returns default config if the file doesn't exist.
    pub fn load(root: &Path) -> Result<Config, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.check()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                self.github.token = Some(token);
            }
        }
        if self.llm.api_key.is_none() {
            if let Ok(key) = std::env::var("AUTOFIX_LLM_API_KEY") {
                self.llm.api_key = Some(key);
            }
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.discovery.file_budget_share) {
            return Err(ConfigError::Invalid(format!(
                "discovery.file_budget_share must be within 0.0..=1.0, got {}",
                self.discovery.file_budget_share
            )));
        }
        if self.discovery.max_files == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_files must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_plan_attempts == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_plan_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the GitHub token: config file value takes precedence,
    /// falls back to GITHUB_TOKEN env var.
    pub fn github_token(&self) -> Result<String, ConfigError> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .ok_or(ConfigError::MissingToken)
    }

    /// Tokens available for the instruction, after reserving the output share.
    pub fn input_token_ceiling(&self) -> usize {
        let provider_ceiling = self
            .llm
            .provider
            .context_window()
            .saturating_sub(self.llm.max_output_tokens);
        match self.llm.max_input_tokens {
            Some(cap) => cap.min(provider_ceiling),
            None => provider_ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert!(config.security.keywords.is_empty());
        assert_eq!(config.pipeline.default_branch, "main");
        assert_eq!(config.discovery.max_files, 8);
        assert!(config.validation.lint.is_none());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[security]
keywords = ["payroll"]
paths = ["^secrets/"]

[llm]
provider = "anthropic"
max_output_tokens = 2000

[validation]
lint = "npm run lint"
type_check = "npx tsc --noEmit"

[pipeline]
default_branch = "develop"
max_plan_attempts = 3
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.security.keywords.len(), 1);
        assert_eq!(config.security.paths.len(), 1);
        assert_eq!(config.llm.provider, Provider::Anthropic);
        assert_eq!(config.llm.max_output_tokens, 2000);
        assert_eq!(config.validation.lint.as_deref(), Some("npm run lint"));
        assert_eq!(config.pipeline.default_branch, "develop");
        assert_eq!(config.pipeline.remote, "origin");
        assert_eq!(config.pipeline.max_plan_attempts, 3);
    }

    #[test]
    fn test_load_from_rejects_bad_share() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[discovery]\nfile_budget_share = 1.5\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.pipeline.branch_prefix, "autofix");
    }

    #[test]
    fn test_input_token_ceiling_respects_cap() {
        let mut config = Config::default();
        config.llm.max_input_tokens = Some(6_000);
        assert_eq!(config.input_token_ceiling(), 6_000);
        config.llm.max_input_tokens = None;
        assert_eq!(
            config.input_token_ceiling(),
            config.llm.provider.context_window() - config.llm.max_output_tokens
        );
    }
}
