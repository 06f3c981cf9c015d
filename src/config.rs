//! Runtime configuration.
//!
//! Loaded from a TOML file (`~/.config/otto/config.toml` by default). Every
//! field has a default so a missing or partial file still yields a usable
//! config; only provider entries must be written by hand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::DEFAULT_MAX_FIX_ATTEMPTS;

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 120;

/// Environment variable overriding the config file path.
pub const CONFIG_ENV: &str = "OTTO_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between monitor ticks.
    pub poll_interval_secs: u64,

    /// Fix attempt budget for newly added PRs.
    pub max_fix_attempts: u32,

    /// Directory holding one document per tracked PR.
    pub store_dir: PathBuf,

    /// Directory for the PID file and daemon log.
    pub state_dir: PathBuf,

    /// Lines of code context around a commented line.
    pub context_lines: usize,

    /// Backends in registration order.
    pub providers: Vec<ProviderConfig>,

    /// LLM capability endpoint.
    pub llm: LlmConfig,

    /// Repository name to local checkout path.
    pub repos: BTreeMap<String, PathBuf>,

    /// Where new worktrees are created (defaults to next to each checkout).
    pub worktree_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("otto");
        let state = dirs::state_dir()
            .map(|d| d.join("otto"))
            .unwrap_or_else(|| data.clone());
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_fix_attempts: DEFAULT_MAX_FIX_ATTEMPTS,
            store_dir: data.join("prs"),
            state_dir: state,
            context_lines: 10,
            providers: Vec::new(),
            llm: LlmConfig::default(),
            repos: BTreeMap::new(),
            worktree_root: None,
        }
    }
}

/// One provider backend entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    Ado(AdoConfig),
    Github(GitHubConfig),
}

impl ProviderConfig {
    /// Registry name of this backend.
    pub fn name(&self) -> &str {
        match self {
            Self::Ado(c) => &c.name,
            Self::Github(c) => &c.name,
        }
    }

    /// URL that keys this backend's keychain entry.
    pub fn account_url(&self) -> &str {
        match self {
            Self::Ado(c) => &c.base_url,
            Self::Github(c) => &c.api_base,
        }
    }
}

/// Azure DevOps backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdoConfig {
    pub name: String,
    pub base_url: String,
    pub organization: String,
    pub project: String,
    pub repository: String,
    /// Personal access token; falls back to `OTTO_ADO_PAT`, then the keychain.
    pub pat: Option<String>,
    /// Try an Entra ID token from the `az` CLI before the PAT.
    pub use_entra: bool,
    /// Display names treated as automated reviewers.
    pub bot_identities: Vec<String>,
    /// Surface `system` thread comments to the evaluator.
    pub include_system_comments: bool,
    /// Work item type used by the `createWorkItem` action.
    pub work_item_type: String,
}

impl Default for AdoConfig {
    fn default() -> Self {
        Self {
            name: "ado".to_string(),
            base_url: "https://dev.azure.com".to_string(),
            organization: String::new(),
            project: String::new(),
            repository: String::new(),
            pat: None,
            use_entra: true,
            bot_identities: vec!["MerlinBot".to_string()],
            include_system_comments: false,
            work_item_type: "Task".to_string(),
        }
    }
}

/// GitHub backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub name: String,
    pub api_base: String,
    /// Defaults to `{api_base}/graphql`.
    pub graphql_url: Option<String>,
    pub owner: String,
    pub repo: String,
    /// Token; falls back to `GITHUB_TOKEN`, then the keychain.
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            name: "github".to_string(),
            api_base: "https://api.github.com".to_string(),
            graphql_url: None,
            owner: String::new(),
            repo: String::new(),
            token: None,
        }
    }
}

/// LLM capability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub server_url: String,
    pub request_timeout_secs: u64,
    /// Corrective round-trips allowed when the LLM returns invalid JSON.
    pub json_retry_budget: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4096".to_string(),
            request_timeout_secs: 600,
            json_retry_budget: 2,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("otto")
            .join("config.toml")
    }

    /// Resolve the config path: explicit flag, then `OTTO_CONFIG`, then default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(Self::default_path)
    }

    /// Load config from a file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[config] {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(AppError::config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, AppError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would make the monitor misbehave.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_interval_secs == 0 {
            return Err(AppError::config("poll_interval_secs must be positive"));
        }
        if self.max_fix_attempts == 0 {
            return Err(AppError::config("max_fix_attempts must be positive"));
        }
        let mut names = std::collections::HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name()) {
                return Err(AppError::config(format!(
                    "Duplicate provider name '{}'",
                    provider.name()
                )));
            }
        }
        Ok(())
    }

    /// PID file location.
    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join("otto.pid")
    }

    /// Daemon log file location.
    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("otto.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.max_fix_attempts, 5);
        assert!(config.providers.is_empty());
        assert_eq!(config.llm.json_retry_budget, 2);
    }

    #[test]
    fn test_parse_providers_in_order() {
        let config = Config::from_toml(
            r#"
            poll_interval_secs = 30

            [[providers]]
            kind = "github"
            owner = "acme"
            repo = "widgets"

            [[providers]]
            kind = "ado"
            organization = "contoso"
            project = "Web"
            repository = "site"
            bot_identities = ["MerlinBot", "PolicyBot"]

            [repos]
            site = "/src/site"
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].name(), "github");
        match &config.providers[1] {
            ProviderConfig::Ado(ado) => {
                assert_eq!(ado.organization, "contoso");
                assert_eq!(ado.base_url, "https://dev.azure.com");
                assert!(ado.use_entra);
                assert_eq!(ado.bot_identities.len(), 2);
            }
            other => panic!("expected ado, got {:?}", other),
        }
        assert_eq!(config.repos["site"], PathBuf::from("/src/site"));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = Config::from_toml(
            r#"
            [[providers]]
            kind = "github"
            [[providers]]
            kind = "github"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate provider name"));
    }

    #[test]
    fn test_rejects_zero_interval() {
        assert!(Config::from_toml("poll_interval_secs = 0").is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert!(config.providers.is_empty());
    }
}
