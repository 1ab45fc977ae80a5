// ConfigurationStore: loads agent settings from a JSON file with environment overrides.

use crate::constants::{self, env};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_POLLER_CONCURRENCY: usize = 8;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SHUTDOWN_GRACE_PERIOD_MS: u64 = 30_000;

/// Errors raised while loading or validating the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration path is not set; pass one explicitly or set {0}")]
    MissingPath(&'static str),

    #[error("failed to read configuration file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// AgentSettings
// ---------------------------------------------------------------------------

/// Executable an action name is mapped to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMapping {
    /// Path of the executable. Relative to the runbook repository when
    /// `source_type` is `git`.
    pub filepath: String,

    /// Arguments passed before the payload arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the executable.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
}

impl ActionMapping {
    /// Whether the filepath lives inside the cloned runbook repository.
    pub fn is_repository_sourced(&self) -> bool {
        self.source_type.as_deref() == Some(constants::GIT_SOURCE_TYPE)
    }
}

/// Runbook repository to clone at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySettings {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_filepath: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// Outbound HTTP proxy for control plane requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Agent configuration as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Account this agent acts for; messages owned by anyone else are rejected.
    #[serde(default)]
    pub owner_id: String,

    #[serde(default)]
    pub app_name: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_poller_concurrency")]
    pub poller_concurrency: usize,

    /// Delay between polls of an empty queue, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// How long in-flight jobs may run after shutdown was requested, in milliseconds.
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period: u64,

    #[serde(default)]
    pub action_mappings: HashMap<String, ActionMapping>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositorySettings>,

    #[serde(default)]
    pub proxy: ProxySettings,
}

fn default_base_url() -> String {
    constants::DEFAULT_BASE_URL.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poller_concurrency() -> usize {
    DEFAULT_POLLER_CONCURRENCY
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_shutdown_grace_period() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_PERIOD_MS
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            owner_id: String::new(),
            app_name: String::new(),
            log_level: default_log_level(),
            log_json: false,
            poller_concurrency: DEFAULT_POLLER_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL_MS,
            shutdown_grace_period: DEFAULT_SHUTDOWN_GRACE_PERIOD_MS,
            action_mappings: HashMap::new(),
            repository: None,
            proxy: ProxySettings::default(),
        }
    }
}

impl AgentSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period)
    }

    /// Check that the settings are usable before any queue work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("apiKey must not be empty".into()));
        }
        if self.owner_id.trim().is_empty() {
            return Err(ConfigError::Invalid("ownerId must not be empty".into()));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Invalid(format!("baseUrl '{}' is not a valid URL: {}", self.base_url, e))
        })?;
        if self.poller_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pollerConcurrency must be greater than zero".into(),
            ));
        }
        if let Some(repository) = &self.repository {
            if repository.url.trim().is_empty() {
                return Err(ConfigError::Invalid("repository.url must not be empty".into()));
            }
        }
        for (name, mapping) in &self.action_mappings {
            if mapping.filepath.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "action mapping '{}' has no filepath",
                    name
                )));
            }
            if mapping.is_repository_sourced() && self.repository.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "action mapping '{}' is sourced from git but no repository is configured",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(api_key) = non_empty(env::API_KEY) {
            self.api_key = api_key;
        }
        if let Some(base_url) = non_empty(env::BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(owner_id) = non_empty(env::OWNER_ID) {
            self.owner_id = owner_id;
        }
        if let Some(log_level) = non_empty(env::LOG_LEVEL) {
            self.log_level = log_level;
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigurationStore
// ---------------------------------------------------------------------------

/// Reads the agent configuration file.
pub struct ConfigurationStore {
    path: PathBuf,
}

impl ConfigurationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store for the path named by `AGENT_CONF_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        std::env::var(env::CONF_PATH)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(Self::new)
            .ok_or(ConfigError::MissingPath(env::CONF_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file, apply environment overrides and validate the result.
    pub fn load(&self) -> Result<AgentSettings, ConfigError> {
        self.load_with(|name| std::env::var(name).ok())
    }

    /// Like [`load`](Self::load) with an explicit override lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<AgentSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = self.read()?;
        settings.apply_overrides(lookup);
        settings.validate()?;
        Ok(settings)
    }

    fn read(&self) -> Result<AgentSettings, ConfigError> {
        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}
