//! Hierarchical configuration loading and validation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration for the sprint orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub developer_pool: DeveloperPoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default autonomy mode for newly created sprints: supervised, semi-auto, full-auto.
    #[serde(default = "default_autonomy")]
    pub default_autonomy: String,
    #[serde(default = "default_max_review_cycles")]
    pub max_review_cycles: u32,
    /// Path to the agent CLI binary (claude, or a compatible substitute).
    #[serde(default = "default_agent_path")]
    pub agent_cli_path: String,
    /// Path to the git binary used by the Git Coordinator.
    #[serde(default = "default_git_path")]
    pub git_path: String,
    /// If true, `full-auto` sprints still pause for approval before
    /// merging locally when no remote exists (see `SPEC_FULL.md` §10.6).
    #[serde(default)]
    pub full_auto_merges_local: bool,
    /// Branch the PR-create stage merges into locally, or opens its pull
    /// request against, when the target tree has no configured remote
    /// default branch of its own.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Per-role model/budget overrides, keyed by role name (research,
    /// planning, impl, testing, review, pr-create).
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    /// Forge (GitHub-compatible) REST API settings for the PR-create
    /// stage's fallback path.
    #[serde(default)]
    pub forge: ForgeConfig,
}

fn default_autonomy() -> String {
    "supervised".to_string()
}

const fn default_max_review_cycles() -> u32 {
    3
}

fn default_agent_path() -> String {
    "claude".to_string()
}

fn default_git_path() -> String {
    "git".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            developer_pool: DeveloperPoolConfig::default(),
            logging: LoggingConfig::default(),
            default_autonomy: default_autonomy(),
            max_review_cycles: default_max_review_cycles(),
            agent_cli_path: default_agent_path(),
            git_path: default_git_path(),
            full_auto_merges_local: false,
            default_branch: default_branch(),
            roles: HashMap::new(),
            forge: ForgeConfig::default(),
        }
    }
}

/// Forge REST API settings, used only by the PR-create stage's
/// fallback path when the agent's own push/PR attempt needs
/// corroborating (`SPEC_FULL.md` §10.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ForgeConfig {
    #[serde(default = "default_forge_api_base")]
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_forge_api_base() -> String {
    "https://api.github.com".to_string()
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self { api_base: default_forge_api_base(), token: None }
    }
}

/// Bind address for the combined REST + observer HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    7420
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// SQLite-backed durable queue broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub database_path: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_queue_path() -> String {
    ".sprint/queue.db".to_string()
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    2_000
}

const fn default_max_backoff_ms() -> u64 {
    120_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_path: default_queue_path(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Bounded concurrency for wave execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeveloperPoolConfig {
    #[serde(default = "default_pool_size")]
    pub max_concurrent_slots: u32,
}

const fn default_pool_size() -> u32 {
    5
}

impl Default for DeveloperPoolConfig {
    fn default() -> Self {
        Self { max_concurrent_slots: default_pool_size() }
    }
}

/// Structured logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format(), log_dir: None }
    }
}

/// Per-role model/budget override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RoleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_role_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
}

const fn default_role_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid default_autonomy: {0}. Must be one of: supervised, semi-auto, full-auto")]
    InvalidAutonomy(String),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("max_review_cycles cannot be 0")]
    InvalidMaxReviewCycles,

    #[error("developer_pool.max_concurrent_slots cannot be 0")]
    InvalidPoolSize,

    #[error("queue.database_path cannot be empty")]
    EmptyQueuePath,

    #[error("queue backoff is invalid: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})")]
    InvalidBackoff(u64, u64),
}

/// Loads and validates [`Config`] with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest): compiled-in defaults,
    /// `.sprint/config.yaml`, `.sprint/local.yaml`, then
    /// `SPRINT_`-prefixed environment variables (double underscore
    /// nesting, e.g. `SPRINT_SERVER__PORT`).
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".sprint/config.yaml"))
            .merge(Yaml::file(".sprint/local.yaml"))
            .merge(Env::prefixed("SPRINT_").split("__"))
            .extract()
            .context("failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if !["supervised", "semi-auto", "full-auto"].contains(&config.default_autonomy.as_str()) {
            return Err(ConfigError::InvalidAutonomy(config.default_autonomy.clone()));
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !["json", "pretty"].contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        if config.max_review_cycles == 0 {
            return Err(ConfigError::InvalidMaxReviewCycles);
        }
        if config.developer_pool.max_concurrent_slots == 0 {
            return Err(ConfigError::InvalidPoolSize);
        }
        if config.queue.database_path.is_empty() {
            return Err(ConfigError::EmptyQueuePath);
        }
        if config.queue.initial_backoff_ms >= config.queue.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(config.queue.initial_backoff_ms, config.queue.max_backoff_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn rejects_bad_autonomy() {
        let mut config = Config::default();
        config.default_autonomy = "yolo".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidAutonomy(_))));
    }

    #[test]
    fn rejects_zero_pool_size() {
        let mut config = Config::default();
        config.developer_pool.max_concurrent_slots = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidPoolSize)));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let mut config = Config::default();
        config.queue.initial_backoff_ms = 50_000;
        config.queue.max_backoff_ms = 10_000;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidBackoff(50_000, 10_000))));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let yaml = "server:\n  port: 9000\nmax_review_cycles: 5\n";
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.max_review_cycles, 5);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    /// `SPRINT_`-prefixed env vars are the highest-precedence provider
    /// (`ConfigLoader::load`'s doc comment) and the `__` splitter nests
    /// into struct fields, so `SPRINT_SERVER__PORT` must win over a
    /// lower-precedence yaml value for the same field.
    #[test]
    fn env_var_overrides_yaml_for_nested_field() {
        let yaml = "server:\n  port: 9000\n";
        temp_env::with_var("SPRINT_SERVER__PORT", Some("7777"), || {
            let config: Config = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::string(yaml))
                .merge(Env::prefixed("SPRINT_").split("__"))
                .extract()
                .unwrap();
            assert_eq!(config.server.port, 7777);
        });
    }
}
