//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/valued/config.toml`, then
//! `VALUED_TOKEN` / `VALUED_ENDPOINT` from the process environment override
//! the file. Everything is optional: a client can also be built directly in
//! code without any configuration.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/valued/` (~/.config/valued/)
//! - State/Logs: `$XDG_STATE_HOME/valued/` (~/.local/state/valued/)
//!
//! ```toml
//! [client]
//! token = "vt_live_xxxxxxxxxxxx"
//! endpoint = "https://ingres.valued.app/events"
//!
//! [dispatch]
//! mode = "pool"
//! max_workers = 4
//!
//! [logging]
//! level = "debug"
//! ```

use crate::dispatch::{Strategy, DEFAULT_KEEP_ALIVE};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables consulted, in order, to name the environment
pub const ENV_KEYS: [&str; 4] = ["VALUED_ENV", "APP_ENV", "RUST_ENV", "ENV"];

/// Token override
pub const TOKEN_ENV: &str = "VALUED_TOKEN";

/// Endpoint override
pub const ENDPOINT_ENV: &str = "VALUED_ENDPOINT";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

// ============================================
// Environment
// ============================================

/// Deployment environment, used to pick a default dispatch strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Test,
    Development,
    Production,
    Other(String),
}

impl Environment {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "test" => Environment::Test,
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            _ => Environment::Other(name.trim().to_string()),
        }
    }

    /// Reads the first non-empty variable in [`ENV_KEYS`].
    ///
    /// Returns `None` if none is set.
    pub fn detect() -> Option<Self> {
        Self::detect_from(|key| std::env::var(key).ok())
    }

    /// Same as [`Environment::detect`] with a custom variable lookup
    pub fn detect_from<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        ENV_KEYS
            .iter()
            .filter_map(|key| lookup(key))
            .find(|value| !value.trim().is_empty())
            .map(|value| Self::parse(&value))
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => f.write_str("test"),
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
            Environment::Other(name) => f.write_str(name),
        }
    }
}

// ============================================
// Config
// ============================================

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Connection settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Background delivery settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the ingestion API
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// API token (sent as a bearer token)
    pub token: Option<String>,

    /// Ingestion endpoint (defaults to the hosted Valued API)
    pub endpoint: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

impl ClientConfig {
    /// Check if a token is available
    pub fn is_ready(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Applies `VALUED_TOKEN` / `VALUED_ENDPOINT` overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = present(TOKEN_ENV) {
            self.token = Some(token);
        }
        if let Some(endpoint) = present(ENDPOINT_ENV) {
            self.endpoint = Some(endpoint);
        }
    }
}

/// How deliveries are scheduled
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Pick from the detected environment
    Auto,
    /// Deliver on the calling thread
    Immediate,
    /// One background thread
    Single,
    /// Bounded worker pool
    Pool,
}

/// Background delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_mode")]
    pub mode: DispatchMode,

    /// Workers kept alive in pool mode
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper bound on pool workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Seconds an extra pool worker stays idle before exiting
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: default_dispatch_mode(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_dispatch_mode() -> DispatchMode {
    DispatchMode::Auto
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    10
}

fn default_keep_alive() -> u64 {
    DEFAULT_KEEP_ALIVE.as_secs()
}

impl DispatchConfig {
    /// Resolves the strategy, consulting `env` only in `auto` mode
    pub fn strategy(&self, env: Option<&Environment>) -> Strategy {
        let pool = Strategy::BoundedPool {
            min: self.min_workers,
            max: self.max_workers,
        };
        match self.mode {
            DispatchMode::Immediate => Strategy::Synchronous,
            DispatchMode::Single => Strategy::SingleWorker,
            DispatchMode::Pool => pool,
            DispatchMode::Auto => match Strategy::for_environment(env) {
                Strategy::BoundedPool { .. } => pool,
                other => other,
            },
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config(
                "dispatch.max_workers must be at least 1".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::Config(
                "dispatch.min_workers must not exceed dispatch.max_workers".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.client.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.dispatch.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/valued/config.toml` (~/.config/valued/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("valued").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/valued/` (~/.local/state/valued/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("valued")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/valued/valued.log` (~/.local/state/valued/valued.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("valued.log")
    }
}
