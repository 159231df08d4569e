//! TOML Configuration File Support
//!
//! Centralized configuration loading for the engine, supporting a TOML
//! configuration file at `~/.config/skyway/skyway.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller via [`ConfigOverrides`])
//! 2. Environment variables (`SKYWAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [service]
//! host = "skynetchat.net"
//! request_timeout_secs = 120
//!
//! [engine]
//! max_messages_per_account = 5
//! auto_rotate = true
//! max_account_attempts = 5
//! retry_delay_ms = 1500
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;

/// Default remote service host.
pub const DEFAULT_HOST: &str = "skynetchat.net";

/// User-Agent the service's own web client presents.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for EngineError {
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Service section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceToml {
    /// Remote service host
    pub host: Option<String>,

    /// User-Agent header value
    pub user_agent: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Engine section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Messages per account before rotation
    pub max_messages_per_account: Option<u32>,

    /// Whether accounts rotate automatically
    pub auto_rotate: Option<bool>,

    /// Hard cap on account-creation attempts
    pub max_account_attempts: Option<u32>,

    /// Delay before retrying after a 429, in milliseconds
    pub retry_delay_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkywayToml {
    /// Service configuration section
    pub service: ServiceToml,

    /// Engine configuration section
    pub engine: EngineToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized engine configuration.
///
/// Consolidates values from all sources and tracks where they came from.
/// Use [`load_config`] for proper priority handling, or `default()` for a
/// programmatic starting point.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Remote service host (HTTPS, no scheme).
    pub host: String,

    /// User-Agent presented on every request.
    pub user_agent: String,

    /// Fixed per-request timeout, covering the streaming read too.
    pub request_timeout: Duration,

    /// Delay before retrying account creation after a 429.
    pub retry_delay: Duration,

    /// Hard cap on account-creation attempts (the effective budget is
    /// `min(available proxies, this cap)` when proxies are configured).
    pub max_account_attempts: u32,

    /// Messages per account before rotation.
    pub max_messages_per_account: u32,

    /// Whether accounts rotate automatically.
    pub auto_rotate: bool,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    pub(crate) source: ConfigSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(120),
            retry_delay: Duration::from_millis(1500),
            max_account_attempts: 5,
            max_messages_per_account: 5,
            auto_rotate: true,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Origin URL of the service (`https://host`).
    #[must_use]
    pub fn origin(&self) -> String {
        format!("https://{}", self.host)
    }

    /// Absolute URL for a path on the service (`path` starts with `/`).
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("https://{}{}", self.host, path)
    }

    /// Check value constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty host, a
    /// per-account limit below 1, or an attempt cap below 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service host must not be empty".to_string(),
            ));
        }
        if self.max_messages_per_account < 1 {
            return Err(ConfigError::ValidationError(
                "max messages per account must be at least 1".to_string(),
            ));
        }
        if self.max_account_attempts < 1 {
            return Err(ConfigError::ValidationError(
                "max account attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/skyway/skyway.toml` or
/// `~/.config/skyway/skyway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("skyway").join("skyway.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resolved values fail validation. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only
///   defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resolved values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    // Start with defaults
    let mut config = EngineConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SkywayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config);

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut EngineConfig, toml: &SkywayToml) {
    // Service settings
    if let Some(ref host) = toml.service.host {
        config.host = host.clone();
    }
    if let Some(ref agent) = toml.service.user_agent {
        config.user_agent = agent.clone();
    }
    if let Some(secs) = toml.service.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }

    // Engine settings
    if let Some(max) = toml.engine.max_messages_per_account {
        config.max_messages_per_account = max;
    }
    if let Some(enabled) = toml.engine.auto_rotate {
        config.auto_rotate = enabled;
    }
    if let Some(attempts) = toml.engine.max_account_attempts {
        config.max_account_attempts = attempts;
    }
    if let Some(ms) = toml.engine.retry_delay_ms {
        config.retry_delay = Duration::from_millis(ms);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut EngineConfig) {
    if let Ok(host) = std::env::var("SKYWAY_HOST") {
        if !host.is_empty() {
            config.host = host;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(agent) = std::env::var("SKYWAY_USER_AGENT") {
        if !agent.is_empty() {
            config.user_agent = agent;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("SKYWAY_REQUEST_TIMEOUT_SECS") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.request_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(max) = std::env::var("SKYWAY_MAX_MESSAGES") {
        if let Ok(n) = max.parse::<u32>() {
            config.max_messages_per_account = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(enabled) = std::env::var("SKYWAY_AUTO_ROTATE") {
        config.auto_rotate = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Ok(attempts) = std::env::var("SKYWAY_MAX_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.max_account_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(delay) = std::env::var("SKYWAY_RETRY_DELAY_MS") {
        if let Ok(ms) = delay.parse::<u64>() {
            config.retry_delay = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Service host override
    pub host: Option<String>,

    /// Per-account message limit override
    pub max_messages_per_account: Option<u32>,

    /// Auto-rotate flag override
    pub auto_rotate: Option<bool>,

    /// Request timeout override (seconds)
    pub request_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set service host override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set per-account message limit override
    #[must_use]
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages_per_account = Some(max);
        self
    }

    /// Set auto-rotate flag override
    #[must_use]
    pub fn with_auto_rotate(mut self, enabled: bool) -> Self {
        self.auto_rotate = Some(enabled);
        self
    }

    /// Set request timeout override
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut EngineConfig) {
        if self.host.is_some()
            || self.max_messages_per_account.is_some()
            || self.auto_rotate.is_some()
            || self.request_timeout_secs.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(max) = self.max_messages_per_account {
            config.max_messages_per_account = max;
        }
        if let Some(enabled) = self.auto_rotate {
            config.auto_rotate = enabled;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
