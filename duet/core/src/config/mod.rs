//! TOML Configuration File Support
//!
//! Configuration for the duet engine and its Ollama backend, read from
//! `$XDG_CONFIG_HOME/duet/duet.toml` (typically `~/.config/duet/duet.toml`).
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! host = "localhost"
//! port = 11434
//! timeout_secs = 120
//!
//! [selection]
//! provider = "ollama"
//! model = "llama3.2"
//! stream = true
//!
//! [comparison]
//! error_marker = "❌ Error: "
//! event_capacity = 256
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::comparison::ComparisonConfig;
use crate::settings::{ProviderInfo, StaticSettings};

/// Provider id of the bundled Ollama backend
pub const OLLAMA_PROVIDER_ID: &str = "ollama";

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

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
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

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Ollama host
    pub host: Option<String>,

    /// Ollama port
    pub port: Option<u16>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Selection section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionToml {
    /// Selected provider id
    pub provider: Option<String>,

    /// Selected model
    pub model: Option<String>,

    /// Whether to stream responses
    pub stream: Option<bool>,
}

/// Comparison section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonToml {
    /// Prefix of failed assistant turns
    pub error_marker: Option<String>,

    /// Event channel capacity
    pub event_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuetToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Selection configuration section
    pub selection: SelectionToml,

    /// Comparison configuration section
    pub comparison: ComparisonToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Where the Ollama server lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Initial provider/model selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionConfig {
    /// Selected provider id
    pub provider: Option<String>,
    /// Selected model
    pub model: Option<String>,
    /// Whether to stream responses
    pub stream: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            provider: Some(OLLAMA_PROVIDER_ID.to_string()),
            model: Some("llama3.2".to_string()),
            stream: true,
        }
    }
}

/// Centralized configuration for duet
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct DuetConfig {
    /// Backend configuration
    pub backend: BackendConfig,

    /// Initial selection
    pub selection: SelectionConfig,

    /// Controller configuration
    pub comparison: ComparisonConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl DuetConfig {
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

    /// Settings provider seeded from the configured selection
    ///
    /// The bundled Ollama backend is the only available provider.
    #[must_use]
    pub fn settings(&self) -> StaticSettings {
        let settings = StaticSettings::new(vec![ProviderInfo::new(OLLAMA_PROVIDER_ID, "Ollama")]);
        settings.select_provider(self.selection.provider.clone());
        settings.select_model(self.selection.model.clone());
        settings.set_stream_mode(self.selection.stream);
        settings
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero port, a zero
    /// timeout or a zero event capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.port == 0 {
            return Err(ConfigError::ValidationError("backend.port must be non-zero".into()));
        }
        if self.backend.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "backend.timeout_secs must be non-zero".into(),
            ));
        }
        if self.comparison.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "comparison.event_capacity must be non-zero".into(),
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
/// Returns `$XDG_CONFIG_HOME/duet/duet.toml` or `~/.config/duet/duet.toml`
/// if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("duet").join("duet.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<DuetConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DuetConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<DuetConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Start with defaults
    let mut config = DuetConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DuetToml = toml::from_str(&toml_content)?;
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

    // Environment overrides file values
    apply_env_config(&mut config, env);

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DuetConfig, toml: &DuetToml) {
    if let Some(ref host) = toml.backend.host {
        config.backend.host = host.clone();
    }
    if let Some(port) = toml.backend.port {
        config.backend.port = port;
    }
    if let Some(secs) = toml.backend.timeout_secs {
        config.backend.timeout = Duration::from_secs(secs);
    }

    if toml.selection.provider.is_some() {
        config.selection.provider = toml.selection.provider.clone();
    }
    if toml.selection.model.is_some() {
        config.selection.model = toml.selection.model.clone();
    }
    if let Some(stream) = toml.selection.stream {
        config.selection.stream = stream;
    }

    if let Some(ref marker) = toml.comparison.error_marker {
        config.comparison.error_marker = marker.clone();
    }
    if let Some(capacity) = toml.comparison.event_capacity {
        config.comparison.event_capacity = capacity;
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut DuetConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |primary: &str, fallback: &str| env(primary).or_else(|| env(fallback));

    if let Some(host) = lookup("DUET_OLLAMA_HOST", "OLLAMA_HOST") {
        config.backend.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = lookup("DUET_OLLAMA_PORT", "OLLAMA_PORT") {
        if let Ok(p) = port.parse::<u16>() {
            config.backend.port = p;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(timeout) = env("DUET_REQUEST_TIMEOUT") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.backend.timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }

    if let Some(provider) = env("DUET_PROVIDER") {
        config.selection.provider = Some(provider);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("DUET_MODEL") {
        config.selection.model = Some(model);
        config.source = ConfigSource::Env;
    }
    if let Some(stream) = env("DUET_STREAM") {
        config.selection.stream = parse_flag(&stream);
        config.source = ConfigSource::Env;
    }

    if let Some(marker) = env("DUET_ERROR_MARKER") {
        config.comparison.error_marker = marker;
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = env("DUET_EVENT_CAPACITY") {
        if let Ok(n) = capacity.parse::<usize>() {
            config.comparison.event_capacity = n;
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
    /// Host override
    pub host: Option<String>,

    /// Port override
    pub port: Option<u16>,

    /// Provider override
    pub provider: Option<String>,

    /// Model override
    pub model: Option<String>,

    /// Stream mode override
    pub stream: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set provider override
    #[must_use]
    pub fn with_provider(mut self, provider: String) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set stream mode override
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.provider.is_none()
            && self.model.is_none()
            && self.stream.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DuetConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.port {
            config.backend.port = port;
        }
        if let Some(ref provider) = self.provider {
            config.selection.provider = Some(provider.clone());
        }
        if let Some(ref model) = self.model {
            config.selection.model = Some(model.clone());
        }
        if let Some(stream) = self.stream {
            config.selection.stream = stream;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
