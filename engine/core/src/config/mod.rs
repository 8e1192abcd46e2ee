//! TOML Configuration File Support
//!
//! Centralized configuration loading for hearth, supporting a TOML file at
//! `~/.config/hearth/hearth.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/hearth/hearth.toml` (typically `~/.config/hearth/hearth.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! backend = "local"
//!
//! [local]
//! binary = "bundled"
//! mode = "server"
//! models_dir = "~/models"
//! port_range_start = 8080
//! port_range_end = 8099
//! context_size = 2048
//! gpu_layers = 99
//!
//! [ollama]
//! url = "http://localhost:11434"
//! auto_start = true
//!
//! [cloud]
//! api_key = "hf_..."
//!
//! [generation]
//! default_model = "llama3.2"
//! max_tokens = 512
//! temperature = 0.7
//! ```

use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{BackendKind, MAX_TEMPERATURE};
use crate::process::port::DEFAULT_PORT_RANGE;
use crate::process::{HealthPolicy, SupervisorConfig};

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default hosted inference endpoint
pub const DEFAULT_CLOUD_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// Endpoint used to check a cloud API key
pub const DEFAULT_CLOUD_WHOAMI_URL: &str = "https://huggingface.co/api/whoami-v2";

/// System prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, harmless, and honest AI assistant.";

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

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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

/// How the local backend runs inference
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalMode {
    /// One long-lived HTTP server per model
    #[default]
    Server,
    /// One CLI process per generation
    Cli,
}

impl FromStr for LocalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "cli" => Ok(Self::Cli),
            other => Err(ConfigError::ValidationError(format!(
                "unknown local mode '{other}' (expected server or cli)"
            ))),
        }
    }
}

/// `[local]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalToml {
    /// Server/CLI binary: path, name on PATH, or "bundled"
    pub binary: Option<String>,

    /// "server" or "cli"
    pub mode: Option<LocalMode>,

    /// Directory scanned for `.gguf` models
    pub models_dir: Option<String>,

    /// Address the spawned server binds
    pub host: Option<String>,

    /// First port tried
    pub port_range_start: Option<u16>,

    /// Last port tried
    pub port_range_end: Option<u16>,

    /// Context window size
    pub context_size: Option<u32>,

    /// Layers offloaded to the GPU
    pub gpu_layers: Option<u32>,

    /// Extra server arguments
    pub extra_args: Option<Vec<String>>,

    /// Startup health deadline in seconds
    pub health_timeout_secs: Option<u64>,

    /// Delay between health probes in milliseconds
    pub health_poll_interval_ms: Option<u64>,

    /// Wait after each shutdown signal in milliseconds
    pub shutdown_step_timeout_ms: Option<u64>,
}

/// `[ollama]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaToml {
    /// Daemon URL
    pub url: Option<String>,

    /// Start the daemon if it is not reachable
    pub auto_start: Option<bool>,

    /// Daemon binary used for auto-start
    pub binary: Option<String>,
}

/// `[cloud]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudToml {
    /// API token
    pub api_key: Option<String>,

    /// Model endpoint prefix
    pub base_url: Option<String>,

    /// Token check endpoint
    pub whoami_url: Option<String>,
}

/// `[generation]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Model used when the caller names none
    pub default_model: Option<String>,

    /// Maximum tokens per response
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// System prompt for local conversations
    pub system_prompt: Option<String>,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthToml {
    /// Active backend
    pub backend: Option<BackendKind>,

    /// Local inference section
    pub local: LocalToml,

    /// Ollama section
    pub ollama: OllamaToml,

    /// Cloud section
    pub cloud: CloudToml,

    /// Generation defaults section
    pub generation: GenerationToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Local inference settings
#[derive(Clone, Debug, PartialEq)]
pub struct LocalConfig {
    /// Server/CLI binary: path, name on PATH, or "bundled"
    pub binary: String,
    /// Server or per-generation CLI
    pub mode: LocalMode,
    /// Directory scanned for `.gguf` models
    pub models_dir: Option<PathBuf>,
    /// Address the spawned server binds
    pub host: String,
    /// Ports tried before an OS-assigned one
    pub port_range: RangeInclusive<u16>,
    /// Context window size
    pub context_size: u32,
    /// Layers offloaded to the GPU
    pub gpu_layers: u32,
    /// Extra server arguments
    pub extra_args: Vec<String>,
    /// Startup health deadline
    pub health_timeout: Duration,
    /// Delay between health probes
    pub health_poll_interval: Duration,
    /// Wait after each shutdown signal
    pub shutdown_step_timeout: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        let health = HealthPolicy::default();
        Self {
            binary: crate::process::binary::BUNDLED.to_string(),
            mode: LocalMode::Server,
            models_dir: dirs::home_dir().map(|home| home.join("models")),
            host: "127.0.0.1".to_string(),
            port_range: DEFAULT_PORT_RANGE,
            context_size: 2048,
            gpu_layers: 99,
            extra_args: Vec::new(),
            health_timeout: health.timeout,
            health_poll_interval: health.poll_interval,
            shutdown_step_timeout: Duration::from_secs(2),
        }
    }
}

impl LocalConfig {
    /// Supervisor settings for an already resolved server binary
    #[must_use]
    pub fn supervisor_config(&self, binary: PathBuf) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(binary);
        config.host.clone_from(&self.host);
        config.port_range = self.port_range.clone();
        config.context_size = self.context_size;
        config.gpu_layers = self.gpu_layers;
        config.extra_args.clone_from(&self.extra_args);
        config.health.timeout = self.health_timeout;
        config.health.poll_interval = self.health_poll_interval;
        config.shutdown_step_timeout = self.shutdown_step_timeout;
        config
    }
}

/// Ollama settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Daemon URL
    pub url: String,
    /// Start the daemon if it is not reachable
    pub auto_start: bool,
    /// Daemon binary used for auto-start
    pub binary: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            auto_start: true,
            binary: "ollama".to_string(),
        }
    }
}

/// Hosted inference settings
#[derive(Clone, PartialEq, Eq)]
pub struct CloudConfig {
    /// API token
    pub api_key: Option<String>,
    /// Model endpoint prefix
    pub base_url: String,
    /// Token check endpoint
    pub whoami_url: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_CLOUD_BASE_URL.to_string(),
            whoami_url: DEFAULT_CLOUD_WHOAMI_URL.to_string(),
        }
    }
}

// Keeps the token out of logs
impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("whoami_url", &self.whoami_url)
            .finish()
    }
}

/// Generation defaults
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationConfig {
    /// Model used when the caller names none
    pub default_model: Option<String>,
    /// Maximum tokens per response
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// System prompt for local conversations
    pub system_prompt: Option<String>,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            max_tokens: 512,
            temperature: 0.7,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Centralized configuration for hearth
///
/// Consolidates all sources and tracks where the values came from. Use
/// [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug, PartialEq)]
pub struct HearthConfig {
    /// Active backend
    pub backend: BackendKind,
    /// Local inference
    pub local: LocalConfig,
    /// Ollama daemon
    pub ollama: OllamaConfig,
    /// Hosted inference
    pub cloud: CloudConfig,
    /// Generation defaults
    pub generation: GenerationConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            local: LocalConfig::default(),
            ollama: OllamaConfig::default(),
            cloud: CloudConfig::default(),
            generation: GenerationConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl HearthConfig {
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

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local.port_range.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "port range {}..={} is empty",
                self.local.port_range.start(),
                self.local.port_range.end()
            )));
        }
        if self.local.context_size == 0 {
            return Err(ConfigError::ValidationError(
                "context_size must be greater than zero".to_string(),
            ));
        }
        if self.local.health_poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "health_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.generation.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        let temperature = self.generation.temperature;
        if !temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(ConfigError::ValidationError(format!(
                "temperature {temperature} is outside [0, {MAX_TEMPERATURE}]"
            )));
        }
        for (name, url) in [
            ("ollama.url", &self.ollama.url),
            ("cloud.base_url", &self.cloud.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/hearth/hearth.toml` or
/// `~/.config/hearth/hearth.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("hearth").join("hearth.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// merged values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<HearthConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// If `path` is `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the merged values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<HearthConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<HearthConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = HearthConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: HearthToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, &env)?;
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut HearthConfig, toml: &HearthToml) {
    if let Some(backend) = toml.backend {
        config.backend = backend;
    }

    // Local settings
    let local = &toml.local;
    if let Some(ref binary) = local.binary {
        config.local.binary.clone_from(binary);
    }
    if let Some(mode) = local.mode {
        config.local.mode = mode;
    }
    if let Some(ref dir) = local.models_dir {
        config.local.models_dir = Some(expand_home(dir));
    }
    if let Some(ref host) = local.host {
        config.local.host.clone_from(host);
    }
    let start = local
        .port_range_start
        .unwrap_or(*config.local.port_range.start());
    let end = local.port_range_end.unwrap_or(*config.local.port_range.end());
    config.local.port_range = start..=end;
    if let Some(size) = local.context_size {
        config.local.context_size = size;
    }
    if let Some(layers) = local.gpu_layers {
        config.local.gpu_layers = layers;
    }
    if let Some(ref args) = local.extra_args {
        config.local.extra_args.clone_from(args);
    }
    if let Some(secs) = local.health_timeout_secs {
        config.local.health_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = local.health_poll_interval_ms {
        config.local.health_poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = local.shutdown_step_timeout_ms {
        config.local.shutdown_step_timeout = Duration::from_millis(ms);
    }

    // Ollama settings
    if let Some(ref url) = toml.ollama.url {
        config.ollama.url = normalize_url(url);
    }
    if let Some(auto_start) = toml.ollama.auto_start {
        config.ollama.auto_start = auto_start;
    }
    if let Some(ref binary) = toml.ollama.binary {
        config.ollama.binary.clone_from(binary);
    }

    // Cloud settings
    if let Some(ref key) = toml.cloud.api_key {
        config.cloud.api_key = non_empty(key);
    }
    if let Some(ref url) = toml.cloud.base_url {
        config.cloud.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ref url) = toml.cloud.whoami_url {
        config.cloud.whoami_url.clone_from(url);
    }

    // Generation settings
    let generation = &toml.generation;
    if let Some(ref model) = generation.default_model {
        config.generation.default_model = non_empty(model);
    }
    if let Some(max_tokens) = generation.max_tokens {
        config.generation.max_tokens = max_tokens;
    }
    if let Some(temperature) = generation.temperature {
        config.generation.temperature = temperature;
    }
    if let Some(ref prompt) = generation.system_prompt {
        config.generation.system_prompt = non_empty(prompt);
    }
    if let Some(secs) = generation.request_timeout_secs {
        config.generation.request_timeout = Duration::from_secs(secs);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut HearthConfig, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;

    if let Some(backend) = env("HEARTH_BACKEND") {
        config.backend = backend
            .parse()
            .map_err(|e: crate::error::GenerationError| ConfigError::ValidationError(e.to_string()))?;
        touched = true;
    }
    if let Some(binary) = env("HEARTH_LLAMA_BINARY") {
        config.local.binary = binary;
        touched = true;
    }
    if let Some(mode) = env("HEARTH_LOCAL_MODE") {
        config.local.mode = mode.parse()?;
        touched = true;
    }
    if let Some(dir) = env("HEARTH_MODELS_DIR") {
        config.local.models_dir = Some(expand_home(&dir));
        touched = true;
    }
    if let Some(url) = env("HEARTH_OLLAMA_URL").or_else(|| env("OLLAMA_HOST")) {
        config.ollama.url = normalize_url(&url);
        touched = true;
    }
    if let Some(key) = env("HEARTH_CLOUD_API_KEY").or_else(|| env("HF_API_KEY")) {
        config.cloud.api_key = non_empty(&key);
        touched = true;
    }
    if let Some(model) = env("HEARTH_DEFAULT_MODEL") {
        config.generation.default_model = non_empty(&model);
        touched = true;
    }
    if let Some(max_tokens) = env("HEARTH_MAX_TOKENS") {
        if let Ok(n) = max_tokens.parse::<u32>() {
            config.generation.max_tokens = n;
            touched = true;
        }
    }
    if let Some(temperature) = env("HEARTH_TEMPERATURE") {
        if let Ok(t) = temperature.parse::<f32>() {
            config.generation.temperature = t;
            touched = true;
        }
    }
    if let Some(prompt) = env("HEARTH_SYSTEM_PROMPT") {
        config.generation.system_prompt = non_empty(&prompt);
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Accept `host:port` as well as full URLs (as `OLLAMA_HOST` does)
fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Expand a leading `~` to the home directory
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    Path::new(path).to_path_buf()
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend override
    pub backend: Option<BackendKind>,

    /// Default model override
    pub default_model: Option<String>,

    /// Local binary override
    pub llama_binary: Option<String>,

    /// Local mode override
    pub local_mode: Option<LocalMode>,

    /// Ollama URL override
    pub ollama_url: Option<String>,

    /// Max tokens override
    pub max_tokens: Option<u32>,

    /// Temperature override
    pub temperature: Option<f32>,

    /// System prompt override
    pub system_prompt: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backend override
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Set local binary override
    #[must_use]
    pub fn with_llama_binary(mut self, binary: String) -> Self {
        self.llama_binary = Some(binary);
        self
    }

    /// Set local mode override
    #[must_use]
    pub fn with_local_mode(mut self, mode: LocalMode) -> Self {
        self.local_mode = Some(mode);
        self
    }

    /// Set Ollama URL override
    #[must_use]
    pub fn with_ollama_url(mut self, url: String) -> Self {
        self.ollama_url = Some(url);
        self
    }

    /// Set max tokens override
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature override
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set system prompt override
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    fn is_empty(&self) -> bool {
        self.backend.is_none()
            && self.default_model.is_none()
            && self.llama_binary.is_none()
            && self.local_mode.is_none()
            && self.ollama_url.is_none()
            && self.max_tokens.is_none()
            && self.temperature.is_none()
            && self.system_prompt.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override produces an
    /// invalid configuration.
    pub fn apply(&self, config: &mut HearthConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(ref model) = self.default_model {
            config.generation.default_model = non_empty(model);
        }
        if let Some(ref binary) = self.llama_binary {
            config.local.binary.clone_from(binary);
        }
        if let Some(mode) = self.local_mode {
            config.local.mode = mode;
        }
        if let Some(ref url) = self.ollama_url {
            config.ollama.url = normalize_url(url);
        }
        if let Some(max_tokens) = self.max_tokens {
            config.generation.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.generation.temperature = temperature;
        }
        if let Some(ref prompt) = self.system_prompt {
            config.generation.system_prompt = non_empty(prompt);
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
