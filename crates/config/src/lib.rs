//! Configuration loading, validation, and management for palaver.
//!
//! Loads configuration from `~/.palaver/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// History backends understood by `palaver-history`.
pub const HISTORY_BACKENDS: &[&str] = &["sqlite", "jsonl", "memory"];

/// The root configuration structure.
///
/// Maps directly to `~/.palaver/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_provider")]
    pub default_provider: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Instructions sent ahead of every turn. Never written to history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("history", &self.history)
            .field("gateway", &self.gateway)
            .field("streaming", &self.streaming)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Where conversation history lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// "sqlite", "jsonl" or "memory"
    #[serde(default = "default_history_backend")]
    pub backend: String,

    /// Database file (sqlite) or directory (jsonl). Defaults under `~/.palaver`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_history_backend() -> String {
    "sqlite".into()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            path: None,
        }
    }
}

impl HistoryConfig {
    /// The configured path, or the backend's default location.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match self.backend.as_str() {
            "jsonl" => AppConfig::config_dir().join("history"),
            _ => AppConfig::config_dir().join("history.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// What happens to an in-flight turn when its client goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Keep generating in the background and commit the turn.
    #[default]
    Finish,
    /// Drop the backend stream; nothing is committed.
    Abandon,
}

/// Output stream tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Minimum interval between partial model frames
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Frames buffered between the orchestrator and the transport
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,

    #[serde(default)]
    pub on_disconnect: DisconnectPolicy,
}

fn default_debounce_ms() -> u64 {
    10
}
fn default_frame_buffer() -> usize {
    128
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            frame_buffer: default_frame_buffer(),
            on_disconnect: DisconnectPolicy::default(),
        }
    }
}

impl StreamingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model rounds allowed per turn before giving up on tool calls
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// Which tools the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub weather: bool,

    #[serde(default = "default_true")]
    pub time: bool,

    /// Timeout for outbound lookups made by tools
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            weather: true,
            time: true,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.palaver/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `PALAVER_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `OPENROUTER_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("PALAVER_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(provider) = lookup("PALAVER_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("PALAVER_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".palaver")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.streaming.debounce_ms == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.debounce_ms must be > 0".into(),
            ));
        }

        if self.streaming.frame_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.frame_buffer must be > 0".into(),
            ));
        }

        if !HISTORY_BACKENDS.contains(&self.history.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown history backend '{}' (expected one of: {})",
                self.history.backend,
                HISTORY_BACKENDS.join(", ")
            )));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: None,
            history: HistoryConfig::default(),
            gateway: GatewayConfig::default(),
            streaming: StreamingConfig::default(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.streaming.debounce(), Duration::from_millis(10));
        assert_eq!(config.streaming.on_disconnect, DisconnectPolicy::Finish);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.history.backend, config.history.backend);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_debounce_rejected() {
        let mut config = AppConfig::default();
        config.streaming.debounce_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.streaming.frame_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_history_backend_rejected() {
        let mut config = AppConfig::default();
        config.history.backend = "postgres".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn load_from_file_with_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_model = "gpt-4o-mini"
system_prompt = "You are a weather assistant."

[history]
backend = "jsonl"
path = "/var/lib/palaver"

[streaming]
debounce_ms = 25
on_disconnect = "abandon"

[providers.openrouter]
api_key = "sk-or-test"
api_url = "https://openrouter.ai/api/v1"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.history.backend, "jsonl");
        assert_eq!(config.history.resolved_path(), PathBuf::from("/var/lib/palaver"));
        assert_eq!(config.streaming.debounce_ms, 25);
        assert_eq!(config.streaming.frame_buffer, 128);
        assert_eq!(config.streaming.on_disconnect, DisconnectPolicy::Abandon);
        assert!(config.providers["openrouter"].api_key.is_some());
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_temperature = \"warm\"").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_key_precedence() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "OPENAI_API_KEY" => Some("sk-openai".into()),
            "OPENROUTER_API_KEY" => Some("sk-or".into()),
            "PALAVER_MODEL" => Some("gpt-4o-mini".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.default_provider, "openai");

        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|key| (key == "PALAVER_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_keys() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_history_paths_follow_backend() {
        let sqlite = HistoryConfig::default();
        assert!(sqlite.resolved_path().ends_with(".palaver/history.db"));

        let jsonl = HistoryConfig {
            backend: "jsonl".into(),
            path: None,
        };
        assert!(jsonl.resolved_path().ends_with(".palaver/history"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o"));
        assert!(toml_str.contains("debounce_ms = 10"));
    }
}
