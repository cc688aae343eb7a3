//! Configuration loading, validation, and management for Turnwright.
//!
//! Loads configuration from `~/.turnwright/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use turnwright_core::{PerformanceHints, ToolCategory};

/// The root configuration structure.
///
/// Maps directly to `~/.turnwright/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on iterations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Model used when the caller names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Context Builder limits and trimming ceiling
    #[serde(default)]
    pub context: ContextConfig,

    /// Tool result sanitizer limits
    #[serde(default)]
    pub sanitizer: SanitizerConfig,

    /// Image result inlining guardrails
    #[serde(default)]
    pub images: ImageConfig,

    /// Tool definition filtering
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provider-specific configurations, keyed by provider id
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
}

fn default_max_iterations() -> usize {
    75
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert("anthropic".into(), ProviderConfig::new(ProviderKind::Anthropic));
    providers.insert("openai".into(), ProviderConfig::new(ProviderKind::Responses));
    providers.insert(
        "ollama".into(),
        ProviderConfig {
            no_tool_models: vec!["tinyllama".into(), "phi".into(), "gemma:2b".into()],
            ..ProviderConfig::new(ProviderKind::Local)
        },
    );
    providers
}

/// Bounds applied by the Context Builder and the trimming pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_system_chars")]
    pub max_system_chars: usize,

    #[serde(default = "default_max_open_files")]
    pub max_open_files: usize,

    #[serde(default = "default_max_open_file_chars")]
    pub max_open_file_chars: usize,

    #[serde(default = "default_max_history_chars")]
    pub max_history_chars: usize,

    /// Data URLs embedded in history entries are cut to this many chars
    #[serde(default = "default_max_data_url_chars")]
    pub max_data_url_chars: usize,

    #[serde(default = "default_max_selection_chars")]
    pub max_selection_chars: usize,

    /// Documents at or above this size are replaced by a size-only placeholder
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,

    /// Estimated-token ceiling the transcript is trimmed to before each turn
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Size older tool results are cut to when trimming
    #[serde(default = "default_trimmed_tool_result_chars")]
    pub trimmed_tool_result_chars: usize,
}

fn default_max_system_chars() -> usize {
    80_000
}
fn default_max_open_files() -> usize {
    10
}
fn default_max_open_file_chars() -> usize {
    45_000
}
fn default_max_history_chars() -> usize {
    12_000
}
fn default_max_data_url_chars() -> usize {
    2_000
}
fn default_max_selection_chars() -> usize {
    50_000
}
fn default_max_document_chars() -> usize {
    50_000
}
fn default_max_context_tokens() -> usize {
    150_000
}
fn default_trimmed_tool_result_chars() -> usize {
    4_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_system_chars: default_max_system_chars(),
            max_open_files: default_max_open_files(),
            max_open_file_chars: default_max_open_file_chars(),
            max_history_chars: default_max_history_chars(),
            max_data_url_chars: default_max_data_url_chars(),
            max_selection_chars: default_max_selection_chars(),
            max_document_chars: default_max_document_chars(),
            max_context_tokens: default_max_context_tokens(),
            trimmed_tool_result_chars: default_trimmed_tool_result_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    #[serde(default = "default_max_array_items")]
    pub max_array_items: usize,

    #[serde(default = "default_max_string_chars")]
    pub max_string_chars: usize,

    /// Nesting depth past which values are replaced by a marker
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_array_items() -> usize {
    500
}
fn default_max_string_chars() -> usize {
    75_000
}
fn default_max_depth() -> usize {
    64
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_array_items: default_max_array_items(),
            max_string_chars: default_max_string_chars(),
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Aggregate encoded size below which images are inlined
    #[serde(default = "default_max_inline_chars")]
    pub max_inline_chars: usize,

    #[serde(default = "default_max_inline_count")]
    pub max_inline_count: usize,
}

fn default_max_inline_chars() -> usize {
    200_000
}
fn default_max_inline_count() -> usize {
    8
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_inline_chars: default_max_inline_chars(),
            max_inline_count: default_max_inline_count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// When set, only these tool names are offered to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_list: Option<Vec<String>>,

    #[serde(default)]
    pub disabled_categories: Vec<ToolCategory>,
}

/// Wire-protocol family of a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI Responses API
    Responses,
    /// Responses-compatible gateway without `instructions` support
    ResponsesCompat,
    /// OpenAI-compatible chat completions on a local runtime
    Local,
}

impl ProviderKind {
    /// Base URL used when `api_url` is not set.
    pub fn default_api_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Responses | Self::ResponsesCompat => "https://api.openai.com/v1",
            Self::Local => "http://localhost:11434/v1",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Display name; defaults to the provider id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model ids routed to this provider explicitly
    #[serde(default)]
    pub models: Vec<String>,

    /// Model-name prefixes that cannot call tools reliably
    #[serde(default)]
    pub no_tool_models: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<HintsOverride>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            name: None,
            api_key: None,
            api_url: None,
            models: Vec::new(),
            no_tool_models: Vec::new(),
            hints: None,
        }
    }

    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_url())
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("models", &self.models)
            .field("no_tool_models", &self.no_tool_models)
            .field("hints", &self.hints)
            .finish()
    }
}

/// Partial override of an adapter's performance hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HintsOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tools: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tools_per_iteration: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl HintsOverride {
    pub fn apply(&self, mut hints: PerformanceHints) -> PerformanceHints {
        if let Some(n) = self.max_concurrent_tools {
            hints.max_concurrent_tools = n;
        }
        if let Some(n) = self.max_tools_per_iteration {
            hints.max_tools_per_iteration = n;
        }
        if let Some(n) = self.max_output_tokens {
            hints.max_output_tokens = n;
        }
        hints
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.turnwright/config.toml).
    ///
    /// Environment overrides:
    /// - `TURNWRIGHT_MODEL`, `TURNWRIGHT_MAX_ITERATIONS`
    /// - `ANTHROPIC_API_KEY` for Anthropic providers without a key
    /// - `OPENAI_API_KEY` for Responses providers without a key
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup`, then re-validate.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("TURNWRIGHT_MODEL") {
            self.default_model = model;
        }

        if let Some(raw) = lookup("TURNWRIGHT_MAX_ITERATIONS") {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "TURNWRIGHT_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        let anthropic_key = lookup("ANTHROPIC_API_KEY");
        let openai_key = lookup("OPENAI_API_KEY");
        for provider in self.providers.values_mut() {
            if provider.api_key.is_some() {
                continue;
            }
            provider.api_key = match provider.kind {
                ProviderKind::Anthropic => anthropic_key.clone(),
                ProviderKind::Responses => openai_key.clone(),
                _ => None,
            };
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".turnwright")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be at least 1".into(),
            ));
        }

        let c = &self.context;
        if c.max_system_chars == 0
            || c.max_open_file_chars == 0
            || c.max_history_chars == 0
            || c.max_context_tokens == 0
        {
            return Err(ConfigError::ValidationError(
                "context limits must be greater than zero".into(),
            ));
        }

        if self.sanitizer.max_array_items == 0
            || self.sanitizer.max_string_chars == 0
            || self.sanitizer.max_depth == 0
        {
            return Err(ConfigError::ValidationError(
                "sanitizer limits must be greater than zero".into(),
            ));
        }

        for (id, provider) in &self.providers {
            if let Some(hints) = &provider.hints {
                if hints.max_concurrent_tools == Some(0) || hints.max_tools_per_iteration == Some(0)
                {
                    return Err(ConfigError::ValidationError(format!(
                        "providers.{id}.hints limits must be greater than zero"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            default_model: default_model(),
            context: ContextConfig::default(),
            sanitizer: SanitizerConfig::default(),
            images: ImageConfig::default(),
            tools: ToolsConfig::default(),
            providers: default_providers(),
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
