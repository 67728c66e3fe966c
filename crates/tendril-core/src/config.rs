//! Configuration management for tendril.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/tendril/config.json`
//! 2. Environment variable: `TENDRIL_CONFIG_CONTENT`
//! 3. Project config: `tendril.json` or `tendril.jsonc` in the project directory
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::error::{ConfigError, CoreResult};
use crate::prompts::Prompts;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tendril_provider::anthropic::{DEFAULT_COUNT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use tendril_provider::{
    AnthropicGateway, ModelTier, DEFAULT_OUTPUT_TOKENS, MAX_INPUT_TOKENS, THINKING_BUDGET,
};
use tendril_tools::ToolsConfig;

/// Environment variable holding inline config content.
pub const CONFIG_CONTENT_ENV: &str = "TENDRIL_CONFIG_CONTENT";

/// Environment variable the API key falls back to.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Battery percentage below which the model is told to wrap up.
pub const DEFAULT_LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// Static regex for variable substitution, compiled once.
static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Main configuration structure.
///
/// Every field is optional so that sources can be layered. Use the accessor
/// methods to read effective values with defaults applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Default model: `sonnet` or `opus`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelTier>,

    /// `max_tokens` for each completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Extended thinking budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    /// Context window the battery is measured against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u32>,

    /// Battery percentage that triggers the low-battery warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_battery_threshold: Option<f64>,

    /// API connection settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,

    /// Prompt overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsConfig>,

    /// Built-in tool settings. A later source replaces the whole section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    /// Where the conversation is persisted between runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
}

/// API connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// API key. Falls back to `ANTHROPIC_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Completion request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Token-count request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_timeout_secs: Option<u64>,
}

impl ApiConfig {
    fn merge(mut self, other: Self) -> Self {
        self.base_url = merge_option(self.base_url, other.base_url);
        self.key = merge_option(self.key, other.key);
        self.timeout_secs = merge_option(self.timeout_secs, other.timeout_secs);
        self.count_timeout_secs = merge_option(self.count_timeout_secs, other.count_timeout_secs);
        self
    }
}

/// Prompt text overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// System prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Text appended to the final user message. `{{BATTERY}}` is replaced
    /// with the battery notice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

/// Token limits applied to every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_output_tokens: u32,
    pub thinking_budget: u32,
    pub max_input_tokens: u32,
    pub low_battery_threshold: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_output_tokens: DEFAULT_OUTPUT_TOKENS,
            thinking_budget: THINKING_BUDGET,
            max_input_tokens: MAX_INPUT_TOKENS,
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/tendril/`
    /// 2. `TENDRIL_CONFIG_CONTENT` environment variable
    /// 3. Project config from `project_dir`
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "tendril.json", "tendril.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Ok(content) = std::env::var(CONFIG_CONTENT_ENV) {
            let loaded = Self::parse_jsonc(&content, "<env>")?;
            config = config.merge(loaded);
        }

        if let Some(dir) = project_dir {
            for name in &["tendril.jsonc", "tendril.json"] {
                let path = dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        config.validate()?;
        Ok((config, sources))
    }

    /// Get the global config directory.
    ///
    /// On Unix systems, prefers `~/.config/tendril` over the
    /// platform-specific directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("tendril");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("tendril"))
    }

    /// Get the data directory.
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("tendril"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Check values that serde alone cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = self.limits();
        if limits.max_input_tokens == 0 {
            return Err(ConfigError::validation("max_input_tokens must be positive"));
        }
        if limits.thinking_budget >= limits.max_output_tokens {
            return Err(ConfigError::validation(format!(
                "thinking_budget ({}) must be lower than max_output_tokens ({})",
                limits.thinking_budget, limits.max_output_tokens
            )));
        }
        if !(0.0..=100.0).contains(&limits.low_battery_threshold) {
            return Err(ConfigError::validation(
                "low_battery_threshold must be between 0 and 100",
            ));
        }
        Ok(())
    }

    /// Default model.
    pub fn model(&self) -> ModelTier {
        self.model.unwrap_or_default()
    }

    /// Token limits with defaults applied.
    pub fn limits(&self) -> Limits {
        let defaults = Limits::default();
        Limits {
            max_output_tokens: self.max_output_tokens.unwrap_or(defaults.max_output_tokens),
            thinking_budget: self.thinking_budget.unwrap_or(defaults.thinking_budget),
            max_input_tokens: self.max_input_tokens.unwrap_or(defaults.max_input_tokens),
            low_battery_threshold: self
                .low_battery_threshold
                .unwrap_or(defaults.low_battery_threshold),
        }
    }

    /// Effective prompts, built-in text where not overridden.
    pub fn prompts(&self) -> Prompts {
        let defaults = Prompts::default();
        let overrides = self.prompts.clone().unwrap_or_default();
        Prompts {
            system: overrides.system.unwrap_or(defaults.system),
            suffix: overrides.suffix.unwrap_or(defaults.suffix),
        }
    }

    /// Built-in tool settings.
    pub fn tools(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }

    /// API key from the config, else from the environment.
    pub fn api_key(&self) -> Option<String> {
        self.api
            .as_ref()
            .and_then(|api| api.key.clone())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Build the Anthropic gateway described by this config.
    pub fn gateway(&self) -> CoreResult<AnthropicGateway> {
        let key = self.api_key().ok_or(ConfigError::MissingApiKey)?;
        let api = self.api.clone().unwrap_or_default();

        let gateway = match &api.base_url {
            Some(url) => AnthropicGateway::with_base_url(&key, url)?,
            None => AnthropicGateway::new(&key)?,
        };

        let request = api
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let count = api
            .count_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COUNT_TIMEOUT);
        Ok(gateway.with_timeouts(request, count))
    }

    /// Parse JSONC (JSON with comments).
    fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Strip `//` and `/* */` comments outside of strings.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if escape_next {
                result.push(c);
                escape_next = false;
                continue;
            }

            if c == '\\' && in_string {
                result.push(c);
                escape_next = true;
                continue;
            }

            if c == '"' {
                in_string = !in_string;
                result.push(c);
                continue;
            }

            if in_string {
                result.push(c);
                continue;
            }

            if c == '/' {
                match chars.peek() {
                    Some('/') => {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '\n' {
                                result.push('\n');
                                break;
                            }
                        }
                        continue;
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = ' ';
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                break;
                            }
                            // Keep line numbers stable for error messages
                            if c == '\n' {
                                result.push('\n');
                            }
                            prev = c;
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            result.push(c);
        }

        result
    }

    /// Substitute `{env:VAR}` and `{file:path}` references. File paths are
    /// relative to the config file.
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut result = content.to_string();

        for cap in var_regex().captures_iter(content) {
            let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                "file" => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map(|v| v.trim().to_string())
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                }
                _ => continue,
            };

            result = result.replace(full_match.as_str(), &replacement);
        }

        Ok(result)
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        self.schema = merge_option(self.schema, other.schema);
        self.model = merge_option(self.model, other.model);
        self.max_output_tokens = merge_option(self.max_output_tokens, other.max_output_tokens);
        self.thinking_budget = merge_option(self.thinking_budget, other.thinking_budget);
        self.max_input_tokens = merge_option(self.max_input_tokens, other.max_input_tokens);
        self.low_battery_threshold =
            merge_option(self.low_battery_threshold, other.low_battery_threshold);
        self.api = match (self.api, other.api) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, other) => merge_option(base, other),
        };
        self.prompts = match (self.prompts, other.prompts) {
            (Some(base), Some(other)) => Some(PromptsConfig {
                system: merge_option(base.system, other.system),
                suffix: merge_option(base.suffix, other.suffix),
            }),
            (base, other) => merge_option(base, other),
        };
        self.tools = merge_option(self.tools, other.tools);
        self.session_file = merge_option(self.session_file, other.session_file);
        self
    }
}

/// Merge two Option values.
fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (_, Some(o)) => Some(o),
        (b, None) => b,
    }
}
