use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::error::FlowscribeError;
use crate::pipeline::{DescribeFailurePolicy, RunConfig};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl From<ConfigLoadError> for FlowscribeError {
    fn from(err: ConfigLoadError) -> Self {
        match err {
            ConfigLoadError::MissingRequired(key) => FlowscribeError::MissingEnvVar(key),
            ConfigLoadError::InvalidValue { key, message } => {
                FlowscribeError::InvalidConfigValue { key, message }
            }
            other => FlowscribeError::ConfigError(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlowscribeConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_image_size")]
    pub image_size: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub skip_image: bool,

    #[serde(default)]
    pub describe_failure_policy: DescribeFailurePolicy,

    #[serde(default = "default_concurrency")]
    pub describe_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_text_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_image_timeout() -> u64 {
    180
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            image_size: default_image_size(),
            request_timeout_secs: default_request_timeout(),
            image_timeout_secs: default_image_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            enabled: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_image: false,
            describe_failure_policy: DescribeFailurePolicy::default(),
            describe_concurrency: default_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl FlowscribeConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FLOWSCRIBE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut flowscribe_config: FlowscribeConfig = builder.build()?.try_deserialize()?;

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                flowscribe_config.openai.api_key = Some(key);
            }
        }

        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            flowscribe_config.openai.api_base = base;
        }

        if let Ok(level) = std::env::var("FLOWSCRIBE_LOG_LEVEL") {
            flowscribe_config.logging.level = level;
        }

        flowscribe_config.validate()?;

        Ok(flowscribe_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !self.openai.api_base.starts_with("http://")
            && !self.openai.api_base.starts_with("https://")
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "openai.api_base".to_string(),
                message: "Must start with http:// or https://".to_string(),
            });
        }

        if self.openai.text_model.trim().is_empty() {
            return Err(ConfigLoadError::InvalidValue {
                key: "openai.text_model".to_string(),
                message: "Must not be empty".to_string(),
            });
        }

        if self.openai.image_model.trim().is_empty() {
            return Err(ConfigLoadError::InvalidValue {
                key: "openai.image_model".to_string(),
                message: "Must not be empty".to_string(),
            });
        }

        if self.openai.request_timeout_secs == 0 || self.openai.image_timeout_secs == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "openai.request_timeout_secs".to_string(),
                message: "Timeouts must be greater than 0".to_string(),
            });
        }

        if self.pipeline.describe_concurrency == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "pipeline.describe_concurrency".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    /// The API key is only needed once a stage actually calls the provider,
    /// so it is checked here rather than in `validate`.
    pub fn require_api_key(&self) -> Result<&str, ConfigLoadError> {
        self.openai
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigLoadError::MissingRequired("OPENAI_API_KEY".to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.request_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.image_timeout_secs)
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            skip_image: self.pipeline.skip_image,
            describe_failure_policy: self.pipeline.describe_failure_policy,
            describe_concurrency: self.pipeline.describe_concurrency,
            request_timeout: self.request_timeout(),
            image_timeout: self.image_timeout(),
            image_size: self.openai.image_size.clone(),
            output_dir: self.output.dir.clone(),
        }
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("flowscribe.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let mut env_paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        env_paths.push(cwd.join(".env"));
        env_paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = get_config_dir() {
        env_paths.push(config_dir.join(".env"));
    }

    for path in env_paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("flowscribe"))
}
