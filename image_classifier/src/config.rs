use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigValidationError {
    #[error("model input size must be non-zero, got {0}x{1}")]
    InputSize(u32, u32),
    #[error("model.num_instances must be at least 1")]
    NoInstances,
    #[error("decoder.max_payload_bytes must be non-zero")]
    PayloadLimit,
    #[error("inference.timeout_ms must be non-zero")]
    Timeout,
    #[error("no class labels configured: set labels.class_names or labels.labels_file")]
    NoLabels,
}

pub trait Validatable {
    fn validate(&self) -> Result<(), ConfigValidationError>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_side")]
    pub input_width: u32,
    #[serde(default = "default_input_side")]
    pub input_height: u32,
    /// Load the model at startup instead of on the first prediction.
    #[serde(default)]
    pub eager_load: bool,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

fn default_input_side() -> u32 {
    128
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err(ConfigValidationError::InputSize(
                self.input_width,
                self.input_height,
            ));
        }
        if self.num_instances == 0 {
            return Err(ConfigValidationError::NoInstances);
        }
        // A missing model file is not a configuration error, /predict reports it.
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    #[serde(default)]
    pub class_names: Vec<String>,
    #[serde(default)]
    pub labels_file: Option<String>,
    #[serde(default = "default_labels_dir")]
    pub labels_dir: PathBuf,
}

fn default_labels_dir() -> PathBuf {
    PathBuf::from("model")
}

impl LabelsConfig {
    pub fn get_path(&self) -> Option<PathBuf> {
        self.labels_file
            .as_ref()
            .map(|file| self.labels_dir.join(file))
    }
}

impl Validatable for LabelsConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.class_names.is_empty() && self.labels_file.is_none() {
            return Err(ConfigValidationError::NoLabels);
        }
        Ok(())
    }
}

/// Policy knobs applied to untrusted uploads.
#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// An empty list accepts any declared type.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default = "default_true")]
    pub recover_truncated: bool,
    /// Longest edge kept before the final resize.
    #[serde(default = "default_max_source_edge")]
    pub max_source_edge: u32,
}

fn default_max_payload_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_allowed_mime_types() -> Vec<String> {
    vec!["image/jpeg".into(), "image/png".into()]
}

fn default_true() -> bool {
    true
}

fn default_max_source_edge() -> u32 {
    2048
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
            recover_truncated: true,
            max_source_edge: default_max_source_edge(),
        }
    }
}

impl Validatable for DecoderConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_payload_bytes == 0 {
            return Err(ConfigValidationError::PayloadLimit);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl InferenceConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Validatable for InferenceConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.timeout_ms == 0 {
            return Err(ConfigValidationError::Timeout);
        }
        Ok(())
    }
}

impl Validatable for Config {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        self.model.validate()?;
        self.labels.validate()?;
        self.decoder.validate()?;
        self.inference.validate()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = config.try_deserialize::<Config>()?;
    config
        .validate()
        .map_err(|e| config::ConfigError::Message(e.to_string()))?;

    Ok(config)
}
