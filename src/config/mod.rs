//! Configuration module for the upload relay
//!
//! Configuration comes either from a YAML file (with `${VAR}` and
//! `${VAR:-default}` expansion) or straight from the process environment.
//! Either way it is built once at start-up and treated as read-only after.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Container used when none is configured
pub const DEFAULT_CONTAINER: &str = "maana-azure-storage-wrapper";

/// Largest block Azure accepts for a single Put Block call (4000 MiB)
pub const MAX_BLOCK_SIZE: usize = 4000 * 1024 * 1024;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// assert_eq!(expand_env_vars("prefix-${MY_VAR}-suffix"), "prefix-value-suffix");
/// assert_eq!(expand_env_vars("${MISSING:-default}"), "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default: keep the placeholder
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Build configuration from environment variables
    ///
    /// Reads `AZURE_STORAGE_ACCOUNT` and `AZURE_STORAGE_ACCESS_KEY` (required),
    /// plus `AZURE_STORAGE_CONTAINER`, `AZURE_STORAGE_ENDPOINT`, `PORT`,
    /// `HOSTNAME`, `PUBLICNAME`, `SERVICE_ID` and `REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigLoader::from_env()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "server.timeout_secs must be greater than zero".into(),
            ));
        }

        if self.server.service_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.service_id cannot be empty".into(),
            ));
        }

        if self.storage.container.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.container cannot be empty".into(),
            ));
        }

        if self.storage.block_size == 0 || self.storage.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Invalid block size {}: must be between 1 and {} bytes",
                self.storage.block_size, MAX_BLOCK_SIZE
            )));
        }

        if let Some(ref endpoint) = self.storage.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(
                    "Invalid storage endpoint: must start with http:// or https://".into(),
                ));
            }
        }

        if self.storage.backend == BackendKind::Azure {
            if self.storage.account.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "storage.account is required for the azure backend".into(),
                ));
            }
            if BASE64_STANDARD.decode(&self.storage.access_key).is_err() {
                return Err(ConfigError::ValidationError(
                    "storage.access_key must be valid base64".into(),
                ));
            }
        }

        if self.upload.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "upload.queue_depth must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Host name used in the start-up banner
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Externally visible DNS name of the service
    #[serde(default = "default_hostname")]
    pub public_name: String,
    #[serde(default = "default_service_id")]
    pub service_id: String,
    /// Blanket per-connection timeout, independent of upload size
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{}", default_port()),
            hostname: default_hostname(),
            public_name: default_hostname(),
            service_id: default_service_id(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub(crate) fn default_port() -> u16 {
    8080
}

fn default_hostname() -> String {
    "localhost".to_string()
}

pub(crate) fn default_service_id() -> String {
    "maana-service".to_string()
}

pub(crate) fn default_timeout_secs() -> u64 {
    600 // 10 minutes
}

/// Which storage backend the relay writes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Azure,
    Memory,
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default = "default_container")]
    pub container: String,
    /// Blob service endpoint override (emulators, private endpoints)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Size of each staged block
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Timeout for a single request to the blob service
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            account: String::new(),
            access_key: String::new(),
            container: default_container(),
            endpoint: None,
            block_size: default_block_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_container() -> String {
    DEFAULT_CONTAINER.to_string()
}

fn default_block_size() -> usize {
    4 * 1024 * 1024 // 4MB
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// Relay tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunks buffered between the source reader and the sink writer
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_queue_depth() -> usize {
    4
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration
///
/// `RUST_LOG` takes precedence over `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
