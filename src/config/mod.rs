//! Configuration module for Mizuchi Storage
//!
//! Typed settings for the S3 backend and the storage engine, loadable from
//! YAML with environment variable expansion, plus the errors raised when an
//! engine is assembled from invalid options.

use crate::storage::s3::{DEFAULT_PART_SIZE, MIN_PART_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Expand `${VAR}` and `${VAR:-default}` references in configuration text.
///
/// Variable names are uppercase ASCII. A reference to an unset variable
/// without a default is left as written.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
        return s.to_string();
    };

    re.replace_all(s, |caps: &regex_lite::Captures<'_>| match std::env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => caps
            .get(2)
            .map_or_else(|| caps[0].to_string(), |default| default.as_str().to_string()),
    })
    .into_owned()
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Check a bucket name against the S3 naming rules.
///
/// 3 to 63 characters of lowercase letters, digits, `.` and `-`, beginning
/// and ending with a letter or digit, without consecutive dots.
pub fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }

    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }

    !name.contains("..")
        && bytes
            .iter()
            .all(|&b| edge_ok(b) || b == b'.' || b == b'-')
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("An object store client is required")]
    MissingClient,

    #[error("bucket is required")]
    MissingBucket,

    #[error("Invalid bucket name '{0}'")]
    InvalidBucketName(String),
}

/// Main configuration structure
///
/// # Example
///
/// ```yaml
/// bucket: "uploads"
/// content_type: auto
/// s3:
///   region: "us-east-1"
///   endpoint: "${S3_ENDPOINT:-http://localhost:9000}"
///   access_key: "${S3_ACCESS_KEY}"
///   secret_key: "${S3_SECRET_KEY}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub bucket: String,
    pub s3: S3Config,
    #[serde(default)]
    pub content_type: ContentTypeMode,
    #[serde(default = "default_cleanup_orphans")]
    pub cleanup_orphans: bool,
}

impl EngineConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::MissingBucket);
        }

        if !is_valid_bucket_name(&self.bucket) {
            return Err(ConfigError::InvalidBucketName(self.bucket.clone()));
        }

        self.s3.validate()
    }
}

fn default_cleanup_orphans() -> bool {
    true
}

/// How the engine determines the stored content type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypeMode {
    /// Always `application/octet-stream`
    #[default]
    Default,
    /// Sniff the first chunk of the stream
    Auto,
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

impl S3Config {
    /// Validate the backend settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("S3 region cannot be empty".into()));
        }

        if let Some(ref endpoint) = self.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid S3 endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConfigError::ValidationError(
                "access_key and secret_key must be set together".into(),
            ));
        }

        if self.part_size < MIN_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Invalid part_size {}: must be at least {} bytes",
                self.part_size, MIN_PART_SIZE
            )));
        }

        Ok(())
    }
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}
