//! Configuration loader with environment variable expansion

use super::{expand_env_vars, ConfigError, EngineConfig};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<EngineConfig, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: EngineConfig = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}
