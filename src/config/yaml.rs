//! YAML configuration loading.

use std::path::Path;

use super::error::ConfigError;
use super::types::BrainConfig;

impl BrainConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            }
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: BrainConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}
