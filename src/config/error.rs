//! Configuration Error Types

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The `config` crate failed to merge or deserialize the layers
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// `INTERCONNECT_CONFIG_PATH` points at a file that does not exist
    #[error("Configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// The merged configuration violates a constraint
    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigurationError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ConfigurationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::validation(errors.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
