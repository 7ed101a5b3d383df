//! Crate-level error type used by bootstrap code and the service binaries

use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::ConfigurationError;
use crate::hybrid::ValidationError;
use crate::sync_caller::SyncCallError;

#[derive(Error, Debug)]
pub enum InterconnectError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    SyncCall(#[from] SyncCallError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

impl InterconnectError {
    /// Process exit code for a service that stops on this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 78,
            Self::Broker(e) if e.is_retryable() => 69,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, InterconnectError>;
