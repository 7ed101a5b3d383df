//! # Web API Error Types
//!
//! Errors returned by the inbound trigger handlers and their HTTP responses.
//! Bodies are short plain text; internal causes are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::broker::BrokerError;
use crate::hybrid::{HybridFailure, ValidationError};
use crate::sync_caller::SyncCallError;

/// Web-facing errors with HTTP status code mappings
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Synchronous call failed: {0}")]
    SyncFailed(SyncCallError),

    #[error("Publish failed: {0}")]
    PublishFailed(BrokerError),

    #[error("Hybrid request failed: {0}")]
    Hybrid(HybridFailure),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SyncFailed(_) | Self::PublishFailed(_) | Self::Hybrid(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Body text handed to the caller
    pub fn outward_message(&self) -> String {
        match self {
            Self::SyncFailed(_) => "Error communicating with Service B".to_string(),
            Self::PublishFailed(_) => "Error sending message".to_string(),
            Self::Hybrid(failure) => failure.outward_message().to_string(),
            Self::Validation(e) => format!("Invalid request: {e}"),
        }
    }
}

impl From<HybridFailure> for ApiError {
    fn from(failure: HybridFailure) -> Self {
        Self::Hybrid(failure)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, self.outward_message()).into_response()
    }
}

/// Result type for web handlers
pub type ApiResult<T> = Result<T, ApiError>;
