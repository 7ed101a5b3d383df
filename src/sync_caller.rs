//! # Sync Caller
//!
//! One synchronous HTTP GET against a peer service per invocation. There is
//! no internal retry. Every outcome, including transport failures, comes back
//! as a [`SyncCallResult`]; nothing is raised past this boundary.

use std::time::{Duration, Instant};

use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PeerConfig;

/// Longest slice of an error body kept in a [`SyncCallError::Status`]
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Largest peer response body read into memory
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Why a synchronous call failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncCallError {
    #[error("Invalid peer URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Peer unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Peer call to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Peer at {url} answered with HTTP {status}")]
    Status { url: String, status: u16, body: String },

    #[error("Failed to read response body from {url}: {message}")]
    Body { url: String, message: String },

    #[error("Response body from {url} exceeds {limit_bytes} bytes")]
    BodyTooLarge { url: String, limit_bytes: usize },
}

impl SyncCallError {
    /// Whether trying again later could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidUrl { .. } | Self::Body { .. } | Self::BodyTooLarge { .. } => false,
        }
    }
}

/// Outcome label of a synchronous call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Failure,
}

/// Result of one synchronous call
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCallResult {
    pub status: CallStatus,
    /// Response body on success, empty on failure
    pub body: String,
    pub error: Option<SyncCallError>,
    /// HTTP status, when the peer answered at all
    pub http_status: Option<u16>,
    pub elapsed: Duration,
}

impl SyncCallResult {
    pub fn success(body: String, http_status: u16, elapsed: Duration) -> Self {
        Self {
            status: CallStatus::Success,
            body,
            error: None,
            http_status: Some(http_status),
            elapsed,
        }
    }

    pub fn failure(error: SyncCallError, elapsed: Duration) -> Self {
        let http_status = match &error {
            SyncCallError::Status { status, .. } => Some(*status),
            _ => None,
        };
        Self {
            status: CallStatus::Failure,
            body: String::new(),
            error: Some(error),
            http_status,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    /// The body on success, the error otherwise
    pub fn into_result(self) -> Result<String, SyncCallError> {
        match (self.status, self.error) {
            (CallStatus::Success, _) => Ok(self.body),
            (CallStatus::Failure, Some(error)) => Err(error),
            (CallStatus::Failure, None) => Err(SyncCallError::Body {
                url: String::new(),
                message: "failure without a recorded cause".to_string(),
            }),
        }
    }
}

/// HTTP client for synchronous peer calls
#[derive(Debug, Clone)]
pub struct SyncCaller {
    client: Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl SyncCaller {
    /// Create a caller whose requests are bounded by `timeout`
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("service-interconnect/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Refuse response bodies longer than `limit` bytes
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn from_config(peer: &PeerConfig) -> reqwest::Result<Self> {
        Self::new(peer.timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET the configured peer endpoint
    pub async fn call_peer(&self, peer: &PeerConfig) -> SyncCallResult {
        self.call(&peer.url()).await
    }

    /// GET `url` and capture the outcome
    pub async fn call(&self, url: &str) -> SyncCallResult {
        let started = Instant::now();

        let result = match parse_peer_url(url) {
            Ok(parsed) => self.fetch(url, parsed).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        match result {
            Ok((http_status, body)) => {
                debug!(
                    peer_url = %url,
                    http_status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Peer call succeeded"
                );
                SyncCallResult::success(body, http_status, elapsed)
            }
            Err(error) => {
                warn!(
                    peer_url = %url,
                    elapsed_ms = elapsed.as_millis() as u64,
                    recoverable = error.is_recoverable(),
                    error = %error,
                    "Peer call failed"
                );
                SyncCallResult::failure(error, elapsed)
            }
        }
    }

    async fn fetch(&self, url: &str, parsed: Url) -> Result<(u16, String), SyncCallError> {
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.classify(url, &e))?;

        let status = response.status();
        let body = self.read_body(url, response).await?;

        if !status.is_success() {
            return Err(SyncCallError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        Ok((status.as_u16(), body))
    }

    /// Read the body chunk by chunk, stopping once it passes the limit
    async fn read_body(
        &self,
        url: &str,
        mut response: reqwest::Response,
    ) -> Result<String, SyncCallError> {
        let too_large = || SyncCallError::BodyTooLarge {
            url: url.to_string(),
            limit_bytes: self.max_body_bytes,
        };

        if response
            .content_length()
            .is_some_and(|length| length > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error(url)
            } else {
                SyncCallError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn classify(&self, url: &str, error: &reqwest::Error) -> SyncCallError {
        if error.is_timeout() {
            self.timeout_error(url)
        } else {
            SyncCallError::Unreachable {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    fn timeout_error(&self, url: &str) -> SyncCallError {
        SyncCallError::Timeout {
            url: url.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

fn parse_peer_url(url: &str) -> Result<Url, SyncCallError> {
    let parsed = Url::parse(url).map_err(|e| SyncCallError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(SyncCallError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_a_failure_not_a_panic() {
        let caller = SyncCaller::new(Duration::from_millis(200)).unwrap();

        let result = caller.call("not a url").await;
        assert!(!result.is_success());
        assert!(matches!(result.error, Some(SyncCallError::InvalidUrl { .. })));

        let result = caller.call("ftp://peer/data").await;
        assert!(matches!(result.error, Some(SyncCallError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let caller = SyncCaller::new(Duration::from_millis(500)).unwrap();

        let result = caller.call("http://127.0.0.1:1/data").await;

        assert_eq!(result.status, CallStatus::Failure);
        assert!(result.body.is_empty());
        assert!(result.http_status.is_none());
        assert!(result.error.as_ref().is_some_and(SyncCallError::is_recoverable));
    }

    #[test]
    fn test_status_failure_keeps_http_status() {
        let error = SyncCallError::Status {
            url: "http://peer/data".to_string(),
            status: 503,
            body: "down".to_string(),
        };
        let result = SyncCallResult::failure(error.clone(), Duration::ZERO);

        assert_eq!(result.http_status, Some(503));
        assert!(error.is_recoverable());
        assert_eq!(result.into_result(), Err(error));
    }

    #[test]
    fn test_client_errors_are_not_recoverable() {
        let error = SyncCallError::Status {
            url: "http://peer/data".to_string(),
            status: 404,
            body: String::new(),
        };
        assert!(!error.is_recoverable());
    }
}
