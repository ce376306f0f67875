//! Completion provider errors.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Transport failure before or during the response.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    /// The provider reported an error inside an open stream.
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Failed to decode provider payload: {0}")]
    Decode(String),

    #[error("Provider returned no content")]
    EmptyResponse,
}

impl ProviderError {
    /// Whether a later attempt could succeed without changing the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Stream(message) => message.contains("overloaded"),
            _ => false,
        }
    }
}

/// Maps an HTTP error status and body to a provider error.
pub fn parse_http_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Authentication(format!("HTTP {}: {}", status, body)),
        429 => ProviderError::RateLimited(body.to_string()),
        400 | 404 | 413 | 422 => ProviderError::InvalidRequest(body.to_string()),
        _ => ProviderError::Status {
            status,
            message: body.to_string(),
        },
    }
}
