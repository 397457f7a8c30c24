use std::time::Duration;

use thiserror::Error;

/// Everything that can end an exchange, plus the startup-only configuration
/// failure. `Display` is the message handed back to the caller, so no variant
/// may render secrets or configuration values.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("origin not allowed")]
    OriginNotAllowed,

    #[error("{0}")]
    BadRequest(String),

    #[error("timeout")]
    UpstreamTimeout { timeout: Duration },

    #[error("{message}")]
    UpstreamError { message: String },

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ExchangeError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Builds an upstream failure from the provider's own `error` /
    /// `error_description` pair, falling back to a generic message.
    pub fn from_provider(error: Option<&str>, description: Option<&str>) -> Self {
        let message = match (error, description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.to_string(),
            (None, Some(description)) => description.to_string(),
            (None, None) => "upstream error".to_string(),
        };
        Self::UpstreamError { message }
    }
}
