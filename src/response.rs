use reqwest::StatusCode;
use serde::Serialize;

use crate::{ExchangeError, ProviderPayload, TokenResult};

/// The proxy's outward contract: `{"success": true, "body": ...}` or
/// `{"success": false, "error": "..."}`. The provider payload is embedded
/// verbatim.
#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ProviderPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    status: StatusCode,
}

impl ExchangeResponse {
    pub fn from_result(result: TokenResult) -> Self {
        match result {
            Ok(payload) => Self::success(payload),
            Err(error) => Self::failure(&error),
        }
    }

    pub fn success(payload: ProviderPayload) -> Self {
        Self {
            success: true,
            body: Some(payload),
            error: None,
            status: StatusCode::OK,
        }
    }

    pub fn failure(error: &ExchangeError) -> Self {
        Self {
            success: false,
            body: None,
            error: Some(error.to_string()),
            status: error.status(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<TokenResult> for ExchangeResponse {
    fn from(result: TokenResult) -> Self {
        Self::from_result(result)
    }
}

impl ExchangeError {
    /// HTTP status for hosts that honor one: rejections are 4xx, provider
    /// trouble is 5xx.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::OriginNotAllowed => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamError { .. } | Self::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for ExchangeResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status, axum::Json(self)).into_response()
    }
}
