use reqwest::header::{HeaderMap, ORIGIN};
use serde_json::Value;

use crate::{ExchangeError, ExchangeRequest, ProxyConfig};

pub const MISSING_CODE: &str = "missing code";
pub const MALFORMED_BODY: &str = "malformed request body";

/// Turns a raw inbound request into an [`ExchangeRequest`].
///
/// The origin is checked before the body is even parsed, so a disallowed
/// caller can never reach the token endpoint. No I/O happens here.
pub fn validate_request(
    config: &ProxyConfig,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ExchangeRequest, ExchangeError> {
    let origin = headers
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .filter(|origin| config.is_origin_allowed(origin))
        .ok_or(ExchangeError::OriginNotAllowed)?
        .to_string();

    let body: Value =
        serde_json::from_slice(body).map_err(|_| ExchangeError::bad_request(MALFORMED_BODY))?;
    let Value::Object(mut fields) = body else {
        return Err(ExchangeError::bad_request(MALFORMED_BODY));
    };

    let code = match fields.remove("code") {
        Some(Value::String(code)) if !code.trim().is_empty() => code,
        _ => return Err(ExchangeError::bad_request(MISSING_CODE)),
    };

    let code_verifier = match fields.remove("code_verifier") {
        None | Some(Value::Null) => None,
        Some(Value::String(verifier)) if verifier.is_empty() => None,
        Some(Value::String(verifier)) => Some(verifier),
        Some(_) => return Err(ExchangeError::bad_request(MALFORMED_BODY)),
    };

    Ok(ExchangeRequest {
        origin,
        code,
        code_verifier,
    })
}
