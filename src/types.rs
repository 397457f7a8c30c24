use std::fmt;

use serde::Serialize;
use serde_json::Value;
use serde_json::value::RawValue;

use crate::ExchangeError;

/// A validated inbound exchange. Lives for one request only.
#[derive(Clone)]
pub struct ExchangeRequest {
    pub origin: String,
    pub code: String,
    pub code_verifier: Option<String>,
}

impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("origin", &self.origin)
            .field("code", &"[REDACTED]")
            .field("code_verifier", &self.code_verifier.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// The body sent to the provider's token endpoint. Only ever built inside the
/// proxy, right before the request goes out.
#[derive(Serialize)]
pub(crate) struct UpstreamTokenRequest<'a> {
    pub(crate) grant_type: &'static str,
    pub(crate) code: &'a str,
    pub(crate) client_id: &'a str,
    pub(crate) client_secret: &'a str,
    pub(crate) redirect_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code_verifier: Option<&'a str>,
}

impl fmt::Debug for UpstreamTokenRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamTokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

/// Provider token payload, kept as the exact bytes the provider sent.
#[derive(Debug)]
pub struct ProviderPayload(Box<RawValue>);

impl ProviderPayload {
    pub fn from_json(body: String) -> Result<Self, serde_json::Error> {
        RawValue::from_string(body).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl Serialize for ProviderPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Error fields an OAuth2 provider puts in a failed token response.
///
/// `rejected` is set whenever the top-level object carries a non-null
/// `error`, whatever its shape. `error` and `error_description` are only
/// filled in when they are strings.
#[derive(Debug, Default)]
pub(crate) struct ProviderErrorBody {
    pub(crate) rejected: bool,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

impl ProviderErrorBody {
    pub(crate) fn parse(body: &str) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
            return Self::default();
        };
        let string = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            rejected: !matches!(fields.get("error"), None | Some(Value::Null)),
            error: string("error"),
            error_description: string("error_description"),
        }
    }
}

pub type TokenResult = Result<ProviderPayload, ExchangeError>;
