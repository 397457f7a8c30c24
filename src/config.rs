use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::{ExchangeError, RetryPolicy};

pub const ENV_CLIENT_ID: &str = "OAUTH_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "OAUTH_CLIENT_SECRET";
pub const ENV_REDIRECT_URI: &str = "OAUTH_REDIRECT_URI";
pub const ENV_TOKEN_URL: &str = "OAUTH_TOKEN_URL";
pub const ENV_ALLOWED_ORIGINS: &str = "OAUTH_ALLOWED_ORIGINS";
pub const ENV_UPSTREAM_TIMEOUT_MS: &str = "OAUTH_UPSTREAM_TIMEOUT_MS";
pub const ENV_TOKEN_FORMAT: &str = "OAUTH_TOKEN_FORMAT";
pub const ENV_MAX_RETRIES: &str = "OAUTH_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "OAUTH_RETRY_BACKOFF_MS";

const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenRequestFormat {
    #[default]
    Json,
    Form,
}

impl FromStr for TokenRequestFormat {
    type Err = ExchangeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "form" => Ok(Self::Form),
            other => Err(ExchangeError::config(format!(
                "{ENV_TOKEN_FORMAT} must be `json` or `form`, got `{other}`"
            ))),
        }
    }
}

/// Process-wide settings. Built once at startup and shared read-only
/// (usually behind an `Arc`) with every request.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub token_url: String,
    pub allowed_origins: BTreeSet<String>,
    pub upstream_timeout: Duration,
    pub token_format: TokenRequestFormat,
    pub retry: RetryPolicy,
}

impl ProxyConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            redirect_uri: redirect_uri.into(),
            token_url: token_url.into(),
            allowed_origins: BTreeSet::new(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            token_format: TokenRequestFormat::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        self.allowed_origins.insert(origin.trim().to_string());
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_token_format(mut self, format: TokenRequestFormat) -> Self {
        self.token_format = format;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_env() -> Result<Self, ExchangeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value. Any missing required value is an error; nothing is
    /// served with a partial configuration.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ExchangeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ExchangeError> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ExchangeError::config(format!("{key} is required")))
        };
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let client_id = required(ENV_CLIENT_ID)?;
        let client_secret = required(ENV_CLIENT_SECRET)?;
        let redirect_uri = required(ENV_REDIRECT_URI)?;
        let token_url = required(ENV_TOKEN_URL)?;
        validate_url(ENV_REDIRECT_URI, &redirect_uri)?;
        validate_url(ENV_TOKEN_URL, &token_url)?;

        let allowed_origins = parse_origins(&required(ENV_ALLOWED_ORIGINS)?);
        check_origins(&allowed_origins)?;

        let upstream_timeout = match optional(ENV_UPSTREAM_TIMEOUT_MS) {
            Some(raw) => match parse_number::<u64>(ENV_UPSTREAM_TIMEOUT_MS, &raw)? {
                0 => {
                    return Err(ExchangeError::config(format!(
                        "{ENV_UPSTREAM_TIMEOUT_MS} must be greater than zero"
                    )));
                }
                millis => Duration::from_millis(millis),
            },
            None => DEFAULT_UPSTREAM_TIMEOUT,
        };

        let token_format = match optional(ENV_TOKEN_FORMAT) {
            Some(raw) => raw.parse()?,
            None => TokenRequestFormat::default(),
        };

        let mut retry = RetryPolicy::default();
        if let Some(raw) = optional(ENV_MAX_RETRIES) {
            retry.max_retries = parse_number(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = optional(ENV_RETRY_BACKOFF_MS) {
            retry.initial_backoff = Duration::from_millis(parse_number(ENV_RETRY_BACKOFF_MS, &raw)?);
        }

        Ok(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
            redirect_uri,
            token_url,
            allowed_origins,
            upstream_timeout,
            token_format,
            retry,
        })
    }

    /// Checks the invariants `from_lookup` enforces, for configs assembled
    /// through the builder.
    pub fn validate(&self) -> Result<(), ExchangeError> {
        use secrecy::ExposeSecret;

        if self.client_id.trim().is_empty() {
            return Err(ExchangeError::config(format!("{ENV_CLIENT_ID} is required")));
        }
        if self.client_secret.expose_secret().trim().is_empty() {
            return Err(ExchangeError::config(format!("{ENV_CLIENT_SECRET} is required")));
        }
        validate_url(ENV_REDIRECT_URI, &self.redirect_uri)?;
        validate_url(ENV_TOKEN_URL, &self.token_url)?;
        check_origins(&self.allowed_origins)?;
        if self.upstream_timeout.is_zero() {
            return Err(ExchangeError::config(format!(
                "{ENV_UPSTREAM_TIMEOUT_MS} must be greater than zero"
            )));
        }
        Ok(())
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin)
    }
}

fn parse_origins(raw: &str) -> BTreeSet<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// Origins are matched exactly, so a wildcard would never match a real
/// browser origin and is refused outright.
fn check_origins(origins: &BTreeSet<String>) -> Result<(), ExchangeError> {
    if origins.is_empty() {
        return Err(ExchangeError::config(format!(
            "{ENV_ALLOWED_ORIGINS} must list at least one origin"
        )));
    }
    if origins
        .iter()
        .any(|origin| origin.is_empty() || origin.contains(char::is_whitespace))
    {
        return Err(ExchangeError::config(format!(
            "{ENV_ALLOWED_ORIGINS} entries must be non-empty and contain no whitespace"
        )));
    }
    if origins.contains("*") {
        return Err(ExchangeError::config(format!(
            "{ENV_ALLOWED_ORIGINS} must not contain a wildcard"
        )));
    }
    Ok(())
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, ExchangeError> {
    raw.trim()
        .parse()
        .map_err(|_| ExchangeError::config(format!("{key} must be a non-negative integer")))
}

fn validate_url(key: &str, value: &str) -> Result<(), ExchangeError> {
    if value.trim().is_empty() {
        return Err(ExchangeError::config(format!("{key} is required")));
    }
    Url::parse(value)
        .map(|_| ())
        .map_err(|err| ExchangeError::config(format!("{key} is not a valid url: {err}")))
}
