//! Stateless OAuth 2.0 authorization-code exchange proxy.
//!
//! Browser-only apps cannot hold a client secret. This crate sits between the
//! browser and the identity provider: it checks the caller's origin, adds the
//! server-held secret to the code exchange, performs exactly one call to the
//! provider's token endpoint, and hands the provider's payload back untouched.

mod client;
mod config;
mod error;
mod response;
mod retry;
#[cfg(feature = "server")]
mod server;
mod types;
mod validate;

pub use client::TokenExchangeClient;
pub use config::{
    ENV_ALLOWED_ORIGINS, ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_MAX_RETRIES, ENV_REDIRECT_URI,
    ENV_RETRY_BACKOFF_MS, ENV_TOKEN_FORMAT, ENV_TOKEN_URL, ENV_UPSTREAM_TIMEOUT_MS, ProxyConfig,
    TokenRequestFormat,
};
pub use error::ExchangeError;
pub use response::ExchangeResponse;
pub use retry::RetryPolicy;
#[cfg(feature = "server")]
pub use server::{AppState, router, serve};
pub use types::{ExchangeRequest, ProviderPayload, TokenResult};
pub use validate::{MALFORMED_BODY, MISSING_CODE, validate_request};
