use std::future::Future;
use std::sync::Arc;

use reqwest::{
    Client, Response, StatusCode,
    header::{ACCEPT, HeaderValue},
};
use secrecy::ExposeSecret;

use crate::retry::with_retry;
use crate::types::{ProviderErrorBody, UpstreamTokenRequest};
use crate::{
    ExchangeError, ExchangeRequest, ProviderPayload, ProxyConfig, TokenRequestFormat, TokenResult,
};

const GRANT_TYPE: &str = "authorization_code";
const INVALID_PROVIDER_RESPONSE: &str = "invalid provider response";
const UPSTREAM_REQUEST_FAILED: &str = "upstream request failed";

/// Performs the single outbound call to the provider's token endpoint.
///
/// Cheap to clone; clones share the connection pool and configuration.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    config: Arc<ProxyConfig>,
    http: Client,
}

impl TokenExchangeClient {
    pub fn new(config: Arc<ProxyConfig>) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .connect_timeout(config.upstream_timeout)
            .build()
            .map_err(|err| ExchangeError::config(format!("failed to build http client: {err}")))?;
        Ok(Self { config, http })
    }

    pub fn with_http_client(config: Arc<ProxyConfig>, http: Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<ProxyConfig> {
        Arc::clone(&self.config)
    }

    /// Exchanges the authorization code for a token.
    ///
    /// The whole exchange, retries included, is bounded by
    /// `upstream_timeout`; on expiry the in-flight request is dropped and
    /// [`ExchangeError::UpstreamTimeout`] is returned. Once the provider has
    /// answered, its answer is final.
    pub async fn exchange(&self, request: &ExchangeRequest) -> TokenResult {
        let timeout = self.config.upstream_timeout;
        match tokio::time::timeout(timeout, self.exchange_inner(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "token endpoint did not answer in time"
                );
                Err(ExchangeError::UpstreamTimeout { timeout })
            }
        }
    }

    async fn exchange_inner(&self, request: &ExchangeRequest) -> TokenResult {
        let config = &*self.config;
        let payload = UpstreamTokenRequest {
            grant_type: GRANT_TYPE,
            code: &request.code,
            client_id: &config.client_id,
            client_secret: config.client_secret.expose_secret(),
            redirect_uri: &config.redirect_uri,
            code_verifier: request.code_verifier.as_deref(),
        };

        let response = with_retry(&config.retry, || self.send(&payload))
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "token request failed before a response arrived");
                transport_error(&err, config)
            })?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "token endpoint responded");

        let body = response.text().await.map_err(|err| {
            tracing::warn!(error = %err, "failed to read token endpoint response");
            ExchangeError::UpstreamError {
                message: INVALID_PROVIDER_RESPONSE.to_string(),
            }
        })?;

        map_provider_response(status, body)
    }

    fn send(
        &self,
        payload: &UpstreamTokenRequest<'_>,
    ) -> impl Future<Output = Result<Response, reqwest::Error>> {
        let builder = self
            .http
            .post(&self.config.token_url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));

        match self.config.token_format {
            TokenRequestFormat::Json => builder.json(payload).send(),
            TokenRequestFormat::Form => builder.form(payload).send(),
        }
    }
}

fn transport_error(err: &reqwest::Error, config: &ProxyConfig) -> ExchangeError {
    if err.is_timeout() {
        ExchangeError::UpstreamTimeout {
            timeout: config.upstream_timeout,
        }
    } else if err.is_connect() {
        ExchangeError::UpstreamUnavailable
    } else {
        ExchangeError::UpstreamError {
            message: UPSTREAM_REQUEST_FAILED.to_string(),
        }
    }
}

/// Classifies a provider response. Some providers (GitHub among them) report
/// a rejected code with `200 OK` and an `error` field, so a 2xx body is only
/// a success when it carries no `error`.
pub(crate) fn map_provider_response(status: StatusCode, body: String) -> TokenResult {
    let detail = ProviderErrorBody::parse(&body);

    if !status.is_success() || detail.rejected {
        tracing::warn!(
            status = status.as_u16(),
            error = detail.error.as_deref().unwrap_or("-"),
            "token endpoint rejected the exchange"
        );
        return Err(ExchangeError::from_provider(
            detail.error.as_deref(),
            detail.error_description.as_deref(),
        ));
    }

    ProviderPayload::from_json(body).map_err(|_| ExchangeError::UpstreamError {
        message: INVALID_PROVIDER_RESPONSE.to_string(),
    })
}
