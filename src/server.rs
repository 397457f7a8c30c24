use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, header},
    response::IntoResponse,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::{ExchangeError, ExchangeResponse, ProxyConfig, TokenExchangeClient, validate_request};

/// Per-process state handed to every request. Holds nothing mutable.
#[derive(Debug, Clone)]
pub struct AppState {
    config: Arc<ProxyConfig>,
    client: TokenExchangeClient,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self, ExchangeError> {
        config.validate()?;
        let config = Arc::new(config);
        let client = TokenExchangeClient::new(config.clone())?;
        Ok(Self { config, client })
    }

    pub fn with_client(client: TokenExchangeClient) -> Self {
        Self {
            config: client.shared_config(),
            client,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(exchange_handler))
        .route("/exchange", post(exchange_handler))
        .route("/health", get(health_handler))
        .layer(cors_layer(state.config()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Echoes the request origin only when it is allow-listed; never `*`.
fn cors_layer(config: &ProxyConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring origin that is not a valid header value");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

#[tracing::instrument(name = "exchange", skip_all, fields(origin = tracing::field::Empty))]
async fn exchange_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ExchangeResponse {
    tracing::debug!("validating request");
    let request = match validate_request(state.config(), &headers, &body) {
        Ok(request) => request,
        Err(error) => {
            let origin = headers
                .get(header::ORIGIN)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::debug!(origin, error = %error, "request rejected");
            return ExchangeResponse::failure(&error);
        }
    };

    Span::current().record("origin", request.origin.as_str());
    tracing::debug!("request validated, exchanging code");

    let result = state.client.exchange(&request).await;
    match &result {
        Ok(_) => tracing::debug!("exchange succeeded"),
        Err(error) => tracing::debug!(error = %error, "exchange failed"),
    }

    ExchangeResponse::from_result(result)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Serves the proxy on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "token exchange proxy listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
