use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use token_exchange_proxy::{AppState, ProxyConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "token-exchange-proxy",
    about = "Exchange OAuth authorization codes for browser apps without exposing the client secret.",
    long_about = "Exchange OAuth authorization codes for browser apps without exposing the client secret.\n\n\
        Provider settings come from the environment: OAUTH_CLIENT_ID, OAUTH_CLIENT_SECRET, \
        OAUTH_REDIRECT_URI, OAUTH_TOKEN_URL, OAUTH_ALLOWED_ORIGINS and, optionally, \
        OAUTH_UPSTREAM_TIMEOUT_MS, OAUTH_TOKEN_FORMAT, OAUTH_MAX_RETRIES, OAUTH_RETRY_BACKOFF_MS."
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let state = match ProxyConfig::from_env().and_then(AppState::new) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "refusing to start");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(cli.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(addr = %cli.bind, error = %err, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    };

    match token_exchange_proxy::serve(listener, state, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
