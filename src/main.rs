use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::info;

mod api;
mod config;
mod error;
mod observe;
mod proxy;
mod request;
mod upstream;

use config::{Config, LogFormat};

const DEFAULT_CONFIG_PATH: &str = "/etc/vllm-gateway/config.toml";
const DEFAULT_LOG_FILTER: &str = "vllm_gateway=info,tower_http=warn";

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn env_file_loaded<T>(result: dotenvy::Result<T>) -> anyhow::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).context("loading .env"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` values win over the inherited environment.
    env_file_loaded(dotenvy::dotenv_override())?;

    let config_path = std::env::var("GATEWAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck(config.gateway.port).await;
    }

    init_tracing(config.gateway.log_format);

    let listener = tokio::net::TcpListener::bind((config.gateway.bind.as_str(), config.gateway.port))
        .await
        .with_context(|| format!("binding {}:{}", config.gateway.bind, config.gateway.port))?;

    let state = Arc::new(proxy::GatewayState::from_config(config)?);

    info!(
        upstream = %state.upstream.url(),
        default_model = state.config.default_model().unwrap_or("<none>"),
        title = state.config.gateway.title.as_deref().unwrap_or("<none>"),
        sink = %state.config.observability.sink,
        "vllm-gateway starting"
    );

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = api::client::router(state)
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer);

    info!(addr = %listener.local_addr()?, "chat completions API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `vllm-gateway --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck(port: u16) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_file_is_ignored() {
        let path = std::env::temp_dir().join("vllm-gateway-no-such-file.env");
        assert!(env_file_loaded(dotenvy::from_path_iter(&path)).is_ok());
    }

    #[test]
    fn malformed_env_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("vllm-gateway-{}.env", std::process::id()));
        std::fs::write(&path, "OPENAI_BASE_URL='unterminated\n").unwrap();
        let result = env_file_loaded(dotenvy::from_path_iter(&path).and_then(|iter| {
            iter.collect::<Result<Vec<_>, _>>()
        }));
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
