use std::sync::Arc;

use bearing_core::TokenVerifier;
use bearing_gateway::{build_app, telemetry, AppState, AuthFilter, GatewayConfig, ProxyForwarder};
use bearing_registry::{HttpRegistrySource, RegistryClient};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = GatewayConfig::parse();

    telemetry::init_tracing(config.log_json);
    let metrics = telemetry::install_metrics();

    let verifier = TokenVerifier::from_base64_secret(&config.token_secret).map_err(|e| {
        tracing::error!("TOKEN_SECRET is not valid base64: {}", e);
        e
    })?;

    let source = HttpRegistrySource::new(&config.registry_url, config.registry_format, config.registry_timeout())?;
    tracing::info!(url = %config.registry_url, format = %config.registry_format, "Using registry");
    let registry = Arc::new(RegistryClient::new(Arc::new(source), config.registry_config()));
    let refresher = registry.clone().spawn();

    let auth = AuthFilter::new(Arc::new(verifier))
        .strip_credential(config.strip_credential)
        .public_paths(config.public_paths.clone());
    let forwarder = ProxyForwarder::new(config.upstream_timeout())?;
    let state = AppState::new(auth, registry, forwarder, config.proxy_settings()).with_metrics(metrics);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!("listening on {}", config.listen);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {}", e);
    }

    refresher.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
