use anyhow::{Context, Result};
use authproxy::cache::{CacheSettings, TokenCache};
use authproxy::config::Args;
use authproxy::credentials::HelperCommandSource;
use authproxy::proxy::{create_proxy_router, Forwarder, ProxyAppState};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authproxy=info,tower_http=info".into()),
        )
        .init();

    let config = Args::parse().into_config()?;
    let backend = config.backend_url()?;
    let port = config.server.port;

    info!(
        port = port,
        backend = %backend,
        helper = %config.helper.program,
        expiry_skew_seconds = config.cache.expiry_skew_seconds,
        mint_timeout_seconds = config.cache.mint_timeout_seconds,
        "Configuration loaded"
    );

    let source = Arc::new(HelperCommandSource::from_config(&config.helper));
    let token_cache = TokenCache::new(source, CacheSettings::from(&config.cache));

    let forwarder = Forwarder::new(
        backend,
        config.server.forward_timeout_seconds.map(Duration::from_secs),
    )
    .context("Failed to initialize backend client")?;

    let router = create_proxy_router(ProxyAppState {
        token_cache,
        forwarder: Arc::new(forwarder),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!(port = port, "authproxy listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Proxy server error")?;

    info!("authproxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
