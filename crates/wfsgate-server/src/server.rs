//! Gateway HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderName;
use tokio::net::TcpListener;
use wfsgate::{
    AccessControl, AnonymousAccess, FileLayerSource, GatewayConfig, StaticAccessControl,
    StoreState, WfsGateway,
};
use wfsgate_telemetry::{log_listening, log_shutdown, log_startup, MetricsRegistry};

use crate::api::{create_router, AppState};

/// Server configuration.
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub store_path: PathBuf,
    pub user_header: String,
    pub wash_content: bool,
    /// JSON user → groups file; without one every user is anonymous.
    pub groups_file: Option<PathBuf>,
    pub gateway: GatewayConfig,
}

/// Run the gateway until ctrl-c / SIGTERM.
pub async fn run(config: ServerConfig, metrics: Arc<MetricsRegistry>) -> anyhow::Result<()> {
    let user_header = HeaderName::from_bytes(config.user_header.as_bytes())
        .with_context(|| format!("invalid user header name: {}", config.user_header))?;

    let access: Arc<dyn AccessControl> = match &config.groups_file {
        Some(path) => Arc::new(StaticAccessControl::from_json_file(path)?),
        None => Arc::new(AnonymousAccess),
    };

    log_startup!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.store_path.display(),
        auth_mode = config.gateway.auth.mode(),
        wash_content = config.wash_content,
        "starting wfsgate"
    );

    let gateway = WfsGateway::new(
        config.gateway,
        Box::new(FileLayerSource::new(&config.store_path)),
        access,
        Arc::clone(&metrics),
    )?;

    // Warm the cache; an unreadable store is reported but not fatal
    if let StoreState::Unavailable(reason) = gateway.registry().get_store().await {
        tracing::warn!(reason = %reason, "layer store not loaded at startup");
    }

    let app = create_router(AppState {
        gateway: Arc::new(gateway),
        metrics,
        user_header,
        wash_content: config.wash_content,
    });

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.listen_addr))?;
    log_listening!(addr = %config.listen_addr, "wfsgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_shutdown!("wfsgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
