use crate::app::runtime::PressureMonitor;
use crate::error::{AppError, AppResult};
use axum::{Router, routing::get};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use super::config::ApiConfig;
use super::handlers::metrics;

/// Demo routes; the monitor gates all of them.
pub fn build_router(monitor: &PressureMonitor, cfg: &ApiConfig) -> Router {
    let router = Router::new()
        .route("/", get(|| async { "hello" }))
        .route(&cfg.metrics_path, get(metrics::metrics));

    monitor.attach(router).layer(TraceLayer::new_for_http())
}

pub async fn run_api_server(monitor: PressureMonitor, cfg: ApiConfig) -> AppResult<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.bind_addr, cfg.port)
        .parse()
        .map_err(|e| AppError::InvalidConfig(format!("api.toml: invalid bind/port: {e}")))?;

    let app = build_router(&monitor, &cfg);

    tracing::info!(
        bind_addr = %cfg.bind_addr,
        port = cfg.port,
        metrics_path = %cfg.metrics_path,
        "api server starting (axum)"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind API server: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(format!("API server error: {e}")))?;

    monitor.close().await;
    Ok(())
}

/// Graceful shutdown for Ctrl+C and SIGTERM (k8s).
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut s) = signal(SignalKind::terminate()) {
            let _ = s.recv().await;
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }

    tracing::info!("api server shutdown signal received");
}
