//! Prometheus exporter endpoint and process signals

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tokio::sync::watch;
use tracing::{error, info};

use rolewatch_core::metrics::gather_metrics;

pub fn create_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health_check))
}

async fn metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Serve the exporter until `shutdown_rx` fires
pub fn spawn_exporter(address: String, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr: std::net::SocketAddr = match address.parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Invalid exporter address '{}': {}", address, e);
                return;
            }
        };

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind exporter address {}: {}", addr, e);
                return;
            }
        };

        info!("Metrics exporter listening on {}", addr);

        let mut rx = shutdown_rx;
        let graceful = async move {
            let _ = rx.changed().await;
        };

        if let Err(e) = axum::serve(listener, create_router())
            .with_graceful_shutdown(graceful)
            .await
        {
            error!("Exporter error: {}", e);
        }

        info!("Metrics exporter shut down");
    })
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
