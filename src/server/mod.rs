//! HTTP server
//!
//! One proxy route (GET and POST) behind the per-client rate limiter, plus an
//! unlimited `/health` probe.

mod handlers;

use std::future::Future;
use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::app::App;

/// Server error type
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
    #[error("Server error: {0}")]
    Serve(String),
}

/// Builds the router for `app`
pub fn router(app: App) -> Router {
    let route = app.adapter().route();
    let proxied = Router::new()
        .route(route, get(handlers::proxy).post(handlers::proxy))
        .route_layer(middleware::from_fn_with_state(app.clone(), handlers::rate_limit));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(proxied)
        .with_state(app)
}

/// Binds the listening socket
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
        addr,
        reason: e.to_string(),
    })
}

/// Serves until Ctrl+C or SIGTERM
pub async fn serve(app: App, listener: TcpListener) -> Result<(), ServerError> {
    serve_until(app, listener, shutdown_signal()).await
}

/// Serves until `shutdown` resolves, then drains in-flight requests
pub async fn serve_until<F>(
    app: App,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let route = app.adapter().route();
    let proxy = app.adapter().name();
    if let Ok(addr) = listener.local_addr() {
        info!(proxy = %proxy, address = %addr, route = %route, "Server listening");
    }

    axum::serve(
        listener,
        router(app).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| ServerError::Serve(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
