use axum::{Router, extract::DefaultBodyLimit};
use tokio::signal;
use tower_http::trace::TraceLayer;

use super::routes::{AppState, router};
use crate::config::ServerConfig;

/// The billing router with the server-level layers applied.
///
/// Body limit first so oversized webhook payloads are rejected before
/// they are buffered, then HTTP tracing.
pub fn app(state: AppState, config: &ServerConfig) -> Router {
    router(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http())
}

/// Bind to the configured address and serve `app` until Ctrl+C or SIGTERM.
pub async fn serve(app: Router, config: &ServerConfig) -> Result<(), std::io::Error> {
    let addr = config
        .addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(target: "billsync::http", %addr, "Server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(target: "billsync::http", error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(target: "billsync::http", error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!(target: "billsync::http", "Shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{InMemoryAccountStore, MockBillingProvider, Plans};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_oversized_webhook_is_rejected() {
        let state = AppState::new(
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(MockBillingProvider::new()),
            Arc::new(Plans::builder().build()),
        );
        let config = ServerConfig {
            max_body_size: 16,
            ..Default::default()
        };

        let response = app(state, &config)
            .oneshot(
                Request::post("/webhooks/stripe")
                    .body(Body::from(vec![b'x'; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
