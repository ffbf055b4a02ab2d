//! Realtime HTTP Surface
//!
//! Built with Axum.
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe (bus ping)
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /ws` - Realtime event stream

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::realtime::websocket_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` resolves
pub async fn serve(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let addr = state.addr();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Realtime server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Realtime server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusTransport, MemoryBus};
    use crate::config::RealtimeConfig;
    use crate::realtime::{ClientHub, HubConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<MemoryBus>, Arc<ClientHub>) {
        let bus = Arc::new(MemoryBus::default());
        let hub = Arc::new(ClientHub::new(HubConfig::default()));
        let state = AppState::new(hub.clone(), bus.clone(), RealtimeConfig::default());
        (build_router(state), bus, hub)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _bus, _hub) = create_test_app();
        let (status, _) = get(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_follows_bus() {
        let (app, bus, _hub) = create_test_app();
        let (status, body) = get(app.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        bus.close().await;
        let (status, body) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_health_full_counts_clients() {
        let (app, _bus, hub) = create_test_app();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();
        hub.subscribe(&id, &["gm:room:r1".to_string()]).await.unwrap();

        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["bus"], "connected");
        assert_eq!(body["websocket_clients"], 1);
        assert_eq!(body["rooms"], 1);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let (app, _bus, _hub) = create_test_app();
        let (status, _) = get(app, "/ws").await;
        assert!(status.is_client_error());
    }
}
