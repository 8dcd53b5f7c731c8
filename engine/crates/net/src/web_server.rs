use std::sync::Arc;

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use lifecycle::LifecycleController;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::handler::handle_connection;
use crate::rate_limiter::ConnectionLimits;
use crate::registry::ConnectionRegistry;

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
    pub registry: Arc<ConnectionRegistry>,
    pub limits: ConnectionLimits,
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(default)]
    token: Option<String>,
}

/// WebSocket endpoint plus the session/save HTTP API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{session_id}", get(ws_upgrade_handler))
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `listener` until the shutdown flag flips to true.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    let mut rx = state.shutdown.clone();
    let app = router(state);
    tracing::info!("Web server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // Oversized frames below this cap get a per-message error instead.
    let hard_cap = state.limits.max_message_bytes.saturating_mul(4).max(64 * 1024);
    ws.max_message_size(hard_cap)
        .on_upgrade(move |socket| handle_connection(socket, session_id, params.token, state))
}
