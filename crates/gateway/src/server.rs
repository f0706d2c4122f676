use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{FromRef, State},
        response::IntoResponse,
        routing::get,
    },
    tower_http::trace::TraceLayer,
    tracing::info,
};

use crate::{
    error::ApiError, mcp_oauth_routes::mcp_oauth_router, owner::OwnerId, state::GatewayState,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

impl FromRef<AppState> for Arc<GatewayState> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.gateway)
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/mcp/status", get(status_handler))
        .merge(mcp_oauth_router())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gateway: state })
}

/// Serve the gateway until the process is interrupted.
pub async fn start_gateway(bind: &str, port: u16, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let app = build_gateway_app(state);

    let listener = tokio::net::TcpListener::bind((bind, port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "toolhub gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let registered = state.gateway.live.registered().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "servers": registered,
    }))
}

async fn status_handler(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
) -> Result<impl IntoResponse, ApiError> {
    let servers = state
        .gateway
        .lifecycle
        .status_all(owner, &state.gateway.live)
        .await?;
    Ok(Json(serde_json::json!({ "servers": servers })))
}
