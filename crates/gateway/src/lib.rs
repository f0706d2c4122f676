//! HTTP gateway for the MCP OAuth connection lifecycle.
//!
//! Exposes `POST /oauth/start` and `GET /oauth/callback`, wires the record
//! store, the credential resolver and the live registry together, and
//! registers stored servers at boot.

pub mod error;
pub mod mcp_oauth;
pub mod mcp_oauth_routes;
pub mod owner;
pub mod server;
pub mod startup;
pub mod state;

pub use {
    error::ApiError,
    mcp_oauth::{AuthorizationAttempt, McpOAuthService},
    owner::{AuthenticatedOwner, OwnerId},
    server::{AppState, build_gateway_app, start_gateway},
    startup::{StartupReport, register_stored_servers},
    state::GatewayState,
};
