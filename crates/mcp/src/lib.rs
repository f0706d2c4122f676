//! MCP server connection lifecycle for toolhub.
//!
//! This crate provides:
//! - Persisted server records and their runtime config (`registry`, `store`)
//! - OAuth client credential resolution with dynamic registration (`auth`)
//! - Proactive token refresh (`refresh`)
//! - The live server registry and registration lifecycle (`manager`)

pub mod auth;
pub mod error;
pub mod manager;
pub mod refresh;
pub mod registry;
pub mod store;
pub mod traits;
pub mod types;

pub use {
    auth::{CredentialResolver, ResolvedClient},
    error::{Error, Result},
    manager::{McpManager, ServerLifecycle, server_status},
    refresh::{REFRESH_WINDOW, RefreshOutcome, TokenRefresher},
    registry::{
        McpOAuthCredentials, McpServerConfig, McpServerRecord, TransportType,
        convert_to_runtime_config,
    },
    store::{FileServerStore, MemoryServerStore, ServerRecordStore},
    traits::ToolServerRegistrar,
    types::{McpServerSummary, ServerStatus},
};
