use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    toolhub_config::ToolhubConfig,
    toolhub_gateway::{GatewayState, register_stored_servers, start_gateway},
    toolhub_mcp::{FileServerStore, McpManager, MemoryServerStore, ServerRecordStore},
    tracing::{info, warn},
};

/// Outbound client shared by discovery, registration and token calls.
pub fn build_http_client(config: &ToolhubConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.mcp_oauth.http_timeout_secs))
        .user_agent(concat!("toolhub/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// File store when `storage.servers_path` is set, otherwise in-memory.
pub fn open_store(config: &ToolhubConfig) -> Result<Arc<dyn ServerRecordStore>> {
    match &config.storage.servers_path {
        Some(path) => {
            let store = FileServerStore::load(path)?;
            info!(path = %path.display(), "using file-backed MCP server store");
            Ok(Arc::new(store))
        },
        None => {
            warn!("no storage.servers_path configured, MCP server records are not persisted");
            Ok(Arc::new(MemoryServerStore::new()))
        },
    }
}

/// Wire the gateway state from configuration.
pub fn build_state(config: &ToolhubConfig) -> Result<Arc<GatewayState>> {
    let http = build_http_client(config)?;
    let store = open_store(config)?;
    Ok(GatewayState::new(
        config,
        http,
        store,
        Arc::new(McpManager::new()),
    ))
}

pub async fn run_gateway(config: ToolhubConfig, bind: &str, port: u16) -> Result<()> {
    let state = build_state(&config)?;

    register_stored_servers(
        state.store.as_ref(),
        &state.lifecycle,
        Duration::from_secs(config.mcp_oauth.startup_refresh_timeout_secs),
    )
    .await;

    let live = Arc::clone(&state.live);
    start_gateway(bind, port, state).await?;
    live.shutdown_all().await;
    Ok(())
}
