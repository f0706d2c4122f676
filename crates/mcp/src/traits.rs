//! Seams between the OAuth lifecycle and the live tool registry.

use async_trait::async_trait;

use crate::{error::Result, registry::McpServerConfig};

/// Live tool registry that holds one session per registered server, keyed by
/// owner and server name.
///
/// `McpManager` implements this in-process. A deployment that runs sessions
/// elsewhere plugs its own implementation in without touching the lifecycle.
#[async_trait]
pub trait ToolServerRegistrar: Send + Sync {
    /// Register (or replace) the session for `config.owner_id` and
    /// `config.name`.
    async fn register_one(&self, config: McpServerConfig) -> Result<()>;

    /// Drop a server session. Unknown names are ignored.
    async fn remove_one(&self, owner: i64, name: &str);
}
