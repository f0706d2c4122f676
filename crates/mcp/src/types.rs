//! Status types reported for stored MCP servers.

use serde::{Deserialize, Serialize};

use crate::registry::{McpServerRecord, TransportType};

/// Coarse state of a stored server as seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Connected,
    Disconnected,
    Disabled,
    NeedsAuth,
}

impl ServerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Disabled => "disabled",
            Self::NeedsAuth => "needs_auth",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret-free view of a stored server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerSummary {
    pub id: i64,
    pub name: String,
    pub transport: TransportType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub disabled: bool,
    pub status: ServerStatus,
    pub has_token: bool,
}

impl McpServerSummary {
    pub fn new(record: &McpServerRecord, status: ServerStatus) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            transport: if record.is_remote() {
                TransportType::Http
            } else {
                TransportType::Stdio
            },
            url: record.remote_url().map(str::to_string),
            disabled: record.disabled,
            status,
            has_token: record.has_token(),
        }
    }
}
