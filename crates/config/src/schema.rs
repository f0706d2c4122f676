//! Config schema types (server, auth, MCP OAuth, storage).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolhubConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub mcp_oauth: McpOAuthConfig,
    pub storage: StorageConfig,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Honour `X-Forwarded-Proto` when deciding whether the inbound request
    /// was secure. Only enable behind a trusted reverse proxy.
    pub trust_forwarded_proto: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 32180,
            trust_forwarded_proto: false,
        }
    }
}

/// End-user authentication settings consumed by the OAuth connect flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When false, every request acts as `default_owner`.
    pub enabled: bool,
    /// Configured sign-in redirect URL. Only its origin is used to derive the
    /// MCP OAuth callback URL.
    pub redirect_url: String,
    /// Owner id used when authentication is disabled.
    pub default_owner: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redirect_url: "http://localhost:32180/auth/callback".into(),
            default_owner: 1,
        }
    }
}

impl AuthConfig {
    /// Origin (`scheme://host[:port]`) of the configured redirect URL.
    ///
    /// Returns the raw value when it does not parse as an absolute URL.
    pub fn redirect_base(&self) -> String {
        match url::Url::parse(&self.redirect_url) {
            Ok(u) if u.has_host() => u.origin().ascii_serialization(),
            _ => self.redirect_url.clone(),
        }
    }
}

/// OAuth settings for remote MCP servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpOAuthConfig {
    /// Process-wide fallback client id, used when a server has no stored
    /// credentials of its own.
    pub client_id: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    /// Fallback `client_name` for dynamic client registration.
    pub client_name: String,
    /// Scopes requested when neither the server record nor the protected
    /// resource advertise any.
    pub default_scopes: Vec<String>,
    /// Timeout applied to every discovery, registration, exchange and refresh call.
    pub http_timeout_secs: u64,
    /// Per-server deadline for the token sweep run at startup.
    pub startup_refresh_timeout_secs: u64,
}

impl Default for McpOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            client_name: "toolhub".into(),
            default_scopes: vec!["openid".into(), "profile".into()],
            http_timeout_secs: 30,
            startup_refresh_timeout_secs: 15,
        }
    }
}

/// Server record persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding MCP server records. When unset, records are kept in
    /// memory for the lifetime of the process.
    pub servers_path: Option<PathBuf>,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
