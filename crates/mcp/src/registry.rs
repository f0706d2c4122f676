//! Stored MCP server records and the runtime connection config derived from them.

use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    toolhub_oauth::{serialize_option_secret, unix_now},
};

/// Transport type for MCP server connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Stdio,
    Http,
}

/// OAuth credential block of a server record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpOAuthCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<Secret<String>>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    /// Unix timestamp. `None` with an access token present means non-expiring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Set when stored tokens were invalidated; cleared by a completed
    /// authorization.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reauth_required: bool,
}

impl McpOAuthCredentials {
    pub fn access_token(&self) -> Option<&str> {
        non_blank(self.access_token.as_ref())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        non_blank(self.refresh_token.as_ref())
    }

    /// Stored client id, ignoring blank values.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn client_secret(&self) -> Option<&str> {
        non_blank(self.client_secret.as_ref())
    }

    /// Access token is present and past its expiry.
    pub fn is_expired(&self) -> bool {
        self.access_token().is_some() && self.expires_at.is_some_and(|exp| exp <= unix_now())
    }

    /// Drop access token, refresh token and expiry, and flag the record for
    /// re-authorization.
    pub fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.expires_at = None;
        self.reauth_required = true;
    }
}

fn non_blank(secret: Option<&Secret<String>>) -> Option<&str> {
    secret
        .map(|s| s.expose_secret().trim())
        .filter(|s| !s.is_empty())
}

/// A user-owned MCP server record. Unique by `(owner_id, name)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerRecord {
    /// Store-assigned id, stable across upserts. `0` before the first save.
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    pub name: String,
    // Local process descriptor.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    // Remote descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_seconds: Option<u64>,
    /// Static bearer token configured by an administrator.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub bearer_token: Option<Secret<String>>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub oauth: McpOAuthCredentials,
}

impl McpServerRecord {
    /// Remote URL, ignoring blank values.
    pub fn remote_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_remote(&self) -> bool {
        self.remote_url().is_some()
    }

    pub fn has_token(&self) -> bool {
        self.oauth.access_token().is_some() || non_blank(self.bearer_token.as_ref()).is_some()
    }
}

/// Connection config handed to the tool-invocation layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Owner of the record this config came from.
    #[serde(default)]
    pub owner_id: i64,
    pub name: String,
    #[serde(default)]
    pub transport: TransportType,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_seconds: Option<u64>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub bearer_token: Option<Secret<String>>,
}

/// Map a stored record onto the runtime connection config. An OAuth access
/// token wins over a static bearer token.
pub fn convert_to_runtime_config(record: &McpServerRecord) -> McpServerConfig {
    let bearer_token = record
        .oauth
        .access_token()
        .or_else(|| non_blank(record.bearer_token.as_ref()))
        .map(|t| Secret::new(t.to_string()));

    let url = record.remote_url().map(str::to_string);
    McpServerConfig {
        owner_id: record.owner_id,
        name: record.name.clone(),
        transport: if url.is_some() {
            TransportType::Http
        } else {
            TransportType::Stdio
        },
        command: record.command.clone(),
        args: record.args.clone(),
        env: record.env.clone(),
        url,
        headers: record.headers.clone(),
        origin: record.origin.clone(),
        protocol_version: record.protocol_version.clone(),
        keep_alive_seconds: record.keep_alive_seconds,
        bearer_token,
    }
}
