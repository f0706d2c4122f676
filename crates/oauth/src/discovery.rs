//! OAuth metadata discovery for remote MCP servers.
//!
//! Implements:
//! - RFC 9728: OAuth 2.0 Protected Resource Metadata
//! - RFC 8414 / OpenID Connect Discovery: Authorization Server Metadata
//! - RFC 7591: OAuth 2.0 Dynamic Client Registration

use {
    reqwest::Client,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
    url::Url,
};

use crate::{Error, Result};

// ── Protected Resource Metadata (RFC 9728) ─────────────────────────────────

/// Metadata returned by `/.well-known/oauth-protected-resource`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The resource server's identifier.
    #[serde(default)]
    pub resource: Option<String>,
    /// Authorization server(s) that can issue tokens for this resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// Scopes the resource advertises.
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub bearer_methods_supported: Vec<String>,
}

/// Well-known URL for a resource: the metadata path is inserted between the
/// host and the resource's own path.
pub fn resource_metadata_url(resource_url: &Url) -> Result<String> {
    let origin = origin_of(resource_url)?;
    let path = match resource_url.path() {
        "/" => "",
        p => p,
    };
    Ok(format!("{origin}/.well-known/oauth-protected-resource{path}"))
}

/// Fetch protected resource metadata for `resource_url`. A single GET; any
/// non-200 or undecodable body is a discovery failure.
pub async fn fetch_resource_metadata(
    client: &Client,
    resource_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    let well_known = resource_metadata_url(resource_url)?;

    debug!(url = %well_known, "fetching protected resource metadata");

    let resp = client
        .get(&well_known)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| Error::discovery(&well_known, e.to_string()))?;

    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        return Err(Error::discovery(&well_known, format!("HTTP {status}")));
    }

    let meta: ProtectedResourceMetadata = resp
        .json()
        .await
        .map_err(|e| Error::discovery(&well_known, format!("decode error: {e}")))?;

    info!(
        url = %well_known,
        servers = meta.authorization_servers.len(),
        "fetched resource metadata"
    );

    Ok(meta)
}

// ── Authorization Server Metadata (RFC 8414) ───────────────────────────────

/// Metadata returned by an authorization server's well-known document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Advertised issuer. Not checked against the issuer used to reach it.
    #[serde(default)]
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// Dynamic client registration endpoint (RFC 7591).
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Candidate metadata URLs for `issuer`, in the order they are tried.
///
/// The issuer path is kept so tenant- or realm-scoped issuers resolve. The
/// last candidate is the bare-host OpenID document. Duplicates are kept.
pub fn as_metadata_candidates(issuer: &str) -> Result<Vec<String>> {
    let url = Url::parse(issuer)
        .map_err(|e| Error::discovery(issuer, format!("invalid issuer URL: {e}")))?;
    let origin = origin_of(&url)?;
    let path = url.path().trim_end_matches('/');

    Ok(vec![
        format!("{origin}{path}/.well-known/oauth-authorization-server"),
        format!("{origin}{path}/.well-known/openid-configuration"),
        format!("{origin}/.well-known/openid-configuration"),
    ])
}

/// Fetch authorization server metadata, returning the first candidate that
/// answers 200 with a decodable document.
pub async fn fetch_as_metadata(
    client: &Client,
    issuer: &str,
) -> Result<AuthorizationServerMetadata> {
    let mut last = None;

    for candidate in as_metadata_candidates(issuer)? {
        debug!(url = %candidate, "fetching authorization server metadata");

        let resp = match client
            .get(&candidate)
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                last = Some((candidate, e.to_string()));
                continue;
            },
        };

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            last = Some((candidate, format!("HTTP {status}")));
            continue;
        }

        match resp.json::<AuthorizationServerMetadata>().await {
            Ok(meta) => {
                info!(url = %candidate, issuer = %meta.issuer, "fetched AS metadata");
                return Ok(meta);
            },
            Err(e) => last = Some((candidate, format!("decode error: {e}"))),
        }
    }

    let (url, message) = last.unwrap_or_else(|| (issuer.to_string(), "no candidates".into()));
    Err(Error::discovery(url, message))
}

// ── Dynamic Client Registration (RFC 7591) ─────────────────────────────────

/// Request body for dynamic client registration.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistrationRequest {
    pub client_name: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Successful registration response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_id_issued_at: Option<u64>,
    #[serde(default)]
    pub client_secret_expires_at: Option<u64>,
}

/// Register a public client at `registration_endpoint`.
pub async fn register_client(
    client: &Client,
    registration_endpoint: &str,
    redirect_uri: &str,
    client_name: &str,
    scopes: &[String],
) -> Result<ClientRegistrationResponse> {
    debug!(endpoint = %registration_endpoint, client_name, "registering dynamic OAuth client");

    let req = ClientRegistrationRequest {
        client_name: client_name.to_string(),
        grant_types: vec!["authorization_code".to_string()],
        response_types: vec!["code".to_string()],
        redirect_uris: vec![redirect_uri.to_string()],
        token_endpoint_auth_method: "none".to_string(),
        scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
    };

    let resp = client
        .post(registration_endpoint)
        .json(&req)
        .send()
        .await
        .map_err(|e| Error::Registration(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Registration(format!("HTTP {status}: {body}")));
    }

    let reg: ClientRegistrationResponse = resp
        .json()
        .await
        .map_err(|e| Error::Registration(format!("invalid response: {e}")))?;

    info!(client_id = %reg.client_id, "registered dynamic OAuth client");

    Ok(reg)
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// `scheme://host[:port]` of an absolute URL.
fn origin_of(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::invalid_input(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}
