//! Interactive OAuth connect flow for remote MCP servers.
//!
//! `start` discovers the authorization server, resolves (or registers) a
//! client and hands back the authorization URL together with the attempt
//! state the browser must carry. `callback` validates that state, exchanges
//! the code, persists the tokens and hot-reloads the server in the
//! background. No attempt state is kept server-side.

use std::sync::Arc;

use {
    secrecy::ExposeSecret,
    serde::{Deserialize, Serialize},
    time::{OffsetDateTime, format_description::well_known::Rfc3339},
    toolhub_mcp::{
        CredentialResolver, Error, McpServerRecord, ResolvedClient, Result, ServerLifecycle,
        ServerRecordStore,
    },
    toolhub_oauth::{
        AuthorizationServerMetadata, OAuthFlow, OAuthTokens, ProtectedResourceMetadata,
        fetch_as_metadata, fetch_resource_metadata,
    },
    tracing::{debug, info, warn},
    url::Url,
};

/// Body of `POST /oauth/start`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub server_id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub redirect_url: String,
}

/// Query of `GET /oauth/callback`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// One in-flight authorization, round-tripped through the `oauth_state`
/// cookie as `state|target|owner|server_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationAttempt {
    pub state: String,
    pub target_url: String,
    pub owner_id: i64,
    /// `None` for URL-only attempts; encoded as `0`.
    pub server_id: Option<i64>,
}

impl AuthorizationAttempt {
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.state,
            self.target_url,
            self.owner_id,
            self.server_id.unwrap_or(0)
        )
    }

    /// Parse a cookie value. The target URL may itself contain `|`, so the
    /// state is taken from the front and the two ids from the back.
    pub fn decode(raw: &str) -> Option<Self> {
        let (state, rest) = raw.split_once('|')?;
        let (rest, server_id) = rest.rsplit_once('|')?;
        let (target_url, owner_id) = rest.rsplit_once('|')?;
        if state.is_empty() || target_url.is_empty() {
            return None;
        }
        let owner_id = owner_id.parse().ok()?;
        let server_id: i64 = server_id.parse().ok()?;
        Some(Self {
            state: state.to_string(),
            target_url: target_url.to_string(),
            owner_id,
            server_id: (server_id > 0).then_some(server_id),
        })
    }
}

/// What the browser must carry from `start` to `callback`.
#[derive(Debug)]
pub struct StartOutcome {
    pub redirect_url: String,
    pub attempt: AuthorizationAttempt,
    pub verifier: String,
    /// Public client registered for a URL-only attempt. There is no record to
    /// write it back to, so it travels with the attempt.
    pub registered_client_id: Option<String>,
}

/// Raw cookie values presented to `callback`.
#[derive(Debug, Default)]
pub struct AttemptCookies {
    pub state: Option<String>,
    pub pkce: Option<String>,
    pub client: Option<String>,
}

#[derive(Debug)]
pub struct CallbackOutcome {
    pub tokens: OAuthTokens,
    pub target_url: String,
    /// The persisted record, when the attempt was bound to one.
    pub server: Option<McpServerRecord>,
}

pub struct McpOAuthService {
    http: reqwest::Client,
    store: Arc<dyn ServerRecordStore>,
    resolver: Arc<CredentialResolver>,
    lifecycle: Arc<ServerLifecycle>,
}

impl McpOAuthService {
    pub fn new(
        http: reqwest::Client,
        store: Arc<dyn ServerRecordStore>,
        resolver: Arc<CredentialResolver>,
        lifecycle: Arc<ServerLifecycle>,
    ) -> Self {
        Self {
            http,
            store,
            resolver,
            lifecycle,
        }
    }

    /// Begin an authorization attempt for a stored server or a bare URL.
    pub async fn start(&self, owner: i64, req: StartRequest) -> Result<StartOutcome> {
        let mut record = match req.server_id.filter(|id| *id > 0) {
            Some(id) => Some(
                self.store
                    .get_by_id(owner, id)
                    .await?
                    .ok_or_else(|| Error::invalid_input(format!("unknown server id {id}")))?,
            ),
            None => None,
        };

        let raw_target = match &record {
            Some(r) => r.remote_url().map(str::to_string).ok_or_else(|| {
                Error::invalid_input(format!("server '{}' has no remote url", r.name))
            })?,
            None => req
                .url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::invalid_input("server url is required"))?,
        };
        let target = parse_target(&raw_target)?;

        let (resource_meta, as_meta) = self.discover(&target).await?;
        let client = self
            .resolver
            .resolve(owner, record.as_mut(), &as_meta, &resource_meta)
            .await?;

        let registered_client_id = url_only_client_hint(&client, record.is_some(), &raw_target);

        let flow = OAuthFlow::with_client(
            client.into_oauth_config(
                &as_meta,
                self.resolver.redirect_uri(),
                raw_target.as_str(),
            ),
            self.http.clone(),
        );
        let request = flow.start()?;

        info!(
            owner,
            server_id = record.as_ref().map(|r| r.id),
            target = %raw_target,
            "starting MCP OAuth authorization"
        );

        Ok(StartOutcome {
            redirect_url: request.url,
            attempt: AuthorizationAttempt {
                state: request.state,
                target_url: raw_target,
                owner_id: owner,
                server_id: record.map(|r| r.id),
            },
            verifier: request.pkce.verifier,
            registered_client_id,
        })
    }

    /// Complete an attempt: validate state, exchange the code and persist.
    pub async fn callback(
        &self,
        query: CallbackQuery,
        cookies: AttemptCookies,
    ) -> Result<CallbackOutcome> {
        if let Some(error) = query.error.as_deref().filter(|e| !e.is_empty()) {
            let detail = query.error_description.as_deref().unwrap_or_default();
            return Err(Error::invalid_input(format!(
                "authorization denied: {error} {detail}"
            )));
        }

        let attempt = cookies
            .state
            .as_deref()
            .filter(|v| !v.is_empty())
            .and_then(AuthorizationAttempt::decode)
            .ok_or_else(|| Error::invalid_input("missing or malformed oauth_state cookie"))?;
        let verifier = cookies
            .pkce
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::invalid_input("missing oauth_pkce cookie"))?;

        if query.state.as_deref() != Some(attempt.state.as_str()) {
            return Err(Error::invalid_input("oauth state mismatch"));
        }
        let code = query
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::invalid_input("missing authorization code"))?;

        let record = match attempt.server_id {
            Some(id) => Some(
                self.store
                    .get_by_id(attempt.owner_id, id)
                    .await?
                    .ok_or_else(|| Error::invalid_input(format!("unknown server id {id}")))?,
            ),
            None => None,
        };

        let target = parse_target(&attempt.target_url)?;
        let (resource_meta, as_meta) = self.discover(&target).await?;
        let client = self.resolver.resolve_without_registration(
            record.as_ref(),
            &resource_meta,
            cookies.client.as_deref(),
        )?;

        let flow = OAuthFlow::with_client(
            client.into_oauth_config(
                &as_meta,
                self.resolver.redirect_uri(),
                attempt.target_url.as_str(),
            ),
            self.http.clone(),
        );
        let tokens = flow.exchange(&code, &verifier).await?;

        let server = match record {
            Some(mut record) => {
                record.oauth.access_token = Some(tokens.access_token.clone());
                record.oauth.refresh_token = tokens.refresh_token.clone();
                record.oauth.expires_at = tokens.expires_at;
                record.oauth.reauth_required = false;
                let saved = self.store.upsert(attempt.owner_id, record).await?;
                info!(server = %saved.name, id = saved.id, "stored MCP OAuth tokens");
                self.schedule_reload(saved.clone());
                Some(saved)
            },
            None => {
                debug!(target = %attempt.target_url, "authorized URL-only MCP server");
                None
            },
        };

        Ok(CallbackOutcome {
            tokens,
            target_url: attempt.target_url,
            server,
        })
    }

    /// Re-register the server off the request path. Failures are logged only.
    fn schedule_reload(&self, record: McpServerRecord) {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            let name = record.name.clone();
            match lifecycle.reload(record).await {
                Ok(_) => debug!(server = %name, "hot-reloaded MCP server"),
                Err(e) => warn!(server = %name, error = %e, "MCP server hot-reload failed"),
            }
        });
    }

    async fn discover(
        &self,
        target: &Url,
    ) -> Result<(ProtectedResourceMetadata, AuthorizationServerMetadata)> {
        let resource_meta = fetch_resource_metadata(&self.http, target).await?;
        let issuer = resource_meta.authorization_servers.first().ok_or_else(|| {
            toolhub_oauth::Error::discovery(target.as_str(), "no authorization servers advertised")
        })?;
        let as_meta = fetch_as_metadata(&self.http, issuer).await?;
        Ok((resource_meta, as_meta))
    }
}

/// Client id a URL-only attempt must carry to its callback. Only the id
/// survives: a registered secret is never put in a cookie.
fn url_only_client_hint(client: &ResolvedClient, has_record: bool, target: &str) -> Option<String> {
    if !client.registered || has_record {
        return None;
    }
    if client.client_secret.is_some() {
        warn!(
            target = %target,
            client_id = %client.client_id,
            "registered client secret is dropped for a URL-only attempt, the code exchange runs as a public client"
        );
    }
    Some(client.client_id.clone())
}

/// Coarse check: absolute `http`/`https` URL with a non-empty host.
fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::invalid_input(format!("invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::invalid_input(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_input("url has no host"));
    }
    Ok(url)
}

/// HTML page that hands the tokens to the opener window and closes itself.
pub fn success_page(outcome: &CallbackOutcome) -> String {
    let expiry = outcome
        .tokens
        .expires_at
        .and_then(|ts| i64::try_from(ts).ok())
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .and_then(|dt| dt.format(&Rfc3339).ok());
    let payload = serde_json::json!({
        "type": "mcp-oauth-success",
        "token": outcome.tokens.access_token.expose_secret(),
        "refreshToken": outcome
            .tokens
            .refresh_token
            .as_ref()
            .map(|t| t.expose_secret().as_str()),
        "expiry": expiry,
        "url": outcome.target_url,
    });
    let message = script_safe_json(&payload);
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Connected</title></head>\
         <body><h1>Connected!</h1><p>Token received. You can close this window.</p>\
         <script>if (window.opener) {{ window.opener.postMessage({message}, '*'); }} \
         window.close();</script></body></html>\n"
    )
}

/// JSON that can be embedded in a `<script>` element. `<`, `>` and `&` only
/// ever appear inside string literals, where the unicode escapes are
/// equivalent.
fn script_safe_json(value: &serde_json::Value) -> String {
    value
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}
