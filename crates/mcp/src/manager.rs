//! McpManager: the in-process live registry, plus the lifecycle glue that
//! refreshes stored credentials before every (re)registration.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    refresh::TokenRefresher,
    registry::{McpServerConfig, McpServerRecord, TransportType, convert_to_runtime_config},
    store::ServerRecordStore,
    traits::ToolServerRegistrar,
    types::{McpServerSummary, ServerStatus},
};

/// Status derived from the record alone.
///
/// Disabled wins over everything. A remote record flagged for
/// re-authorization, or one that has used OAuth but holds no usable access
/// token and no refresh token, needs re-authorization. A flagged record may
/// carry no client id at all when its tokens came from the fallback client.
pub fn server_status(record: &McpServerRecord) -> ServerStatus {
    if record.disabled {
        return ServerStatus::Disabled;
    }
    if !record.is_remote() {
        return ServerStatus::Connected;
    }
    let oauth = &record.oauth;
    if oauth.reauth_required {
        return ServerStatus::NeedsAuth;
    }
    let used_oauth = oauth.client_id().is_some() || oauth.access_token().is_some();
    let unusable = oauth.access_token().is_none() || oauth.is_expired();
    if used_oauth && unusable && oauth.refresh_token().is_none() {
        return ServerStatus::NeedsAuth;
    }
    ServerStatus::Connected
}

// ── Live registry ───────────────────────────────────────────────────────────

/// Sessions are keyed by owner and server name.
type SessionKey = (i64, String);

/// Mutable state behind the single `RwLock` on [`McpManager`].
#[derive(Default)]
pub struct McpManagerInner {
    pub sessions: HashMap<SessionKey, McpServerConfig>,
}

/// Holds the connection config of every registered server.
#[derive(Default)]
pub struct McpManager {
    pub inner: RwLock<McpManagerInner>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_registered(&self, owner: i64, name: &str) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .contains_key(&(owner, name.to_string()))
    }

    /// Current config of a registered server.
    pub async fn session(&self, owner: i64, name: &str) -> Option<McpServerConfig> {
        self.inner
            .read()
            .await
            .sessions
            .get(&(owner, name.to_string()))
            .cloned()
    }

    /// Registered `(owner, name)` pairs, sorted.
    pub async fn registered(&self) -> Vec<(i64, String)> {
        let mut keys: Vec<SessionKey> = self.inner.read().await.sessions.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.write().await;
        let count = inner.sessions.len();
        inner.sessions.clear();
        info!(count, "dropped all MCP sessions");
    }
}

fn validate(config: &McpServerConfig) -> std::result::Result<(), String> {
    match config.transport {
        TransportType::Stdio if config.command.trim().is_empty() => {
            Err("stdio transport requires a command".into())
        },
        TransportType::Http if config.url.as_deref().is_none_or(|u| u.trim().is_empty()) => {
            Err("http transport requires a url".into())
        },
        _ => Ok(()),
    }
}

#[async_trait]
impl ToolServerRegistrar for McpManager {
    async fn register_one(&self, config: McpServerConfig) -> Result<()> {
        validate(&config).map_err(|message| Error::Registrar {
            server: config.name.clone(),
            message,
        })?;
        info!(
            server = %config.name,
            owner = config.owner_id,
            transport = ?config.transport,
            "registered MCP server"
        );
        self.inner
            .write()
            .await
            .sessions
            .insert((config.owner_id, config.name.clone()), config);
        Ok(())
    }

    async fn remove_one(&self, owner: i64, name: &str) {
        let key = (owner, name.to_string());
        if self.inner.write().await.sessions.remove(&key).is_some() {
            info!(server = %name, owner, "removed MCP server");
        }
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

/// Registers stored servers with the live registry, refreshing their tokens
/// first.
pub struct ServerLifecycle {
    refresher: Arc<TokenRefresher>,
    registrar: Arc<dyn ToolServerRegistrar>,
    store: Arc<dyn ServerRecordStore>,
}

impl ServerLifecycle {
    pub fn new(
        refresher: Arc<TokenRefresher>,
        registrar: Arc<dyn ToolServerRegistrar>,
        store: Arc<dyn ServerRecordStore>,
    ) -> Self {
        Self {
            refresher,
            registrar,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn ServerRecordStore> {
        &self.store
    }

    /// Refresh the record's tokens, then convert it to a connection config.
    pub async fn refresh_and_convert(
        &self,
        record: McpServerRecord,
    ) -> Result<(McpServerConfig, bool)> {
        self.convert(record, None).await
    }

    async fn convert(
        &self,
        record: McpServerRecord,
        limit: Option<Duration>,
    ) -> Result<(McpServerConfig, bool)> {
        let outcome = match limit {
            Some(limit) => {
                self.refresher
                    .check_and_refresh_within(record, limit)
                    .await?
            },
            None => self.refresher.check_and_refresh(record).await?,
        };
        if let Some(e) = &outcome.refresh_error {
            debug!(server = %outcome.record.name, error = %e, "refresh error recorded");
        }
        Ok((
            convert_to_runtime_config(&outcome.record),
            outcome.needs_reauth,
        ))
    }

    /// Register a stored server. Disabled records are skipped and report
    /// `false`; otherwise returns whether the record now needs re-auth.
    pub async fn register(&self, record: McpServerRecord) -> Result<bool> {
        self.register_inner(record, None).await
    }

    /// [`register`](Self::register) with the token refresh network calls
    /// bounded by `limit`. A timeout surfaces as
    /// [`Error::RefreshTimedOut`] and nothing is registered.
    pub async fn register_within(&self, record: McpServerRecord, limit: Duration) -> Result<bool> {
        self.register_inner(record, Some(limit)).await
    }

    async fn register_inner(
        &self,
        record: McpServerRecord,
        limit: Option<Duration>,
    ) -> Result<bool> {
        if record.disabled {
            debug!(server = %record.name, "skipping disabled MCP server");
            return Ok(false);
        }
        let name = record.name.clone();
        let (config, needs_reauth) = self.convert(record, limit).await?;
        if needs_reauth {
            warn!(server = %name, "MCP server needs re-authorization");
        }
        self.registrar.register_one(config).await?;
        Ok(needs_reauth)
    }

    /// Deregister then register again with the current stored state.
    pub async fn reload(&self, record: McpServerRecord) -> Result<bool> {
        self.registrar
            .remove_one(record.owner_id, &record.name)
            .await;
        self.register(record).await
    }

    /// Delete a record and drop its live session.
    pub async fn remove(&self, owner: i64, name: &str) -> Result<bool> {
        let removed = self.store.delete(owner, name).await?;
        self.registrar.remove_one(owner, name).await;
        Ok(removed)
    }

    /// Status of every record owned by `owner`.
    pub async fn status_all(
        &self,
        owner: i64,
        live: &McpManager,
    ) -> Result<Vec<McpServerSummary>> {
        let mut out = Vec::new();
        for record in self.store.list(owner).await? {
            let status = match server_status(&record) {
                ServerStatus::Connected if !live.is_registered(owner, &record.name).await => {
                    ServerStatus::Disconnected
                },
                s => s,
            };
            out.push(McpServerSummary::new(&record, status));
        }
        Ok(out)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{auth::CredentialResolver, store::MemoryServerStore},
        secrecy::{ExposeSecret, Secret},
        toolhub_oauth::unix_now,
    };

    fn remote(name: &str) -> McpServerRecord {
        McpServerRecord {
            name: name.into(),
            url: Some(format!("https://{name}.example.com/mcp")),
            ..Default::default()
        }
    }

    struct Harness {
        store: Arc<dyn ServerRecordStore>,
        live: Arc<McpManager>,
        lifecycle: ServerLifecycle,
    }

    fn harness() -> Harness {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let http = reqwest::Client::new();
        let resolver = Arc::new(
            CredentialResolver::new(
                http.clone(),
                Arc::clone(&store),
                "https://hub.example.com/oauth/callback",
            )
            .with_fallback(Some("env-id".into()), None),
        );
        let refresher = Arc::new(TokenRefresher::new(http, Arc::clone(&store), resolver));
        let live = Arc::new(McpManager::new());
        let lifecycle = ServerLifecycle::new(
            refresher,
            Arc::clone(&live) as Arc<dyn ToolServerRegistrar>,
            Arc::clone(&store),
        );
        Harness {
            store,
            live,
            lifecycle,
        }
    }

    #[test]
    fn disabled_always_reports_disabled() {
        let mut rec = remote("docs");
        rec.disabled = true;
        assert_eq!(server_status(&rec), ServerStatus::Disabled);

        rec.oauth.client_id = Some("cid".into());
        rec.oauth.access_token = Some(Secret::new("at".into()));
        assert_eq!(server_status(&rec), ServerStatus::Disabled);
    }

    #[test]
    fn oauth_server_without_token_needs_auth() {
        let mut rec = remote("docs");
        rec.oauth.client_id = Some("cid".into());
        assert_eq!(server_status(&rec), ServerStatus::NeedsAuth);

        rec.oauth.access_token = Some(Secret::new("at".into()));
        rec.oauth.expires_at = Some(unix_now() - 5);
        assert_eq!(server_status(&rec), ServerStatus::NeedsAuth);

        rec.oauth.refresh_token = Some(Secret::new("rt".into()));
        assert_eq!(server_status(&rec), ServerStatus::Connected);
    }

    #[test]
    fn plain_server_is_connected() {
        assert_eq!(server_status(&remote("docs")), ServerStatus::Connected);
    }

    #[test]
    fn flagged_record_needs_auth_without_client_id() {
        let mut rec = remote("docs");
        rec.oauth.reauth_required = true;
        assert_eq!(server_status(&rec), ServerStatus::NeedsAuth);

        let mut local = McpServerRecord {
            name: "fs".into(),
            command: "mcp-fs".into(),
            ..Default::default()
        };
        local.oauth.reauth_required = true;
        assert_eq!(server_status(&local), ServerStatus::Connected);
    }

    #[test]
    fn expired_fallback_token_needs_auth() {
        let mut rec = remote("docs");
        rec.oauth.access_token = Some(Secret::new("at".into()));
        rec.oauth.expires_at = Some(unix_now() - 5);
        assert_eq!(server_status(&rec), ServerStatus::NeedsAuth);
    }

    #[tokio::test]
    async fn register_rejects_incomplete_config() {
        let mgr = McpManager::new();
        let err = mgr
            .register_one(McpServerConfig {
                name: "broken".into(),
                transport: TransportType::Stdio,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registrar { .. }));
        assert!(mgr.registered().await.is_empty());
    }

    #[tokio::test]
    async fn register_uses_current_token() {
        let h = harness();
        let mut rec = remote("docs");
        rec.oauth.access_token = Some(Secret::new("at".into()));
        let rec = h.store.upsert(1, rec).await.unwrap();

        let needs_reauth = h.lifecycle.register(rec).await.unwrap();
        assert!(!needs_reauth);
        let session = h.live.session(1, "docs").await.unwrap();
        assert_eq!(
            session.bearer_token.map(|s| s.expose_secret().clone()),
            Some("at".to_string())
        );
    }

    #[tokio::test]
    async fn register_skips_disabled() {
        let h = harness();
        let mut rec = remote("docs");
        rec.disabled = true;
        assert!(!h.lifecycle.register(rec).await.unwrap());
        assert!(!h.live.is_registered(0, "docs").await);
    }

    #[tokio::test]
    async fn expired_token_is_cleared_before_registration() {
        let h = harness();
        let mut rec = remote("docs");
        rec.bearer_token = Some(Secret::new("static".into()));
        rec.oauth.access_token = Some(Secret::new("stale".into()));
        rec.oauth.expires_at = Some(unix_now() - 1);
        let rec = h.store.upsert(1, rec).await.unwrap();

        let needs_reauth = h.lifecycle.register(rec).await.unwrap();
        assert!(needs_reauth);
        let session = h.live.session(1, "docs").await.unwrap();
        assert_eq!(
            session.bearer_token.map(|s| s.expose_secret().clone()),
            Some("static".to_string())
        );
    }

    #[tokio::test]
    async fn reload_replaces_session() {
        let h = harness();
        let rec = h.store.upsert(1, remote("docs")).await.unwrap();
        h.lifecycle.register(rec.clone()).await.unwrap();

        let mut updated = rec;
        updated.oauth.access_token = Some(Secret::new("fresh".into()));
        h.lifecycle.reload(updated).await.unwrap();

        let session = h.live.session(1, "docs").await.unwrap();
        assert_eq!(
            session.bearer_token.map(|s| s.expose_secret().clone()),
            Some("fresh".to_string())
        );
    }

    #[tokio::test]
    async fn remove_deletes_and_deregisters() {
        let h = harness();
        let rec = h.store.upsert(1, remote("docs")).await.unwrap();
        h.lifecycle.register(rec).await.unwrap();

        assert!(h.lifecycle.remove(1, "docs").await.unwrap());
        assert!(!h.live.is_registered(1, "docs").await);
        assert!(h.store.list(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_all_marks_unregistered_as_disconnected() {
        let h = harness();
        let a = h.store.upsert(1, remote("alpha")).await.unwrap();
        h.store.upsert(1, remote("beta")).await.unwrap();
        h.lifecycle.register(a).await.unwrap();

        let statuses = h.lifecycle.status_all(1, &h.live).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].status, ServerStatus::Connected);
        assert_eq!(statuses[1].status, ServerStatus::Disconnected);
    }

    #[tokio::test]
    async fn fallback_record_reports_needs_auth_after_registration() {
        let h = harness();
        let mut rec = remote("docs");
        rec.oauth.access_token = Some(Secret::new("stale".into()));
        rec.oauth.expires_at = Some(unix_now() - 1);
        let rec = h.store.upsert(1, rec).await.unwrap();
        assert!(rec.oauth.client_id().is_none());

        assert!(h.lifecycle.register(rec).await.unwrap());

        let statuses = h.lifecycle.status_all(1, &h.live).await.unwrap();
        assert_eq!(statuses[0].status, ServerStatus::NeedsAuth);
    }

    #[tokio::test]
    async fn sessions_are_scoped_by_owner() {
        let h = harness();
        let mut mine = remote("docs");
        mine.oauth.access_token = Some(Secret::new("mine".into()));
        let mine = h.store.upsert(1, mine).await.unwrap();
        let mut theirs = remote("docs");
        theirs.oauth.access_token = Some(Secret::new("theirs".into()));
        h.store.upsert(2, theirs).await.unwrap();

        h.lifecycle.register(mine).await.unwrap();

        let session = h.live.session(1, "docs").await.unwrap();
        assert_eq!(
            session.bearer_token.map(|s| s.expose_secret().clone()),
            Some("mine".to_string())
        );
        assert!(!h.live.is_registered(2, "docs").await);
        let other = h.lifecycle.status_all(2, &h.live).await.unwrap();
        assert_eq!(other[0].status, ServerStatus::Disconnected);

        assert!(h.lifecycle.remove(2, "docs").await.unwrap());
        assert!(h.live.is_registered(1, "docs").await);
        assert_eq!(h.live.registered().await, vec![(1, "docs".to_string())]);
    }
}
