//! Proactive access-token refresh for stored server records.

use std::{sync::Arc, time::Duration};

use {
    toolhub_oauth::{OAuthFlow, OAuthTokens, fetch_as_metadata, fetch_resource_metadata, unix_now},
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    auth::CredentialResolver,
    error::{Error, Result},
    registry::McpServerRecord,
    store::ServerRecordStore,
};

/// Tokens expiring within this window are refreshed ahead of time.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Result of [`TokenRefresher::check_and_refresh`].
#[derive(Debug)]
pub struct RefreshOutcome {
    pub record: McpServerRecord,
    /// The stored credentials are unusable; interactive re-authorization is needed.
    pub needs_reauth: bool,
    /// Why a refresh attempt failed. Informational only.
    pub refresh_error: Option<toolhub_oauth::Error>,
}

impl RefreshOutcome {
    fn unchanged(record: McpServerRecord) -> Self {
        Self {
            record,
            needs_reauth: false,
            refresh_error: None,
        }
    }
}

/// Checks a record's access token and refreshes it when close to expiry.
pub struct TokenRefresher {
    http: reqwest::Client,
    store: Arc<dyn ServerRecordStore>,
    resolver: Arc<CredentialResolver>,
    window: Duration,
}

impl TokenRefresher {
    pub fn new(
        http: reqwest::Client,
        store: Arc<dyn ServerRecordStore>,
        resolver: Arc<CredentialResolver>,
    ) -> Self {
        Self {
            http,
            store,
            resolver,
            window: REFRESH_WINDOW,
        }
    }

    /// Evaluate `record` and refresh or invalidate its tokens as needed.
    ///
    /// Only persistence failures are returned as `Err`. A failed refresh
    /// degrades the record to `needs_reauth` with the cause attached.
    pub async fn check_and_refresh(&self, record: McpServerRecord) -> Result<RefreshOutcome> {
        self.check(record, None).await
    }

    /// Like [`check_and_refresh`](Self::check_and_refresh), but the
    /// discovery and token calls must finish within `limit`.
    ///
    /// Only the network calls are bounded. Once the token endpoint has
    /// answered, the result is always persisted, so a rotated refresh token
    /// is never lost to the deadline. On timeout the record is left as
    /// stored and [`Error::RefreshTimedOut`] is returned.
    pub async fn check_and_refresh_within(
        &self,
        record: McpServerRecord,
        limit: Duration,
    ) -> Result<RefreshOutcome> {
        self.check(record, Some(limit)).await
    }

    async fn check(
        &self,
        mut record: McpServerRecord,
        limit: Option<Duration>,
    ) -> Result<RefreshOutcome> {
        if record.oauth.access_token().is_none() {
            return Ok(RefreshOutcome::unchanged(record));
        }
        let Some(expires_at) = record.oauth.expires_at.filter(|e| *e > 0) else {
            return Ok(RefreshOutcome::unchanged(record));
        };
        if expires_at > unix_now() + self.window.as_secs() {
            return Ok(RefreshOutcome::unchanged(record));
        }

        let Some(refresh_token) = record.oauth.refresh_token().map(str::to_string) else {
            info!(server = %record.name, "access token expired without refresh token, clearing");
            record.oauth.access_token = None;
            record.oauth.expires_at = None;
            record.oauth.reauth_required = true;
            let record = self.persist(record).await?;
            return Ok(RefreshOutcome {
                record,
                needs_reauth: true,
                refresh_error: None,
            });
        };

        let attempt = self.refresh(&record, &refresh_token);
        let result = match limit {
            Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
                Error::RefreshTimedOut {
                    server: record.name.clone(),
                }
            })?,
            None => attempt.await,
        };

        match result {
            Ok(tokens) => {
                record.oauth.access_token = Some(tokens.access_token);
                if let Some(rotated) = tokens.refresh_token {
                    record.oauth.refresh_token = Some(rotated);
                }
                record.oauth.expires_at = tokens.expires_at;
                let record = self.persist(record).await?;
                info!(
                    server = %record.name,
                    expires_at = ?record.oauth.expires_at,
                    "refreshed access token"
                );
                Ok(RefreshOutcome::unchanged(record))
            },
            Err(e) => {
                let err = match e {
                    toolhub_oauth::Error::Refresh(_) => e,
                    other => toolhub_oauth::Error::Refresh(other.to_string()),
                };
                warn!(
                    server = %record.name,
                    error = %err,
                    "token refresh failed, re-authorization required"
                );
                record.oauth.clear_tokens();
                let record = self.persist(record).await?;
                Ok(RefreshOutcome {
                    record,
                    needs_reauth: true,
                    refresh_error: Some(err),
                })
            },
        }
    }

    async fn refresh(
        &self,
        record: &McpServerRecord,
        refresh_token: &str,
    ) -> toolhub_oauth::Result<OAuthTokens> {
        let target = record
            .remote_url()
            .ok_or_else(|| toolhub_oauth::Error::Refresh("server has no remote URL".into()))?;
        let target_url = Url::parse(target)?;

        let resource_meta = fetch_resource_metadata(&self.http, &target_url).await?;
        let issuer = resource_meta.authorization_servers.first().ok_or_else(|| {
            toolhub_oauth::Error::discovery(target, "no authorization servers advertised")
        })?;
        let as_meta = fetch_as_metadata(&self.http, issuer).await?;

        let client = self
            .resolver
            .resolve_without_registration(Some(record), &resource_meta, None)
            .map_err(|e| toolhub_oauth::Error::Refresh(e.to_string()))?;

        debug!(server = %record.name, token_url = %as_meta.token_endpoint, "refreshing token");

        let flow = OAuthFlow::with_client(
            client.into_oauth_config(&as_meta, self.resolver.redirect_uri(), target),
            self.http.clone(),
        );
        flow.refresh(refresh_token).await
    }

    async fn persist(&self, record: McpServerRecord) -> Result<McpServerRecord> {
        self.store.upsert(record.owner_id, record).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::store::MemoryServerStore, secrecy::Secret};

    struct Harness {
        store: Arc<dyn ServerRecordStore>,
        refresher: TokenRefresher,
    }

    fn harness() -> Harness {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let http = reqwest::Client::new();
        let resolver = Arc::new(CredentialResolver::new(
            http.clone(),
            Arc::clone(&store),
            "https://hub.example.com/oauth/callback",
        ));
        Harness {
            refresher: TokenRefresher::new(http, Arc::clone(&store), resolver),
            store,
        }
    }

    async fn saved(
        h: &Harness,
        url: &str,
        access: &str,
        refresh: Option<&str>,
        expires_at: Option<u64>,
    ) -> McpServerRecord {
        let mut rec = McpServerRecord {
            name: "docs".into(),
            owner_id: 1,
            url: Some(url.into()),
            ..Default::default()
        };
        rec.oauth.client_id = Some("cid".into());
        rec.oauth.access_token = Some(Secret::new(access.into()));
        rec.oauth.refresh_token = refresh.map(|r| Secret::new(r.into()));
        rec.oauth.expires_at = expires_at;
        h.store.upsert(1, rec).await.unwrap()
    }

    /// Mock resource + AS metadata pointing at `server`'s `/token`.
    async fn mock_discovery(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
        let base = server.url();
        vec![
            server
                .mock("GET", "/.well-known/oauth-protected-resource/mcp")
                .with_status(200)
                .with_body(serde_json::json!({"authorization_servers": [base]}).to_string())
                .create_async()
                .await,
            server
                .mock("GET", "/.well-known/oauth-authorization-server")
                .with_status(200)
                .with_body(
                    serde_json::json!({
                        "issuer": base,
                        "authorization_endpoint": format!("{base}/authorize"),
                        "token_endpoint": format!("{base}/token"),
                    })
                    .to_string(),
                )
                .create_async()
                .await,
        ]
    }

    #[tokio::test]
    async fn no_access_token_is_untouched() {
        let h = harness();
        let rec = McpServerRecord {
            name: "docs".into(),
            ..Default::default()
        };
        let out = h.refresher.check_and_refresh(rec).await.unwrap();
        assert!(!out.needs_reauth);
        assert!(h.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_expiring_token_is_untouched() {
        let h = harness();
        let rec = saved(&h, "http://127.0.0.1:1/mcp", "at", None, None).await;
        let out = h.refresher.check_and_refresh(rec).await.unwrap();
        assert!(!out.needs_reauth);
        assert_eq!(out.record.oauth.access_token(), Some("at"));
    }

    #[tokio::test]
    async fn token_valid_for_ten_minutes_makes_no_calls() {
        let mut server = mockito::Server::new_async().await;
        let any = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let token = server
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let h = harness();
        let rec = saved(
            &h,
            &format!("{}/mcp", server.url()),
            "at",
            Some("rt"),
            Some(unix_now() + 600),
        )
        .await;
        let out = h.refresher.check_and_refresh(rec).await.unwrap();

        assert!(!out.needs_reauth);
        assert_eq!(out.record.oauth.access_token(), Some("at"));
        any.assert_async().await;
        token.assert_async().await;
    }

    #[tokio::test]
    async fn expired_without_refresh_token_clears_without_network() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let post = server
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let h = harness();
        let rec = saved(
            &h,
            &format!("{}/mcp", server.url()),
            "at",
            None,
            Some(unix_now() - 1),
        )
        .await;
        let id = rec.id;
        let out = h.refresher.check_and_refresh(rec).await.unwrap();

        assert!(out.needs_reauth);
        assert!(out.refresh_error.is_none());
        assert!(out.record.oauth.access_token().is_none());
        assert!(out.record.oauth.expires_at.is_none());

        let stored = h.store.get_by_id(1, id).await.unwrap().unwrap();
        assert!(stored.oauth.access_token().is_none());
        assert_eq!(stored.oauth.client_id(), Some("cid"));
        get.assert_async().await;
        post.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let mut server = mockito::Server::new_async().await;
        let _discovery = mock_discovery(&mut server).await;
        let token = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "rt-old".into()),
                mockito::Matcher::UrlEncoded("client_id".into(), "cid".into()),
                mockito::Matcher::UrlEncoded("resource".into(), format!("{}/mcp", server.url())),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-new","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let h = harness();
        let rec = saved(
            &h,
            &format!("{}/mcp", server.url()),
            "at-old",
            Some("rt-old"),
            Some(unix_now() + 60),
        )
        .await;
        let out = h.refresher.check_and_refresh(rec).await.unwrap();

        assert!(!out.needs_reauth);
        assert_eq!(out.record.oauth.access_token(), Some("at-new"));
        assert_eq!(out.record.oauth.refresh_token(), Some("rt-old"));
        assert!(out.record.oauth.expires_at.unwrap() > unix_now() + 3000);
        let stored = h.store.get_by_id(1, out.record.id).await.unwrap().unwrap();
        assert_eq!(stored.oauth.access_token(), Some("at-new"));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_replaces_rotated_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let _discovery = mock_discovery(&mut server).await;
        let _token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"at-new","refresh_token":"rt-new"}"#)
            .create_async()
            .await;

        let h = harness();
        let rec = saved(
            &h,
            &format!("{}/mcp", server.url()),
            "at-old",
            Some("rt-old"),
            Some(unix_now() - 10),
        )
        .await;
        let out = h.refresher.check_and_refresh(rec).await.unwrap();

        assert!(!out.needs_reauth);
        assert_eq!(out.record.oauth.refresh_token(), Some("rt-new"));
        // no expires_in: non-expiring
        assert!(out.record.oauth.expires_at.is_none());
    }

    #[tokio::test]
    async fn refresh_failure_clears_everything() {
        let mut server = mockito::Server::new_async().await;
        let _discovery = mock_discovery(&mut server).await;
        let _token = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let h = harness();
        let rec = saved(
            &h,
            &format!("{}/mcp", server.url()),
            "at-old",
            Some("rt-old"),
            Some(unix_now() - 10),
        )
        .await;
        let out = h.refresher.check_and_refresh(rec).await.unwrap();

        assert!(out.needs_reauth);
        assert!(matches!(
            out.refresh_error,
            Some(toolhub_oauth::Error::Refresh(_))
        ));
        assert!(out.record.oauth.access_token().is_none());
        assert!(out.record.oauth.refresh_token().is_none());
        assert!(out.record.oauth.reauth_required);
        assert!(out.record.oauth.expires_at.is_none());
    }

    #[tokio::test]
    async fn discovery_failure_counts_as_refresh_failure() {
        let mut server = mockito::Server::new_async().await;
        let _gone = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let h = harness();
        let rec = saved(
            &h,
            &format!("{}/mcp", server.url()),
            "at-old",
            Some("rt-old"),
            Some(unix_now() - 10),
        )
        .await;
        let out = h.refresher.check_and_refresh(rec).await.unwrap();

        assert!(out.needs_reauth);
        assert!(out.refresh_error.is_some());
        assert!(out.record.oauth.refresh_token().is_none());
    }

    #[tokio::test]
    async fn bounded_refresh_persists_rotated_token() {
        let mut server = mockito::Server::new_async().await;
        let _discovery = mock_discovery(&mut server).await;
        let _token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"at-new","refresh_token":"rt-new","expires_in":3600}"#)
            .create_async()
            .await;

        let h = harness();
        let rec = saved(
            &h,
            &format!("{}/mcp", server.url()),
            "at-old",
            Some("rt-old"),
            Some(unix_now() - 10),
        )
        .await;
        let out = h
            .refresher
            .check_and_refresh_within(rec, Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!out.needs_reauth);
        let stored = h.store.get_by_id(1, out.record.id).await.unwrap().unwrap();
        assert_eq!(stored.oauth.refresh_token(), Some("rt-new"));
    }

    #[tokio::test]
    async fn timed_out_refresh_leaves_record_as_stored() {
        // Accepts connections but never answers.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let h = harness();
        let rec = saved(
            &h,
            &format!("http://{addr}/mcp"),
            "at-old",
            Some("rt-old"),
            Some(unix_now() - 10),
        )
        .await;
        let id = rec.id;
        let err = h
            .refresher
            .check_and_refresh_within(rec, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RefreshTimedOut { ref server } if server == "docs"));
        let stored = h.store.get_by_id(1, id).await.unwrap().unwrap();
        assert_eq!(stored.oauth.access_token(), Some("at-old"));
        assert_eq!(stored.oauth.refresh_token(), Some("rt-old"));
        assert!(!stored.oauth.reauth_required);
    }
}
