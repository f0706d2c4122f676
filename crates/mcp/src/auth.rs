//! Client credential resolution for remote MCP servers.
//!
//! Order: credentials stored on the record, then the process-wide fallback
//! pair, then RFC 7591 dynamic registration when the authorization server
//! advertises an endpoint for it.

use std::sync::Arc;

use {
    secrecy::{ExposeSecret, Secret},
    toolhub_oauth::{
        AuthorizationServerMetadata, OAuthConfig, ProtectedResourceMetadata, register_client,
    },
    tracing::{debug, info},
};

use crate::{
    error::{Error, Result},
    registry::McpServerRecord,
    store::ServerRecordStore,
};

/// Process-wide client pair used when a record carries none.
#[derive(Clone)]
pub struct FallbackClient {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
}

impl std::fmt::Debug for FallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackClient")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Outcome of credential resolution.
#[derive(Clone)]
pub struct ResolvedClient {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub scopes: Vec<String>,
    /// Credentials came from a dynamic registration performed just now.
    pub registered: bool,
}

impl std::fmt::Debug for ResolvedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedClient")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scopes", &self.scopes)
            .field("registered", &self.registered)
            .finish()
    }
}

impl ResolvedClient {
    /// Token endpoint client config for `resource` at the given server.
    pub fn into_oauth_config(
        self,
        as_meta: &AuthorizationServerMetadata,
        redirect_uri: &str,
        resource: &str,
    ) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id,
            client_secret: self.client_secret,
            auth_url: as_meta.authorization_endpoint.clone(),
            token_url: as_meta.token_endpoint.clone(),
            redirect_uri: redirect_uri.to_string(),
            resource: Some(resource.to_string()),
            scopes: self.scopes,
        }
    }
}

/// Resolves the OAuth client to use for a server.
pub struct CredentialResolver {
    http: reqwest::Client,
    store: Arc<dyn ServerRecordStore>,
    fallback: Option<FallbackClient>,
    client_name: String,
    default_scopes: Vec<String>,
    redirect_uri: String,
}

impl CredentialResolver {
    pub fn new(
        http: reqwest::Client,
        store: Arc<dyn ServerRecordStore>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            http,
            store,
            fallback: None,
            client_name: "toolhub".into(),
            default_scopes: vec!["openid".into(), "profile".into()],
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Set the fallback pair. A blank id disables it.
    pub fn with_fallback(
        mut self,
        client_id: Option<String>,
        secret: Option<Secret<String>>,
    ) -> Self {
        self.fallback = client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(|client_id| FallbackClient {
                client_id,
                client_secret: secret.filter(|s| !s.expose_secret().trim().is_empty()),
            });
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Callback URL registered with, and sent to, the authorization server.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Full resolution, registering a client if nothing else is available.
    ///
    /// Registered credentials are written onto `server` and persisted at once,
    /// so the next attempt for the same record short-circuits.
    pub async fn resolve(
        &self,
        owner: i64,
        server: Option<&mut McpServerRecord>,
        as_meta: &AuthorizationServerMetadata,
        resource_meta: &ProtectedResourceMetadata,
    ) -> Result<ResolvedClient> {
        let scopes = self.scopes_for(server.as_deref(), resource_meta);

        if let Some(found) = self.existing(server.as_deref(), scopes.clone()) {
            return Ok(found);
        }

        let Some(endpoint) = as_meta
            .registration_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
        else {
            return Err(no_client_error());
        };

        let client_name = server
            .as_deref()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| self.client_name.clone());
        let reg = register_client(
            &self.http,
            endpoint,
            &self.redirect_uri,
            &client_name,
            &resource_meta.scopes_supported,
        )
        .await?;

        let client_secret = reg
            .client_secret
            .filter(|s| !s.trim().is_empty())
            .map(Secret::new);

        if let Some(server) = server {
            server.oauth.client_id = Some(reg.client_id.clone());
            server.oauth.client_secret = client_secret.clone();
            let saved = self.store.upsert(owner, server.clone()).await?;
            info!(server = %saved.name, id = saved.id, "persisted registered OAuth client");
            *server = saved;
        } else {
            debug!(client_id = %reg.client_id, "registered OAuth client for unsaved server");
        }

        Ok(ResolvedClient {
            client_id: reg.client_id,
            client_secret,
            scopes,
            registered: true,
        })
    }

    /// Resolution without dynamic registration.
    ///
    /// `registered_client_id` is a public client id obtained by an earlier
    /// registration that had no record to write back to.
    pub fn resolve_without_registration(
        &self,
        server: Option<&McpServerRecord>,
        resource_meta: &ProtectedResourceMetadata,
        registered_client_id: Option<&str>,
    ) -> Result<ResolvedClient> {
        let scopes = self.scopes_for(server, resource_meta);
        if let Some(found) = self.existing(server, scopes.clone()) {
            return Ok(found);
        }
        registered_client_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| ResolvedClient {
                client_id: id.to_string(),
                client_secret: None,
                scopes,
                registered: false,
            })
            .ok_or_else(no_client_error)
    }

    fn existing(
        &self,
        server: Option<&McpServerRecord>,
        scopes: Vec<String>,
    ) -> Option<ResolvedClient> {
        if let Some(id) = server.and_then(|s| s.oauth.client_id()) {
            return Some(ResolvedClient {
                client_id: id.to_string(),
                client_secret: server
                    .and_then(|s| s.oauth.client_secret())
                    .map(|s| Secret::new(s.to_string())),
                scopes,
                registered: false,
            });
        }
        self.fallback.as_ref().map(|f| ResolvedClient {
            client_id: f.client_id.clone(),
            client_secret: f.client_secret.clone(),
            scopes,
            registered: false,
        })
    }

    /// Record scopes, else resource-advertised scopes, else defaults.
    fn scopes_for(
        &self,
        server: Option<&McpServerRecord>,
        resource_meta: &ProtectedResourceMetadata,
    ) -> Vec<String> {
        if let Some(s) = server.filter(|s| !s.oauth.scopes.is_empty()) {
            return s.oauth.scopes.clone();
        }
        if !resource_meta.scopes_supported.is_empty() {
            return resource_meta.scopes_supported.clone();
        }
        self.default_scopes.clone()
    }
}

fn no_client_error() -> Error {
    Error::invalid_input("mcp oauth client id not configured for this server")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::store::MemoryServerStore};

    const REDIRECT: &str = "https://hub.example.com/oauth/callback";

    fn as_meta(registration_endpoint: Option<String>) -> AuthorizationServerMetadata {
        AuthorizationServerMetadata {
            issuer: "https://auth.example.com".into(),
            authorization_endpoint: "https://auth.example.com/authorize".into(),
            token_endpoint: "https://auth.example.com/token".into(),
            registration_endpoint,
            scopes_supported: vec![],
            code_challenge_methods_supported: vec![],
        }
    }

    fn resolver(store: Arc<dyn ServerRecordStore>) -> CredentialResolver {
        CredentialResolver::new(reqwest::Client::new(), store, REDIRECT)
    }

    #[tokio::test]
    async fn stored_credentials_win() {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let r = resolver(Arc::clone(&store)).with_fallback(Some("env-id".into()), None);
        let mut rec = McpServerRecord {
            name: "docs".into(),
            ..Default::default()
        };
        rec.oauth.client_id = Some(" stored-id ".into());
        rec.oauth.client_secret = Some(Secret::new("stored-secret".into()));

        let got = r
            .resolve(1, Some(&mut rec), &as_meta(None), &ProtectedResourceMetadata::default())
            .await
            .unwrap();
        assert_eq!(got.client_id, "stored-id");
        assert_eq!(
            got.client_secret.map(|s| s.expose_secret().clone()).as_deref(),
            Some("stored-secret")
        );
        assert!(!got.registered);
    }

    #[tokio::test]
    async fn fallback_used_when_record_blank() {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let r = resolver(store).with_fallback(
            Some("env-id".into()),
            Some(Secret::new("env-secret".into())),
        );
        let mut rec = McpServerRecord {
            name: "docs".into(),
            ..Default::default()
        };
        rec.oauth.client_id = Some("   ".into());

        let got = r
            .resolve(1, Some(&mut rec), &as_meta(None), &ProtectedResourceMetadata::default())
            .await
            .unwrap();
        assert_eq!(got.client_id, "env-id");
        assert!(rec.oauth.client_id().is_none());
    }

    #[tokio::test]
    async fn nothing_available_is_invalid_input() {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let err = resolver(store)
            .resolve(1, None, &as_meta(None), &ProtectedResourceMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::OAuth(toolhub_oauth::Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn registration_is_written_back() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/register")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "client_name": "docs",
                "redirect_uris": [REDIRECT],
                "scope": "tools:read"
            })))
            .with_status(201)
            .with_body(r#"{"client_id":"dyn-id","client_secret":"dyn-secret"}"#)
            .expect(1)
            .create_async()
            .await;

        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let mut rec = store
            .upsert(1, McpServerRecord {
                name: "docs".into(),
                url: Some("https://tools.example.com/mcp".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let resource = ProtectedResourceMetadata {
            scopes_supported: vec!["tools:read".into()],
            ..Default::default()
        };
        let meta = as_meta(Some(format!("{}/register", server.url())));
        let r = resolver(Arc::clone(&store));

        let got = r.resolve(1, Some(&mut rec), &meta, &resource).await.unwrap();
        assert!(got.registered);
        assert_eq!(got.client_id, "dyn-id");
        assert_eq!(got.scopes, vec!["tools:read"]);

        let persisted = store.get_by_id(1, rec.id).await.unwrap().unwrap();
        assert_eq!(persisted.oauth.client_id(), Some("dyn-id"));
        assert_eq!(persisted.oauth.client_secret(), Some("dyn-secret"));

        // second attempt short-circuits to the stored pair
        let again = r.resolve(1, Some(&mut rec), &meta, &resource).await.unwrap();
        assert!(!again.registered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn registration_rejection_is_registration_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/register")
            .with_status(403)
            .create_async()
            .await;

        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let err = resolver(store)
            .resolve(
                1,
                None,
                &as_meta(Some(format!("{}/register", server.url()))),
                &ProtectedResourceMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::OAuth(toolhub_oauth::Error::Registration(_))
        ));
    }

    #[test]
    fn scopes_fall_back_to_defaults() {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let got = resolver(store)
            .with_fallback(Some("id".into()), None)
            .resolve_without_registration(None, &ProtectedResourceMetadata::default(), None)
            .unwrap();
        assert_eq!(got.scopes, vec!["openid", "profile"]);
    }

    #[test]
    fn record_scopes_beat_advertised() {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let mut rec = McpServerRecord::default();
        rec.oauth.client_id = Some("id".into());
        rec.oauth.scopes = vec!["mine".into()];
        let resource = ProtectedResourceMetadata {
            scopes_supported: vec!["theirs".into()],
            ..Default::default()
        };
        let got = resolver(store)
            .resolve_without_registration(Some(&rec), &resource, None)
            .unwrap();
        assert_eq!(got.scopes, vec!["mine"]);
    }

    #[test]
    fn registered_client_hint_is_last_resort() {
        let store: Arc<dyn ServerRecordStore> = Arc::new(MemoryServerStore::new());
        let r = resolver(store);
        let got = r
            .resolve_without_registration(None, &ProtectedResourceMetadata::default(), Some("dyn"))
            .unwrap();
        assert_eq!(got.client_id, "dyn");
        assert!(got.client_secret.is_none());

        assert!(
            r.resolve_without_registration(None, &ProtectedResourceMetadata::default(), Some(" "))
                .is_err()
        );
    }
}
