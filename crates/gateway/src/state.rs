use std::sync::Arc;

use {
    toolhub_config::ToolhubConfig,
    toolhub_mcp::{
        CredentialResolver, McpManager, ServerLifecycle, ServerRecordStore, TokenRefresher,
        ToolServerRegistrar,
    },
};

use crate::mcp_oauth::McpOAuthService;

/// Path of the OAuth callback route, appended to the redirect base.
pub const CALLBACK_PATH: &str = "/oauth/callback";

/// Shared gateway state. Everything here is immutable after startup; the
/// mutable parts live behind the store and the live registry.
pub struct GatewayState {
    pub version: String,
    /// When false, requests without an upstream identity act as `default_owner`.
    pub auth_enabled: bool,
    pub default_owner: i64,
    /// Honor `X-Forwarded-Proto` when deciding whether a request was secure.
    pub behind_proxy: bool,
    pub store: Arc<dyn ServerRecordStore>,
    pub live: Arc<McpManager>,
    pub lifecycle: Arc<ServerLifecycle>,
    pub oauth: Arc<McpOAuthService>,
}

impl GatewayState {
    /// Wire the OAuth lifecycle from configuration.
    ///
    /// `http` is shared by discovery, registration and the token endpoint
    /// client, so its timeout applies to every outbound call.
    pub fn new(
        config: &ToolhubConfig,
        http: reqwest::Client,
        store: Arc<dyn ServerRecordStore>,
        live: Arc<McpManager>,
    ) -> Arc<Self> {
        let registrar = Arc::clone(&live) as Arc<dyn ToolServerRegistrar>;
        Self::with_registrar(config, http, store, live, registrar)
    }

    /// Like [`new`](Self::new), but sessions are registered through
    /// `registrar` instead of `live`. `live` still backs the status views.
    pub fn with_registrar(
        config: &ToolhubConfig,
        http: reqwest::Client,
        store: Arc<dyn ServerRecordStore>,
        live: Arc<McpManager>,
        registrar: Arc<dyn ToolServerRegistrar>,
    ) -> Arc<Self> {
        let redirect_uri = format!("{}{CALLBACK_PATH}", config.auth.redirect_base());
        let resolver = Arc::new(
            CredentialResolver::new(http.clone(), Arc::clone(&store), redirect_uri)
                .with_fallback(
                    config.mcp_oauth.client_id.clone(),
                    config.mcp_oauth.client_secret.clone(),
                )
                .with_client_name(config.mcp_oauth.client_name.clone())
                .with_default_scopes(config.mcp_oauth.default_scopes.clone()),
        );
        let refresher = Arc::new(TokenRefresher::new(
            http.clone(),
            Arc::clone(&store),
            Arc::clone(&resolver),
        ));
        let lifecycle = Arc::new(ServerLifecycle::new(
            refresher,
            registrar,
            Arc::clone(&store),
        ));
        let oauth = Arc::new(McpOAuthService::new(
            http,
            Arc::clone(&store),
            resolver,
            Arc::clone(&lifecycle),
        ));

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth_enabled: config.auth.enabled,
            default_owner: config.auth.default_owner,
            behind_proxy: config.server.trust_forwarded_proto,
            store,
            live,
            lifecycle,
            oauth,
        })
    }
}
