use {
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
    url::Url,
};

use crate::{
    Error, Result,
    error::Context,
    pkce::{generate_pkce, generate_state},
    types::{OAuthConfig, OAuthTokens, PkceChallenge, unix_now},
};

/// Manages the OAuth 2.0 authorization code flow with PKCE.
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

/// Result of starting the OAuth flow.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: String,
    pub pkce: PkceChallenge,
    pub state: String,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Use a shared client (carries the configured timeout).
    pub fn with_client(config: OAuthConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL and generate PKCE + state.
    pub fn start(&self) -> Result<AuthorizationRequest> {
        self.start_with(generate_pkce(), generate_state())
    }

    /// Build the authorization URL for a caller-supplied PKCE pair and state.
    pub fn start_with(&self, pkce: PkceChallenge, state: String) -> Result<AuthorizationRequest> {
        let mut url = Url::parse(&self.config.auth_url).map_err(|source| {
            Error::external(
                format!("invalid authorization endpoint {}", self.config.auth_url),
                source,
            )
        })?;

        {
            let mut q = url.query_pairs_mut();
            q.append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri);
            if !self.config.scopes.is_empty() {
                q.append_pair("scope", &self.config.scopes.join(" "));
            }
            q.append_pair("state", &state)
                .append_pair("access_type", "offline");
            if let Some(resource) = &self.config.resource {
                q.append_pair("resource", resource);
            }
            q.append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256");
        }

        Ok(AuthorizationRequest {
            url: url.to_string(),
            pkce,
            state,
        })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<OAuthTokens> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("client_id", self.config.client_id.clone()),
            ("code_verifier", verifier.to_string()),
        ];
        self.push_common(&mut form);

        debug!(token_url = %self.config.token_url, "exchanging authorization code");
        let body = self.post_token(&form).await.map_err(Error::Exchange)?;
        parse_token_response(&body).map_err(|e| Error::Exchange(e.to_string()))
    }

    /// Refresh an access token using a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        self.push_common(&mut form);

        debug!(token_url = %self.config.token_url, "refreshing access token");
        let body = self.post_token(&form).await.map_err(Error::Refresh)?;
        parse_token_response(&body).map_err(|e| Error::Refresh(e.to_string()))
    }

    fn push_common(&self, form: &mut Vec<(&'static str, String)>) {
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.expose_secret().clone()));
        }
        if let Some(resource) = &self.config.resource {
            form.push(("resource", resource.clone()));
        }
    }

    /// POST a form to the token endpoint, returning the JSON body or a
    /// description of the failure.
    async fn post_token(
        &self,
        form: &[(&'static str, String)],
    ) -> std::result::Result<serde_json::Value, String> {
        let resp = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {body}"));
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| format!("invalid token response: {e}"))
    }
}

/// Parse a token endpoint JSON body. `expires_in` is turned into an absolute
/// Unix timestamp; its absence leaves `expires_at` unset.
pub fn parse_token_response(resp: &serde_json::Value) -> Result<OAuthTokens> {
    let access_token = resp["access_token"]
        .as_str()
        .filter(|s| !s.is_empty())
        .context("missing access_token in response")?
        .to_string();

    let refresh_token = resp["refresh_token"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| Secret::new(s.to_string()));

    let expires_at = resp["expires_in"]
        .as_u64()
        .or_else(|| resp["expires_in"].as_str().and_then(|s| s.parse().ok()))
        .map(|secs| unix_now() + secs);

    Ok(OAuthTokens {
        access_token: Secret::new(access_token),
        refresh_token,
        expires_at,
    })
}
