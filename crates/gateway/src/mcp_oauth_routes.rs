use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, Uri, header},
    response::{Html, IntoResponse},
    routing::{get, post},
};

use {
    axum_extra::extract::{
        CookieJar,
        cookie::{Cookie, SameSite},
    },
    time::OffsetDateTime,
};

use crate::{
    error::ApiError,
    mcp_oauth::{AttemptCookies, CallbackQuery, StartRequest, StartResponse, success_page},
    owner::OwnerId,
    server::AppState,
};

pub const STATE_COOKIE: &str = "oauth_state";
pub const PKCE_COOKIE: &str = "oauth_pkce";
pub const CLIENT_COOKIE: &str = "oauth_client";

/// Lifetime of an authorization attempt.
pub const ATTEMPT_TTL: time::Duration = time::Duration::minutes(10);

/// Build the `/oauth/*` router.
pub fn mcp_oauth_router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/oauth/start", post(start_handler))
        .route("/oauth/callback", get(callback_handler))
}

// ── Start ────────────────────────────────────────────────────────────────────

async fn start_handler(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    headers: HeaderMap,
    uri: Uri,
    jar: CookieJar,
    Json(body): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.gateway.oauth.start(owner, body).await?;
    let secure = is_secure_request(&headers, &uri, state.gateway.behind_proxy);

    let mut jar = jar
        .add(attempt_cookie(STATE_COOKIE, outcome.attempt.encode(), secure))
        .add(attempt_cookie(PKCE_COOKIE, outcome.verifier, secure));
    jar = match outcome.registered_client_id {
        Some(client_id) => jar.add(attempt_cookie(CLIENT_COOKIE, client_id, secure)),
        None => jar.remove(Cookie::build(CLIENT_COOKIE).path("/")),
    };

    Ok((
        jar,
        Json(StartResponse {
            redirect_url: outcome.redirect_url,
        }),
    ))
}

// ── Callback ─────────────────────────────────────────────────────────────────

async fn callback_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let cookies = AttemptCookies {
        state: jar.get(STATE_COOKIE).map(|c| c.value().to_string()),
        pkce: jar.get(PKCE_COOKIE).map(|c| c.value().to_string()),
        client: jar.get(CLIENT_COOKIE).map(|c| c.value().to_string()),
    };
    let outcome = state.gateway.oauth.callback(query, cookies).await?;

    let jar = jar
        .remove(Cookie::build(STATE_COOKIE).path("/"))
        .remove(Cookie::build(PKCE_COOKIE).path("/"))
        .remove(Cookie::build(CLIENT_COOKIE).path("/"));

    Ok((
        jar,
        [(header::CACHE_CONTROL, "no-store")],
        Html(success_page(&outcome)),
    ))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn attempt_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(Some(SameSite::Lax));
    cookie.set_secure(secure);
    cookie.set_max_age(ATTEMPT_TTL);
    cookie.set_expires(OffsetDateTime::now_utc() + ATTEMPT_TTL);
    cookie
}

/// Whether the inbound request reached us over TLS. `X-Forwarded-Proto` is
/// only honored behind a trusted proxy.
pub fn is_secure_request(headers: &HeaderMap, uri: &Uri, behind_proxy: bool) -> bool {
    if uri.scheme_str() == Some("https") {
        return true;
    }
    behind_proxy
        && headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}
