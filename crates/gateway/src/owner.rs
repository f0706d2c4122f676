use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::{error::ApiError, state::GatewayState};

/// Identity placed in request extensions by an upstream authentication
/// layer. End-user login itself lives outside this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedOwner(pub i64);

/// Axum extractor for the owner on whose behalf a request acts.
///
/// Uses the upstream identity when present. With auth disabled, falls back
/// to the configured default owner; otherwise rejects with 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerId(pub i64);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
    Arc<GatewayState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(AuthenticatedOwner(id)) = parts.extensions.get::<AuthenticatedOwner>().copied()
        {
            return Ok(OwnerId(id));
        }

        let gw = Arc::<GatewayState>::from_ref(state);
        if !gw.auth_enabled {
            return Ok(OwnerId(gw.default_owner));
        }

        Err(ApiError::unauthorized())
    }
}
