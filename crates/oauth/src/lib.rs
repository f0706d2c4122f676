//! OAuth 2.1 building blocks for remote MCP servers: metadata discovery,
//! dynamic client registration, PKCE, and the token endpoint client.

pub mod discovery;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod types;

pub use {
    discovery::{
        AuthorizationServerMetadata, ClientRegistrationResponse, ProtectedResourceMetadata,
        as_metadata_candidates, fetch_as_metadata, fetch_resource_metadata, register_client,
        resource_metadata_url,
    },
    flow::{AuthorizationRequest, OAuthFlow, parse_token_response},
    types::{
        OAuthConfig, OAuthTokens, PkceChallenge, serialize_option_secret, serialize_secret,
        unix_now,
    },
};

pub use error::{Error, Result};
