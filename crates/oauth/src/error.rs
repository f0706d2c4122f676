use std::error::Error as StdError;

use toolhub_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing caller input (URL, code, state, credentials).
    #[error("{0}")]
    InvalidInput(String),
    /// No well-known metadata could be fetched. `url` is the last attempt.
    #[error("metadata discovery failed at {url}: {message}")]
    Discovery { url: String, message: String },
    #[error("dynamic client registration failed: {0}")]
    Registration(String),
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    /// Malformed response body from an endpoint.
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    #[must_use]
    pub fn discovery(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            url: url.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

toolhub_common::impl_context!();
