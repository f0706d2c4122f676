use toolhub_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    OAuth(#[from] toolhub_oauth::Error),
    /// The record store rejected a read or write.
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// The live tool registry rejected a server.
    #[error("registration of '{server}' failed: {message}")]
    Registrar { server: String, message: String },
    /// A bounded token refresh did not finish in time. Nothing was changed.
    #[error("token refresh for '{server}' timed out")]
    RefreshTimedOut { server: String },
}

impl Error {
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::OAuth(toolhub_oauth::Error::invalid_input(message))
    }
}

/// Context messages in this crate describe store I/O.
impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Persistence(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

toolhub_common::impl_context!();
