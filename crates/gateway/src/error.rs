use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// HTTP-facing error: a status code plus a message rendered as
/// `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "not authenticated")
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

fn oauth_status(err: &toolhub_oauth::Error) -> StatusCode {
    use toolhub_oauth::Error as E;
    match err {
        E::InvalidInput(_) | E::UrlParse(_) => StatusCode::BAD_REQUEST,
        E::Discovery { .. } | E::Registration(_) => StatusCode::BAD_GATEWAY,
        E::Exchange(_) | E::Refresh(_) | E::Message { .. } | E::External { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}

impl From<toolhub_oauth::Error> for ApiError {
    fn from(err: toolhub_oauth::Error) -> Self {
        Self::new(oauth_status(&err), err.to_string())
    }
}

impl From<toolhub_mcp::Error> for ApiError {
    fn from(err: toolhub_mcp::Error) -> Self {
        let status = match &err {
            toolhub_mcp::Error::OAuth(inner) => oauth_status(inner),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), error = %self.message, "request rejected");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
