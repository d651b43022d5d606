/// Typed error hierarchy for calls to the annotation backend.
/// Each variant maps to one way the rater is told about the failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    // Session is gone; send the rater back to login
    #[error("authentication failed: {0}")]
    Auth(String),
    // Essay, annotation or blind id missing; back to the dashboard
    #[error("not found: {0}")]
    NotFound(String),

    // Shown inline, state preserved for retry
    #[error("rejected: {0}")]
    Validation(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Where the front end should take the rater after an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    Login,
    Dashboard,
    Inline,
}

impl ServiceError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Auth(_) => Recovery::Login,
            Self::NotFound(_) => Recovery::Dashboard,
            Self::Validation(_) | Self::Network(_) | Self::Server { .. } | Self::Decode(_) => {
                Recovery::Inline
            }
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Network(_) => "network",
            Self::Server { .. } => "server",
            Self::Decode(_) => "decode",
        }
    }

    /// Classify an HTTP status code. The body's `detail` field is preferred
    /// as the message when present.
    pub fn from_status(status: u16, body: String) -> Self {
        let message = detail_message(&body).unwrap_or(body);
        match status {
            401 | 403 => Self::Auth(message),
            404 => Self::NotFound(message),
            400 | 409 | 422 => Self::Validation(message),
            _ => Self::Server { status, body: message },
        }
    }
}

/// Pull `detail` out of an error body. String details are returned as-is,
/// structured ones (validation error lists) are rendered as compact JSON.
fn detail_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
