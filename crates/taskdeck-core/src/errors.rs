use std::time::Duration;

/// Typed error hierarchy for calls to the hosted backend.
///
/// Every auth and table operation reports failures with this type, so the
/// stores can log a stable `error_kind()` and callers can tell an expired
/// session apart from a flaky network.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BackendError {
    // Auth
    #[error("invalid login credentials: {0}")]
    InvalidCredentials(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("auth session missing")]
    SessionMissing,

    // Request
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    // Server / transport
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl BackendError {
    /// True when the backend rejected who we are rather than what we asked.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials(_) | Self::Unauthorized(_) | Self::SessionMissing
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => "invalid_credentials",
            Self::Unauthorized(_) => "unauthorized",
            Self::SessionMissing => "session_missing",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::Decode(_) => "decode_error",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            400 | 422 => Self::InvalidRequest(body),
            404 => Self::NotFound(body),
            409 => Self::Conflict(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
