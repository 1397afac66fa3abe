//! Failure taxonomy for calls to the model service.
//!
//! Every gateway operation surfaces one of these. The request queue uses
//! [`ServiceError::is_retryable`] to decide between retrying and failing fast.

/// Error returned by model-service operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The service could not be reached (connection refused or reset).
    #[error("model service not reachable: {0}")]
    ConnectionRefused(String),

    #[error("model service timed out: {0}")]
    Timeout(String),

    /// The response did not have the expected JSON shape.
    #[error("invalid response format: {0}")]
    InvalidResponseFormat(String),

    /// The service answered with an explicit `error` payload.
    #[error("model service error: {0}")]
    RemoteError(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Non-success HTTP status without an error payload.
    #[error("model service returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Any other transport failure (body read, TLS, redirect...).
    #[error("request failed: {0}")]
    Transport(String),

    /// Retry budget exhausted; `last` is the final attempt's error.
    #[error("giving up after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        last: Box<ServiceError>,
    },
}

impl ServiceError {
    /// Transient failures worth another attempt. Schema and remote errors are not:
    /// retrying cannot fix malformed data or a server-side rejection.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::ConnectionRefused(_)
            | ServiceError::Timeout(_)
            | ServiceError::Transport(_) => true,
            ServiceError::Http { status, .. } => *status >= 500 || *status == 429,
            ServiceError::InvalidResponseFormat(_)
            | ServiceError::RemoteError(_)
            | ServiceError::ModelNotFound(_)
            | ServiceError::MaxRetriesExceeded { .. } => false,
        }
    }

    pub fn is_connection_refused(&self) -> bool {
        matches!(self, ServiceError::ConnectionRefused(_))
    }

    /// True when the failure means "service unreachable" rather than "service said no".
    /// The connection state machine only auto-retries these.
    pub fn is_connection_class(&self) -> bool {
        match self {
            ServiceError::ConnectionRefused(_)
            | ServiceError::Timeout(_)
            | ServiceError::Transport(_) => true,
            ServiceError::Http { status, .. } => *status >= 500,
            ServiceError::MaxRetriesExceeded { last, .. } => last.is_connection_class(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout(e.to_string())
        } else if e.is_connect() {
            ServiceError::ConnectionRefused(e.to_string())
        } else if e.is_decode() {
            ServiceError::InvalidResponseFormat(e.to_string())
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}
