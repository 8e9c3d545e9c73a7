//! Error types surfaced to callers of the session pipeline

/// How a dispatched request failed.
///
/// `SessionExpired` only reaches a caller when the refresh that should have
/// recovered it failed; a successful refresh absorbs it entirely.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("application error {code}: {message}")]
    Application {
        code: i64,
        message: String,
        data: serde_json::Value,
    },

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("session invalid: {0}")]
    SessionInvalid(String),

    #[error("credential error: {0}")]
    Credential(String),
}

impl Error {
    /// Whether this error ended (or failed to recover) the session.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Error::SessionExpired(_) | Error::SessionInvalid(_))
    }
}

impl From<console_auth::Error> for Error {
    fn from(e: console_auth::Error) -> Self {
        Error::Credential(e.to_string())
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
