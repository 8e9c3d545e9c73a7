//! Error types for credential handling

/// Errors from credential storage and token parsing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid token data: {0}")]
    InvalidTokenData(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
