//! Service-specific error types

use thiserror::Error;

/// Gateway startup errors.
///
/// Per-request failures are turned into HTTP responses by the proxy handler
/// and never propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("credential store unavailable: {0}")]
    CredentialStore(String),

    #[error("upstream transport unavailable: {0}")]
    Transport(String),

    #[error("login failed: {0}")]
    Login(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
