//! Console session constants
//!
//! Endpoint paths and application status codes of the console backend. Paths
//! are relative to the backend base URL and can be overridden in config.

use std::time::Duration;

/// Login endpoint (username/password/captcha body, returns token data)
pub const LOGIN_PATH: &str = "/auth/login";

/// Refresh endpoint. Takes no body: the refresh credential travels as an
/// HTTP-only cookie set by the login response.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Logout endpoint. Clears the refresh cookie server-side.
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Access credential expired; recoverable once through a refresh.
pub const CODE_UNAUTHORIZED: i64 = 401;

/// Refresh credential expired; the session cannot be recovered.
pub const CODE_REFRESH_EXPIRED: i64 = 402;

/// Session forbidden (kicked out, permissions revoked); not recoverable.
pub const CODE_FORBIDDEN_SESSION: i64 = 405;

/// The access credential is treated as expired this long before its
/// recorded expiry, so a request never races the exact expiry instant.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Default look-ahead for `is_access_expiring_soon`.
pub const DEFAULT_EXPIRING_SOON_MINUTES: u64 = 5;
