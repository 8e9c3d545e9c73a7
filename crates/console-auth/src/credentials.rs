//! Access credential storage
//!
//! Holds the current access token and its expiry. The refresh credential never
//! reaches this process: the backend keeps it in an HTTP-only cookie, so the
//! only client-visible sign that it went bad is the refresh endpoint rejecting.
//!
//! Reads and writes are synchronous and immediately visible to later reads.
//! A store can optionally write through to a JSON snapshot file so a gateway
//! restart keeps the session; writes use temp-file + rename with 0600 perms.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::EXPIRY_SAFETY_MARGIN;
use crate::error::{Error, Result};
use crate::token::TokenData;

/// The client-visible half of a session.
///
/// `access_expires_at` is a unix timestamp in milliseconds.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub access_expires_at: Option<u64>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("access_expires_at", &self.access_expires_at)
            .finish()
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Credential holder shared by the dispatcher, the refresh coordinator and
/// the logout teardown.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: RwLock<Option<Credential>>,
}

impl CredentialStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(None),
        }
    }

    /// A store backed by a snapshot file.
    ///
    /// A missing file means "not logged in"; it is created on the first
    /// `set_credential`.
    pub fn persistent(path: PathBuf) -> Result<Self> {
        let credential = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credential: Option<Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), logged_in = credential.is_some(), "loaded session credential");
            credential
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            None
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(credential),
        })
    }

    /// Store a freshly issued access credential.
    ///
    /// The in-memory value is updated before persisting, so a failed write
    /// still leaves the new token usable for this process.
    pub fn set_credential(&self, token: &TokenData) -> Result<()> {
        let credential = Credential {
            access_token: token.access_token.clone(),
            access_expires_at: token.access_token_expire_time,
        };
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *state = Some(credential.clone());
        }
        debug!(expires_at = ?credential.access_expires_at, "stored access credential");
        match &self.path {
            Some(path) => write_atomic(path, &Some(credential)),
            None => Ok(()),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().map(|c| c.access_token)
    }

    /// Always `None`: the refresh credential is held server-side.
    pub fn refresh_token(&self) -> Option<String> {
        None
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.read().and_then(|c| c.access_expires_at)
    }

    pub fn snapshot(&self) -> Option<Credential> {
        self.read()
    }

    /// True when no expiry is recorded, or within the safety margin of it.
    pub fn is_access_expired(&self) -> bool {
        self.is_access_expired_at(now_millis())
    }

    pub fn is_access_expired_at(&self, now_millis: u64) -> bool {
        match self.expires_at() {
            Some(expires) => {
                now_millis >= expires.saturating_sub(EXPIRY_SAFETY_MARGIN.as_millis() as u64)
            }
            None => true,
        }
    }

    /// True when no expiry is recorded, or it falls within `threshold_minutes`.
    pub fn is_access_expiring_soon(&self, threshold_minutes: u64) -> bool {
        self.is_access_expiring_soon_at(threshold_minutes, now_millis())
    }

    pub fn is_access_expiring_soon_at(&self, threshold_minutes: u64, now_millis: u64) -> bool {
        match self.expires_at() {
            Some(expires) => {
                let threshold_millis = threshold_minutes.saturating_mul(60_000);
                now_millis >= expires.saturating_sub(threshold_millis)
            }
            None => true,
        }
    }

    /// Whether a session exists. Only the presence of an access token is
    /// checked: an expired token is still recoverable through the refresh
    /// cookie, and recovery belongs to the dispatcher.
    pub fn is_logged_in(&self) -> bool {
        self.read().is_some()
    }

    /// Forget the credential.
    ///
    /// Memory is cleared before touching the snapshot file, so local logout
    /// completes even if the file cannot be removed.
    pub fn clear(&self) -> Result<()> {
        let had_credential = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.take().is_some()
        };
        debug!(had_credential, "cleared access credential");
        match &self.path {
            Some(path) if path.exists() => std::fs::remove_file(path)
                .map_err(|e| Error::Io(format!("removing credential file: {e}"))),
            _ => Ok(()),
        }
    }

    fn read(&self) -> Option<Credential> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Write the snapshot atomically with owner-only permissions.
fn write_atomic(path: &Path, credential: &Option<Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}
