//! Token data and session endpoints
//!
//! Login and refresh both answer with the same token payload inside the
//! envelope's `data`. Only the access fields are kept: the refresh credential
//! is managed server-side as an HTTP-only cookie, so any refresh fields the
//! backend echoes are ignored.

use serde::{Deserialize, Deserializer, Serialize};
use transport::Envelope;

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{Error, Result};
use crate::request::RequestDescriptor;

/// Token payload from the login and refresh endpoints.
///
/// `access_token_expire_time` is an absolute unix timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
    #[serde(default, deserialize_with = "millis_from_number_or_string")]
    pub access_token_expire_time: Option<u64>,
}

impl TokenData {
    /// Extract token data from a successful envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let token: TokenData = serde_json::from_value(envelope.data.clone())
            .map_err(|e| Error::InvalidTokenData(format!("decoding token payload: {e}")))?;
        if token.access_token.is_empty() {
            return Err(Error::InvalidTokenData("empty access token".into()));
        }
        Ok(token)
    }
}

/// The backend serializes 64-bit longs as strings in some deployments.
fn millis_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(u64),
        Text(String),
    }

    match Option::<Millis>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Millis::Number(n)) => Ok(Some(n)),
        Some(Millis::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Role of a call with respect to the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Regular,
    Refresh,
    Logout,
}

/// Paths of the session endpoints on the console backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: LOGIN_PATH.to_string(),
            refresh: REFRESH_PATH.to_string(),
            logout: LOGOUT_PATH.to_string(),
        }
    }
}

impl Endpoints {
    pub fn role_of(&self, path: &str) -> CallRole {
        if same_path(path, &self.refresh) {
            CallRole::Refresh
        } else if same_path(path, &self.logout) {
            CallRole::Logout
        } else {
            CallRole::Regular
        }
    }

    pub fn login_request(&self, body: serde_json::Value) -> RequestDescriptor {
        RequestDescriptor::post(self.login.clone()).with_body(body)
    }

    /// Refresh call; no body, the refresh cookie rides along.
    pub fn refresh_request(&self) -> RequestDescriptor {
        RequestDescriptor::post(self.refresh.clone())
    }

    pub fn logout_request(&self) -> RequestDescriptor {
        RequestDescriptor::post(self.logout.clone())
    }
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}
