//! Request descriptors
//!
//! A `RequestDescriptor` is the caller's description of one logical call plus
//! its retry counter. The counter replaces a mutable "already retried" flag:
//! every replay after a refresh is a new descriptor with `attempt + 1`, and the
//! classifier refuses to refresh a second time for the same logical call.

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::warn;
use transport::OutboundRequest;

/// One logical call to the console backend.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// 0 for the first send, incremented on each refresh-triggered replay.
    pub attempt: u32,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            attempt: 0,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Whether this call has already been replayed after a refresh.
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }

    /// The descriptor to send when replaying this call after a refresh.
    pub fn retried(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }

    /// Build the outbound request, attaching `Authorization: <token>` when a
    /// token is present. Without a token the call goes out unauthenticated.
    pub fn to_outbound(&self, access_token: Option<&str>) -> OutboundRequest {
        let mut headers = self.headers.clone();
        if let Some(token) = access_token {
            match HeaderValue::from_str(token) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(e) => {
                    warn!(path = %self.path, error = %e, "access token is not a valid header value, sending without it");
                }
            }
        }
        OutboundRequest {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            headers,
            body: self.body.clone(),
        }
    }
}
