//! Transport seam between the session pipeline and the console backend
//!
//! The console backend wraps every response in an application envelope and
//! always answers HTTP 200 for handled requests; the business outcome lives in
//! the envelope's `code`. This crate owns that wire contract and the
//! `Transport` trait the pipeline sends through. `HttpTransport` is the
//! reqwest-backed implementation; tests substitute scripted transports.

pub mod http;

pub use http::HttpTransport;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use tracing::warn;

/// Application status meaning success.
pub const CODE_OK: i64 = 200;

/// Response envelope returned by every console endpoint.
///
/// ```json
/// { "code": 200, "message": "ok", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Server-supplied message, or an empty string.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// A fully prepared request, ready to hand to a `Transport`.
///
/// `path` is relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

/// Failures below the envelope layer: nothing classifiable came back.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response envelope: {0}")]
    Decode(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Future returned by `Transport::send`.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<Envelope>> + Send + 'static>>;

/// Sends prepared requests to the console backend.
///
/// Nothing is guaranteed to leave the process before the returned future is
/// first polled. Implementations may start earlier, but callers that need
/// requests to go out in a given order must poll them in that order.
///
/// Uses `Pin<Box<dyn Future>>` so the pipeline can hold an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    fn send(&self, request: OutboundRequest) -> ResponseFuture;
}

/// Static header added to every outbound request (from `[[headers]]` config).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Apply configured header injections.
///
/// Invalid names or values are skipped with a warning. `Authorization` is
/// owned by the session pipeline and is never overwritten here.
pub fn inject_headers(headers: &mut HeaderMap, injections: &[HeaderInjection]) {
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == reqwest::header::AUTHORIZATION {
            warn!(header = %injection.name, "refusing to inject authorization header");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
}
