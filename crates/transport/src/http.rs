//! reqwest-backed transport
//!
//! Resolves request paths against the console base URL, applies static header
//! injections, and decodes the response envelope. The client keeps a cookie
//! jar: the console issues its refresh credential as an HTTP-only cookie on
//! login, and the refresh endpoint reads it back from that cookie.

use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::{
    Envelope, HeaderInjection, OutboundRequest, ResponseFuture, Result, Transport, TransportError,
    inject_headers,
};

/// Default request timeout, matching the console's browser client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport that talks to the console backend over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    headers: Vec<HeaderInjection>,
}

impl HttpTransport {
    /// Build a transport with its own cookie-enabled client.
    pub fn new(base_url: &str, timeout: Duration, headers: Vec<HeaderInjection>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Network(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, timeout, headers))
    }

    /// Build a transport around an existing client.
    ///
    /// The client must have a cookie store enabled if the backend keeps the
    /// refresh credential in a cookie.
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
        headers: Vec<HeaderInjection>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            headers,
        }
    }

    fn resolve(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let joined = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        let mut url = Url::parse(&joined)
            .map_err(|e| TransportError::Network(format!("invalid request URL {joined}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: OutboundRequest) -> ResponseFuture {
        let url = match self.resolve(&request.path, &request.query) {
            Ok(url) => url,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let mut headers = request.headers;
        inject_headers(&mut headers, &self.headers);

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let method = request.method;
        let path = request.path;
        // reqwest only connects once polled
        Box::pin(async move {
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Network(format!("reading response body: {e}")))?;
            debug!(%method, path = %path, status = status.as_u16(), bytes = body.len(), "response received");

            if !status.is_success() {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    message: error_message(&body)
                        .unwrap_or_else(|| format!("request failed: {status}")),
                });
            }

            serde_json::from_slice::<Envelope>(&body)
                .map_err(|e| TransportError::Decode(e.to_string()))
        })
    }
}

/// Pull a `message` field out of a non-2xx JSON body, if there is one.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
