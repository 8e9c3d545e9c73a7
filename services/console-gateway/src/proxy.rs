//! Request forwarding through the session pipeline
//!
//! Turns an inbound HTTP request into a `RequestDescriptor`, sends it through
//! the `RequestDispatcher`, and maps the outcome back to HTTP. The gateway owns
//! the session: inbound `Authorization` and `Cookie` headers are dropped, the
//! pipeline attaches the access credential and the client's cookie jar
//! carries the refresh cookie.
//!
//! Response mapping:
//! - success and application errors → 200 with the backend envelope
//! - session expired or invalid → 401
//! - transport failure → 502

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use console_auth::RequestDescriptor;
use console_session::{Error, RequestDispatcher};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, instrument, warn};
use transport::Envelope;

/// Largest request body accepted for forwarding.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers never forwarded: hop-by-hop (RFC 2616 Section 13.5.1) plus the
/// ones the gateway owns or the client recomputes.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "authorization",
    "cookie",
];

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub dispatcher: Arc<RequestDispatcher>,
}

/// JSON error response: {"error":{"type":"gateway_error","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "gateway_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn envelope_response(envelope: &Envelope) -> Response {
    (StatusCode::OK, axum::Json(envelope)).into_response()
}

/// Map a pipeline outcome to an HTTP response.
pub fn outcome_response(outcome: Result<Envelope, Error>, request_id: &str) -> Response {
    match outcome {
        Ok(envelope) => envelope_response(&envelope),
        Err(Error::Application {
            code,
            message,
            data,
        }) => envelope_response(&Envelope {
            code,
            message: Some(message),
            data,
        }),
        Err(e @ Error::SessionExpired(_)) => {
            crate::metrics::record_session_failure("expired");
            error_response(StatusCode::UNAUTHORIZED, &e.to_string(), request_id)
        }
        Err(e @ Error::SessionInvalid(_)) => {
            crate::metrics::record_session_failure("invalid");
            error_response(StatusCode::UNAUTHORIZED, &e.to_string(), request_id)
        }
        Err(e @ Error::Transport(_)) => {
            error_response(StatusCode::BAD_GATEWAY, &e.to_string(), request_id)
        }
        Err(e @ Error::Credential(_)) => {
            error!(error = %e, "credential handling failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), request_id)
        }
    }
}

/// Forward an inbound request to the console backend.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();

    let mut response = match build_descriptor(request).await {
        Ok(descriptor) => {
            let outcome = state.dispatcher.send(descriptor).await;
            outcome_response(outcome, &request_id)
        }
        Err(message) => {
            warn!(error = %message, "rejecting malformed request");
            error_response(StatusCode::BAD_REQUEST, &message, &request_id)
        }
    };

    if let Ok(value) = header::HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    crate::metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn build_descriptor(
    request: axum::http::Request<axum::body::Body>,
) -> Result<RequestDescriptor, String> {
    let (parts, body) = request.into_parts();

    let Query(query) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map_err(|e| format!("invalid query string: {e}"))?;

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| format!("invalid request body: {e}"))?;
    let body = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<serde_json::Value>(&body)
                .map_err(|e| format!("request body must be JSON: {e}"))?,
        )
    };

    let mut descriptor = RequestDescriptor::new(parts.method, parts.uri.path());
    descriptor.query = query;
    descriptor.headers = forwarded_headers(&parts.headers);
    descriptor.body = body;
    Ok(descriptor)
}

fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if !is_stripped(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Check if a header must not be forwarded
pub fn is_stripped(name: &str) -> bool {
    STRIPPED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
