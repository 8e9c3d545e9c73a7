//! Failure classification for console responses
//!
//! The backend answers HTTP 200 for every handled request and reports the
//! business outcome in the envelope `code`. Classification looks at that code
//! first and only falls back to the transport result when no envelope came back.

use transport::{Envelope, TransportError};

use crate::constants::{CODE_FORBIDDEN_SESSION, CODE_REFRESH_EXPIRED, CODE_UNAUTHORIZED};
use crate::request::RequestDescriptor;
use crate::token::{CallRole, Endpoints};

/// What the pipeline should do with a response.
///
/// - Success: return the envelope to the caller
/// - SessionExpired: refresh once, then replay
/// - SessionInvalid: tear the session down and reject
/// - ApplicationError / TransportError: reject, no session effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    SessionExpired,
    SessionInvalid,
    ApplicationError,
    TransportError,
}

impl Classification {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::SessionExpired => "session_expired",
            Classification::SessionInvalid => "session_invalid",
            Classification::ApplicationError => "application_error",
            Classification::TransportError => "transport_error",
        }
    }
}

/// Classify the outcome of sending `request`.
pub fn classify(
    request: &RequestDescriptor,
    response: &Result<Envelope, TransportError>,
    endpoints: &Endpoints,
) -> Classification {
    match response {
        Ok(envelope) => classify_code(
            envelope.code,
            request.attempt,
            endpoints.role_of(&request.path),
        ),
        Err(_) => Classification::TransportError,
    }
}

/// Classify an application status for a call with the given role and attempt.
///
/// A 401 on the logout call means the session is already gone; it is surfaced
/// as an application error so logout never loops back into refresh or logout.
pub fn classify_code(code: i64, attempt: u32, role: CallRole) -> Classification {
    match code {
        transport::CODE_OK => Classification::Success,
        CODE_UNAUTHORIZED => match role {
            CallRole::Logout => Classification::ApplicationError,
            CallRole::Refresh => Classification::SessionInvalid,
            CallRole::Regular if attempt > 0 => Classification::SessionInvalid,
            CallRole::Regular => Classification::SessionExpired,
        },
        CODE_REFRESH_EXPIRED | CODE_FORBIDDEN_SESSION => Classification::SessionInvalid,
        _ => Classification::ApplicationError,
    }
}
