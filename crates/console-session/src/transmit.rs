//! Single send: attach the credential, send, classify
//!
//! `Transmitter::exchange` is the one place a request leaves the process. The
//! access token is read when `exchange` is called, but the request may not go
//! out before the returned future is first polled. Callers that need several
//! exchanges to go out in order poll them in that order; `join_all` does.

use std::future::Future;
use std::sync::Arc;

use console_auth::{Classification, CredentialStore, Endpoints, RequestDescriptor, classify};
use tracing::{debug, warn};
use transport::{Envelope, Transport};

use crate::error::Error;

/// Outcome of one exchange, before any session handling.
#[derive(Debug)]
pub(crate) enum Exchange {
    /// Final for the caller: success, application error, or transport error.
    Settled(Result<Envelope, Error>),
    /// Access credential expired; a refresh may recover this call.
    /// Carries the access token the request went out with.
    Expired { sent_with: Option<String> },
    /// The session cannot be recovered.
    Fatal(Error),
}

/// Sends requests with the current access credential attached.
pub struct Transmitter {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    endpoints: Endpoints,
}

impl Transmitter {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            transport,
            store,
            endpoints,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn exchange(
        &self,
        request: RequestDescriptor,
    ) -> impl Future<Output = Exchange> + Send + 'static {
        let token = self.store.access_token();
        let response = self.transport.send(request.to_outbound(token.as_deref()));
        let endpoints = self.endpoints.clone();

        async move {
            let response = response.await;
            let classification = classify(&request, &response, &endpoints);
            metrics::counter!("session_requests_total", "classification" => classification.label())
                .increment(1);
            settle(&request, token, classification, response)
        }
    }
}

fn settle(
    request: &RequestDescriptor,
    sent_with: Option<String>,
    classification: Classification,
    response: transport::Result<Envelope>,
) -> Exchange {
    let envelope = match response {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(method = %request.method, path = %request.path, error = %e, "request failed");
            return Exchange::Settled(Err(Error::Transport(e.to_string())));
        }
    };

    match classification {
        Classification::Success => Exchange::Settled(Ok(envelope)),
        Classification::SessionExpired => {
            debug!(path = %request.path, attempt = request.attempt, "access credential expired");
            Exchange::Expired { sent_with }
        }
        Classification::SessionInvalid => {
            let message = non_empty(envelope.message(), "session is no longer valid, please log in again");
            warn!(path = %request.path, code = envelope.code, attempt = request.attempt, server_message = message, "session invalid");
            Exchange::Fatal(Error::SessionInvalid(message.to_string()))
        }
        Classification::ApplicationError | Classification::TransportError => {
            let message = non_empty(envelope.message(), "request failed");
            warn!(path = %request.path, code = envelope.code, server_message = message, "application error");
            Exchange::Settled(Err(Error::Application {
                code: envelope.code,
                message: message.to_string(),
                data: envelope.data,
            }))
        }
    }
}

fn non_empty<'a>(message: &'a str, fallback: &'a str) -> &'a str {
    if message.is_empty() { fallback } else { message }
}
