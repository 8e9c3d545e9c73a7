//! Request dispatch with transparent session recovery
//!
//! `RequestDispatcher::send` is the only entry point callers need: it attaches
//! the current access credential, and on an expired credential hands the call
//! to the refresh coordinator, which resolves it with the replayed outcome.
//! Unrecoverable session failures go through the logout gate before the
//! caller sees the error.

use std::sync::Arc;
use std::time::Duration;

use console_auth::{CredentialStore, Endpoints, RequestDescriptor, TokenData};
use tracing::{info, warn};
use transport::{Envelope, Transport};

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::logout::{DEFAULT_LOGOUT_THROTTLE, LogoutGate, SessionObserver, Teardown, TeardownReason};
use crate::transmit::{Exchange, Transmitter};

/// Tunables for one session pipeline.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub endpoints: Endpoints,
    pub logout_throttle: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            logout_throttle: DEFAULT_LOGOUT_THROTTLE,
        }
    }
}

/// The authenticated request pipeline for one console session.
pub struct RequestDispatcher {
    transmitter: Arc<Transmitter>,
    coordinator: Arc<RefreshCoordinator>,
    gate: Arc<LogoutGate>,
    teardown: Arc<Teardown>,
}

impl RequestDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self::with_settings(transport, store, observer, SessionSettings::default())
    }

    pub fn with_settings(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        observer: Arc<dyn SessionObserver>,
        settings: SessionSettings,
    ) -> Self {
        let transmitter = Arc::new(Transmitter::new(transport, store, settings.endpoints));
        let teardown = Arc::new(Teardown::new(transmitter.clone(), observer));
        let gate = Arc::new(LogoutGate::new(teardown.clone(), settings.logout_throttle));
        let coordinator = Arc::new(RefreshCoordinator::new(transmitter.clone(), gate.clone()));
        Self {
            transmitter,
            coordinator,
            gate,
            teardown,
        }
    }

    /// Send one request and resolve with its final outcome.
    ///
    /// An expired access credential is recovered at most once per call; the
    /// caller only sees `SessionExpired` when that recovery failed.
    pub async fn send(&self, request: RequestDescriptor) -> Result<Envelope> {
        match self.transmitter.exchange(request.clone()).await {
            Exchange::Settled(result) => result,
            Exchange::Expired { sent_with } => {
                self.coordinator
                    .handle_recoverable_failure(request, sent_with)
                    .await
            }
            Exchange::Fatal(e) => {
                self.gate.trigger().await;
                Err(e)
            }
        }
    }

    /// Log in with the given credentials body and store the issued token.
    ///
    /// The body is passed through as-is (username, password, captcha fields
    /// are the backend's business).
    pub async fn login(&self, body: serde_json::Value) -> Result<()> {
        let request = self.transmitter.endpoints().login_request(body);
        let envelope = match self.transmitter.exchange(request).await {
            Exchange::Settled(result) => result?,
            Exchange::Fatal(e) => return Err(e),
            Exchange::Expired { .. } => {
                return Err(Error::SessionInvalid("login was rejected".into()));
            }
        };

        let token = TokenData::from_envelope(&envelope)?;
        if let Err(e) = self.transmitter.store().set_credential(&token) {
            warn!(error = %e, "failed to persist login credential");
        }
        info!(expires_at = ?token.access_token_expire_time, "logged in");
        Ok(())
    }

    /// User-initiated logout. Never fails: local state is cleared even when
    /// the backend cannot be reached.
    pub async fn logout(&self) {
        self.teardown.run(TeardownReason::UserRequested).await;
    }

    /// Refresh ahead of expiry; see `RefreshCoordinator::refresh_proactively`.
    pub async fn refresh_proactively(&self) -> Result<bool> {
        self.coordinator.refresh_proactively().await
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        self.transmitter.store()
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }
}
