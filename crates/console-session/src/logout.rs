//! Session teardown and the throttled logout gate
//!
//! A burst of requests failing with a fatal session status must produce one
//! logout, not one per request. `LogoutGate` is a leading-edge throttle: the
//! first trigger in a window runs the teardown, later triggers inside the same
//! window are dropped.
//!
//! Teardown order: best-effort remote logout (only if a credential is still
//! held), then unconditional local clear, then the observer notification. A
//! failing or unreachable logout endpoint never blocks the local clear.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transmit::{Exchange, Transmitter};

/// Default throttle window, matching the console's browser client.
pub const DEFAULT_LOGOUT_THROTTLE: Duration = Duration::from_millis(1000);

/// Boundary to the UI/store layer.
///
/// Called once per executed fatal teardown, after local credentials are gone.
/// Implementations typically route the user back to the login screen.
pub trait SessionObserver: Send + Sync {
    fn on_fatal_session_failure(&self);
}

/// Why a teardown runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The session failed and cannot be recovered.
    Fatal,
    /// The user asked to log out.
    UserRequested,
}

impl TeardownReason {
    fn label(&self) -> &'static str {
        match self {
            TeardownReason::Fatal => "fatal",
            TeardownReason::UserRequested => "user",
        }
    }
}

/// Clears the session locally and, best effort, remotely.
pub struct Teardown {
    transmitter: Arc<Transmitter>,
    observer: Arc<dyn SessionObserver>,
}

impl Teardown {
    pub fn new(transmitter: Arc<Transmitter>, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            transmitter,
            observer,
        }
    }

    pub async fn run(&self, reason: TeardownReason) {
        let store = self.transmitter.store();

        if store.is_logged_in() {
            let logout = self.transmitter.endpoints().logout_request();
            match self.transmitter.exchange(logout).await {
                Exchange::Settled(Ok(_)) => debug!("remote logout succeeded"),
                Exchange::Settled(Err(e)) | Exchange::Fatal(e) => {
                    debug!(error = %e, "remote logout failed, continuing with local cleanup");
                }
                Exchange::Expired { .. } => {
                    debug!("remote logout rejected credential, continuing with local cleanup");
                }
            }
        }

        if let Err(e) = store.clear() {
            warn!(error = %e, "failed to remove persisted credential");
        }
        metrics::counter!("session_logout_total", "trigger" => reason.label()).increment(1);
        info!(reason = reason.label(), "session cleared");

        if reason == TeardownReason::Fatal {
            self.observer.on_fatal_session_failure();
        }
    }
}

/// Leading-edge throttle in front of a fatal `Teardown`.
pub struct LogoutGate {
    window: Duration,
    last_run: Mutex<Option<Instant>>,
    teardown: Arc<Teardown>,
}

impl LogoutGate {
    pub fn new(teardown: Arc<Teardown>, window: Duration) -> Self {
        Self {
            window,
            last_run: Mutex::new(None),
            teardown,
        }
    }

    /// Run the fatal teardown unless one already ran within the window.
    ///
    /// Returns whether this call executed the teardown. The winning caller
    /// awaits the teardown; suppressed callers return immediately.
    pub async fn trigger(&self) -> bool {
        let now = Instant::now();
        {
            let mut last_run = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = *last_run
                && now.duration_since(previous) < self.window
            {
                debug!("logout already ran within throttle window, suppressed");
                metrics::counter!("session_logout_suppressed_total").increment(1);
                return false;
            }
            *last_run = Some(now);
        }

        warn!("session cannot be recovered, logging out");
        self.teardown.run(TeardownReason::Fatal).await;
        true
    }
}
