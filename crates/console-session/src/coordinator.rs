//! Single-flight access credential refresh
//!
//! At most one refresh is in flight per session. The first request that fails
//! with an expired credential becomes the leader: it flips the state to
//! `Refreshing` and runs the refresh. Every other request that fails the same
//! way while the refresh is in flight is parked in the queue and resumed from
//! there.
//!
//! Once the refresh settles the queue is taken and the state reset to `Idle`
//! under a single lock, so a request can never park in a queue that has
//! already been drained. On success the parked requests are replayed in
//! arrival order, followed by the leader's own request, each with its attempt
//! counter bumped. On failure the logout gate runs first, then every parked
//! request and the leader are rejected.
//!
//! A request whose expiry is only reported after the refresh has finished
//! went out with a credential that has since been replaced. It is replayed
//! with the current one instead of starting another refresh.
//!
//! The leader's work runs on its own task, for both reactive and proactive
//! refreshes: if the caller that started the refresh goes away, the queue is
//! still settled and the state returns to `Idle`.

use std::collections::VecDeque;
use std::sync::Arc;

use console_auth::{RequestDescriptor, TokenData};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use transport::Envelope;

use crate::error::{Error, Result};
use crate::logout::LogoutGate;
use crate::transmit::{Exchange, Transmitter};

struct PendingRequest {
    request: RequestDescriptor,
    reply: oneshot::Sender<Result<Envelope>>,
}

enum RefreshState {
    Idle,
    Refreshing { queue: VecDeque<PendingRequest> },
}

/// What an expired request does next.
enum Role {
    Parked,
    Leader(PendingRequest),
    Late(PendingRequest),
}

/// Refresh coordinator shared by every request of one session.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    transmitter: Arc<Transmitter>,
    gate: Arc<LogoutGate>,
}

impl RefreshCoordinator {
    pub fn new(transmitter: Arc<Transmitter>, gate: Arc<LogoutGate>) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            transmitter,
            gate,
        }
    }

    /// Recover `request` after its first send came back with an expired
    /// access credential. `sent_with` is the access token it went out with.
    ///
    /// Resolves with the replayed request's outcome, or with
    /// `Error::SessionExpired` when the refresh failed.
    pub async fn handle_recoverable_failure(
        self: &Arc<Self>,
        request: RequestDescriptor,
        sent_with: Option<String>,
    ) -> Result<Envelope> {
        let (reply, outcome) = oneshot::channel();
        let pending = PendingRequest { request, reply };

        let role = {
            let mut state = self.state.lock().await;
            match &mut *state {
                RefreshState::Refreshing { queue } => {
                    debug!(path = %pending.request.path, queued = queue.len() + 1, "refresh in flight, parking request");
                    queue.push_back(pending);
                    Role::Parked
                }
                // A finished refresh stores its token before leaving `Refreshing`
                RefreshState::Idle if self.replaced_since(sent_with.as_deref()) => {
                    debug!(path = %pending.request.path, "credential already refreshed, replaying request");
                    Role::Late(pending)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        queue: VecDeque::new(),
                    };
                    Role::Leader(pending)
                }
            }
        };

        match role {
            Role::Parked => {}
            Role::Late(pending) => self.replay(VecDeque::from([pending])).await,
            Role::Leader(trigger) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let refreshed = this.refresh().await;
                    let mut queue = this.release().await;
                    queue.push_back(trigger);
                    this.settle(&refreshed, queue).await;
                });
            }
        }

        outcome
            .await
            .unwrap_or_else(|_| Err(Error::SessionExpired("refresh was abandoned".into())))
    }

    /// Refresh ahead of expiry, outside any request.
    ///
    /// Returns `Ok(false)` without doing anything when a refresh is already in
    /// flight. A transport failure with nobody waiting leaves the session in
    /// place for the next attempt; any other failure tears it down.
    pub async fn refresh_proactively(self: &Arc<Self>) -> Result<bool> {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, RefreshState::Refreshing { .. }) {
                debug!("refresh already in flight, skipping proactive refresh");
                return Ok(false);
            }
            *state = RefreshState::Refreshing {
                queue: VecDeque::new(),
            };
        }

        let this = Arc::clone(self);
        let leader = tokio::spawn(async move {
            let refreshed = this.refresh().await;
            let queue = this.release().await;
            this.settle(&refreshed, queue).await;
            refreshed
        });

        leader
            .await
            .unwrap_or_else(|e| Err(Error::SessionExpired(format!("refresh was abandoned: {e}"))))
            .map(|()| true)
    }

    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock().await, RefreshState::Refreshing { .. })
    }

    /// Whether the store now holds a different access token than `sent_with`.
    fn replaced_since(&self, sent_with: Option<&str>) -> bool {
        match self.transmitter.store().access_token() {
            Some(current) => sent_with != Some(current.as_str()),
            None => false,
        }
    }

    /// Call the refresh endpoint and store the new access credential.
    async fn refresh(&self) -> Result<()> {
        info!("refreshing access credential");
        let request = self.transmitter.endpoints().refresh_request();

        let result = match self.transmitter.exchange(request).await {
            Exchange::Settled(Ok(envelope)) => self.store(&envelope),
            Exchange::Settled(Err(e)) | Exchange::Fatal(e) => Err(e),
            Exchange::Expired { .. } => {
                Err(Error::SessionInvalid("refresh credential rejected".into()))
            }
        };

        match &result {
            Ok(()) => {
                metrics::counter!("session_refresh_total", "outcome" => "success").increment(1);
                info!("access credential refreshed");
            }
            Err(e) => {
                metrics::counter!("session_refresh_total", "outcome" => "failure").increment(1);
                warn!(error = %e, "access credential refresh failed");
            }
        }
        result
    }

    fn store(&self, envelope: &Envelope) -> Result<()> {
        let token = TokenData::from_envelope(envelope)?;
        if let Err(e) = self.transmitter.store().set_credential(&token) {
            // The new token is already live in memory
            warn!(error = %e, "failed to persist refreshed credential");
        }
        Ok(())
    }

    /// Take the queue and return to `Idle` in one step.
    async fn release(&self) -> VecDeque<PendingRequest> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { queue } => queue,
            RefreshState::Idle => VecDeque::new(),
        }
    }

    async fn settle(&self, refreshed: &Result<()>, queue: VecDeque<PendingRequest>) {
        match refreshed {
            Ok(()) => self.replay(queue).await,
            Err(e) => {
                // Callers see the rejection only once the session is gone
                if !queue.is_empty() || !matches!(e, Error::Transport(_)) {
                    self.gate.trigger().await;
                }
                let message = format!("refresh failed: {e}");
                for pending in queue {
                    let _ = pending.reply.send(Err(Error::SessionExpired(message.clone())));
                }
            }
        }
    }

    /// Replay parked requests in queue order.
    ///
    /// Every exchange is initiated before any is awaited, so the sends leave
    /// in queue order while the responses are awaited concurrently.
    async fn replay(&self, queue: VecDeque<PendingRequest>) {
        if queue.is_empty() {
            return;
        }
        debug!(count = queue.len(), "replaying requests with refreshed credential");
        metrics::counter!("session_replayed_requests_total").increment(queue.len() as u64);

        let replays: Vec<_> = queue
            .into_iter()
            .map(|pending| {
                let exchange = self.transmitter.exchange(pending.request.retried());
                async move {
                    let result = self.resolve_replay(exchange.await).await;
                    let _ = pending.reply.send(result);
                }
            })
            .collect();

        futures_util::future::join_all(replays).await;
    }

    async fn resolve_replay(&self, exchange: Exchange) -> Result<Envelope> {
        match exchange {
            Exchange::Settled(result) => result,
            Exchange::Fatal(e) => {
                self.gate.trigger().await;
                Err(e)
            }
            Exchange::Expired { .. } => {
                self.gate.trigger().await;
                Err(Error::SessionInvalid(
                    "credential rejected after refresh".into(),
                ))
            }
        }
    }
}
