//! Proactive background refresh
//!
//! Spawns a periodic task that refreshes the access credential shortly before
//! it expires, so most requests never see a 401. The task goes through the
//! same coordinator as request-time recovery and backs off when a refresh is
//! already in flight.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dispatcher::RequestDispatcher;

/// Spawn a background task that refreshes the credential when it is within
/// `threshold_minutes` of expiry.
///
/// Runs every `interval`. A logged-out session is skipped; a failed refresh is
/// left to the coordinator's teardown rules and retried on the next tick if
/// the session survived it.
pub fn spawn_refresh_task(
    dispatcher: Arc<RequestDispatcher>,
    interval: Duration,
    threshold_minutes: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; the credential was just loaded
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&dispatcher, threshold_minutes).await;
        }
    })
}

/// One check: refresh if logged in and expiring within the threshold.
async fn refresh_cycle(dispatcher: &RequestDispatcher, threshold_minutes: u64) {
    let store = dispatcher.credentials();
    if !store.is_logged_in() {
        debug!("not logged in, skipping proactive refresh");
        return;
    }
    if !store.is_access_expiring_soon(threshold_minutes) {
        return;
    }

    debug!(threshold_minutes, "access credential expiring soon, refreshing");
    match dispatcher.refresh_proactively().await {
        Ok(true) => info!("background refresh succeeded"),
        Ok(false) => debug!("refresh already in flight"),
        Err(e) if store.is_logged_in() => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
        }
        Err(e) => warn!(error = %e, "background refresh failed, session ended"),
    }
}
