//! Authenticated request pipeline for the console backend
//!
//! Drives one console session on top of `console-auth`: every request goes out
//! with the current access credential, an expired credential is refreshed once
//! for all concurrent callers, and an unrecoverable session is torn down
//! exactly once per burst.
//!
//! Request lifecycle:
//! 1. `RequestDispatcher::send` attaches the credential and sends
//! 2. Success, application and transport errors go straight back to the caller
//! 3. 401 on a first attempt → `RefreshCoordinator` refreshes (or parks the call
//!    behind the refresh already in flight) and replays with `attempt + 1`
//! 4. 402/405, a 401 on a replay, or a failed refresh → `LogoutGate` tears the
//!    session down and notifies the `SessionObserver`
//! 5. A background task refreshes ahead of expiry through the same coordinator

pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod logout;
pub mod refresh;
pub mod transmit;

#[cfg(test)]
mod testing;

pub use coordinator::RefreshCoordinator;
pub use dispatcher::{RequestDispatcher, SessionSettings};
pub use error::{Error, Result};
pub use logout::{DEFAULT_LOGOUT_THROTTLE, LogoutGate, SessionObserver, Teardown, TeardownReason};
pub use refresh::spawn_refresh_task;
pub use transmit::Transmitter;
