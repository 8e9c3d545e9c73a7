//! Console session credentials and response classification
//!
//! The client-side vocabulary of the console's session protocol: the access
//! credential store, request descriptors with their retry counter, token
//! payloads and endpoint paths, and the classifier that turns a response
//! envelope into a pipeline decision. No control flow lives here; the
//! `console-session` crate drives refresh, replay and logout.
//!
//! Session lifecycle:
//! 1. Login stores the access credential via `CredentialStore::set_credential`
//! 2. Every request carries it through `RequestDescriptor::to_outbound`
//! 3. `classify` maps each envelope to Success / SessionExpired / SessionInvalid / ...
//! 4. A refresh replaces the access credential; the refresh cookie stays server-side
//! 5. Logout calls `CredentialStore::clear`

pub mod classify;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod request;
pub mod token;

pub use classify::{Classification, classify, classify_code};
pub use constants::*;
pub use credentials::{Credential, CredentialStore, now_millis};
pub use error::{Error, Result};
pub use request::RequestDescriptor;
pub use token::{CallRole, Endpoints, TokenData};
