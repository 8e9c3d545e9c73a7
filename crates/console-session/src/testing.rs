//! Test doubles: a scripted console backend and a recording observer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use console_auth::{CredentialStore, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, TokenData};
use transport::{Envelope, OutboundRequest, ResponseFuture, Transport, TransportError};

use crate::logout::SessionObserver;

/// Far-future expiry for tokens issued by the script.
pub const FAR_FUTURE: u64 = 4_102_444_800_000;

/// How the scripted refresh endpoint behaves.
#[derive(Debug, Clone)]
pub enum RefreshScript {
    /// Issue `token` and start accepting it.
    Issue(String),
    /// Answer with this application code.
    Code(i64),
    /// Fail below the envelope layer.
    NetworkError,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub authorization: Option<String>,
}

struct Script {
    valid_token: String,
    refresh: RefreshScript,
    refresh_delay: Duration,
    delays: HashMap<String, Duration>,
    on_poll: bool,
    logout_code: i64,
    login_token: String,
    fixed: HashMap<String, (i64, String)>,
    network_failures: HashSet<String>,
    public: HashSet<String>,
    always_unauthorized: HashSet<String>,
    calls: Vec<Call>,
}

/// In-process console backend.
///
/// Regular paths answer 200 when the request carries the currently valid
/// token and 401 otherwise. Calls are recorded in `send` unless
/// `send_on_poll` is set, in which case they are recorded on first poll.
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new(valid_token: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(Script {
                valid_token: valid_token.to_string(),
                refresh: RefreshScript::Issue("at_new".into()),
                refresh_delay: Duration::ZERO,
                delays: HashMap::new(),
                on_poll: false,
                logout_code: 200,
                login_token: "at_login".into(),
                fixed: HashMap::new(),
                network_failures: HashSet::new(),
                public: HashSet::new(),
                always_unauthorized: HashSet::new(),
                calls: Vec::new(),
            })),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.script.lock().unwrap())
    }

    pub fn set_refresh(&self, refresh: RefreshScript) {
        self.with(|s| s.refresh = refresh);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.with(|s| s.refresh_delay = delay);
    }

    /// Hold the answer for `path` back by `delay`.
    pub fn delay(&self, path: &str, delay: Duration) {
        self.with(|s| s.delays.insert(path.into(), delay));
    }

    /// Record and answer each call when its future is first polled, the way
    /// the HTTP transport behaves.
    pub fn send_on_poll(&self) {
        self.with(|s| s.on_poll = true);
    }

    pub fn set_logout_code(&self, code: i64) {
        self.with(|s| s.logout_code = code);
    }

    pub fn respond(&self, path: &str, code: i64, message: &str) {
        self.with(|s| s.fixed.insert(path.into(), (code, message.into())));
    }

    pub fn fail_network(&self, path: &str) {
        self.with(|s| s.network_failures.insert(path.into()));
    }

    pub fn make_public(&self, path: &str) {
        self.with(|s| s.public.insert(path.into()));
    }

    pub fn always_unauthorized(&self, path: &str) {
        self.with(|s| s.always_unauthorized.insert(path.into()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.with(|s| s.calls.iter().map(|c| c.path.clone()).collect())
    }

    pub fn count(&self, path: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.path == path).count())
    }

    pub fn refresh_calls(&self) -> usize {
        self.count(REFRESH_PATH)
    }

    pub fn logout_calls(&self) -> usize {
        self.count(LOGOUT_PATH)
    }

    /// Paths sent after the first refresh call, in initiation order.
    pub fn paths_after_refresh(&self) -> Vec<String> {
        let paths = self.paths();
        match paths.iter().position(|p| p == REFRESH_PATH) {
            Some(i) => paths[i + 1..].to_vec(),
            None => Vec::new(),
        }
    }
}

fn envelope(code: i64, message: &str, data: serde_json::Value) -> Envelope {
    Envelope {
        code,
        message: Some(message.to_string()),
        data,
    }
}

fn token_payload(token: &str) -> serde_json::Value {
    serde_json::json!({
        "accessToken": token,
        "accessTokenExpireTime": FAR_FUTURE,
    })
}

impl Transport for ScriptedTransport {
    fn send(&self, request: OutboundRequest) -> ResponseFuture {
        let authorization = request
            .headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let call = Call {
            path: request.path,
            authorization,
        };

        if self.with(|s| s.on_poll) {
            let script = self.script.clone();
            return Box::pin(async move {
                let (response, delay) = {
                    let mut script = script.lock().unwrap();
                    answer(&mut script, call)
                };
                wait(delay).await;
                response
            });
        }

        let (response, delay) = self.with(|s| answer(s, call));
        Box::pin(async move {
            wait(delay).await;
            response
        })
    }
}

async fn wait(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Record `call` and decide the response and how long it takes to arrive.
fn answer(s: &mut Script, call: Call) -> (transport::Result<Envelope>, Duration) {
    let path = call.path.clone();
    let authorization = call.authorization.clone();
    s.calls.push(call);

    let delay = if path == REFRESH_PATH {
        s.refresh_delay
    } else {
        s.delays.get(&path).copied().unwrap_or(Duration::ZERO)
    };

    if s.network_failures.contains(&path) {
        return (Err(TransportError::Network("connection refused".into())), delay);
    }
    if let Some((code, message)) = s.fixed.get(&path) {
        return (Ok(envelope(*code, message, serde_json::Value::Null)), delay);
    }
    if path == REFRESH_PATH {
        let response = match s.refresh.clone() {
            RefreshScript::Issue(token) => {
                s.valid_token = token.clone();
                Ok(envelope(200, "ok", token_payload(&token)))
            }
            RefreshScript::Code(code) => Ok(envelope(code, "refresh rejected", serde_json::Value::Null)),
            RefreshScript::NetworkError => Err(TransportError::Network("connection reset".into())),
        };
        return (response, delay);
    }
    if path == LOGOUT_PATH {
        return (Ok(envelope(s.logout_code, "logout", serde_json::Value::Null)), delay);
    }
    if path == LOGIN_PATH {
        s.valid_token = s.login_token.clone();
        return (Ok(envelope(200, "ok", token_payload(&s.login_token))), delay);
    }

    // Authorization is checked when the request arrives, not when its answer does
    let authorized = !s.always_unauthorized.contains(&path)
        && (s.public.contains(&path) || authorization.as_deref() == Some(s.valid_token.as_str()));
    let response = if authorized {
        envelope(200, "ok", serde_json::json!({"path": path, "token": authorization}))
    } else {
        envelope(401, "token expired", serde_json::Value::Null)
    };
    (Ok(response), delay)
}

/// Observer that counts fatal-session notifications.
#[derive(Default)]
pub struct RecordingObserver {
    fatal: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fatal_count(&self) -> usize {
        self.fatal.load(Ordering::SeqCst)
    }
}

impl SessionObserver for RecordingObserver {
    fn on_fatal_session_failure(&self) {
        self.fatal.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory store holding `token` (if any) with a far-future expiry.
pub fn store_with_token(token: Option<&str>) -> Arc<CredentialStore> {
    let store = CredentialStore::in_memory();
    if let Some(token) = token {
        store
            .set_credential(&TokenData {
                access_token: token.to_string(),
                access_token_expire_time: Some(FAR_FUTURE),
            })
            .unwrap();
    }
    Arc::new(store)
}
