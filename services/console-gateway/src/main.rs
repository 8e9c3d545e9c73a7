//! Console gateway
//!
//! Single-binary service that holds one admin console session and forwards
//! local requests to the console backend through it:
//! 1. Logs in with configured credentials (or restores a persisted session)
//! 2. Attaches the access credential to every forwarded request
//! 3. Refreshes an expired credential once for all concurrent requests
//! 4. Logs out when the session cannot be recovered

mod config;
mod error;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use console_auth::CredentialStore;
use console_session::{RequestDispatcher, SessionObserver, spawn_refresh_task};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::{Config, LoginConfig};
use crate::proxy::ProxyState;

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    login: Option<Arc<LoginConfig>>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Logs fatal session failures; the next request runs unauthenticated until
/// someone logs in again through `/session/login`.
struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_fatal_session_failure(&self) {
        error!("console session ended, log in again via POST /session/login");
    }
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/session/login", post(login_handler))
        .route("/session/logout", post(logout_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Assemble the session pipeline for `config`.
fn build_dispatcher(config: &Config) -> error::Result<Arc<RequestDispatcher>> {
    let store = match &config.session.credential_file {
        Some(path) => CredentialStore::persistent(path.clone())
            .map_err(|e| error::Error::CredentialStore(e.to_string()))?,
        None => CredentialStore::in_memory(),
    };

    let transport = HttpTransport::new(
        &config.upstream.base_url,
        Duration::from_secs(config.upstream.timeout_secs),
        config.headers.clone(),
    )
    .map_err(|e| error::Error::Transport(e.to_string()))?;

    Ok(Arc::new(RequestDispatcher::with_settings(
        Arc::new(transport),
        Arc::new(store),
        Arc::new(LogObserver),
        config.session.settings(),
    )))
}

/// Log in unless a restored session is already present.
async fn startup_login(dispatcher: &RequestDispatcher, login: &LoginConfig) -> error::Result<()> {
    if dispatcher.credentials().is_logged_in() {
        info!("restored persisted session, skipping startup login");
        return Ok(());
    }
    info!(username = %login.username, "logging in to console");
    dispatcher
        .login(login.body())
        .await
        .map_err(|e| error::Error::Login(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting console-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        base_url = %config.upstream.base_url,
        persistent = config.session.credential_file.is_some(),
        startup_login = config.login.is_some(),
        headers = config.headers.len(),
        "configuration loaded"
    );

    let dispatcher = build_dispatcher(&config).context("failed to build session pipeline")?;

    if let Some(login) = &config.login
        && let Err(e) = startup_login(&dispatcher, login).await
    {
        // Keep serving: /session/login can recover once the backend is reachable
        warn!(error = %e, "startup login failed");
    }

    let refresh_task = spawn_refresh_task(
        dispatcher.clone(),
        config.session.refresh_interval(),
        config.session.refresh_threshold_minutes,
    );

    let app_state = AppState {
        proxy: ProxyState {
            dispatcher: dispatcher.clone(),
        },
        login: config.login.map(Arc::new),
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.gateway.max_connections);

    let listen_addr = config.gateway.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: signal the server to drain, then race it against the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }
    refresh_task.abort();

    info!("shutdown complete");
    Ok(())
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Health endpoint: 200 while a session is held, 503 when logged out.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let dispatcher = &state.proxy.dispatcher;
    let store = dispatcher.credentials();
    let refreshing = dispatcher.coordinator().is_refreshing().await;

    if store.is_logged_in() {
        json_response(
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "session": "active",
                "access_expires_at": store.expires_at(),
                "access_expired": store.is_access_expired(),
                "refreshing": refreshing,
                "uptime_seconds": uptime,
            }),
        )
    } else {
        json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "session": "logged_out",
                "refreshing": refreshing,
                "uptime_seconds": uptime,
            }),
        )
    }
}

/// Prometheus metrics endpoint: metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Log in with the posted JSON body, or with the configured credentials when
/// the body is empty.
async fn login_handler(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    let request_id = new_request_id();
    let body = if body.is_empty() {
        match &state.login {
            Some(login) => login.body(),
            None => {
                return proxy::error_response(
                    StatusCode::BAD_REQUEST,
                    "no login body posted and no [login] configured",
                    &request_id,
                );
            }
        }
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                return proxy::error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("login body must be JSON: {e}"),
                    &request_id,
                );
            }
        }
    };

    match state.proxy.dispatcher.login(body).await {
        Ok(()) => json_response(StatusCode::OK, serde_json::json!({"status": "logged_in"})),
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "login rejected");
            proxy::outcome_response(Err(e), &request_id)
        }
    }
}

/// Log out locally and, best effort, at the backend.
async fn logout_handler(State(state): State<AppState>) -> Response {
    state.proxy.dispatcher.logout().await;
    json_response(StatusCode::OK, serde_json::json!({"status": "logged_out"}))
}

/// Catch-all handler that forwards every other request to the console backend.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    proxy::proxy_request(&state.proxy, request, new_request_id()).await
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap, Request, header};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    /// Mutable state of the mock console backend.
    #[derive(Default)]
    struct Backend {
        valid_token: Option<String>,
        issued: u32,
        logouts: u32,
        refreshes: u32,
    }

    type SharedBackend = Arc<Mutex<Backend>>;

    fn envelope(code: i64, message: &str, data: serde_json::Value) -> axum::Json<serde_json::Value> {
        axum::Json(serde_json::json!({"code": code, "message": message, "data": data}))
    }

    fn issue(backend: &SharedBackend) -> serde_json::Value {
        let mut b = backend.lock().unwrap();
        b.issued += 1;
        let token = format!("at_{}", b.issued);
        b.valid_token = Some(token.clone());
        serde_json::json!({"accessToken": token, "accessTokenExpireTime": 4_102_444_800_000u64})
    }

    /// Start a mock console backend speaking the envelope protocol.
    ///
    /// Login sets an HTTP-only refresh cookie; refresh only succeeds when the
    /// cookie comes back. Any other path answers 200 for the current token and
    /// 401 otherwise. `/kick` always answers 405, `/role/add` always 500.
    async fn start_console() -> (String, SharedBackend) {
        let backend: SharedBackend = Arc::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let login_state = backend.clone();
        let refresh_state = backend.clone();
        let logout_state = backend.clone();
        let fallback_state = backend.clone();

        let app = axum::Router::new()
            .route(
                "/auth/login",
                axum::routing::post(move |body: axum::Json<serde_json::Value>| {
                    let backend = login_state.clone();
                    async move {
                        if body["password"] != "hunter2" {
                            return (HeaderMap::new(), envelope(500, "wrong password", serde_json::Value::Null));
                        }
                        let mut headers = HeaderMap::new();
                        headers.insert(
                            header::SET_COOKIE,
                            "refresh=rt_1; Path=/; HttpOnly".parse().unwrap(),
                        );
                        (headers, envelope(200, "ok", issue(&backend)))
                    }
                }),
            )
            .route(
                "/auth/refresh",
                axum::routing::post(move |headers: HeaderMap| {
                    let backend = refresh_state.clone();
                    async move {
                        backend.lock().unwrap().refreshes += 1;
                        let has_cookie = headers
                            .get(header::COOKIE)
                            .and_then(|v| v.to_str().ok())
                            .is_some_and(|c| c.contains("refresh=rt_1"));
                        if has_cookie {
                            envelope(200, "ok", issue(&backend))
                        } else {
                            envelope(402, "refresh token expired", serde_json::Value::Null)
                        }
                    }
                }),
            )
            .route(
                "/auth/logout",
                axum::routing::post(move || {
                    let backend = logout_state.clone();
                    async move {
                        backend.lock().unwrap().logouts += 1;
                        envelope(200, "ok", serde_json::Value::Null)
                    }
                }),
            )
            .route(
                "/kick",
                axum::routing::get(|| async { envelope(405, "signed in elsewhere", serde_json::Value::Null) }),
            )
            .route(
                "/role/add",
                axum::routing::post(|| async { envelope(500, "duplicate role name", serde_json::Value::Null) }),
            )
            .fallback(move |request: Request<Body>| {
                let backend = fallback_state.clone();
                async move {
                    let token = request
                        .headers()
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let valid = backend.lock().unwrap().valid_token.clone();
                    if token.is_some() && token == valid {
                        envelope(
                            200,
                            "ok",
                            serde_json::json!({
                                "path": request.uri().path(),
                                "query": request.uri().query(),
                                "tenant": request.headers().get("x-tenant-id").and_then(|v| v.to_str().ok()),
                                "token": token,
                            }),
                        )
                    } else {
                        envelope(401, "token expired", serde_json::Value::Null)
                    }
                }
            });

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, backend)
    }

    fn test_config(base_url: &str) -> Config {
        let toml = format!(
            r#"
[gateway]
listen_addr = "127.0.0.1:0"

[upstream]
base_url = "{base_url}"
timeout_secs = 5

[[headers]]
name = "x-tenant-id"
value = "000000"
"#
        );
        toml::from_str(&toml).unwrap()
    }

    fn test_login() -> LoginConfig {
        LoginConfig {
            username: "admin".into(),
            password: Some(common::Secret::new("hunter2".into())),
            password_file: None,
        }
    }

    fn test_app(config: &Config) -> (Router, Arc<RequestDispatcher>) {
        let dispatcher = build_dispatcher(config).unwrap();
        let state = AppState {
            proxy: ProxyState {
                dispatcher: dispatcher.clone(),
            },
            login: Some(Arc::new(test_login())),
            started_at: Instant::now(),
            prometheus: test_prometheus_handle(),
        };
        (build_router(state, 1000), dispatcher)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn call(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reflects_session_state() {
        let (url, _backend) = start_console().await;
        let (app, _) = test_app(&test_config(&url));

        let response = call(&app, get("/health")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["session"], "logged_out");

        let response = call(&app, post_empty("/session/login")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(&app, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["session"], "active");
        assert_eq!(json["refreshing"], false);
    }

    #[tokio::test]
    async fn forwards_with_credential_query_and_injected_header() {
        let (url, _backend) = start_console().await;
        let config = test_config(&url);
        let (app, dispatcher) = test_app(&config);
        startup_login(&dispatcher, &test_login()).await.unwrap();

        let response = call(
            &app,
            Request::builder()
                .uri("/user/list?page=1")
                .header("authorization", "at_from_client")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-request-id").is_some());
        let json = body_json(response).await;
        assert_eq!(json["code"], 200);
        assert_eq!(json["data"]["path"], "/user/list");
        assert_eq!(json["data"]["query"], "page=1");
        assert_eq!(json["data"]["tenant"], "000000");
        assert_eq!(json["data"]["token"], "at_1");
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_through_cookie() {
        let (url, backend) = start_console().await;
        let (app, dispatcher) = test_app(&test_config(&url));
        startup_login(&dispatcher, &test_login()).await.unwrap();

        // Backend rotates the token out from under the gateway
        backend.lock().unwrap().valid_token = Some("at_rotated".into());

        let response = call(&app, get("/menu/tree")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["token"], "at_2");
        assert_eq!(backend.lock().unwrap().refreshes, 1);
        assert_eq!(dispatcher.credentials().access_token().as_deref(), Some("at_2"));
    }

    #[tokio::test]
    async fn fatal_session_answers_401_and_logs_out() {
        let (url, backend) = start_console().await;
        let (app, dispatcher) = test_app(&test_config(&url));
        startup_login(&dispatcher, &test_login()).await.unwrap();

        let response = call(&app, get("/kick")).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "gateway_error");
        assert!(!dispatcher.credentials().is_logged_in());
        assert_eq!(backend.lock().unwrap().logouts, 1);
    }

    #[tokio::test]
    async fn application_error_is_passed_through() {
        let (url, _backend) = start_console().await;
        let (app, dispatcher) = test_app(&test_config(&url));
        startup_login(&dispatcher, &test_login()).await.unwrap();

        let response = call(
            &app,
            Request::builder()
                .method("POST")
                .uri("/role/add")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"roleName":"ops"}"#))
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["code"], 500);
        assert_eq!(json["message"], "duplicate role name");
        assert!(dispatcher.credentials().is_logged_in());
    }

    #[tokio::test]
    async fn unreachable_backend_is_502() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let (app, _) = test_app(&test_config(&url));
        let response = call(&app, get("/user/list")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn rejected_login_keeps_session_empty() {
        let (url, _backend) = start_console().await;
        let (app, dispatcher) = test_app(&test_config(&url));

        let response = call(
            &app,
            Request::builder()
                .method("POST")
                .uri("/session/login")
                .body(Body::from(r#"{"username":"admin","password":"wrong"}"#))
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["code"], 500);
        assert!(!dispatcher.credentials().is_logged_in());
    }

    #[tokio::test]
    async fn logout_endpoint_clears_session() {
        let (url, backend) = start_console().await;
        let (app, dispatcher) = test_app(&test_config(&url));
        startup_login(&dispatcher, &test_login()).await.unwrap();

        let response = call(&app, post_empty("/session/logout")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "logged_out");
        assert!(!dispatcher.credentials().is_logged_in());
        assert_eq!(backend.lock().unwrap().logouts, 1);
    }

    #[tokio::test]
    async fn startup_login_skipped_for_restored_session() {
        let (url, backend) = start_console().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&url);
        config.session.credential_file = Some(dir.path().join("session.json"));

        let first = build_dispatcher(&config).unwrap();
        startup_login(&first, &test_login()).await.unwrap();

        let restored = build_dispatcher(&config).unwrap();
        startup_login(&restored, &test_login()).await.unwrap();

        assert_eq!(backend.lock().unwrap().issued, 1);
        assert_eq!(restored.credentials().access_token().as_deref(), Some("at_1"));
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let (url, _backend) = start_console().await;
        let (app, _) = test_app(&test_config(&url));

        let response = call(&app, get("/metrics")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
