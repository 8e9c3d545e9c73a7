//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is loaded from the CONSOLE_PASSWORD env var or
//! password_file, never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use console_auth::{DEFAULT_EXPIRING_SOON_MINUTES, Endpoints, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use console_session::SessionSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::HeaderInjection;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub login: Option<LoginConfig>,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Local listener settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Console backend settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session protocol settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    pub logout_throttle_ms: u64,
    /// Snapshot file for the access credential; in-memory only when unset.
    pub credential_file: Option<PathBuf>,
    pub refresh_interval_secs: u64,
    pub refresh_threshold_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_path: LOGIN_PATH.into(),
            refresh_path: REFRESH_PATH.into(),
            logout_path: LOGOUT_PATH.into(),
            logout_throttle_ms: 1000,
            credential_file: None,
            refresh_interval_secs: 60,
            refresh_threshold_minutes: DEFAULT_EXPIRING_SOON_MINUTES,
        }
    }
}

impl SessionConfig {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            login: self.login_path.clone(),
            refresh: self.refresh_path.clone(),
            logout: self.logout_path.clone(),
        }
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            endpoints: self.endpoints(),
            logout_throttle: Duration::from_millis(self.logout_throttle_ms),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Credentials used to log in at startup
#[derive(Debug, Deserialize)]
pub struct LoginConfig {
    pub username: String,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to CONSOLE_PASSWORD env var)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

impl LoginConfig {
    /// Login request body. Holds the password in clear; do not log it.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username,
            "password": self.password.as_ref().map(|p| p.expose().as_str()).unwrap_or_default(),
        })
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order (only when a `[login]` section exists):
    /// 1. CONSOLE_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Some(login) = config.login.as_mut() {
            login.password = resolve_password(login.password_file.as_deref())?;
            if login.password.is_none() {
                return Err(common::Error::Secret(
                    "[login] needs a password from CONSOLE_PASSWORD or password_file".into(),
                ));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.upstream.base_url
            )));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.session.logout_throttle_ms == 0 {
            return Err(common::Error::Config(
                "logout_throttle_ms must be greater than 0".into(),
            ));
        }

        if self.session.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }

        for (name, value) in [
            ("login_path", &self.session.login_path),
            ("refresh_path", &self.session.refresh_path),
            ("logout_path", &self.session.logout_path),
        ] {
            if !value.starts_with('/') {
                return Err(common::Error::Config(format!(
                    "{name} must start with '/', got: {value}"
                )));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("console-gateway.toml")
    }
}

/// Env var takes precedence over file. A blank file yields no password.
fn resolve_password(password_file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(password) = std::env::var("CONSOLE_PASSWORD") {
        return Ok(Some(Secret::new(password)));
    }
    let Some(file) = password_file else {
        return Ok(None);
    };
    let password = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!(
            "failed to read password_file {}: {e}",
            file.display()
        ))
    })?;
    let password = Secret::new(password.trim().to_owned());
    Ok((!password.is_blank()).then_some(password))
}
