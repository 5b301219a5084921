// Server configuration from environment variables
//
// DATABASE_URL is read separately in main, next to the connection setup;
// everything here is a tunable with a usable default.

use std::time::Duration;

use crate::handshake::HandshakeConfig;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8090;
/// Whatever cookie name the collaborating session layer issues.
const DEFAULT_SESSION_COOKIE: &str = "sid";
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Name of the session cookie carrying the HTTP tier's session id.
    pub session_cookie: String,
    /// Origins allowed to connect; empty disables the check.
    pub allowed_origins: Vec<String>,
    /// A connection that has not completed its handshake by this deadline
    /// is dropped.
    pub handshake_timeout: Duration,
    /// A connection with no inbound traffic for this long is closed.
    pub idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            allowed_origins: Vec::new(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("REALTIME_HOST").unwrap_or(defaults.host),
            port: env_parse("REALTIME_PORT").unwrap_or(defaults.port),
            session_cookie: env_string("SESSION_COOKIE_NAME").unwrap_or(defaults.session_cookie),
            allowed_origins: env_string("REALTIME_ALLOWED_ORIGINS")
                .map(|raw| parse_origins(&raw))
                .unwrap_or_default(),
            handshake_timeout: env_parse("REALTIME_HANDSHAKE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.handshake_timeout),
            idle_timeout: env_parse("REALTIME_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            session_cookie: self.session_cookie.clone(),
            allowed_origins: self.allowed_origins.clone(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|value| value.trim().parse().ok())
}

/// Comma-separated origin list; entries are trimmed and trailing slashes
/// stripped so they compare cleanly against Origin headers.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
