//! Client options.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Default initial retry delay in milliseconds.
pub const DEFAULT_RETRY_MS: u64 = 1000;

/// Default retry delay cap in milliseconds.
pub const DEFAULT_RETRY_MS_MAX: u64 = 30_000;

/// Default retry growth factor.
pub const DEFAULT_RETRY_MULT: f64 = 1.2;

/// Default heartbeat period in milliseconds.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 10_000;

/// Default wait after a failed token request before giving up on the socket.
pub const DEFAULT_HTTP_SETTLE_MS: u64 = 100;

/// Tunables for a [`crate::LoginClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    /// Use `https`/`wss` instead of `http`/`ws`.
    #[serde(default = "default_ssl")]
    pub ssl: bool,
    /// First retry delay for reconnects and queued sends.
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    /// Upper bound for any retry delay.
    #[serde(default = "default_retry_ms_max")]
    pub retry_ms_max: u64,
    /// Growth factor applied after each failed attempt.
    #[serde(default = "default_retry_mult")]
    pub retry_mult: f64,
    /// Heartbeat period.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_http_settle_ms")]
    pub http_settle_ms: u64,
}

fn default_ssl() -> bool {
    true
}

fn default_retry_ms() -> u64 {
    DEFAULT_RETRY_MS
}

fn default_retry_ms_max() -> u64 {
    DEFAULT_RETRY_MS_MAX
}

fn default_retry_mult() -> f64 {
    DEFAULT_RETRY_MULT
}

fn default_ping_interval_ms() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_http_settle_ms() -> u64 {
    DEFAULT_HTTP_SETTLE_MS
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ssl: true,
            retry_ms: DEFAULT_RETRY_MS,
            retry_ms_max: DEFAULT_RETRY_MS_MAX,
            retry_mult: DEFAULT_RETRY_MULT,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            http_settle_ms: DEFAULT_HTTP_SETTLE_MS,
        }
    }
}

impl ClientOptions {
    /// Defaults overridden from `LOGIN_CLIENT_*` environment variables.
    pub fn from_env() -> ClientResult<Self> {
        let mut options = Self::default();
        options.load_from_env()?;
        Ok(options)
    }

    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: ClientOptions = serde_json::from_str(&content)?;
        Ok(options)
    }

    /// Override fields from `LOGIN_CLIENT_*` environment variables.
    pub fn load_from_env(&mut self) -> ClientResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> ClientResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "LOGIN_CLIENT_SSL", &mut self.ssl)?;
        override_from(&lookup, "LOGIN_CLIENT_RETRY_MS", &mut self.retry_ms)?;
        override_from(&lookup, "LOGIN_CLIENT_RETRY_MS_MAX", &mut self.retry_ms_max)?;
        override_from(&lookup, "LOGIN_CLIENT_RETRY_MULT", &mut self.retry_mult)?;
        override_from(&lookup, "LOGIN_CLIENT_PING_INTERVAL_MS", &mut self.ping_interval_ms)?;
        override_from(&lookup, "LOGIN_CLIENT_HTTP_SETTLE_MS", &mut self.http_settle_ms)?;
        Ok(())
    }

    /// Reject values that would stall or spin the retry loops.
    pub fn validate(&self) -> ClientResult<()> {
        if !(self.retry_mult.is_finite() && self.retry_mult > 1.0) {
            return Err(ClientError::Config(format!(
                "retryMult must be greater than 1, got {}",
                self.retry_mult
            )));
        }
        if self.retry_ms == 0 || self.ping_interval_ms == 0 {
            return Err(ClientError::Config(
                "retryMs and pingIntervalMs must be positive".to_string(),
            ));
        }
        if self.retry_ms > self.retry_ms_max {
            return Err(ClientError::Config(format!(
                "retryMs ({}) exceeds retryMsMax ({})",
                self.retry_ms, self.retry_ms_max
            )));
        }
        Ok(())
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_ms_max)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn http_settle(&self) -> Duration {
        Duration::from_millis(self.http_settle_ms)
    }

    /// HTTP and socket URLs for `server`, given without a scheme.
    pub fn endpoints(&self, server: &str) -> ClientResult<Endpoints> {
        let mut server = server.to_string();
        if !server.ends_with('/') {
            server.push('/');
        }
        let (http, ws) = if self.ssl { ("https", "wss") } else { ("http", "ws") };

        let base_url = format!("{http}://{server}");
        let ws_url = format!("{ws}://{server}");
        Url::parse(&base_url)?;
        Url::parse(&ws_url)?;

        Ok(Endpoints { base_url, ws_url })
    }
}

fn override_from<T, F>(lookup: &F, name: &str, target: &mut T) -> ClientResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| ClientError::Config(format!("{name}={raw:?}: {e}")))?;
    }
    Ok(())
}

/// Resolved server URLs. Both end with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base_url: String,
    pub ws_url: String,
}

impl Endpoints {
    /// Absolute URL of a path below the HTTP base.
    pub fn http(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert!(options.ssl);
        assert_eq!(options.retry_ms, 1000);
        assert_eq!(options.retry_ms_max, 30_000);
        assert_eq!(options.retry_mult, 1.2);
        assert_eq!(options.ping_interval_ms, 10_000);
        assert_eq!(options.http_settle_ms, 100);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{ "ssl": false, "retryMs": 250 }"#).unwrap();

        let options = ClientOptions::load_from_file(&path).unwrap();
        assert!(!options.ssl);
        assert_eq!(options.retry_ms, 250);
        assert_eq!(options.retry_ms_max, DEFAULT_RETRY_MS_MAX);
        assert_eq!(options.ping_interval_ms, DEFAULT_PING_INTERVAL_MS);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = ClientOptions::load_from_file(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOGIN_CLIENT_SSL", "false"),
            ("LOGIN_CLIENT_RETRY_MULT", "2.5"),
            ("LOGIN_CLIENT_PING_INTERVAL_MS", " 500 "),
        ]
        .into_iter()
        .collect();

        let mut options = ClientOptions::default();
        options
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert!(!options.ssl);
        assert_eq!(options.retry_mult, 2.5);
        assert_eq!(options.ping_interval_ms, 500);
        assert_eq!(options.retry_ms, DEFAULT_RETRY_MS);
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut options = ClientOptions::default();
        let err = options
            .apply_overrides(|name| (name == "LOGIN_CLIENT_RETRY_MS").then(|| "soon".to_string()))
            .unwrap_err();

        assert!(matches!(err, ClientError::Config(ref msg) if msg.contains("LOGIN_CLIENT_RETRY_MS")));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut options = ClientOptions {
            retry_mult: 1.0,
            ..ClientOptions::default()
        };
        assert!(options.validate().is_err());

        options.retry_mult = 1.5;
        options.ping_interval_ms = 0;
        assert!(options.validate().is_err());

        options.ping_interval_ms = 1000;
        options.retry_ms = 60_000;
        assert!(options.validate().is_err());

        options.retry_ms = 500;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_endpoints_with_ssl() {
        let endpoints = ClientOptions::default().endpoints("login.example.com").unwrap();
        assert_eq!(endpoints.base_url, "https://login.example.com/");
        assert_eq!(endpoints.ws_url, "wss://login.example.com/");
        assert_eq!(endpoints.http("token"), "https://login.example.com/token");
    }

    #[test]
    fn test_endpoints_without_ssl_keep_path() {
        let options = ClientOptions {
            ssl: false,
            ..ClientOptions::default()
        };
        let endpoints = options.endpoints("localhost:3004/login/").unwrap();
        assert_eq!(endpoints.base_url, "http://localhost:3004/login/");
        assert_eq!(endpoints.ws_url, "ws://localhost:3004/login/");
        assert_eq!(endpoints.http("/login"), "http://localhost:3004/login/login");
    }

    #[test]
    fn test_endpoints_reject_garbage() {
        assert!(ClientOptions::default().endpoints("").is_err());
    }
}
