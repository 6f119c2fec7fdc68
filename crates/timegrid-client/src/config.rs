//! Session configuration.
//!
//! Configuration is fixed at session construction; there is no process-wide
//! mutable state. `from_env` reads the `TIMEGRID_*` environment variables
//! once and falls back to the documented defaults.

use std::env;

/// Configuration for an [`crate::ApiSession`].
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub project: String,
    pub base_url: String,
    /// Sent in the caller-identification header of every request.
    pub client_name: String,
    pub max_workers: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_retry_backoff_secs: u64,
    pub max_connection_pool_size: usize,
    /// HTTP statuses that trigger a retry.
    pub retry_status_codes: Vec<u16>,
    pub disable_gzip: bool,
    /// Writes are not retried unless opted in; datapoint insertion is
    /// idempotent on (series, timestamp) but the caller may rely otherwise.
    pub retry_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project: String::new(),
            base_url: "https://api.timegrid.io".to_string(),
            client_name: "timegrid-rust".to_string(),
            max_workers: 10,
            timeout_secs: 30,
            max_retries: 10,
            max_retry_backoff_secs: 30,
            max_connection_pool_size: 50,
            retry_status_codes: vec![429, 500, 502, 503],
            disable_gzip: false,
            retry_writes: false,
        }
    }
}

impl Config {
    /// Create a configuration with defaults for everything but credentials.
    pub fn new(api_key: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            project: project.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let api_key = env::var("TIMEGRID_API_KEY");
        if api_key.is_err() {
            tracing::warn!("TIMEGRID_API_KEY not set - requests will not authenticate");
        }
        let project = env::var("TIMEGRID_PROJECT");
        if project.is_err() {
            tracing::warn!("TIMEGRID_PROJECT not set - requests will not resolve a project");
        }

        let defaults = Self::default();
        Self {
            api_key: api_key.unwrap_or_default(),
            project: project.unwrap_or_default(),
            base_url: env::var("TIMEGRID_BASE_URL").unwrap_or(defaults.base_url),
            client_name: env::var("TIMEGRID_CLIENT_NAME").unwrap_or(defaults.client_name),
            max_workers: parse_env("TIMEGRID_MAX_WORKERS", defaults.max_workers),
            timeout_secs: parse_env("TIMEGRID_TIMEOUT", defaults.timeout_secs),
            max_retries: parse_env("TIMEGRID_MAX_RETRIES", defaults.max_retries),
            max_retry_backoff_secs: parse_env(
                "TIMEGRID_MAX_RETRY_BACKOFF",
                defaults.max_retry_backoff_secs,
            ),
            max_connection_pool_size: parse_env(
                "TIMEGRID_MAX_CONNECTION_POOL_SIZE",
                defaults.max_connection_pool_size,
            ),
            retry_status_codes: env::var("TIMEGRID_STATUS_FORCELIST")
                .map(|raw| parse_status_forcelist(&raw))
                .unwrap_or(defaults.retry_status_codes),
            disable_gzip: env_flag("TIMEGRID_DISABLE_GZIP"),
            retry_writes: env_flag("TIMEGRID_RETRY_WRITES"),
        }
    }

    /// Check whether credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.project.is_empty()
    }
}

fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|raw| !raw.is_empty() && raw != "0" && !raw.eq_ignore_ascii_case("false"))
}

fn parse_status_forcelist(raw: &str) -> Vec<u16> {
    raw.split(',')
        .filter_map(|code| code.trim().parse().ok())
        .collect()
}
