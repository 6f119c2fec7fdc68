//! Authenticated HTTP session.
//!
//! All endpoint calls go through [`ApiSession::post_json`], which adds the
//! auth and caller-identification headers, gzips large request bodies,
//! retries retriable statuses with exponential backoff, and decodes the
//! platform's `{"error": {"code", "message"}}` envelope on failure.

use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::{Client, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use timegrid_core::{Error, Result};

use crate::config::Config;

/// Request bodies below this size are not worth compressing.
const GZIP_MIN_BYTES: usize = 1024;

/// An authenticated session against one Timegrid project.
///
/// The session owns the connection pool and is shared across all fetch and
/// write workers; it is cheap to clone behind an `Arc`.
pub struct ApiSession {
    config: Config,
    http_client: Client,
}

impl ApiSession {
    pub fn new(config: Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.max_connection_pool_size)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.project,
            path.trim_start_matches('/')
        )
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        idempotent: bool,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.post_raw(path, body, idempotent, cancel).await?;
        serde_json::from_str(&text).map_err(Error::from)
    }

    /// POST a JSON body, discarding the response payload.
    pub async fn post_json_discard<B>(
        &self,
        path: &str,
        body: &B,
        idempotent: bool,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        self.post_raw(path, body, idempotent, cancel).await.map(drop)
    }

    async fn post_raw<B>(
        &self,
        path: &str,
        body: &B,
        idempotent: bool,
        cancel: &CancellationToken,
    ) -> Result<String>
    where
        B: Serialize + ?Sized,
    {
        let url = self.api_url(path);
        let payload = serde_json::to_vec(body)?;
        let gzipped = !self.config.disable_gzip && payload.len() >= GZIP_MIN_BYTES;
        let payload = if gzipped { gzip(&payload)? } else { payload };
        let can_retry = idempotent || self.config.retry_writes;

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            debug!("POST {}", url);
            let mut request = self
                .http_client
                .post(&url)
                .header("api-key", &self.config.api_key)
                .header("x-timegrid-app", &self.config.client_name)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ACCEPT, "application/json");
            if gzipped {
                request = request.header(header::CONTENT_ENCODING, "gzip");
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = request.body(payload.clone()).send() => result.map_err(from_reqwest)?,
            };

            let status = response.status();
            let request_id = response
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let text = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = response.text() => result.map_err(from_reqwest)?,
            };

            if status.is_success() {
                return Ok(text);
            }

            let should_retry = can_retry
                && attempt < self.config.max_retries
                && self.config.retry_status_codes.contains(&status.as_u16());
            if should_retry {
                let delay = backoff_delay(attempt, self.config.max_retry_backoff_secs);
                warn!(
                    "HTTP {} from {}, retrying in {:?}",
                    status.as_u16(),
                    url,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
                continue;
            }

            return Err(decode_error(status, request_id, &text));
        }
    }
}

fn from_reqwest(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout
    } else {
        Error::Transport(error)
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn backoff_delay(attempt: u32, max_backoff_secs: u64) -> Duration {
    let exponential = Duration::from_millis(500u64.saturating_mul(1 << attempt.min(16)));
    exponential.min(Duration::from_secs(max_backoff_secs))
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

fn decode_error(status: StatusCode, request_id: Option<String>, body: &str) -> Error {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope.error.code,
            envelope
                .error
                .message
                .unwrap_or_else(|| body.trim().to_string()),
        ),
        Err(_) => (None, body.trim().to_string()),
    };
    if status.is_server_error() {
        Error::ServerError {
            status: status.as_u16(),
            code,
            message,
            request_id,
        }
    } else {
        Error::ClientError {
            status: status.as_u16(),
            code,
            message,
            request_id,
        }
    }
}
