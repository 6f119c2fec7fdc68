//! Error types shared by the Timegrid client crates.

use thiserror::Error;

use crate::identifier::Identifier;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the Timegrid client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid granularity: {0}")]
    InvalidGranularity(String),

    #[error("invalid datapoint: {0}")]
    InvalidDatapoint(String),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server error {status}: {message}{}", format_request_id(.request_id))]
    ServerError {
        status: u16,
        code: Option<i64>,
        message: String,
        request_id: Option<String>,
    },

    #[error("client error {status}: {message}{}", format_request_id(.request_id))]
    ClientError {
        status: u16,
        code: Option<i64>,
        message: String,
        request_id: Option<String>,
    },

    #[error(
        "partial write failure: {} of {} request bodies failed",
        .failed.len(),
        .failed.len() + .succeeded.len()
    )]
    PartialWriteFailure {
        succeeded: Vec<WriteBinSummary>,
        failed: Vec<FailedWriteBin>,
    },

    #[error("json (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request body compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

impl Error {
    fn http_status(&self) -> Option<u16> {
        match self {
            Error::ClientError { status, .. } | Error::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.http_status() == Some(401)
    }

    pub fn is_forbidden(&self) -> bool {
        self.http_status() == Some(403)
    }

    pub fn is_not_found(&self) -> bool {
        self.http_status() == Some(404)
    }

    /// True when the server kept rate-limiting after all retries were spent.
    pub fn is_rate_limited(&self) -> bool {
        self.http_status() == Some(429)
    }
}

fn format_request_id(request_id: &Option<String>) -> String {
    match request_id {
        Some(id) => format!(" (request id: {id})"),
        None => String::new(),
    }
}

/// Contents of one write request body, reported in write outcomes.
#[derive(Debug, Clone)]
pub struct WriteBinSummary {
    /// Identifiers whose datapoint slices were packed into the body.
    pub series: Vec<Identifier>,
    /// Total datapoints in the body.
    pub datapoint_count: usize,
}

/// A write request body that did not reach the server.
#[derive(Debug, Clone)]
pub struct FailedWriteBin {
    pub summary: WriteBinSummary,
    pub reason: String,
}
