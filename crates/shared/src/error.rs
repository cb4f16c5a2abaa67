//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC7807 Problem Details (application/problem+json)
///
/// The marketplace backend answers failed `/api/*` calls with this envelope.
/// The client only reads it to produce a useful log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    #[serde(default)]
    pub title: String,
    /// HTTP status code.
    #[serde(default)]
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

fn problem_or_body(body: &str) -> String {
    try_problem_detail(body).unwrap_or_else(|| body.to_string())
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {}", problem_or_body(.body))]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// True for 401/403 responses, i.e. the session credential was refused.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Http { status: 401 | 403, .. })
    }
}

/// Errors produced while decoding a STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown STOMP command '{0}'")]
    UnknownCommand(String),
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
    #[error("invalid escape sequence in '{0}'")]
    InvalidEscape(String),
    #[error("frame is not NUL terminated")]
    MissingTerminator,
    #[error("content-length {declared} exceeds body of {actual} bytes")]
    ContentLength { declared: usize, actual: usize },
}

/// Failure to establish or keep a broker link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("STOMP handshake failed: {0}")]
    Handshake(String),
    #[error("broker rejected the connection: {0}")]
    Rejected(String),
    #[error("link is closed")]
    Closed,
}

/// Rejected category-request state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("request is already {0} and cannot change")]
    Terminal(crate::models::CategoryRequestStatus),
    #[error("a rejection needs a non-empty reason")]
    MissingReason,
}

/// Why an admin action on a category request was not carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryActionError {
    #[error("category request {0} is not loaded")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Api(#[from] ApiError),
}
