//! Unified error type for axum request handlers.
//!
//! The teacher's `AppError` was a thin wrapper around [`anyhow::Error`] that
//! always rendered as `500`. A gateway that must preserve vendor-specific
//! error semantics (rate limits vs. quota vs. no-provider-available) needs
//! more: [`AppError`] here additionally carries an [`ErrorKind`] so every
//! vendor-shaped wrapper (`api::openai`, `api::anthropic`, ...) can map the
//! same internal failure onto its own error envelope without re-deriving the
//! HTTP status from the message text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Machine-readable error classification (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthenticated,
    Forbidden,
    Conflict,
    RateLimited,
    QuotaExceeded,
    ModelUnavailable,
    UpstreamError,
    AllAttemptsFailed,
    StateStoreError,
    /// A user's `tier` names no entry in the tier table (spec §4.7) — a
    /// server-side configuration gap, not a malformed caller request.
    UnknownTier,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited | Self::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::ModelUnavailable => StatusCode::NOT_FOUND,
            Self::UpstreamError => StatusCode::BAD_GATEWAY,
            Self::AllAttemptsFailed => StatusCode::SERVICE_UNAVAILABLE,
            Self::StateStoreError | Self::UnknownTier | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wraps an error message with its [`ErrorKind`] so axum handlers can return
/// `Result<T, AppError>` and propagate with `?`, while vendor wrappers can
/// still branch on `kind()`.
#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    /// Set when `kind == RateLimited` or a retryable `QuotaExceeded`; seconds
    /// until the caller should retry.
    retry_after_secs: Option<u64>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), retry_after_secs: None }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_secs
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelUnavailable, msg)
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamError, msg)
    }

    pub fn all_attempts_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AllAttemptsFailed, msg)
    }

    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateStoreError, msg)
    }

    pub fn unknown_tier(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownTier, msg)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(kind = ?self.kind, error = %self.message, "request failed");

        let mut response = (
            self.kind.status(),
            Json(json!({
                "error": {
                    "message": self.message,
                    "type": kind_str(self.kind),
                }
            })),
        )
            .into_response();

        if let Some(secs) = self.retry_after_secs {
            if let Ok(v) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, v);
            }
        }

        response
    }
}

fn kind_str(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::BadRequest => "bad_request",
        ErrorKind::Unauthenticated => "unauthenticated",
        ErrorKind::Forbidden => "forbidden",
        ErrorKind::Conflict => "conflict",
        ErrorKind::RateLimited => "rate_limited",
        ErrorKind::QuotaExceeded => "quota_exceeded",
        ErrorKind::ModelUnavailable => "model_unavailable",
        ErrorKind::UpstreamError => "upstream_error",
        ErrorKind::AllAttemptsFailed => "all_attempts_failed",
        ErrorKind::StateStoreError => "state_store_error",
        ErrorKind::UnknownTier => "unknown_tier",
        ErrorKind::Internal => "internal",
    }
}

/// Any `Into<anyhow::Error>` (io::Error, reqwest::Error, serde_json::Error,
/// ...) converts into an opaque `Internal` [`AppError`] — the idiomatic axum
/// fallback for errors that never reach a caller-facing vendor envelope.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self::new(ErrorKind::Internal, e.into().to_string())
    }
}
