//! Auth + rate-limit middleware for the vendor-shaped chat routes.
//!
//! Spec.md §2's flow is "(auth → rate-check → body-extract) → Router"; this
//! middleware runs the first two steps once, uniformly, ahead of every
//! vendor handler, so `api::client`'s handlers only need to worry about
//! wire-shape translation. [`Router::handle`] still re-validates the key
//! internally (spec.md §4.5 step 1) — that's intentional defense in depth,
//! not redundant plumbing: the WebSocket path calls `Router::handle`
//! directly and must get the same guarantee without going through this
//! middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::{AppError, ErrorKind};
use crate::gateway::GatewayState;
use crate::model::{TierLimits, UserRecord};
use crate::rate_limit::{now_ms, Window};

/// The caller's resolved identity, injected as a request extension by
/// [`auth_rate_limit_middleware`] so handlers don't re-resolve it.
#[derive(Clone)]
pub struct AuthedRequest {
    pub api_key: String,
    pub user: UserRecord,
    pub tier: TierLimits,
}

/// Checks each vendor's documented header in turn (spec.md §6's auth-header
/// column) and returns the first API key found. Accepting any of them on
/// every route is a harmless generalization — a caller only ever sends the
/// header their vendor wrapper expects.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }
    for name in ["api-key", "x-api-key", "x-goog-api-key"] {
        if let Some(v) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn window_message(window: Window) -> &'static str {
    match window {
        Window::Second => "rate limit exceeded (per-second)",
        Window::Minute => "rate limit exceeded (per-minute)",
        Window::Day => "rate limit exceeded (per-day)",
    }
}

pub async fn auth_rate_limit_middleware(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(api_key) = extract_api_key(req.headers()) else {
        return AppError::new(ErrorKind::Unauthenticated, "missing API key").into_response();
    };

    let resolved = match state.auth.validate(&api_key).await {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    if let Err((window, retry_after)) = state.rate_limiter.check(&api_key, &resolved.tier, now_ms()) {
        return AppError::new(ErrorKind::RateLimited, window_message(window))
            .with_retry_after(retry_after)
            .into_response();
    }

    req.extensions_mut().insert(AuthedRequest { api_key, user: resolved.user, tier: resolved.tier });
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_bearer_over_other_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        headers.insert("x-api-key", HeaderValue::from_static("other"));
        assert_eq!(extract_api_key(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn falls_back_to_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("anthropic-key"));
        assert_eq!(extract_api_key(&headers), Some("anthropic-key".to_string()));
    }

    #[test]
    fn falls_back_to_x_goog_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_static("gemini-key"));
        assert_eq!(extract_api_key(&headers), Some("gemini-key".to_string()));
    }

    #[test]
    fn no_recognized_header_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);
    }
}
