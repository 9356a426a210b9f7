//! Admin-route authentication (spec.md §6: `/api/admin/*` requires an admin key).
//!
//! Unlike [`crate::api::client_auth`], admin routes are not rate-limited
//! (spec.md's rate limiter is scoped to the caller-facing tiers) but they do
//! require the resolved [`crate::model::Role::Admin`] role, per spec.md §7's
//! `Forbidden` kind ("403 non-admin at admin path").

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::client_auth::extract_api_key;
use crate::auth::Auth;
use crate::error::AppError;
use crate::gateway::GatewayState;
use crate::model::UserRecord;

/// The resolved admin caller, injected by [`admin_auth_middleware`].
#[derive(Clone)]
pub struct AdminCaller(pub UserRecord);

pub async fn admin_auth_middleware(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(api_key) = extract_api_key(req.headers()) else {
        return AppError::unauthenticated("missing API key").into_response();
    };

    let resolved = match state.auth.validate(&api_key).await {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = Auth::require_admin(&resolved.user) {
        return e.into_response();
    }

    req.extensions_mut().insert(AdminCaller(resolved.user));
    next.run(req).await
}
