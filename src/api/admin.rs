//! Admin surface (spec.md §6): provider lifecycle, key issuance, and the
//! ambient traffic introspection endpoint (SPEC_FULL §10).
//!
//! Every route here is mounted behind [`crate::api::admin_auth`] and never
//! touches the rate limiter — spec.md scopes per-tier limits to caller-facing
//! traffic, not operators.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::gateway::GatewayState;
use crate::model::{ModelStats, ProviderKind, ProviderRecord, Role};

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/admin/providers", post(add_provider))
        .route("/api/admin/users/generate-key", post(generate_key))
        .route("/api/admin/models/refresh-provider-counts", post(refresh_provider_counts))
        .route("/api/admin/traffic", get(traffic))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            crate::api::admin_auth::admin_auth_middleware,
        ))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AddProviderRequest {
    id: String,
    /// Base URL the provider's OpenAI-shaped (or Google-shaped) API lives
    /// under; `/models` is fetched from here to seed `ModelStats`, and the
    /// router calls `{providerBaseUrl}/chat/completions` for completions
    /// (verbatim for `kind: "google"`, whose adapter appends its own path).
    #[serde(rename = "providerBaseUrl")]
    provider_base_url: String,
    #[serde(rename = "apiKey", default)]
    api_key: Option<String>,
    #[serde(default)]
    kind: Option<ProviderKind>,
}

#[derive(Debug, Deserialize)]
struct UpstreamModelsResponse {
    data: Vec<UpstreamModelEntry>,
}

#[derive(Debug, Deserialize)]
struct UpstreamModelEntry {
    id: String,
}

/// `POST /api/admin/providers`: adds or updates a provider, per spec.md's
/// lifecycle note ("fetches `/models` from `providerBaseUrl` to seed
/// ModelStats"). A failed or unreachable `/models` fetch still adds the
/// provider — it starts with an empty model map, which simply makes it
/// ineligible for routing until a later refresh adds models another way.
async fn add_provider(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<AddProviderRequest>,
) -> Response {
    let kind = body.kind.unwrap_or_default();
    let endpoint_url = match kind {
        ProviderKind::Generic => format!("{}/chat/completions", body.provider_base_url.trim_end_matches('/')),
        ProviderKind::Google => body.provider_base_url.clone(),
    };

    let mut providers = state.store.load_providers().await;
    let mut record = providers
        .iter()
        .position(|p| p.id == body.id)
        .map(|idx| providers.remove(idx))
        .unwrap_or_else(|| ProviderRecord::new(&body.id, &endpoint_url, body.api_key.clone()));

    record.endpoint_url = endpoint_url;
    record.api_key = body.api_key.clone();
    record.kind = kind;

    match fetch_model_ids(&body.provider_base_url, body.api_key.as_deref()).await {
        Ok(model_ids) => {
            for model_id in model_ids {
                record.models.entry(model_id.clone()).or_insert_with(|| ModelStats::new(model_id, None));
            }
        }
        Err(e) => {
            tracing::warn!(provider_id = %body.id, error = %e, "could not fetch /models while adding provider");
        }
    }

    providers.push(record.clone());

    if !state.store.save_providers(&providers).await {
        return AppError::state_store("failed to persist the new provider").into_response();
    }

    (StatusCode::OK, Json(json!({"provider": record}))).into_response()
}

async fn fetch_model_ids(provider_base_url: &str, api_key: Option<&str>) -> anyhow::Result<Vec<String>> {
    let url = format!("{}/models", provider_base_url.trim_end_matches('/'));
    let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(10)).build()?;
    let mut request = client.get(&url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request.send().await?.error_for_status()?;
    let parsed: UpstreamModelsResponse = response.json().await?;
    Ok(parsed.data.into_iter().map(|m| m.id).collect())
}

#[derive(Debug, Deserialize)]
struct GenerateKeyRequest {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default = "default_role")]
    role: Role,
    tier: String,
}

fn default_role() -> Role {
    Role::User
}

async fn generate_key(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<GenerateKeyRequest>,
) -> Response {
    match state.auth.generate_key(&body.user_id, body.role, &body.tier).await {
        Ok(key) => (StatusCode::OK, Json(json!({"apiKey": key}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/admin/models/refresh-provider-counts`: runs C3's refresh
/// synchronously rather than via the usual fire-and-forget `tokio::spawn`
/// hook, so the caller's response reflects the refreshed catalog.
async fn refresh_provider_counts(State(state): State<Arc<GatewayState>>) -> Response {
    crate::registry::refresh_catalog(&state.store).await;
    let catalog = state.store.load_catalog().await;
    (StatusCode::OK, Json(catalog)).into_response()
}

#[derive(Debug, Deserialize)]
struct TrafficQuery {
    limit: Option<usize>,
}

async fn traffic(State(state): State<Arc<GatewayState>>, Query(query): Query<TrafficQuery>) -> Response {
    let limit = query.limit.unwrap_or(50).min(500);
    let recent = state.traffic.recent(limit).await;
    let stats = state.traffic.stats().await;
    (StatusCode::OK, Json(json!({"recent": recent, "stats": stats}))).into_response()
}
