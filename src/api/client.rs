//! Vendor-shaped client surface (spec.md §6's HTTP table).
//!
//! Every route here normalizes its vendor's request shape into
//! `Vec<ChatMessage>` + a model id, calls [`Router::handle`], and renders the
//! result back into that vendor's response envelope. Errors are mapped the
//! same way so `RateLimited`/`ModelUnavailable`/`AllAttemptsFailed`/generic
//! failures stay distinguishable per spec.md §7's propagation policy.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::client_auth::{auth_rate_limit_middleware, AuthedRequest};
use crate::backends::ChatMessage;
use crate::error::{AppError, ErrorKind};
use crate::gateway::GatewayState;
use crate::router::HandleResult;
use crate::traffic::TrafficEntry;

/// Builds every vendor router group enabled in `state.config.vendor_routes`,
/// plus the unauthenticated catalog endpoint, merged under one app.
pub fn router(state: Arc<GatewayState>) -> Router {
    let mut chat_routes = Router::new();
    let vendors = &state.config.vendor_routes;

    if vendors.openai {
        chat_routes = chat_routes.route("/v1/chat/completions", post(openai_chat_completions));
    }
    if vendors.azure {
        chat_routes = chat_routes.route(
            "/openai/deployments/{id}/chat/completions",
            post(azure_chat_completions),
        );
    }
    if vendors.anthropic {
        chat_routes = chat_routes.route("/anthropic/v3/messages", post(anthropic_messages));
    }
    if vendors.gemini {
        chat_routes = chat_routes.route(
            "/gemini/v2/models/{model_id}/generateContent",
            post(gemini_generate_content),
        );
    }
    if vendors.groq {
        chat_routes = chat_routes.route("/groq/v4/chat/completions", post(groq_chat_completions));
    }
    if vendors.openrouter {
        chat_routes = chat_routes.route("/openrouter/v6/chat/completions", post(openrouter_chat_completions));
    }
    if vendors.ollama {
        chat_routes = chat_routes.route("/ollama/v5/api/chat", post(ollama_chat));
    }

    let chat_routes = chat_routes.route_layer(axum::middleware::from_fn_with_state(
        Arc::clone(&state),
        auth_rate_limit_middleware,
    ));

    Router::new()
        .merge(chat_routes)
        .route("/api/v1/models", get(list_models))
        .with_state(state)
}

/// Shared dispatch path: calls the router, records the outcome in the
/// traffic log regardless of success/failure, and returns the result for
/// the caller to shape into its vendor envelope.
async fn dispatch(
    state: &GatewayState,
    authed: &AuthedRequest,
    route: &str,
    model_id: &str,
    messages: Vec<ChatMessage>,
) -> Result<HandleResult, AppError> {
    let result = state.router.handle(&messages, model_id, &authed.api_key).await;
    match &result {
        Ok(r) => state.traffic.push(TrafficEntry::new(route, model_id).success(&r.provider_id, r.latency_ms)),
        Err(e) => state.traffic.push(TrafficEntry::new(route, model_id).failure(e.message())),
    }
    result
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------
// OpenAI shape (shared by /v1, Azure, Groq, OpenRouter)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

fn openai_response(model: &str, result: &HandleResult) -> Value {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": now_epoch_secs(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": result.response},
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": result.input_tokens,
            "completion_tokens": result.output_tokens,
            "total_tokens": result.tokens_generated,
        }
    })
}

fn openai_style_error(err: AppError) -> Response {
    err.into_response()
}

async fn openai_chat_completions(
    State(state): State<Arc<GatewayState>>,
    Extension(authed): Extension<AuthedRequest>,
    Json(body): Json<OpenAiRequest>,
) -> Response {
    match dispatch(&state, &authed, "openai.chat.completions", &body.model, body.messages).await {
        Ok(result) => (StatusCode::OK, Json(openai_response(&body.model, &result))).into_response(),
        Err(e) => openai_style_error(e),
    }
}

async fn groq_chat_completions(
    state: State<Arc<GatewayState>>,
    authed: Extension<AuthedRequest>,
    body: Json<OpenAiRequest>,
) -> Response {
    openai_chat_completions(state, authed, body).await
}

// ---------------------------------------------------------------------
// Azure-shaped: model comes from the path, not the body.
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AzureRequest {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AzureQuery {
    #[serde(rename = "api-version")]
    api_version: Option<String>,
}

async fn azure_chat_completions(
    State(state): State<Arc<GatewayState>>,
    Extension(authed): Extension<AuthedRequest>,
    Path(model_id): Path<String>,
    Query(query): Query<AzureQuery>,
    Json(body): Json<AzureRequest>,
) -> Response {
    if query.api_version.as_deref().unwrap_or("").is_empty() {
        return AppError::bad_request("missing required query parameter 'api-version'").into_response();
    }

    match dispatch(&state, &authed, "azure.chat.completions", &model_id, body.messages).await {
        Ok(result) => (StatusCode::OK, Json(openai_response(&model_id, &result))).into_response(),
        Err(e) => openai_style_error(e),
    }
}

// ---------------------------------------------------------------------
// Anthropic shape
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    system: Option<String>,
}

fn anthropic_response(model: &str, result: &HandleResult) -> Value {
    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{"type": "text", "text": result.response}],
        "stop_reason": "end_turn",
        "usage": {
            "input_tokens": result.input_tokens,
            "output_tokens": result.output_tokens,
        }
    })
}

fn anthropic_error_response(err: AppError) -> Response {
    let status = err.kind().status();
    let body = json!({
        "type": "error",
        "error": {"type": anthropic_kind_str(err.kind()), "message": err.message()},
    });
    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = err.retry_after_secs() {
        if let Ok(v) = axum::http::HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(axum::http::header::RETRY_AFTER, v);
        }
    }
    response
}

fn anthropic_kind_str(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::BadRequest => "invalid_request_error",
        ErrorKind::Unauthenticated => "authentication_error",
        ErrorKind::Forbidden => "permission_error",
        ErrorKind::Conflict => "invalid_request_error",
        ErrorKind::RateLimited => "rate_limit_error",
        ErrorKind::QuotaExceeded => "rate_limit_error",
        ErrorKind::ModelUnavailable => "not_found_error",
        ErrorKind::UpstreamError | ErrorKind::AllAttemptsFailed => "api_error",
        ErrorKind::StateStoreError | ErrorKind::UnknownTier | ErrorKind::Internal => "api_error",
    }
}

async fn anthropic_messages(
    State(state): State<Arc<GatewayState>>,
    Extension(authed): Extension<AuthedRequest>,
    Json(body): Json<AnthropicRequest>,
) -> Response {
    let mut messages = Vec::with_capacity(body.messages.len() + 1);
    if let Some(system) = body.system {
        messages.push(ChatMessage { role: "system".to_string(), content: system });
    }
    messages.extend(body.messages);

    match dispatch(&state, &authed, "anthropic.messages", &body.model, messages).await {
        Ok(result) => (StatusCode::OK, Json(anthropic_response(&body.model, &result))).into_response(),
        Err(e) => anthropic_error_response(e),
    }
}

// ---------------------------------------------------------------------
// Gemini shape
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

fn from_gemini_contents(contents: Vec<GeminiContent>) -> Vec<ChatMessage> {
    contents
        .into_iter()
        .map(|c| {
            let role = match c.role.as_deref() {
                Some("model") => "assistant",
                Some("system") => "system",
                _ => "user",
            };
            let content = c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");
            ChatMessage { role: role.to_string(), content }
        })
        .collect()
}

fn gemini_response(result: &HandleResult) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": result.response}]},
            "finishReason": "STOP",
            "index": 0,
        }],
        "usageMetadata": {
            "promptTokenCount": result.input_tokens,
            "candidatesTokenCount": result.output_tokens,
            "totalTokenCount": result.tokens_generated,
        }
    })
}

fn gemini_error_response(err: AppError) -> Response {
    let status = err.kind().status();
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": err.message(),
            "status": gemini_status_str(err.kind()),
        }
    });
    (status, Json(body)).into_response()
}

fn gemini_status_str(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::BadRequest => "INVALID_ARGUMENT",
        ErrorKind::Unauthenticated => "UNAUTHENTICATED",
        ErrorKind::Forbidden => "PERMISSION_DENIED",
        ErrorKind::Conflict => "ALREADY_EXISTS",
        ErrorKind::RateLimited | ErrorKind::QuotaExceeded => "RESOURCE_EXHAUSTED",
        ErrorKind::ModelUnavailable => "NOT_FOUND",
        ErrorKind::UpstreamError => "UNAVAILABLE",
        ErrorKind::AllAttemptsFailed => "UNAVAILABLE",
        ErrorKind::StateStoreError | ErrorKind::UnknownTier | ErrorKind::Internal => "INTERNAL",
    }
}

async fn gemini_generate_content(
    State(state): State<Arc<GatewayState>>,
    Extension(authed): Extension<AuthedRequest>,
    Path(model_id): Path<String>,
    Json(body): Json<GeminiRequest>,
) -> Response {
    let messages = from_gemini_contents(body.contents);
    match dispatch(&state, &authed, "gemini.generateContent", &model_id, messages).await {
        Ok(result) => (StatusCode::OK, Json(gemini_response(&result))).into_response(),
        Err(e) => gemini_error_response(e),
    }
}

// ---------------------------------------------------------------------
// OpenRouter: OpenAI-shaped, but the model id may carry a vendor prefix
// that must be stripped before internal routing (spec.md §6).
// ---------------------------------------------------------------------

async fn openrouter_chat_completions(
    State(state): State<Arc<GatewayState>>,
    Extension(authed): Extension<AuthedRequest>,
    Json(body): Json<OpenAiRequest>,
) -> Response {
    let internal_model = body.model.rsplit('/').next().unwrap_or(&body.model);

    match dispatch(&state, &authed, "openrouter.chat.completions", internal_model, body.messages).await {
        Ok(result) => (StatusCode::OK, Json(openai_response(&body.model, &result))).into_response(),
        Err(e) => openai_style_error(e),
    }
}

// ---------------------------------------------------------------------
// Ollama shape
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

fn ollama_response(model: &str, result: &HandleResult) -> Value {
    json!({
        "model": model,
        "created_at": chrono::Utc::now().to_rfc3339(),
        "message": {"role": "assistant", "content": result.response},
        "done": true,
        "total_duration": (result.latency_ms * 1_000_000.0) as u64,
        "eval_count": result.output_tokens,
        "prompt_eval_count": result.input_tokens,
    })
}

async fn ollama_chat(
    State(state): State<Arc<GatewayState>>,
    Extension(authed): Extension<AuthedRequest>,
    Json(body): Json<OllamaRequest>,
) -> Response {
    match dispatch(&state, &authed, "ollama.chat", &body.model, body.messages).await {
        Ok(result) => (StatusCode::OK, Json(ollama_response(&body.model, &result))).into_response(),
        Err(e) => openai_style_error(e),
    }
}

// ---------------------------------------------------------------------
// Catalog (no auth required)
// ---------------------------------------------------------------------

async fn list_models(State(state): State<Arc<GatewayState>>) -> Response {
    let catalog = state.store.load_catalog().await;
    (StatusCode::OK, Json(catalog)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openrouter_strips_vendor_prefix() {
        let model = "openai/gpt-3.5-turbo";
        let internal = model.rsplit('/').next().unwrap_or(model);
        assert_eq!(internal, "gpt-3.5-turbo");
    }

    #[test]
    fn openrouter_leaves_unprefixed_model_unchanged() {
        let model = "gpt-3.5-turbo";
        let internal = model.rsplit('/').next().unwrap_or(model);
        assert_eq!(internal, "gpt-3.5-turbo");
    }

    #[test]
    fn gemini_contents_map_model_role_to_assistant() {
        let contents = vec![GeminiContent { role: Some("model".to_string()), parts: vec![GeminiPart { text: "ack".to_string() }] }];
        let messages = from_gemini_contents(contents);
        assert_eq!(messages[0].role, "assistant");
        assert_eq!(messages[0].content, "ack");
    }

    #[test]
    fn gemini_contents_default_role_is_user() {
        let contents = vec![GeminiContent { role: None, parts: vec![GeminiPart { text: "hi".to_string() }] }];
        let messages = from_gemini_contents(contents);
        assert_eq!(messages[0].role, "user");
    }
}
