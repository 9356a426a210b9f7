//! WebSocket surface (spec.md §6's `/ws`).
//!
//! One JSON-tagged message per text frame. The first message after connect
//! must be `{type:"auth", apiKey}`; every other message type is rejected
//! with a protocol error until auth succeeds. After that, `chat` messages
//! take the router the same arguments as the REST routes and rate limiting
//! applies uniformly (spec.md §6, §4.6) — this handler reuses
//! [`crate::rate_limit::RateLimiter`] and [`crate::auth::Auth`] directly
//! rather than going through the HTTP-only middleware in
//! [`crate::api::client_auth`].

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::backends::ChatMessage;
use crate::gateway::GatewayState;
use crate::model::{Role, TierLimits};
use crate::rate_limit::{now_ms, Window};

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Auth {
        #[serde(rename = "apiKey")]
        api_key: String,
    },
    Chat {
        model: String,
        messages: Vec<ChatMessage>,
        #[serde(default)]
        stream: bool,
    },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "auth.ok")]
    AuthOk { tier: String, role: Role },
    #[serde(rename = "chat.start")]
    ChatStart {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    #[serde(rename = "chat.delta")]
    ChatDelta {
        id: String,
        model: String,
        choices: Vec<DeltaChoice>,
    },
    #[serde(rename = "chat.complete")]
    ChatComplete {
        id: String,
        model: String,
        #[serde(rename = "requestId")]
        request_id: String,
        choices: Vec<CompleteChoice>,
        usage: Usage,
    },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong,
}

#[derive(Debug, Serialize)]
struct DeltaChoice {
    index: u32,
    delta: serde_json::Value,
    #[serde(rename = "finishReason", skip_serializing_if = "Option::is_none")]
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct CompleteChoice {
    index: u32,
    message: ChatMessage,
    #[serde(rename = "finishReason")]
    finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
struct Usage {
    #[serde(rename = "promptTokens")]
    prompt_tokens: u64,
    #[serde(rename = "completionTokens")]
    completion_tokens: u64,
    #[serde(rename = "totalTokens")]
    total_tokens: u64,
}

/// A chat response is split into roughly this many characters per streamed
/// delta frame. The upstream adapters never return partial text, so
/// "streaming" here means chunking the final response — consistent with
/// spec.md §9's framing of the WS streaming path as pass-through framing
/// over whatever the upstream call produced.
const STREAM_CHUNK_CHARS: usize = 24;

struct Authed {
    api_key: String,
    tier: TierLimits,
    #[allow(dead_code)]
    role: Role,
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut authed: Option<Authed> = None;

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                let Ok(client_message) = parsed else {
                    let _ = send(&mut sender, &ServerMessage::Error {
                        code: "bad_request".to_string(),
                        message: "malformed message".to_string(),
                        request_id: None,
                    }).await;
                    continue;
                };

                match client_message {
                    ClientMessage::Auth { api_key } => {
                        authed = try_auth(&state, api_key, &mut sender).await;
                    }
                    ClientMessage::Ping => {
                        let _ = send(&mut sender, &ServerMessage::Pong).await;
                    }
                    ClientMessage::Chat { model, messages, stream } => {
                        let Some(auth_state) = authed.as_ref() else {
                            let _ = send(&mut sender, &ServerMessage::Error {
                                code: "unauthenticated".to_string(),
                                message: "send {type:\"auth\"} before any other message".to_string(),
                                request_id: None,
                            }).await;
                            continue;
                        };

                        handle_chat(&state, auth_state, model, messages, stream, &mut sender).await;
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(data) => {
                let _ = sender.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }
}

async fn try_auth(
    state: &Arc<GatewayState>,
    api_key: String,
    sender: &mut (impl SinkExt<Message> + Unpin),
) -> Option<Authed> {
    match state.auth.validate(&api_key).await {
        Ok(resolved) => {
            let tier_name = resolved.user.tier.clone();
            let role = resolved.user.role;
            let _ = send(sender, &ServerMessage::AuthOk { tier: tier_name, role }).await;
            Some(Authed { api_key, tier: resolved.tier, role })
        }
        Err(e) => {
            let _ = send(sender, &ServerMessage::Error {
                code: "unauthenticated".to_string(),
                message: e.message().to_string(),
                request_id: None,
            }).await;
            None
        }
    }
}

async fn handle_chat(
    state: &Arc<GatewayState>,
    auth_state: &Authed,
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    sender: &mut (impl SinkExt<Message> + Unpin),
) {
    let request_id = Uuid::new_v4().to_string();

    if let Err((window, retry_after)) = state.rate_limiter.check(&auth_state.api_key, &auth_state.tier, now_ms()) {
        let _ = send(sender, &ServerMessage::Error {
            code: "rate_limited".to_string(),
            message: format!("{}; retry after {retry_after}s", window_message(window)),
            request_id: Some(request_id),
        }).await;
        return;
    }

    let _ = send(sender, &ServerMessage::ChatStart { request_id: request_id.clone() }).await;

    let result = state.router.handle(&messages, &model, &auth_state.api_key).await;
    let route = if stream { "ws.chat.stream" } else { "ws.chat" };
    match &result {
        Ok(r) => state.traffic.push(crate::traffic::TrafficEntry::new(route, &model).success(&r.provider_id, r.latency_ms)),
        Err(e) => state.traffic.push(crate::traffic::TrafficEntry::new(route, &model).failure(e.message())),
    }

    match result {
        Ok(r) => {
            let id = format!("chatcmpl-{}", Uuid::new_v4());
            if stream {
                for chunk in chunk_text(&r.response, STREAM_CHUNK_CHARS) {
                    let msg = ServerMessage::ChatDelta {
                        id: id.clone(),
                        model: model.clone(),
                        choices: vec![DeltaChoice { index: 0, delta: json!({"content": chunk}), finish_reason: None }],
                    };
                    if send(sender, &msg).await.is_err() {
                        return;
                    }
                }
                let finish = ServerMessage::ChatDelta {
                    id,
                    model: model.clone(),
                    choices: vec![DeltaChoice { index: 0, delta: json!({}), finish_reason: Some("stop") }],
                };
                let _ = send(sender, &finish).await;
            } else {
                let complete = ServerMessage::ChatComplete {
                    id,
                    model: model.clone(),
                    request_id,
                    choices: vec![CompleteChoice {
                        index: 0,
                        message: ChatMessage { role: "assistant".to_string(), content: r.response },
                        finish_reason: "stop",
                    }],
                    usage: Usage {
                        prompt_tokens: r.input_tokens,
                        completion_tokens: r.output_tokens,
                        total_tokens: r.tokens_generated,
                    },
                };
                let _ = send(sender, &complete).await;
            }
        }
        Err(e) => {
            let _ = send(sender, &ServerMessage::Error {
                code: error_code(e.kind()),
                message: e.message().to_string(),
                request_id: Some(request_id),
            }).await;
        }
    }
}

fn error_code(kind: crate::error::ErrorKind) -> String {
    use crate::error::ErrorKind::*;
    match kind {
        BadRequest => "bad_request",
        Unauthenticated => "unauthenticated",
        Forbidden => "forbidden",
        Conflict => "conflict",
        RateLimited => "rate_limited",
        QuotaExceeded => "quota_exceeded",
        ModelUnavailable => "model_unavailable",
        UpstreamError => "upstream_error",
        AllAttemptsFailed => "all_attempts_failed",
        StateStoreError => "state_store_error",
        UnknownTier => "unknown_tier",
        Internal => "internal",
    }
    .to_string()
}

fn window_message(window: Window) -> &'static str {
    match window {
        Window::Second => "rate limit exceeded (per-second)",
        Window::Minute => "rate limit exceeded (per-minute)",
        Window::Day => "rate limit exceeded (per-day)",
    }
}

fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(chunk_chars).map(|c| c.iter().collect()).collect()
}

async fn send(
    sender: &mut (impl SinkExt<Message> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(message).map_err(|_| ())?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_splits_by_char_count() {
        let chunks = chunk_text("abcdefgh", 3);
        assert_eq!(chunks, vec!["abc", "def", "gh"]);
    }

    #[test]
    fn chunk_text_handles_empty_string() {
        assert_eq!(chunk_text("", 3), vec![""]);
    }
}
