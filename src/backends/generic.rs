//! Vendor-agnostic chat-completions adapter.
//!
//! Covers every upstream whose wire format is the OpenAI `chat/completions`
//! shape — OpenAI itself, Azure OpenAI deployments, Groq, OpenRouter, and
//! Ollama's OpenAI-compat surface all normalize to this one adapter with just
//! a different `endpointUrl`/key, matching the teacher's
//! `OpenAIAdapter`/`OllamaAdapter` split collapsed into a single client since
//! the wire shape is identical.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::error::AppError;

use super::{extract_text, http_client, ChatMessage, UpstreamClient, UpstreamResponse};

pub struct GenericAdapter {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: Option<String>,
}

impl GenericAdapter {
    pub fn new(endpoint_url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: http_client(),
            endpoint_url: endpoint_url.to_string(),
            api_key: api_key.map(str::to_string),
        }
    }
}

#[async_trait]
impl UpstreamClient for GenericAdapter {
    async fn send(&self, messages: &[ChatMessage], model_id: &str) -> Result<UpstreamResponse, AppError> {
        let body = json!({
            "model": model_id,
            "messages": messages,
            "stream": false,
        });

        let mut request = self.client.post(&self.endpoint_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| AppError::upstream(format!("request to {} failed: {e}", self.endpoint_url)))?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("invalid response body: {e}")))?;

        if !status.is_success() {
            let message = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("upstream returned an error status");
            return Err(AppError::upstream(format!("{status}: {message}")));
        }

        let text = extract_text(&payload)
            .ok_or_else(|| AppError::upstream("upstream response did not contain a completion"))?;

        Ok(UpstreamResponse { text, latency_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_and_parses_a_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hi"}}]
            })))
            .mount(&server)
            .await;

        let adapter = GenericAdapter::new(&format!("{}/v1/chat/completions", server.uri()), Some("k"));
        let messages = vec![ChatMessage { role: "user".into(), content: "hello".into() }];
        let result = adapter.send(&messages, "gpt-3.5-turbo").await.unwrap();

        assert_eq!(result.text, "hi");
        assert!(result.latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn surfaces_vendor_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "rate limited upstream"}
            })))
            .mount(&server)
            .await;

        let adapter = GenericAdapter::new(&format!("{}/v1/chat/completions", server.uri()), None);
        let messages = vec![ChatMessage { role: "user".into(), content: "hello".into() }];
        let err = adapter.send(&messages, "gpt-3.5-turbo").await.unwrap_err();

        assert!(err.message().contains("rate limited upstream"));
    }
}
