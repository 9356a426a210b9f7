//! Google-shaped (Gemini `generateContent`) adapter.
//!
//! Safety settings and generation config are sent with conservative defaults
//! since the internal chat representation carries no per-request knobs for
//! them; a future admin-configurable override would live on `ProviderRecord`.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::error::AppError;

use super::{extract_text, http_client, ChatMessage, UpstreamClient, UpstreamResponse};

pub struct GoogleAdapter {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: Option<String>,
}

impl GoogleAdapter {
    pub fn new(endpoint_url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: http_client(),
            endpoint_url: endpoint_url.to_string(),
            api_key: api_key.map(str::to_string),
        }
    }

    fn url_for(&self, model_id: &str) -> String {
        // endpoint_url already carries the `:generateContent` suffix and
        // model segment for most deployments; if it doesn't, append one.
        if self.endpoint_url.contains("generateContent") {
            self.endpoint_url.clone()
        } else {
            format!("{}/models/{model_id}:generateContent", self.endpoint_url.trim_end_matches('/'))
        }
    }
}

/// Maps the internal `{role, content}` shape onto Gemini's `contents[].parts[].text`,
/// collapsing `system` messages into the first `user` turn since Gemini has
/// no first-class system role in the generateContent body.
fn to_google_contents(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    let mut system_preamble = String::new();
    let mut contents = Vec::new();

    for m in messages {
        if m.role == "system" {
            if !system_preamble.is_empty() {
                system_preamble.push('\n');
            }
            system_preamble.push_str(&m.content);
            continue;
        }

        let role = if m.role == "assistant" { "model" } else { "user" };
        let text = if contents.is_empty() && !system_preamble.is_empty() && role == "user" {
            format!("{system_preamble}\n{}", m.content)
        } else {
            m.content.clone()
        };

        contents.push(json!({
            "role": role,
            "parts": [{"text": text}],
        }));
    }

    contents
}

#[async_trait]
impl UpstreamClient for GoogleAdapter {
    async fn send(&self, messages: &[ChatMessage], model_id: &str) -> Result<UpstreamResponse, AppError> {
        let body = json!({
            "contents": to_google_contents(messages),
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
            ],
            "generationConfig": {
                "temperature": 0.7,
                "topP": 0.95,
            },
        });

        let mut request = self.client.post(self.url_for(model_id)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key);
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
            .ok_or_else(|| AppError::upstream("upstream response did not contain a candidate"))?;

        Ok(UpstreamResponse { text, latency_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_folds_into_first_user_turn() {
        let messages = vec![
            ChatMessage { role: "system".into(), content: "be terse".into() },
            ChatMessage { role: "user".into(), content: "hello".into() },
        ];
        let contents = to_google_contents(&messages);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "be terse\nhello");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let messages = vec![ChatMessage { role: "assistant".into(), content: "ack".into() }];
        let contents = to_google_contents(&messages);
        assert_eq!(contents[0]["role"], "model");
    }

    #[test]
    fn url_for_appends_model_segment_when_missing_suffix() {
        let adapter = GoogleAdapter::new("https://generativelanguage.googleapis.com/v1beta", None);
        assert_eq!(
            adapter.url_for("gemini-1.5-pro"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }
}
