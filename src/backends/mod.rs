//! Upstream clients (spec.md §4.4, component C4).
//!
//! Every adapter is stateless and exposes one operation: send the
//! conversation to the vendor endpoint and return `{text, latencyMs}` or a
//! single `UpstreamError`. The router selects an adapter by
//! [`crate::model::ProviderKind`] rather than a class hierarchy, per spec.md
//! §9's design note, and treats both uniformly through the [`UpstreamClient`]
//! trait.

mod generic;
mod google;

pub use generic::GenericAdapter;
pub use google::GoogleAdapter;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;
use crate::model::ProviderKind;

/// Connect/read timeout applied to every upstream call (spec.md §5).
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// The result of one successful upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub text: String,
    pub latency_ms: f64,
}

/// One chat message in the internal representation the router and every
/// vendor-shaped wrapper normalize into.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Sends `messages` to `model_id` and returns the completion text and the
    /// measured wall-clock latency in milliseconds.
    async fn send(&self, messages: &[ChatMessage], model_id: &str) -> Result<UpstreamResponse, AppError>;
}

/// Builds the adapter for a provider's declared [`ProviderKind`].
pub fn adapter_for(kind: ProviderKind, endpoint_url: &str, api_key: Option<&str>) -> Box<dyn UpstreamClient> {
    match kind {
        ProviderKind::Generic => Box::new(GenericAdapter::new(endpoint_url, api_key)),
        ProviderKind::Google => Box::new(GoogleAdapter::new(endpoint_url, api_key)),
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .connect_timeout(UPSTREAM_TIMEOUT)
        .build()
        .expect("building the shared reqwest client never fails with this configuration")
}

/// Extracts the first choice/candidate's text from a vendor JSON body using a
/// small list of known shapes, so both adapters can share one best-effort
/// extraction path instead of duplicating `Value` navigation.
fn extract_text(body: &Value) -> Option<String> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            body.get("candidates")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("content"))
                .and_then(|c| c.get("parts"))
                .and_then(|p| p.get(0))
                .and_then(|p| p.get("text"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_openai_shaped_text() {
        let body = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_text(&body), Some("hi".to_string()));
    }

    #[test]
    fn extracts_google_shaped_text() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]});
        assert_eq!(extract_text(&body), Some("hi".to_string()));
    }

    #[test]
    fn missing_shape_returns_none() {
        let body = json!({"unexpected": true});
        assert_eq!(extract_text(&body), None);
    }
}
