//! Persisted data model (spec.md §3).
//!
//! These types are the on-disk/on-wire shape of the three state-store
//! documents (`providers`, `keys`, `models`) plus the static tier table. They
//! carry no behavior beyond serde derives and small constructors — the
//! statistics math lives in [`crate::stats`], the state-store contract in
//! [`crate::state`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One configured upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "endpointUrl")]
    pub endpoint_url: String,
    pub models: HashMap<String, ModelStats>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(rename = "avgResponseTimeMs", skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<f64>,
    #[serde(rename = "avgProviderLatencyMs", skip_serializing_if = "Option::is_none")]
    pub avg_provider_latency_ms: Option<f64>,
    #[serde(default)]
    pub errors: u64,
    #[serde(rename = "providerScore", skip_serializing_if = "Option::is_none")]
    pub provider_score: Option<i32>,
    /// Which upstream client shape this provider speaks. Not part of the
    /// distilled data model but needed to select an adapter without a class
    /// hierarchy (spec.md §9's "select by provider-id prefix or an explicit
    /// kind field" design note); defaults to the vendor-agnostic shape so
    /// existing providers documents deserialize unchanged.
    #[serde(default)]
    pub kind: ProviderKind,
}

/// Selects which [`crate::backends`] adapter handles a provider's traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Generic,
    Google,
}

impl ProviderRecord {
    pub fn new(id: impl Into<String>, endpoint_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            id: id.into(),
            api_key,
            endpoint_url: endpoint_url.into(),
            models: HashMap::new(),
            disabled: false,
            avg_response_time_ms: None,
            avg_provider_latency_ms: None,
            errors: 0,
            provider_score: None,
            kind: ProviderKind::Generic,
        }
    }

    /// Total requests recorded across all models on this provider, used by
    /// the error sub-score (successes + errors).
    pub fn total_requests(&self) -> u64 {
        self.models
            .values()
            .map(|m| m.response_times.len() as u64 + m.errors)
            .sum()
    }
}

/// Per-(provider, modelId) statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStats {
    pub id: String,
    #[serde(rename = "tokenGenerationSpeed")]
    pub token_generation_speed: f64,
    #[serde(rename = "responseTimes", default)]
    pub response_times: Vec<ResponseEntry>,
    #[serde(default)]
    pub errors: u64,
    #[serde(rename = "consecutiveErrors", default)]
    pub consecutive_errors: u32,
    #[serde(rename = "avgResponseTimeMs", skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<f64>,
    #[serde(rename = "avgProviderLatencyMs", skip_serializing_if = "Option::is_none")]
    pub avg_provider_latency_ms: Option<f64>,
    #[serde(rename = "avgTokenSpeed", skip_serializing_if = "Option::is_none")]
    pub avg_token_speed: Option<f64>,
}

/// Threshold at which a provider is auto-disabled (spec.md §4.5.1).
pub const CONSECUTIVE_ERROR_THRESHOLD: u32 = 5;

/// Fallback tokens/sec used when the model catalog carries no throughput seed.
pub const DEFAULT_TOKEN_SPEED: f64 = 50.0;

impl ModelStats {
    pub fn new(id: impl Into<String>, seed_throughput: Option<f64>) -> Self {
        Self {
            id: id.into(),
            token_generation_speed: seed_throughput.unwrap_or(DEFAULT_TOKEN_SPEED),
            response_times: Vec::new(),
            errors: 0,
            consecutive_errors: 0,
            avg_response_time_ms: None,
            avg_provider_latency_ms: None,
            avg_token_speed: None,
        }
    }
}

/// One successful call, the unit the statistics engine folds over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub timestamp: i64,
    #[serde(rename = "responseTimeMs")]
    pub response_time_ms: f64,
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
    #[serde(rename = "tokensGenerated")]
    pub tokens_generated: u64,
    #[serde(rename = "providerLatencyMs", skip_serializing_if = "Option::is_none")]
    pub provider_latency_ms: Option<f64>,
    #[serde(rename = "observedSpeedTps", skip_serializing_if = "Option::is_none")]
    pub observed_speed_tps: Option<f64>,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// Static metadata surfaced at `GET /api/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    #[serde(rename = "ownedBy")]
    pub owned_by: String,
    pub created: i64,
    pub providers: u32,
    pub throughput: f64,
}

/// The `GET /api/v1/models` envelope — an `object:"list"` wrapper, per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub object: String,
    pub data: Vec<ModelCatalogEntry>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self { object: "list".to_string(), data: Vec::new() }
    }
}

/// A caller's key-bound identity, indexed by API key string in the `keys` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: Role,
    pub tier: String,
    #[serde(rename = "tokenUsage", default)]
    pub token_usage: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Static per-tier rate and quality limits (spec.md §3); 0 in `rps`/`rpm`/`rpd`
/// means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub rps: u32,
    pub rpm: u32,
    pub rpd: u32,
    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(rename = "minProviderScore", skip_serializing_if = "Option::is_none")]
    pub min_provider_score: Option<i32>,
    #[serde(rename = "maxProviderScore", skip_serializing_if = "Option::is_none")]
    pub max_provider_score: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_total_requests_sums_successes_and_errors() {
        let mut p = ProviderRecord::new("p1", "https://example.invalid/v1/chat/completions", None);
        let mut m = ModelStats::new("gpt-3.5-turbo", None);
        m.errors = 2;
        m.response_times.push(ResponseEntry {
            timestamp: 0,
            response_time_ms: 100.0,
            input_tokens: 1,
            output_tokens: 1,
            tokens_generated: 1,
            provider_latency_ms: None,
            observed_speed_tps: None,
            api_key: "k".into(),
        });
        p.models.insert(m.id.clone(), m);
        assert_eq!(p.total_requests(), 3);
    }

    #[test]
    fn model_catalog_defaults_to_list_wrapper() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.object, "list");
        assert!(catalog.data.is_empty());
    }
}
