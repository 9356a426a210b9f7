//! The router (spec.md §4.5, component C5) — the core of the gateway.
//!
//! `Router::handle` is the single public operation every HTTP and WebSocket
//! wrapper eventually calls: resolve the caller, build an ordered candidate
//! list of providers for the requested model and tier, attempt them in
//! order, and update provider statistics after each attempt regardless of
//! outcome.

use std::sync::Arc;

use rand::Rng;

use crate::auth::Auth;
use crate::backends::{adapter_for, ChatMessage};
use crate::error::{AppError, ErrorKind};
use crate::model::{ModelStats, ProviderRecord, ResponseEntry, CONSECUTIVE_ERROR_THRESHOLD};
use crate::stats;
use crate::state::Store;

pub struct Router {
    store: Arc<Store>,
    auth: Arc<Auth>,
}

/// The result of a successful `handle` call.
#[derive(Debug, Clone)]
pub struct HandleResult {
    pub response: String,
    pub latency_ms: f64,
    pub tokens_generated: u64,
    pub provider_id: String,
    /// Estimated prompt tokens, surfaced so HTTP wrappers can render a
    /// vendor-shaped `usage` block without re-deriving the `⌈len/4⌉` estimate.
    pub input_tokens: u64,
    pub output_tokens: u64,
}

fn now_ms() -> i64 {
    crate::rate_limit::now_ms()
}

fn estimate_tokens(text: &str) -> u64 {
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

impl Router {
    pub fn new(store: Arc<Store>, auth: Arc<Auth>) -> Self {
        Self { store, auth }
    }

    /// `Handle(messages, modelId, apiKey) → {response, latencyMs, tokensGenerated, providerId}`.
    pub async fn handle(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        api_key: &str,
    ) -> Result<HandleResult, AppError> {
        let resolved = self.auth.validate(api_key).await?;

        let now = now_ms();
        let mut providers = self.store.load_providers().await;
        stats::trim_all(&mut providers, now);

        let any_provider_exists = !providers.is_empty();
        let active: Vec<&ProviderRecord> = providers.iter().filter(|p| !p.disabled).collect();
        if active.is_empty() && any_provider_exists {
            return Err(AppError::model_unavailable("all configured providers are currently disabled"));
        }

        let compatible: Vec<&ProviderRecord> = active.into_iter().filter(|p| p.models.contains_key(model_id)).collect();
        if compatible.is_empty() {
            let reason = if any_provider_exists {
                "no active provider offers this model"
            } else {
                "no provider is configured"
            };
            return Err(AppError::model_unavailable(reason));
        }

        let tier = &resolved.tier;
        let (mut eligible, mut fallback): (Vec<&ProviderRecord>, Vec<&ProviderRecord>) =
            compatible.into_iter().partition(|p| is_eligible(p, tier.min_provider_score, tier.max_provider_score));

        order_eligible(&mut eligible, &resolved.user.tier);
        fallback.sort_by(|a, b| b.provider_score.unwrap_or(0).cmp(&a.provider_score.unwrap_or(0)));

        let candidates: Vec<String> = eligible.into_iter().chain(fallback).map(|p| p.id.clone()).collect();

        let content_len: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let input_tokens = ((content_len as f64) / 4.0).ceil() as u64;

        let mut last_error: Option<AppError> = None;

        for provider_id in candidates {
            let (kind, endpoint_url, api_key_for_provider) = {
                let Some(p) = providers.iter().find(|p| p.id == provider_id) else { continue };
                (p.kind, p.endpoint_url.clone(), p.api_key.clone())
            };

            let adapter = adapter_for(kind, &endpoint_url, api_key_for_provider.as_deref());
            let attempt = adapter.send(messages, model_id).await;

            match attempt {
                Ok(response) => {
                    let output_tokens = estimate_tokens(&response.text);
                    let entry = build_response_entry(
                        now_ms(),
                        response.latency_ms,
                        input_tokens,
                        output_tokens,
                        &providers,
                        &provider_id,
                        model_id,
                        api_key,
                    );

                    self.apply_update(&provider_id, model_id, UpdateOutcome::Success(entry)).await;

                    let tokens_generated = input_tokens + output_tokens;
                    self.auth.record_usage(api_key, tokens_generated).await;

                    return Ok(HandleResult {
                        response: response.text,
                        latency_ms: response.latency_ms,
                        tokens_generated,
                        provider_id,
                        input_tokens,
                        output_tokens,
                    });
                }
                Err(err) => {
                    self.apply_update(&provider_id, model_id, UpdateOutcome::Failure).await;
                    last_error = Some(err);
                }
            }
        }

        Err(AppError::new(
            ErrorKind::AllAttemptsFailed,
            last_error.map(|e| e.message().to_string()).unwrap_or_else(|| "no candidate providers were available".to_string()),
        ))
    }

    /// Reloads providers fresh (a concurrent write may have intervened),
    /// applies the stats update for this provider+model, recomputes score,
    /// applies the disable/enable rule, and saves. Save failures never
    /// propagate as request failures (spec.md §4.5 step d, §7).
    async fn apply_update(&self, provider_id: &str, model_id: &str, outcome: UpdateOutcome) {
        let mut providers = self.store.load_providers().await;
        let Some(provider) = providers.iter_mut().find(|p| p.id == provider_id) else {
            tracing::warn!(provider_id, "provider vanished before stats update could be applied");
            return;
        };

        let Some(model) = provider.models.get_mut(model_id) else {
            tracing::warn!(provider_id, model_id, "model vanished before stats update could be applied");
            return;
        };

        match outcome {
            UpdateOutcome::Success(entry) => {
                model.response_times.push(entry);
                model.consecutive_errors = 0;
            }
            UpdateOutcome::Failure => {
                model.errors += 1;
                provider.errors += 1;
                model.consecutive_errors += 1;
            }
        }

        let should_disable = provider.models.values().any(|m| m.consecutive_errors >= CONSECUTIVE_ERROR_THRESHOLD);
        let should_enable = matches!(outcome_is_success(&outcome), true);
        if should_disable {
            provider.disabled = true;
        } else if should_enable {
            provider.disabled = false;
        }

        stats::recompute_provider(provider);
        provider.provider_score = Some(stats::score(provider));

        if !self.store.save_providers(&providers).await {
            tracing::error!(provider_id, model_id, "failed to persist stats update to both backends");
        }
    }
}

enum UpdateOutcome {
    Success(ResponseEntry),
    Failure,
}

fn outcome_is_success(outcome: &UpdateOutcome) -> bool {
    matches!(outcome, UpdateOutcome::Success(_))
}

/// `providerScore` within `[min, max]`; absent bounds are open, and an absent
/// `providerScore` (no data yet) is given the benefit of the doubt and passes.
fn is_eligible(provider: &ProviderRecord, min: Option<i32>, max: Option<i32>) -> bool {
    let Some(score) = provider.provider_score else { return true };
    min.is_none_or(|m| score >= m) && max.is_none_or(|m| score <= m)
}

fn order_eligible(eligible: &mut [&ProviderRecord], tier_name: &str) {
    match tier_name {
        "enterprise" => {
            eligible.sort_by(|a, b| b.provider_score.unwrap_or(0).cmp(&a.provider_score.unwrap_or(0)));
        }
        "pro" => {
            eligible.sort_by(|a, b| b.provider_score.unwrap_or(0).cmp(&a.provider_score.unwrap_or(0)));
            maybe_swap_head(eligible, 0.20);
        }
        _ => {
            eligible.sort_by(|a, b| a.provider_score.unwrap_or(0).cmp(&b.provider_score.unwrap_or(0)));
            maybe_swap_head(eligible, 0.30);
        }
    }
}

/// A single coin flip per request (spec.md §9's open-question resolution):
/// with probability `p`, swap position 0 with a uniformly-chosen non-zero position.
fn maybe_swap_head<T>(items: &mut [T], p: f64) {
    if items.len() < 2 {
        return;
    }
    let mut rng = rand::thread_rng();
    if rng.gen_bool(p) {
        let swap_with = rng.gen_range(1..items.len());
        items.swap(0, swap_with);
    }
}

#[allow(clippy::too_many_arguments)]
fn build_response_entry(
    timestamp: i64,
    latency_ms: f64,
    input_tokens: u64,
    output_tokens: u64,
    providers: &[ProviderRecord],
    provider_id: &str,
    model_id: &str,
    api_key: &str,
) -> ResponseEntry {
    let speed = providers
        .iter()
        .find(|p| p.id == provider_id)
        .and_then(|p| p.models.get(model_id))
        .map(model_speed)
        .unwrap_or(crate::model::DEFAULT_TOKEN_SPEED);

    let expected_generation_ms = if speed > 0.0 { (output_tokens as f64 / speed) * 1000.0 } else { 0.0 };
    let provider_latency_ms = (latency_ms - expected_generation_ms).max(0.0);
    let generation_ms = latency_ms - provider_latency_ms;
    let observed_speed_tps = if generation_ms >= 1.0 { Some(output_tokens as f64 / (generation_ms / 1000.0)) } else { None };

    ResponseEntry {
        timestamp,
        response_time_ms: latency_ms,
        input_tokens,
        output_tokens,
        tokens_generated: output_tokens,
        provider_latency_ms: Some(provider_latency_ms),
        observed_speed_tps,
        api_key: api_key.to_string(),
    }
}

fn model_speed(model: &ModelStats) -> f64 {
    model.avg_token_speed.unwrap_or(model.token_generation_speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderKind, TierLimits, UserRecord, Role};
    use crate::state::file_backend::FileBackend;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_router(dir: &std::path::Path) -> (Router, Arc<Store>, Arc<Auth>) {
        let preferred = Arc::new(FileBackend::new(dir.join("primary")));
        let fallback = Arc::new(FileBackend::new(dir.join("fallback")));
        let store = Arc::new(Store::new(preferred, fallback));

        let mut tiers = HashMap::new();
        tiers.insert("free".to_string(), TierLimits { rps: 0, rpm: 0, rpd: 0, max_tokens: None, min_provider_score: None, max_provider_score: None });
        let auth = Arc::new(Auth::new(store.clone(), tiers));

        let mut users = HashMap::new();
        users.insert("key1".to_string(), UserRecord { user_id: "u1".into(), role: Role::User, tier: "free".into(), token_usage: 0 });
        store.save_users(&users).await;

        (Router::new(store.clone(), auth.clone()), store, auth)
    }

    #[tokio::test]
    async fn happy_path_openai_shape() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hi"}}]
            })))
            .mount(&server)
            .await;

        let (router, store, _auth) = test_router(dir.path()).await;

        let mut provider = ProviderRecord::new("openai-mock", format!("{}/v1/chat/completions", server.uri()), None);
        provider.kind = ProviderKind::Generic;
        provider.models.insert("gpt-3.5-turbo".to_string(), ModelStats::new("gpt-3.5-turbo", None));
        store.save_providers(&[provider]).await;

        let messages = vec![ChatMessage { role: "user".into(), content: "hello".into() }];
        let result = router.handle(&messages, "gpt-3.5-turbo", "key1").await.unwrap();

        assert_eq!(result.response, "hi");
        assert_eq!(result.provider_id, "openai-mock");

        let providers = store.load_providers().await;
        let model = &providers[0].models["gpt-3.5-turbo"];
        assert_eq!(model.response_times.len(), 1);
    }

    #[tokio::test]
    async fn no_compatible_provider_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _store, _auth) = test_router(dir.path()).await;
        let messages = vec![ChatMessage { role: "user".into(), content: "hello".into() }];
        let err = router.handle(&messages, "gpt-4", "key1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[tokio::test]
    async fn five_consecutive_failures_disable_the_provider() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"error": {"message": "boom"}})))
            .mount(&server)
            .await;

        let (router, store, _auth) = test_router(dir.path()).await;
        let mut provider = ProviderRecord::new("flaky", format!("{}/v1/chat/completions", server.uri()), None);
        provider.models.insert("gpt-3.5-turbo".to_string(), ModelStats::new("gpt-3.5-turbo", None));
        store.save_providers(&[provider]).await;

        let messages = vec![ChatMessage { role: "user".into(), content: "hello".into() }];
        for _ in 0..5 {
            let _ = router.handle(&messages, "gpt-3.5-turbo", "key1").await;
        }

        let providers = store.load_providers().await;
        assert!(providers[0].disabled);
        assert_eq!(providers[0].models["gpt-3.5-turbo"].consecutive_errors, 5);
    }

    #[test]
    fn eligibility_treats_absent_score_as_passing() {
        let provider = ProviderRecord::new("p", "http://x", None);
        assert!(is_eligible(&provider, Some(50), None));
    }

    #[test]
    fn enterprise_sorts_descending_without_coin_flip() {
        let mut a = ProviderRecord::new("a", "http://x", None);
        a.provider_score = Some(20);
        let mut b = ProviderRecord::new("b", "http://x", None);
        b.provider_score = Some(90);
        let mut list = vec![&a, &b];
        order_eligible(&mut list, "enterprise");
        assert_eq!(list[0].id, "b");
    }
}
