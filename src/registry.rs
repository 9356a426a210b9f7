//! Provider registry & model catalog refresh (spec.md §4.3, component C3).
//!
//! Reloaded from the state store per request by the router (for the active
//! provider list) and, separately, by the catalog-refresh hook that runs at
//! process start, on admin request, and after every successful providers
//! save (spec.md §4.1's post-save hook).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::{ModelCatalogEntry, ProviderRecord};
use crate::state::Store;

/// Prefix → `ownedBy` guesses, checked in order (spec.md §4.3 step 2).
const OWNER_PREFIXES: &[(&str, &str)] = &[
    ("gpt-", "openai"),
    ("claude", "anthropic"),
    ("gemini", "google"),
    ("gemma", "google"),
    ("llama", "meta"),
    ("mistral", "mistral.ai"),
    ("ministral", "mistral.ai"),
    ("mixtral", "mistral.ai"),
    ("qwen", "alibaba"),
    ("command", "cohere"),
];

pub fn guess_owned_by(model_id: &str) -> &'static str {
    let lower = model_id.to_ascii_lowercase();
    for (prefix, owner) in OWNER_PREFIXES {
        if lower.starts_with(prefix) {
            return owner;
        }
    }
    "unknown"
}

/// Counts, per model id, how many non-disabled providers list it.
pub fn active_provider_counts(providers: &[ProviderRecord]) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for provider in providers.iter().filter(|p| !p.disabled) {
        for model_id in provider.models.keys() {
            *counts.entry(model_id.clone()).or_insert(0u32) += 1;
        }
    }
    counts
}

/// Synchronous refresh step over in-memory data — pure, so it's easy to test
/// without a store. Returns `true` if the catalog's `data` changed.
pub fn apply_refresh(
    providers: &[ProviderRecord],
    catalog_entries: &mut Vec<ModelCatalogEntry>,
) -> bool {
    let counts = active_provider_counts(providers);
    let before = catalog_entries.clone();

    for entry in catalog_entries.iter_mut() {
        entry.providers = counts.get(&entry.id).copied().unwrap_or(0);
    }
    catalog_entries.retain(|e| e.providers > 0);

    let known: std::collections::HashSet<&String> = catalog_entries.iter().map(|e| &e.id).collect();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    for (model_id, count) in &counts {
        if *count == 0 || known.contains(model_id) {
            continue;
        }
        let throughput = providers
            .iter()
            .filter(|p| !p.disabled)
            .find_map(|p| p.models.get(model_id))
            .map(|m| m.token_generation_speed)
            .unwrap_or(crate::model::DEFAULT_TOKEN_SPEED);

        catalog_entries.push(ModelCatalogEntry {
            id: model_id.clone(),
            owned_by: guess_owned_by(model_id).to_string(),
            created: now,
            providers: *count,
            throughput,
        });
    }

    catalog_entries.sort_by(|a, b| a.id.cmp(&b.id));
    *catalog_entries != before
}

/// Loads providers and the catalog, applies [`apply_refresh`], and saves the
/// catalog only if it changed. Called at startup, from the admin refresh
/// route, and from the state store's providers-save hook.
pub async fn refresh_catalog(store: &Arc<Store>) {
    let providers = store.load_providers().await;
    let mut catalog = store.load_catalog().await;

    if apply_refresh(&providers, &mut catalog.data) {
        if !store.save_catalog(&catalog).await {
            tracing::error!("catalog refresh ran but failed to save to both backends");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelStats;

    fn provider(id: &str, disabled: bool, models: &[&str]) -> ProviderRecord {
        let mut p = ProviderRecord::new(id, "http://example.invalid", None);
        p.disabled = disabled;
        for m in models {
            p.models.insert(m.to_string(), ModelStats::new(*m, None));
        }
        p
    }

    #[test]
    fn owner_guess_matches_prefix_table() {
        assert_eq!(guess_owned_by("gpt-4o"), "openai");
        assert_eq!(guess_owned_by("claude-3-5-sonnet"), "anthropic");
        assert_eq!(guess_owned_by("gemini-1.5-pro"), "google");
        assert_eq!(guess_owned_by("llama-3-70b"), "meta");
        assert_eq!(guess_owned_by("mixtral-8x7b"), "mistral.ai");
        assert_eq!(guess_owned_by("qwen2-72b"), "alibaba");
        assert_eq!(guess_owned_by("command-r-plus"), "cohere");
        assert_eq!(guess_owned_by("totally-unknown-model"), "unknown");
    }

    #[test]
    fn refresh_removes_zero_count_and_adds_missing_entries() {
        let providers = vec![provider("p1", false, &["gpt-3.5-turbo"])];
        let mut catalog = vec![ModelCatalogEntry {
            id: "gpt-4".into(),
            owned_by: "openai".into(),
            created: 0,
            providers: 2,
            throughput: 50.0,
        }];

        let changed = apply_refresh(&providers, &mut catalog);
        assert!(changed);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].id, "gpt-3.5-turbo");
        assert_eq!(catalog[0].providers, 1);
        assert_eq!(catalog[0].owned_by, "openai");
    }

    #[test]
    fn refresh_is_a_no_op_when_active_set_is_unchanged() {
        let providers = vec![provider("p1", false, &["gpt-3.5-turbo"])];
        let mut catalog = vec![ModelCatalogEntry {
            id: "gpt-3.5-turbo".into(),
            owned_by: "openai".into(),
            created: 0,
            providers: 1,
            throughput: 50.0,
        }];

        let changed = apply_refresh(&providers, &mut catalog);
        assert!(!changed);
    }

    #[test]
    fn disabled_providers_do_not_count() {
        let providers = vec![provider("p1", true, &["gpt-3.5-turbo"])];
        let mut catalog = Vec::new();
        let changed = apply_refresh(&providers, &mut catalog);
        assert!(!changed);
        assert!(catalog.is_empty());
    }
}
