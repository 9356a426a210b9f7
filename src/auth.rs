//! Auth & usage (spec.md §4.7, component C7).
//!
//! Resolves an API key to a [`UserRecord`] + its [`TierLimits`], enforces the
//! cumulative token cap, and records usage after a billable completion.
//! `RecordUsage` is a reload → mutate → save cycle serialized behind a
//! per-process mutex (spec.md §5) so concurrent completions for different
//! keys don't lose increments to the file backend's whole-document writes.

use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::model::{Role, TierLimits, UserRecord};
use crate::state::Store;

pub struct Auth {
    store: Arc<Store>,
    tiers: HashMap<String, TierLimits>,
    /// Serializes every `RecordUsage` read-modify-write against the `keys` document.
    usage_lock: Mutex<()>,
}

pub struct Resolved {
    pub user: UserRecord,
    pub tier: TierLimits,
}

impl Auth {
    pub fn new(store: Arc<Store>, tiers: HashMap<String, TierLimits>) -> Self {
        Self { store, tiers, usage_lock: Mutex::new(()) }
    }

    /// `Validate(apiKey) → {userRecord, tierLimits}` (spec.md §4.7).
    pub async fn validate(&self, api_key: &str) -> Result<Resolved, AppError> {
        let users = self.store.load_users().await;
        let user = users
            .get(api_key)
            .cloned()
            .ok_or_else(|| AppError::unauthenticated("unknown API key"))?;

        let tier = self
            .tiers
            .get(&user.tier)
            .cloned()
            .ok_or_else(|| AppError::unknown_tier(format!("user tier '{}' has no configured limits", user.tier)))?;

        if let Some(max_tokens) = tier.max_tokens {
            if user.token_usage >= max_tokens {
                return Err(AppError::new(
                    crate::error::ErrorKind::QuotaExceeded,
                    format!("token quota exceeded: {} / {max_tokens}", user.token_usage),
                ));
            }
        }

        Ok(Resolved { user, tier })
    }

    /// Requires the resolved user to have the admin role, for `/api/admin/*` routes.
    pub fn require_admin(user: &UserRecord) -> Result<(), AppError> {
        if user.role != Role::Admin {
            return Err(AppError::forbidden("admin role required"));
        }
        Ok(())
    }

    /// `RecordUsage(apiKey, tokens)`: reload, add, save. Safe against
    /// interleaved updates across keys via `usage_lock`.
    pub async fn record_usage(&self, api_key: &str, tokens: u64) {
        let _guard = self.usage_lock.lock().await;
        let mut users = self.store.load_users().await;
        if let Some(user) = users.get_mut(api_key) {
            user.token_usage += tokens;
            if !self.store.save_users(&users).await {
                tracing::error!(api_key = %redact(api_key), "failed to persist usage update to both backends");
            }
        }
    }

    /// Generates a new user key: 32 bytes of cryptographic randomness,
    /// lowercase hex. Enforces userId uniqueness at generation time.
    pub async fn generate_key(&self, user_id: &str, role: Role, tier: &str) -> Result<String, AppError> {
        let mut users = self.store.load_users().await;
        if users.values().any(|u| u.user_id == user_id) {
            return Err(AppError::conflict(format!("userId '{user_id}' already has a key")));
        }

        let key = generate_key_material();
        users.insert(
            key.clone(),
            UserRecord { user_id: user_id.to_string(), role, tier: tier.to_string(), token_usage: 0 },
        );

        if !self.store.save_users(&users).await {
            return Err(AppError::state_store("failed to persist the new key"));
        }

        Ok(key)
    }
}

fn generate_key_material() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn redact(api_key: &str) -> String {
    if api_key.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}...", &api_key[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::file_backend::FileBackend;

    fn limits() -> HashMap<String, TierLimits> {
        let mut m = HashMap::new();
        m.insert(
            "free".to_string(),
            TierLimits { rps: 1, rpm: 5, rpd: 0, max_tokens: Some(100), min_provider_score: None, max_provider_score: None },
        );
        m
    }

    async fn auth_with_store() -> (Auth, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let preferred = Arc::new(FileBackend::new(dir.path()));
        let fallback = Arc::new(FileBackend::new(dir.path().join("fallback")));
        let store = Arc::new(Store::new(preferred, fallback));
        (Auth::new(store.clone(), limits()), store)
    }

    #[tokio::test]
    async fn unknown_key_is_unauthenticated() {
        let (auth, _store) = auth_with_store().await;
        let err = auth.validate("nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn quota_exceeded_before_upstream_call() {
        let (auth, store) = auth_with_store().await;
        let mut users = HashMap::new();
        users.insert(
            "k1".to_string(),
            UserRecord { user_id: "u1".into(), role: Role::User, tier: "free".into(), token_usage: 100 },
        );
        store.save_users(&users).await;

        let err = auth.validate("k1").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::QuotaExceeded);
    }

    #[tokio::test]
    async fn generate_key_rejects_duplicate_user_id() {
        let (auth, _store) = auth_with_store().await;
        auth.generate_key("alice", Role::User, "free").await.unwrap();
        let err = auth.generate_key("alice", Role::User, "free").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn record_usage_increments_token_usage() {
        let (auth, store) = auth_with_store().await;
        let key = auth.generate_key("bob", Role::User, "free").await.unwrap();
        auth.record_usage(&key, 10).await;
        let users = store.load_users().await;
        assert_eq!(users.get(&key).unwrap().token_usage, 10);
    }
}
