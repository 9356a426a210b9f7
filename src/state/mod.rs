//! The state store (spec.md §4.1, component C1).
//!
//! Three named documents — `providers`, `keys`, `models` — each persisted to
//! a preferred backend with a fallback. The contract lives here; the two
//! concrete backends are [`file_backend::FileBackend`] (local files) and
//! [`redis_backend::RedisBackend`] (networked KV service). Selection between
//! them is a configuration knob (`DATA_SOURCE_PREFERENCE`), resolved once at
//! startup in [`crate::config`].

pub mod file_backend;
pub mod redis_backend;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::model::{ModelCatalog, UserRecord};
use crate::model::ProviderRecord;

/// One of the three persisted documents. Used to route to the right file/key
/// name without duplicating the load/save contract three times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Providers,
    Users,
    Models,
}

impl Document {
    pub fn name(self) -> &'static str {
        match self {
            Self::Providers => "providers",
            Self::Users => "keys",
            Self::Models => "models",
        }
    }
}

/// A backend that can load and save a raw JSON document by name.
///
/// Implementors do not know about [`ProviderRecord`] etc. — they move bytes
/// (well, `serde_json::Value`) keyed by [`Document`]. Typed convenience
/// methods live on [`Store`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns `None` if the document is absent or unreachable (a miss, not
    /// an error the caller should propagate).
    async fn load_raw(&self, doc: Document) -> Option<serde_json::Value>;

    /// Returns `true` if this backend acknowledged the write.
    async fn save_raw(&self, doc: Document, value: &serde_json::Value) -> bool;

    /// Human-readable name for logging ("file", "redis").
    fn kind(&self) -> &'static str;
}

/// The dual-backend store: a preferred [`Backend`] and a fallback, per
/// spec.md §4.1's Load/Save contract.
pub struct Store {
    preferred: Arc<dyn Backend>,
    fallback: Arc<dyn Backend>,
}

impl Store {
    pub fn new(preferred: Arc<dyn Backend>, fallback: Arc<dyn Backend>) -> Self {
        Self { preferred, fallback }
    }

    /// `Load(name) → document`: try the preferred backend; on miss, try the
    /// fallback and asynchronously write the value back to the preferred
    /// backend. If both miss, write and return `T::default()`.
    pub async fn load<T>(&self, doc: Document) -> T
    where
        T: DeserializeOwned + Serialize + Default + Clone + Send + Sync + 'static,
    {
        if let Some(raw) = self.preferred.load_raw(doc).await {
            if let Ok(value) = serde_json::from_value::<T>(raw) {
                return value;
            }
        }

        if let Some(raw) = self.fallback.load_raw(doc).await {
            if let Ok(value) = serde_json::from_value::<T>(raw) {
                tracing::info!(document = doc.name(), backend = self.fallback.kind(), "loaded from fallback; scheduling write-back");
                let preferred = self.preferred.clone();
                let write_back = value.clone();
                tokio::spawn(async move {
                    let Ok(raw) = serde_json::to_value(&write_back) else { return };
                    if !preferred.save_raw(doc, &raw).await {
                        tracing::warn!(document = doc.name(), "fallback write-back failed");
                    }
                });
                return value;
            }
        }

        tracing::warn!(document = doc.name(), "no backend had this document; seeding default");
        let default = T::default();
        if let Ok(raw) = serde_json::to_value(&default) {
            self.save_both(doc, &raw).await;
        }
        default
    }

    /// `Save(name, doc)`: serialize once, write to both backends
    /// independently. Successful if at least one acknowledged.
    pub async fn save<T>(&self, doc: Document, value: &T) -> bool
    where
        T: Serialize + Sync,
    {
        let Ok(raw) = serde_json::to_value(value) else {
            tracing::error!(document = doc.name(), "failed to serialize document for save");
            return false;
        };
        self.save_both(doc, &raw).await
    }

    async fn save_both(&self, doc: Document, raw: &serde_json::Value) -> bool {
        let preferred_ok = self.preferred.save_raw(doc, raw).await;
        let fallback_ok = self.fallback.save_raw(doc, raw).await;

        if !preferred_ok {
            tracing::error!(document = doc.name(), backend = self.preferred.kind(), "save to preferred backend failed");
        }
        if preferred_ok && !fallback_ok {
            tracing::warn!(document = doc.name(), backend = self.fallback.kind(), "save to fallback backend failed");
        } else if !preferred_ok && fallback_ok {
            tracing::warn!(document = doc.name(), "save succeeded only on non-preferred backend");
        }

        preferred_ok || fallback_ok
    }

    pub async fn load_providers(&self) -> Vec<ProviderRecord> {
        self.load::<Vec<ProviderRecord>>(Document::Providers).await
    }

    /// Saves the providers document and, per spec.md §4.1's post-save hook,
    /// schedules a model-catalog refresh on a background task. Takes `Arc<Self>`
    /// so the refresh task can hold its own handle to the store.
    pub async fn save_providers(self: &Arc<Self>, providers: &[ProviderRecord]) -> bool {
        let ok = self.save(Document::Providers, &providers.to_vec()).await;
        if ok {
            let store = self.clone();
            tokio::spawn(async move {
                crate::registry::refresh_catalog(&store).await;
            });
        }
        ok
    }

    pub async fn load_users(&self) -> std::collections::HashMap<String, UserRecord> {
        self.load::<std::collections::HashMap<String, UserRecord>>(Document::Users).await
    }

    pub async fn save_users(&self, users: &std::collections::HashMap<String, UserRecord>) -> bool {
        self.save(Document::Users, users).await
    }

    pub async fn load_catalog(&self) -> ModelCatalog {
        self.load::<ModelCatalog>(Document::Models).await
    }

    pub async fn save_catalog(&self, catalog: &ModelCatalog) -> bool {
        self.save(Document::Models, catalog).await
    }
}
