//! Local file backend: three JSON files under a config directory.
//!
//! Spec.md §4.1 calls for "human-readable structured text, written
//! atomically or at least whole-file" and §5 requires a file-level mutex so
//! concurrent saves to the same document don't interleave. Writes go to a
//! `.tmp` sibling and are renamed into place, which is atomic on the same
//! filesystem — the closest a plain file backend gets to the teacher's
//! posture of never leaving a config file half-written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Backend, Document};

pub struct FileBackend {
    dir: PathBuf,
    locks: HashMap<&'static str, Arc<Mutex<()>>>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut locks = HashMap::new();
        for doc in [Document::Providers, Document::Users, Document::Models] {
            locks.insert(doc.name(), Arc::new(Mutex::new(())));
        }
        Self { dir: dir.into(), locks }
    }

    fn path(&self, doc: Document) -> PathBuf {
        self.dir.join(format!("{}.json", doc.name()))
    }

    fn lock_for(&self, doc: Document) -> Arc<Mutex<()>> {
        self.locks
            .get(doc.name())
            .expect("every Document has a registered lock")
            .clone()
    }

    async fn read_file(path: &Path) -> Option<serde_json::Value> {
        let bytes = tokio::fs::read(path).await.ok()?;
        if bytes.is_empty() {
            return None;
        }
        serde_json::from_slice(&bytes).ok()
    }

    async fn write_file_atomic(path: &Path, value: &serde_json::Value) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let pretty = serde_json::to_vec_pretty(value).unwrap_or_else(|_| b"{}".to_vec());
        tokio::fs::write(&tmp_path, pretty).await?;
        tokio::fs::rename(&tmp_path, path).await
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn load_raw(&self, doc: Document) -> Option<serde_json::Value> {
        let lock = self.lock_for(doc);
        let _guard = lock.lock().await;
        Self::read_file(&self.path(doc)).await
    }

    async fn save_raw(&self, doc: Document, value: &serde_json::Value) -> bool {
        let lock = self.lock_for(doc);
        let _guard = lock.lock().await;
        match Self::write_file_atomic(&self.path(doc), value).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(document = doc.name(), error = %err, "file backend write failed");
                false
            }
        }
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());

        let value = json!([{"id": "p1"}]);
        assert!(backend.save_raw(Document::Providers, &value).await);

        let loaded = backend.load_raw(Document::Providers).await;
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(backend.load_raw(Document::Models).await.is_none());
    }

    #[tokio::test]
    async fn empty_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        tokio::fs::write(dir.path().join("keys.json"), b"").await.unwrap();
        assert!(backend.load_raw(Document::Users).await.is_none());
    }
}
