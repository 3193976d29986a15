//! Durable key-value storage abstraction.
//!
//! The client persists exactly one document, the offline queue, under a
//! well-known key. This module provides the trait it writes through plus a
//! file-backed and an in-memory implementation.

use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Provider trait for durable storage of opaque documents.
///
/// Single-core design - no Send bounds needed.
/// Clone allows sharing one store between components.
#[async_trait(?Send)]
pub trait KeyValueStore: Clone + 'static {
    /// Load the document stored under `key`.
    ///
    /// Returns `Ok(None)` when nothing has been stored yet.
    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the document stored under `key`.
    async fn save(&self, key: &str, data: &[u8]) -> io::Result<()>;

    /// Remove the document stored under `key`. Removing a missing key is not
    /// an error.
    async fn remove(&self, key: &str) -> io::Result<()>;
}

/// File-backed store keeping one file per key inside a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a crash
/// mid-write leaves either the old or the new document.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the stored documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        if key.is_empty()
            || key
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'))
            || key.starts_with('.')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage key: {:?}", key),
            ));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait(?Send)]
impl KeyValueStore for FileStore {
    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, key: &str, data: &[u8]) -> io::Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
///
/// Clones share the same map, so a test can keep a handle and inspect what
/// the client persisted, or simulate a restart by building a second client
/// over the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Rc<RefCell<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a stored document without going through the async trait.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.borrow().get(key).cloned()
    }

    /// Overwrite a document directly, e.g. to plant corrupt data in a test.
    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.data.borrow_mut().insert(key.to_string(), data.into());
    }

    /// Whether a document exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.data.borrow().contains_key(key)
    }
}

#[async_trait(?Send)]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.put(key, data);
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        self.data.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("state"));

        assert_eq!(store.load("offline_queue").await.expect("load"), None);

        store
            .save("offline_queue", b"[1,2,3]")
            .await
            .expect("save");
        let loaded = store.load("offline_queue").await.expect("load");
        assert_eq!(loaded.as_deref(), Some(&b"[1,2,3]"[..]));

        store.save("offline_queue", b"[]").await.expect("overwrite");
        let loaded = store.load("offline_queue").await.expect("load");
        assert_eq!(loaded.as_deref(), Some(&b"[]"[..]));
    }

    #[tokio::test]
    async fn test_file_store_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        store.save("queue", b"x").await.expect("save");
        store.remove("queue").await.expect("remove");
        store.remove("queue").await.expect("second remove");
        assert_eq!(store.load("queue").await.expect("load"), None);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        let err = store.save("../escape", b"x").await.expect_err("must reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(store.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.save("k", b"v").await.expect("save");
        assert!(other.contains("k"));
        assert_eq!(other.load("k").await.expect("load"), Some(b"v".to_vec()));

        other.remove("k").await.expect("remove");
        assert!(!store.contains("k"));
    }
}
