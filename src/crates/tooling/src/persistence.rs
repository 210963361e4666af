//! Atomic file persistence behind an opaque key-value interface
//!
//! All durable tekton state (registry snapshots, the CI registry, workflow
//! executions, memory catalogs) is JSON written through this module. Writes
//! go to a temporary file in the same directory followed by a rename, so a
//! crash never leaves a half-written document behind.
//!
//! The `KvStore` trait keeps backends opaque to the owning components; the
//! file store is the default and an in-memory store backs tests.

use crate::{Result, ToolingError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Opaque key-value document store
///
/// Keys are relative slash-separated paths (`registry.snapshot`,
/// `memory/metis/catalog.json`). Values are JSON documents.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store a document under a key, replacing any existing value
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Fetch a document; `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Remove a document; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys under a slash-separated prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Serialize and store a typed value
pub async fn put_typed<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    store.put(key, serde_json::to_value(value)?).await
}

/// Fetch and deserialize a typed value
pub async fn get_typed<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// File-backed store rooted at a state directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the given directory, creating it if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(ToolingError::Persistence(format!("Invalid storage key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

/// Write a JSON document to a path via temp-file plus rename
pub async fn write_atomic(path: &Path, value: &serde_json::Value) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ToolingError::Persistence(format!("Path has no parent: {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    ));
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl KvStore for FileStore {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, &value).await
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.path_for(prefix)?
        };

        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.starts_with('.') {
                        continue;
                    }
                    if prefix.is_empty() {
                        keys.push(name.to_string());
                    } else {
                        keys.push(format!("{}/{}", prefix, name));
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| prefix.is_empty() || k.starts_with(&format!("{}/", prefix)))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
