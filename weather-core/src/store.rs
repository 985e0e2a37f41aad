//! Observable string-keyed persistence.
//!
//! The rest of the crate only sees [`KeyValueStore`]; [`MemoryStore`] backs
//! tests and throwaway sessions, [`FileStore`] keeps everything in one JSON
//! file on disk.

use std::{
    collections::HashMap,
    fmt::Debug,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, watch};

/// Full contents of a store: key -> raw string value.
pub type Entries = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    /// Current contents.
    async fn snapshot(&self) -> Entries;

    /// Receiver that yields the current contents first and then every change.
    fn subscribe(&self) -> watch::Receiver<Entries>;

    /// Insert or replace `key`. Subscribers see the change only after it is
    /// durable.
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub struct MemoryStore {
    entries: watch::Sender<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_entries(Entries::new())
    }

    pub fn with_entries(entries: Entries) -> Self {
        let (tx, _) = watch::channel(entries);
        Self { entries: tx }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn snapshot(&self) -> Entries {
        self.entries.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Entries> {
        self.entries.subscribe()
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.send_modify(|entries| {
            entries.insert(key.to_owned(), value);
        });
        Ok(())
    }
}

/// Store whose writes always fail with an I/O error. Reads see the seeded
/// entries.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
}

#[cfg(test)]
impl FailingStore {
    pub(crate) fn with_entries(entries: Entries) -> Self {
        Self {
            inner: MemoryStore::with_entries(entries),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl KeyValueStore for FailingStore {
    async fn snapshot(&self) -> Entries {
        self.inner.snapshot().await
    }

    fn subscribe(&self) -> watch::Receiver<Entries> {
        self.inner.subscribe()
    }

    async fn put(&self, _key: &str, _value: String) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: PathBuf::from("state.json"),
            source: std::io::Error::other("disk full"),
        })
    }
}

/// Store persisted as a single JSON object file.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: watch::Sender<Entries>,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`. A missing or empty file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_entries(&path).await?;
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file store");

        let (tx, _) = watch::channel(entries);
        Ok(Self {
            path,
            entries: tx,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_entries(&self, entries: &Entries) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let json =
            serde_json::to_string_pretty(entries).map_err(|source| StoreError::Encode {
                key: "*".to_string(),
                source,
            })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_err(&self.path))?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn snapshot(&self) -> Entries {
        self.entries.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Entries> {
        self.entries.subscribe()
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut next = self.entries.borrow().clone();
        next.insert(key.to_owned(), value);

        self.write_entries(&next).await?;
        self.entries.send_replace(next);

        tracing::debug!(key, path = %self.path.display(), "store entry written");
        Ok(())
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

async fn read_entries(path: &Path) -> Result<Entries, StoreError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(source) => return Err(io_err(path)(source)),
    };

    if contents.trim().is_empty() {
        return Ok(Entries::new());
    }

    serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_put_is_visible_in_snapshot() {
        let store = MemoryStore::new();
        store.put("k", "v".into()).await.unwrap();

        assert_eq!(
            store.snapshot().await.get("k").map(String::as_str),
            Some("v")
        );
    }

    #[tokio::test]
    async fn memory_store_notifies_subscribers() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        store.put("k", "v".into()).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("state.json"))
            .await
            .unwrap();

        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStore::open(&path).await.unwrap();
        store.put("current_city", "{}".into()).await.unwrap();
        store.put("favorites", "[]".into()).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        let entries = reopened.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get("favorites").map(String::as_str), Some("[]"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
