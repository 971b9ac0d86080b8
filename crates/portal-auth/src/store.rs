//! Credential persistence abstraction.
//!
//! Stores are plain keyed value stores with an absolute expiry per entry.
//! They never know which role a key belongs to; role awareness lives in
//! [`crate::role`] and [`crate::session`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value. Absent and expired entries both yield `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value that stops being readable at `expires_at`.
    async fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete a value. Removing an absent key is a no-op.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredValue {
    value: String,
    expires_at: DateTime<Utc>,
}

impl StoredValue {
    #[inline]
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Process-local store, lost on exit.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        // Evict lazily; the guard must be dropped before `remove_if` touches the shard.
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        self.entries.remove_if(key, |_, v| v.is_expired(now));
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON-file backed store, the on-disk counterpart of a browser cookie jar.
///
/// The whole file is rewritten on every mutation: the entries are written to
/// a sibling `.tmp` file which is then renamed over the store, so readers of
/// the file never observe a partial write. The async mutex is held across the
/// write, which keeps concurrent mutations from interleaving on disk.
pub struct FileCredentialStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => {
                let mut entries: HashMap<String, StoredValue> = serde_json::from_slice(&bytes)?;
                let now = Utc::now();
                entries.retain(|_, v| !v.is_expired(now));
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Credential file not found, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "Credential file loaded");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<String, StoredValue>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(v) if !v.is_expired(now) => return Ok(Some(v.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
            if let Err(e) = self.persist(&entries).await {
                warn!(error = %e, key, "Failed to persist expired entry eviction");
            }
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }
}
