//! Key/value persistence backends.
//!
//! The vector store only needs string `get`/`set`/`remove`. Hosts plug their
//! own key/value store in through [`StorageBackend`]; two implementations ship
//! here: a directory of files (the "assets" style backend) and an in-memory
//! map with an optional capacity ceiling.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::errors::{SearchError, SearchResult};

/// Family of a storage backend; decides which persistence strategy is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageKind {
    /// File-like storage with generous capacity
    Assets,
    /// The host's generic local key/value store
    KeyValue,
    /// Process memory only
    Memory,
}

/// String key/value persistence
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> SearchResult<Option<String>>;

    /// Store `value`, failing with [`SearchError::CapacityExceeded`] when the
    /// backend is out of space
    async fn set(&self, key: &str, value: &str) -> SearchResult<()>;

    /// Remove `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> SearchResult<()>;

    fn kind(&self) -> StorageKind;

    fn name(&self) -> &str;
}

// ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL
#[cfg(windows)]
const OUT_OF_SPACE_CODES: [i32; 2] = [112, 39];
// ENOSPC, EDQUOT
#[cfg(not(windows))]
const OUT_OF_SPACE_CODES: [i32; 2] = [28, 122];

fn is_out_of_space(error: &std::io::Error) -> bool {
    error
        .raw_os_error()
        .map_or(false, |code| OUT_OF_SPACE_CODES.contains(&code))
}

/// One file per key under a directory
pub struct FileStorage {
    root: PathBuf,
    name: String,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            name: "assets".to_string(),
        }
    }

    /// Storage under `~/.ainote/search_index`
    pub fn default_location() -> SearchResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| SearchError::storage("could not determine home directory"))?;
        Ok(Self::new(home.join(".ainote").join("search_index")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> SearchResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SearchError::storage(format!("failed to read '{}': {}", key, e))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> SearchResult<()> {
        let map_write_error = |e: std::io::Error| {
            if is_out_of_space(&e) {
                SearchError::CapacityExceeded { key: key.to_string() }
            } else {
                SearchError::storage(format!("failed to write '{}': {}", key, e))
            }
        };

        fs::create_dir_all(&self.root).await.map_err(map_write_error)?;

        // Write next to the target, then rename, so readers never see half a file
        let target = self.path_for(key);
        let temp = target.with_extension("json.tmp");
        fs::write(&temp, value.as_bytes()).await.map_err(map_write_error)?;
        fs::rename(&temp, &target).await.map_err(map_write_error)
    }

    async fn remove(&self, key: &str) -> SearchResult<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SearchError::storage(format!("failed to remove '{}': {}", key, e))),
        }
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Assets
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// In-memory key/value map
///
/// With a capacity ceiling it behaves like a quota-limited browser store: a
/// write that would push the total size of keys and values past the ceiling
/// fails with [`SearchError::CapacityExceeded`] and leaves the map untouched.
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
    capacity_bytes: Option<usize>,
    kind: StorageKind,
    name: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity_bytes: None,
            kind: StorageKind::Memory,
            name: "memory".to_string(),
        }
    }

    pub fn with_capacity_limit(mut self, capacity_bytes: usize) -> Self {
        self.capacity_bytes = Some(capacity_bytes);
        self
    }

    /// Report a different backend family, e.g. to stand in for a host key/value store
    pub fn with_kind(mut self, kind: StorageKind, name: impl Into<String>) -> Self {
        self.kind = kind;
        self.name = name.into();
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> SearchResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> SearchResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(limit) = self.capacity_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > limit {
                log::warn!("💾 Memory storage full: refusing to write '{}'", key);
                return Err(SearchError::CapacityExceeded { key: key.to_string() });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> SearchResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }
}
