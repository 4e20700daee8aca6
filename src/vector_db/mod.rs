//! Vector Store for note embeddings
//!
//! Persists [`VectorRecord`]s on top of a plain string key/value backend and
//! keeps the decoded record set cached in memory for search.
//!
//! ## Layout
//!
//! - `types.rs`: records, manifest, chunk metadata, stats and reports
//! - `compression.rs`: compact record form and payload compression
//! - `backend.rs`: the [`backend::StorageBackend`] seam plus file and memory backends
//! - `selector.rs`: probe-based backend selection
//! - `sharded.rs`: append-only shards indexed by a manifest (file-like backends)
//! - `chunked.rs`: fixed-size chunks with checksummed metadata (host key/value stores)
//!
//! ## Caching
//!
//! [`VectorStore`] owns the record cache. A cache hit hands out the same
//! `Arc`, so repeated loads without writes are reference-equal. Every write
//! bumps a generation counter; a load that raced with a write does not
//! populate the cache with the older snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

pub mod types;
pub mod compression;
pub mod backend;
pub mod selector;
pub mod sharded;
pub mod chunked;

use backend::{StorageBackend, StorageKind};
use chunked::ChunkedStore;
use sharded::ShardedStore;
use types::{IntegrityReport, StoreStats, VectorRecord};

use crate::config::StorageSettings;
use crate::errors::{SearchError, SearchResult};

/// Summary a persistence strategy can give without decoding payloads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistenceSummary {
    pub claimed_count: usize,
    pub dimension: Option<usize>,
    pub segment_count: usize,
}

/// One way of laying records out in a key/value backend
#[async_trait]
pub trait VectorPersistence: Send + Sync {
    /// Persist additional records
    async fn append(&self, records: &[VectorRecord]) -> SearchResult<()>;

    /// Decode every stored record
    async fn load_all(&self) -> SearchResult<Vec<VectorRecord>>;

    /// Drop everything and store exactly `records`
    async fn replace_all(&self, records: &[VectorRecord]) -> SearchResult<()>;

    /// Cheap existence check; never decodes payloads
    async fn has_data(&self) -> SearchResult<bool>;

    async fn summary(&self) -> SearchResult<PersistenceSummary>;

    async fn check_integrity(&self) -> SearchResult<IntegrityReport>;

    async fn clear(&self) -> SearchResult<()>;

    /// Forget cached metadata so the next call reads the backend again
    async fn reset_cache(&self);

    fn strategy_name(&self) -> &'static str;

    fn storage(&self) -> &Arc<dyn StorageBackend>;
}

/// Verify every record in a batch shares one dimension, and that it matches
/// the dimension already fixed for the store
pub(crate) fn check_batch_dimension(records: &[VectorRecord], expected: Option<usize>) -> SearchResult<Option<usize>> {
    let mut dimension = expected;
    for record in records {
        match dimension {
            Some(d) if d != record.vector.len() => {
                return Err(SearchError::DimensionMismatch {
                    expected: d,
                    found: record.vector.len(),
                });
            }
            Some(_) => {}
            None => dimension = Some(record.vector.len()),
        }
    }
    if dimension == Some(0) {
        return Err(SearchError::InvalidInput {
            reason: "records must carry a non-empty vector".to_string(),
        });
    }
    Ok(dimension)
}

/// Cached facade over one persistence strategy
pub struct VectorStore {
    persistence: Arc<dyn VectorPersistence>,
    records: RwLock<Option<Arc<Vec<VectorRecord>>>>,
    generation: AtomicU64,
}

impl VectorStore {
    pub fn new(persistence: Arc<dyn VectorPersistence>) -> Self {
        Self {
            persistence,
            records: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Pick the layout that suits the backend: shards for file-like and
    /// memory backends, chunks for the host key/value store
    pub fn for_backend(storage: Arc<dyn StorageBackend>, settings: &StorageSettings) -> Self {
        let persistence: Arc<dyn VectorPersistence> = match storage.kind() {
            StorageKind::Assets | StorageKind::Memory => Arc::new(ShardedStore::new(
                storage,
                settings.compression,
                settings.max_records_per_shard,
                settings.rebuild_on_count_mismatch,
            )),
            StorageKind::KeyValue => Arc::new(ChunkedStore::new(storage, settings.compression, settings.chunk_size)),
        };
        log::info!("🗄️ Vector store using {} layout", persistence.strategy_name());
        Self::new(persistence)
    }

    async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.records.write().await = None;
    }

    /// Persist a batch as new storage segments; empty batches are ignored
    pub async fn add_vector_shard(&self, records: Vec<VectorRecord>) -> SearchResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let result = self.persistence.append(&records).await;
        // The cache may be stale even if only part of the write landed
        self.invalidate().await;
        result?;
        log::debug!("💾 Stored {} records", records.len());
        Ok(())
    }

    /// Full record set, from cache unless `force_reload`
    pub async fn load_vector_data(&self, force_reload: bool) -> SearchResult<Arc<Vec<VectorRecord>>> {
        if !force_reload {
            if let Some(cached) = self.records.read().await.as_ref() {
                return Ok(Arc::clone(cached));
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let loaded = Arc::new(self.persistence.load_all().await?);

        let mut cache = self.records.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *cache = Some(Arc::clone(&loaded));
        } else {
            log::debug!("🔄 Store changed during load, not caching the snapshot");
        }
        Ok(loaded)
    }

    pub async fn has_vector_data(&self) -> SearchResult<bool> {
        if let Some(cached) = self.records.read().await.as_ref() {
            if !cached.is_empty() {
                return Ok(true);
            }
        }
        self.persistence.has_data().await
    }

    /// Vector length fixed for this store, if anything was stored yet
    pub async fn dimension(&self) -> SearchResult<Option<usize>> {
        Ok(self.persistence.summary().await?.dimension)
    }

    pub async fn get_stats(&self) -> SearchResult<StoreStats> {
        let summary = self.persistence.summary().await?;
        Ok(StoreStats {
            count: summary.claimed_count,
            dimension: summary.dimension,
            backend: self.persistence.strategy_name().to_string(),
            shard_count: summary.segment_count,
            storage_backend: self.persistence.storage().name().to_string(),
        })
    }

    pub async fn check_vector_data_integrity(&self) -> SearchResult<IntegrityReport> {
        self.persistence.check_integrity().await
    }

    pub async fn clear(&self) -> SearchResult<()> {
        let result = self.persistence.clear().await;
        self.invalidate().await;
        result?;
        log::info!("🗑️ Vector store cleared");
        Ok(())
    }

    /// Replace the whole record set
    pub async fn replace_all(&self, records: Vec<VectorRecord>) -> SearchResult<()> {
        check_batch_dimension(&records, None)?;
        let result = self.persistence.replace_all(&records).await;
        self.invalidate().await;
        result
    }

    /// Drop every in-memory cache; persisted data is untouched
    pub async fn reset(&self) {
        self.invalidate().await;
        self.persistence.reset_cache().await;
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        self.persistence.storage()
    }
}
