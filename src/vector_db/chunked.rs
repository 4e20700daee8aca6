use std::sync::Arc;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::backend::StorageBackend;
use super::compression::{decode_records, encode_records, payload_checksum};
use super::types::{ChunkMetadata, CompressionAlgorithm, IntegrityReport, VectorRecord};
use super::{check_batch_dimension, PersistenceSummary, VectorPersistence};
use crate::errors::{SearchError, SearchResult};

/// Key of the chunk metadata record
pub const METADATA_KEY: &str = "vector-chunks-meta";

pub fn chunk_key(index: usize) -> String {
    format!("vector-chunk-{}", index)
}

/// Fixed-size chunks described by a checksummed metadata record
///
/// Intended for the host's generic key/value store, where single values are
/// small and every write is costly. Chunks `0..total_chunks-1` are always full;
/// only the last chunk grows, so an append rewrites the last chunk plus the new
/// ones and nothing else.
pub struct ChunkedStore {
    storage: Arc<dyn StorageBackend>,
    compression: CompressionAlgorithm,
    chunk_size: usize,
    metadata_cache: RwLock<Option<ChunkMetadata>>,
}

impl ChunkedStore {
    pub fn new(storage: Arc<dyn StorageBackend>, compression: CompressionAlgorithm, chunk_size: usize) -> Self {
        Self {
            storage,
            compression,
            chunk_size: chunk_size.max(1),
            metadata_cache: RwLock::new(None),
        }
    }

    pub async fn load_metadata(&self) -> SearchResult<Option<ChunkMetadata>> {
        if let Some(metadata) = self.metadata_cache.read().await.as_ref() {
            return Ok(Some(metadata.clone()));
        }

        let Some(raw) = self.storage.get(METADATA_KEY).await? else {
            return Ok(None);
        };
        let metadata: ChunkMetadata = serde_json::from_str(&raw).map_err(|e| SearchError::Corruption {
            details: format!("chunk metadata is unreadable: {}", e),
        })?;

        *self.metadata_cache.write().await = Some(metadata.clone());
        Ok(Some(metadata))
    }

    async fn save_metadata(&self, metadata: &ChunkMetadata) -> SearchResult<()> {
        let json = serde_json::to_string(metadata)?;
        self.storage.set(METADATA_KEY, &json).await?;
        *self.metadata_cache.write().await = Some(metadata.clone());
        Ok(())
    }

    /// Read one chunk and verify it against its recorded checksum
    async fn load_chunk(&self, index: usize, metadata: &ChunkMetadata) -> SearchResult<Vec<VectorRecord>> {
        let key = chunk_key(index);
        let payload = self.storage.get(&key).await?.ok_or_else(|| SearchError::Corruption {
            details: format!("chunk '{}' is missing", key),
        })?;

        if let Some(expected) = metadata.checksums.get(index) {
            let actual = payload_checksum(&payload);
            if &actual != expected {
                return Err(SearchError::Corruption {
                    details: format!("checksum mismatch for chunk '{}'", key),
                });
            }
        }

        decode_records(&payload)
    }

    /// Write `records` as chunks starting at `first_index`, updating checksums
    /// and counts in `metadata` after each chunk lands
    async fn write_chunks(
        &self,
        metadata: &mut ChunkMetadata,
        first_index: usize,
        base_count: usize,
        records: &[VectorRecord],
    ) -> SearchResult<()> {
        let mut written = base_count;
        for (offset, chunk) in records.chunks(self.chunk_size).enumerate() {
            let index = first_index + offset;

            // Compression is CPU-bound; give other tasks a turn between chunks
            tokio::task::yield_now().await;
            let payload = encode_records(chunk, self.compression)?;
            self.storage.set(&chunk_key(index), &payload).await?;

            let checksum = payload_checksum(&payload);
            if index < metadata.checksums.len() {
                metadata.checksums[index] = checksum;
                metadata.checksums.truncate(index + 1);
            } else {
                metadata.checksums.push(checksum);
            }
            written += chunk.len();
            metadata.total_chunks = index + 1;
            metadata.total_records = written;
            metadata.timestamp = Utc::now().timestamp_millis();
            self.save_metadata(metadata).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorPersistence for ChunkedStore {
    async fn append(&self, records: &[VectorRecord]) -> SearchResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut metadata = self.load_metadata().await?.unwrap_or_default();
        metadata.dimension = check_batch_dimension(records, metadata.dimension)?;

        if metadata.total_chunks == 0 {
            return self.write_chunks(&mut metadata, 0, 0, records).await;
        }

        let last_index = metadata.total_chunks - 1;
        let last_chunk = self.load_chunk(last_index, &metadata).await?;
        let before_last = metadata.total_records.saturating_sub(last_chunk.len());

        if last_chunk.len() >= self.chunk_size {
            log::debug!("📦 Last chunk is full, appending {} records as new chunks", records.len());
            let (next_index, stored) = (metadata.total_chunks, metadata.total_records);
            return self.write_chunks(&mut metadata, next_index, stored, records).await;
        }

        let mut merged = last_chunk;
        merged.extend_from_slice(records);
        log::debug!(
            "📦 Rewriting chunk {} with {} records ({} new)",
            last_index,
            merged.len(),
            records.len()
        );
        self.write_chunks(&mut metadata, last_index, before_last, &merged).await
    }

    async fn load_all(&self) -> SearchResult<Vec<VectorRecord>> {
        let Some(mut metadata) = self.load_metadata().await? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(metadata.total_records);
        for index in 0..metadata.total_chunks {
            match self.load_chunk(index, &metadata).await {
                Ok(chunk) => records.extend(chunk),
                Err(e) => log::warn!("⚠️ Skipping chunk {}: {}", index, e),
            }
        }

        if records.len() != metadata.total_records {
            log::warn!(
                "⚠️ Chunk metadata claims {} records but {} decoded",
                metadata.total_records,
                records.len()
            );
            metadata.total_records = records.len();
            if let Err(e) = self.save_metadata(&metadata).await {
                log::warn!("⚠️ Could not repair chunk metadata: {}", e);
            }
        }

        Ok(records)
    }

    async fn replace_all(&self, records: &[VectorRecord]) -> SearchResult<()> {
        self.clear().await?;
        if records.is_empty() {
            return Ok(());
        }

        let mut metadata = ChunkMetadata {
            dimension: check_batch_dimension(records, None)?,
            ..ChunkMetadata::default()
        };
        self.write_chunks(&mut metadata, 0, 0, records).await
    }

    async fn has_data(&self) -> SearchResult<bool> {
        Ok(self
            .load_metadata()
            .await?
            .map_or(false, |metadata| metadata.total_records > 0))
    }

    async fn summary(&self) -> SearchResult<PersistenceSummary> {
        Ok(match self.load_metadata().await? {
            Some(metadata) => PersistenceSummary {
                claimed_count: metadata.total_records,
                dimension: metadata.dimension,
                segment_count: metadata.total_chunks,
            },
            None => PersistenceSummary::default(),
        })
    }

    async fn check_integrity(&self) -> SearchResult<IntegrityReport> {
        let mut report = IntegrityReport {
            is_valid: true,
            ..IntegrityReport::default()
        };

        let metadata = match self.load_metadata().await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Ok(report),
            Err(e) => {
                report.is_valid = false;
                report.manifest_exists = true;
                report.issues.push(e.to_string());
                return Ok(report);
            }
        };

        report.manifest_exists = true;
        report.claimed_count = metadata.total_records;
        report.shard_count = metadata.total_chunks;

        if metadata.checksums.len() != metadata.total_chunks {
            report.issues.push(format!(
                "{} checksums recorded for {} chunks",
                metadata.checksums.len(),
                metadata.total_chunks
            ));
        }
        if metadata.total_records > metadata.total_chunks * self.chunk_size {
            report.issues.push(format!(
                "{} records cannot fit in {} chunks of {}",
                metadata.total_records, metadata.total_chunks, self.chunk_size
            ));
        }
        for index in 0..metadata.total_chunks {
            match self.storage.get(&chunk_key(index)).await? {
                Some(payload) => {
                    let matches = metadata
                        .checksums
                        .get(index)
                        .map_or(true, |expected| *expected == payload_checksum(&payload));
                    if !matches {
                        report.issues.push(format!("checksum mismatch for chunk {}", index));
                    }
                }
                None => report.issues.push(format!("chunk {} is missing", index)),
            }
        }

        report.is_valid = report.issues.is_empty();
        Ok(report)
    }

    async fn clear(&self) -> SearchResult<()> {
        let metadata = match self.load_metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("⚠️ Clearing chunks with unreadable metadata: {}", e);
                None
            }
        };

        if let Some(metadata) = metadata {
            for index in 0..metadata.total_chunks {
                self.storage.remove(&chunk_key(index)).await?;
            }
        }
        self.storage.remove(METADATA_KEY).await?;
        *self.metadata_cache.write().await = None;
        Ok(())
    }

    async fn reset_cache(&self) {
        *self.metadata_cache.write().await = None;
    }

    fn strategy_name(&self) -> &'static str {
        "chunked"
    }

    fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_db::backend::{MemoryStorage, StorageKind};

    fn records(ids: std::ops::Range<usize>) -> Vec<VectorRecord> {
        ids.map(|i| VectorRecord {
            block_id: format!("b{}", i),
            page_name: "Journal".to_string(),
            content: format!("block number {}", i),
            vector: vec![i as f32, 1.0],
            last_updated: 0,
        })
        .collect()
    }

    fn key_value_storage() -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::new().with_kind(StorageKind::KeyValue, "local-storage"))
    }

    fn ids(records: &[VectorRecord]) -> Vec<String> {
        records.iter().map(|r| r.block_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_records_are_split_into_fixed_chunks() {
        let storage = key_value_storage();
        let store = ChunkedStore::new(storage.clone(), CompressionAlgorithm::Gzip, 3);

        store.append(&records(0..7)).await.unwrap();

        let metadata = store.load_metadata().await.unwrap().unwrap();
        assert_eq!(metadata.total_chunks, 3);
        assert_eq!(metadata.total_records, 7);
        assert_eq!(metadata.checksums.len(), 3);
        assert_eq!(
            storage.keys().await,
            vec!["vector-chunk-0", "vector-chunk-1", "vector-chunk-2", "vector-chunks-meta"]
        );
        assert_eq!(ids(&store.load_all().await.unwrap()), ids(&records(0..7)));
    }

    #[tokio::test]
    async fn test_append_rewrites_only_the_partial_tail() {
        let storage = key_value_storage();
        let store = ChunkedStore::new(storage.clone(), CompressionAlgorithm::Lz4, 3);
        store.append(&records(0..4)).await.unwrap();

        let first_chunk = storage.get(&chunk_key(0)).await.unwrap();
        store.append(&records(4..6)).await.unwrap();

        // full chunk untouched, tail merged and re-split
        assert_eq!(storage.get(&chunk_key(0)).await.unwrap(), first_chunk);
        let metadata = store.load_metadata().await.unwrap().unwrap();
        assert_eq!(metadata.total_chunks, 2);
        assert_eq!(metadata.total_records, 6);
        assert_eq!(ids(&store.load_all().await.unwrap()), ids(&records(0..6)));

        // a full tail means the next append only adds chunks
        let second_chunk = storage.get(&chunk_key(1)).await.unwrap();
        store.append(&records(6..7)).await.unwrap();
        assert_eq!(storage.get(&chunk_key(1)).await.unwrap(), second_chunk);
        assert_eq!(store.load_metadata().await.unwrap().unwrap().total_chunks, 3);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_isolated() {
        let storage = key_value_storage();
        let store = ChunkedStore::new(storage.clone(), CompressionAlgorithm::None, 2);
        store.append(&records(0..6)).await.unwrap();

        // valid payload, but not the one the metadata vouches for
        let forged = encode_records(&records(10..12), CompressionAlgorithm::None).unwrap();
        storage.set(&chunk_key(1), &forged).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(ids(&loaded), vec!["b0", "b1", "b4", "b5"]);
        assert_eq!(store.load_metadata().await.unwrap().unwrap().total_records, 4);

        let report = store.check_integrity().await.unwrap();
        assert!(!report.is_valid);
        assert!(report.issues.iter().any(|issue| issue.contains("chunk 1")));
    }

    #[tokio::test]
    async fn test_clear_and_replace() {
        let storage = key_value_storage();
        let store = ChunkedStore::new(storage.clone(), CompressionAlgorithm::Lz4, 2);
        store.append(&records(0..5)).await.unwrap();

        store.replace_all(&records(20..23)).await.unwrap();
        assert_eq!(ids(&store.load_all().await.unwrap()), vec!["b20", "b21", "b22"]);
        assert_eq!(storage.len().await, 3);

        store.clear().await.unwrap();
        assert!(storage.is_empty().await);
        assert!(!store.has_data().await.unwrap());
        assert_eq!(store.summary().await.unwrap(), PersistenceSummary::default());
    }

    #[tokio::test]
    async fn test_dimension_enforced_across_appends() {
        let store = ChunkedStore::new(key_value_storage(), CompressionAlgorithm::Lz4, 4);
        store.append(&records(0..2)).await.unwrap();

        let mut wrong = records(2..3);
        wrong[0].vector = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            store.append(&wrong).await,
            Err(SearchError::DimensionMismatch { expected: 2, found: 3 })
        ));
        assert_eq!(store.summary().await.unwrap().claimed_count, 2);
    }
}
