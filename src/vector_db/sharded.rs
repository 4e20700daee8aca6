use std::sync::Arc;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;

use super::backend::StorageBackend;
use super::compression::{decode_records, encode_records};
use super::types::{CompressionAlgorithm, IntegrityReport, Manifest, VectorRecord};
use super::{check_batch_dimension, PersistenceSummary, VectorPersistence};
use crate::errors::{SearchError, SearchResult};

/// Key of the uncompressed manifest
pub const MANIFEST_KEY: &str = "vector-manifest";

/// Append-only shards plus a manifest
///
/// Shards are never edited in place: appends add new `shard-<id>` keys and a
/// full rebuild clears everything first. The manifest is cached and updated in
/// place after each successful write.
pub struct ShardedStore {
    storage: Arc<dyn StorageBackend>,
    compression: CompressionAlgorithm,
    max_records_per_shard: usize,
    rebuild_on_mismatch: bool,
    manifest_cache: RwLock<Option<Manifest>>,
}

impl ShardedStore {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        compression: CompressionAlgorithm,
        max_records_per_shard: usize,
        rebuild_on_mismatch: bool,
    ) -> Self {
        Self {
            storage,
            compression,
            max_records_per_shard: max_records_per_shard.max(1),
            rebuild_on_mismatch,
            manifest_cache: RwLock::new(None),
        }
    }

    /// Current manifest, from cache when possible
    pub async fn load_manifest(&self) -> SearchResult<Option<Manifest>> {
        if let Some(manifest) = self.manifest_cache.read().await.as_ref() {
            return Ok(Some(manifest.clone()));
        }

        let Some(raw) = self.storage.get(MANIFEST_KEY).await? else {
            return Ok(None);
        };
        let manifest: Manifest = serde_json::from_str(&raw).map_err(|e| SearchError::Corruption {
            details: format!("manifest is unreadable: {}", e),
        })?;

        *self.manifest_cache.write().await = Some(manifest.clone());
        Ok(Some(manifest))
    }

    async fn save_manifest(&self, manifest: &Manifest) -> SearchResult<()> {
        let json = serde_json::to_string(manifest)?;
        self.storage.set(MANIFEST_KEY, &json).await?;
        *self.manifest_cache.write().await = Some(manifest.clone());
        Ok(())
    }

    async fn write_shards(&self, manifest: &mut Manifest, records: &[VectorRecord]) -> SearchResult<()> {
        for batch in records.chunks(self.max_records_per_shard) {
            let key = manifest.next_shard_key();
            let payload = encode_records(batch, self.compression)?;
            self.storage.set(&key, &payload).await?;
            manifest.record_shard(key, batch.len());
            // Persist after every shard so an interruption loses at most one shard
            self.save_manifest(manifest).await?;
        }
        Ok(())
    }

    async fn load_shard(&self, key: &str) -> SearchResult<Vec<VectorRecord>> {
        match self.storage.get(key).await? {
            Some(payload) => decode_records(&payload),
            None => Err(SearchError::Corruption {
                details: format!("shard '{}' is listed in the manifest but missing", key),
            }),
        }
    }
}

#[async_trait]
impl VectorPersistence for ShardedStore {
    async fn append(&self, records: &[VectorRecord]) -> SearchResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut manifest = self.load_manifest().await?.unwrap_or_default();
        manifest.dimension = check_batch_dimension(records, manifest.dimension)?;
        self.write_shards(&mut manifest, records).await?;

        log::debug!(
            "📦 Appended {} records, manifest now lists {} shards / {} records",
            records.len(),
            manifest.shards.len(),
            manifest.total_count
        );
        Ok(())
    }

    async fn load_all(&self) -> SearchResult<Vec<VectorRecord>> {
        let Some(mut manifest) = self.load_manifest().await? else {
            return Ok(Vec::new());
        };

        let loads = manifest.shards.iter().map(|key| self.load_shard(key));
        let decoded = join_all(loads).await;

        let mut records = Vec::with_capacity(manifest.total_count);
        let mut failed_shards = 0;
        for (key, result) in manifest.shards.iter().zip(decoded) {
            match result {
                Ok(batch) => records.extend(batch),
                Err(e) => {
                    failed_shards += 1;
                    log::warn!("⚠️ Skipping shard '{}': {}", key, e);
                }
            }
        }

        if records.len() != manifest.total_count {
            log::warn!(
                "⚠️ Manifest claims {} records but {} decoded ({} shards failed)",
                manifest.total_count,
                records.len(),
                failed_shards
            );

            if self.rebuild_on_mismatch {
                log::warn!("🔧 Repacking store from the {} readable records", records.len());
                self.replace_all(&records).await?;
            } else {
                manifest.total_count = records.len();
                if let Err(e) = self.save_manifest(&manifest).await {
                    log::warn!("⚠️ Could not repair manifest count: {}", e);
                }
            }
        }

        Ok(records)
    }

    async fn replace_all(&self, records: &[VectorRecord]) -> SearchResult<()> {
        self.clear().await?;
        if records.is_empty() {
            return Ok(());
        }

        let mut manifest = Manifest {
            dimension: check_batch_dimension(records, None)?,
            ..Manifest::default()
        };
        self.write_shards(&mut manifest, records).await
    }

    async fn has_data(&self) -> SearchResult<bool> {
        Ok(self
            .load_manifest()
            .await?
            .map_or(false, |manifest| manifest.total_count > 0))
    }

    async fn summary(&self) -> SearchResult<PersistenceSummary> {
        Ok(match self.load_manifest().await? {
            Some(manifest) => PersistenceSummary {
                claimed_count: manifest.total_count,
                dimension: manifest.dimension,
                segment_count: manifest.shards.len(),
            },
            None => PersistenceSummary::default(),
        })
    }

    async fn check_integrity(&self) -> SearchResult<IntegrityReport> {
        let mut report = IntegrityReport {
            is_valid: true,
            ..IntegrityReport::default()
        };

        let manifest = match self.load_manifest().await {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Ok(report),
            Err(e) => {
                report.is_valid = false;
                report.manifest_exists = true;
                report.issues.push(e.to_string());
                return Ok(report);
            }
        };

        report.manifest_exists = true;
        report.claimed_count = manifest.total_count;
        report.shard_count = manifest.shards.len();

        if manifest.total_count > 0 && manifest.shards.is_empty() {
            report.issues.push(format!("manifest claims {} records but lists no shards", manifest.total_count));
        }
        if (manifest.shards.len() as u64) > manifest.next_shard_id {
            report.issues.push(format!(
                "{} shards listed but next shard id is {}",
                manifest.shards.len(),
                manifest.next_shard_id
            ));
        }
        let mut keys = manifest.shards.clone();
        keys.sort();
        keys.dedup();
        if keys.len() != manifest.shards.len() {
            report.issues.push("manifest lists a shard more than once".to_string());
        }
        if manifest.total_count > 0 && manifest.dimension.is_none() {
            report.issues.push("manifest has records but no vector dimension".to_string());
        }

        report.is_valid = report.issues.is_empty();
        Ok(report)
    }

    async fn clear(&self) -> SearchResult<()> {
        let manifest = match self.load_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!("⚠️ Clearing store with unreadable manifest: {}", e);
                None
            }
        };

        if let Some(manifest) = manifest {
            for key in &manifest.shards {
                self.storage.remove(key).await?;
            }
        }
        self.storage.remove(MANIFEST_KEY).await?;
        *self.manifest_cache.write().await = None;
        Ok(())
    }

    async fn reset_cache(&self) {
        *self.manifest_cache.write().await = None;
    }

    fn strategy_name(&self) -> &'static str {
        "sharded"
    }

    fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }
}
