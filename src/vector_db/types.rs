use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Format version written into manifests and chunk metadata
///
/// Carried for future migrations; readers currently accept any value.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Decimal digits kept for stored vector components
pub const VECTOR_PRECISION_DIGITS: i32 = 4;

/// One embedded block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    /// Host-owned block identifier
    pub block_id: String,
    pub page_name: String,
    /// Preprocessed block text
    pub content: String,
    pub vector: Vec<f32>,
    /// Milliseconds since the Unix epoch
    pub last_updated: i64,
}

impl VectorRecord {
    pub fn new(
        block_id: impl Into<String>,
        page_name: impl Into<String>,
        content: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            block_id: block_id.into(),
            page_name: page_name.into(),
            content: content.into(),
            vector,
            last_updated: Utc::now().timestamp_millis(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Storage projection of [`VectorRecord`] with short field names and
/// vector components rounded to [`VECTOR_PRECISION_DIGITS`] decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactVectorRecord {
    #[serde(rename = "i")]
    pub id: String,
    #[serde(rename = "p")]
    pub page: String,
    #[serde(rename = "c")]
    pub content: String,
    #[serde(rename = "v")]
    pub vector: Vec<f32>,
    #[serde(rename = "t")]
    pub updated: i64,
}

/// Index of every shard written by the sharded strategy
///
/// Persisted as plain JSON so existence checks never decompress anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub next_shard_id: u64,
    pub shards: Vec<String>,
    pub total_count: usize,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Vector length shared by every record; unset until the first write
    #[serde(default)]
    pub dimension: Option<usize>,
}

fn default_version() -> u32 {
    STORE_FORMAT_VERSION
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            next_shard_id: 0,
            shards: Vec::new(),
            total_count: 0,
            version: STORE_FORMAT_VERSION,
            dimension: None,
        }
    }
}

impl Manifest {
    pub fn shard_key(id: u64) -> String {
        format!("shard-{}", id)
    }

    /// Key the next shard will be written under
    pub fn next_shard_key(&self) -> String {
        Self::shard_key(self.next_shard_id)
    }

    /// Account for a freshly written shard
    pub fn record_shard(&mut self, key: String, count: usize) {
        self.next_shard_id += 1;
        self.shards.push(key);
        self.total_count += count;
    }
}

/// Header record of the chunked strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub total_chunks: usize,
    pub total_records: usize,
    /// Milliseconds since the Unix epoch of the last write
    pub timestamp: i64,
    pub version: u32,
    /// SHA-256 of each stored chunk payload, by chunk index
    #[serde(default)]
    pub checksums: Vec<String>,
    #[serde(default)]
    pub dimension: Option<usize>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            total_chunks: 0,
            total_records: 0,
            timestamp: Utc::now().timestamp_millis(),
            version: STORE_FORMAT_VERSION,
            checksums: Vec::new(),
            dimension: None,
        }
    }
}

/// Diagnostic snapshot of a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub count: usize,
    pub dimension: Option<usize>,
    /// Persistence strategy ("sharded" or "chunked")
    pub backend: String,
    pub shard_count: usize,
    /// Name of the key/value backend underneath
    pub storage_backend: String,
}

/// Result of an integrity check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub manifest_exists: bool,
    pub claimed_count: usize,
    pub shard_count: usize,
}

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// Gzip compression (good balance of speed and compression ratio)
    Gzip,
    /// LZ4 compression (faster, lower compression ratio)
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Tag prefixed to every stored payload so readers can decode without
    /// knowing the writer's configuration
    pub fn payload_tag(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "raw",
            CompressionAlgorithm::Gzip => "gz",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    pub fn from_payload_tag(tag: &str) -> Option<Self> {
        match tag {
            "raw" => Some(CompressionAlgorithm::None),
            "gz" => Some(CompressionAlgorithm::Gzip),
            "lz4" => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_accounting() {
        let mut manifest = Manifest::default();
        assert_eq!(manifest.next_shard_key(), "shard-0");

        let key = manifest.next_shard_key();
        manifest.record_shard(key, 3);
        let key = manifest.next_shard_key();
        manifest.record_shard(key, 4);

        assert_eq!(manifest.next_shard_id, 2);
        assert_eq!(manifest.shards, vec!["shard-0", "shard-1"]);
        assert_eq!(manifest.total_count, 7);
    }

    #[test]
    fn test_manifest_json_uses_camel_case() {
        let manifest = Manifest::default();
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("nextShardId"));
        assert!(json.contains("totalCount"));

        // Manifests written before the version field still load
        let legacy: Manifest =
            serde_json::from_str(r#"{"nextShardId":1,"shards":["shard-0"],"totalCount":2}"#).unwrap();
        assert_eq!(legacy.version, STORE_FORMAT_VERSION);
        assert_eq!(legacy.dimension, None);
    }

    #[test]
    fn test_compact_record_short_names() {
        let compact = CompactVectorRecord {
            id: "b1".into(),
            page: "p".into(),
            content: "c".into(),
            vector: vec![0.5],
            updated: 1,
        };
        let json = serde_json::to_string(&compact).unwrap();
        assert_eq!(json, r#"{"i":"b1","p":"p","c":"c","v":[0.5],"t":1}"#);
    }

    #[test]
    fn test_payload_tags_round_trip() {
        for algorithm in [CompressionAlgorithm::None, CompressionAlgorithm::Gzip, CompressionAlgorithm::Lz4] {
            assert_eq!(CompressionAlgorithm::from_payload_tag(algorithm.payload_tag()), Some(algorithm));
        }
        assert_eq!(CompressionAlgorithm::from_payload_tag("zstd"), None);
        assert_eq!(CompressionAlgorithm::default(), CompressionAlgorithm::Lz4);
    }
}
