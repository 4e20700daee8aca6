use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::embedding_generator::EmbeddingBackendConfig;
use crate::errors::{SearchError, SearchResult};
use crate::llm_client::GenerationBackendConfig;
use crate::retry::RetryPolicy;
use crate::search_orchestrator::RankingStrategy;
use crate::vector_db::types::CompressionAlgorithm;

/// Every user-facing setting of the search plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub search: SearchSettings,
    pub indexing: IndexingSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackendConfig,
    /// Overrides the model's documented vector length
    pub dimension_override: Option<usize>,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendConfig::default(),
            dimension_override: None,
            timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub backend: GenerationBackendConfig,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            backend: GenerationBackendConfig::default(),
            timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub strategy: RankingStrategy,
    /// Maximum results returned by one search
    pub limit: usize,
    /// Results must score strictly above this cosine similarity
    pub similarity_threshold: f32,
    pub relevance_batch_size: usize,
    /// AI relevance scores must be strictly above this value to survive
    pub min_relevance_score: f32,
    /// Ask the text generator for extra keywords
    pub ai_keyword_expansion: bool,
    /// Entries kept in the query-embedding cache
    pub query_cache_size: usize,
    /// Index changed notes before running a vector search
    pub refresh_before_search: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            strategy: RankingStrategy::default(),
            limit: 50,
            similarity_threshold: 0.3,
            relevance_batch_size: 10,
            min_relevance_score: 5.0,
            ai_keyword_expansion: false,
            query_cache_size: 100,
            refresh_before_search: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    /// Concurrent embedding requests per batch
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Persist pending records after this many processed items
    pub checkpoint_interval: usize,
    /// Emit a memory-cleanup hint after this many processed items
    pub memory_hint_interval: usize,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 20,
            checkpoint_interval: 100,
            memory_hint_interval: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub compression: CompressionAlgorithm,
    /// Records per shard for the sharded strategy
    pub max_records_per_shard: usize,
    /// Records per chunk for the chunked strategy
    pub chunk_size: usize,
    /// Repack the store instead of only fixing counts when a load finds fewer
    /// records than the manifest claims
    pub rebuild_on_count_mismatch: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            compression: CompressionAlgorithm::Lz4,
            max_records_per_shard: 500,
            chunk_size: 200,
            rebuild_on_count_mismatch: false,
        }
    }
}

impl PluginSettings {
    /// `~/.ainote/search_settings.json`
    pub fn default_path() -> SearchResult<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| SearchError::config("Could not determine home directory"))?;
        Ok(home_dir.join(".ainote").join("search_settings.json"))
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_from(path: &Path) -> SearchResult<Self> {
        if !path.exists() {
            log::info!("⚙️ No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SearchError::config(format!("Failed to read settings file: {}", e)))?;
        let settings: PluginSettings = serde_json::from_str(&content)
            .map_err(|e| SearchError::config(format!("Failed to parse settings file: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> SearchResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    SearchError::storage(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| SearchError::storage(format!("Failed to write settings file: {}", e)))
    }

    pub fn load() -> SearchResult<Self> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn save(&self) -> SearchResult<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Reject values the pipeline cannot run with
    ///
    /// Generation backend settings are checked per request, not here.
    pub fn validate(&self) -> SearchResult<()> {
        self.embedding.backend.validate()?;

        if self.embedding.dimension_override == Some(0) {
            return Err(SearchError::config("embedding dimension override must be positive"));
        }
        if self.embedding.timeout_secs == 0 || self.generation.timeout_secs == 0 {
            return Err(SearchError::config("request timeouts must be positive"));
        }
        if self.search.limit == 0 {
            return Err(SearchError::config("search limit must be positive"));
        }
        if !(-1.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(SearchError::config(format!(
                "similarity threshold {} is outside [-1, 1]",
                self.search.similarity_threshold
            )));
        }
        if !(0.0..=10.0).contains(&self.search.min_relevance_score) {
            return Err(SearchError::config(format!(
                "minimum relevance score {} is outside [0, 10]",
                self.search.min_relevance_score
            )));
        }
        if self.search.relevance_batch_size == 0 || self.indexing.batch_size == 0 {
            return Err(SearchError::config("batch sizes must be positive"));
        }
        if self.indexing.checkpoint_interval == 0 || self.indexing.memory_hint_interval == 0 {
            return Err(SearchError::config("indexing intervals must be positive"));
        }
        if self.storage.max_records_per_shard == 0 || self.storage.chunk_size == 0 {
            return Err(SearchError::config("shard and chunk sizes must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = PluginSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.search.strategy, RankingStrategy::VectorOnly);
        assert_eq!(settings.search.limit, 50);
        assert_eq!(settings.indexing.batch_size, 10);
        assert_eq!(settings.indexing.checkpoint_interval, 100);
        assert_eq!(settings.storage.compression, CompressionAlgorithm::Lz4);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("search_settings.json");

        let mut settings = PluginSettings::default();
        settings.search.strategy = RankingStrategy::VectorThenAi;
        settings.search.min_relevance_score = 6.5;
        settings.storage.compression = CompressionAlgorithm::Gzip;
        settings.save_to(&path).unwrap();

        let loaded = PluginSettings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = PluginSettings::load_from(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, PluginSettings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("search_settings.json");
        fs::write(&path, r#"{"search": {"limit": 7}}"#).unwrap();

        let loaded = PluginSettings::load_from(&path).unwrap();
        assert_eq!(loaded.search.limit, 7);
        assert_eq!(loaded.search.similarity_threshold, 0.3);
        assert_eq!(loaded.indexing, IndexingSettings::default());
    }

    #[test]
    fn test_garbage_file_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("search_settings.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            PluginSettings::load_from(&path),
            Err(SearchError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = PluginSettings::default();
        settings.search.similarity_threshold = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = PluginSettings::default();
        settings.indexing.batch_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = PluginSettings::default();
        settings.search.min_relevance_score = 11.0;
        assert!(settings.validate().is_err());

        let mut settings = PluginSettings::default();
        settings.embedding.backend = EmbeddingBackendConfig::Cloud {
            api_url: "https://api.example.com/v1/embeddings".to_string(),
            api_key: String::new(),
            model: "bge-m3".to_string(),
        };
        assert!(matches!(settings.validate(), Err(SearchError::Configuration { .. })));
    }
}
