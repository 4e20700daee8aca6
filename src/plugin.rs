//! Plugin facade
//!
//! Wires the pipeline together from [`PluginSettings`] and the host's
//! collaborators, and exposes the operations the host calls.

use std::sync::Arc;
use std::time::Duration;

use crate::config::PluginSettings;
use crate::embedding_generator::{EmbeddingGenerator, EmbeddingProvider};
use crate::errors::SearchResult;
use crate::host::{NoteGraph, NoticeLevel, Notifier};
use crate::indexing_pipeline::{IncrementalIndexer, IndexingReport};
use crate::llm_client::{LlmClient, TextGenerator};
use crate::search_orchestrator::{SearchOrchestrator, SearchResponse};
use crate::similarity_search::SimilaritySearchEngine;
use crate::vector_db::backend::StorageBackend;
use crate::vector_db::selector::select_backend;
use crate::vector_db::types::{IntegrityReport, StoreStats};
use crate::vector_db::VectorStore;

/// Note search plugin: one instance per host session
pub struct NoteSearchPlugin {
    settings: PluginSettings,
    store: Arc<VectorStore>,
    indexer: Arc<IncrementalIndexer>,
    orchestrator: SearchOrchestrator,
    notifier: Arc<dyn Notifier>,
}

impl NoteSearchPlugin {
    /// Build the pipeline with HTTP embedding and generation clients
    ///
    /// Storage candidates are probed in order and the first working one is used.
    pub async fn initialize(
        settings: PluginSettings,
        graph: Arc<dyn NoteGraph>,
        notifier: Arc<dyn Notifier>,
        storage_candidates: Vec<Arc<dyn StorageBackend>>,
    ) -> SearchResult<Self> {
        settings.validate()?;

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(EmbeddingGenerator::with_options(
            settings.embedding.backend.clone(),
            settings.embedding.dimension_override,
            Duration::from_secs(settings.embedding.timeout_secs),
            settings.embedding.retry.clone(),
        )?);
        let llm = LlmClient::new(
            settings.generation.backend.clone(),
            Duration::from_secs(settings.generation.timeout_secs),
            settings.generation.retry.clone(),
        )?;
        if !llm.is_available().await {
            log::warn!("⚠️ Text generation backend '{}' is not reachable", llm.backend().backend_name());
            notifier.notify(
                NoticeLevel::Warning,
                "Text generation service is not reachable; AI ranking and summaries are unavailable until it is",
            );
        }
        let generator: Arc<dyn TextGenerator> = Arc::new(llm);

        Self::with_components(settings, graph, notifier, storage_candidates, embedder, generator).await
    }

    /// Build the pipeline around caller-supplied embedding and generation services
    pub async fn with_components(
        settings: PluginSettings,
        graph: Arc<dyn NoteGraph>,
        notifier: Arc<dyn Notifier>,
        storage_candidates: Vec<Arc<dyn StorageBackend>>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
    ) -> SearchResult<Self> {
        settings.validate()?;

        let storage = match select_backend(&storage_candidates).await {
            Ok(storage) => storage,
            Err(e) => {
                notifier.notify(NoticeLevel::Error, &e.user_message());
                return Err(e);
            }
        };
        let store = Arc::new(VectorStore::for_backend(storage, &settings.storage));

        let indexer = Arc::new(IncrementalIndexer::new(
            Arc::clone(&graph),
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&notifier),
            settings.indexing.clone(),
        ));

        let mut engine = SimilaritySearchEngine::with_options(
            Arc::clone(&store),
            embedder,
            settings.search.similarity_threshold,
            settings.search.query_cache_size,
        );
        if settings.search.refresh_before_search {
            engine = engine.with_refresher(indexer.clone());
        }

        let orchestrator = SearchOrchestrator::new(
            graph,
            Arc::clone(&notifier),
            Arc::new(engine),
            generator,
            settings.search.clone(),
        );

        log::info!(
            "🚀 Note search ready ({} embeddings, {:?} ranking)",
            settings.embedding.backend.backend_name(),
            settings.search.strategy
        );

        Ok(Self {
            settings,
            store,
            indexer,
            orchestrator,
            notifier,
        })
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Ranked results plus a deferred summary; never fails
    pub async fn search(&self, query: &str) -> SearchResponse {
        self.orchestrator.search(query).await
    }

    pub async fn index_all(&self) -> SearchResult<IndexingReport> {
        self.report_failure(self.indexer.index_all().await)
    }

    pub async fn continue_indexing(&self) -> SearchResult<IndexingReport> {
        self.report_failure(self.indexer.continue_indexing().await)
    }

    pub async fn index_changes(&self) -> SearchResult<IndexingReport> {
        self.report_failure(self.indexer.index_changes().await)
    }

    /// Stop the running indexing operation after its current batch
    pub fn cancel_indexing(&self) {
        self.indexer.cancel();
    }

    pub fn is_indexing(&self) -> bool {
        self.indexer.is_running()
    }

    pub async fn get_store_stats(&self) -> SearchResult<StoreStats> {
        self.store.get_stats().await
    }

    pub async fn check_integrity(&self) -> SearchResult<IntegrityReport> {
        let report = self.store.check_vector_data_integrity().await?;
        if !report.is_valid {
            log::warn!("⚠️ Index integrity issues: {:?}", report.issues);
        }
        Ok(report)
    }

    pub async fn clear_index(&self) -> SearchResult<()> {
        self.store.clear().await?;
        self.notifier.notify(NoticeLevel::Success, "Search index cleared");
        Ok(())
    }

    fn report_failure(&self, result: SearchResult<IndexingReport>) -> SearchResult<IndexingReport> {
        if let Err(e) = &result {
            log::error!("❌ Indexing failed: {}", e);
            self.notifier.notify(NoticeLevel::Error, &e.user_message());
        }
        result
    }
}
