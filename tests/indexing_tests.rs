//! Incremental indexing against file-backed storage, across restarts

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use ainote_search::config::{IndexingSettings, PluginSettings, StorageSettings};
use ainote_search::embedding_generator::EmbeddingProvider;
use ainote_search::host::LogNotifier;
use ainote_search::llm_client::TextGenerator;
use ainote_search::{
    CancellationToken, FileStorage, InMemoryNoteGraph, IncrementalIndexer, NoteBlock, NoteSearchPlugin, SearchError,
    SearchResult, StorageBackend, VectorStore,
};
use async_trait::async_trait;
use tempfile::TempDir;

/// Vector derived from the text length; optionally cancels on its third call
#[derive(Default)]
struct LengthEmbedder {
    calls: AtomicUsize,
    cancel_on_third_call: OnceLock<Arc<CancellationToken>>,
    cancelled_once: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for LengthEmbedder {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == 3 && !self.cancelled_once.swap(true, Ordering::SeqCst) {
            if let Some(token) = self.cancel_on_third_call.get() {
                token.cancel();
            }
        }
        let length = text.chars().count() as f32;
        Ok(vec![1.0, length / 100.0])
    }

    fn dimension(&self) -> usize {
        2
    }

    fn backend_name(&self) -> &str {
        "length"
    }
}

struct SilentGenerator;

#[async_trait]
impl TextGenerator for SilentGenerator {
    async fn generate(&self, _prompt: &str) -> SearchResult<String> {
        Err(SearchError::config("generation is not configured"))
    }
}

fn blocks(ids: &[&str]) -> Vec<NoteBlock> {
    ids.iter()
        .map(|id| NoteBlock::new(*id, format!("Daily log entry for {}", id), "Log"))
        .collect()
}

async fn plugin_at(dir: &TempDir, graph: Arc<InMemoryNoteGraph>, embedder: Arc<LengthEmbedder>) -> NoteSearchPlugin {
    let mut settings = PluginSettings::default();
    settings.indexing.batch_delay_ms = 0;
    settings.storage.max_records_per_shard = 3;
    let storage: Vec<Arc<dyn StorageBackend>> = vec![Arc::new(FileStorage::new(dir.path()))];

    NoteSearchPlugin::with_components(
        settings,
        graph,
        Arc::new(LogNotifier),
        storage,
        embedder,
        Arc::new(SilentGenerator),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_continue_after_restart_embeds_only_new_notes() {
    let temp_dir = TempDir::new().unwrap();
    let graph = Arc::new(InMemoryNoteGraph::new(blocks(&["a", "b", "c", "d"])));

    let first = plugin_at(&temp_dir, graph.clone(), Arc::new(LengthEmbedder::default())).await;
    let report = first.index_all().await.unwrap();
    assert_eq!(report.persisted, 4);
    drop(first);

    graph.set_blocks(blocks(&["a", "b", "c", "d", "e", "f"]));
    let embedder = Arc::new(LengthEmbedder::default());
    let second = plugin_at(&temp_dir, graph, embedder.clone()).await;

    let report = second.continue_indexing().await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

    let stats = second.get_store_stats().await.unwrap();
    assert_eq!(stats.count, 6);
    assert!(second.check_integrity().await.unwrap().is_valid);
}

#[tokio::test]
async fn test_changes_after_restart_drop_and_reembed() {
    let temp_dir = TempDir::new().unwrap();
    let graph = Arc::new(InMemoryNoteGraph::new(blocks(&["a", "b", "c"])));

    let first = plugin_at(&temp_dir, graph.clone(), Arc::new(LengthEmbedder::default())).await;
    first.index_all().await.unwrap();
    drop(first);

    let mut edited = blocks(&["b", "c", "d"]);
    edited[1].content = "Daily log entry for c, now with more detail".to_string();
    graph.set_blocks(edited);

    let embedder = Arc::new(LengthEmbedder::default());
    let second = plugin_at(&temp_dir, graph, embedder.clone()).await;
    let report = second.index_changes().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.modified, 1);
    assert_eq!(report.succeeded, 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

    let records = second.store().load_vector_data(true).await.unwrap();
    let mut ids: Vec<&str> = records.iter().map(|r| r.block_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["b", "c", "d"]);
    let c = records.iter().find(|r| r.block_id == "c").unwrap();
    assert!(c.content.contains("more detail"));

    // A second pass finds nothing to do
    let report = second.index_changes().await.unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_run_resumes_where_it_stopped() {
    let temp_dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..10).map(|i| format!("block-{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let graph = Arc::new(InMemoryNoteGraph::new(blocks(&id_refs)));

    let store = Arc::new(VectorStore::for_backend(
        Arc::new(FileStorage::new(temp_dir.path())),
        &StorageSettings::default(),
    ));
    let embedder = Arc::new(LengthEmbedder::default());
    let indexer = IncrementalIndexer::new(
        graph,
        store.clone(),
        embedder.clone(),
        Arc::new(LogNotifier),
        IndexingSettings {
            batch_size: 2,
            batch_delay_ms: 0,
            ..IndexingSettings::default()
        },
    );
    let _ = embedder.cancel_on_third_call.set(indexer.cancellation_token());

    // The batch holding the third call still completes
    let report = indexer.index_all().await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.processed, 4);
    assert_eq!(report.persisted, 4);
    assert_eq!(store.load_vector_data(true).await.unwrap().len(), 4);

    let resumed = indexer.continue_indexing().await.unwrap();
    assert!(!resumed.cancelled);
    assert_eq!(resumed.total, 6);
    assert_eq!(store.load_vector_data(true).await.unwrap().len(), 10);
    assert!(!indexer.is_running());
}
