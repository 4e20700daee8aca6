//! # Incremental Indexing
//!
//! Keeps the vector store in step with the host's notes.
//!
//! ## Modes
//!
//! - **Full**: clear the store and embed every indexable block
//! - **Continue**: embed only blocks whose id is not stored yet
//! - **Changes**: additionally drop deleted blocks and re-embed blocks whose
//!   content hash changed
//!
//! ## Processing
//!
//! Blocks are embedded in batches of concurrent requests with a short pause
//! between batches. Records are persisted at checkpoints rather than once at
//! the end, so an interrupted run keeps most of its work. A failed item is
//! dropped and counted; a batch where every item failed is skipped. Only
//! configuration errors end a run early.
//!
//! A store whose manifest claims data that cannot be loaded is treated as
//! corrupt: it is cleared and rebuilt from scratch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::IndexingSettings;
use crate::embedding_generator::EmbeddingProvider;
use crate::errors::{SearchError, SearchResult};
use crate::host::{NoteGraph, NoticeLevel, Notifier};
use crate::similarity_search::IndexRefresher;
use crate::text_processing::{collect_indexable_content, content_hash, IndexableBlock};
use crate::vector_db::types::VectorRecord;
use crate::vector_db::VectorStore;

/// Thread-safe cancellation token for cooperative cancellation
///
/// Checked between batches; a cancelled run still persists what it embedded.
#[derive(Debug)]
pub struct CancellationToken {
    cancelled: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    /// Request cancellation of the running operation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexingMode {
    Full,
    Continue,
    Changes,
}

/// Outcome of one indexing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingReport {
    pub mode: IndexingMode,
    /// Blocks selected for embedding
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_batches: usize,
    /// Stored records whose block no longer exists
    pub deleted: usize,
    /// Stored records re-embedded because their content changed
    pub modified: usize,
    /// Records written to the store
    pub persisted: usize,
    /// Records embedded but not persisted because storage was full
    pub unsaved: usize,
    pub cancelled: bool,
    /// Corruption was detected and the run became a full rebuild
    pub rebuilt_after_corruption: bool,
}

impl IndexingReport {
    fn new(mode: IndexingMode) -> Self {
        Self {
            mode,
            total: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped_batches: 0,
            deleted: 0,
            modified: 0,
            persisted: 0,
            unsaved: 0,
            cancelled: false,
            rebuilt_after_corruption: false,
        }
    }

    /// Whether the run changed the store
    pub fn changed_store(&self) -> bool {
        self.persisted > 0 || self.deleted > 0 || self.modified > 0
    }
}

/// Difference between the host's blocks and the stored records
struct ChangeSet {
    to_embed: Vec<IndexableBlock>,
    /// Records of blocks that still exist, including the old versions of modified ones
    kept: Vec<VectorRecord>,
    deleted: usize,
    modified_ids: HashSet<String>,
}

impl ChangeSet {
    fn is_empty(&self) -> bool {
        self.to_embed.is_empty() && self.deleted == 0
    }
}

fn diff_against_store(current: Vec<IndexableBlock>, stored: &[VectorRecord]) -> ChangeSet {
    let current_ids: HashSet<&str> = current.iter().map(|block| block.block_id.as_str()).collect();
    let stored_hashes: HashMap<&str, String> = stored
        .iter()
        .map(|record| (record.block_id.as_str(), content_hash(&record.content)))
        .collect();

    let mut modified_ids = HashSet::new();
    let mut to_embed = Vec::new();
    for block in &current {
        match stored_hashes.get(block.block_id.as_str()) {
            None => to_embed.push(block.clone()),
            Some(hash) if *hash != block.content_hash => {
                modified_ids.insert(block.block_id.clone());
                to_embed.push(block.clone());
            }
            Some(_) => {}
        }
    }

    let mut deleted = 0;
    let mut kept = Vec::with_capacity(stored.len());
    for record in stored {
        if !current_ids.contains(record.block_id.as_str()) {
            deleted += 1;
        } else {
            kept.push(record.clone());
        }
    }

    ChangeSet {
        to_embed,
        kept,
        deleted,
        modified_ids,
    }
}

/// Embeds note blocks into a [`VectorStore`]
pub struct IncrementalIndexer {
    graph: Arc<dyn NoteGraph>,
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    notifier: Arc<dyn Notifier>,
    settings: IndexingSettings,
    cancellation_token: Arc<CancellationToken>,
    run_lock: Mutex<()>,
}

impl IncrementalIndexer {
    pub fn new(
        graph: Arc<dyn NoteGraph>,
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        notifier: Arc<dyn Notifier>,
        settings: IndexingSettings,
    ) -> Self {
        Self {
            graph,
            store,
            embedder,
            notifier,
            settings,
            cancellation_token: Arc::new(CancellationToken::new()),
            run_lock: Mutex::new(()),
        }
    }

    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancellation_token)
    }

    /// Ask the running operation to stop after its current batch
    pub fn cancel(&self) {
        log::info!("⏹️ Indexing cancellation requested");
        self.cancellation_token.cancel();
    }

    /// Whether an indexing run currently holds the store
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Clear the store and embed every indexable block
    pub async fn index_all(&self) -> SearchResult<IndexingReport> {
        let _guard = self.run_lock.lock().await;
        self.cancellation_token.reset();
        self.full_rebuild().await
    }

    /// Embed blocks that are not stored yet
    pub async fn continue_indexing(&self) -> SearchResult<IndexingReport> {
        let _guard = self.run_lock.lock().await;
        self.cancellation_token.reset();

        let Some(stored) = self.load_existing().await? else {
            return self.rebuild_after_corruption().await;
        };

        let stored_ids: HashSet<&str> = stored.iter().map(|record| record.block_id.as_str()).collect();
        let missing: Vec<IndexableBlock> = collect_indexable_content(self.graph.as_ref())
            .await?
            .into_iter()
            .filter(|block| !stored_ids.contains(block.block_id.as_str()))
            .collect();

        log::info!("▶️ Continuing indexing: {} of the notes are not indexed yet", missing.len());
        let mut report = IndexingReport::new(IndexingMode::Continue);
        if missing.is_empty() {
            self.notifier.notify(NoticeLevel::Success, "Index is already up to date");
            return Ok(report);
        }
        self.process(missing, &mut report).await?;
        self.announce_completion(&report);
        Ok(report)
    }

    /// Drop deleted blocks, re-embed modified ones and embed new ones
    pub async fn index_changes(&self) -> SearchResult<IndexingReport> {
        let _guard = self.run_lock.lock().await;
        self.cancellation_token.reset();
        self.apply_changes(true).await
    }

    async fn full_rebuild(&self) -> SearchResult<IndexingReport> {
        let blocks = collect_indexable_content(self.graph.as_ref()).await?;
        log::info!("🗂️ Full index rebuild of {} blocks", blocks.len());
        self.notifier
            .notify(NoticeLevel::Info, &format!("Indexing {} notes...", blocks.len()));

        self.store.clear().await?;
        let mut report = IndexingReport::new(IndexingMode::Full);
        self.process(blocks, &mut report).await?;
        self.announce_completion(&report);
        Ok(report)
    }

    async fn rebuild_after_corruption(&self) -> SearchResult<IndexingReport> {
        log::error!("❌ Vector store claims data but none could be loaded, rebuilding");
        self.notifier.notify(
            NoticeLevel::Warning,
            "The search index was damaged and is being rebuilt",
        );
        let mut report = self.full_rebuild().await?;
        report.rebuilt_after_corruption = true;
        Ok(report)
    }

    /// Stored records, or `None` when the store is corrupt
    async fn load_existing(&self) -> SearchResult<Option<Arc<Vec<VectorRecord>>>> {
        let has_data = match self.store.has_vector_data().await {
            Ok(has_data) => has_data,
            Err(SearchError::Corruption { details }) => {
                log::warn!("⚠️ Store metadata is corrupt: {}", details);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if !has_data {
            return Ok(Some(Arc::new(Vec::new())));
        }

        match self.store.load_vector_data(false).await {
            Ok(records) if records.is_empty() => Ok(None),
            Ok(records) => Ok(Some(records)),
            Err(SearchError::Corruption { details }) => {
                log::warn!("⚠️ Store could not be loaded: {}", details);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_changes(&self, notify_when_current: bool) -> SearchResult<IndexingReport> {
        let Some(stored) = self.load_existing().await? else {
            return self.rebuild_after_corruption().await;
        };

        let current = collect_indexable_content(self.graph.as_ref()).await?;
        let changes = diff_against_store(current, &stored);
        let mut report = IndexingReport::new(IndexingMode::Changes);

        if changes.is_empty() {
            log::debug!("✅ Index matches the notes, nothing to do");
            if notify_when_current {
                self.notifier.notify(NoticeLevel::Success, "Index is already up to date");
            }
            return Ok(report);
        }

        log::info!(
            "🔄 Index changes: {} to embed ({} modified), {} deleted",
            changes.to_embed.len(),
            changes.modified_ids.len(),
            changes.deleted
        );

        if changes.deleted > 0 {
            self.store.replace_all(changes.kept).await?;
        }
        report.deleted = changes.deleted;
        report.modified = changes.modified_ids.len();

        // Old versions of modified blocks stay searchable until their replacement is stored
        let processed = self.process(changes.to_embed, &mut report).await;
        let superseded = if changes.modified_ids.is_empty() {
            Ok(())
        } else {
            self.drop_superseded(&changes.modified_ids).await
        };
        processed?;
        superseded?;
        self.announce_completion(&report);
        Ok(report)
    }

    /// Keep only the newest record of each modified block
    ///
    /// Records load in write order, so the last one per block id is the newest.
    /// A block whose re-embedding never landed keeps its old record.
    async fn drop_superseded(&self, modified_ids: &HashSet<String>) -> SearchResult<()> {
        let records = self.store.load_vector_data(true).await?;
        let mut newest: HashMap<&str, usize> = HashMap::new();
        for (index, record) in records.iter().enumerate() {
            if modified_ids.contains(&record.block_id) {
                newest.insert(record.block_id.as_str(), index);
            }
        }

        let retained: Vec<VectorRecord> = records
            .iter()
            .enumerate()
            .filter(|(index, record)| newest.get(record.block_id.as_str()).map_or(true, |newest| newest == index))
            .map(|(_, record)| record.clone())
            .collect();
        if retained.len() == records.len() {
            return Ok(());
        }

        log::debug!("🧹 Dropping {} superseded records", records.len() - retained.len());
        self.store.replace_all(retained).await
    }

    async fn embed_block(&self, block: &IndexableBlock) -> SearchResult<VectorRecord> {
        let vector = self.embedder.embed(&block.content).await?;
        Ok(VectorRecord::new(
            block.block_id.clone(),
            block.page_name.clone(),
            block.content.clone(),
            vector,
        ))
    }

    /// Persist pending records; a full store keeps them for the next checkpoint
    async fn checkpoint(&self, pending: &mut Vec<VectorRecord>, report: &mut IndexingReport) -> SearchResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        match self.store.add_vector_shard(pending.clone()).await {
            Ok(()) => {
                log::debug!("💾 Checkpoint saved {} records", pending.len());
                report.persisted += pending.len();
                pending.clear();
                Ok(())
            }
            Err(e) if e.is_capacity() => {
                log::warn!("⚠️ Checkpoint failed, storage is full; keeping {} records in memory", pending.len());
                self.notifier.notify(NoticeLevel::Warning, &e.user_message());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn process(&self, blocks: Vec<IndexableBlock>, report: &mut IndexingReport) -> SearchResult<()> {
        let start = Instant::now();
        let batch_size = self.settings.batch_size.max(1);
        let checkpoint_interval = self.settings.checkpoint_interval.max(1);
        let memory_hint_interval = self.settings.memory_hint_interval.max(1);
        let batch_delay = Duration::from_millis(self.settings.batch_delay_ms);

        report.total = blocks.len();
        let mut pending: Vec<VectorRecord> = Vec::new();
        let mut since_checkpoint = 0;
        let mut since_memory_hint = 0;
        let batch_count = blocks.len().div_ceil(batch_size);

        for (batch_index, batch) in blocks.chunks(batch_size).enumerate() {
            if self.cancellation_token.is_cancelled() {
                log::info!("⏹️ Indexing cancelled after {} of {} blocks", report.processed, report.total);
                report.cancelled = true;
                break;
            }

            let results = join_all(batch.iter().map(|block| self.embed_block(block))).await;

            let mut batch_failures = 0;
            for (block, result) in batch.iter().zip(results) {
                match result {
                    Ok(record) => {
                        pending.push(record);
                        report.succeeded += 1;
                    }
                    Err(e) if e.is_configuration() => {
                        log::error!("❌ Embedding backend is misconfigured: {}", e);
                        self.checkpoint(&mut pending, report).await?;
                        return Err(e);
                    }
                    Err(e) => {
                        log::warn!("⚠️ Failed to embed block {}: {}", block.block_id, e);
                        report.failed += 1;
                        batch_failures += 1;
                    }
                }
            }
            if batch_failures == batch.len() {
                log::warn!("⚠️ Skipping batch {} of {}: every item failed", batch_index + 1, batch_count);
                report.skipped_batches += 1;
            }

            report.processed += batch.len();
            since_checkpoint += batch.len();
            since_memory_hint += batch.len();

            if since_checkpoint >= checkpoint_interval {
                since_checkpoint = 0;
                self.checkpoint(&mut pending, report).await?;
                self.notifier.notify(
                    NoticeLevel::Info,
                    &format!("Indexed {}/{} notes", report.processed, report.total),
                );
            }

            if since_memory_hint >= memory_hint_interval {
                since_memory_hint = 0;
                pending.shrink_to_fit();
                log::debug!("🧹 Memory cleanup hint after {} blocks", report.processed);
            }

            if batch_index + 1 < batch_count && !batch_delay.is_zero() {
                tokio::time::sleep(batch_delay).await;
            }
        }

        self.checkpoint(&mut pending, report).await?;
        report.unsaved = pending.len();

        log::info!(
            "✅ Indexed {} blocks in {:?}: {} ok, {} failed, {} batches skipped, {} unsaved",
            report.processed,
            start.elapsed(),
            report.succeeded,
            report.failed,
            report.skipped_batches,
            report.unsaved
        );
        Ok(())
    }

    fn announce_completion(&self, report: &IndexingReport) {
        if report.cancelled {
            self.notifier.notify(
                NoticeLevel::Warning,
                &format!("Indexing cancelled after {} of {} notes", report.processed, report.total),
            );
        } else if report.unsaved > 0 {
            self.notifier.notify(
                NoticeLevel::Warning,
                &format!("{} notes were indexed but could not be saved; free some space and retry", report.unsaved),
            );
        } else {
            self.notifier.notify(
                NoticeLevel::Success,
                &format!("Indexing finished: {} indexed, {} failed", report.succeeded, report.failed),
            );
        }
    }
}

#[async_trait]
impl IndexRefresher for IncrementalIndexer {
    /// Index pending changes unless another run is active
    async fn refresh_if_stale(&self) -> SearchResult<bool> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            log::debug!("⏳ Indexing already running, searching current data");
            return Ok(false);
        };
        let report = self.apply_changes(false).await?;
        Ok(report.changed_store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::host::{InMemoryNoteGraph, NoteBlock, RecordingNotifier};
    use crate::vector_db::backend::{MemoryStorage, StorageBackend};
    use std::sync::atomic::AtomicUsize;

    /// Deterministic embedder; fails on texts containing "unreachable" and
    /// reports a configuration error for "misconfigured"
    struct StubEmbedder {
        calls: AtomicUsize,
        cancel_after_first: Option<Arc<CancellationToken>>,
    }

    impl StubEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                cancel_after_first: None,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            if text.contains("misconfigured") {
                return Err(SearchError::config("embedding model is required"));
            }
            if text.contains("unreachable") {
                return Err(SearchError::Network {
                    message: "connection refused".into(),
                    is_timeout: false,
                });
            }
            Ok(vec![text.len() as f32, text.matches('e').count() as f32, 1.0])
        }
        fn dimension(&self) -> usize {
            3
        }
        fn backend_name(&self) -> &str {
            "stub"
        }
    }

    fn block(id: &str, content: &str) -> NoteBlock {
        NoteBlock::new(id, content, "Notes")
    }

    fn settings(batch_size: usize) -> IndexingSettings {
        IndexingSettings {
            batch_size,
            batch_delay_ms: 0,
            checkpoint_interval: 100,
            memory_hint_interval: 2000,
        }
    }

    struct Fixture {
        graph: Arc<InMemoryNoteGraph>,
        store: Arc<VectorStore>,
        notifier: Arc<RecordingNotifier>,
        indexer: IncrementalIndexer,
    }

    fn fixture(blocks: Vec<NoteBlock>, storage: Arc<MemoryStorage>, embedder: Arc<StubEmbedder>, batch: usize) -> Fixture {
        let graph = Arc::new(InMemoryNoteGraph::new(blocks));
        let store = Arc::new(VectorStore::for_backend(storage, &StorageSettings::default()));
        let notifier = Arc::new(RecordingNotifier::new());
        let indexer = IncrementalIndexer::new(
            graph.clone(),
            store.clone(),
            embedder,
            notifier.clone(),
            settings(batch),
        );
        Fixture {
            graph,
            store,
            notifier,
            indexer,
        }
    }

    async fn stored_ids(store: &VectorStore) -> Vec<String> {
        let mut ids: Vec<String> = store
            .load_vector_data(true)
            .await
            .unwrap()
            .iter()
            .map(|r| r.block_id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_full_index_embeds_every_block() {
        let f = fixture(
            vec![
                block("a", "Alpha block with enough text"),
                block("b", "Beta block with enough text"),
                block("tiny", "short"),
            ],
            Arc::new(MemoryStorage::new()),
            Arc::new(StubEmbedder::new()),
            10,
        );

        let report = f.indexer.index_all().await.unwrap();
        assert_eq!(report.mode, IndexingMode::Full);
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.persisted, 2);
        assert_eq!(stored_ids(&f.store).await, vec!["a", "b"]);

        let messages = f.notifier.messages();
        assert_eq!(messages.last().unwrap().0, NoticeLevel::Success);
    }

    #[tokio::test]
    async fn test_changes_track_deleted_and_new_blocks() {
        let f = fixture(
            vec![
                block("A", "Block A original content"),
                block("B", "Block B original content"),
                block("C", "Block C original content"),
            ],
            Arc::new(MemoryStorage::new()),
            Arc::new(StubEmbedder::new()),
            10,
        );
        f.indexer.index_all().await.unwrap();

        f.graph.set_blocks(vec![
            block("B", "Block B original content"),
            block("C", "Block C original content"),
            block("D", "Block D brand new content"),
        ]);

        let report = f.indexer.index_changes().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.modified, 0);
        assert_eq!(report.succeeded, 1);
        assert_eq!(stored_ids(&f.store).await, vec!["B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_modified_content_is_reembedded() {
        let embedder = Arc::new(StubEmbedder::new());
        let f = fixture(
            vec![block("A", "Block A original content"), block("B", "Block B original content")],
            Arc::new(MemoryStorage::new()),
            embedder.clone(),
            10,
        );
        f.indexer.index_all().await.unwrap();

        f.graph.set_blocks(vec![
            block("A", "Block A rewritten with new details"),
            block("B", "Block B original content"),
        ]);
        let report = f.indexer.index_changes().await.unwrap();
        assert_eq!(report.modified, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);

        let records = f.store.load_vector_data(true).await.unwrap();
        assert_eq!(records.len(), 2);
        let a = records.iter().find(|r| r.block_id == "A").unwrap();
        assert_eq!(a.content, "Block A rewritten with new details");

        // nothing left to do
        let again = f.indexer.index_changes().await.unwrap();
        assert!(!again.changed_store());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_modified_block_keeps_old_record_until_replaced() {
        let f = fixture(
            vec![block("A", "Block A original content"), block("B", "Block B original content")],
            Arc::new(MemoryStorage::new()),
            Arc::new(StubEmbedder::new()),
            10,
        );
        f.indexer.index_all().await.unwrap();

        // Item failure: the edit is not indexed, the old text stays searchable
        f.graph.set_blocks(vec![
            block("A", "Block A edited but unreachable"),
            block("B", "Block B original content"),
        ]);
        let report = f.indexer.index_changes().await.unwrap();
        assert_eq!(report.modified, 1);
        assert_eq!(report.failed, 1);
        let records = f.store.load_vector_data(true).await.unwrap();
        assert_eq!(records.len(), 2);
        let a = records.iter().find(|r| r.block_id == "A").unwrap();
        assert_eq!(a.content, "Block A original content");

        // Configuration error aborts the run without losing the old record
        f.graph.set_blocks(vec![
            block("A", "Block A edited while misconfigured"),
            block("B", "Block B original content"),
        ]);
        let result = f.indexer.index_changes().await;
        assert!(matches!(result, Err(SearchError::Configuration { .. })));
        assert_eq!(stored_ids(&f.store).await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_continue_only_embeds_missing_ids() {
        let embedder = Arc::new(StubEmbedder::new());
        let f = fixture(
            vec![block("A", "Block A original content")],
            Arc::new(MemoryStorage::new()),
            embedder.clone(),
            10,
        );
        f.indexer.index_all().await.unwrap();

        f.graph.set_blocks(vec![
            block("A", "Block A content that changed"),
            block("B", "Block B original content"),
        ]);
        let report = f.indexer.continue_indexing().await.unwrap();
        assert_eq!(report.mode, IndexingMode::Continue);
        assert_eq!(report.succeeded, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stored_ids(&f.store).await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_failed_items_and_batches_are_isolated() {
        let f = fixture(
            vec![
                block("ok1", "Reachable content one"),
                block("bad1", "unreachable content one"),
                block("bad2", "unreachable content two"),
                block("bad3", "unreachable content three"),
                block("ok2", "Reachable content two"),
            ],
            Arc::new(MemoryStorage::new()),
            Arc::new(StubEmbedder::new()),
            2,
        );

        let report = f.indexer.index_all().await.unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 3);
        assert_eq!(report.skipped_batches, 1);
        assert_eq!(stored_ids(&f.store).await, vec!["ok1", "ok2"]);
    }

    #[tokio::test]
    async fn test_full_storage_keeps_records_unsaved() {
        let f = fixture(
            vec![block("a", "Alpha block with enough text")],
            Arc::new(MemoryStorage::new().with_capacity_limit(16)),
            Arc::new(StubEmbedder::new()),
            10,
        );

        let report = f.indexer.index_all().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.persisted, 0);
        assert_eq!(report.unsaved, 1);
        assert!(f
            .notifier
            .messages()
            .iter()
            .any(|(level, _)| *level == NoticeLevel::Warning));
    }

    #[tokio::test]
    async fn test_cancellation_between_batches() {
        let blocks: Vec<NoteBlock> = (0..6)
            .map(|i| block(&format!("b{}", i), &format!("Block number {} content", i)))
            .collect();
        let graph = Arc::new(InMemoryNoteGraph::new(blocks));
        let store = Arc::new(VectorStore::for_backend(
            Arc::new(MemoryStorage::new()),
            &StorageSettings::default(),
        ));
        let notifier = Arc::new(RecordingNotifier::new());

        // the embedder needs the indexer's token, so build the indexer in two steps
        let token = Arc::new(CancellationToken::new());
        let embedder = Arc::new(StubEmbedder {
            calls: AtomicUsize::new(0),
            cancel_after_first: Some(token.clone()),
        });
        let mut indexer = IncrementalIndexer::new(graph, store.clone(), embedder, notifier, settings(2));
        indexer.cancellation_token = token;

        let report = indexer.index_all().await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 2);
        assert_eq!(report.persisted, 2);
        assert_eq!(store.load_vector_data(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_store_triggers_rebuild() {
        let storage = Arc::new(MemoryStorage::new());
        let f = fixture(
            vec![block("a", "Alpha block with enough text"), block("b", "Beta block with enough text")],
            storage.clone(),
            Arc::new(StubEmbedder::new()),
            10,
        );
        f.indexer.index_all().await.unwrap();

        // every shard unreadable while the manifest still claims records
        storage.set("shard-0", "lz4:@@@").await.unwrap();
        f.store.reset().await;

        let report = f.indexer.continue_indexing().await.unwrap();
        assert!(report.rebuilt_after_corruption);
        assert_eq!(report.mode, IndexingMode::Full);
        assert_eq!(stored_ids(&f.store).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_refresh_reports_whether_store_changed() {
        let f = fixture(
            vec![block("a", "Alpha block with enough text")],
            Arc::new(MemoryStorage::new()),
            Arc::new(StubEmbedder::new()),
            10,
        );
        f.indexer.index_all().await.unwrap();
        assert!(!f.indexer.refresh_if_stale().await.unwrap());

        f.graph.set_blocks(vec![
            block("a", "Alpha block with enough text"),
            block("b", "Beta block with enough text"),
        ]);
        assert!(f.indexer.refresh_if_stale().await.unwrap());
        assert_eq!(stored_ids(&f.store).await, vec!["a", "b"]);
    }
}
