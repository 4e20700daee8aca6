//! Similarity Search over stored block embeddings
//!
//! Brute-force cosine ranking of every stored [`VectorRecord`] against the
//! embedded query. Stores hold at most a few tens of thousands of blocks, so a
//! linear scan with a bounded heap is fast enough and needs no index.
//!
//! ## Cosine Similarity
//!
//! ```text
//! cosine_similarity(A, B) = (A · B) / (||A|| * ||B||)
//! ```
//!
//! - Range: [-1, 1] where 1 = same direction, 0 = orthogonal
//! - Symmetric and scale invariant
//! - Zero vectors have no direction; they score 0 instead of erroring so one
//!   bad record never aborts a whole search
//!
//! ## Search Flow
//!
//! 1. Opportunistically index changed notes (failures are only logged)
//! 2. Embed the query (small LRU cache of recent query embeddings)
//! 3. Score every cached record, keep those strictly above the threshold
//! 4. Return the best `limit` hits in descending score order
//!
//! Equal scores are returned in no particular order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::embedding_generator::EmbeddingProvider;
use crate::errors::{SearchError, SearchResult};
use crate::vector_db::types::VectorRecord;
use crate::vector_db::VectorStore;

/// Default cosine threshold; hits must score strictly above it
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;

/// Default number of hits returned
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Calculate cosine similarity between two vectors
///
/// Dot product and both magnitudes are accumulated in one pass:
///
/// ```text
/// dot   = Σ A[i] * B[i]
/// |A|²  = Σ A[i]²
/// |B|²  = Σ B[i]²
/// cos   = dot / (√|A|² * √|B|²)
/// ```
///
/// # Returns
///
/// A score in [-1.0, 1.0]. Degenerate inputs do not fail:
/// - an empty or zero-magnitude vector scores 0.0
/// - a computation that ends in NaN (non-finite components) scores 0.0
/// - floating point drift past ±1 is clamped
///
/// # Errors
///
/// * `DimensionMismatch` - the vectors have different lengths
///
/// # Example
///
/// ```
/// use ainote_search::similarity_search::cosine_similarity;
///
/// let score = cosine_similarity(&[1.0, 0.0], &[1.0, 1.0]).unwrap();
/// assert!((score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
/// ```
pub fn cosine_similarity(vector_a: &[f32], vector_b: &[f32]) -> SearchResult<f32> {
    if vector_a.len() != vector_b.len() {
        return Err(SearchError::DimensionMismatch {
            expected: vector_a.len(),
            found: vector_b.len(),
        });
    }

    let mut dot_product = 0.0f32;
    let mut sum_sq_a = 0.0f32;
    let mut sum_sq_b = 0.0f32;
    for (a, b) in vector_a.iter().zip(vector_b) {
        dot_product += a * b;
        sum_sq_a += a * a;
        sum_sq_b += b * b;
    }

    let magnitude = sum_sq_a.sqrt() * sum_sq_b.sqrt();
    if magnitude == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot_product / magnitude;
    if similarity.is_nan() {
        return Ok(0.0);
    }
    Ok(similarity.clamp(-1.0, 1.0))
}

/// One ranked block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub block_id: String,
    pub page_name: String,
    pub content: String,
    pub score: f32,
}

impl SearchHit {
    fn from_record(record: &VectorRecord, score: f32) -> Self {
        Self {
            block_id: record.block_id.clone(),
            page_name: record.page_name.clone(),
            content: record.content.clone(),
            score,
        }
    }
}

/// Heap entry ordered so the worst kept hit sits on top of the max-heap
struct RankedHit(SearchHit);

impl PartialEq for RankedHit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedHit {}

impl Ord for RankedHit {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.score.total_cmp(&self.0.score)
    }
}

impl PartialOrd for RankedHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Score `records` against `query_vector` and keep the best `limit` hits
/// scoring strictly above `threshold`, best first
pub fn rank_records(
    query_vector: &[f32],
    records: &[VectorRecord],
    threshold: f32,
    limit: usize,
) -> SearchResult<Vec<SearchHit>> {
    if limit == 0 || records.is_empty() {
        return Ok(Vec::new());
    }

    let mut heap = BinaryHeap::with_capacity(limit.min(records.len()) + 1);
    for record in records {
        let score = cosine_similarity(query_vector, &record.vector)?;
        if score <= threshold {
            continue;
        }

        if heap.len() < limit {
            heap.push(RankedHit(SearchHit::from_record(record, score)));
        } else if heap.peek().map_or(false, |worst| score > worst.0.score) {
            heap.pop();
            heap.push(RankedHit(SearchHit::from_record(record, score)));
        }
    }

    // Ascending by the reversed ordering means descending by score
    Ok(heap.into_sorted_vec().into_iter().map(|ranked| ranked.0).collect())
}

/// Brings the store up to date with the notes before a search
#[async_trait]
pub trait IndexRefresher: Send + Sync {
    /// Index whatever changed; returns whether anything was written
    async fn refresh_if_stale(&self) -> SearchResult<bool>;
}

/// Embedding-based retrieval over a [`VectorStore`]
pub struct SimilaritySearchEngine {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    refresher: Option<Arc<dyn IndexRefresher>>,
    query_cache: Mutex<LruCache<String, Arc<Vec<f32>>>>,
    threshold: f32,
}

impl SimilaritySearchEngine {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_options(store, embedder, DEFAULT_SIMILARITY_THRESHOLD, 100)
    }

    pub fn with_options(
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        threshold: f32,
        query_cache_size: usize,
    ) -> Self {
        let cache_size = NonZeroUsize::new(query_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            embedder,
            refresher: None,
            query_cache: Mutex::new(LruCache::new(cache_size)),
            threshold,
        }
    }

    /// Run `refresher` before each search
    pub fn with_refresher(mut self, refresher: Arc<dyn IndexRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    async fn query_embedding(&self, query: &str) -> SearchResult<Arc<Vec<f32>>> {
        if let Some(cached) = self.query_cache.lock().await.get(query) {
            log::debug!("🎯 Query embedding cache hit");
            return Ok(Arc::clone(cached));
        }

        let embedding = Arc::new(self.embedder.embed(query).await?);
        self.query_cache
            .lock()
            .await
            .put(query.to_string(), Arc::clone(&embedding));
        Ok(embedding)
    }

    /// Best stored blocks for `query`
    ///
    /// An empty store or a blank query yields no hits without calling the
    /// embedding service.
    pub async fn search(&self, query: &str, limit: usize) -> SearchResult<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        if !self.store.has_vector_data().await? {
            log::debug!("🔍 Vector store is empty, nothing to search");
            return Ok(Vec::new());
        }

        if let Some(refresher) = &self.refresher {
            match refresher.refresh_if_stale().await {
                Ok(true) => log::debug!("🔄 Index refreshed before search"),
                Ok(false) => {}
                Err(e) => log::warn!("⚠️ Index refresh before search failed: {}", e),
            }
        }

        let embedding = self.query_embedding(query).await?;
        let records = self.store.load_vector_data(false).await?;

        let start = std::time::Instant::now();
        let hits = rank_records(&embedding, &records, self.threshold, limit)?;
        log::info!(
            "🔍 Similarity search scored {} records in {:?}, {} above {}",
            records.len(),
            start.elapsed(),
            hits.len(),
            self.threshold
        );
        Ok(hits)
    }
}
