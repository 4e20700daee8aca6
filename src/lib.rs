//! Retrieval and ranking pipeline for AI-assisted note search.
//!
//! The host owns the note graph, notifications and key/value persistence; this
//! crate supplies keyword and time extraction, embedding storage, similarity
//! search, relevance refinement and incremental indexing on top of them.

// Module declarations
pub mod errors;
pub mod retry;
pub mod config;
pub mod host;
pub mod time_context;
pub mod text_processing;
pub mod keyword_extraction;
pub mod embedding_generator;
pub mod llm_client;
pub mod vector_db;
pub mod similarity_search;
pub mod relevance;
pub mod search_orchestrator;
pub mod indexing_pipeline;
pub mod plugin;

// Re-exports for commonly used types
pub use config::PluginSettings;
pub use errors::{SearchError, SearchResult};
pub use host::{InMemoryNoteGraph, NoteBlock, NoteGraph, NoticeLevel, Notifier};
pub use indexing_pipeline::{CancellationToken, IncrementalIndexer, IndexingReport};
pub use plugin::NoteSearchPlugin;
pub use search_orchestrator::{RankingStrategy, SearchResponse, SearchStage};
pub use similarity_search::{cosine_similarity, SearchHit};
pub use vector_db::backend::{FileStorage, MemoryStorage, StorageBackend, StorageKind};
pub use vector_db::types::{IntegrityReport, StoreStats, VectorRecord};
pub use vector_db::VectorStore;
