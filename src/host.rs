//! # Host Collaborators
//!
//! The plugin runs inside a note-taking host that owns the page/block graph,
//! notifications and persistence. This module defines the seams the pipeline
//! consumes from that host:
//!
//! - [`NoteGraph`]: enumerates every block with its page and hierarchy
//! - [`Notifier`]: fire-and-forget progress and error messages
//!
//! Key/value persistence lives in [`crate::vector_db::backend`] and text
//! generation in [`crate::llm_client`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{SearchError, SearchResult};

/// One note unit as exposed by the host graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteBlock {
    /// Stable identifier owned by the host
    pub id: String,
    /// Raw block text including markup
    pub content: String,
    pub page_name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Journal date of the owning page, when the page is a journal
    #[serde(default)]
    pub journal_day: Option<NaiveDate>,
}

impl NoteBlock {
    pub fn new(id: impl Into<String>, content: impl Into<String>, page_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            page_name: page_name.into(),
            parent_id: None,
            journal_day: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_journal_day(mut self, day: NaiveDate) -> Self {
        self.journal_day = Some(day);
        self
    }
}

/// Block/page enumeration capability of the host
#[async_trait]
pub trait NoteGraph: Send + Sync {
    /// Every block in the graph, in host order
    async fn all_blocks(&self) -> SearchResult<Vec<NoteBlock>>;

    /// Name of the page currently open in the host, if any
    async fn current_page_name(&self) -> SearchResult<Option<String>>;
}

/// Severity of a user notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Fire-and-forget user notification capability
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Notifier that only writes to the log; used when the host provides none
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info | NoticeLevel::Success => log::info!("📣 {}", message),
            NoticeLevel::Warning => log::warn!("📣 {}", message),
            NoticeLevel::Error => log::error!("📣 {}", message),
        }
    }
}

/// Notifier that records every message; handy for hosts that batch toasts
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    messages: Arc<RwLock<Vec<(NoticeLevel, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(NoticeLevel, String)> {
        self.messages.read().map(|m| m.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        if let Ok(mut messages) = self.messages.write() {
            messages.push((level, message.to_string()));
        }
    }
}

/// Graph snapshot held in memory
///
/// Hosts that can export their graph up front use this instead of a live
/// adapter; tests use it as a fake host.
#[derive(Debug, Default)]
pub struct InMemoryNoteGraph {
    blocks: RwLock<Vec<NoteBlock>>,
    current_page: RwLock<Option<String>>,
}

impl InMemoryNoteGraph {
    pub fn new(blocks: Vec<NoteBlock>) -> Self {
        Self {
            blocks: RwLock::new(blocks),
            current_page: RwLock::new(None),
        }
    }

    pub fn set_blocks(&self, blocks: Vec<NoteBlock>) {
        if let Ok(mut guard) = self.blocks.write() {
            *guard = blocks;
        }
    }

    pub fn set_current_page(&self, page: Option<String>) {
        if let Ok(mut guard) = self.current_page.write() {
            *guard = page;
        }
    }
}

#[async_trait]
impl NoteGraph for InMemoryNoteGraph {
    async fn all_blocks(&self) -> SearchResult<Vec<NoteBlock>> {
        self.blocks
            .read()
            .map(|blocks| blocks.clone())
            .map_err(|_| SearchError::storage("note graph lock poisoned"))
    }

    async fn current_page_name(&self) -> SearchResult<Option<String>> {
        self.current_page
            .read()
            .map(|page| page.clone())
            .map_err(|_| SearchError::storage("note graph lock poisoned"))
    }
}

/// Parent/child/sibling lookups over one graph snapshot
pub struct BlockHierarchy<'a> {
    by_id: HashMap<&'a str, &'a NoteBlock>,
    children: HashMap<&'a str, Vec<&'a NoteBlock>>,
}

impl<'a> BlockHierarchy<'a> {
    pub fn new(blocks: &'a [NoteBlock]) -> Self {
        let mut by_id = HashMap::with_capacity(blocks.len());
        let mut children: HashMap<&str, Vec<&NoteBlock>> = HashMap::new();
        for block in blocks {
            by_id.insert(block.id.as_str(), block);
            if let Some(parent) = block.parent_id.as_deref() {
                children.entry(parent).or_default().push(block);
            }
        }
        Self { by_id, children }
    }

    pub fn get(&self, id: &str) -> Option<&'a NoteBlock> {
        self.by_id.get(id).copied()
    }

    pub fn children_of(&self, id: &str) -> &[&'a NoteBlock] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Blocks sharing the same parent, excluding the block itself
    pub fn siblings_of(&self, id: &str) -> Vec<&'a NoteBlock> {
        let parent = match self.get(id).and_then(|b| b.parent_id.as_deref()) {
            Some(parent) => parent,
            None => return Vec::new(),
        };
        self.children_of(parent)
            .iter()
            .copied()
            .filter(|b| b.id != id)
            .collect()
    }
}
