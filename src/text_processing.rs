use std::collections::HashSet;
use regex::Regex;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::SearchResult;
use crate::host::{NoteBlock, NoteGraph};

/// Shortest block text (in characters) worth embedding
pub const MIN_INDEXABLE_CHARS: usize = 10;
/// Longest block text (in characters) worth embedding
pub const MAX_INDEXABLE_CHARS: usize = 2000;

/// Block text ready for embedding, plus the identity needed to store it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexableBlock {
    pub block_id: String,
    pub page_name: String,
    /// Preprocessed text
    pub content: String,
    /// SHA-256 of `content`, used for change detection
    pub content_hash: String,
}

/// Precompiled patterns for the host's outliner markup
struct MarkupPatterns {
    // #[[multi word tag]]
    bracket_tag: Regex,
    // [[page link]]
    page_link: Regex,
    // #tag
    hash_tag: Regex,
    // **bold** __bold__
    strong: Regex,
    // ~~strike~~
    strike: Regex,
    // ==highlight==
    highlight: Regex,
    // *italic*
    star_italic: Regex,
    // _italic_ (only at a word start, so snake_case survives)
    underscore_italic: Regex,
    whitespace: Regex,
}

static MARKUP_PATTERNS: Lazy<MarkupPatterns> = Lazy::new(|| MarkupPatterns {
    bracket_tag: Regex::new(r"#\[\[([^\]]+)\]\]").unwrap(),
    page_link: Regex::new(r"\[\[([^\]]+)\]\]").unwrap(),
    hash_tag: Regex::new(r"(^|\s)#([^\s#\[\]]+)").unwrap(),
    strong: Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").unwrap(),
    strike: Regex::new(r"~~(.+?)~~").unwrap(),
    highlight: Regex::new(r"==(.+?)==").unwrap(),
    star_italic: Regex::new(r"\*([^*\s][^*\n]*?)\*").unwrap(),
    underscore_italic: Regex::new(r"(^|[\s(])_([^_\s][^_\n]*?)_").unwrap(),
    whitespace: Regex::new(r"\s+").unwrap(),
});

static BARE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(https?://|www\.)\S+$").unwrap());

/// Strip note markup and normalize whitespace
///
/// Removes link brackets, tag markers and emphasis markers while keeping the
/// text they wrap, then collapses whitespace runs into single spaces.
pub fn preprocess_content(text: &str) -> String {
    let p = &*MARKUP_PATTERNS;

    // Tags in bracket form must go before plain links
    let text = p.bracket_tag.replace_all(text, "$1");
    let text = p.page_link.replace_all(&text, "$1");
    let text = p.hash_tag.replace_all(&text, "$1$2");

    let text = p.strong.replace_all(&text, |caps: &regex::Captures| {
        caps.get(1).or(caps.get(2)).map(|m| m.as_str()).unwrap_or("").to_string()
    });
    let text = p.strike.replace_all(&text, "$1");
    let text = p.highlight.replace_all(&text, "$1");
    let text = p.star_italic.replace_all(&text, "$1");
    let text = p.underscore_italic.replace_all(&text, "$1$2");

    p.whitespace.replace_all(&text, " ").trim().to_string()
}

/// Whether preprocessed text carries enough meaning to embed
pub fn is_content_worth_indexing(text: &str) -> bool {
    let trimmed = text.trim();
    let length = trimmed.chars().count();
    if length < MIN_INDEXABLE_CHARS || length > MAX_INDEXABLE_CHARS {
        return false;
    }

    let has_meaningful_char = trimmed
        .chars()
        .any(|c| !(c.is_numeric() || c.is_ascii_punctuation() || c.is_whitespace() || is_cjk_punctuation(c)));
    if !has_meaningful_char {
        return false;
    }

    !BARE_URL.is_match(trimmed)
}

fn is_cjk_punctuation(c: char) -> bool {
    ('\u{3000}'..='\u{303f}').contains(&c) || ('\u{ff00}'..='\u{ff0f}').contains(&c)
}

/// SHA-256 hex digest of text
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Preprocess, filter and de-duplicate a block snapshot
///
/// Duplicates are detected on the preprocessed text; the first block in host
/// order wins.
pub fn collect_from_blocks(blocks: &[NoteBlock]) -> Vec<IndexableBlock> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut indexable = Vec::new();

    for block in blocks {
        let content = preprocess_content(&block.content);
        if !is_content_worth_indexing(&content) {
            continue;
        }
        if !seen.insert(content.clone()) {
            continue;
        }
        indexable.push(IndexableBlock {
            block_id: block.id.clone(),
            page_name: block.page_name.clone(),
            content_hash: content_hash(&content),
            content,
        });
    }

    log::debug!(
        "📝 {} of {} blocks are indexable",
        indexable.len(),
        blocks.len()
    );
    indexable
}

/// Enumerate the host graph and return every block worth indexing
pub async fn collect_indexable_content(graph: &dyn NoteGraph) -> SearchResult<Vec<IndexableBlock>> {
    let blocks = graph.all_blocks().await?;
    Ok(collect_from_blocks(&blocks))
}
