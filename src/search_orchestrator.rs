//! Search Orchestrator
//!
//! Runs one question through the pipeline:
//!
//! ```text
//! Idle → KeywordsExtracted → Retrieved → Refined → SummaryPending → Done
//!   └──────────────┴─────────────┴──────────┴──→ Aborted (nothing to search / nothing found)
//!                                                  Failed  (any error)
//! ```
//!
//! Results come back immediately; the summary is a [`DeferredSummary`] the
//! caller awaits only if it wants one. Errors never escape [`SearchOrchestrator::search`]:
//! they are logged, shown to the user and turned into an empty response.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::config::SearchSettings;
use crate::errors::SearchResult;
use crate::host::{BlockHierarchy, NoteBlock, NoteGraph, NoticeLevel, Notifier};
use crate::keyword_extraction::{expand_keywords, extract_keywords, ExtractedKeywords};
use crate::llm_client::TextGenerator;
use crate::relevance::{batch_evaluate_relevance, calculate_relevance_score, MatchContext, MAX_RELEVANCE_SCORE};
use crate::similarity_search::{SearchHit, SimilaritySearchEngine};
use crate::text_processing::preprocess_content;
use crate::time_context::{detect_language, parse_time_query, reference_date_from_page_name, Language, TimeToolsResult};

/// Added to the lexical score of blocks on a journal page inside a detected time range
const JOURNAL_DAY_BONUS: f32 = 2.0;

/// Characters of each result passed to the summary prompt
const SUMMARY_CONTENT_CHARS: usize = 500;

/// Where a search run ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchStage {
    Idle,
    KeywordsExtracted,
    Retrieved,
    Refined,
    SummaryPending,
    Done,
    Aborted,
    Failed,
}

/// Which ranking signals a search uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RankingStrategy {
    /// Keyword heuristic over the live note graph; no network calls
    LexicalOnly,
    /// Keyword retrieval, then AI grading of every candidate
    AiOnly,
    /// Embedding similarity only
    #[default]
    VectorOnly,
    /// Embedding similarity, then AI grading
    VectorThenAi,
}

impl RankingStrategy {
    pub fn uses_vectors(&self) -> bool {
        matches!(self, RankingStrategy::VectorOnly | RankingStrategy::VectorThenAi)
    }

    pub fn uses_ai_refinement(&self) -> bool {
        matches!(self, RankingStrategy::AiOnly | RankingStrategy::VectorThenAi)
    }
}

/// Summary generation postponed until the caller asks for it
pub struct DeferredSummary {
    generator: Option<Arc<dyn TextGenerator>>,
    query: String,
    contents: Vec<String>,
    time_annotation: Option<String>,
}

impl DeferredSummary {
    /// A summary that is always empty
    pub fn empty() -> Self {
        Self {
            generator: None,
            query: String::new(),
            contents: Vec::new(),
            time_annotation: None,
        }
    }

    /// Whether `generate` would call the text generator at all
    pub fn is_empty(&self) -> bool {
        self.generator.is_none() || self.contents.is_empty()
    }

    /// Human-readable description of the query's time ranges
    pub fn time_annotation(&self) -> Option<&str> {
        self.time_annotation.as_deref()
    }

    fn prompt(&self) -> String {
        let language = match detect_language(&self.query) {
            Language::Zh => "Chinese",
            Language::En => "English",
        };
        let notes: Vec<String> = self
            .contents
            .iter()
            .map(|content| format!("- {}", content.chars().take(SUMMARY_CONTENT_CHARS).collect::<String>()))
            .collect();

        let mut prompt = format!(
            "Answer the question using only the notes below. Answer in {}.\n\nQuestion: {}\n",
            language, self.query
        );
        if let Some(annotation) = &self.time_annotation {
            prompt.push_str(&format!("Time context: {}\n", annotation));
        }
        prompt.push_str(&format!("\nNotes:\n{}", notes.join("\n")));
        prompt
    }

    /// Generate the summary; any failure yields an empty string
    pub async fn generate(&self) -> String {
        let Some(generator) = &self.generator else {
            return String::new();
        };
        if self.contents.is_empty() {
            return String::new();
        }

        match generator.generate(&self.prompt()).await {
            Ok(summary) => summary,
            Err(e) => {
                log::warn!("⚠️ Summary generation failed: {}", e);
                String::new()
            }
        }
    }
}

impl fmt::Debug for DeferredSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSummary")
            .field("query", &self.query)
            .field("contents", &self.contents.len())
            .field("time_annotation", &self.time_annotation)
            .finish()
    }
}

/// Ranked results plus a lazily generated summary
#[derive(Debug)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub summary: DeferredSummary,
    pub stage: SearchStage,
}

impl SearchResponse {
    pub fn empty(stage: SearchStage) -> Self {
        Self {
            results: Vec::new(),
            summary: DeferredSummary::empty(),
            stage,
        }
    }
}

fn advance(stage: &mut SearchStage, next: SearchStage) {
    log::debug!("🔀 Search stage {:?} → {:?}", stage, next);
    *stage = next;
}

/// Lexical retrieval over the note graph
///
/// Blocks matching a keyword score as direct hits. Their siblings and children
/// are returned too, inheriting the hit's score scaled down by their
/// [`MatchContext`] tier, so they rank below the block that matched. Blocks on
/// a journal page inside a time range get a bonus. Each block keeps its best score.
pub fn lexical_retrieval(
    blocks: &[NoteBlock],
    keywords: &ExtractedKeywords,
    time: &TimeToolsResult,
    limit: usize,
) -> Vec<SearchHit> {
    let mut terms = keywords.keywords.clone();
    for keyword in &time.keywords {
        if !terms.contains(keyword) {
            terms.push(keyword.clone());
        }
    }

    let hierarchy = BlockHierarchy::new(blocks);
    let mut best: HashMap<&str, (f32, &NoteBlock)> = HashMap::new();

    for block in blocks {
        if block.content.trim().is_empty() {
            continue;
        }

        let journal_match = block
            .journal_day
            .map_or(false, |day| time.time_ranges.iter().any(|range| range.contains_day(day)));

        let mut score = calculate_relevance_score(
            &block.content,
            &terms,
            &keywords.important_keywords,
            MatchContext::Direct,
        );
        if journal_match {
            score = (score + JOURNAL_DAY_BONUS).min(MAX_RELEVANCE_SCORE);
        }
        if score <= 0.0 {
            continue;
        }
        record_best(&mut best, block, score);

        let context = hierarchy
            .siblings_of(&block.id)
            .into_iter()
            .map(|b| (b, MatchContext::Sibling))
            .chain(hierarchy.children_of(&block.id).iter().map(|b| (*b, MatchContext::Child)));
        for (related, relation) in context {
            if related.content.trim().is_empty() {
                continue;
            }
            record_best(&mut best, related, context_score(score, relation));
        }
    }

    let mut hits: Vec<SearchHit> = best
        .into_values()
        .map(|(score, block)| SearchHit {
            block_id: block.id.clone(),
            page_name: block.page_name.clone(),
            content: preprocess_content(&block.content),
            score,
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    hits
}

/// Score a sibling or child inherits from a direct hit
fn context_score(direct_score: f32, relation: MatchContext) -> f32 {
    direct_score * relation.multiplier() / MatchContext::Direct.multiplier()
}

fn record_best<'a>(best: &mut HashMap<&'a str, (f32, &'a NoteBlock)>, block: &'a NoteBlock, score: f32) {
    let entry = best.entry(block.id.as_str()).or_insert((score, block));
    if score > entry.0 {
        entry.0 = score;
    }
}

/// Sequences keyword extraction, retrieval, refinement and summary
pub struct SearchOrchestrator {
    graph: Arc<dyn NoteGraph>,
    notifier: Arc<dyn Notifier>,
    engine: Arc<SimilaritySearchEngine>,
    generator: Arc<dyn TextGenerator>,
    settings: SearchSettings,
}

impl SearchOrchestrator {
    pub fn new(
        graph: Arc<dyn NoteGraph>,
        notifier: Arc<dyn Notifier>,
        engine: Arc<SimilaritySearchEngine>,
        generator: Arc<dyn TextGenerator>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            graph,
            notifier,
            engine,
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Answer `query`; never fails
    pub async fn search(&self, query: &str) -> SearchResponse {
        match self.run(query).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("❌ Search failed: {}", e);
                self.notifier.notify(NoticeLevel::Error, &e.user_message());
                SearchResponse::empty(SearchStage::Failed)
            }
        }
    }

    /// Day "today" means: the open journal page if there is one
    async fn reference_date(&self) -> Option<chrono::NaiveDate> {
        match self.graph.current_page_name().await {
            Ok(Some(name)) => reference_date_from_page_name(&name),
            Ok(None) => None,
            Err(e) => {
                log::debug!("📅 Could not read current page: {}", e);
                None
            }
        }
    }

    async fn run(&self, query: &str) -> SearchResult<SearchResponse> {
        let mut stage = SearchStage::Idle;
        let query = query.trim();

        let time = parse_time_query(query, self.reference_date().await);
        let mut keywords = extract_keywords(query);
        if self.settings.ai_keyword_expansion {
            keywords = expand_keywords(self.generator.as_ref(), query, keywords).await;
        }

        if keywords.is_empty() && time.keywords.is_empty() {
            log::info!("🔍 No keywords or time context in query, nothing to search");
            advance(&mut stage, SearchStage::Aborted);
            return Ok(SearchResponse::empty(stage));
        }
        advance(&mut stage, SearchStage::KeywordsExtracted);
        log::info!(
            "🔑 Keywords {:?} (important {:?}), {} time ranges",
            keywords.keywords,
            keywords.important_keywords,
            time.time_ranges.len()
        );

        let mut results = self.retrieve(query, &keywords, &time).await?;
        if results.is_empty() {
            self.notifier.notify(NoticeLevel::Info, "No matching notes found");
            advance(&mut stage, SearchStage::Aborted);
            return Ok(SearchResponse::empty(stage));
        }
        advance(&mut stage, SearchStage::Retrieved);

        if self.settings.strategy.uses_ai_refinement() {
            let outcome = batch_evaluate_relevance(
                self.generator.as_ref(),
                query,
                results,
                self.settings.relevance_batch_size,
                self.settings.min_relevance_score,
            )
            .await?;
            log::info!(
                "🧮 AI refinement kept {} results over {} batches",
                outcome.results.len(),
                outcome.batches
            );
            results = outcome.results;
            if results.is_empty() {
                self.notifier.notify(NoticeLevel::Info, "No notes passed relevance filtering");
                advance(&mut stage, SearchStage::Aborted);
                return Ok(SearchResponse::empty(stage));
            }
        }
        advance(&mut stage, SearchStage::Refined);

        let summary = DeferredSummary {
            generator: Some(Arc::clone(&self.generator)),
            query: query.to_string(),
            contents: results.iter().map(|hit| hit.content.clone()).collect(),
            time_annotation: time.annotation(),
        };
        advance(&mut stage, SearchStage::SummaryPending);
        advance(&mut stage, SearchStage::Done);

        Ok(SearchResponse {
            results,
            summary,
            stage,
        })
    }

    async fn retrieve(
        &self,
        query: &str,
        keywords: &ExtractedKeywords,
        time: &TimeToolsResult,
    ) -> SearchResult<Vec<SearchHit>> {
        let limit = self.settings.limit;

        if !self.settings.strategy.uses_vectors() {
            let blocks = self.graph.all_blocks().await?;
            return Ok(lexical_retrieval(&blocks, keywords, time, limit));
        }

        if !self.engine.store().has_vector_data().await? {
            log::info!("📭 Vector store is empty, falling back to keyword search");
            let blocks = self.graph.all_blocks().await?;
            return Ok(lexical_retrieval(&blocks, keywords, time, limit));
        }

        let mut hits = self.engine.search(query, limit).await?;

        if time.has_time_context {
            // Date matches come from the live graph; scale them onto the cosine range
            let blocks = self.graph.all_blocks().await?;
            let date_only = ExtractedKeywords::default();
            for mut date_hit in lexical_retrieval(&blocks, &date_only, time, limit) {
                if hits.iter().any(|hit| hit.block_id == date_hit.block_id) {
                    continue;
                }
                date_hit.score /= MAX_RELEVANCE_SCORE;
                hits.push(date_hit);
            }
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(limit);
        }

        Ok(hits)
    }
}
