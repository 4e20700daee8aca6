//! End-to-end search through the plugin facade with offline embedding and
//! generation services

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ainote_search::config::PluginSettings;
use ainote_search::embedding_generator::EmbeddingProvider;
use ainote_search::host::RecordingNotifier;
use ainote_search::llm_client::TextGenerator;
use ainote_search::relevance::batch_evaluate_relevance;
use ainote_search::time_context::parse_time_query;
use ainote_search::{
    InMemoryNoteGraph, MemoryStorage, NoteBlock, NoteSearchPlugin, NoticeLevel, RankingStrategy, SearchHit,
    SearchResult, SearchStage, StorageBackend,
};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveTime};

/// Three topic axes; anything off-topic points along the last one
#[derive(Default)]
struct TopicEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = text.to_lowercase();
        Ok(if text.contains("milk") {
            vec![1.0, 0.0, 0.0]
        } else if text.contains("weather") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0]
        })
    }

    fn dimension(&self) -> usize {
        3
    }

    fn backend_name(&self) -> &str {
        "topics"
    }
}

/// Grades notes mentioning milk highly and answers summaries with a fixed line
#[derive(Default)]
struct ScriptedGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> SearchResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.starts_with("Rate how relevant") {
            let note = prompt.rsplit("Note: ").next().unwrap_or_default();
            return Ok(if note.contains("keep") || note.contains("milk") {
                "8".to_string()
            } else {
                "2".to_string()
            });
        }
        Ok("You planned to buy milk.".to_string())
    }
}

fn grocery_graph() -> Arc<InMemoryNoteGraph> {
    Arc::new(InMemoryNoteGraph::new(vec![
        NoteBlock::new("b-milk", "Remember to buy milk and eggs", "Groceries"),
        NoteBlock::new("b-weather", "The weather was sunny and warm", "Diary"),
    ]))
}

struct Harness {
    plugin: NoteSearchPlugin,
    embedder: Arc<TopicEmbedder>,
    generator: Arc<ScriptedGenerator>,
    notifier: Arc<RecordingNotifier>,
}

async fn harness(graph: Arc<InMemoryNoteGraph>, strategy: RankingStrategy) -> Harness {
    let mut settings = PluginSettings::default();
    settings.search.strategy = strategy;
    settings.indexing.batch_delay_ms = 0;

    let embedder = Arc::new(TopicEmbedder::default());
    let generator = Arc::new(ScriptedGenerator::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let storage: Vec<Arc<dyn StorageBackend>> = vec![Arc::new(MemoryStorage::new())];

    let plugin = NoteSearchPlugin::with_components(
        settings,
        graph,
        notifier.clone(),
        storage,
        embedder.clone(),
        generator.clone(),
    )
    .await
    .unwrap();

    Harness {
        plugin,
        embedder,
        generator,
        notifier,
    }
}

#[tokio::test]
async fn test_vector_search_finds_matching_note() {
    let h = harness(grocery_graph(), RankingStrategy::VectorOnly).await;
    let report = h.plugin.index_all().await.unwrap();
    assert_eq!(report.succeeded, 2);

    let response = h.plugin.search("buy milk").await;
    assert_eq!(response.stage, SearchStage::Done);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].block_id, "b-milk");
    assert_eq!(response.results[0].page_name, "Groceries");
    assert!(response.results[0].score > 0.3);

    // Nothing has been generated until the summary is requested
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.summary.generate().await, "You planned to buy milk.");
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_orthogonal_query_returns_nothing() {
    let h = harness(grocery_graph(), RankingStrategy::VectorOnly).await;
    h.plugin.index_all().await.unwrap();

    let response = h.plugin.search("quantum physics lecture").await;
    assert!(response.results.is_empty());
    assert_eq!(response.stage, SearchStage::Aborted);
    assert!(h
        .notifier
        .messages()
        .iter()
        .any(|(level, message)| *level == NoticeLevel::Info && message == "No matching notes found"));
}

#[tokio::test]
async fn test_blank_query_makes_no_service_calls() {
    let h = harness(grocery_graph(), RankingStrategy::VectorThenAi).await;
    h.plugin.index_all().await.unwrap();
    let embeds_after_indexing = h.embedder.calls.load(Ordering::SeqCst);

    let response = h.plugin.search("   ").await;
    assert!(response.results.is_empty());
    assert!(response.summary.is_empty());
    assert_eq!(response.summary.generate().await, "");

    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embeds_after_indexing);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_search_indexes_new_notes_before_querying() {
    let graph = grocery_graph();
    let h = harness(graph.clone(), RankingStrategy::VectorOnly).await;
    h.plugin.index_all().await.unwrap();

    let mut blocks = vec![
        NoteBlock::new("b-milk", "Remember to buy milk and eggs", "Groceries"),
        NoteBlock::new("b-weather", "The weather was sunny and warm", "Diary"),
    ];
    blocks.push(NoteBlock::new("b-oat", "Oat milk is cheaper at the market", "Groceries"));
    graph.set_blocks(blocks);

    let response = h.plugin.search("milk").await;
    let mut ids: Vec<&str> = response.results.iter().map(|hit| hit.block_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["b-milk", "b-oat"]);
    assert_eq!(h.plugin.get_store_stats().await.unwrap().count, 3);
}

#[tokio::test]
async fn test_ai_refinement_filters_low_scores() {
    let graph = Arc::new(InMemoryNoteGraph::new(vec![
        NoteBlock::new("b-milk", "Remember to buy milk and eggs", "Groceries"),
        NoteBlock::new("b-list", "Shopping list: bread, butter, cheese", "Groceries"),
    ]));
    let h = harness(graph, RankingStrategy::LexicalOnly).await;

    let lexical = h.plugin.search("shopping milk").await;
    let mut lexical_ids: Vec<&str> = lexical.results.iter().map(|hit| hit.block_id.as_str()).collect();
    lexical_ids.sort();
    assert_eq!(lexical_ids, vec!["b-list", "b-milk"]);
    // Lexical ranking never embeds
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);

    let graph = Arc::new(InMemoryNoteGraph::new(vec![
        NoteBlock::new("b-milk", "Remember to buy milk and eggs", "Groceries"),
        NoteBlock::new("b-list", "Shopping list: bread, butter, cheese", "Groceries"),
    ]));
    let h = harness(graph, RankingStrategy::AiOnly).await;
    let refined = h.plugin.search("shopping milk").await;
    assert_eq!(refined.stage, SearchStage::Done);
    assert_eq!(refined.results.len(), 1);
    assert_eq!(refined.results[0].block_id, "b-milk");
    assert_eq!(refined.results[0].score, 8.0);
}

#[tokio::test]
async fn test_twenty_five_candidates_take_three_batches() {
    let generator = ScriptedGenerator::default();
    let hits: Vec<SearchHit> = (0..25)
        .map(|i| SearchHit {
            block_id: format!("b{}", i),
            page_name: "Inbox".to_string(),
            content: if i % 5 < 2 {
                format!("keep candidate {}", i)
            } else {
                format!("other candidate {}", i)
            },
            score: 0.5,
        })
        .collect();

    let outcome = batch_evaluate_relevance(&generator, "which candidates", hits, 10, 5.0)
        .await
        .unwrap();
    assert_eq!(outcome.batches, 3);
    assert_eq!(outcome.results.len(), 10);
    assert!(outcome.results.iter().all(|hit| hit.content.starts_with("keep")));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 25);
}

#[test]
fn test_days_ago_covers_one_full_day() {
    let reference = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
    let result = parse_time_query("3 days ago", Some(reference));
    assert!(result.has_time_context);

    let day = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
    let range = &result.time_ranges[0];
    assert_eq!(range.start, Some(day.and_hms_opt(0, 0, 0).unwrap()));
    assert_eq!(range.end, Some(day.and_hms_opt(23, 59, 59).unwrap()));
    assert!(range.is_relative_time);
}

#[test]
fn test_today_defaults_to_local_date() {
    let result = parse_time_query("今天", None);
    let today = Local::now().date_naive();
    let range = result
        .time_ranges
        .iter()
        .find(|range| range.start == Some(today.and_time(NaiveTime::default())))
        .expect("a range for today");
    assert_eq!(range.end, Some(today.and_hms_opt(23, 59, 59).unwrap()));
}

#[tokio::test]
async fn test_journal_page_sets_reference_date() {
    let graph = Arc::new(InMemoryNoteGraph::new(vec![
        NoteBlock::new("b-1", "Dentist appointment at noon", "Jun 14th, 2024")
            .with_journal_day(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()),
        NoteBlock::new("b-2", "Dentist said to floss more", "Jun 2nd, 2024")
            .with_journal_day(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()),
    ]));
    graph.set_current_page(Some("Jun 15th, 2024".to_string()));
    let h = harness(graph, RankingStrategy::LexicalOnly).await;

    let response = h.plugin.search("dentist yesterday").await;
    assert_eq!(response.stage, SearchStage::Done);
    assert_eq!(response.results[0].block_id, "b-1");
    assert!(response.summary.time_annotation().is_some());
}
