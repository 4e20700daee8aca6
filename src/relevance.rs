//! Relevance refinement
//!
//! Two scorers on the same 0–10 scale:
//!
//! - [`calculate_relevance_score`]: deterministic keyword heuristic, no I/O
//! - [`evaluate_relevance`] / [`batch_evaluate_relevance`]: asks the text
//!   generator to grade each candidate against a rubric

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::SearchResult;
use crate::llm_client::TextGenerator;
use crate::similarity_search::SearchHit;
use crate::time_context::is_cjk;

pub const MAX_RELEVANCE_SCORE: f32 = 10.0;
pub const DEFAULT_RELEVANCE_BATCH_SIZE: usize = 10;
pub const DEFAULT_MIN_RELEVANCE_SCORE: f32 = 5.0;

/// Characters over which the first-match position weight decays by 1/e
const POSITION_DECAY_CHARS: f32 = 200.0;
const WHOLE_WORD_BONUS: f32 = 0.5;
const DENSITY_STEP: f32 = 0.3;
const DENSITY_CAP: f32 = 1.0;
const IMPORTANT_MULTIPLIER: f32 = 1.5;
const CO_OCCURRENCE_MULTIPLIER: f32 = 2.0;
const IDEAL_LENGTH_CHARS: f32 = 300.0;
const LENGTH_SOFTNESS: f32 = 150.0;
const PROXIMITY_WINDOW_CHARS: usize = 100;
const PROXIMITY_MULTIPLIER: f32 = 1.7;
const FORMATTING_MULTIPLIER: f32 = 1.4;

/// How a block relates to the block that actually matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchContext {
    Direct,
    Sibling,
    Child,
}

impl MatchContext {
    pub fn multiplier(&self) -> f32 {
        match self {
            MatchContext::Direct => 1.5,
            MatchContext::Sibling => 1.2,
            MatchContext::Child => 1.0,
        }
    }
}

static FORMATTING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(#{1,6}\s|[-*+]\s|\d+[.)]\s)|\[\[[^\]]+\]\]|\[[^\]]+\]\([^)]+\)").unwrap()
});

static NUMBER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Char offsets of every case-insensitive occurrence of `keyword`
fn find_occurrences(haystack: &str, keyword: &str) -> Vec<(usize, bool)> {
    let mut occurrences = Vec::new();
    if keyword.is_empty() {
        return occurrences;
    }

    let cjk_keyword = keyword.chars().any(is_cjk);
    for (byte_index, matched) in haystack.match_indices(keyword) {
        let before = haystack[..byte_index].chars().next_back();
        let after = haystack[byte_index + matched.len()..].chars().next();
        // CJK text has no word separators; any occurrence counts as a whole word
        let whole_word =
            cjk_keyword || (!before.map_or(false, is_word_char) && !after.map_or(false, is_word_char));
        let char_index = haystack[..byte_index].chars().count();
        occurrences.push((char_index, whole_word));
    }
    occurrences
}

/// Heuristic keyword relevance of `content`, in [0, 10]
///
/// Per keyword: `1 + e^(-first_pos/200)`, plus 0.5 when it appears as a whole
/// word, plus 0.3 per repeat (at most 1.0), times 1.5 for important keywords.
/// The sum is then scaled by co-occurrence (×2.0), a length sigmoid centred on
/// 300 chars, proximity within 100 chars (×1.7), heading/list/link formatting
/// (×1.4) and the hierarchy context.
pub fn calculate_relevance_score(
    content: &str,
    keywords: &[String],
    important_keywords: &[String],
    context: MatchContext,
) -> f32 {
    if content.trim().is_empty() || keywords.is_empty() {
        return 0.0;
    }

    let haystack = content.to_lowercase();
    let important: Vec<String> = important_keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut total = 0.0f32;
    let mut matched_keywords = 0usize;
    let mut first_positions: Vec<Vec<usize>> = Vec::new();

    for keyword in keywords {
        let keyword = keyword.trim().to_lowercase();
        let occurrences = find_occurrences(&haystack, &keyword);
        let Some(&(first_position, _)) = occurrences.first() else {
            continue;
        };

        let mut keyword_score = 1.0 + (-(first_position as f32) / POSITION_DECAY_CHARS).exp();
        if occurrences.iter().any(|(_, whole_word)| *whole_word) {
            keyword_score += WHOLE_WORD_BONUS;
        }
        keyword_score += ((occurrences.len() - 1) as f32 * DENSITY_STEP).min(DENSITY_CAP);
        if important.contains(&keyword) {
            keyword_score *= IMPORTANT_MULTIPLIER;
        }

        total += keyword_score;
        matched_keywords += 1;
        first_positions.push(occurrences.into_iter().map(|(position, _)| position).collect());
    }

    if matched_keywords == 0 {
        return 0.0;
    }

    if matched_keywords >= 2 {
        total *= CO_OCCURRENCE_MULTIPLIER;
        if keywords_within_window(&first_positions, PROXIMITY_WINDOW_CHARS) {
            total *= PROXIMITY_MULTIPLIER;
        }
    }

    let length = content.chars().count() as f32;
    total *= 0.5 + 0.5 / (1.0 + ((length - IDEAL_LENGTH_CHARS) / LENGTH_SOFTNESS).exp());

    if FORMATTING_PATTERN.is_match(content) {
        total *= FORMATTING_MULTIPLIER;
    }
    total *= context.multiplier();

    if total.is_finite() {
        total.clamp(0.0, MAX_RELEVANCE_SCORE)
    } else {
        0.0
    }
}

/// Whether occurrences of two different keywords fall within `window` chars
fn keywords_within_window(positions: &[Vec<usize>], window: usize) -> bool {
    for (i, left) in positions.iter().enumerate() {
        for right in &positions[i + 1..] {
            for a in left {
                if right.iter().any(|b| a.abs_diff(*b) <= window) {
                    return true;
                }
            }
        }
    }
    false
}

fn relevance_prompt(query: &str, content: &str) -> String {
    format!(
        "Rate how relevant the note is to the question on a scale from 0 to 10.\n\
         Scoring rubric:\n\
         - Content relevance (0-4): does the note directly address the question?\n\
         - Temporal relevance (0-3): does its time context match the question?\n\
         - Personal significance (0-3): does it record the user's own experiences, plans or decisions?\n\
         Reply with the total score as a single number and nothing else.\n\n\
         Question: {}\n\nNote: {}",
        query, content
    )
}

/// Parse a model reply into a score; anything unreadable scores 0
pub fn parse_relevance_response(response: &str) -> f32 {
    let trimmed = response.trim();
    let parsed = trimmed.parse::<f32>().ok().or_else(|| {
        NUMBER_PATTERN
            .find(trimmed)
            .and_then(|m| m.as_str().parse::<f32>().ok())
    });

    match parsed {
        Some(score) if score.is_finite() => score.clamp(0.0, MAX_RELEVANCE_SCORE),
        _ => {
            log::debug!("🤔 Unparseable relevance response: {:?}", trimmed);
            0.0
        }
    }
}

/// Grade one candidate with the text generator
pub async fn evaluate_relevance(generator: &dyn TextGenerator, query: &str, content: &str) -> SearchResult<f32> {
    let response = generator.generate(&relevance_prompt(query, content)).await?;
    Ok(parse_relevance_response(&response))
}

/// Survivors of AI grading plus the number of batches used
#[derive(Debug, Clone, Default)]
pub struct BatchRelevanceOutcome {
    pub results: Vec<SearchHit>,
    pub batches: usize,
}

/// Grade `results` in batches of `batch_size` concurrent requests
///
/// Hits keep their block data and take the AI score. Only scores strictly
/// above `min_score` survive; survivors are sorted best first. A failed
/// request drops its hit, except configuration errors, which abort the run.
pub async fn batch_evaluate_relevance(
    generator: &dyn TextGenerator,
    query: &str,
    results: Vec<SearchHit>,
    batch_size: usize,
    min_score: f32,
) -> SearchResult<BatchRelevanceOutcome> {
    let batch_size = batch_size.max(1);
    let mut outcome = BatchRelevanceOutcome::default();

    for batch in results.chunks(batch_size) {
        outcome.batches += 1;
        let scores = join_all(batch.iter().map(|hit| evaluate_relevance(generator, query, &hit.content))).await;

        let mut kept = 0;
        for (hit, score) in batch.iter().zip(scores) {
            match score {
                Ok(score) if score > min_score => {
                    kept += 1;
                    outcome.results.push(SearchHit {
                        score,
                        ..hit.clone()
                    });
                }
                Ok(_) => {}
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => log::warn!("⚠️ Relevance evaluation failed for block {}: {}", hit.block_id, e),
            }
        }
        log::info!(
            "🧮 Relevance batch {} graded {} candidates, kept {}",
            outcome.batches,
            batch.len(),
            kept
        );
    }

    outcome
        .results
        .sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(outcome)
}
