//! Query keyword extraction.
//!
//! Local extraction is deterministic and offline: it tokenizes the query,
//! drops stop words and time phrases (those are handled by
//! [`crate::time_context`]) and splits long CJK runs into bigrams. An optional
//! second pass asks the text generator for related terms; any failure there
//! simply means no expansion.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm_client::TextGenerator;
use crate::time_context::{detect_language, is_cjk, Language};

/// Number of keywords treated as important
pub const IMPORTANT_KEYWORD_COUNT: usize = 3;
/// Upper bound on keywords after AI expansion
pub const MAX_KEYWORDS: usize = 20;
/// CJK runs longer than this are split into bigrams
const MAX_CJK_RUN: usize = 4;

static LATIN_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9'_\-]*").unwrap());

static ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "at", "for", "with", "about", "from",
    "by", "is", "are", "was", "were", "be", "been", "am", "what", "which", "who", "when", "where", "how",
    "why", "did", "do", "does", "done", "i", "me", "my", "we", "our", "you", "your", "it", "its", "this",
    "that", "these", "those", "there", "here", "any", "some", "all", "notes", "note", "find", "search",
    "show", "tell", "please", "can", "could", "would", "should", "have", "has", "had", "not", "no",
    "so", "if", "then", "than", "into", "up", "out", "get", "got", "write", "wrote", "written", "thing",
    "things", "stuff", "related", "regarding", "anything", "everything", "something",
    // time words are handled by time detection
    "today", "yesterday", "week", "weeks", "month", "months", "year", "years", "day", "days", "ago",
    "last", "next", "one",
];

// Multi-character entries are removed before single characters
static CHINESE_STOP_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    let mut phrases = vec![
        // time phrases
        "这个星期", "上个星期", "本星期", "上星期", "个月前", "星期前", "上个月", "这个月", "今天", "今日",
        "昨天", "昨日", "本周", "这周", "上周", "本月", "上月", "今年", "去年", "天前", "周前", "之前",
        "以前", "最近",
        // filler
        "的时候", "帮我找", "帮我", "查找", "搜索", "寻找", "什么", "怎么", "哪些", "哪里", "如何", "关于",
        "一下", "没有", "我们", "你们", "他们", "这个", "那个", "一些", "相关", "笔记", "记录", "内容",
        "时候", "有关", "所有", "全部", "以及", "还是",
        // single characters
        "的", "了", "和", "是", "在", "我", "你", "他", "她", "吗", "呢", "吧", "啊", "都", "也", "就",
        "还", "把", "被", "给", "对", "与", "或", "请", "找", "过", "有",
    ];
    phrases.sort_by_key(|p| std::cmp::Reverse(p.chars().count()));
    phrases
});

/// Keywords extracted from one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedKeywords {
    pub keywords: Vec<String>,
    /// Subset of `keywords` weighted higher by relevance scoring
    pub important_keywords: Vec<String>,
    /// Whether AI expansion contributed
    pub expanded: bool,
}

impl ExtractedKeywords {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

fn push_unique(target: &mut Vec<String>, keyword: String) {
    if !keyword.is_empty() && !target.iter().any(|k| k.eq_ignore_ascii_case(&keyword)) {
        target.push(keyword);
    }
}

fn split_cjk_run(run: &str, out: &mut Vec<String>) {
    let mut cleaned = run.to_string();
    for phrase in CHINESE_STOP_PHRASES.iter() {
        cleaned = cleaned.replace(phrase, " ");
    }
    for piece in cleaned.split_whitespace() {
        let chars: Vec<char> = piece.chars().collect();
        match chars.len() {
            0 | 1 => {}
            n if n <= MAX_CJK_RUN => push_unique(out, piece.to_string()),
            _ => {
                for pair in chars.windows(2) {
                    push_unique(out, pair.iter().collect());
                }
            }
        }
    }
}

/// Top keywords by character length; ties keep query order
pub fn important_keywords(keywords: &[String]) -> Vec<String> {
    let mut ranked: Vec<&String> = keywords.iter().collect();
    ranked.sort_by_key(|k| std::cmp::Reverse(k.chars().count()));
    ranked.into_iter().take(IMPORTANT_KEYWORD_COUNT).cloned().collect()
}

/// Deterministic, offline keyword extraction
pub fn extract_keywords(query: &str) -> ExtractedKeywords {
    let mut keywords = Vec::new();

    // Split into CJK runs and everything else, keeping order
    let mut cjk_run = String::new();
    let mut other_run = String::new();
    let flush_other = |text: &mut String, out: &mut Vec<String>| {
        for token in LATIN_TOKEN.find_iter(text.as_str()) {
            let token = token.as_str().trim_matches(|c: char| c == '\'' || c == '-' || c == '_').to_lowercase();
            if token.len() < 2 || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if ENGLISH_STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            push_unique(out, token);
        }
        text.clear();
    };

    for c in query.chars() {
        if is_cjk(c) {
            if !other_run.is_empty() {
                flush_other(&mut other_run, &mut keywords);
            }
            cjk_run.push(c);
        } else {
            if !cjk_run.is_empty() {
                split_cjk_run(&cjk_run, &mut keywords);
                cjk_run.clear();
            }
            other_run.push(c);
        }
    }
    if !cjk_run.is_empty() {
        split_cjk_run(&cjk_run, &mut keywords);
    }
    if !other_run.is_empty() {
        flush_other(&mut other_run, &mut keywords);
    }

    ExtractedKeywords {
        important_keywords: important_keywords(&keywords),
        keywords,
        expanded: false,
    }
}

#[derive(Debug, Deserialize)]
struct KeywordResponse {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default, alias = "important_keywords", rename = "importantKeywords")]
    important_keywords: Vec<String>,
}

/// Pull the first JSON object out of a model answer
///
/// Returns `None` for anything that does not parse; callers treat that as
/// "no expansion".
pub fn parse_keyword_response(text: &str) -> Option<(Vec<String>, Vec<String>)> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: KeywordResponse = serde_json::from_str(&text[start..=end]).ok()?;
    let clean = |list: Vec<String>| -> Vec<String> {
        list.into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    };
    Some((clean(parsed.keywords), clean(parsed.important_keywords)))
}

fn expansion_prompt(query: &str, local: &[String]) -> String {
    match detect_language(query) {
        Language::Zh => format!(
            "你是笔记搜索助手。根据用户的问题给出用于检索笔记的关键词，包括同义词和相关词。\n\
             只返回 JSON：{{\"keywords\": [...], \"importantKeywords\": [...]}}，importantKeywords 最多 3 个。\n\
             问题：{}\n已提取关键词：{}",
            query,
            local.join("、")
        ),
        Language::En => format!(
            "You help search personal notes. Suggest search keywords for the question, including synonyms and closely related terms.\n\
             Reply with JSON only: {{\"keywords\": [...], \"importantKeywords\": [...]}} with at most 3 important keywords.\n\
             Question: {}\nKeywords so far: {}",
            query,
            local.join(", ")
        ),
    }
}

/// Merge AI suggested keywords into a local extraction
///
/// Queries without local keywords are returned untouched and never reach the
/// generator.
pub async fn expand_keywords(generator: &dyn TextGenerator, query: &str, local: ExtractedKeywords) -> ExtractedKeywords {
    if local.is_empty() {
        return local;
    }

    let answer = match generator.generate(&expansion_prompt(query, &local.keywords)).await {
        Ok(answer) => answer,
        Err(e) => {
            log::warn!("⚠️ Keyword expansion failed, using local keywords: {}", e);
            return local;
        }
    };

    let Some((suggested, important)) = parse_keyword_response(&answer) else {
        log::warn!("⚠️ Keyword expansion answer was not valid JSON, ignoring it");
        return local;
    };

    let mut keywords = local.keywords.clone();
    for keyword in suggested {
        push_unique(&mut keywords, keyword);
    }
    keywords.truncate(MAX_KEYWORDS.max(local.keywords.len()));

    let important: Vec<String> = important
        .into_iter()
        .filter(|k| keywords.iter().any(|existing| existing.eq_ignore_ascii_case(k)))
        .take(IMPORTANT_KEYWORD_COUNT)
        .collect();
    let important_keywords = if important.is_empty() {
        local.important_keywords
    } else {
        important
    };

    log::debug!("🔑 Expanded {} local keywords to {}", local.keywords.len(), keywords.len());
    ExtractedKeywords {
        keywords,
        important_keywords,
        expanded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SearchError, SearchResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedGenerator {
        answer: SearchResult<String>,
        calls: AtomicUsize,
    }

    impl CannedGenerator {
        fn new(answer: SearchResult<String>) -> Self {
            Self { answer, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _prompt: &str) -> SearchResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[test]
    fn test_english_extraction_drops_stop_and_time_words() {
        let extracted = extract_keywords("What did I write about the garden project last week?");
        assert_eq!(extracted.keywords, vec!["garden", "project"]);
        assert_eq!(extracted.important_keywords, vec!["project", "garden"]);
    }

    #[test]
    fn test_chinese_extraction() {
        let extracted = extract_keywords("昨天关于项目的笔记");
        assert_eq!(extracted.keywords, vec!["项目"]);

        // long runs become bigrams
        let extracted = extract_keywords("机器学习模型训练");
        assert_eq!(
            extracted.keywords,
            vec!["机器", "器学", "学习", "习模", "模型", "型训", "训练"]
        );
    }

    #[test]
    fn test_mixed_language_keeps_order() {
        let extracted = extract_keywords("Rust 生命周期 borrow checker");
        assert_eq!(extracted.keywords, vec!["rust", "生命周期", "borrow", "checker"]);
    }

    #[test]
    fn test_empty_and_noise_queries() {
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("   ").is_empty());
        assert!(extract_keywords("what did I do today?").is_empty());
        assert!(extract_keywords("3 days ago").is_empty());
        assert!(extract_keywords("今天").is_empty());
    }

    #[test]
    fn test_important_keywords_prefer_length_then_order() {
        let keywords: Vec<String> = ["ab", "abcd", "xyz", "wxyz", "k"].iter().map(|s| s.to_string()).collect();
        assert_eq!(important_keywords(&keywords), vec!["abcd", "wxyz", "xyz"]);
    }

    #[test]
    fn test_parse_keyword_response() {
        let (keywords, important) = parse_keyword_response(
            "Sure! {\"keywords\": [\"milk\", \" dairy \", \"\"], \"importantKeywords\": [\"milk\"]} done",
        )
        .unwrap();
        assert_eq!(keywords, vec!["milk", "dairy"]);
        assert_eq!(important, vec!["milk"]);

        assert!(parse_keyword_response("no json here").is_none());
        assert!(parse_keyword_response("{not json}").is_none());
        assert!(parse_keyword_response("} backwards {").is_none());
    }

    #[tokio::test]
    async fn test_expansion_merges_suggestions() {
        let generator = CannedGenerator::new(Ok(
            r#"{"keywords": ["groceries", "Milk", "dairy"], "importantKeywords": ["groceries"]}"#.to_string(),
        ));
        let local = extract_keywords("buy milk");
        let expanded = expand_keywords(&generator, "buy milk", local).await;

        assert!(expanded.expanded);
        assert_eq!(expanded.keywords, vec!["buy", "milk", "groceries", "dairy"]);
        assert_eq!(expanded.important_keywords, vec!["groceries"]);
    }

    #[tokio::test]
    async fn test_expansion_failures_fall_back_to_local() {
        let local = extract_keywords("garden project");

        let broken = CannedGenerator::new(Ok("I cannot answer in JSON".to_string()));
        assert_eq!(expand_keywords(&broken, "garden project", local.clone()).await, local);

        let offline = CannedGenerator::new(Err(SearchError::Network {
            message: "refused".into(),
            is_timeout: false,
        }));
        assert_eq!(expand_keywords(&offline, "garden project", local.clone()).await, local);
    }

    #[tokio::test]
    async fn test_empty_query_never_calls_generator() {
        let generator = CannedGenerator::new(Ok("{}".to_string()));
        let expanded = expand_keywords(&generator, "", extract_keywords("")).await;
        assert!(expanded.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
