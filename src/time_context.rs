//! # Language and Time Context Detection
//!
//! Classifies the query language and turns relative or absolute time phrases
//! ("yesterday", "上周", "3 days ago", "2024/06/15") into concrete day-granular
//! ranges plus the date strings a note might contain for those days.
//!
//! Every category is tested independently; a query such as "去年今天" yields
//! ranges for "today", "last year" and "this day last year" at once. Parsing
//! never fails: an unrecognised query simply has no time context.

use chrono::{Datelike, Days, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Query language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
}

/// Classify text by comparing Latin letters against CJK ideographs.
/// Ties (including empty text) resolve to Chinese.
pub fn detect_language(text: &str) -> Language {
    let mut latin = 0usize;
    let mut cjk = 0usize;
    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            latin += 1;
        } else if is_cjk(c) {
            cjk += 1;
        }
    }
    if latin > cjk {
        Language::En
    } else {
        Language::Zh
    }
}

pub(crate) fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c) || ('\u{3400}'..='\u{4dbf}').contains(&c)
}

/// A resolved time constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub description: String,
    pub is_relative_time: bool,
}

impl TimeRange {
    fn days(first: NaiveDate, last: NaiveDate, description: impl Into<String>, is_relative_time: bool) -> Self {
        Self {
            start: Some(first.and_time(NaiveTime::default())),
            end: Some(last.and_time(end_of_day())),
            description: description.into(),
            is_relative_time,
        }
    }

    /// Whether the given day falls inside this range
    pub fn contains_day(&self, day: NaiveDate) -> bool {
        let start_ok = self.start.map_or(true, |s| s.date() <= day);
        let end_ok = self.end.map_or(true, |e| e.date() >= day);
        start_ok && end_ok
    }
}

/// Outcome of scanning a query for time expressions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeToolsResult {
    pub has_time_context: bool,
    pub time_ranges: Vec<TimeRange>,
    /// Date strings in several notations, for lexical matching
    pub keywords: Vec<String>,
}

impl TimeToolsResult {
    /// Human readable annotation used in summary prompts
    pub fn annotation(&self) -> Option<String> {
        if !self.has_time_context {
            return None;
        }
        let parts: Vec<String> = self
            .time_ranges
            .iter()
            .map(|range| match (range.start, range.end) {
                (Some(start), Some(end)) => format!(
                    "{} ({} – {})",
                    range.description,
                    start.format("%Y-%m-%d"),
                    end.format("%Y-%m-%d")
                ),
                _ => range.description.clone(),
            })
            .collect();
        Some(parts.join("; "))
    }
}

#[derive(Debug, Clone, Copy)]
enum Granularity {
    Days,
    Month,
    Year,
}

struct RelativePattern {
    regex: Regex,
    description: &'static str,
    resolve: fn(NaiveDate) -> (NaiveDate, NaiveDate, Granularity),
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default()
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = day.with_day(1).unwrap_or(day);
    let last = first
        .checked_add_months(Months::new(1))
        .map(|next| next - Duration::days(1))
        .unwrap_or(first);
    (first, last)
}

fn year_bounds(year: i32, fallback: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(fallback);
    let last = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(fallback);
    (first, last)
}

fn one_year_earlier(day: NaiveDate) -> NaiveDate {
    day.checked_sub_months(Months::new(12)).unwrap_or(day)
}

static RELATIVE_PATTERNS: Lazy<Vec<RelativePattern>> = Lazy::new(|| {
    let build = |pattern: &str| Regex::new(pattern).expect("static time pattern");
    vec![
        RelativePattern {
            regex: build(r"(?i)今天|今日|\btoday\b"),
            description: "today",
            resolve: |d| (d, d, Granularity::Days),
        },
        RelativePattern {
            regex: build(r"(?i)昨天|昨日|\byesterday\b"),
            description: "yesterday",
            resolve: |d| {
                let y = d - Duration::days(1);
                (y, y, Granularity::Days)
            },
        },
        RelativePattern {
            regex: build(r"(?i)本周|这周|这个星期|本星期|\bthis week\b"),
            description: "this week",
            resolve: |d| {
                let start = week_start(d);
                (start, start + Duration::days(6), Granularity::Days)
            },
        },
        RelativePattern {
            regex: build(r"(?i)上周|上个星期|上星期|\blast week\b"),
            description: "last week",
            resolve: |d| {
                let start = week_start(d) - Duration::days(7);
                (start, start + Duration::days(6), Granularity::Days)
            },
        },
        RelativePattern {
            regex: build(r"(?i)本月|这个月|\bthis month\b"),
            description: "this month",
            resolve: |d| {
                let (first, last) = month_bounds(d);
                (first, last, Granularity::Month)
            },
        },
        RelativePattern {
            regex: build(r"(?i)上个月|上月|\blast month\b"),
            description: "last month",
            resolve: |d| {
                let previous = d.checked_sub_months(Months::new(1)).unwrap_or(d);
                let (first, last) = month_bounds(previous);
                (first, last, Granularity::Month)
            },
        },
        RelativePattern {
            regex: build(r"(?i)今年|\bthis year\b"),
            description: "this year",
            resolve: |d| {
                let (first, last) = year_bounds(d.year(), d);
                (first, last, Granularity::Year)
            },
        },
        RelativePattern {
            regex: build(r"(?i)去年|\blast year\b"),
            description: "last year",
            resolve: |d| {
                let (first, last) = year_bounds(d.year() - 1, d);
                (first, last, Granularity::Year)
            },
        },
        RelativePattern {
            regex: build(r"(?i)去年的?今天|去年今日|\bthis day last year\b|\bone year ago today\b"),
            description: "this day last year",
            resolve: |d| {
                let day = one_year_earlier(d);
                (day, day, Granularity::Days)
            },
        },
    ]
});

static AGO_EN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s+(days?|weeks?|months?)\s+ago\b").expect("static time pattern"));
static AGO_ZH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+|[一二两三四五六七八九十]+)\s*(天|日|周|个星期|星期|个月|月)(?:之)?前").expect("static time pattern")
});
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("static time pattern"));
static ZH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})[日号]").expect("static time pattern"));
static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})/(\d{1,2})/(\d{1,2})\b").expect("static time pattern"));
static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})(?:st|nd|rd|th)").expect("static time pattern"));
static COMPACT_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").expect("static time pattern"));

/// Parse small Chinese numerals (一 .. 九十九) or ASCII digits
fn parse_count(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let digit = |c: char| -> Option<u32> {
        Some(match c {
            '一' => 1,
            '二' | '两' => 2,
            '三' => 3,
            '四' => 4,
            '五' => 5,
            '六' => 6,
            '七' => 7,
            '八' => 8,
            '九' => 9,
            _ => return None,
        })
    };
    let chars: Vec<char> = raw.chars().collect();
    match chars.as_slice() {
        [c] if *c == '十' => Some(10),
        [c] => digit(*c),
        ['十', unit] => digit(*unit).map(|u| 10 + u),
        [tens, '十'] => digit(*tens).map(|t| t * 10),
        [tens, '十', unit] => Some(digit(*tens)? * 10 + digit(*unit)?),
        _ => None,
    }
}

fn resolve_ago(reference: NaiveDate, count: u32, unit: &str) -> Option<(NaiveDate, NaiveDate, Granularity)> {
    let unit = unit.to_lowercase();
    // Counts come straight from the query; out-of-range dates leave the phrase unresolved
    if unit.starts_with("day") || unit == "天" || unit == "日" {
        let day = reference.checked_sub_days(Days::new(count.into()))?;
        Some((day, day, Granularity::Days))
    } else if unit.starts_with("week") || unit.contains('周') || unit.contains("星期") {
        let day = reference.checked_sub_days(Days::new(u64::from(count) * 7))?;
        let start = day.checked_sub_days(Days::new(day.weekday().num_days_from_monday().into()))?;
        let end = start.checked_add_days(Days::new(6))?;
        Some((start, end, Granularity::Days))
    } else if unit.starts_with("month") || unit.contains('月') {
        let month = reference.checked_sub_months(Months::new(count))?;
        let (first, last) = month_bounds(month);
        Some((first, last, Granularity::Month))
    } else {
        None
    }
}

/// Scan `text` for time expressions relative to `reference` (today when absent)
pub fn parse_time_query(text: &str, reference: Option<NaiveDate>) -> TimeToolsResult {
    let reference = reference.unwrap_or_else(|| Local::now().date_naive());
    let mut resolved: Vec<(TimeRange, Granularity)> = Vec::new();

    for pattern in RELATIVE_PATTERNS.iter() {
        if pattern.regex.is_match(text) {
            let (first, last, granularity) = (pattern.resolve)(reference);
            resolved.push((TimeRange::days(first, last, pattern.description, true), granularity));
        }
    }

    for regex in [&*AGO_EN, &*AGO_ZH] {
        for caps in regex.captures_iter(text) {
            let count = caps.get(1).and_then(|m| parse_count(m.as_str()));
            let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if let Some((first, last, granularity)) = count.and_then(|n| resolve_ago(reference, n, unit)) {
                let description = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
                resolved.push((TimeRange::days(first, last, description, true), granularity));
            }
        }
    }

    for regex in [&*ISO_DATE, &*ZH_DATE, &*SLASH_DATE] {
        for caps in regex.captures_iter(text) {
            let parsed = (|| {
                let year = caps.get(1)?.as_str().parse().ok()?;
                let month = caps.get(2)?.as_str().parse().ok()?;
                let day = caps.get(3)?.as_str().parse().ok()?;
                NaiveDate::from_ymd_opt(year, month, day)
            })();
            if let Some(day) = parsed {
                let description = day.format("%Y-%m-%d").to_string();
                let already = resolved
                    .iter()
                    .any(|(r, _)| !r.is_relative_time && r.description == description);
                if !already {
                    resolved.push((TimeRange::days(day, day, description, false), Granularity::Days));
                }
            }
        }
    }

    let mut keywords: Vec<String> = Vec::new();
    for (range, granularity) in &resolved {
        let (Some(start), Some(end)) = (range.start, range.end) else {
            continue;
        };
        let (first, last) = (start.date(), end.date());
        let candidates = match granularity {
            Granularity::Days => first
                .iter_days()
                .take_while(|d| *d <= last)
                .flat_map(date_keywords)
                .collect::<Vec<_>>(),
            Granularity::Month => month_keywords(first),
            Granularity::Year => year_keywords(first.year()),
        };
        for keyword in candidates {
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }

    TimeToolsResult {
        has_time_context: !resolved.is_empty(),
        time_ranges: resolved.into_iter().map(|(range, _)| range).collect(),
        keywords,
    }
}

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// The notations a note could use to mention `day`
pub fn date_keywords(day: NaiveDate) -> Vec<String> {
    vec![
        day.format("%Y-%m-%d").to_string(),
        format!("{}年{}月{}日", day.year(), day.month(), day.day()),
        day.format("%Y/%m/%d").to_string(),
        day.format("%Y.%m.%d").to_string(),
        format!("{} {}{}, {}", day.format("%b"), day.day(), ordinal_suffix(day.day()), day.year()),
    ]
}

fn month_keywords(day: NaiveDate) -> Vec<String> {
    vec![
        day.format("%Y-%m").to_string(),
        format!("{}年{}月", day.year(), day.month()),
        day.format("%Y/%m").to_string(),
    ]
}

fn year_keywords(year: i32) -> Vec<String> {
    vec![year.to_string(), format!("{}年", year)]
}

/// Date a journal-style page name stands for, e.g. "Jun 15th, 2024"
pub fn reference_date_from_page_name(name: &str) -> Option<NaiveDate> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(caps) = COMPACT_DATE.captures(trimmed) {
        let year = caps.get(1)?.as_str().parse().ok()?;
        let month = caps.get(2)?.as_str().parse().ok()?;
        let day = caps.get(3)?.as_str().parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let normalized = ORDINAL_SUFFIX.replace_all(trimmed, "$1");
    const FORMATS: [&str; 7] = [
        "%b %d, %Y",
        "%B %d, %Y",
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%Y.%m.%d",
        "%Y年%m月%d日",
        "%d-%m-%Y",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&normalized, format).ok())
}
