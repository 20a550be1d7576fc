// src/transform.rs
//! RawRecord → NormalizedEvent: date resolution, text sanitization, ids.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::TransformError;
use crate::source::id::event_id;
use crate::source::{BillRef, NormalizedEvent, RawRecord, SourceConfig};

const MAX_NAME_CHARS: usize = 300;
const MAX_TEXT_CHARS: usize = 1500;

/// Turns one raw record into the downstream contract.
///
/// `Ok(None)` drops the record quietly (nothing worth publishing);
/// `Err` drops it with a warning. Neither aborts the batch.
pub trait EventTransformer: Send + Sync {
    fn transform(
        &self,
        record: RawRecord,
        source: &SourceConfig,
    ) -> Result<Option<NormalizedEvent>, TransformError>;
}

pub type TagFn = dyn Fn(&RawRecord) -> Vec<String> + Send + Sync;

/// Sanitizing transformer used unless a source brings its own.
#[derive(Clone, Default)]
pub struct DefaultTransformer {
    tagger: Option<Arc<TagFn>>,
}

impl std::fmt::Debug for DefaultTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultTransformer")
            .field("tagger", &self.tagger.is_some())
            .finish()
    }
}

impl DefaultTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a tagging collaborator. Without one, events carry no tags.
    pub fn with_tagger<F>(mut self, f: F) -> Self
    where
        F: Fn(&RawRecord) -> Vec<String> + Send + Sync + 'static,
    {
        self.tagger = Some(Arc::new(f));
        self
    }
}

impl EventTransformer for DefaultTransformer {
    fn transform(
        &self,
        record: RawRecord,
        source: &SourceConfig,
    ) -> Result<Option<NormalizedEvent>, TransformError> {
        let name = truncate_chars(sanitize_text(&record.name), MAX_NAME_CHARS);
        if name.is_empty() {
            return Ok(None);
        }

        let (date, parsed_time) = parse_event_date(&record.date)
            .ok_or_else(|| TransformError::new(&name, format!("unparseable date `{}`", record.date)))?;

        let time = resolve_display_time(record.time.as_deref(), parsed_time);
        let committee = sanitize_opt(record.committee.as_deref(), MAX_NAME_CHARS);
        let description = sanitize_opt(record.description.as_deref(), MAX_TEXT_CHARS);
        let location = sanitize_opt(record.location.as_deref(), MAX_NAME_CHARS);

        let public_participation = mentions_participation(&name)
            || description.as_deref().is_some_and(mentions_participation);

        let mut tags = self
            .tagger
            .as_ref()
            .map(|t| t(&record))
            .unwrap_or_default()
            .into_iter()
            .map(|t| sanitize_text(&t).to_lowercase())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>();
        tags.sort();
        tags.dedup();

        let bills = record
            .bills
            .iter()
            .filter_map(|b| {
                let number = sanitize_text(&b.number);
                (!number.is_empty()).then(|| BillRef {
                    number,
                    title: sanitize_opt(b.title.as_deref(), MAX_NAME_CHARS),
                    url: b.url.as_deref().and_then(safe_url),
                })
            })
            .collect();

        let source_url = record
            .url
            .as_deref()
            .and_then(safe_url)
            .unwrap_or_else(|| source.base_url.clone());

        Ok(Some(NormalizedEvent {
            id: event_id(&source.key, date, &name, committee.as_deref()),
            name,
            date,
            time,
            location,
            committee,
            description,
            tags,
            public_participation,
            bills,
            source_key: source.key.clone(),
            source_url,
        }))
    }
}

/// Resolve a free-form date into a day and, when present, a time of day.
///
/// Accepted: RFC 3339, RFC 2822, ISO date/datetime, `MM/DD/YYYY`,
/// `Month D, YYYY` (with optional weekday prefix). Slash dates are read
/// month-first.
pub fn parse_event_date(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some((dt.date_naive(), Some(dt.time())));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some((dt.date_naive(), Some(dt.time())));
    }

    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %I:%M %p",
        "%m/%d/%Y %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some((dt.date(), Some(dt.time())));
        }
    }

    let without_weekday = strip_weekday(s);
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%d %B %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(without_weekday, fmt) {
            return Some((d, None));
        }
    }
    None
}

fn strip_weekday(s: &str) -> &str {
    static RE_WEEKDAY: OnceCell<Regex> = OnceCell::new();
    let re = RE_WEEKDAY.get_or_init(|| {
        Regex::new(r"(?i)^(mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+").expect("weekday regex")
    });
    match re.find(s) {
        Some(m) => &s[m.end()..],
        None => s,
    }
}

/// Explicit time text wins, then a parsed time component, else "TBD".
/// Midnight from a datetime is treated as "no time given".
fn resolve_display_time(explicit: Option<&str>, parsed: Option<NaiveTime>) -> String {
    if let Some(t) = explicit.map(sanitize_text).filter(|t| !t.is_empty()) {
        return t;
    }
    match parsed {
        Some(t) if t != NaiveTime::MIN => t.format("%-I:%M %p").to_string(),
        _ => "TBD".to_string(),
    }
}

fn mentions_participation(text: &str) -> bool {
    static RE_PARTICIPATION: OnceCell<Regex> = OnceCell::new();
    let re = RE_PARTICIPATION.get_or_init(|| {
        Regex::new(r"(?i)\b(public (comment|testimony|hearing|input)|testify|testimony|open to the public)\b")
            .expect("participation regex")
    });
    re.is_match(text)
}

/// Markup-free single-line text: entities decoded, tags and stray angle
/// brackets removed, whitespace collapsed.
pub fn sanitize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_BLOCKS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z!/][^>]*>").expect("tag regex"));
    let re_blocks = RE_BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("block regex")
    });
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));

    // Twice: entity-encoded markup only shows up after the first decode.
    let mut out = s.to_string();
    for _ in 0..2 {
        out = re_blocks.replace_all(&out, " ").to_string();
        out = re_tags.replace_all(&out, " ").to_string();
        out = html_escape::decode_html_entities(&out).to_string();
    }
    out = re_blocks.replace_all(&out, " ").to_string();
    out = re_tags.replace_all(&out, " ").to_string();
    out = out.replace(['<', '>'], "");

    out = out
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    re_ws.replace_all(&out, " ").trim().to_string()
}

fn sanitize_opt(s: Option<&str>, max_chars: usize) -> Option<String> {
    s.map(|v| truncate_chars(sanitize_text(v), max_chars))
        .filter(|v| !v.is_empty())
}

fn truncate_chars(s: String, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        s.chars().take(max_chars).collect()
    } else {
        s
    }
}

/// Only absolute http(s) links survive; `javascript:` and friends do not.
fn safe_url(u: &str) -> Option<String> {
    let t = u.trim();
    let lower = t.to_ascii_lowercase();
    if (lower.starts_with("https://") || lower.starts_with("http://"))
        && !t.chars().any(|c| c.is_whitespace() || c == '"' || c == '<' || c == '>')
    {
        Some(t.to_string())
    } else {
        None
    }
}
