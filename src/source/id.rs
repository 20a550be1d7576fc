// src/source/id.rs
//! Deterministic event ids so re-runs over the same upstream data dedupe downstream.

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};

const MAX_SLUG_LEN: usize = 60;
/// Hex chars of the name digest used when nothing ASCII survives slugging.
const HASH_SLUG_LEN: usize = 12;

/// Lowercase ASCII slug: alphanumerics kept, everything else collapses to `-`.
/// Names with no ASCII alphanumerics at all (CJK titles, pure punctuation)
/// become `event-<digest prefix>` so distinct names keep distinct slugs.
pub fn slugify(s: &str) -> String {
    static RE_NON_ALNUM: OnceCell<Regex> = OnceCell::new();
    let re = RE_NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug regex"));

    let lowered = s.trim().to_lowercase();
    let slug = re.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');

    let mut out: String = slug.chars().take(MAX_SLUG_LEN).collect();
    while out.ends_with('-') {
        out.pop();
    }
    if !out.is_empty() {
        return out;
    }
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return "event".to_string();
    }
    let digest = hex::encode(Sha256::digest(trimmed.as_bytes()));
    format!("event-{}", &digest[..HASH_SLUG_LEN])
}

/// `<source key>-<YYYY-MM-DD>-<slug of name>`. Falls back to the committee
/// when the name is blank.
pub fn event_id(source_key: &str, date: NaiveDate, name: &str, committee: Option<&str>) -> String {
    let basis = if name.trim().is_empty() {
        committee.unwrap_or_default()
    } else {
        name
    };
    format!("{}-{}-{}", source_key, date.format("%Y-%m-%d"), slugify(basis))
}
