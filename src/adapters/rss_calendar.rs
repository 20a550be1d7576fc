// src/adapters/rss_calendar.rs
//! Calendar feeds published as RSS (CivicPlus-style `calendarEvent:*`
//! extensions when present, plain `pubDate` otherwise).

use anyhow::Context;
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::SourceError;
use crate::source::{AdapterContext, RawRecord, SourceAdapter};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    category: Vec<String>,
    #[serde(rename = "calendarEvent:EventDates", alias = "EventDates")]
    event_dates: Option<String>,
    #[serde(rename = "calendarEvent:EventTimes", alias = "EventTimes")]
    event_times: Option<String>,
    #[serde(rename = "calendarEvent:Location", alias = "Location")]
    location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RssCalendarAdapter {
    feed_url: Option<String>,
}

impl RssCalendarAdapter {
    /// Read the feed at the source's `base_url`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed_url(url: impl Into<String>) -> Self {
        Self {
            feed_url: Some(url.into()),
        }
    }
}

#[async_trait]
impl SourceAdapter for RssCalendarAdapter {
    async fn fetch_records(&self, ctx: AdapterContext) -> Result<Vec<RawRecord>, SourceError> {
        let url = self.feed_url.as_deref().unwrap_or(&ctx.config.base_url);
        let body = ctx.fetcher.fetch_text(url).await?;

        // Feeds can be large; keep XML parsing off the async workers.
        let records = tokio::task::spawn_blocking(move || parse_feed(&body))
            .await
            .context("rss parse task")??;
        tracing::debug!(target: "adapter", source = %ctx.config.key, records = records.len(), "rss feed parsed");
        Ok(records)
    }
}

/// Parse an RSS document into raw records. Items without a title or any
/// usable date are skipped.
pub fn parse_feed(xml: &str) -> anyhow::Result<Vec<RawRecord>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing calendar rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let Some(name) = it.title.filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        let date = it
            .event_dates
            .as_deref()
            .map(first_of_range)
            .or(it.pub_date.as_deref())
            .map(str::to_string);
        let Some(date) = date else {
            continue;
        };

        out.push(RawRecord {
            name,
            date,
            time: it.event_times.as_deref().map(first_of_range).map(str::to_string),
            location: it.location,
            committee: it.category.into_iter().next(),
            description: it.description,
            url: it.link,
            bills: Vec::new(),
        });
    }
    Ok(out)
}

/// `"May 14, 2025 - May 15, 2025"` → `"May 14, 2025"`.
fn first_of_range(s: &str) -> &str {
    s.split(" - ").next().unwrap_or(s).trim()
}

/// HTML entities XML does not know about.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
