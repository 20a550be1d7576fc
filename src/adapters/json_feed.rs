// src/adapters/json_feed.rs
//! JSON APIs that already return event-shaped objects.
//!
//! Accepts either a bare array or `{"events": [...]}`. Each element is
//! validated into a [`RawRecord`] on its own; malformed elements are
//! skipped so one bad row does not sink the feed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::source::{AdapterContext, RawRecord, SourceAdapter};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<Value>),
    Wrapped { events: Vec<Value> },
}

#[derive(Debug, Clone, Default)]
pub struct JsonFeedAdapter {
    url: Option<String>,
}

impl JsonFeedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: Some(url.into()) }
    }
}

#[async_trait]
impl SourceAdapter for JsonFeedAdapter {
    async fn fetch_records(&self, ctx: AdapterContext) -> Result<Vec<RawRecord>, SourceError> {
        let url = self.url.as_deref().unwrap_or(&ctx.config.base_url);
        let payload: Payload = ctx.fetcher.fetch_json(url).await?;
        let items = match payload {
            Payload::List(v) | Payload::Wrapped { events: v } => v,
        };

        let total = items.len();
        let records: Vec<RawRecord> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RawRecord>(item) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::debug!(target: "adapter", source = %ctx.config.key, error = %e, "skipping malformed feed item");
                    None
                }
            })
            .collect();

        if total > 0 && records.is_empty() {
            return Err(SourceError::adapter(format!(
                "none of {total} items in {url} matched the event shape"
            )));
        }
        Ok(records)
    }
}
