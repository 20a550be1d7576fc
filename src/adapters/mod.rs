// src/adapters/mod.rs
//! Generic adapters for sources that publish machine-readable calendars.
//! Site-specific scrapers live with their callers and implement
//! [`crate::source::SourceAdapter`] the same way.

pub mod json_feed;
pub mod rss_calendar;

pub use json_feed::JsonFeedAdapter;
pub use rss_calendar::RssCalendarAdapter;
