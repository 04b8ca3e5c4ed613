//! Analytics sink for completed interactions.
//!
//! [`AnalyticsRecorder::record`] is deliberately synchronous and infallible:
//! implementations hand the entry off (to a background task, a channel, a
//! buffer) and report their own failures through logging. A caller that has
//! already produced its answer is never failed or delayed by analytics.

use std::collections::HashSet;

use crate::models::{QueryLogEntry, SearchResult};

pub trait AnalyticsRecorder: Send + Sync {
    fn record(&self, entry: QueryLogEntry);
}

/// Distinct, non-empty source URLs in retrieval order.
pub fn source_urls(results: &[SearchResult]) -> Vec<String> {
    distinct_sources(results.iter().map(|r| r.document.url.as_str()))
}

/// Drop empty and repeated URLs, keeping the first occurrence of each.
pub fn distinct_sources<'a>(urls: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|u| !u.is_empty())
        .filter(|u| seen.insert(*u))
        .map(str::to_string)
        .collect()
}
