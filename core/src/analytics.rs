use crate::search::ResultSource;
use crate::store::LeadFilter;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One answered search, as reported to the analytics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEvent {
    pub query_text: Option<String>,
    pub filters: LeadFilter,
    pub results_count: usize,
    pub response_time_ms: f64,
    pub cache_hit: bool,
    pub source: ResultSource,
}

/// Receiver of search analytics events. Recording must not fail the search.
pub trait AnalyticsSink: Send + Sync {
    fn record_search(&self, event: &SearchEvent);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AnalyticsSink for LogSink {
    fn record_search(&self, event: &SearchEvent) {
        info!(
            query = event.query_text.as_deref().unwrap_or(""),
            results = event.results_count,
            response_ms = event.response_time_ms,
            cache_hit = event.cache_hit,
            source = ?event.source,
            "search"
        );
    }
}
