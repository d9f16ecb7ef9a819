//! Search engine: cache-first lookup by query hash, then inverted index,
//! full-text fallback and relational filtering, ranked and cached.

mod query;
mod ranking;

pub use self::query::{CanonicalQuery, ParsedQuery, QueryProcessor, SearchQuery, SortBy, DEFAULT_LIMIT, MAX_QUERY_CHARS};
pub use self::ranking::{sort_hits, Ranker, SearchHit};

use crate::analytics::{AnalyticsSink, LogSink, SearchEvent};
use crate::cache::{CacheHealth, CacheStore, Namespace};
use crate::config::Settings;
use crate::indexer::{IndexingStatus, LeadIndexer};
use crate::store::{LeadFilter, LeadStore};
use crate::tokenizer::lexemes;
use crate::{Lead, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tracing::{debug, info};

pub const MIN_SUGGESTION_CHARS: usize = 2;
const POPULAR_SCAN: usize = 50;
const HIT_COUNTER: &str = "search_cache_hits";
const MISS_COUNTER: &str = "search_cache_misses";

/// Where a result list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Inverted-index candidates filtered against the lead store.
    Index,
    /// Full-text match on the lead store's search vectors.
    FullText,
    /// Relational filter only, no text.
    Filter,
}

/// Value stored under `search:<hash>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSearch {
    pub query: CanonicalQuery,
    pub results: Vec<SearchHit>,
    pub source: ResultSource,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// Ranked hits before pagination, capped at the max cached results.
    pub total_hits: usize,
    pub offset: usize,
    pub limit: usize,
    pub cache_hit: bool,
    pub source: ResultSource,
    /// Seconds spent answering.
    pub took_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub indexing_status: IndexingStatus,
    pub popular_searches: Vec<String>,
    pub cache_health: CacheHealth,
    pub cache_hits: i64,
    pub cache_misses: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn LeadStore>,
    cache: CacheStore,
    indexer: LeadIndexer,
    processor: QueryProcessor,
    analytics: Arc<dyn AnalyticsSink>,
    max_results: usize,
    max_page_size: usize,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn LeadStore>, cache: CacheStore, indexer: LeadIndexer, settings: &Settings) -> Self {
        Self {
            processor: QueryProcessor::new(indexer.rules().clone()),
            store,
            cache,
            indexer,
            analytics: Arc::new(LogSink),
            max_results: settings.max_search_results,
            max_page_size: settings.max_page_size,
        }
    }

    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = sink;
        self
    }

    pub fn max_page_size(&self) -> usize { self.max_page_size }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let started = Instant::now();
        query.validate(self.max_page_size)?;
        let canonical = query.canonical();
        let hash = canonical.hash();

        if let Some(cached) = self.cache.get::<CachedSearch>(Namespace::Search, &hash).await {
            info!(query = %canonical.text, "search cache HIT");
            self.cache.incr_counter(Namespace::Analytics, HIT_COUNTER, 1).await;
            if !canonical.text.is_empty() {
                self.cache.add_popular_search(&canonical.text).await;
            }
            let response = paginate(cached.results, cached.source, query, true, started);
            self.record(query, &response);
            return Ok(response);
        }
        info!(query = %canonical.text, "search cache MISS");
        self.cache.incr_counter(Namespace::Analytics, MISS_COUNTER, 1).await;

        let text = query.text_str().unwrap_or("");
        let parsed = self.processor.parse(text, query.infer_filters);
        let filters = query.filters.merged_with(&parsed.implicit);

        let (candidates, source) = self.candidates(&parsed, &filters).await?;
        let ranker = Ranker::new(self.processor.rules(), &parsed, &filters);
        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|lead| ranker.rank(lead))
            .filter(|hit| parsed.is_empty() || hit.relevance_score > 0.0)
            .collect();
        sort_hits(&mut hits, query.sort_by);
        hits.truncate(self.max_results);

        let entry = CachedSearch { query: canonical, results: hits, source, cached_at: OffsetDateTime::now_utc() };
        self.cache.set(Namespace::Search, &hash, &entry, None).await;
        if !entry.query.text.is_empty() {
            self.cache.add_popular_search(&entry.query.text).await;
        }

        let response = paginate(entry.results, source, query, false, started);
        info!(
            results = response.results.len(),
            total = response.total_hits,
            source = ?source,
            seconds = response.took_s,
            "search completed"
        );
        self.record(query, &response);
        Ok(response)
    }

    /// Candidate rows satisfying `filters`: inverted-index hits when the
    /// index yields any, otherwise full-text matches; every row when there is
    /// no text.
    async fn candidates(&self, parsed: &ParsedQuery, filters: &LeadFilter) -> Result<(Vec<Lead>, ResultSource)> {
        if parsed.is_empty() {
            return Ok((self.store.find(filters, usize::MAX).await?, ResultSource::Filter));
        }

        let tokens = parsed.index_tokens(self.processor.rules());
        let ids = self.indexer.search_leads_by_tokens(&tokens, self.max_results).await;
        if !ids.is_empty() {
            // rows for dangling ids are gone and drop out here
            let leads: Vec<Lead> = self.store.get_many(&ids).await?.into_iter().filter(|l| filters.matches(l)).collect();
            if !leads.is_empty() {
                debug!(candidates = leads.len(), "candidates from inverted index");
                return Ok((leads, ResultSource::Index));
            }
        }

        let mut query_lexemes: Vec<String> = parsed.terms.iter().flat_map(|t| lexemes(t)).collect();
        for phrase in &parsed.phrases {
            query_lexemes.extend(lexemes(phrase));
        }
        query_lexemes.sort();
        query_lexemes.dedup();
        let leads = self.store.full_text(&query_lexemes, filters, usize::MAX).await?;
        debug!(candidates = leads.len(), "candidates from full-text search");
        Ok((leads, ResultSource::FullText))
    }

    fn record(&self, query: &SearchQuery, response: &SearchResponse) {
        self.analytics.record_search(&SearchEvent {
            query_text: query.text_str().map(str::to_string),
            filters: query.filters.clone(),
            results_count: response.results.len(),
            response_time_ms: response.took_s * 1000.0,
            cache_hit: response.cache_hit,
            source: response.source,
        });
    }

    /// Autocomplete: popular searches with the prefix, then company names and
    /// industries. Inputs shorter than two characters get nothing.
    pub async fn get_search_suggestions(&self, partial: &str, limit: usize) -> Result<Vec<String>> {
        let prefix = partial.trim().to_lowercase();
        if prefix.chars().count() < MIN_SUGGESTION_CHARS || limit == 0 {
            return Ok(Vec::new());
        }
        if let Some(mut cached) = self.cache.get::<Vec<String>>(Namespace::Suggestions, &prefix).await {
            cached.truncate(limit);
            return Ok(cached);
        }

        let mut suggestions: Vec<String> = self
            .cache
            .popular_searches(POPULAR_SCAN)
            .await
            .into_iter()
            .filter(|s| s.to_lowercase().starts_with(&prefix))
            .take(limit)
            .collect();
        if suggestions.len() < limit {
            for name in self.store.suggest(&prefix, limit).await? {
                if suggestions.len() >= limit {
                    break;
                }
                if !suggestions.contains(&name) {
                    suggestions.push(name);
                }
            }
        }
        self.cache.set(Namespace::Suggestions, &prefix, &suggestions, None).await;
        Ok(suggestions)
    }

    pub async fn get_search_stats(&self) -> Result<SearchStats> {
        Ok(SearchStats {
            indexing_status: self.indexer.get_indexing_status().await?,
            popular_searches: self.cache.popular_searches(10).await,
            cache_health: self.cache.health_check().await,
            cache_hits: self.cache.counter(Namespace::Analytics, HIT_COUNTER).await,
            cache_misses: self.cache.counter(Namespace::Analytics, MISS_COUNTER).await,
            last_updated: OffsetDateTime::now_utc(),
        })
    }

    /// Drop every cached result list; returns how many were removed.
    pub async fn invalidate_search_cache(&self) -> u64 {
        let removed = self.cache.invalidate_namespace(Namespace::Search).await;
        info!(removed, "search cache invalidated");
        removed
    }
}

fn paginate(results: Vec<SearchHit>, source: ResultSource, query: &SearchQuery, cache_hit: bool, started: Instant) -> SearchResponse {
    let total_hits = results.len();
    let page = results.into_iter().skip(query.offset).take(query.limit).collect();
    SearchResponse {
        results: page,
        total_hits,
        offset: query.offset,
        limit: query.limit,
        cache_hit,
        source,
        took_s: started.elapsed().as_secs_f64(),
    }
}
