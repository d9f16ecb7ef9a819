//! Lead indexer: keeps the full-text search vector in the lead store and the
//! token → lead-id inverted index in the cache store current.

use crate::cache::{CacheHealth, CacheStore, Namespace};
use crate::config::Settings;
use crate::metadata::{extract, query_keys, Metadata};
use crate::store::LeadStore;
use crate::tokenizer::{lexemes, TokenRules};
use crate::{IndexingStats, Lead, LeadId, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

/// Batches between bulk-indexing progress lines.
const PROGRESS_EVERY: u64 = 10;

/// Snapshot cached under `lead:<id>`: the row plus the tokens it was indexed
/// under, so a later reindex or delete can drop stale memberships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedLead {
    pub lead: Lead,
    pub metadata: Metadata,
}

impl IndexedLead {
    pub fn new(lead: Lead, rules: &TokenRules) -> Self {
        let metadata = extract(&lead, rules);
        Self { lead, metadata }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub total_leads: u64,
    pub indexed_leads: u64,
    pub unindexed_leads: u64,
    /// Percentage of leads indexed at least once.
    pub indexing_coverage: f64,
    pub cache_status: CacheHealth,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

pub fn coverage(indexed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        indexed as f64 / total as f64 * 100.0
    }
}

#[derive(Clone)]
pub struct LeadIndexer {
    store: Arc<dyn LeadStore>,
    cache: CacheStore,
    rules: Arc<TokenRules>,
    batch_size: usize,
}

impl LeadIndexer {
    pub fn new(store: Arc<dyn LeadStore>, cache: CacheStore, rules: TokenRules, batch_size: usize) -> Self {
        Self { store, cache, rules: Arc::new(rules), batch_size: batch_size.max(1) }
    }

    pub fn from_settings(store: Arc<dyn LeadStore>, cache: CacheStore, settings: &Settings) -> Self {
        Self::new(store, cache, settings.token_rules(), settings.indexing_batch_size)
    }

    pub fn rules(&self) -> &TokenRules { &self.rules }

    pub fn batch_size(&self) -> usize { self.batch_size }

    /// Recompute the lead's metadata, persist its search vector and refresh
    /// its inverted-index memberships and cached snapshot.
    ///
    /// Returns false when the lead store write fails or the lead is gone.
    /// Cache failures are logged and do not fail the call.
    pub async fn index_lead(&self, lead: &Lead) -> bool {
        let metadata = extract(lead, &self.rules);
        let vector = lexemes(&metadata.searchable_text);
        let now = OffsetDateTime::now_utc();

        match self.store.set_index_fields(lead.id, vector.clone(), now).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(lead_id = lead.id, "lead disappeared before it could be indexed");
                return false;
            }
            Err(e) => {
                error!(lead_id = lead.id, error = %e, "failed to write search vector");
                return false;
            }
        }

        let mut snapshot = lead.clone();
        snapshot.search_vector = Some(vector);
        snapshot.indexed_at = Some(now);
        self.refresh_cache(&IndexedLead { lead: snapshot, metadata }).await;
        debug!(lead_id = lead.id, "lead indexed");
        true
    }

    async fn refresh_cache(&self, entry: &IndexedLead) {
        if !self.cache.is_enabled() {
            return;
        }
        let id = entry.lead.id;
        let key = id.to_string();
        let previous: Option<IndexedLead> = self.cache.get(Namespace::Lead, &key).await;
        self.cache.delete(Namespace::Lead, &key).await;

        let keys = entry.metadata.index_keys();
        for key in &keys {
            self.cache.add_to_index(key, id).await;
        }
        if let Some(previous) = previous {
            for stale in previous.metadata.index_keys().iter().filter(|k| keys.binary_search(k).is_err()) {
                self.cache.remove_from_index(stale, id).await;
            }
        }
        self.cache.set(Namespace::Lead, &key, entry, None).await;
    }

    /// Drop the lead's inverted-index memberships (as recorded in its cached
    /// snapshot) and its snapshot. Returns false if no snapshot was cached.
    pub async fn remove_lead_from_index(&self, id: LeadId) -> bool {
        let key = id.to_string();
        let Some(snapshot) = self.cache.get::<IndexedLead>(Namespace::Lead, &key).await else {
            debug!(lead_id = id, "no cached snapshot, index memberships kept until reindex");
            return false;
        };
        for key in snapshot.metadata.index_keys() {
            self.cache.remove_from_index(&key, id).await;
        }
        self.cache.delete(Namespace::Lead, &key).await;
        true
    }

    /// Index every lead that needs it, `batch_size` rows at a time.
    /// Individual failures are counted and skipped.
    pub async fn bulk_index_leads(&self, batch_size: usize) -> IndexingStats {
        let batch_size = batch_size.max(1);
        let started = Instant::now();
        let mut stats = IndexingStats::default();
        let mut cursor: Option<LeadId> = None;
        let mut batches = 0u64;

        info!(batch_size, "bulk indexing started");
        loop {
            let batch = match self.store.pending_index(cursor, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "failed to load leads pending indexing");
                    stats.errors.push(format!("loading batch after {cursor:?}: {e}"));
                    break;
                }
            };
            let Some(last) = batch.last() else { break };
            cursor = Some(last.id);

            for lead in &batch {
                if self.index_lead(lead).await {
                    stats.indexed_leads += 1;
                } else {
                    stats.failed_leads += 1;
                    stats.errors.push(format!("lead {}: indexing failed", lead.id));
                }
            }
            batches += 1;
            if batches % PROGRESS_EVERY == 0 {
                info!(batches, indexed = stats.indexed_leads, failed = stats.failed_leads, "bulk indexing progress");
            }
        }

        stats.total_leads = stats.indexed_leads + stats.failed_leads;
        stats.processing_time = started.elapsed().as_secs_f64();
        info!(
            total = stats.total_leads,
            indexed = stats.indexed_leads,
            failed = stats.failed_leads,
            seconds = stats.processing_time,
            "bulk indexing finished"
        );
        stats
    }

    /// Index an explicit set of leads regardless of their indexing state.
    /// Unknown ids count as failures.
    pub async fn index_leads(&self, ids: &[LeadId], batch_size: usize) -> IndexingStats {
        let started = Instant::now();
        let mut stats = IndexingStats::default();

        for chunk in ids.chunks(batch_size.max(1)) {
            let leads = match self.store.get_many(chunk).await {
                Ok(leads) => leads,
                Err(e) => {
                    error!(error = %e, "failed to load leads for indexing");
                    stats.failed_leads += chunk.len() as u64;
                    stats.errors.push(format!("loading leads {chunk:?}: {e}"));
                    continue;
                }
            };
            let found: HashSet<LeadId> = leads.iter().map(|l| l.id).collect();
            for missing in chunk.iter().filter(|id| !found.contains(id)) {
                stats.failed_leads += 1;
                stats.errors.push(format!("lead {missing}: not found"));
            }
            for lead in &leads {
                if self.index_lead(lead).await {
                    stats.indexed_leads += 1;
                } else {
                    stats.failed_leads += 1;
                    stats.errors.push(format!("lead {}: indexing failed", lead.id));
                }
            }
        }

        stats.total_leads = stats.indexed_leads + stats.failed_leads;
        stats.processing_time = started.elapsed().as_secs_f64();
        stats
    }

    /// Lead ids indexed under every token, best score first then id
    /// ascending. Tokens may also be exact keys such as `industry:tecnologia`.
    /// Empty when the cache store is unavailable; callers fall back to
    /// full-text search. Ids are not checked against the lead store.
    pub async fn search_leads_by_tokens(&self, tokens: &[String], limit: usize) -> Vec<LeadId> {
        let tokens: Vec<String> = tokens
            .iter()
            .flat_map(|t| query_keys(t, &self.rules))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if tokens.is_empty() || limit == 0 {
            return Vec::new();
        }
        let Some(mut ids) = self.cache.index_intersection(&tokens).await else {
            debug!(?tokens, "inverted index unavailable");
            return Vec::new();
        };

        let scores: HashMap<LeadId, i32> = match self.store.get_many(&ids).await {
            Ok(leads) => leads.into_iter().map(|l| (l.id, l.score)).collect(),
            Err(e) => {
                warn!(error = %e, "could not load scores, ordering by id");
                HashMap::new()
            }
        };
        ids.sort_by(|a, b| {
            let (sa, sb) = (scores.get(a), scores.get(b));
            sb.cmp(&sa).then_with(|| a.cmp(b))
        });
        ids.truncate(limit);
        ids
    }

    pub async fn get_indexing_status(&self) -> Result<IndexingStatus> {
        let total_leads = self.store.count().await?;
        let indexed_leads = self.store.count_indexed().await?;
        Ok(IndexingStatus {
            total_leads,
            indexed_leads,
            unindexed_leads: total_leads.saturating_sub(indexed_leads),
            indexing_coverage: coverage(indexed_leads, total_leads),
            cache_status: self.cache.health_check().await,
            last_updated: OffsetDateTime::now_utc(),
        })
    }

    /// Throw away the inverted index, mark every lead unindexed and rebuild.
    pub async fn reindex_all_leads(&self) -> Result<IndexingStats> {
        let dropped = self.cache.invalidate_namespace(Namespace::Index).await;
        let reset = self.store.clear_indexed().await?;
        info!(dropped_tokens = dropped, reset_leads = reset, "full reindex started");
        let stats = self.bulk_index_leads(self.batch_size).await;
        self.cache.invalidate_namespace(Namespace::Search).await;
        Ok(stats)
    }
}
