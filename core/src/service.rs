//! Lead writes with their cache and index side effects.
//!
//! Every create/update reindexes the lead before returning, rewrites its
//! `lead:<id>` snapshot and drops every cached search result, since any of
//! them may now include or exclude the lead.

use crate::cache::{CacheStore, Namespace};
use crate::indexer::{IndexedLead, LeadIndexer};
use crate::store::LeadStore;
use crate::{Error, Lead, LeadId, LeadUpdate, NewLead, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of ingesting one batch of scraped leads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: u64,
    pub created: u64,
    pub indexed: u64,
    pub rejected: u64,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct LeadService {
    store: Arc<dyn LeadStore>,
    cache: CacheStore,
    indexer: LeadIndexer,
}

fn check(lead: &NewLead) -> Result<()> {
    if lead.company.trim().is_empty() {
        return Err(Error::InvalidInput("company must not be empty".into()));
    }
    Ok(())
}

impl LeadService {
    pub fn new(store: Arc<dyn LeadStore>, cache: CacheStore, indexer: LeadIndexer) -> Self {
        Self { store, cache, indexer }
    }

    pub async fn create_lead(&self, lead: NewLead) -> Result<Lead> {
        check(&lead)?;
        let lead = self.store.insert(lead).await?;
        info!(lead_id = lead.id, company = %lead.company, "lead created");
        self.reindex(&lead).await;
        self.invalidate_searches().await;
        self.current(lead).await
    }

    pub async fn update_lead(&self, id: LeadId, update: LeadUpdate) -> Result<Lead> {
        if matches!(&update.company, Some(c) if c.trim().is_empty()) {
            return Err(Error::InvalidInput("company must not be empty".into()));
        }
        let lead = self.store.update(id, update).await?.ok_or(Error::NotFound(id))?;
        info!(lead_id = id, "lead updated");
        self.reindex(&lead).await;
        self.invalidate_searches().await;
        self.current(lead).await
    }

    pub async fn delete_lead(&self, id: LeadId) -> Result<()> {
        if !self.store.delete(id).await? {
            return Err(Error::NotFound(id));
        }
        info!(lead_id = id, "lead deleted");
        self.indexer.remove_lead_from_index(id).await;
        self.invalidate_searches().await;
        Ok(())
    }

    /// Cache-aside read of one lead.
    pub async fn get_lead(&self, id: LeadId) -> Result<Lead> {
        let store = &self.store;
        let rules = self.indexer.rules();
        let entry: IndexedLead = self
            .cache
            .cache_aside(Namespace::Lead, &id.to_string(), None, || async move {
                let lead = store.get(id).await?.ok_or(Error::NotFound(id))?;
                Ok::<_, Error>(IndexedLead::new(lead, rules))
            })
            .await?;
        Ok(entry.lead)
    }

    /// Store and index a batch of scraped leads. Rows without a company are
    /// rejected; search caches are dropped once, after the whole batch.
    pub async fn ingest_scraped(&self, leads: Vec<NewLead>) -> Result<IngestReport> {
        let mut report = IngestReport { received: leads.len() as u64, ..Default::default() };
        for (n, lead) in leads.into_iter().enumerate() {
            if let Err(e) = check(&lead) {
                report.rejected += 1;
                report.errors.push(format!("row {n}: {e}"));
                continue;
            }
            let lead = self.store.insert(lead).await?;
            report.created += 1;
            if self.indexer.index_lead(&lead).await {
                report.indexed += 1;
            } else {
                report.errors.push(format!("lead {}: indexing failed", lead.id));
            }
        }
        self.invalidate_searches().await;
        info!(
            received = report.received,
            created = report.created,
            indexed = report.indexed,
            rejected = report.rejected,
            "scraped leads ingested"
        );
        Ok(report)
    }

    async fn reindex(&self, lead: &Lead) {
        if !self.indexer.index_lead(lead).await {
            // a stale snapshot must not survive a failed reindex
            self.cache.delete(Namespace::Lead, &lead.id.to_string()).await;
            warn!(lead_id = lead.id, "reindex failed, lead left pending");
        }
    }

    async fn invalidate_searches(&self) {
        self.cache.invalidate_namespace(Namespace::Search).await;
    }

    /// The stored row after indexing, falling back to `lead` if it vanished.
    async fn current(&self, lead: Lead) -> Result<Lead> {
        Ok(self.store.get(lead.id).await?.unwrap_or(lead))
    }
}
