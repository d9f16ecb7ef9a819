#![allow(dead_code)]

use leadsearch_core::cache::{CacheStore, MemoryBackend};
use leadsearch_core::config::Settings;
use leadsearch_core::indexer::LeadIndexer;
use leadsearch_core::persist::SledLeadStore;
use leadsearch_core::search::SearchEngine;
use leadsearch_core::service::LeadService;
use leadsearch_core::store::LeadStore;
use leadsearch_core::{Lead, NewLead};
use std::sync::Arc;

/// A temporary sled store, an in-memory cache and every component wired
/// together with default settings.
pub struct Harness {
    pub settings: Settings,
    pub store: Arc<dyn LeadStore>,
    pub backend: Arc<MemoryBackend>,
    pub cache: CacheStore,
    pub indexer: LeadIndexer,
    pub engine: SearchEngine,
    pub leads: LeadService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store: Arc<dyn LeadStore> = Arc::new(SledLeadStore::temporary().expect("temporary sled"));
        let backend = Arc::new(MemoryBackend::new());
        let cache = CacheStore::new(backend.clone(), settings.cache.clone());
        let indexer = LeadIndexer::from_settings(store.clone(), cache.clone(), &settings);
        let engine = SearchEngine::new(store.clone(), cache.clone(), indexer.clone(), &settings);
        let leads = LeadService::new(store.clone(), cache.clone(), indexer.clone());
        Self { settings, store, backend, cache, indexer, engine, leads }
    }

    /// Insert a row straight into the store, bypassing indexing.
    pub async fn insert(&self, lead: NewLead) -> Lead {
        self.store.insert(lead).await.expect("insert lead")
    }
}

pub fn techcorp() -> NewLead {
    NewLead {
        company: "TechCorp Solutions".into(),
        contact: Some("Maria Silva".into()),
        description: Some("Cloud ERP software for retailers".into()),
        industry: Some("Tecnologia".into()),
        location: Some("São Paulo, SP".into()),
        employees: Some("51-200".into()),
        keywords: vec!["erp".into(), "cloud".into()],
        score: 85,
        ..Default::default()
    }
}

pub fn lead(company: &str, industry: &str, score: i32) -> NewLead {
    NewLead {
        company: company.into(),
        industry: Some(industry.into()),
        score,
        ..Default::default()
    }
}
