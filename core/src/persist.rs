//! Sled-backed lead store. Rows are bincode-encoded and keyed by big-endian
//! id, so tree order is id order.

use crate::metadata::searchable_text;
use crate::store::{LeadFilter, LeadStore};
use crate::tokenizer::lexemes;
use crate::{Lead, LeadId, LeadUpdate, NewLead, SearchVector, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use time::OffsetDateTime;

const LEADS_TREE: &str = "leads";

pub struct SledLeadStore {
    db: sled::Db,
    leads: sled::Tree,
}

fn key(id: LeadId) -> [u8; 8] {
    id.to_be_bytes()
}

/// On-disk form of a [`Lead`]. Timestamps use `time`'s native serde, which
/// bincode can decode; the rfc3339 form on `Lead` is for JSON only.
#[derive(Serialize, Deserialize)]
struct Row {
    id: LeadId,
    company: String,
    contact: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    website: Option<String>,
    industry: Option<String>,
    location: Option<String>,
    revenue: Option<String>,
    employees: Option<String>,
    description: Option<String>,
    keywords: Vec<String>,
    score: i32,
    status: String,
    search_vector: Option<SearchVector>,
    indexed_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<&Lead> for Row {
    fn from(l: &Lead) -> Self {
        Row {
            id: l.id,
            company: l.company.clone(),
            contact: l.contact.clone(),
            email: l.email.clone(),
            phone: l.phone.clone(),
            website: l.website.clone(),
            industry: l.industry.clone(),
            location: l.location.clone(),
            revenue: l.revenue.clone(),
            employees: l.employees.clone(),
            description: l.description.clone(),
            keywords: l.keywords.clone(),
            score: l.score,
            status: l.status.clone(),
            search_vector: l.search_vector.clone(),
            indexed_at: l.indexed_at,
            created_at: l.created_at,
            updated_at: l.updated_at,
        }
    }
}

impl From<Row> for Lead {
    fn from(r: Row) -> Self {
        Lead {
            id: r.id,
            company: r.company,
            contact: r.contact,
            email: r.email,
            phone: r.phone,
            website: r.website,
            industry: r.industry,
            location: r.location,
            revenue: r.revenue,
            employees: r.employees,
            description: r.description,
            keywords: r.keywords,
            score: r.score,
            status: r.status,
            search_vector: r.search_vector,
            indexed_at: r.indexed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn decode(bytes: &[u8]) -> Result<Lead, StoreError> {
    let row: Row = bincode::deserialize(bytes)?;
    Ok(row.into())
}

fn encode(lead: &Lead) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(&Row::from(lead))?)
}

impl SledLeadStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway store removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let leads = db.open_tree(LEADS_TREE)?;
        Ok(Self { db, leads })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn rows(&self) -> impl Iterator<Item = Result<Lead, StoreError>> + '_ {
        self.leads.iter().values().map(|v| decode(&v?))
    }

    fn rows_after(&self, after: Option<LeadId>) -> impl Iterator<Item = Result<Lead, StoreError>> + '_ {
        let start = after.map_or(0, |id| id.saturating_add(1));
        self.leads.range(key(start)..).values().map(|v| decode(&v?))
    }

    /// Read-modify-write one row with compare-and-swap; `None` if absent.
    fn modify<F>(&self, id: LeadId, mut f: F) -> Result<Option<Lead>, StoreError>
    where
        F: FnMut(&mut Lead),
    {
        let k = key(id);
        loop {
            let Some(current) = self.leads.get(k)? else { return Ok(None) };
            let mut lead = decode(&current)?;
            f(&mut lead);
            let next = encode(&lead)?;
            if self.leads.compare_and_swap(k, Some(current), Some(next))?.is_ok() {
                return Ok(Some(lead));
            }
        }
    }

    fn collect(&self, limit: usize, mut keep: impl FnMut(&Lead) -> bool) -> Result<Vec<Lead>, StoreError> {
        let mut out = Vec::new();
        for row in self.rows() {
            if out.len() >= limit {
                break;
            }
            let lead = row?;
            if keep(&lead) {
                out.push(lead);
            }
        }
        Ok(out)
    }

    fn count_where(&self, mut pred: impl FnMut(&Lead) -> bool) -> Result<u64, StoreError> {
        let mut n = 0;
        for row in self.rows() {
            if pred(&row?) {
                n += 1;
            }
        }
        Ok(n)
    }
}

#[async_trait]
impl LeadStore for SledLeadStore {
    async fn insert(&self, lead: NewLead) -> Result<Lead, StoreError> {
        let id = self.db.generate_id()? + 1;
        let lead = lead.into_lead(id, OffsetDateTime::now_utc());
        self.leads.insert(key(id), encode(&lead)?)?;
        Ok(lead)
    }

    async fn get(&self, id: LeadId) -> Result<Option<Lead>, StoreError> {
        self.leads.get(key(id))?.map(|v| decode(&v)).transpose()
    }

    async fn get_many(&self, ids: &[LeadId]) -> Result<Vec<Lead>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(v) = self.leads.get(key(id))? {
                out.push(decode(&v)?);
            }
        }
        Ok(out)
    }

    async fn update(&self, id: LeadId, update: LeadUpdate) -> Result<Option<Lead>, StoreError> {
        let now = OffsetDateTime::now_utc();
        self.modify(id, |lead| update.apply(lead, now))
    }

    async fn delete(&self, id: LeadId) -> Result<bool, StoreError> {
        Ok(self.leads.remove(key(id))?.is_some())
    }

    async fn find(&self, filter: &LeadFilter, limit: usize) -> Result<Vec<Lead>, StoreError> {
        self.collect(limit, |lead| filter.matches(lead))
    }

    async fn full_text(&self, query: &[String], filter: &LeadFilter, limit: usize) -> Result<Vec<Lead>, StoreError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&str> = query.iter().map(String::as_str).collect();
        self.collect(limit, |lead| {
            if !filter.matches(lead) {
                return false;
            }
            match &lead.search_vector {
                Some(vector) => vector.iter().any(|lx| wanted.contains(lx.as_str())),
                None => lexemes(&searchable_text(lead)).iter().any(|lx| wanted.contains(lx.as_str())),
            }
        })
    }

    async fn pending_index(&self, after: Option<LeadId>, limit: usize) -> Result<Vec<Lead>, StoreError> {
        let mut out = Vec::new();
        for row in self.rows_after(after) {
            if out.len() >= limit {
                break;
            }
            let lead = row?;
            if lead.needs_indexing() {
                out.push(lead);
            }
        }
        Ok(out)
    }

    async fn set_index_fields(&self, id: LeadId, vector: SearchVector, indexed_at: OffsetDateTime) -> Result<bool, StoreError> {
        let written = self.modify(id, |lead| {
            lead.search_vector = Some(vector.clone());
            lead.indexed_at = Some(indexed_at);
        })?;
        Ok(written.is_some())
    }

    async fn clear_indexed(&self) -> Result<u64, StoreError> {
        let mut ids = Vec::new();
        for k in self.leads.iter().keys() {
            let k = k?;
            let bytes: [u8; 8] = k.as_ref().try_into().map_err(|_| StoreError::CorruptKey(k.to_vec()))?;
            ids.push(LeadId::from_be_bytes(bytes));
        }
        let mut touched = 0;
        for id in ids {
            if self.modify(id, |lead| lead.indexed_at = None)?.is_some() {
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.leads.len() as u64)
    }

    async fn count_indexed(&self) -> Result<u64, StoreError> {
        self.count_where(|lead| lead.indexed_at.is_some())
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        self.count_where(Lead::needs_indexing)
    }

    async fn suggest(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.trim().to_lowercase();
        let mut companies = Vec::new();
        let mut industries = Vec::new();
        for row in self.rows() {
            let lead = row?;
            if lead.company.to_lowercase().starts_with(&prefix) {
                companies.push(lead.company.clone());
            }
            if let Some(industry) = lead.industry.as_ref().filter(|i| i.to_lowercase().starts_with(&prefix)) {
                industries.push(industry.clone());
            }
        }
        let mut seen = HashSet::new();
        Ok(companies
            .into_iter()
            .chain(industries)
            .filter(|s| seen.insert(s.clone()))
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SledLeadStore {
        SledLeadStore::temporary().expect("temporary sled")
    }

    #[tokio::test]
    async fn insert_get_update_delete() {
        let s = store();
        let lead = s.insert(NewLead::new("Acme")).await.unwrap();
        assert!(lead.id >= 1);
        assert_eq!(s.get(lead.id).await.unwrap().as_ref(), Some(&lead));

        let updated = s
            .update(lead.id, LeadUpdate { company: Some("Acme Renamed".into()), ..Default::default() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.company, "Acme Renamed");
        assert!(updated.updated_at >= lead.updated_at);

        assert!(s.delete(lead.id).await.unwrap());
        assert!(!s.delete(lead.id).await.unwrap());
        assert_eq!(s.get(lead.id).await.unwrap(), None);
        assert_eq!(s.update(lead.id, LeadUpdate::default()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pending_rows_page_by_id() {
        let s = store();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            ids.push(s.insert(NewLead::new(name)).await.unwrap().id);
        }
        s.set_index_fields(ids[1], vec!["b".into()], OffsetDateTime::now_utc()).await.unwrap();

        let first = s.pending_index(None, 1).await.unwrap();
        assert_eq!(first.iter().map(|l| l.id).collect::<Vec<_>>(), vec![ids[0]]);
        let rest = s.pending_index(Some(ids[0]), 10).await.unwrap();
        assert_eq!(rest.iter().map(|l| l.id).collect::<Vec<_>>(), vec![ids[2]]);

        assert_eq!(s.count().await.unwrap(), 3);
        assert_eq!(s.count_indexed().await.unwrap(), 1);
        assert_eq!(s.count_pending().await.unwrap(), 2);
        assert_eq!(s.clear_indexed().await.unwrap(), 3);
        assert_eq!(s.count_indexed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn indexed_rows_read_back_intact() {
        let s = store();
        let lead = s.insert(NewLead::new("Acme")).await.unwrap();
        let at = OffsetDateTime::now_utc();
        assert!(s.set_index_fields(lead.id, lexemes("acme"), at).await.unwrap());

        let row = s.get(lead.id).await.unwrap().unwrap();
        assert_eq!(row.indexed_at, Some(at));
        assert_eq!(row.created_at, lead.created_at);
        assert_eq!(row.search_vector, Some(lexemes("acme")));
        assert!(!row.needs_indexing());
        assert_eq!(s.get_many(&[lead.id]).await.unwrap(), vec![row.clone()]);
        assert_eq!(s.find(&LeadFilter::default(), 10).await.unwrap(), vec![row]);
        assert_eq!(s.count_indexed().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn full_text_matches_stored_or_live_lexemes() {
        let s = store();
        let mut runner = NewLead::new("Running Club");
        runner.description = Some("Marathon training".into());
        let runner = s.insert(runner).await.unwrap();
        let other = s.insert(NewLead::new("Bakery")).await.unwrap();

        let hits = s.full_text(&lexemes("running"), &LeadFilter::default(), 10).await.unwrap();
        assert_eq!(hits.iter().map(|l| l.id).collect::<Vec<_>>(), vec![runner.id]);

        s.set_index_fields(other.id, lexemes("bakery bread"), OffsetDateTime::now_utc()).await.unwrap();
        let hits = s.full_text(&lexemes("bread"), &LeadFilter::default(), 10).await.unwrap();
        assert_eq!(hits.iter().map(|l| l.id).collect::<Vec<_>>(), vec![other.id]);
    }

    #[tokio::test]
    async fn suggestions_prefer_companies() {
        let s = store();
        let mut a = NewLead::new("Tecno Labs");
        a.industry = Some("Tecnologia".into());
        s.insert(a).await.unwrap();
        let mut b = NewLead::new("Other");
        b.industry = Some("Tecnologia".into());
        s.insert(b).await.unwrap();
        assert_eq!(s.suggest("tec", 10).await.unwrap(), vec!["Tecno Labs", "Tecnologia"]);
        assert_eq!(s.suggest("tec", 1).await.unwrap(), vec!["Tecno Labs"]);
    }
}
