//! The lead store: system of record for lead rows.

use crate::{Error, Lead, LeadId, LeadUpdate, NewLead, SearchVector, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Relational predicate over lead rows. Text fields match case-insensitively
/// as substrings; every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadFilter {
    pub industry: Option<String>,
    pub location: Option<String>,
    /// Matched against the lead's `employees` band.
    pub company_size: Option<String>,
    /// Matched against the lead's `revenue` band.
    pub revenue_range: Option<String>,
    /// Exact, case-insensitive.
    pub status: Option<String>,
    pub min_score: Option<i32>,
    pub max_score: Option<i32>,
    /// Each keyword must appear in the company, description, industry or
    /// keyword list.
    pub keywords: Vec<String>,
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.map_or(false, |h| h.to_lowercase().contains(&needle.trim().to_lowercase()))
}

impl LeadFilter {
    pub fn validate(&self) -> Result<(), Error> {
        if let (Some(min), Some(max)) = (self.min_score, self.max_score) {
            if min > max {
                return Err(Error::InvalidInput(format!("min_score {min} exceeds max_score {max}")));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == LeadFilter::default()
    }

    pub fn matches(&self, lead: &Lead) -> bool {
        let text = |wanted: &Option<String>, field: Option<&str>| {
            wanted.as_deref().map_or(true, |w| contains_ci(field, w))
        };
        text(&self.industry, lead.industry.as_deref())
            && text(&self.location, lead.location.as_deref())
            && text(&self.company_size, lead.employees.as_deref())
            && text(&self.revenue_range, lead.revenue.as_deref())
            && self.status.as_deref().map_or(true, |s| s.trim().eq_ignore_ascii_case(&lead.status))
            && self.min_score.map_or(true, |min| lead.score >= min)
            && self.max_score.map_or(true, |max| lead.score <= max)
            && self.keywords.iter().all(|kw| {
                contains_ci(Some(&lead.company), kw)
                    || contains_ci(lead.description.as_deref(), kw)
                    || contains_ci(lead.industry.as_deref(), kw)
                    || lead.keywords.iter().any(|k| contains_ci(Some(k), kw))
            })
    }

    /// Fill unset fields from `other`; fields already set here win.
    pub fn merged_with(&self, other: &LeadFilter) -> LeadFilter {
        LeadFilter {
            industry: self.industry.clone().or_else(|| other.industry.clone()),
            location: self.location.clone().or_else(|| other.location.clone()),
            company_size: self.company_size.clone().or_else(|| other.company_size.clone()),
            revenue_range: self.revenue_range.clone().or_else(|| other.revenue_range.clone()),
            status: self.status.clone().or_else(|| other.status.clone()),
            min_score: self.min_score.or(other.min_score),
            max_score: self.max_score.or(other.max_score),
            keywords: if self.keywords.is_empty() { other.keywords.clone() } else { self.keywords.clone() },
        }
    }
}

/// Narrow interface to the relational store, as used by the indexer, the
/// search engine and the invalidation coordinator.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert(&self, lead: NewLead) -> Result<Lead, StoreError>;

    async fn get(&self, id: LeadId) -> Result<Option<Lead>, StoreError>;

    /// Rows for `ids` in the given order; unknown ids are skipped.
    async fn get_many(&self, ids: &[LeadId]) -> Result<Vec<Lead>, StoreError>;

    /// Apply `update` and bump `updated_at`; `None` if the lead is unknown.
    async fn update(&self, id: LeadId, update: LeadUpdate) -> Result<Option<Lead>, StoreError>;

    async fn delete(&self, id: LeadId) -> Result<bool, StoreError>;

    /// Rows matching `filter`, id ascending.
    async fn find(&self, filter: &LeadFilter, limit: usize) -> Result<Vec<Lead>, StoreError>;

    /// Rows matching `filter` whose search vector shares at least one lexeme
    /// with `lexemes`. Rows never indexed are matched on live lexemes.
    async fn full_text(&self, lexemes: &[String], filter: &LeadFilter, limit: usize) -> Result<Vec<Lead>, StoreError>;

    /// Up to `limit` rows needing indexing with id greater than `after`, id
    /// ascending.
    async fn pending_index(&self, after: Option<LeadId>, limit: usize) -> Result<Vec<Lead>, StoreError>;

    /// Write the indexing-derived fields without touching `updated_at`.
    /// Returns false if the lead no longer exists.
    async fn set_index_fields(&self, id: LeadId, vector: SearchVector, indexed_at: OffsetDateTime) -> Result<bool, StoreError>;

    /// Clear `indexed_at` on every row; returns the number of rows touched.
    async fn clear_indexed(&self) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn count_indexed(&self) -> Result<u64, StoreError>;

    async fn count_pending(&self) -> Result<u64, StoreError>;

    /// Distinct company names, then industries, starting with `prefix`.
    async fn suggest(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn lead() -> Lead {
        NewLead {
            company: "TechCorp Solutions".into(),
            description: Some("Cloud ERP for retailers".into()),
            industry: Some("Tecnologia".into()),
            location: Some("São Paulo, SP".into()),
            employees: Some("51-200".into()),
            keywords: vec!["erp".into()],
            score: 85,
            ..Default::default()
        }
        .into_lead(1, datetime!(2024-01-01 0:00 UTC))
    }

    #[test]
    fn filter_matching() {
        let l = lead();
        assert!(LeadFilter::default().matches(&l));
        assert!(LeadFilter { industry: Some("tecno".into()), ..Default::default() }.matches(&l));
        assert!(LeadFilter { location: Some("são paulo".into()), ..Default::default() }.matches(&l));
        assert!(LeadFilter { status: Some("novo".into()), ..Default::default() }.matches(&l));
        assert!(!LeadFilter { min_score: Some(90), ..Default::default() }.matches(&l));
        assert!(LeadFilter { min_score: Some(80), max_score: Some(85), ..Default::default() }.matches(&l));
        assert!(LeadFilter { keywords: vec!["cloud".into(), "ERP".into()], ..Default::default() }.matches(&l));
        assert!(!LeadFilter { keywords: vec!["banking".into()], ..Default::default() }.matches(&l));
        assert!(!LeadFilter { company_size: Some("1-10".into()), ..Default::default() }.matches(&l));
    }

    #[test]
    fn inverted_score_range_is_rejected() {
        let f = LeadFilter { min_score: Some(50), max_score: Some(10), ..Default::default() };
        assert!(matches!(f.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn explicit_fields_win_when_merging() {
        let explicit = LeadFilter { industry: Some("Saúde".into()), ..Default::default() };
        let implicit = LeadFilter {
            industry: Some("Tecnologia".into()),
            location: Some("Salvador".into()),
            ..Default::default()
        };
        let merged = explicit.merged_with(&implicit);
        assert_eq!(merged.industry.as_deref(), Some("Saúde"));
        assert_eq!(merged.location.as_deref(), Some("Salvador"));
    }
}
