use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type LeadId = u64;

/// Sorted, deduplicated stemmed lexemes of a lead's searchable text.
pub type SearchVector = Vec<String>;

pub const DEFAULT_STATUS: &str = "Novo";

/// A company/contact record as stored by the lead store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub company: String,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub revenue: Option<String>,
    pub employees: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub score: i32,
    pub status: String,
    /// Full-text representation written by the indexer.
    pub search_vector: Option<SearchVector>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub indexed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Lead {
    /// True when the lead was never indexed or changed after its last indexing.
    pub fn needs_indexing(&self) -> bool {
        self.indexed_at.map_or(true, |at| at < self.updated_at)
    }
}

/// Input row for creating a lead, as produced by scrapers or the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewLead {
    pub company: String,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub revenue: Option<String>,
    pub employees: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub score: i32,
    pub status: Option<String>,
}

impl NewLead {
    pub fn new(company: impl Into<String>) -> Self {
        Self { company: company.into(), ..Self::default() }
    }

    pub fn into_lead(self, id: LeadId, now: OffsetDateTime) -> Lead {
        Lead {
            id,
            company: self.company,
            contact: self.contact,
            email: self.email,
            phone: self.phone,
            website: self.website,
            industry: self.industry,
            location: self.location,
            revenue: self.revenue,
            employees: self.employees,
            description: self.description,
            keywords: self.keywords,
            score: self.score,
            status: self.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            search_vector: None,
            indexed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadUpdate {
    pub company: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub revenue: Option<String>,
    pub employees: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub score: Option<i32>,
    pub status: Option<String>,
}

impl LeadUpdate {
    pub fn apply(&self, lead: &mut Lead, now: OffsetDateTime) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt(slot: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }
        set(&mut lead.company, &self.company);
        set_opt(&mut lead.contact, &self.contact);
        set_opt(&mut lead.email, &self.email);
        set_opt(&mut lead.phone, &self.phone);
        set_opt(&mut lead.website, &self.website);
        set_opt(&mut lead.industry, &self.industry);
        set_opt(&mut lead.location, &self.location);
        set_opt(&mut lead.revenue, &self.revenue);
        set_opt(&mut lead.employees, &self.employees);
        set_opt(&mut lead.description, &self.description);
        set(&mut lead.keywords, &self.keywords);
        set(&mut lead.score, &self.score);
        set(&mut lead.status, &self.status);
        lead.updated_at = now;
    }
}

/// Outcome of a bulk indexing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexingStats {
    pub total_leads: u64,
    pub indexed_leads: u64,
    pub failed_leads: u64,
    /// Wall-clock seconds.
    pub processing_time: f64,
    pub errors: Vec<String>,
}
