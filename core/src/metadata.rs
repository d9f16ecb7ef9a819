//! Lead → searchable metadata extraction. Pure; missing fields count as empty.

use crate::tokenizer::{clean_text, TokenRules};
use crate::Lead;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Keywords taken from a description at most.
pub const MAX_AUTO_KEYWORDS: usize = 10;

const INDUSTRY_KEY: &str = "industry:";
const LOCATION_KEY: &str = "location:";

lazy_static! {
    static ref CAPITALIZED: Regex = Regex::new(r"\b[A-Z][a-z]+\b").expect("valid regex");
    static ref TECHNICAL: Regex = Regex::new(r"\b\w*[0-9]\w*\b|\b[A-Z]{2,}\b").expect("valid regex");
}

/// Token sets derived from one lead. Every list is sorted and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub searchable_text: String,
    pub company_tokens: Vec<String>,
    pub industry_tokens: Vec<String>,
    pub location_tokens: Vec<String>,
    /// Explicit keywords plus those picked out of the description.
    pub keywords: Vec<String>,
    /// Index tokens of every field; each one passes the token rules.
    pub all_tokens: Vec<String>,
    /// Exact-match keys on the first industry and location token, e.g.
    /// `industry:tecnologia`.
    #[serde(default)]
    pub exact_keys: Vec<String>,
}

impl Metadata {
    /// Every inverted-index key the lead is filed under, sorted.
    pub fn index_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.all_tokens.iter().chain(&self.exact_keys).cloned().collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Normalize a caller-supplied index token: `industry:`/`location:` keys
/// keep their prefix and take the first token of the value; anything else
/// splits into plain index tokens.
pub fn query_keys(token: &str, rules: &TokenRules) -> Vec<String> {
    let lower = token.trim().to_lowercase();
    for prefix in [INDUSTRY_KEY, LOCATION_KEY] {
        if let Some(value) = lower.strip_prefix(prefix) {
            return rules.first_token(value).map(|t| format!("{prefix}{t}")).into_iter().collect();
        }
    }
    rules.tokenize(token)
}

fn field(value: &Option<String>) -> String {
    value.as_deref().map(clean_text).unwrap_or_default()
}

fn normalized_keywords(lead: &Lead) -> Vec<String> {
    lead.keywords
        .iter()
        .map(|k| clean_text(k))
        .filter(|k| !k.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Capitalized words and technical terms (containing digits, or acronyms)
/// of `text`, cleaned, at least three characters and not stopwords. Keeps
/// first-seen order, capitalized words first.
pub fn auto_keywords(text: &str, rules: &TokenRules) -> Vec<String> {
    let mut seen = BTreeSet::new();
    CAPITALIZED
        .find_iter(text)
        .chain(TECHNICAL.find_iter(text))
        .map(|m| clean_text(m.as_str()))
        .filter(|w| w.chars().count() >= 3 && !rules.is_stopword(w))
        .filter(|w| seen.insert(w.clone()))
        .take(MAX_AUTO_KEYWORDS)
        .collect()
}

/// Cleaned company, contact, description, industry, location and keywords,
/// space-joined. This is the text the full-text search vector is built from.
pub fn searchable_text(lead: &Lead) -> String {
    let keywords = normalized_keywords(lead).join(" ");
    [
        clean_text(&lead.company),
        field(&lead.contact),
        field(&lead.description),
        field(&lead.industry),
        field(&lead.location),
        keywords,
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

pub fn extract(lead: &Lead, rules: &TokenRules) -> Metadata {
    let searchable_text = searchable_text(lead);
    let company_tokens = rules.token_set(&lead.company);
    let industry = lead.industry.as_deref().unwrap_or("");
    let location = lead.location.as_deref().unwrap_or("");
    let industry_tokens = rules.token_set(industry);
    let location_tokens = rules.token_set(location);

    let mut keywords: BTreeSet<String> = normalized_keywords(lead).into_iter().collect();
    keywords.extend(auto_keywords(lead.description.as_deref().unwrap_or(""), rules));

    // keywords may be multi-word, short or stopwords; only rule-abiding
    // words reach the index
    let mut all = rules.token_set(&searchable_text);
    all.extend(company_tokens.iter().cloned());
    all.extend(industry_tokens.iter().cloned());
    all.extend(location_tokens.iter().cloned());
    for keyword in &keywords {
        all.extend(rules.token_set(keyword));
    }

    let exact_keys = [(INDUSTRY_KEY, industry), (LOCATION_KEY, location)]
        .into_iter()
        .filter_map(|(prefix, value)| rules.first_token(value).map(|t| format!("{prefix}{t}")))
        .collect();

    Metadata {
        searchable_text,
        company_tokens: company_tokens.into_iter().collect(),
        industry_tokens: industry_tokens.into_iter().collect(),
        location_tokens: location_tokens.into_iter().collect(),
        keywords: keywords.into_iter().collect(),
        all_tokens: all.into_iter().collect(),
        exact_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewLead;
    use time::macros::datetime;

    fn sample() -> Lead {
        NewLead {
            company: "TechCorp Solutions".into(),
            contact: Some("John Doe".into()),
            description: Some("Leading SaaS provider using Python".into()),
            industry: Some("Technology".into()),
            location: Some("São Paulo".into()),
            keywords: vec!["SaaS".into(), "python".into(), "saas".into()],
            ..Default::default()
        }
        .into_lead(1, datetime!(2024-01-01 0:00 UTC))
    }

    #[test]
    fn extracts_all_partitions() {
        let meta = extract(&sample(), &TokenRules::default());
        assert!(meta.searchable_text.starts_with("techcorp solutions john doe"));
        assert_eq!(meta.company_tokens, vec!["solutions", "techcorp"]);
        assert_eq!(meta.industry_tokens, vec!["technology"]);
        assert_eq!(meta.location_tokens, vec!["paulo", "são"]);
        assert_eq!(meta.keywords, vec!["leading", "python", "saas"]);
        assert_eq!(meta.exact_keys, vec!["industry:technology", "location:são"]);
        for t in ["techcorp", "john", "leading", "python", "são"] {
            assert!(meta.all_tokens.binary_search(&t.to_string()).is_ok(), "missing {t}");
        }
    }

    #[test]
    fn auto_keywords_pick_names_and_technical_terms() {
        let rules = TokenRules::default();
        let words = auto_keywords("Migrating SAP to Azure with Python3 and S3 buckets. The Team", &rules);
        assert_eq!(words, vec!["migrating", "azure", "team", "sap", "python3"]);
        let many = (0..20).map(|n| format!("Word{n}x Name")).collect::<Vec<_>>().join(" ");
        assert_eq!(auto_keywords(&many, &rules).len(), MAX_AUTO_KEYWORDS);
        assert!(auto_keywords("", &rules).is_empty());
    }

    #[test]
    fn keyword_tokens_follow_the_rules() {
        let mut lead = sample();
        lead.keywords = vec!["C".into(), "Do".into(), "Cloud Computing".into()];
        let meta = extract(&lead, &TokenRules::default());
        assert!(meta.keywords.contains(&"cloud computing".to_string()));
        for dropped in ["c", "do", "cloud computing"] {
            assert!(!meta.all_tokens.contains(&dropped.to_string()), "{dropped} indexed");
        }
        assert!(meta.all_tokens.contains(&"computing".to_string()));
    }

    #[test]
    fn query_keys_normalize_exact_keys() {
        let rules = TokenRules::default();
        assert_eq!(query_keys("Industry:Tecnologia da Informação", &rules), vec!["industry:tecnologia"]);
        assert_eq!(query_keys("location:", &rules), Vec::<String>::new());
        assert_eq!(query_keys("Cloud-ERP", &rules), vec!["cloud", "erp"]);
        assert_eq!(query_keys("the", &rules), Vec::<String>::new());
    }

    #[test]
    fn missing_fields_are_empty() {
        let lead = NewLead::new("").into_lead(2, datetime!(2024-01-01 0:00 UTC));
        let meta = extract(&lead, &TokenRules::default());
        assert_eq!(meta, Metadata::default());
    }
}
