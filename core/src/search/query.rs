//! Search queries: the request shape, its canonical (hashable) form and the
//! free-text parser.

use crate::store::LeadFilter;
use crate::tokenizer::{clean_text, TokenRules};
use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const MAX_QUERY_CHARS: usize = 512;
pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    Score,
    CreatedAt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub filters: LeadFilter,
    pub sort_by: SortBy,
    pub limit: usize,
    pub offset: usize,
    /// Derive industry, location and company-size filters from the text.
    pub infer_filters: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: None,
            filters: LeadFilter::default(),
            sort_by: SortBy::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            infer_filters: false,
        }
    }
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    /// The trimmed text, or `None` when blank.
    pub fn text_str(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn validate(&self, max_page_size: usize) -> Result<()> {
        if self.limit == 0 || self.limit > max_page_size {
            return Err(Error::InvalidInput(format!("limit must be between 1 and {max_page_size}, got {}", self.limit)));
        }
        if let Some(text) = &self.text {
            let chars = text.chars().count();
            if chars > MAX_QUERY_CHARS {
                return Err(Error::InvalidInput(format!("query text has {chars} characters, max is {MAX_QUERY_CHARS}")));
            }
        }
        self.filters.validate()
    }

    /// Canonical form used as the result-cache key. Pagination is excluded:
    /// the full ranked list is cached and paged on read.
    pub fn canonical(&self) -> CanonicalQuery {
        let text = self
            .text_str()
            .map(|t| t.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        CanonicalQuery {
            text,
            filters: canonical_filters(&self.filters),
            sort_by: self.sort_by,
            infer_filters: self.infer_filters,
        }
    }
}

/// Set filter fields only, keyed in sorted order, with text values trimmed
/// and lowercased and keyword lists sorted.
fn canonical_filters(filters: &LeadFilter) -> BTreeMap<String, Value> {
    let Ok(Value::Object(fields)) = serde_json::to_value(filters) else {
        return BTreeMap::new();
    };
    fields
        .into_iter()
        .filter_map(|(name, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => Value::String(s.trim().to_lowercase()),
                Value::Array(items) if items.is_empty() => return None,
                Value::Array(items) => {
                    let mut words: Vec<String> = items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| s.trim().to_lowercase())
                        .collect();
                    words.sort();
                    words.dedup();
                    Value::from(words)
                }
                other => other,
            };
            Some((name, value))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalQuery {
    pub text: String,
    pub filters: BTreeMap<String, Value>,
    pub sort_by: SortBy,
    pub infer_filters: bool,
}

impl CanonicalQuery {
    /// Hex SHA-256 of the canonical JSON encoding; stable across restarts.
    pub fn hash(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

/// Free text broken into index terms, quoted phrases and inferred filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub terms: Vec<String>,
    pub phrases: Vec<String>,
    pub implicit: LeadFilter,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.phrases.is_empty()
    }

    /// Terms plus the words of every phrase, for the inverted index lookup.
    pub fn index_tokens(&self, rules: &TokenRules) -> Vec<String> {
        let mut tokens = self.terms.clone();
        for phrase in &self.phrases {
            tokens.extend(rules.tokenize(phrase));
        }
        tokens.sort();
        tokens.dedup();
        tokens
    }
}

lazy_static! {
    static ref PHRASE: Regex = Regex::new(r#""([^"]*)""#).expect("valid regex");
    static ref INDUSTRY_PATTERNS: Vec<(Regex, &'static str)> = compile(&[
        (r"\b(tech|technology|software|it)\b", "Tecnologia"),
        (r"\b(ecommerce|e-commerce|retail|commerce)\b", "E-commerce"),
        (r"\b(finance|financial|bank|banking)\b", "Financeiro"),
        (r"\b(health|healthcare|medical)\b", "Saúde"),
        (r"\b(education|educational|school)\b", "Educação"),
        (r"\b(manufacturing|industrial)\b", "Industrial"),
    ]);
    static ref LOCATION_PATTERNS: Vec<(Regex, &'static str)> = compile(&[
        (r"\b(são paulo|sao paulo|sp)\b", "São Paulo"),
        (r"\b(rio de janeiro|rj|rio)\b", "Rio de Janeiro"),
        (r"\b(belo horizonte|bh|minas)\b", "Belo Horizonte"),
        (r"\b(brasília|brasilia|df)\b", "Brasília"),
        (r"\b(salvador|bahia|ba)\b", "Salvador"),
    ]);
    static ref SIZE_PATTERNS: Vec<(Regex, &'static str)> = compile(&[
        (r"\b(startup|small|pequena)\b", "1-10"),
        (r"\b(medium|média|mid-size)\b", "11-50"),
        (r"\b(large|grande|big)\b", "51-200"),
        (r"\b(enterprise|corporation|multinational)\b", "200+"),
    ]);
}

fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .filter_map(|(p, v)| Regex::new(p).ok().map(|re| (re, *v)))
        .collect()
}

fn first_match(patterns: &[(Regex, &'static str)], text: &str) -> Option<String> {
    patterns.iter().find(|(re, _)| re.is_match(text)).map(|(_, v)| v.to_string())
}

#[derive(Debug, Clone)]
pub struct QueryProcessor {
    rules: Arc<TokenRules>,
}

impl QueryProcessor {
    pub fn new(rules: TokenRules) -> Self {
        Self { rules: Arc::new(rules) }
    }

    pub fn rules(&self) -> &TokenRules { &self.rules }

    pub fn parse(&self, text: &str, infer_filters: bool) -> ParsedQuery {
        let lowered = text.to_lowercase();
        let phrases: Vec<String> = PHRASE
            .captures_iter(&lowered)
            .map(|c| clean_text(&c[1]))
            .filter(|p| !p.is_empty())
            .collect();
        let rest = PHRASE.replace_all(&lowered, " ");
        let terms = self.rules.tokenize(&rest);

        let implicit = if infer_filters {
            let cleaned = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
            LeadFilter {
                industry: first_match(&INDUSTRY_PATTERNS, &cleaned),
                location: first_match(&LOCATION_PATTERNS, &cleaned),
                company_size: first_match(&SIZE_PATTERNS, &cleaned),
                ..LeadFilter::default()
            }
        } else {
            LeadFilter::default()
        };
        ParsedQuery { terms, phrases, implicit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrases_are_split_from_terms() {
        let qp = QueryProcessor::new(TokenRules::default());
        let parsed = qp.parse(r#"Cloud "ERP Suite" for the retail"#, false);
        assert_eq!(parsed.phrases, vec!["erp suite"]);
        assert_eq!(parsed.terms, vec!["cloud", "retail"]);
        assert_eq!(parsed.index_tokens(qp.rules()), vec!["cloud", "erp", "retail", "suite"]);
        assert_eq!(parsed.implicit, LeadFilter::default());
    }

    #[test]
    fn implicit_filters_only_when_asked() {
        let qp = QueryProcessor::new(TokenRules::default());
        let parsed = qp.parse("software startup in São Paulo", true);
        assert_eq!(parsed.implicit.industry.as_deref(), Some("Tecnologia"));
        assert_eq!(parsed.implicit.location.as_deref(), Some("São Paulo"));
        assert_eq!(parsed.implicit.company_size.as_deref(), Some("1-10"));
    }

    #[test]
    fn hash_ignores_case_spacing_and_pagination() {
        let a = SearchQuery {
            text: Some("  TechCorp   Solutions ".into()),
            filters: LeadFilter { keywords: vec!["b".into(), "A".into()], ..Default::default() },
            limit: 5,
            ..Default::default()
        };
        let b = SearchQuery {
            text: Some("techcorp solutions".into()),
            filters: LeadFilter { keywords: vec!["a".into(), "b".into()], ..Default::default() },
            offset: 40,
            ..Default::default()
        };
        assert_eq!(a.canonical().hash(), b.canonical().hash());

        let c = SearchQuery { sort_by: SortBy::Score, ..b.clone() };
        assert_ne!(b.canonical().hash(), c.canonical().hash());
        assert_eq!(a.canonical().hash().len(), 64);
    }

    #[test]
    fn validation() {
        assert!(SearchQuery::default().validate(100).is_ok());
        assert!(SearchQuery { limit: 0, ..Default::default() }.validate(100).is_err());
        assert!(SearchQuery { limit: 101, ..Default::default() }.validate(100).is_err());
        assert!(SearchQuery::text("x".repeat(MAX_QUERY_CHARS + 1)).validate(100).is_err());
    }
}
