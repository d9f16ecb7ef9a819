use super::query::{ParsedQuery, SortBy};
use crate::metadata::extract;
use crate::store::LeadFilter;
use crate::tokenizer::{clean_text, lexemes, stem, TokenRules};
use crate::Lead;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub lead: Lead,
    /// Fraction of query terms and phrases the lead matches, in `0..=1`.
    /// Always 0 for queries without text.
    pub relevance_score: f32,
    pub match_reasons: Vec<String>,
    /// Field name → field text with matches wrapped in `<mark>`.
    pub highlighted_fields: BTreeMap<String, String>,
}

fn has_word(text: &str, word: &str) -> bool {
    text.split(' ').any(|w| w == word)
}

pub struct Ranker<'a> {
    rules: &'a TokenRules,
    parsed: &'a ParsedQuery,
    filters: &'a LeadFilter,
    highlighter: Option<Regex>,
}

impl<'a> Ranker<'a> {
    pub fn new(rules: &'a TokenRules, parsed: &'a ParsedQuery, filters: &'a LeadFilter) -> Self {
        Self { rules, parsed, filters, highlighter: highlighter(parsed) }
    }

    pub fn rank(&self, lead: Lead) -> SearchHit {
        let mut reasons = Vec::new();
        let relevance = if self.parsed.is_empty() { 0.0 } else { self.text_relevance(&lead, &mut reasons) };
        self.filter_reasons(&lead, &mut reasons);
        let highlighted_fields = self.highlights(&lead);
        SearchHit { lead, relevance_score: relevance, match_reasons: reasons, highlighted_fields }
    }

    fn text_relevance(&self, lead: &Lead, reasons: &mut Vec<String>) -> f32 {
        let metadata = extract(lead, self.rules);
        let vector = match &lead.search_vector {
            Some(v) => v.clone(),
            None => lexemes(&metadata.searchable_text),
        };
        let fields = [
            ("company", clean_text(&lead.company)),
            ("description", lead.description.as_deref().map(clean_text).unwrap_or_default()),
            ("industry", lead.industry.as_deref().map(clean_text).unwrap_or_default()),
            ("contact", lead.contact.as_deref().map(clean_text).unwrap_or_default()),
            ("location", lead.location.as_deref().map(clean_text).unwrap_or_default()),
            ("keywords", metadata.keywords.join(" ")),
        ];

        let mut matched = 0usize;
        for term in &self.parsed.terms {
            if let Some((field, _)) = fields.iter().find(|(_, text)| has_word(text, term)) {
                matched += 1;
                reasons.push(format!("Term '{term}' found in {field}"));
            } else if metadata.all_tokens.binary_search(term).is_ok() || vector.binary_search(&stem(term)).is_ok() {
                matched += 1;
                reasons.push(format!("Term '{term}' matched"));
            }
        }
        for phrase in &self.parsed.phrases {
            if let Some((field, _)) = fields.iter().find(|(_, text)| text.contains(phrase.as_str())) {
                matched += 1;
                reasons.push(format!("Phrase '{phrase}' found in {field}"));
            } else if metadata.searchable_text.contains(phrase.as_str()) {
                matched += 1;
                reasons.push(format!("Phrase '{phrase}' matched"));
            }
        }
        let total = self.parsed.terms.len() + self.parsed.phrases.len();
        matched as f32 / total as f32
    }

    fn filter_reasons(&self, lead: &Lead, reasons: &mut Vec<String>) {
        if let (Some(_), Some(industry)) = (&self.filters.industry, &lead.industry) {
            reasons.push(format!("Industry match: {industry}"));
        }
        if let (Some(_), Some(location)) = (&self.filters.location, &lead.location) {
            reasons.push(format!("Location match: {location}"));
        }
        if let (Some(_), Some(size)) = (&self.filters.company_size, &lead.employees) {
            reasons.push(format!("Company size match: {size}"));
        }
    }

    fn highlights(&self, lead: &Lead) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let Some(re) = &self.highlighter else { return out };
        let fields = [
            ("company", Some(lead.company.as_str())),
            ("description", lead.description.as_deref()),
            ("industry", lead.industry.as_deref()),
        ];
        for (name, value) in fields {
            let Some(value) = value else { continue };
            if re.is_match(value) {
                out.insert(name.to_string(), re.replace_all(value, "<mark>${0}</mark>").into_owned());
            }
        }
        out
    }
}

/// Case-insensitive whole-word alternation of every phrase and term,
/// longest first so phrases win over their own words.
fn highlighter(parsed: &ParsedQuery) -> Option<Regex> {
    let mut needles: Vec<&str> = parsed.phrases.iter().chain(&parsed.terms).map(String::as_str).collect();
    if needles.is_empty() {
        return None;
    }
    needles.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = needles.iter().map(|n| regex::escape(n)).collect::<Vec<_>>().join("|");
    RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Order hits for the requested sort mode. Ties always fall back to score,
/// recency and finally id.
pub fn sort_hits(hits: &mut [SearchHit], sort_by: SortBy) {
    hits.sort_by(|a, b| {
        let relevance = b.relevance_score.total_cmp(&a.relevance_score);
        let score = b.lead.score.cmp(&a.lead.score);
        let recency = b.lead.created_at.cmp(&a.lead.created_at);
        let primary = match sort_by {
            SortBy::Relevance => relevance.then(score).then(recency),
            SortBy::Score => score.then(relevance).then(recency),
            SortBy::CreatedAt => recency.then(score),
        };
        primary.then_with(|| a.lead.id.cmp(&b.lead.id))
    });
}
