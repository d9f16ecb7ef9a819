use criterion::{criterion_group, criterion_main, Criterion};
use leadsearch_core::metadata::extract;
use leadsearch_core::tokenizer::{lexemes, TokenRules};
use leadsearch_core::NewLead;
use time::OffsetDateTime;

const DESCRIPTION: &str = "TechCorp Solutions builds cloud ERP software for mid-size retailers \
    across São Paulo, Rio de Janeiro and Belo Horizonte. Its platform covers inventory, \
    invoicing, e-commerce integrations and financial reporting, with a consulting arm that \
    runs migrations from legacy systems.";

fn bench_tokenize(c: &mut Criterion) {
    let rules = TokenRules::default();
    c.bench_function("lexemes_description", |b| b.iter(|| lexemes(DESCRIPTION)));
    c.bench_function("tokens_description", |b| b.iter(|| rules.tokenize(DESCRIPTION)));

    let lead = NewLead {
        company: "TechCorp Solutions".into(),
        description: Some(DESCRIPTION.into()),
        industry: Some("Tecnologia".into()),
        location: Some("São Paulo, SP".into()),
        keywords: vec!["erp".into(), "cloud".into(), "retail".into()],
        ..Default::default()
    }
    .into_lead(1, OffsetDateTime::now_utc());
    c.bench_function("extract_metadata", |b| b.iter(|| extract(&lead, &rules)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
