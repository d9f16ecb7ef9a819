use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use leadsearch_core::cache::{CacheStore, MemoryBackend};
use leadsearch_core::config::Settings;
use leadsearch_core::persist::SledLeadStore;
use leadsearch_core::store::LeadStore;
use serde_json::{json, Value};
use server::{build_app, AppState};
use std::sync::Arc;
use tower::ServiceExt;

const TOKEN: &str = "secret";

fn app() -> Router {
    let settings = Settings::default();
    let store: Arc<dyn LeadStore> = Arc::new(SledLeadStore::temporary().unwrap());
    let cache = CacheStore::new(Arc::new(MemoryBackend::new()), settings.cache.clone());
    build_app(AppState::from_parts(store, cache, &settings, Some(TOKEN.to_string())))
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn send(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut req = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    if let Some(t) = token {
        req = req.header("X-ADMIN-TOKEN", t);
    }
    req.body(Body::from(body.to_string())).unwrap()
}

fn techcorp() -> Value {
    json!({
        "company": "TechCorp Solutions",
        "industry": "Tecnologia",
        "location": "São Paulo, SP",
        "employees": "50-100",
        "description": "Empresa de software especializada em soluções ERP",
        "keywords": ["erp", "cloud"],
        "score": 85
    })
}

#[tokio::test]
async fn health_reports_cache_status() {
    let app = app();
    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"]["status"], "healthy");
}

#[tokio::test]
async fn created_lead_is_searchable_and_cached() {
    let app = app();
    let (status, lead) = call(&app, send("POST", "/leads", techcorp(), None)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = lead["id"].as_u64().unwrap();
    assert!(lead["indexed_at"].is_string());

    let (status, fetched) = call(&app, get(&format!("/leads/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["company"], "TechCorp Solutions");

    let (status, first) = call(&app, get("/search?q=techcorp+erp&industry=tecnologia")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cache_hit"], false);
    assert_eq!(first["source"], "index");
    let results = first["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["lead"]["id"].as_u64(), Some(id));
    assert!(results[0]["highlighted_fields"]["company"].as_str().unwrap().contains("<mark>"));

    let (_, second) = call(&app, get("/search?q=techcorp+erp&industry=tecnologia")).await;
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["results"], first["results"]);

    let (_, posted) = call(
        &app,
        send("POST", "/search", json!({"text": "techcorp erp", "filters": {"industry": "tecnologia"}}), None),
    )
    .await;
    assert_eq!(posted["cache_hit"], true);

    let (_, tokens) = call(&app, get("/search/tokens?tokens=techcorp,tecnologia")).await;
    assert_eq!(tokens["lead_ids"], json!([id]));
    let (_, exact) = call(&app, get("/search/tokens?tokens=industry:tecnologia,location:sao")).await;
    assert_eq!(exact["tokens"], json!(["industry:tecnologia", "location:sao"]));
    assert_eq!(exact["lead_ids"], json!([]));
    let (_, exact) = call(&app, get("/search/tokens?tokens=industry:tecnologia")).await;
    assert_eq!(exact["lead_ids"], json!([id]));

    let (_, stats) = call(&app, get("/search/stats")).await;
    assert_eq!(stats["indexing_status"]["total_leads"], 1);
    assert!(stats["cache_hits"].as_i64().unwrap() >= 2);
}

#[tokio::test]
async fn updates_and_deletes_invalidate_results() {
    let app = app();
    let (_, lead) = call(&app, send("POST", "/leads", techcorp(), None)).await;
    let id = lead["id"].as_u64().unwrap();
    call(&app, get("/search?q=techcorp")).await;

    let (status, updated) = call(&app, send("PUT", &format!("/leads/{id}"), json!({"company": "Acme Renamed"}), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["company"], "Acme Renamed");

    let (_, after) = call(&app, get("/search?q=acme")).await;
    assert_eq!(after["results"].as_array().unwrap().len(), 1);
    let (_, stale) = call(&app, get("/search?q=techcorp")).await;
    assert_eq!(stale["cache_hit"], false);
    assert!(stale["results"].as_array().unwrap().is_empty());

    let (status, _) = call(&app, send("DELETE", &format!("/leads/{id}"), Value::Null, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, get(&format!("/leads/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, gone) = call(&app, get("/search?q=acme")).await;
    assert!(gone["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_requests_map_to_client_errors() {
    let app = app();
    let (status, _) = call(&app, get("/search?min_score=90&max_score=10")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, get("/search?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, send("POST", "/leads", json!({"company": "  "}), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = call(&app, get("/leads/424242")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.as_str().unwrap().contains("424242"));
}

#[tokio::test]
async fn admin_endpoints_require_the_token() {
    let app = app();
    let rows = json!([techcorp(), {"company": ""}, {"company": "Fintech Pay", "industry": "Financeiro", "score": 40}]);

    let (status, _) = call(&app, send("POST", "/leads/import", rows.clone(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, send("POST", "/leads/import", rows.clone(), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, report) = call(&app, send("POST", "/leads/import", rows, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["received"], 3);
    assert_eq!(report["created"], 2);
    assert_eq!(report["indexed"], 2);
    assert_eq!(report["rejected"], 1);

    let (status, batch) = call(&app, send("POST", "/index/batch", json!({}), Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["indexed_leads"], 0);

    let (status, reindexed) = call(&app, send("POST", "/index/reindex", Value::Null, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reindexed["indexed_leads"], 2);

    let (_, status_body) = call(&app, get("/index/status")).await;
    assert_eq!(status_body["indexing_coverage"], 100.0);

    call(&app, get("/search?q=fintech")).await;
    let (status, removed) = call(&app, send("POST", "/cache/invalidate", Value::Null, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["removed"], 1);

    let (_, suggestions) = call(&app, get("/search/suggestions?q=fin")).await;
    assert!(suggestions.as_array().unwrap().iter().any(|s| s == "fintech" || s == "Fintech Pay"));
}
