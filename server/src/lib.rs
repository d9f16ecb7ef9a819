use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use leadsearch_core::cache::{CacheHealth, CacheStore, Namespace};
use leadsearch_core::config::Settings;
use leadsearch_core::indexer::{IndexingStatus, LeadIndexer};
use leadsearch_core::persist::SledLeadStore;
use leadsearch_core::search::{SearchEngine, SearchQuery, SearchResponse, SearchStats, SortBy, DEFAULT_LIMIT};
use leadsearch_core::service::{IngestReport, LeadService};
use leadsearch_core::store::{LeadFilter, LeadStore};
use leadsearch_core::{Error, IndexingStats, Lead, LeadId, LeadUpdate, NewLead};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, String);

fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Store(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    (status, e.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub engine: SearchEngine,
    pub leads: LeadService,
    pub indexer: LeadIndexer,
    pub cache: CacheStore,
    pub admin_token: Option<String>,
}

impl AppState {
    /// Open the sled lead store and connect the cache store.
    pub async fn open(settings: &Settings, admin_token: Option<String>) -> Result<Self> {
        let store: Arc<dyn LeadStore> = Arc::new(SledLeadStore::open(&settings.db_path)?);
        let cache = CacheStore::connect(&settings.cache).await;
        Ok(Self::from_parts(store, cache, settings, admin_token))
    }

    pub fn from_parts(store: Arc<dyn LeadStore>, cache: CacheStore, settings: &Settings, admin_token: Option<String>) -> Self {
        let indexer = LeadIndexer::from_settings(store.clone(), cache.clone(), settings);
        let engine = SearchEngine::new(store.clone(), cache.clone(), indexer.clone(), settings);
        let leads = LeadService::new(store, cache.clone(), indexer.clone());
        Self { engine, leads, indexer, cache, admin_token }
    }
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(health))
        .route("/search", get(search_get).post(search_post))
        .route("/search/suggestions", get(suggestions))
        .route("/search/tokens", get(search_tokens))
        .route("/search/stats", get(search_stats))
        .route("/leads", post(create_lead))
        .route("/leads/import", post(import_leads))
        .route("/leads/:id", get(get_lead).put(update_lead).delete(delete_lead))
        .route("/index/status", get(index_status))
        .route("/index/batch", post(index_batch))
        .route("/index/reindex", post(reindex))
        .route("/cache/invalidate", post(invalidate_cache))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub cache: CacheHealth,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health { status: "ok", cache: state.cache.health_check().await })
}

/// Flat query-string form of [`SearchQuery`]; `keywords` is comma-separated.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub company_size: Option<String>,
    pub revenue_range: Option<String>,
    pub status: Option<String>,
    pub min_score: Option<i32>,
    pub max_score: Option<i32>,
    pub keywords: Option<String>,
    pub sort_by: Option<SortBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    #[serde(default)]
    pub infer: bool,
}

impl From<SearchParams> for SearchQuery {
    fn from(p: SearchParams) -> Self {
        let keywords = p
            .keywords
            .map(|k| k.split(',').map(str::trim).filter(|k| !k.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        SearchQuery {
            text: p.q,
            filters: LeadFilter {
                industry: p.industry,
                location: p.location,
                company_size: p.company_size,
                revenue_range: p.revenue_range,
                status: p.status,
                min_score: p.min_score,
                max_score: p.max_score,
                keywords,
            },
            sort_by: p.sort_by.unwrap_or_default(),
            limit: p.limit.unwrap_or(DEFAULT_LIMIT),
            offset: p.offset.unwrap_or(0),
            infer_filters: p.infer,
        }
    }
}

async fn search_get(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    state.engine.search(&params.into()).await.map(Json).map_err(api_error)
}

async fn search_post(State(state): State<AppState>, Json(query): Json<SearchQuery>) -> Result<Json<SearchResponse>, ApiError> {
    state.engine.search(&query).await.map(Json).map_err(api_error)
}

#[derive(Deserialize)]
pub struct SuggestParams {
    pub q: String,
    #[serde(default = "default_suggestions")]
    pub limit: usize,
}
fn default_suggestions() -> usize { 10 }

async fn suggestions(State(state): State<AppState>, Query(params): Query<SuggestParams>) -> Result<Json<Vec<String>>, ApiError> {
    let limit = params.limit.min(state.engine.max_page_size());
    state.engine.get_search_suggestions(&params.q, limit).await.map(Json).map_err(api_error)
}

#[derive(Deserialize)]
pub struct TokenParams {
    /// Comma-separated tokens, all of which must match.
    pub tokens: String,
    #[serde(default = "default_token_limit")]
    pub limit: usize,
}
fn default_token_limit() -> usize { DEFAULT_LIMIT }

#[derive(Serialize)]
pub struct TokenHits {
    pub tokens: Vec<String>,
    pub lead_ids: Vec<LeadId>,
}

async fn search_tokens(State(state): State<AppState>, Query(params): Query<TokenParams>) -> Json<TokenHits> {
    let tokens: Vec<String> = params.tokens.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect();
    let lead_ids = state.indexer.search_leads_by_tokens(&tokens, params.limit).await;
    Json(TokenHits { tokens, lead_ids })
}

async fn search_stats(State(state): State<AppState>) -> Result<Json<SearchStats>, ApiError> {
    state.engine.get_search_stats().await.map(Json).map_err(api_error)
}

async fn create_lead(State(state): State<AppState>, Json(lead): Json<NewLead>) -> Result<(StatusCode, Json<Lead>), ApiError> {
    let lead = state.leads.create_lead(lead).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(lead)))
}

async fn get_lead(State(state): State<AppState>, Path(id): Path<LeadId>) -> Result<Json<Lead>, ApiError> {
    state.leads.get_lead(id).await.map(Json).map_err(api_error)
}

async fn update_lead(State(state): State<AppState>, Path(id): Path<LeadId>, Json(update): Json<LeadUpdate>) -> Result<Json<Lead>, ApiError> {
    state.leads.update_lead(id, update).await.map(Json).map_err(api_error)
}

async fn delete_lead(State(state): State<AppState>, Path(id): Path<LeadId>) -> Result<StatusCode, ApiError> {
    state.leads.delete_lead(id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn index_status(State(state): State<AppState>) -> Result<Json<IndexingStatus>, ApiError> {
    state.indexer.get_indexing_status().await.map(Json).map_err(api_error)
}

// --- Admin endpoints ---
async fn import_leads(State(state): State<AppState>, headers: HeaderMap, Json(leads): Json<Vec<NewLead>>) -> Result<Json<IngestReport>, ApiError> {
    authorize(&state, &headers)?;
    state.leads.ingest_scraped(leads).await.map(Json).map_err(api_error)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BatchRequest {
    /// Index exactly these leads; all pending leads when absent.
    pub lead_ids: Option<Vec<LeadId>>,
    pub batch_size: Option<usize>,
}

async fn index_batch(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<BatchRequest>) -> Result<Json<IndexingStats>, ApiError> {
    authorize(&state, &headers)?;
    let batch_size = req.batch_size.unwrap_or(state.indexer.batch_size());
    let stats = match req.lead_ids {
        Some(ids) => state.indexer.index_leads(&ids, batch_size).await,
        None => state.indexer.bulk_index_leads(batch_size).await,
    };
    if stats.indexed_leads > 0 {
        state.cache.invalidate_namespace(Namespace::Search).await;
    }
    Ok(Json(stats))
}

async fn reindex(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<IndexingStats>, ApiError> {
    authorize(&state, &headers)?;
    state.indexer.reindex_all_leads().await.map(Json).map_err(api_error)
}

#[derive(Serialize)]
pub struct Invalidated {
    pub removed: u64,
}

async fn invalidate_cache(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Invalidated>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(Invalidated { removed: state.engine.invalidate_search_cache().await }))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
