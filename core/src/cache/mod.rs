//! Namespaced key/value cache with per-entry expiration.
//!
//! [`CacheStore`] is advisory: every backend failure, timeout or decode error
//! is logged and reported as a miss (`None`, `false`, empty), never as an
//! error. The system of record is always the lead store.

mod memory;
mod redis_backend;

pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;

use crate::config::CacheSettings;
use crate::{CacheError, LeadId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Raw operations a cache backend must provide. Keys are fully prefixed.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    /// Returns how many of `keys` existed.
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    /// Remaining lifetime; `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;
    /// Keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;
    async fn sinter(&self, keys: &[String]) -> Result<Vec<String>, CacheError>;
    async fn zincr(&self, key: &str, member: &str, by: f64) -> Result<f64, CacheError>;
    /// Highest-scored members first.
    async fn zrevrange(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError>;
    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
    async fn flush(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Search,
    Lead,
    UserPrefs,
    Analytics,
    Suggestions,
    PopularSearches,
    Index,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Search => "search:",
            Namespace::Lead => "lead:",
            Namespace::UserPrefs => "user_prefs:",
            Namespace::Analytics => "analytics:",
            Namespace::Suggestions => "suggestions:",
            Namespace::PopularSearches => "popular_searches",
            Namespace::Index => "index:",
        }
    }

    pub fn key(self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Error,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub available: bool,
    pub error: Option<String>,
}

const HEALTH_PROBE_KEY: &str = "health_check_test";

/// Shared handle to the cache; cheap to clone.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Option<Arc<dyn CacheBackend>>,
    settings: CacheSettings,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self { inner: Arc::new(Inner { backend: Some(backend), settings }) }
    }

    /// A cache that stores nothing; every read is a miss.
    pub fn disabled(settings: CacheSettings) -> Self {
        Self { inner: Arc::new(Inner { backend: None, settings }) }
    }

    /// Connect to the configured Redis server, degrading to a disabled cache
    /// when it is switched off or unreachable.
    pub async fn connect(settings: &CacheSettings) -> Self {
        if !settings.enabled {
            info!("cache store disabled via REDIS_ENABLED");
            return Self::disabled(settings.clone());
        }
        match RedisBackend::connect(&settings.url, settings.connect_timeout()).await {
            Ok(backend) => {
                info!(op_timeout_ms = settings.op_timeout_ms, "cache store connected");
                Self::new(Arc::new(backend), settings.clone())
            }
            Err(e) => {
                warn!(error = %e, "cache store unreachable, caching disabled");
                Self::disabled(settings.clone())
            }
        }
    }

    pub fn is_enabled(&self) -> bool { self.inner.backend.is_some() }

    pub fn settings(&self) -> &CacheSettings { &self.inner.settings }

    fn backend(&self) -> Option<&Arc<dyn CacheBackend>> { self.inner.backend.as_ref() }

    /// Await a backend call under the operation timeout, folding any failure
    /// into `None`.
    async fn guard<T>(&self, op: &'static str, key: &str, fut: impl Future<Output = Result<T, CacheError>>) -> Option<T> {
        let timeout = self.inner.settings.op_timeout();
        let err = match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e,
            Err(_) => CacheError::Timeout(timeout),
        };
        warn!(op, key, error = %err, "cache operation failed");
        None
    }

    pub async fn get<T: DeserializeOwned>(&self, ns: Namespace, id: &str) -> Option<T> {
        let backend = self.backend()?;
        let key = ns.key(id);
        match self.guard("get", &key, backend.get(&key)).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(%key, "cache HIT");
                    Some(value)
                }
                Err(e) => {
                    warn!(%key, error = %e, "undecodable cache entry");
                    None
                }
            },
            None => {
                debug!(%key, "cache MISS");
                None
            }
        }
    }

    /// Store `value` for `ttl`, or the namespace TTL when `None`.
    pub async fn set<T: Serialize + ?Sized>(&self, ns: Namespace, id: &str, value: &T, ttl: Option<Duration>) -> bool {
        let Some(backend) = self.backend() else { return false };
        let key = ns.key(id);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%key, error = %CacheError::from(e), "cache SET skipped");
                return false;
            }
        };
        let ttl = ttl.unwrap_or_else(|| self.inner.settings.ttl_for(ns));
        let stored = self.guard("set", &key, backend.set_ex(&key, raw, ttl)).await.is_some();
        if stored {
            debug!(%key, ttl_s = ttl.as_secs(), "cache SET");
        }
        stored
    }

    pub async fn delete(&self, ns: Namespace, id: &str) -> bool {
        let Some(backend) = self.backend() else { return false };
        let key = ns.key(id);
        let removed = self.guard("delete", &key, backend.del(std::slice::from_ref(&key))).await;
        debug!(%key, "cache DELETE");
        removed.unwrap_or(0) > 0
    }

    pub async fn exists(&self, ns: Namespace, id: &str) -> bool {
        let Some(backend) = self.backend() else { return false };
        let key = ns.key(id);
        self.guard("exists", &key, backend.exists(&key)).await.unwrap_or(false)
    }

    pub async fn ttl(&self, ns: Namespace, id: &str) -> Option<Duration> {
        let backend = self.backend()?;
        let key = ns.key(id);
        self.guard("ttl", &key, backend.ttl(&key)).await.flatten()
    }

    /// Delete every key matching a glob pattern; returns how many were removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.backend() else { return 0 };
        let Some(keys) = self.guard("keys", pattern, backend.keys(pattern)).await else { return 0 };
        if keys.is_empty() {
            return 0;
        }
        let removed = self.guard("delete", pattern, backend.del(&keys)).await.unwrap_or(0);
        info!(pattern, removed, "cache INVALIDATE");
        removed
    }

    pub async fn invalidate_namespace(&self, ns: Namespace) -> u64 {
        self.invalidate_pattern(&format!("{}*", ns.prefix())).await
    }

    pub async fn health_check(&self) -> CacheHealth {
        let Some(backend) = self.backend() else {
            return CacheHealth { status: HealthStatus::Disabled, available: false, error: None };
        };
        let probe = async {
            backend.ping().await?;
            backend.set_ex(HEALTH_PROBE_KEY, "test".into(), Duration::from_secs(10)).await?;
            let read = backend.get(HEALTH_PROBE_KEY).await?;
            backend.del(&[HEALTH_PROBE_KEY.to_string()]).await?;
            Ok::<_, CacheError>(read.as_deref() == Some("test"))
        };
        let timeout = self.inner.settings.op_timeout();
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(true)) => CacheHealth { status: HealthStatus::Healthy, available: true, error: None },
            Ok(Ok(false)) => CacheHealth {
                status: HealthStatus::Error,
                available: true,
                error: Some("probe value mismatch".into()),
            },
            Ok(Err(e)) => CacheHealth { status: HealthStatus::Error, available: false, error: Some(e.to_string()) },
            Err(_) => CacheHealth {
                status: HealthStatus::Error,
                available: false,
                error: Some(CacheError::Timeout(timeout).to_string()),
            },
        }
    }

    /// Drop every key in the backing store.
    pub async fn clear_all(&self) -> bool {
        let Some(backend) = self.backend() else { return false };
        let cleared = self.guard("flush", "*", backend.flush()).await.is_some();
        if cleared {
            warn!("all cache data cleared");
        }
        cleared
    }

    /// Add `lead_id` to the token's inverted-index set. Sets carry no TTL;
    /// only pruning on reindex, lead removal and a full reindex shrink them.
    pub async fn add_to_index(&self, token: &str, lead_id: LeadId) -> bool {
        let Some(backend) = self.backend() else { return false };
        let key = Namespace::Index.key(token);
        self.guard("sadd", &key, backend.sadd(&key, &lead_id.to_string())).await.is_some()
    }

    pub async fn remove_from_index(&self, token: &str, lead_id: LeadId) -> bool {
        let Some(backend) = self.backend() else { return false };
        let key = Namespace::Index.key(token);
        self.guard("srem", &key, backend.srem(&key, &lead_id.to_string())).await.is_some()
    }

    /// Lead ids indexed under `token`; `None` when the cache is unavailable.
    pub async fn index_members(&self, token: &str) -> Option<Vec<LeadId>> {
        let backend = self.backend()?;
        let key = Namespace::Index.key(token);
        let members = self.guard("smembers", &key, backend.smembers(&key)).await?;
        Some(parse_ids(members))
    }

    /// Lead ids indexed under every one of `tokens`; `None` when the cache is
    /// unavailable.
    pub async fn index_intersection(&self, tokens: &[String]) -> Option<Vec<LeadId>> {
        let backend = self.backend()?;
        if tokens.is_empty() {
            return Some(Vec::new());
        }
        let keys: Vec<String> = tokens.iter().map(|t| Namespace::Index.key(t)).collect();
        let members = self.guard("sinter", &keys.join(","), backend.sinter(&keys)).await?;
        Some(parse_ids(members))
    }

    pub async fn add_popular_search(&self, query: &str) -> bool {
        let Some(backend) = self.backend() else { return false };
        let key = Namespace::PopularSearches.key("");
        self.guard("zincr", &key, backend.zincr(&key, query, 1.0)).await.is_some()
    }

    pub async fn popular_searches(&self, limit: usize) -> Vec<String> {
        let Some(backend) = self.backend() else { return Vec::new() };
        let key = Namespace::PopularSearches.key("");
        self.guard("zrevrange", &key, backend.zrevrange(&key, limit)).await.unwrap_or_default()
    }

    /// Increment a counter; the namespace TTL is set when the counter is created.
    pub async fn incr_counter(&self, ns: Namespace, id: &str, by: i64) -> Option<i64> {
        let backend = self.backend()?;
        let key = ns.key(id);
        let value = self.guard("incr", &key, backend.incr(&key, by)).await?;
        if value == by {
            let ttl = self.inner.settings.ttl_for(ns);
            self.guard("expire", &key, backend.expire(&key, ttl)).await;
        }
        Some(value)
    }

    pub async fn counter(&self, ns: Namespace, id: &str) -> i64 {
        let Some(backend) = self.backend() else { return 0 };
        let key = ns.key(id);
        self.guard("get", &key, backend.get(&key))
            .await
            .flatten()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    /// Cache-aside: return the cached value for `(ns, key)`, or run `load`,
    /// cache its successful result for `ttl` and return it. Loader errors are
    /// passed through and nothing is cached.
    pub async fn cache_aside<T, E, F, Fut>(&self, ns: Namespace, key: &str, ttl: Option<Duration>, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(ns, key).await {
            return Ok(hit);
        }
        let value = load().await?;
        self.set(ns, key, &value, ttl).await;
        Ok(value)
    }
}

fn parse_ids(members: Vec<String>) -> Vec<LeadId> {
    let mut ids: Vec<LeadId> = members.iter().filter_map(|m| m.parse().ok()).collect();
    ids.sort_unstable();
    ids
}
