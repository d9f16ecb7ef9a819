use leadsearch_core::cache::{CacheStore, HealthStatus, MemoryBackend, Namespace};
use leadsearch_core::config::CacheSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    id: u64,
    company: String,
}

fn store() -> (Arc<MemoryBackend>, CacheStore) {
    let backend = Arc::new(MemoryBackend::new());
    let cache = CacheStore::new(backend.clone(), CacheSettings::default());
    (backend, cache)
}

#[tokio::test]
async fn round_trip_within_ttl_then_miss() {
    let (backend, cache) = store();
    let value = Snapshot { id: 1, company: "Acme".into() };
    assert!(cache.set(Namespace::Lead, "1", &value, Some(Duration::from_secs(30))).await);
    assert_eq!(cache.get::<Snapshot>(Namespace::Lead, "1").await, Some(value));
    assert!(cache.exists(Namespace::Lead, "1").await);
    let ttl = cache.ttl(Namespace::Lead, "1").await.unwrap();
    assert!(ttl <= Duration::from_secs(30) && ttl > Duration::from_secs(25));

    backend.advance(Duration::from_secs(31));
    assert_eq!(cache.get::<Snapshot>(Namespace::Lead, "1").await, None);
    assert!(!cache.exists(Namespace::Lead, "1").await);
}

#[tokio::test]
async fn namespace_ttl_applies_by_default() {
    let (backend, cache) = store();
    cache.set(Namespace::Search, "h", &vec![1, 2, 3], None).await;
    backend.advance(Duration::from_secs(3_599));
    assert_eq!(cache.get::<Vec<u32>>(Namespace::Search, "h").await, Some(vec![1, 2, 3]));
    backend.advance(Duration::from_secs(2));
    assert_eq!(cache.get::<Vec<u32>>(Namespace::Search, "h").await, None);
}

#[tokio::test]
async fn pattern_invalidation_is_scoped() {
    let (_, cache) = store();
    for key in ["a", "b", "c"] {
        cache.set(Namespace::Search, key, &key, None).await;
    }
    cache.set(Namespace::Lead, "1", &"lead", None).await;

    assert_eq!(cache.invalidate_namespace(Namespace::Search).await, 3);
    assert_eq!(cache.get::<String>(Namespace::Search, "a").await, None);
    assert_eq!(cache.get::<String>(Namespace::Lead, "1").await.as_deref(), Some("lead"));
    assert_eq!(cache.invalidate_pattern("search:*").await, 0);
}

#[tokio::test]
async fn unavailable_backend_degrades_to_misses() {
    let (backend, cache) = store();
    cache.set(Namespace::Lead, "1", &"x", None).await;
    backend.set_available(false);

    assert_eq!(cache.get::<String>(Namespace::Lead, "1").await, None);
    assert!(!cache.set(Namespace::Lead, "2", &"y", None).await);
    assert!(!cache.delete(Namespace::Lead, "1").await);
    assert_eq!(cache.index_intersection(&["acme".into()]).await, None);
    assert!(cache.popular_searches(5).await.is_empty());

    let health = cache.health_check().await;
    assert_eq!(health.status, HealthStatus::Error);
    assert!(!health.available);
    assert!(health.error.is_some());

    backend.set_available(true);
    assert_eq!(cache.get::<String>(Namespace::Lead, "1").await.as_deref(), Some("x"));
    assert_eq!(cache.health_check().await.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn undecodable_entry_is_a_miss() {
    let (_, cache) = store();
    cache.set(Namespace::Lead, "1", &"just a string", None).await;
    assert_eq!(cache.get::<Snapshot>(Namespace::Lead, "1").await, None);
}

#[tokio::test]
async fn inverted_index_sets_intersect() {
    let (_, cache) = store();
    for (token, id) in [("cloud", 1), ("cloud", 2), ("erp", 2), ("erp", 3), ("cloud", 3)] {
        assert!(cache.add_to_index(token, id).await);
    }
    assert_eq!(cache.index_members("cloud").await, Some(vec![1, 2, 3]));
    assert_eq!(cache.index_intersection(&["cloud".into(), "erp".into()]).await, Some(vec![2, 3]));
    assert_eq!(cache.index_intersection(&["cloud".into(), "missing".into()]).await, Some(vec![]));

    cache.remove_from_index("erp", 3).await;
    assert_eq!(cache.index_intersection(&["cloud".into(), "erp".into()]).await, Some(vec![2]));
    assert_eq!(cache.ttl(Namespace::Index, "cloud").await, None);
}

#[tokio::test]
async fn popular_searches_rank_by_count() {
    let (_, cache) = store();
    for q in ["erp", "cloud", "erp", "fintech", "erp", "cloud"] {
        cache.add_popular_search(q).await;
    }
    assert_eq!(cache.popular_searches(2).await, vec!["erp", "cloud"]);
    assert_eq!(cache.popular_searches(10).await.len(), 3);
}

#[tokio::test]
async fn counters_expire_with_namespace_ttl() {
    let (backend, cache) = store();
    assert_eq!(cache.incr_counter(Namespace::Analytics, "hits", 1).await, Some(1));
    assert_eq!(cache.incr_counter(Namespace::Analytics, "hits", 2).await, Some(3));
    assert_eq!(cache.counter(Namespace::Analytics, "hits").await, 3);
    backend.advance(Duration::from_secs(1_801));
    assert_eq!(cache.counter(Namespace::Analytics, "hits").await, 0);
}

#[tokio::test]
async fn cache_aside_loads_once() {
    let (_, cache) = store();
    let loads = AtomicUsize::new(0);
    for _ in 0..3 {
        let value: Result<Snapshot, String> = cache
            .cache_aside(Namespace::Lead, "7", None, || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Snapshot { id: 7, company: "Loaded".into() })
            })
            .await;
        assert_eq!(value.unwrap().company, "Loaded");
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let failed: Result<Snapshot, String> = cache
        .cache_aside(Namespace::Lead, "8", None, || async { Err("boom".to_string()) })
        .await;
    assert_eq!(failed, Err("boom".to_string()));
    assert!(!cache.exists(Namespace::Lead, "8").await);
}

#[tokio::test]
async fn clear_all_drops_everything() {
    let (backend, cache) = store();
    cache.set(Namespace::Lead, "1", &1, None).await;
    cache.add_to_index("acme", 1).await;
    assert!(cache.clear_all().await);
    assert!(backend.is_empty());
}
