use super::CacheBackend;
use crate::CacheError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

enum Value {
    Str(String),
    Set(BTreeSet<String>),
    Sorted(HashMap<String, f64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-process cache backend with Redis-like semantics.
///
/// The clock can be moved forward with [`MemoryBackend::advance`] to expire
/// entries, and the backend can be switched off with
/// [`MemoryBackend::set_available`] to behave like an unreachable server.
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    skew: Mutex<Duration>,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self { Self::new() }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Backend(format!("WRONGTYPE operation against key {key}"))
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            skew: Mutex::new(Duration::ZERO),
            available: AtomicBool::new(true),
        }
    }

    /// Move the backend clock forward.
    pub fn advance(&self, by: Duration) {
        *self.skew.lock() += by;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.now();
        self.entries.lock().values().filter(|e| !expired(e, now)).count()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn now(&self) -> Instant {
        Instant::now() + *self.skew.lock()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("memory backend switched off".into()))
        }
    }

    /// Run `f` on the live entry map after evicting expired keys.
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> Result<T, CacheError>) -> Result<T, CacheError> {
        self.check()?;
        let now = self.now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !expired(e, now));
        f(&mut entries, now)
    }
}

fn expired(entry: &Entry, now: Instant) -> bool {
    entry.expires_at.map_or(false, |at| at <= now)
}

/// Compile a Redis `KEYS` pattern: `*`, `?` and `[...]` classes, with
/// Redis's `[^...]` negation spelled the way `glob` expects.
pub(crate) fn key_pattern(pattern: &str) -> Result<glob::Pattern, CacheError> {
    glob::Pattern::new(&pattern.replace("[^", "[!"))
        .map_err(|e| CacheError::Backend(format!("invalid key pattern {pattern:?}: {e}")))
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_entries(|entries, _| match entries.get(key) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.with_entries(|entries, now| {
            entries.insert(key.to_string(), Entry { value: Value::Str(value), expires_at: Some(now + ttl) });
            Ok(())
        })
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.with_entries(|entries, _| Ok(keys.iter().filter(|k| entries.remove(k.as_str()).is_some()).count() as u64))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.with_entries(|entries, _| Ok(entries.contains_key(key)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.with_entries(|entries, now| {
            Ok(entries.get(key).and_then(|e| e.expires_at).map(|at| at.saturating_duration_since(now)))
        })
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let pattern = key_pattern(pattern)?;
        self.with_entries(|entries, _| {
            let mut keys: Vec<String> = entries.keys().filter(|k| pattern.matches(k)).cloned().collect();
            keys.sort();
            Ok(keys)
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.with_entries(|entries, _| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry { value: Value::Set(BTreeSet::new()), expires_at: None });
            match &mut entry.value {
                Value::Set(set) => {
                    set.insert(member.to_string());
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.with_entries(|entries, _| {
            let now_empty = match entries.get_mut(key) {
                None => return Ok(()),
                Some(Entry { value: Value::Set(set), .. }) => {
                    set.remove(member);
                    set.is_empty()
                }
                Some(_) => return Err(wrong_type(key)),
            };
            if now_empty {
                entries.remove(key);
            }
            Ok(())
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.with_entries(|entries, _| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sinter(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        self.with_entries(|entries, _| {
            let mut acc: Option<BTreeSet<String>> = None;
            for key in keys {
                let set = match entries.get(key) {
                    None => return Ok(Vec::new()),
                    Some(Entry { value: Value::Set(set), .. }) => set,
                    Some(_) => return Err(wrong_type(key)),
                };
                acc = Some(match acc {
                    None => set.clone(),
                    Some(prev) => prev.intersection(set).cloned().collect(),
                });
            }
            Ok(acc.map(|s| s.into_iter().collect()).unwrap_or_default())
        })
    }

    async fn zincr(&self, key: &str, member: &str, by: f64) -> Result<f64, CacheError> {
        self.with_entries(|entries, _| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry { value: Value::Sorted(HashMap::new()), expires_at: None });
            match &mut entry.value {
                Value::Sorted(scores) => {
                    let score = scores.entry(member.to_string()).or_insert(0.0);
                    *score += by;
                    Ok(*score)
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn zrevrange(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError> {
        self.with_entries(|entries, _| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::Sorted(scores), .. }) => {
                let mut ranked: Vec<(&String, &f64)> = scores.iter().collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| b.0.cmp(a.0)));
                Ok(ranked.into_iter().take(count).map(|(m, _)| m.clone()).collect())
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.with_entries(|entries, _| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry { value: Value::Str("0".into()), expires_at: None });
            match &mut entry.value {
                Value::Str(raw) => {
                    let current: i64 = raw
                        .parse()
                        .map_err(|_| CacheError::Backend(format!("value at {key} is not an integer")))?;
                    let next = current + by;
                    *raw = next.to_string();
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.with_entries(|entries, now| {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(now + ttl);
            }
            Ok(())
        })
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.with_entries(|entries, _| {
            entries.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_patterns() {
        let m = |p: &str, k: &str| key_pattern(p).unwrap().matches(k);
        assert!(m("search:*", "search:abc"));
        assert!(m("search:*", "search:"));
        assert!(!m("search:*", "lead:1"));
        assert!(m("lead:?", "lead:1"));
        assert!(!m("lead:?", "lead:12"));
        assert!(m("*:1*", "lead:12"));
        assert!(m("lead:[12]", "lead:2"));
        assert!(!m("lead:[12]", "lead:3"));
        assert!(m("lead:[^12]", "lead:3"));
        assert!(!m("lead:[^12]", "lead:1"));
        assert!(m("index:a/b*", "index:a/bc"));
        assert!(key_pattern("lead:[").is_err());
    }

    #[tokio::test]
    async fn entries_expire_when_clock_advances() {
        let backend = MemoryBackend::new();
        backend.set_ex("k", "v".into(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        backend.advance(Duration::from_secs(11));
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let backend = MemoryBackend::new();
        backend.sadd("s", "1").await.unwrap();
        assert!(backend.get("s").await.is_err());
    }
}
