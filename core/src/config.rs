//! Runtime settings, read from the environment.
//!
//! Every option has a default; a variable that is set but does not parse is a
//! configuration error rather than a silent fallback.

use crate::cache::Namespace;
use crate::tokenizer::{TokenRules, DEFAULT_MIN_TOKEN_LENGTH, DEFAULT_STOPWORDS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    pub url: String,
    pub connect_timeout_ms: u64,
    pub op_timeout_ms: u64,
    /// Seconds, for namespaces without a dedicated TTL.
    pub default_ttl: u64,
    pub search_ttl: u64,
    pub lead_ttl: u64,
    pub user_prefs_ttl: u64,
    pub analytics_ttl: u64,
    pub suggestions_ttl: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".into(),
            connect_timeout_ms: 2_000,
            op_timeout_ms: 500,
            default_ttl: 3_600,
            search_ttl: 3_600,
            lead_ttl: 7_200,
            user_prefs_ttl: 86_400,
            analytics_ttl: 1_800,
            suggestions_ttl: 1_800,
        }
    }
}

impl CacheSettings {
    pub fn ttl_for(&self, namespace: Namespace) -> Duration {
        let secs = match namespace {
            Namespace::Search => self.search_ttl,
            Namespace::Lead => self.lead_ttl,
            Namespace::UserPrefs => self.user_prefs_ttl,
            Namespace::Analytics => self.analytics_ttl,
            Namespace::Suggestions => self.suggestions_ttl,
            // inverted-index sets are written without expiry
            Namespace::PopularSearches | Namespace::Index => self.default_ttl,
        };
        Duration::from_secs(secs)
    }

    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }

    pub fn op_timeout(&self) -> Duration { Duration::from_millis(self.op_timeout_ms) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub cache: CacheSettings,
    /// Ranked results kept per cached query, and the candidate cap.
    pub max_search_results: usize,
    pub max_page_size: usize,
    pub indexing_batch_size: usize,
    pub min_token_length: usize,
    pub stopwords: Vec<String>,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            max_search_results: 1_000,
            max_page_size: 100,
            indexing_batch_size: 100,
            min_token_length: DEFAULT_MIN_TOKEN_LENGTH,
            stopwords: DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect(),
            db_path: PathBuf::from("./data/leads"),
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name}: cannot parse {raw:?}"))),
        None => Ok(default),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(Error::Config(format!("{name}: expected a boolean, got {v:?}"))),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Settings::default();
        let c = d.cache;
        let default_ttl = parse(&lookup, "CACHE_DEFAULT_TTL", c.default_ttl)?;
        let lead_ttl = parse(&lookup, "LEAD_CACHE_TTL", c.lead_ttl)?;
        let cache = CacheSettings {
            enabled: parse_bool(&lookup, "REDIS_ENABLED", c.enabled)?,
            url: lookup("REDIS_URL").unwrap_or(c.url),
            connect_timeout_ms: parse(&lookup, "CACHE_CONNECT_TIMEOUT_MS", c.connect_timeout_ms)?,
            op_timeout_ms: parse(&lookup, "CACHE_OP_TIMEOUT_MS", c.op_timeout_ms)?,
            default_ttl,
            search_ttl: parse(&lookup, "SEARCH_CACHE_TTL", c.search_ttl)?,
            lead_ttl,
            user_prefs_ttl: parse(&lookup, "USER_PREFS_TTL", c.user_prefs_ttl)?,
            analytics_ttl: parse(&lookup, "ANALYTICS_TTL", c.analytics_ttl)?,
            suggestions_ttl: parse(&lookup, "SUGGESTIONS_TTL", c.suggestions_ttl)?,
        };
        let stopwords = match lookup("STOPWORDS") {
            Some(list) => list
                .split(',')
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            None => d.stopwords,
        };
        let settings = Settings {
            cache,
            max_search_results: parse(&lookup, "MAX_SEARCH_RESULTS", d.max_search_results)?,
            max_page_size: parse(&lookup, "MAX_PAGE_SIZE", d.max_page_size)?,
            indexing_batch_size: parse(&lookup, "INDEXING_BATCH_SIZE", d.indexing_batch_size)?,
            min_token_length: parse(&lookup, "MIN_TOKEN_LENGTH", d.min_token_length)?,
            stopwords,
            db_path: lookup("LEADS_DB_PATH").map(PathBuf::from).unwrap_or(d.db_path),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.indexing_batch_size == 0 {
            return Err(Error::Config("INDEXING_BATCH_SIZE must be positive".into()));
        }
        if self.max_page_size == 0 || self.max_search_results == 0 {
            return Err(Error::Config("result limits must be positive".into()));
        }
        if self.min_token_length == 0 {
            return Err(Error::Config("MIN_TOKEN_LENGTH must be positive".into()));
        }
        Ok(())
    }

    pub fn token_rules(&self) -> TokenRules {
        TokenRules::new(self.min_token_length, self.stopwords.iter().cloned())
    }
}
