//! Caching layer for groundcheck-runtime.
//!
//! Validation is deterministic, so identical requests can be answered from
//! memory. Each entry carries its own TTL (the agent's `cache_ttl`).

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use groundcheck_core::{Hints, ValidationInput, ValidationLevel, ValidationResult};

use crate::config::DEFAULT_MAX_ENTRIES;

/// Cache key for validation results.
///
/// Two requests share a key only if agent type, response, context, level and
/// hints all match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    agent_type: String,
    level: ValidationLevel,
    response_hash: u64,
    context_hash: u64,
    hints_hash: u64,
}

impl CacheKey {
    pub fn new(
        agent_type: &str,
        response: &str,
        context: &str,
        level: ValidationLevel,
        hints: &Hints,
    ) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            level,
            response_hash: hash_str(response),
            context_hash: hash_str(context),
            hints_hash: hash_str(&hints.digest()),
        }
    }

    pub fn from_input(input: &ValidationInput, level: ValidationLevel) -> Self {
        Self::new(&input.agent_type, &input.response, &input.context, level, &input.hints)
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn level(&self) -> ValidationLevel {
        self.level
    }
}

fn hash_str(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// A stored result with its expiry.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub result: ValidationResult,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    fn new(result: ValidationResult, ttl: Duration) -> Self {
        Self {
            result,
            created_at: Utc::now(),
            ttl,
        }
    }

    /// Wall-clock expiry, for diagnostics. None if out of chrono's range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }
}

/// Expires each entry after its own TTL. Re-inserting a key restarts it.
struct EntryExpiry;

impl Expiry<CacheKey, CacheEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &CacheKey, value: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// What a cache miss computed.
#[derive(Debug, Clone)]
pub enum Computed {
    /// A regular result, stored under the key
    Cacheable(ValidationResult),

    /// A degraded result (fallback, timed-out checks), returned but not stored
    Uncacheable(ValidationResult),
}

impl Computed {
    pub fn into_result(self) -> ValidationResult {
        match self {
            Computed::Cacheable(result) | Computed::Uncacheable(result) => result,
        }
    }
}

/// Outcome of [`ValidationCache::get_or_compute`].
#[derive(Debug, Clone)]
pub struct Lookup {
    pub result: ValidationResult,
    pub hit: bool,
}

/// Validation result cache using moka.
pub struct ValidationCache {
    cache: Cache<CacheKey, CacheEntry>,
}

impl ValidationCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<ValidationResult> {
        self.cache.get(key).await.map(|entry| entry.result)
    }

    /// Store a result. A zero TTL disables caching for the entry.
    pub async fn insert(&self, key: CacheKey, result: ValidationResult, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.cache.insert(key, CacheEntry::new(result, ttl)).await;
    }

    /// Return the cached result for `key`, or run `compute` and store what it
    /// returns if it is cacheable.
    ///
    /// A hit reports the lookup cost as `elapsed_ms`. Concurrent misses on the
    /// same key both compute; the last insert wins.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, ttl: Duration, compute: F) -> Lookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Computed>,
    {
        let started = Instant::now();
        if let Some(mut result) = self.get(&key).await {
            result.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            tracing::debug!(agent_type = %key.agent_type, level = %key.level, "Validation cache hit");
            return Lookup { result, hit: true };
        }

        let result = match compute().await {
            Computed::Cacheable(result) => {
                self.insert(key, result.clone(), ttl).await;
                result
            }
            Computed::Uncacheable(result) => result,
        };
        Lookup { result, hit: false }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate; call [`run_pending_tasks`](Self::run_pending_tasks) first
    /// for an exact count.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for ValidationCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
