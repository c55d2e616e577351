//! Counters over validation traffic.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use groundcheck_core::{Recommendation, ValidationResult, FALLBACK_VALIDATOR};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub accepted: u64,
    pub warned: u64,
    pub rejected: u64,
    pub fallbacks: u64,
    pub timed_out_checks: u64,
    pub per_agent: BTreeMap<String, u64>,
}

impl ValidationStats {
    /// Share of lookups answered from the cache, 0 when none were made.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Lock-free counters plus a small map for per-agent totals.
#[derive(Default)]
pub struct StatsCollector {
    total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    accepted: AtomicU64,
    warned: AtomicU64,
    rejected: AtomicU64,
    fallbacks: AtomicU64,
    timed_out_checks: AtomicU64,
    per_agent: Mutex<BTreeMap<String, u64>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished validation. `cache_hit` is None when caching is off.
    pub fn record(&self, agent_type: &str, result: &ValidationResult, cache_hit: Option<bool>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match cache_hit {
            Some(true) => self.cache_hits.fetch_add(1, Ordering::Relaxed),
            Some(false) => self.cache_misses.fetch_add(1, Ordering::Relaxed),
            None => 0,
        };

        let counter = match result.recommendation {
            Recommendation::Accept => &self.accepted,
            Recommendation::Warn => &self.warned,
            Recommendation::Reject => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if result.validator_used == FALLBACK_VALIDATOR {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        if cache_hit != Some(true) {
            self.timed_out_checks
                .fetch_add(result.timed_out_checks.len() as u64, Ordering::Relaxed);
        }

        *self.per_agent.lock().entry(agent_type.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> ValidationStats {
        ValidationStats {
            total: self.total.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            warned: self.warned.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            timed_out_checks: self.timed_out_checks.load(Ordering::Relaxed),
            per_agent: self.per_agent.lock().clone(),
        }
    }
}
