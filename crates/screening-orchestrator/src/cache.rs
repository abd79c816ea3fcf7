use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use screener_core::ScoreResult;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

pub const DEFAULT_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    security_id: String,
    market_id: String,
}

impl CacheKey {
    fn new(security_id: &str, market_id: &str) -> Self {
        Self {
            security_id: security_id.trim().to_uppercase(),
            market_id: market_id.trim().to_uppercase(),
        }
    }
}

/// Last computed result for one (security, market) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub security_id: String,
    pub market_id: String,
    pub result: ScoreResult,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) <= max_age
    }
}

/// Freshness breakdown of one market's entries, computed at query time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
    /// fresh / total, 0.0 for an empty market
    pub hit_rate: f64,
}

/// Per-(security, market) result store.
///
/// Staleness is decided at read time from the caller's `max_age`; entries are
/// only ever removed by [`ResultCache::clear`]. Writes are atomic per key.
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    clock: Arc<dyn Clock>,
    default_max_age: Duration,
}

impl ResultCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            default_max_age: Duration::hours(DEFAULT_MAX_AGE_HOURS),
        }
    }

    /// Max age used by [`ResultCache::stats`]
    pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age = max_age;
        self
    }

    pub fn default_max_age(&self) -> Duration {
        self.default_max_age
    }

    /// The cached result if it is at most `max_age` old.
    pub fn get(
        &self,
        security_id: &str,
        market_id: &str,
        max_age: Duration,
    ) -> Option<ScoreResult> {
        let now = self.clock.now();
        self.entries
            .get(&CacheKey::new(security_id, market_id))
            .filter(|entry| entry.is_fresh(now, max_age))
            .map(|entry| entry.result.clone())
    }

    /// The stored entry regardless of age
    pub fn entry(&self, security_id: &str, market_id: &str) -> Option<CacheEntry> {
        self.entries
            .get(&CacheKey::new(security_id, market_id))
            .map(|entry| entry.clone())
    }

    /// Store a result stamped with the current time. Last write wins.
    pub fn put(&self, security_id: &str, market_id: &str, result: ScoreResult) {
        let key = CacheKey::new(security_id, market_id);
        let entry = CacheEntry {
            security_id: key.security_id.clone(),
            market_id: key.market_id.clone(),
            result,
            fetched_at: self.clock.now(),
        };
        self.entries.insert(key, entry);
    }

    /// Insert a previously persisted entry, keeping its original timestamp.
    /// A newer in-memory entry for the same key is not replaced.
    pub fn restore(&self, entry: CacheEntry) {
        let key = CacheKey::new(&entry.security_id, &entry.market_id);
        let entry = CacheEntry {
            security_id: key.security_id.clone(),
            market_id: key.market_id.clone(),
            ..entry
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut existing) => {
                if existing.get().fetched_at < entry.fetched_at {
                    existing.insert(entry);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }

    pub fn stats(&self, market_id: &str) -> CacheStats {
        self.stats_with_max_age(market_id, self.default_max_age)
    }

    pub fn stats_with_max_age(&self, market_id: &str, max_age: Duration) -> CacheStats {
        let market = market_id.trim().to_uppercase();
        let now = self.clock.now();
        let (total, fresh) = self
            .entries
            .iter()
            .filter(|e| e.key().market_id == market)
            .fold((0usize, 0usize), |(total, fresh), e| {
                (total + 1, fresh + usize::from(e.value().is_fresh(now, max_age)))
            });

        CacheStats {
            total,
            fresh,
            stale: total - fresh,
            hit_rate: if total == 0 { 0.0 } else { fresh as f64 / total as f64 },
        }
    }

    /// Remove every entry of a market; returns how many were removed.
    pub fn clear(&self, market_id: &str) -> usize {
        let market = market_id.trim().to_uppercase();
        let before = self.entries.len();
        self.entries.retain(|key, _| key.market_id != market);
        let removed = before.saturating_sub(self.entries.len());
        tracing::info!("Cleared {} cached results for market {}", removed, market);
        removed
    }

    pub fn entries_for_market(&self, market_id: &str) -> Vec<CacheEntry> {
        let market = market_id.trim().to_uppercase();
        self.entries
            .iter()
            .filter(|e| e.key().market_id == market)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn all_entries(&self) -> Vec<CacheEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn markets(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.key().market_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
