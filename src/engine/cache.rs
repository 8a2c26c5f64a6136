//! LRU cache for hybrid query results.
//!
//! Repeated tool-server queries are common (assistants retry identical
//! prompts), so ranked results are cached keyed on the full request.
//! Lookups use try-lock and silently miss under contention; every index
//! mutation clears the cache.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::skill::types::ScoredSkill;

const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct QueryCache {
    entries: Mutex<LruCache<u64, Vec<ScoredSkill>>>,
    stats: Mutex<CacheStats>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl QueryCache {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Hash a request into a cache key. Callers feed every field that
    /// affects ranking.
    pub fn key(parts: &impl Hash) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        parts.hash(&mut hasher);
        hasher.finish()
    }

    pub fn get(&self, key: u64) -> Option<Vec<ScoredSkill>> {
        let mut entries = self.entries.try_lock().ok()?;
        let mut stats = self.stats.try_lock().ok()?;
        match entries.get(&key) {
            Some(results) => {
                stats.hits += 1;
                Some(results.clone())
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: u64, results: Vec<ScoredSkill>) {
        if let Ok(mut entries) = self.entries.try_lock() {
            entries.put(key, results);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.try_lock() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.try_lock().map(|s| *s).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::types::{MatchProvenance, SkillCategory};

    fn hit(id: &str) -> ScoredSkill {
        ScoredSkill {
            skill_id: id.to_string(),
            name: id.to_string(),
            category: SkillCategory::General,
            repo_id: "r".to_string(),
            score: 0.5,
            provenance: MatchProvenance::Hybrid,
        }
    }

    #[test]
    fn put_then_get() {
        let cache = QueryCache::default();
        let key = QueryCache::key(&("query", 5usize));
        assert!(cache.get(key).is_none());

        cache.put(key, vec![hit("r/a")]);
        let cached = cache.get(key).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].skill_id, "r/a");
    }

    #[test]
    fn different_requests_different_keys() {
        let a = QueryCache::key(&("query", 5usize));
        let b = QueryCache::key(&("query", 10usize));
        assert_ne!(a, b);
    }

    #[test]
    fn clear_drops_entries() {
        let cache = QueryCache::default();
        let key = QueryCache::key(&"q");
        cache.put(key, vec![hit("r/a")]);
        cache.clear();
        assert!(cache.get(key).is_none());
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = QueryCache::default();
        let key = QueryCache::key(&"q");
        cache.get(key);
        cache.put(key, vec![]);
        cache.get(key);
        cache.get(key);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn lru_evicts_oldest() {
        let cache = QueryCache::with_capacity(2);
        let k1 = QueryCache::key(&"one");
        let k2 = QueryCache::key(&"two");
        let k3 = QueryCache::key(&"three");
        cache.put(k1, vec![]);
        cache.put(k2, vec![]);
        cache.get(k2);
        cache.put(k3, vec![]);
        assert!(cache.get(k1).is_none());
        assert!(cache.get(k2).is_some());
        assert!(cache.get(k3).is_some());
    }
}
