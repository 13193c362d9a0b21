use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use log::*;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    created_at: DateTime<Utc>,
}

/// Memoises values for a fixed time-to-live.
///
/// A cached value is served only while its age is strictly below the TTL;
/// after that the next lookup misses and the caller recomputes and
/// overwrites it. Callers pass the current time in, so the cache never reads
/// a clock of its own.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        TtlCache {
            ttl,
            max_entries: max_entries.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(key)
            .filter(|e| now.signed_duration_since(e.created_at) < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| now.signed_duration_since(e.created_at) < ttl);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            if let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                created_at: now,
            },
        );
    }

    pub fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, now: DateTime<Utc>, f: F) -> V {
        if let Some(hit) = self.get(&key, now) {
            trace!("memo hit");
            return hit;
        }
        let value = f();
        self.insert(key, value.clone(), now);
        value
    }

    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.ymd(2026, 10, 18).and_hms(10, 0, 0)
    }

    #[test]
    fn serves_hits_until_ttl_elapses() {
        let mut cache = TtlCache::new(Duration::seconds(30), 16);
        cache.insert("today", 1, t0());

        assert_eq!(cache.get(&"today", t0() + Duration::seconds(29)), Some(1));
        assert_eq!(cache.get(&"today", t0() + Duration::seconds(30)), None);
    }

    #[test]
    fn recomputes_and_overwrites_after_expiry() {
        let mut cache = TtlCache::new(Duration::seconds(10), 16);
        let mut calls = 0;

        let first = cache.get_or_insert_with("k", t0(), || {
            calls += 1;
            calls
        });
        let cached = cache.get_or_insert_with("k", t0() + Duration::seconds(5), || {
            calls += 1;
            calls
        });
        let fresh = cache.get_or_insert_with("k", t0() + Duration::seconds(11), || {
            calls += 1;
            calls
        });

        assert_eq!((first, cached, fresh), (1, 1, 2));
        assert_eq!(cache.get(&"k", t0() + Duration::seconds(12)), Some(2));
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut cache = TtlCache::new(Duration::minutes(1), 2);
        cache.insert("a", 1, t0());
        cache.insert("b", 2, t0() + Duration::seconds(1));
        cache.insert("c", 3, t0() + Duration::seconds(2));

        let now = t0() + Duration::seconds(3);
        assert_eq!(cache.get(&"a", now), None);
        assert_eq!(cache.get(&"b", now), Some(2));
        assert_eq!(cache.get(&"c", now), Some(3));
    }

    #[test]
    fn invalidate_forgets_one_key() {
        let mut cache = TtlCache::new(Duration::minutes(1), 4);
        cache.insert("a", 1, t0());
        cache.insert("b", 2, t0());
        cache.invalidate(&"a");

        assert_eq!(cache.get(&"a", t0()), None);
        assert_eq!(cache.len(), 1);
    }
}
