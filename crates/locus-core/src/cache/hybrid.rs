//! Two-tier cache: sharded RAM LRU in front of a persistent store.
//!
//! # Consistency
//!
//! - `get` and `put` hold the key's shard lock across both tiers, so
//!   operations on one key are linearizable.
//! - `invalidate` and `clear` take every shard lock in index order before
//!   touching the store, so no reader sees a half-invalidated entry.
//! - The store is written first; the RAM tier never holds an entry the store
//!   has not accepted.
//! - `invalidate` and `clear` advance an invalidation epoch while holding
//!   every shard lock. `put_if_epoch` drops a write whose epoch has moved, so
//!   a result fetched before an invalidation never lands after it.

use super::key::CacheKey;
use super::ram::{RamEntry, RamShard};
use super::traits::{CacheEntry, CacheStats, PersistentStore, StoredEntry, TierPresence};
use crate::config::CacheDefaults;
use crate::service::Method;
use crate::tasks::{run_blocking, TaskHandle};
use crate::{LocusError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Counters {
    ram_hits: AtomicU64,
    ram_misses: AtomicU64,
    db_hits: AtomicU64,
    db_misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
    deserialization_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for c in [
            &self.ram_hits,
            &self.ram_misses,
            &self.db_hits,
            &self.db_misses,
            &self.expired,
            &self.evictions,
            &self.deserialization_failures,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Default)]
struct Epochs {
    next: u64,
    cleared: u64,
    by_capability: HashMap<String, u64>,
}

impl Epochs {
    fn current(&self, capability: &str) -> u64 {
        self.by_capability
            .get(capability)
            .copied()
            .unwrap_or(0)
            .max(self.cleared)
    }

    /// `None` advances every capability.
    fn advance(&mut self, capability: Option<&str>) {
        self.next += 1;
        match capability {
            Some(c) => {
                self.by_capability.insert(c.to_string(), self.next);
            }
            None => {
                self.cleared = self.next;
                self.by_capability.clear();
            }
        }
    }
}

/// RAM + persistent cache keyed by [`CacheKey`].
pub struct HybridCache {
    shards: Vec<Mutex<RamShard>>,
    store: Arc<dyn PersistentStore>,
    ram_capacity: usize,
    counters: Counters,
    epochs: parking_lot::Mutex<Epochs>,
}

impl HybridCache {
    /// Split `ram_capacity` evenly over `shards` LRU shards (at least one
    /// slot each).
    pub fn new(store: Arc<dyn PersistentStore>, ram_capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = (ram_capacity / shards).max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(RamShard::new(per_shard))).collect(),
            store,
            ram_capacity: per_shard * shards,
            counters: Counters::default(),
            epochs: parking_lot::Mutex::new(Epochs::default()),
        }
    }

    pub fn with_defaults(store: Arc<dyn PersistentStore>) -> Self {
        Self::new(store, CacheDefaults::RAM_CAPACITY, CacheDefaults::RAM_SHARDS)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn lock_shard(&self, idx: usize) -> Result<MutexGuard<'_, RamShard>> {
        self.shards[idx]
            .lock()
            .map_err(|e| LocusError::Other(format!("Cache shard {} poisoned: {}", idx, e)))
    }

    fn lock_all(&self) -> Result<Vec<MutexGuard<'_, RamShard>>> {
        (0..self.shards.len()).map(|i| self.lock_shard(i)).collect()
    }

    /// Look up a value. `None` is a miss; a cached JSON `null` is
    /// `Some(Value::Null)`.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Value>> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<Value>> {
        let digest = key.digest();
        let mut shard = self.lock_shard(key.shard(self.shards.len()))?;

        let ram_expired = shard.peek(digest).map(|e| e.is_expired_at(now));
        match ram_expired {
            Some(false) => {
                Counters::bump(&self.counters.ram_hits);
                return Ok(shard.touch(digest, now).map(|e| e.value.clone()));
            }
            Some(true) => {
                shard.remove(digest);
                self.store.remove(digest)?;
                Counters::bump(&self.counters.expired);
                Counters::bump(&self.counters.ram_misses);
                return Ok(None);
            }
            None => Counters::bump(&self.counters.ram_misses),
        }

        let Some(stored) = self.store.get(digest)? else {
            Counters::bump(&self.counters.db_misses);
            return Ok(None);
        };

        if stored.is_expired_at(now) {
            self.store.remove(digest)?;
            Counters::bump(&self.counters.expired);
            Counters::bump(&self.counters.db_misses);
            return Ok(None);
        }

        let value: Value = match serde_json::from_str(&stored.value) {
            Ok(v) => v,
            Err(e) => {
                let err = LocusError::CacheDeserialization {
                    key: digest.to_string(),
                    message: e.to_string(),
                };
                warn!("{}; dropping entry", err);
                self.store.remove(digest)?;
                Counters::bump(&self.counters.deserialization_failures);
                Counters::bump(&self.counters.db_misses);
                return Ok(None);
            }
        };

        Counters::bump(&self.counters.db_hits);
        self.store.touch(digest, now)?;

        let entry = RamEntry {
            capability: stored.capability,
            method: stored.method,
            value: value.clone(),
            created_at: stored.created_at,
            expires_at: stored.expires_at,
            hit_count: stored.hit_count + 1,
            last_accessed: now,
        };
        self.insert_ram(&mut shard, digest.to_string(), entry);
        Ok(Some(value))
    }

    /// Write-through insert with `expires_at = now + ttl`.
    pub fn put(&self, key: &CacheKey, value: &Value, ttl: Duration) -> Result<()> {
        self.put_at(key, value, ttl, Utc::now())
    }

    pub fn put_at(&self, key: &CacheKey, value: &Value, ttl: Duration, now: DateTime<Utc>) -> Result<()> {
        self.write(key, value, ttl, now, None).map(|_| ())
    }

    /// Invalidation epoch of `capability`. Capture it before fetching a
    /// value and hand it to [`HybridCache::put_if_epoch`].
    pub fn epoch(&self, capability: &str) -> u64 {
        self.epochs.lock().current(capability)
    }

    /// Like [`HybridCache::put`], but skipped when the capability was
    /// invalidated or the cache cleared since `epoch` was taken. Returns
    /// whether the value was stored.
    pub fn put_if_epoch(&self, key: &CacheKey, value: &Value, ttl: Duration, epoch: u64) -> Result<bool> {
        self.write(key, value, ttl, Utc::now(), Some(epoch))
    }

    fn write(
        &self,
        key: &CacheKey,
        value: &Value,
        ttl: Duration,
        now: DateTime<Utc>,
        epoch: Option<u64>,
    ) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| LocusError::Validation {
            field: "ttl".to_string(),
            message: e.to_string(),
        })?;
        let expires_at = now + ttl;
        let stored = StoredEntry {
            key: key.digest().to_string(),
            capability: key.capability().to_string(),
            method: key.method(),
            value: serde_json::to_string(value)?,
            created_at: now,
            expires_at,
            hit_count: 0,
            last_accessed: now,
        };

        let mut shard = self.lock_shard(key.shard(self.shards.len()))?;
        if let Some(epoch) = epoch {
            if self.epochs.lock().current(key.capability()) != epoch {
                debug!(
                    capability = %key.capability(),
                    "Dropping write fetched before an invalidation"
                );
                return Ok(false);
            }
        }
        self.store.put(&stored)?;
        let entry = RamEntry {
            capability: stored.capability,
            method: stored.method,
            value: value.clone(),
            created_at: now,
            expires_at,
            hit_count: 0,
            last_accessed: now,
        };
        self.insert_ram(&mut shard, stored.key, entry);
        Ok(true)
    }

    fn insert_ram(&self, shard: &mut RamShard, key: String, entry: RamEntry) {
        if let Some((evicted_key, evicted)) = shard.insert(key, entry) {
            Counters::bump(&self.counters.evictions);
            // The entry stays in the store; hand back its access counters.
            if let Err(e) =
                self.store
                    .record_access(&evicted_key, evicted.hit_count, evicted.last_accessed)
            {
                debug!("Failed to persist counters for evicted {}: {}", evicted_key, e);
            }
        }
    }

    /// Remove every entry for `capability`, or only those for `method`.
    ///
    /// If the store fails, the RAM tier is left as is so both tiers keep
    /// agreeing.
    pub fn invalidate(&self, capability: &str, method: Option<Method>) -> Result<usize> {
        let mut shards = self.lock_all()?;
        self.epochs.lock().advance(Some(capability));
        let db_removed = self.store.invalidate(capability, method)?;
        let ram_removed: usize = shards
            .iter_mut()
            .map(|s| s.invalidate(capability, method))
            .sum();
        drop(shards);

        debug!(
            capability = %capability,
            method = ?method,
            "Invalidated {} cache entries ({} in RAM)",
            db_removed, ram_removed
        );
        Ok(db_removed.max(ram_removed))
    }

    /// Empty both tiers.
    pub fn clear(&self) -> Result<usize> {
        let mut shards = self.lock_all()?;
        self.epochs.lock().advance(None);
        let db_removed = self.store.clear()?;
        let ram_removed: usize = shards.iter_mut().map(|s| s.clear()).sum();
        drop(shards);
        Ok(db_removed.max(ram_removed))
    }

    /// Drop expired entries from both tiers.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut ram_removed = 0;
        for idx in 0..self.shards.len() {
            ram_removed += self.lock_shard(idx)?.remove_expired(now);
        }
        let db_removed = self.store.sweep_expired(now)?;
        self.counters
            .expired
            .fetch_add(db_removed.max(ram_removed) as u64, Ordering::Relaxed);
        Ok(db_removed.max(ram_removed))
    }

    /// Full view of one entry, without counting a hit.
    pub fn lookup_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let digest = key.digest();
        let shard = self.lock_shard(key.shard(self.shards.len()))?;
        let ram = shard.peek(digest).cloned();
        let db = self.store.get(digest)?;
        drop(shard);

        Ok(match (ram, db) {
            (Some(r), db) => {
                let tier = if db.is_some() {
                    TierPresence::RamAndDb
                } else {
                    TierPresence::RamOnly
                };
                Some(CacheEntry {
                    key: digest.to_string(),
                    capability: r.capability,
                    method: r.method,
                    value: r.value,
                    created_at: r.created_at,
                    expires_at: r.expires_at,
                    hit_count: r.hit_count,
                    last_accessed: r.last_accessed,
                    tier,
                })
            }
            (None, Some(d)) => {
                let value = serde_json::from_str(&d.value).map_err(|e| {
                    LocusError::CacheDeserialization {
                        key: digest.to_string(),
                        message: e.to_string(),
                    }
                })?;
                Some(CacheEntry {
                    key: d.key,
                    capability: d.capability,
                    method: d.method,
                    value,
                    created_at: d.created_at,
                    expires_at: d.expires_at,
                    hit_count: d.hit_count,
                    last_accessed: d.last_accessed,
                    tier: TierPresence::DbOnly,
                })
            }
            (None, None) => None,
        })
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut ram_entries = 0;
        for idx in 0..self.shards.len() {
            ram_entries += self.lock_shard(idx)?.len();
        }
        let db_entries = self.store.len()?;

        let c = &self.counters;
        let mut stats = CacheStats {
            ram_hits: c.ram_hits.load(Ordering::Relaxed),
            ram_misses: c.ram_misses.load(Ordering::Relaxed),
            db_hits: c.db_hits.load(Ordering::Relaxed),
            db_misses: c.db_misses.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            deserialization_failures: c.deserialization_failures.load(Ordering::Relaxed),
            ram_entries,
            db_entries,
            ram_capacity: self.ram_capacity,
            hit_rate: 0.0,
        };
        if stats.total_lookups() > 0 {
            stats.hit_rate = stats.total_hits() as f64 / stats.total_lookups() as f64;
        }
        Ok(stats)
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Sweep expired entries every `period` on a blocking thread.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> TaskHandle {
        let cache = Arc::clone(self);
        TaskHandle::spawn_interval("cache-sweeper", period, move || {
            let cache = cache.clone();
            async move {
                match run_blocking(move || cache.sweep_expired()).await {
                    Ok(0) => {}
                    Ok(n) => debug!("Cache sweep removed {} expired entries", n),
                    Err(e) => warn!("Cache sweep failed: {}", e),
                }
            }
        })
    }
}

impl std::fmt::Debug for HybridCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCache")
            .field("shards", &self.shards.len())
            .field("ram_capacity", &self.ram_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_cache(capacity: usize, shards: usize) -> (TempDir, Arc<SqliteStore>, HybridCache) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(temp_dir.path().join("cache.sqlite")).unwrap());
        let cache = HybridCache::new(store.clone(), capacity, shards);
        (temp_dir, store, cache)
    }

    fn key(capability: &str, method: Method, query: &str) -> CacheKey {
        CacheKey::new(capability, method, &json!({ "query": query }))
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_miss_then_ram_hit() {
        let (_temp, _store, cache) = create_test_cache(16, 4);
        let k = key("echo", Method::Ask, "ping");

        assert_eq!(cache.get(&k).unwrap(), None);
        cache.put(&k, &json!("pong"), HOUR).unwrap();
        assert_eq!(cache.get(&k).unwrap(), Some(json!("pong")));

        let stats = cache.stats().unwrap();
        assert_eq!(stats.ram_hits, 1);
        assert_eq!(stats.ram_misses, 1);
        assert_eq!(stats.db_misses, 1);
        assert_eq!(stats.db_entries, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cached_null_is_not_a_miss() {
        let (_temp, _store, cache) = create_test_cache(16, 4);
        let k = key("echo", Method::Ask, "nothing");
        cache.put(&k, &Value::Null, HOUR).unwrap();
        assert_eq!(cache.get(&k).unwrap(), Some(Value::Null));
    }

    #[test]
    fn test_db_hit_populates_ram() {
        let (_temp, store, cache) = create_test_cache(16, 4);
        let k = key("echo", Method::Ask, "ping");
        cache.put(&k, &json!("pong"), HOUR).unwrap();

        // A second cache over the same store starts with an empty RAM tier.
        let cold = HybridCache::new(store, 16, 4);
        assert_eq!(cold.lookup_entry(&k).unwrap().unwrap().tier, TierPresence::DbOnly);
        assert_eq!(cold.get(&k).unwrap(), Some(json!("pong")));

        let entry = cold.lookup_entry(&k).unwrap().unwrap();
        assert_eq!(entry.tier, TierPresence::RamAndDb);
        assert_eq!(entry.hit_count, 1);
        assert_eq!(cold.stats().unwrap().db_hits, 1);
    }

    #[test]
    fn test_expired_entry_unreachable() {
        let (_temp, _store, cache) = create_test_cache(16, 4);
        let k = key("echo", Method::Ask, "ping");
        let t0 = Utc::now();
        cache.put_at(&k, &json!("pong"), Duration::from_secs(10), t0).unwrap();

        let before = t0 + chrono::Duration::seconds(9);
        assert_eq!(cache.get_at(&k, before).unwrap(), Some(json!("pong")));

        let after = t0 + chrono::Duration::milliseconds(10_001);
        assert_eq!(cache.get_at(&k, after).unwrap(), None);
        assert!(cache.lookup_entry(&k).unwrap().is_none());
        assert_eq!(cache.stats().unwrap().expired, 1);
    }

    #[test]
    fn test_lru_evicted_entry_still_served_from_db() {
        let (_temp, _store, cache) = create_test_cache(3, 1);
        let keys: Vec<CacheKey> = (0..4).map(|i| key("echo", Method::Ask, &i.to_string())).collect();
        for (i, k) in keys.iter().enumerate() {
            cache.put(k, &json!(i), HOUR).unwrap();
        }

        assert_eq!(cache.lookup_entry(&keys[0]).unwrap().unwrap().tier, TierPresence::DbOnly);
        assert_eq!(cache.stats().unwrap().evictions, 1);
        assert_eq!(cache.get(&keys[0]).unwrap(), Some(json!(0)));
        assert_eq!(cache.stats().unwrap().db_hits, 1);
    }

    #[test]
    fn test_corrupt_db_value_treated_as_miss() {
        let (_temp, store, cache) = create_test_cache(16, 4);
        let k = key("echo", Method::Ask, "ping");
        let now = Utc::now();
        store
            .put(&StoredEntry {
                key: k.digest().to_string(),
                capability: "echo".into(),
                method: Method::Ask,
                value: "{not json".into(),
                created_at: now,
                expires_at: now + chrono::Duration::hours(1),
                hit_count: 0,
                last_accessed: now,
            })
            .unwrap();

        assert_eq!(cache.get(&k).unwrap(), None);
        assert!(store.get(k.digest()).unwrap().is_none());
        assert_eq!(cache.stats().unwrap().deserialization_failures, 1);
    }

    #[test]
    fn test_invalidate_scopes_both_tiers() {
        let (_temp, _store, cache) = create_test_cache(16, 4);
        let ask = key("echo", Method::Ask, "ping");
        let tell = key("echo", Method::Tell, "ping");
        let other = key("shop", Method::Ask, "ping");
        for k in [&ask, &tell, &other] {
            cache.put(k, &json!(1), HOUR).unwrap();
        }

        assert_eq!(cache.invalidate("echo", Some(Method::Tell)).unwrap(), 1);
        assert!(cache.get(&tell).unwrap().is_none());
        assert!(cache.get(&ask).unwrap().is_some());

        assert_eq!(cache.invalidate("echo", None).unwrap(), 1);
        assert!(cache.get(&ask).unwrap().is_none());
        assert!(cache.get(&other).unwrap().is_some());
    }

    #[test]
    fn test_clear_and_sweep() {
        let (_temp, _store, cache) = create_test_cache(16, 4);
        let t0 = Utc::now();
        cache
            .put_at(&key("echo", Method::Ask, "a"), &json!(1), Duration::from_secs(1), t0)
            .unwrap();
        cache.put_at(&key("echo", Method::Ask, "b"), &json!(2), HOUR, t0).unwrap();

        assert_eq!(
            cache.sweep_expired_at(t0 + chrono::Duration::seconds(2)).unwrap(),
            1
        );
        assert_eq!(cache.stats().unwrap().db_entries, 1);
        assert_eq!(cache.clear().unwrap(), 1);
        let stats = cache.stats().unwrap();
        assert_eq!((stats.ram_entries, stats.db_entries), (0, 0));

        cache.reset_stats();
        assert_eq!(cache.stats().unwrap().expired, 0);
    }

    #[test]
    fn test_capacity_split_across_shards() {
        let (_temp, _store, cache) = create_test_cache(10, 16);
        assert_eq!(cache.shard_count(), 16);
        assert_eq!(cache.stats().unwrap().ram_capacity, 16);
    }

    #[test]
    fn test_put_if_epoch_dropped_after_invalidate() {
        let (_temp, _store, cache) = create_test_cache(16, 4);
        let k = key("echo", Method::Ask, "ping");
        let other = key("shop", Method::Ask, "ping");

        let echo_epoch = cache.epoch("echo");
        let shop_epoch = cache.epoch("shop");
        cache.invalidate("echo", None).unwrap();

        assert!(!cache.put_if_epoch(&k, &json!("stale"), HOUR, echo_epoch).unwrap());
        assert!(cache.lookup_entry(&k).unwrap().is_none());
        // Other capabilities keep their epoch.
        assert!(cache.put_if_epoch(&other, &json!(1), HOUR, shop_epoch).unwrap());

        let fresh = cache.epoch("echo");
        assert!(cache.put_if_epoch(&k, &json!("fresh"), HOUR, fresh).unwrap());
        assert_eq!(cache.get(&k).unwrap(), Some(json!("fresh")));
    }

    #[test]
    fn test_clear_advances_every_epoch() {
        let (_temp, _store, cache) = create_test_cache(16, 4);
        cache.invalidate("echo", None).unwrap();
        let echo_epoch = cache.epoch("echo");
        let shop_epoch = cache.epoch("shop");

        cache.clear().unwrap();
        assert_ne!(cache.epoch("echo"), echo_epoch);
        assert_ne!(cache.epoch("shop"), shop_epoch);
        let k = key("shop", Method::Ask, "ping");
        assert!(!cache.put_if_epoch(&k, &json!(1), HOUR, shop_epoch).unwrap());
    }

    /// Store whose bulk deletes always fail.
    struct FailingBulkDelete(SqliteStore);

    impl PersistentStore for FailingBulkDelete {
        fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
            self.0.get(key)
        }
        fn put(&self, entry: &StoredEntry) -> Result<()> {
            self.0.put(entry)
        }
        fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
            self.0.touch(key, now)
        }
        fn record_access(&self, key: &str, hit_count: u64, last_accessed: DateTime<Utc>) -> Result<()> {
            self.0.record_access(key, hit_count, last_accessed)
        }
        fn remove(&self, key: &str) -> Result<bool> {
            self.0.remove(key)
        }
        fn invalidate(&self, _capability: &str, _method: Option<Method>) -> Result<usize> {
            Err(LocusError::Database {
                message: "database is locked".into(),
                source: None,
            })
        }
        fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
            self.0.sweep_expired(now)
        }
        fn clear(&self) -> Result<usize> {
            Err(LocusError::Database {
                message: "database is locked".into(),
                source: None,
            })
        }
        fn len(&self) -> Result<usize> {
            self.0.len()
        }
    }

    #[test]
    fn test_failed_store_delete_leaves_ram_consistent() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(temp_dir.path().join("cache.sqlite")).unwrap();
        let cache = HybridCache::new(Arc::new(FailingBulkDelete(store)), 16, 4);
        let k = key("echo", Method::Ask, "ping");
        cache.put(&k, &json!("pong"), HOUR).unwrap();

        assert!(matches!(
            cache.invalidate("echo", None),
            Err(LocusError::Database { .. })
        ));
        assert!(cache.clear().is_err());
        assert_eq!(
            cache.lookup_entry(&k).unwrap().unwrap().tier,
            TierPresence::RamAndDb
        );
    }

    #[test]
    fn test_invalidate_is_atomic_with_concurrent_writers() {
        let (_temp, _store, cache) = create_test_cache(64, 4);
        let k = key("echo", Method::Ask, "shared");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let (cache, k) = (&cache, &k);
                scope.spawn(move || {
                    for _ in 0..50 {
                        let epoch = cache.epoch("echo");
                        cache
                            .put_if_epoch(k, &json!({ "epoch": epoch }), HOUR, epoch)
                            .unwrap();
                    }
                });
            }
            for _ in 0..8 {
                let (cache, k) = (&cache, &k);
                scope.spawn(move || {
                    for _ in 0..50 {
                        let floor = cache.epoch("echo");
                        if let Some(seen) = cache.get(k).unwrap() {
                            // Nothing written before the latest invalidation survives it.
                            assert!(seen["epoch"].as_u64().unwrap() >= floor);
                        }
                    }
                });
            }
            let cache = &cache;
            scope.spawn(move || {
                for _ in 0..50 {
                    cache.invalidate("echo", None).unwrap();
                }
            });
        });

        cache.invalidate("echo", None).unwrap();
        assert!(cache.lookup_entry(&k).unwrap().is_none());
        assert_eq!(cache.get(&k).unwrap(), None);
    }
}
