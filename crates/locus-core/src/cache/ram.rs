//! RAM tier: fixed-capacity LRU shards.
//!
//! Each shard is an `IndexMap` kept in recency order; the front is the
//! least recently used entry.

use crate::service::Method;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RamEntry {
    pub capability: String,
    pub method: Method,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl RamEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub(crate) struct RamShard {
    entries: IndexMap<String, RamEntry>,
    capacity: usize,
}

impl RamShard {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Look up without touching recency or counters.
    pub fn peek(&self, key: &str) -> Option<&RamEntry> {
        self.entries.get(key)
    }

    /// Count a hit and mark the entry most recently used.
    pub fn touch(&mut self, key: &str, now: DateTime<Utc>) -> Option<&RamEntry> {
        let idx = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(idx, last);
        let (_, entry) = self.entries.get_index_mut(last)?;
        entry.hit_count += 1;
        entry.last_accessed = now;
        Some(entry)
    }

    /// Insert as most recently used. Returns the evicted LRU entry, if any.
    pub fn insert(&mut self, key: String, entry: RamEntry) -> Option<(String, RamEntry)> {
        if self.entries.contains_key(&key) {
            self.entries.shift_remove(&key);
            self.entries.insert(key, entry);
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0)
        } else {
            None
        };
        self.entries.insert(key, entry);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<RamEntry> {
        self.entries.shift_remove(key)
    }

    /// Drop entries matching `capability` (and `method`, if given).
    pub fn invalidate(&mut self, capability: &str, method: Option<Method>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            let matches = e.capability == capability && method.map_or(true, |m| m == e.method);
            !matches
        });
        before - self.entries.len()
    }

    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        before - self.entries.len()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
