//! Persistent tier trait and cache types.

use crate::error::Result;
use crate::service::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row in the persistent tier. The value is JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: String,
    pub capability: String,
    pub method: Method,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl StoredEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable storage behind the RAM tier.
///
/// All operations are synchronous to match rusqlite's API; async callers
/// go through `spawn_blocking`.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Insert or replace. Concurrent writers resolve last-write-wins.
    fn put(&self, entry: &StoredEntry) -> Result<()>;

    /// Count one hit.
    fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<()>;

    /// Overwrite access counters, used when RAM hands an entry back.
    fn record_access(&self, key: &str, hit_count: u64, last_accessed: DateTime<Utc>) -> Result<()>;

    fn remove(&self, key: &str) -> Result<bool>;

    /// Delete every entry for `capability`, optionally only one method.
    fn invalidate(&self, capability: &str, method: Option<Method>) -> Result<usize>;

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    fn clear(&self) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Which tiers currently hold an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPresence {
    RamOnly,
    RamAndDb,
    DbOnly,
}

/// A cache entry as seen through both tiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub capability: String,
    pub method: Method,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub tier: TierPresence,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Counters for both tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub ram_hits: u64,
    pub ram_misses: u64,
    pub db_hits: u64,
    pub db_misses: u64,
    pub expired: u64,
    pub evictions: u64,
    pub deserialization_failures: u64,
    pub ram_entries: usize,
    pub db_entries: usize,
    pub ram_capacity: usize,
    /// Fraction of lookups served from either tier.
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn total_lookups(&self) -> u64 {
        self.ram_hits + self.ram_misses
    }

    pub fn total_hits(&self) -> u64 {
        self.ram_hits + self.db_hits
    }
}
