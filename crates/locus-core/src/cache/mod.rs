//! Hybrid RAM + SQLite result cache.
//!
//! - [`HybridCache`] is the two-tier store keyed by [`CacheKey`].
//! - [`PersistentStore`] is the durable tier; [`SqliteStore`] implements it.
//! - [`PolicyTable`] decides which calls are cached and what a `do` clears.

mod hybrid;
mod key;
mod policy;
mod ram;
mod sqlite;
mod traits;

pub use hybrid::HybridCache;
pub use key::{canonical_json, CacheKey};
pub use policy::{CachePolicy, InvalidationScope, PolicyTable};
pub use sqlite::SqliteStore;
pub use traits::{CacheEntry, CacheStats, PersistentStore, StoredEntry, TierPresence};
