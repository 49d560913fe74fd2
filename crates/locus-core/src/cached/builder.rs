//! Builder for assembling a [`CachedLocator`].

use super::CachedLocator;
use crate::cache::{HybridCache, PersistentStore, PolicyTable, SqliteStore};
use crate::config::LocusConfig;
use crate::discovery::{Discovery, LocalOnlyDiscovery};
use crate::locator::ServiceLocator;
use crate::registry::LocalRegistry;
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Builder for configuring a [`CachedLocator`].
///
/// Every component is injected; anything not supplied is created from the
/// configuration.
///
/// # Example
///
/// ```rust,ignore
/// use locus_core::CachedLocator;
///
/// let locator = CachedLocator::builder()
///     .db_path("/var/lib/locus/cache.sqlite")
///     .registry(registry.clone())
///     .build()?;
/// ```
#[derive(Default)]
pub struct CachedLocatorBuilder {
    config: LocusConfig,
    registry: Option<Arc<LocalRegistry>>,
    discovery: Option<Arc<dyn Discovery>>,
    store: Option<Arc<dyn PersistentStore>>,
    db_path: Option<PathBuf>,
}

impl CachedLocatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for every component the builder creates.
    ///
    /// Default: [`LocusConfig::default`]
    pub fn config(mut self, config: LocusConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing registry.
    ///
    /// Default: a new, empty registry.
    pub fn registry(mut self, registry: Arc<LocalRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Discovery implementation to resolve remote instances through.
    ///
    /// Default: [`LocalOnlyDiscovery`] built from the config.
    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Persistent tier. Takes precedence over [`Self::db_path`].
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// SQLite file for the persistent tier.
    ///
    /// Default: `cache.db_path` from the config, else the platform data
    /// directory.
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<CachedLocator> {
        let config = self.config;
        config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(LocalRegistry::new()));
        let discovery: Arc<dyn Discovery> = match self.discovery {
            Some(d) => d,
            None => Arc::new(LocalOnlyDiscovery::from_config(&config)),
        };
        let store: Arc<dyn PersistentStore> = match self.store {
            Some(store) => store,
            None => {
                let path = match self.db_path {
                    Some(p) => p,
                    None => config.cache.resolved_db_path()?,
                };
                info!("Opening cache database at {}", path.display());
                Arc::new(SqliteStore::open_with(&path, config.cache.db_pool_size)?)
            }
        };

        let locator = Arc::new(ServiceLocator::from_config(registry, discovery, &config)?);
        let cache = Arc::new(HybridCache::new(
            store,
            config.cache.ram_capacity,
            config.cache.ram_shards,
        ));
        let policies = Arc::new(PolicyTable::from_settings(&config.cache));

        Ok(CachedLocator::new(locator, cache, policies))
    }
}
