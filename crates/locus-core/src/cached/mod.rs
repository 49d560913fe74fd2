//! Caching layer over the service locator.
//!
//! [`CachedLocator`] resolves capabilities through a [`ServiceLocator`] and
//! wraps the result in a [`CachedService`], which consults the
//! [`PolicyTable`] and the [`HybridCache`] on every call.

mod admin;
mod builder;
mod service;

pub use admin::{LocatorAdmin, ADMIN_CAPABILITY};
pub use builder::CachedLocatorBuilder;
pub use service::CachedService;

use crate::cache::{CachePolicy, CacheStats, HybridCache, InvalidationScope, PolicyTable};
use crate::locator::ServiceLocator;
use crate::registry::LocalRegistry;
use crate::service::Method;
use crate::tasks::{run_blocking, TaskHandle};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Service locator with read-through result caching.
#[derive(Debug, Clone)]
pub struct CachedLocator {
    locator: Arc<ServiceLocator>,
    cache: Arc<HybridCache>,
    policies: Arc<PolicyTable>,
}

impl CachedLocator {
    pub fn builder() -> CachedLocatorBuilder {
        CachedLocatorBuilder::new()
    }

    /// The admin capability always answers live: its `ask` and `tell` are
    /// never cached.
    pub fn new(locator: Arc<ServiceLocator>, cache: Arc<HybridCache>, policies: Arc<PolicyTable>) -> Self {
        for method in [Method::Ask, Method::Tell] {
            policies.set_policy(ADMIN_CAPABILITY, method, CachePolicy::disabled());
        }
        Self {
            locator,
            cache,
            policies,
        }
    }

    /// Resolve `capability` and wrap it with caching.
    pub fn get_service(&self, capability: &str, prefer_network: bool) -> Result<CachedService> {
        let located = self.locator.get_service(capability, prefer_network)?;
        Ok(CachedService::new(
            located,
            self.cache.clone(),
            self.policies.clone(),
        ))
    }

    pub fn locator(&self) -> &Arc<ServiceLocator> {
        &self.locator
    }

    pub fn registry(&self) -> &Arc<LocalRegistry> {
        self.locator.registry()
    }

    pub fn cache(&self) -> &Arc<HybridCache> {
        &self.cache
    }

    pub fn policies(&self) -> &Arc<PolicyTable> {
        &self.policies
    }

    pub fn set_policy(&self, capability: &str, method: Method, policy: CachePolicy) {
        self.policies.set_policy(capability, method, policy);
    }

    /// Narrow what `do` actions matching `phrase` invalidate.
    pub fn set_invalidation(&self, capability: &str, phrase: &str, scope: InvalidationScope) -> Result<()> {
        self.policies.set_invalidation(capability, phrase, scope)
    }

    /// Cache `do` actions matching `phrase` like reads.
    pub fn allow_do_caching(&self, capability: &str, phrase: &str, ttl: Duration) -> Result<()> {
        self.policies.allow_do_caching(capability, phrase, ttl)
    }

    /// Start the background expiry sweeper.
    pub fn spawn_maintenance(&self, period: Duration) -> TaskHandle {
        self.cache.spawn_sweeper(period)
    }

    /// The management surface as a service.
    pub fn admin(&self) -> Result<LocatorAdmin> {
        LocatorAdmin::new(
            self.locator.clone(),
            self.cache.clone(),
            self.policies.clone(),
        )
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let cache = self.cache.clone();
        run_blocking(move || cache.stats()).await
    }

    /// Drop cached results for `capability`, optionally one method only.
    pub async fn invalidate(&self, capability: &str, method: Option<Method>) -> Result<usize> {
        let cache = self.cache.clone();
        let capability = capability.to_string();
        run_blocking(move || cache.invalidate(&capability, method)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteStore;
    use crate::service::{Kwargs, Service};
    use crate::LocusError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts calls; `ask` returns the call number.
    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Service for Counter {
        async fn ask(&self, _query: Value, _kwargs: Kwargs) -> Result<Value> {
            Ok(json!(self.calls.fetch_add(1, Ordering::SeqCst) + 1))
        }
        async fn tell(&self, format: &str, data: Value, _kwargs: Kwargs) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}:{}", format, data))
        }
        async fn perform(&self, action: &str, _kwargs: Kwargs) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if action == "explode" {
                return Err(LocusError::Other("boom".into()));
            }
            Ok(json!(action))
        }
    }

    fn create_test_locator() -> (TempDir, Arc<Counter>, CachedLocator) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(temp_dir.path().join("cache.sqlite")).unwrap());
        let locator = CachedLocator::builder().store(store).build().unwrap();
        let counter = Arc::new(Counter::default());
        locator.registry().register("count", counter.clone());
        (temp_dir, counter, locator)
    }

    fn calls(counter: &Counter) -> usize {
        counter.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_ask_is_cached() {
        let (_temp, counter, locator) = create_test_locator();
        let svc = locator.get_service("count", false).unwrap();

        for _ in 0..3 {
            assert_eq!(svc.ask(json!("n"), Kwargs::new()).await.unwrap(), json!(1));
        }
        assert_eq!(calls(&counter), 1);
        assert_eq!(locator.stats().await.unwrap().ram_hits, 2);
    }

    #[tokio::test]
    async fn test_tell_is_cached_as_string() {
        let (_temp, counter, locator) = create_test_locator();
        let svc = locator.get_service("count", false).unwrap();

        let first = svc.tell("text", json!({"a": 1}), Kwargs::new()).await.unwrap();
        let second = svc.tell("text", json!({"a": 1}), Kwargs::new()).await.unwrap();
        assert_eq!(first, r#"text:{"a":1}"#);
        assert_eq!(first, second);
        assert_eq!(calls(&counter), 1);
    }

    #[tokio::test]
    async fn test_do_invalidates_even_on_error() {
        let (_temp, counter, locator) = create_test_locator();
        let svc = locator.get_service("count", false).unwrap();

        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        assert!(svc.perform("explode", Kwargs::new()).await.is_err());
        assert_eq!(svc.ask(json!("n"), Kwargs::new()).await.unwrap(), json!(3));
        assert_eq!(calls(&counter), 3);
    }

    #[tokio::test]
    async fn test_do_narrow_invalidation() {
        let (_temp, counter, locator) = create_test_locator();
        locator
            .set_invalidation("count", "reformat", InvalidationScope::Method(Method::Tell))
            .unwrap();
        let svc = locator.get_service("count", false).unwrap();

        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        svc.perform("reformat", Kwargs::new()).await.unwrap();
        assert_eq!(svc.ask(json!("n"), Kwargs::new()).await.unwrap(), json!(1));
        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test]
    async fn test_whitelisted_do_is_cached() {
        let (_temp, counter, locator) = create_test_locator();
        locator
            .allow_do_caching("count", "compute total", Duration::from_secs(60))
            .unwrap();
        let svc = locator.get_service("count", false).unwrap();

        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        svc.perform("compute total", Kwargs::new()).await.unwrap();
        svc.perform("compute total", Kwargs::new()).await.unwrap();
        // Whitelisted actions do not invalidate.
        assert_eq!(svc.ask(json!("n"), Kwargs::new()).await.unwrap(), json!(1));
        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test]
    async fn test_disabled_policy_calls_through() {
        let (_temp, counter, locator) = create_test_locator();
        locator.set_policy("count", Method::Ask, CachePolicy::disabled());
        let svc = locator.get_service("count", false).unwrap();

        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test]
    async fn test_admin_surface() {
        let (_temp, counter, locator) = create_test_locator();
        let admin = locator.admin().unwrap();
        let svc = locator.get_service("count", false).unwrap();
        svc.ask(json!("n"), Kwargs::new()).await.unwrap();

        let stats = admin.ask(json!("cache stats"), Kwargs::new()).await.unwrap();
        assert_eq!(stats["db_entries"], json!(1));

        let mut kwargs = Kwargs::new();
        kwargs.insert("service".into(), json!("count"));
        let cleared = admin.perform("clear cache", kwargs).await.unwrap();
        assert_eq!(cleared["cleared"], json!(1));
        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        assert_eq!(calls(&counter), 2);

        admin.perform("disable caching", Kwargs::new()).await.unwrap();
        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        assert_eq!(calls(&counter), 3);
        admin.perform("enable caching", Kwargs::new()).await.unwrap();

        let text = admin.tell("text", json!("clear cache all"), Kwargs::new()).await.unwrap();
        assert!(text.starts_with("cleared: "));

        let err = admin.ask(json!("make coffee"), Kwargs::new()).await.unwrap_err();
        assert!(matches!(err, LocusError::UnknownIntent { .. }));
        let err = admin.perform("clear cache", Kwargs::new()).await.unwrap_err();
        assert!(matches!(err, LocusError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_admin_capability_is_never_cached() {
        let (_temp, _counter, locator) = create_test_locator();
        locator
            .registry()
            .register(ADMIN_CAPABILITY, Arc::new(locator.admin().unwrap()));
        let admin = locator.get_service(ADMIN_CAPABILITY, false).unwrap();
        let svc = locator.get_service("count", false).unwrap();

        let before = admin.ask(json!("cache stats"), Kwargs::new()).await.unwrap();
        assert_eq!(before["db_entries"], json!(0));
        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        let after = admin.ask(json!("cache stats"), Kwargs::new()).await.unwrap();
        assert_eq!(after["db_entries"], json!(1));

        let first = admin.ask(json!("clear cache all"), Kwargs::new()).await.unwrap();
        assert_eq!(first["cleared"], json!(1));
        svc.ask(json!("n"), Kwargs::new()).await.unwrap();
        let second = admin.ask(json!("clear cache all"), Kwargs::new()).await.unwrap();
        assert_eq!(second["cleared"], json!(1));
        assert_eq!(locator.stats().await.unwrap().db_entries, 0);
    }

    /// `ask` is slow and returns the current version; any `do` bumps it.
    #[derive(Default)]
    struct SlowVersioned {
        version: AtomicUsize,
        asks: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Service for SlowVersioned {
        async fn ask(&self, _query: Value, _kwargs: Kwargs) -> Result<Value> {
            self.asks.fetch_add(1, Ordering::SeqCst);
            let version = self.version.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(json!(version))
        }
        async fn tell(&self, _format: &str, data: Value, _kwargs: Kwargs) -> Result<String> {
            Ok(data.to_string())
        }
        async fn perform(&self, _action: &str, _kwargs: Kwargs) -> Result<Value> {
            Ok(json!(self.version.fetch_add(1, Ordering::SeqCst) + 1))
        }
    }

    #[tokio::test]
    async fn test_ask_in_flight_during_do_is_not_cached() {
        let (_temp, _counter, locator) = create_test_locator();
        let versioned = Arc::new(SlowVersioned::default());
        locator.registry().register("versioned", versioned.clone());
        let svc = locator.get_service("versioned", false).unwrap();

        let (in_flight, bumped) = tokio::join!(svc.ask(json!("v"), Kwargs::new()), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            svc.perform("bump", Kwargs::new()).await
        });
        assert_eq!(in_flight.unwrap(), json!(0));
        assert_eq!(bumped.unwrap(), json!(1));

        let after_do = svc.ask(json!("v"), Kwargs::new()).await.unwrap();
        assert_eq!(after_do, json!(1));
        assert_eq!(versioned.asks.load(Ordering::SeqCst), 2);
    }
}
