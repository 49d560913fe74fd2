//! A located service wrapped with read-through caching.

use crate::cache::{CacheKey, HybridCache, InvalidationScope, PolicyTable};
use crate::locator::{LocatedService, Origin};
use crate::service::{Invocation, Kwargs, Method, Service};
use crate::tasks::run_blocking;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Service handle returned by [`super::CachedLocator::get_service`].
///
/// `ask` and `tell` are served from the cache when their policy allows it.
/// `do` calls through and then invalidates, unless the action is
/// whitelisted as a cacheable read.
#[derive(Clone)]
pub struct CachedService {
    inner: LocatedService,
    cache: Arc<HybridCache>,
    policies: Arc<PolicyTable>,
}

impl CachedService {
    pub(crate) fn new(inner: LocatedService, cache: Arc<HybridCache>, policies: Arc<PolicyTable>) -> Self {
        Self {
            inner,
            cache,
            policies,
        }
    }

    pub fn capability(&self) -> &str {
        self.inner.capability()
    }

    pub fn origin(&self) -> &Origin {
        self.inner.origin()
    }

    pub fn located(&self) -> &LocatedService {
        &self.inner
    }

    /// Serve from the cache, or call through and store the result.
    ///
    /// Cache failures degrade to a call-through; only the service's own
    /// errors are returned. Nothing is stored unless the call succeeded, and
    /// nothing is stored if the capability was invalidated meanwhile.
    async fn read_through(&self, invocation: Invocation, ttl: Duration) -> Result<Value> {
        let key = CacheKey::for_invocation(self.capability(), &invocation);
        let epoch = self.cache.epoch(self.capability());

        let cache = self.cache.clone();
        let lookup_key = key.clone();
        match run_blocking(move || cache.get(&lookup_key)).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => warn!(capability = %self.capability(), "Cache read failed: {}", e),
        }

        let value = invocation.dispatch(&self.inner).await?;

        let cache = self.cache.clone();
        let stored = value.clone();
        match run_blocking(move || cache.put_if_epoch(&key, &stored, ttl, epoch)).await {
            Ok(true) => {}
            Ok(false) => debug!(capability = %self.capability(), "Invalidated during call; not cached"),
            Err(e) => warn!(capability = %self.capability(), "Cache write failed: {}", e),
        }
        Ok(value)
    }

    async fn invalidate(&self, scope: InvalidationScope) {
        let cache = self.cache.clone();
        let capability = self.capability().to_string();
        let method = scope.method();
        match run_blocking(move || cache.invalidate(&capability, method)).await {
            Ok(n) => debug!(capability = %self.capability(), "do invalidated {} entries", n),
            Err(e) => warn!(capability = %self.capability(), "Cache invalidation failed: {}", e),
        }
    }
}

impl std::fmt::Debug for CachedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedService")
            .field("capability", &self.capability())
            .field("origin", self.origin())
            .finish()
    }
}

#[async_trait::async_trait]
impl Service for CachedService {
    async fn ask(&self, query: Value, kwargs: Kwargs) -> Result<Value> {
        let policy = self.policies.policy_for(self.capability(), Method::Ask);
        if !policy.enabled {
            return self.inner.ask(query, kwargs).await;
        }
        self.read_through(Invocation::Ask { query, kwargs }, policy.ttl)
            .await
    }

    async fn tell(&self, format: &str, data: Value, kwargs: Kwargs) -> Result<String> {
        let policy = self.policies.policy_for(self.capability(), Method::Tell);
        if !policy.enabled {
            return self.inner.tell(format, data, kwargs).await;
        }
        let invocation = Invocation::Tell {
            format: format.to_string(),
            data,
            kwargs,
        };
        Ok(match self.read_through(invocation, policy.ttl).await? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn perform(&self, action: &str, kwargs: Kwargs) -> Result<Value> {
        if let Some(policy) = self.policies.do_policy(self.capability(), action) {
            let invocation = Invocation::Do {
                action: action.to_string(),
                kwargs,
            };
            return self.read_through(invocation, policy.ttl).await;
        }

        let result = self.inner.perform(action, kwargs).await;
        // The action may have changed state even if it reported an error.
        let scope = self.policies.invalidation_for(self.capability(), action);
        self.invalidate(scope).await;
        result
    }
}
