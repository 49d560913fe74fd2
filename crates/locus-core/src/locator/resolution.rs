//! Short-lived memory of recent `get_service` results.

use crate::discovery::Endpoint;
use crate::service::{Kwargs, Service, SharedService};
use crate::Result;
use mini_moka::sync::Cache;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Where a resolved service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Local,
    Network(Endpoint),
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}

#[derive(Clone)]
pub(crate) struct Resolution {
    pub service: SharedService,
    pub origin: Origin,
    pub generation: u64,
}

/// Resolutions keyed by `(capability, prefer_network)`, expiring after the
/// grace period.
#[derive(Clone)]
pub(crate) struct ResolutionCache {
    entries: Cache<(String, bool), Resolution>,
}

impl ResolutionCache {
    pub fn new(grace: Duration, capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(grace)
                .max_capacity(capacity)
                .build(),
        }
    }

    /// A resolution made under the current registry `generation`.
    pub fn get(&self, capability: &str, prefer_network: bool, generation: u64) -> Option<Resolution> {
        let key = (capability.to_string(), prefer_network);
        let resolution = self.entries.get(&key)?;
        if resolution.generation != generation {
            self.entries.invalidate(&key);
            return None;
        }
        Some(resolution)
    }

    pub fn insert(&self, capability: &str, prefer_network: bool, resolution: Resolution) {
        self.entries
            .insert((capability.to_string(), prefer_network), resolution);
    }

    pub fn invalidate(&self, capability: &str) {
        self.entries.invalidate(&(capability.to_string(), false));
        self.entries.invalidate(&(capability.to_string(), true));
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

/// A service handle returned by the locator.
///
/// A connectivity failure through this handle drops the capability's cached
/// resolution, so the next `get_service` resolves again. The failing call
/// itself is not retried here.
#[derive(Clone)]
pub struct LocatedService {
    capability: String,
    service: SharedService,
    origin: Origin,
    resolutions: ResolutionCache,
}

impl LocatedService {
    pub(crate) fn new(capability: String, resolution: Resolution, resolutions: ResolutionCache) -> Self {
        Self {
            capability,
            service: resolution.service,
            origin: resolution.origin,
            resolutions,
        }
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_local(&self) -> bool {
        self.origin.is_local()
    }

    pub fn inner(&self) -> &SharedService {
        &self.service
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connectivity() {
                debug!(
                    capability = %self.capability,
                    "Dropping cached resolution after connectivity error: {}",
                    e
                );
                self.resolutions.invalidate(&self.capability);
            }
        }
        result
    }
}

impl std::fmt::Debug for LocatedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatedService")
            .field("capability", &self.capability)
            .field("origin", &self.origin)
            .finish()
    }
}

#[async_trait::async_trait]
impl Service for LocatedService {
    async fn ask(&self, query: Value, kwargs: Kwargs) -> Result<Value> {
        let result = self.service.ask(query, kwargs).await;
        self.observe(result)
    }

    async fn tell(&self, format: &str, data: Value, kwargs: Kwargs) -> Result<String> {
        let result = self.service.tell(format, data, kwargs).await;
        self.observe(result)
    }

    async fn perform(&self, action: &str, kwargs: Kwargs) -> Result<Value> {
        let result = self.service.perform(action, kwargs).await;
        self.observe(result)
    }
}
