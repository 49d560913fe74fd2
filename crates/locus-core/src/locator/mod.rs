//! Capability resolution.
//!
//! [`ServiceLocator::get_service`] turns a capability name into a callable
//! handle: the healthy local instance, or a [`NetworkProxy`] to the most
//! recently seen healthy remote instance. Which side is tried first depends
//! on `prefer_network`.
//!
//! Results are remembered for a short grace period. A cached resolution is
//! dropped early when the registry changes or when a call through it fails
//! to reach its endpoint.

mod resolution;

pub use resolution::{LocatedService, Origin};

use crate::config::{LocatorDefaults, LocusConfig};
use crate::discovery::{Discovery, ServiceDescriptor};
use crate::network::{build_client, NetworkProxy, ProxySettings};
use crate::registry::LocalRegistry;
use crate::service::SharedService;
use crate::{LocusError, Result};
use reqwest::Client;
use resolution::{Resolution, ResolutionCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolves capabilities against the local registry and discovery.
pub struct ServiceLocator {
    registry: Arc<LocalRegistry>,
    discovery: Arc<dyn Discovery>,
    client: Client,
    proxy_settings: ProxySettings,
    resolutions: ResolutionCache,
}

impl ServiceLocator {
    pub fn new(registry: Arc<LocalRegistry>, discovery: Arc<dyn Discovery>) -> Result<Self> {
        Ok(Self::with_settings(
            registry,
            discovery,
            build_client()?,
            ProxySettings::default(),
            LocatorDefaults::RESOLUTION_GRACE,
        ))
    }

    pub fn from_config(
        registry: Arc<LocalRegistry>,
        discovery: Arc<dyn Discovery>,
        config: &LocusConfig,
    ) -> Result<Self> {
        Ok(Self::with_settings(
            registry,
            discovery,
            build_client()?,
            ProxySettings::from_config(config),
            config.resolution_grace(),
        ))
    }

    pub fn with_settings(
        registry: Arc<LocalRegistry>,
        discovery: Arc<dyn Discovery>,
        client: Client,
        proxy_settings: ProxySettings,
        grace: Duration,
    ) -> Self {
        Self {
            registry,
            discovery,
            client,
            proxy_settings,
            resolutions: ResolutionCache::new(grace, LocatorDefaults::RESOLUTION_CACHE_CAPACITY),
        }
    }

    pub fn registry(&self) -> &Arc<LocalRegistry> {
        &self.registry
    }

    pub fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    /// Resolve `capability`.
    ///
    /// Without `prefer_network`: healthy local instance, then the first
    /// healthy remote. With it, the reverse. Fails with
    /// [`LocusError::ServiceUnavailable`] when neither exists.
    pub fn get_service(&self, capability: &str, prefer_network: bool) -> Result<LocatedService> {
        let generation = self.registry.generation();
        if let Some(resolution) = self.resolutions.get(capability, prefer_network, generation) {
            return Ok(LocatedService::new(
                capability.to_string(),
                resolution,
                self.resolutions.clone(),
            ));
        }

        let resolution = if prefer_network {
            match self.resolve_network(capability, generation) {
                Some(r) => Some(r),
                None => self.resolve_local(capability, generation),
            }
        } else {
            match self.resolve_local(capability, generation) {
                Some(r) => Some(r),
                None => self.resolve_network(capability, generation),
            }
        };

        let Some(resolution) = resolution else {
            debug!(capability = %capability, "No local or healthy network instance");
            return Err(LocusError::ServiceUnavailable {
                capability: capability.to_string(),
            });
        };

        debug!(
            capability = %capability,
            origin = ?resolution.origin,
            "Resolved service"
        );
        self.resolutions
            .insert(capability, prefer_network, resolution.clone());
        Ok(LocatedService::new(
            capability.to_string(),
            resolution,
            self.resolutions.clone(),
        ))
    }

    fn resolve_local(&self, capability: &str, generation: u64) -> Option<Resolution> {
        self.registry
            .lookup_healthy(capability)
            .map(|service| Resolution {
                service,
                origin: Origin::Local,
                generation,
            })
    }

    fn resolve_network(&self, capability: &str, generation: u64) -> Option<Resolution> {
        for target in self.discovery.resolve_remote(capability) {
            match NetworkProxy::for_target(&target, self.client.clone(), self.proxy_settings.clone()) {
                Ok(proxy) => {
                    let origin = Origin::Network(proxy.endpoint().clone());
                    let service: SharedService = Arc::new(proxy);
                    return Some(Resolution {
                        service,
                        origin,
                        generation,
                    });
                }
                Err(e) => warn!(capability = %capability, "Skipping remote instance: {}", e),
            }
        }
        None
    }

    /// Local descriptors followed by the discovery table.
    pub fn list_services(&self) -> Vec<ServiceDescriptor> {
        let mut services = self.registry.descriptors();
        services.extend(self.discovery.descriptors());
        services
    }

    /// Forget the cached resolution of one capability.
    pub fn invalidate(&self, capability: &str) {
        self.resolutions.invalidate(capability);
    }

    pub fn clear_resolutions(&self) {
        self.resolutions.clear();
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("local", &self.registry.len())
            .field("discovery", &self.discovery.mode())
            .finish()
    }
}
