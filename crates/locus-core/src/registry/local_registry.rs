//! Capability name → local instance table.

use crate::discovery::{Health, ServiceDescriptor};
use crate::service::SharedService;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

struct LocalEntry {
    descriptor: ServiceDescriptor,
    instance: SharedService,
}

/// Registry of services running in this process.
///
/// Every mutation bumps [`LocalRegistry::generation`], which lets callers
/// holding cached resolutions notice changes without subscribing.
#[derive(Default)]
pub struct LocalRegistry {
    entries: RwLock<HashMap<String, LocalEntry>>,
    generation: AtomicU64,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the LOCAL instance for `capability`.
    pub fn register(&self, capability: impl Into<String>, instance: SharedService) {
        let capability = capability.into();
        let mut entries = self.entries.write();
        let replaced = entries
            .insert(
                capability.clone(),
                LocalEntry {
                    descriptor: ServiceDescriptor::local(capability.clone(), Utc::now()),
                    instance,
                },
            )
            .is_some();
        self.generation.fetch_add(1, Ordering::SeqCst);
        drop(entries);

        if replaced {
            debug!(capability = %capability, "Replaced local service");
        } else {
            info!(capability = %capability, "Registered local service");
        }
    }

    /// Remove the LOCAL instance. Returns whether one was registered.
    pub fn unregister(&self, capability: &str) -> bool {
        let removed = self.entries.write().remove(capability).is_some();
        if removed {
            self.generation.fetch_add(1, Ordering::SeqCst);
            info!(capability = %capability, "Unregistered local service");
        }
        removed
    }

    /// The local instance, regardless of health.
    pub fn lookup_local(&self, capability: &str) -> Option<SharedService> {
        self.entries
            .read_recursive()
            .get(capability)
            .map(|e| e.instance.clone())
    }

    /// The local instance, only if it is HEALTHY.
    pub fn lookup_healthy(&self, capability: &str) -> Option<SharedService> {
        self.entries
            .read_recursive()
            .get(capability)
            .filter(|e| e.descriptor.is_healthy())
            .map(|e| e.instance.clone())
    }

    /// Change the health of a local descriptor. Returns whether it exists.
    pub fn set_health(&self, capability: &str, health: Health) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(capability) else {
            return false;
        };
        if entry.descriptor.health != health {
            entry.descriptor.health = health;
            self.generation.fetch_add(1, Ordering::SeqCst);
            debug!(capability = %capability, health = %health, "Local health changed");
        }
        true
    }

    pub fn descriptor(&self, capability: &str) -> Option<ServiceDescriptor> {
        self.entries
            .read_recursive()
            .get(capability)
            .map(|e| e.descriptor.clone())
    }

    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let mut all: Vec<ServiceDescriptor> = self
            .entries
            .read_recursive()
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.capability.cmp(&b.capability));
        all
    }

    /// Registered capability names, sorted.
    pub fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read_recursive().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
