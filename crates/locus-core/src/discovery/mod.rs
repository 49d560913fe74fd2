//! Discovery of remote capability instances.
//!
//! A [`Discovery`] implementation advertises the capabilities this node
//! serves and keeps a [`DescriptorTable`] of instances other nodes announce.
//!
//! - [`LocalOnlyDiscovery`]: no sockets; remote descriptors arrive only
//!   through [`Discovery::on_remote_seen`].
//! - [`NetworkDiscovery`]: UDP multicast announcements and a listener.

mod announcement;
mod descriptor;
mod local_only;
mod multicast;
mod table;

pub use announcement::Announcement;
pub use descriptor::{Endpoint, Health, ServiceDescriptor, ServiceRef, Transport};
pub use local_only::LocalOnlyDiscovery;
pub use multicast::{DatagramOutcome, MulticastConfig, NetworkDiscovery};
pub use table::{DescriptorTable, LivenessConfig, RemoteTarget, SweepReport};

use crate::config::DiscoveryMode;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Capabilities this node advertises, with the endpoint each is served on.
#[derive(Debug, Default)]
pub struct Advertisements {
    entries: RwLock<BTreeMap<String, Endpoint>>,
}

impl Advertisements {
    pub fn insert(&self, capability: &str, endpoint: Endpoint) {
        self.entries
            .write()
            .insert(capability.to_string(), endpoint);
    }

    pub fn remove(&self, capability: &str) -> bool {
        self.entries.write().remove(capability).is_some()
    }

    pub fn snapshot(&self) -> Vec<(String, Endpoint)> {
        self.entries
            .read_recursive()
            .iter()
            .map(|(c, e)| (c.clone(), e.clone()))
            .collect()
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.entries.read_recursive().contains_key(capability)
    }
}

/// Advertises local capabilities and tracks remote ones.
pub trait Discovery: Send + Sync {
    fn mode(&self) -> DiscoveryMode;

    fn table(&self) -> &DescriptorTable;

    fn advertisements(&self) -> &Advertisements;

    /// Start announcing `capability` as served on `endpoint`.
    fn advertise(&self, capability: &str, endpoint: Endpoint) {
        info!(capability = %capability, endpoint = %endpoint, "Advertising capability");
        self.advertisements().insert(capability, endpoint);
    }

    /// Stop announcing `capability`. Returns whether it was advertised.
    fn withdraw(&self, capability: &str) -> bool {
        let removed = self.advertisements().remove(capability);
        if removed {
            debug!(capability = %capability, "Withdrew capability");
        }
        removed
    }

    /// Record an announcement; resets the descriptor's heartbeat timer.
    fn on_remote_seen(&self, descriptor: ServiceDescriptor) {
        self.table().upsert(descriptor);
    }

    /// Healthy NETWORK instances of `capability`, most recently seen first.
    fn resolve_remote(&self, capability: &str) -> Vec<RemoteTarget> {
        self.table().resolve(capability)
    }

    fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.table().sweep_at(now)
    }

    fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.table().descriptors()
    }
}
