//! Table of remote descriptors with heartbeat-driven liveness.
//!
//! # Thread Safety
//!
//! The table sits behind a `parking_lot::RwLock`. Readers take
//! `read_recursive`, so a queued writer (the sweeper or the listener) never
//! blocks resolution.

use super::descriptor::{Endpoint, Health, ServiceDescriptor, Transport};
use crate::config::{DiscoveryDefaults, LocusConfig};
use crate::network::{CircuitBreaker, CircuitBreakerConfig};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Heartbeat thresholds.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub heartbeat_interval: Duration,
    pub missed_heartbeats: u32,
    /// Extra time a STALE descriptor is kept before removal.
    pub removal_grace: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DiscoveryDefaults::HEARTBEAT_INTERVAL,
            missed_heartbeats: DiscoveryDefaults::MISSED_HEARTBEATS,
            removal_grace: DiscoveryDefaults::REMOVAL_GRACE,
        }
    }
}

impl LivenessConfig {
    pub fn from_config(config: &LocusConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            missed_heartbeats: config.discovery.missed_heartbeats,
            removal_grace: config.removal_grace(),
        }
    }

    /// Silence after which a descriptor is STALE.
    pub fn stale_after(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats
    }

    /// Silence after which a descriptor is removed.
    pub fn remove_after(&self) -> Duration {
        self.stale_after() + self.removal_grace
    }
}

/// A resolvable remote instance and the breaker guarding it.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub descriptor: ServiceDescriptor,
    pub breaker: Arc<CircuitBreaker>,
}

impl RemoteTarget {
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.descriptor.endpoint()
    }
}

#[derive(Debug, Clone)]
struct RemoteRecord {
    descriptor: ServiceDescriptor,
    breaker: Arc<CircuitBreaker>,
}

impl RemoteRecord {
    /// Health as observed now: STALE from the sweeper wins, then the breaker.
    fn observed(&self) -> ServiceDescriptor {
        let mut descriptor = self.descriptor.clone();
        if descriptor.health != Health::Stale {
            descriptor.health = self.breaker.health();
        }
        descriptor
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_stale: usize,
    pub removed: usize,
}

/// Remote descriptors keyed by capability.
#[derive(Debug)]
pub struct DescriptorTable {
    liveness: LivenessConfig,
    breaker_config: CircuitBreakerConfig,
    records: RwLock<HashMap<String, Vec<RemoteRecord>>>,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new(LivenessConfig::default(), CircuitBreakerConfig::default())
    }
}

impl DescriptorTable {
    pub fn new(liveness: LivenessConfig, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            liveness,
            breaker_config,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn liveness(&self) -> &LivenessConfig {
        &self.liveness
    }

    /// Insert or refresh a NETWORK descriptor.
    ///
    /// A descriptor for an endpoint already in the table keeps its
    /// `discovered_at` and breaker; the heartbeat is reset and STALE clears.
    pub fn upsert(&self, descriptor: ServiceDescriptor) {
        if descriptor.transport != Transport::Network {
            debug!(
                capability = %descriptor.capability,
                "Ignoring non-network descriptor"
            );
            return;
        }
        let Some(endpoint) = descriptor.endpoint().cloned() else {
            return;
        };

        let mut records = self.records.write();
        let entries = records.entry(descriptor.capability.clone()).or_default();

        if let Some(existing) = entries
            .iter_mut()
            .find(|r| r.descriptor.endpoint() == Some(&endpoint))
        {
            existing.descriptor.last_heartbeat = descriptor.last_heartbeat;
            existing.descriptor.instance_id = descriptor.instance_id;
            existing.descriptor.protocol_version = descriptor.protocol_version;
            existing.descriptor.health = Health::Healthy;
            return;
        }

        info!(
            capability = %descriptor.capability,
            endpoint = %endpoint,
            "Discovered remote instance"
        );
        let breaker = Arc::new(CircuitBreaker::with_config(
            endpoint.to_string(),
            self.breaker_config.clone(),
        ));
        let mut descriptor = descriptor;
        descriptor.health = Health::Healthy;
        entries.push(RemoteRecord {
            descriptor,
            breaker,
        });
    }

    /// Healthy remote instances, most recently seen first.
    ///
    /// STALE descriptors and those whose breaker refuses calls are skipped.
    pub fn resolve(&self, capability: &str) -> Vec<RemoteTarget> {
        let records = self.records.read_recursive();
        let Some(entries) = records.get(capability) else {
            return Vec::new();
        };

        let mut targets: Vec<RemoteTarget> = entries
            .iter()
            .filter(|r| r.descriptor.health != Health::Stale && r.breaker.is_available())
            .map(|r| RemoteTarget {
                descriptor: r.observed(),
                breaker: r.breaker.clone(),
            })
            .collect();
        targets.sort_by(|a, b| b.descriptor.last_heartbeat.cmp(&a.descriptor.last_heartbeat));
        targets
    }

    /// Every descriptor with its observed health.
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let records = self.records.read_recursive();
        let mut all: Vec<ServiceDescriptor> = records
            .values()
            .flat_map(|entries| entries.iter().map(RemoteRecord::observed))
            .collect();
        all.sort_by(|a, b| {
            a.capability
                .cmp(&b.capability)
                .then(b.last_heartbeat.cmp(&a.last_heartbeat))
        });
        all
    }

    /// Breaker for an endpoint serving `capability`, if known.
    pub fn breaker(&self, capability: &str, endpoint: &Endpoint) -> Option<Arc<CircuitBreaker>> {
        let records = self.records.read_recursive();
        records.get(capability).and_then(|entries| {
            entries
                .iter()
                .find(|r| r.descriptor.endpoint() == Some(endpoint))
                .map(|r| r.breaker.clone())
        })
    }

    /// Mark silent descriptors STALE and drop those past the grace period.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let stale_after = to_chrono(self.liveness.stale_after());
        let remove_after = to_chrono(self.liveness.remove_after());

        let mut report = SweepReport::default();
        let mut records = self.records.write();
        for (capability, entries) in records.iter_mut() {
            entries.retain_mut(|record| {
                let silence = now - record.descriptor.last_heartbeat;
                if silence > remove_after {
                    info!(
                        capability = %capability,
                        endpoint = ?record.descriptor.endpoint(),
                        "Removing remote instance after grace period"
                    );
                    report.removed += 1;
                    return false;
                }
                if silence > stale_after && record.descriptor.health != Health::Stale {
                    debug!(
                        capability = %capability,
                        endpoint = ?record.descriptor.endpoint(),
                        "Remote instance missed heartbeats, marking STALE"
                    );
                    record.descriptor.health = Health::Stale;
                    report.marked_stale += 1;
                }
                true
            });
        }
        records.retain(|_, entries| !entries.is_empty());
        report
    }

    pub fn remove_capability(&self, capability: &str) -> usize {
        self.records
            .write()
            .remove(capability)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.read_recursive().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn remote(capability: &str, port: u16, at: DateTime<Utc>) -> ServiceDescriptor {
        ServiceDescriptor::network(capability, Endpoint::new("10.0.0.5", port), None, at)
    }

    #[test]
    fn test_resolve_orders_most_recent_first() {
        let table = DescriptorTable::default();
        let t0 = Utc::now();
        table.upsert(remote("echo", 9001, t0));
        table.upsert(remote("echo", 9002, t0 + ChronoDuration::seconds(1)));

        let targets = table.resolve("echo");
        let ports: Vec<u16> = targets.iter().map(|t| t.endpoint().unwrap().port).collect();
        assert_eq!(ports, vec![9002, 9001]);
        assert!(table.resolve("chat").is_empty());
    }

    #[test]
    fn test_upsert_refreshes_heartbeat_and_keeps_discovery_time() {
        let table = DescriptorTable::default();
        let t0 = Utc::now();
        table.upsert(remote("echo", 9001, t0));
        table.upsert(remote("echo", 9001, t0 + ChronoDuration::seconds(4)));

        let all = table.descriptors();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].discovered_at, t0);
        assert_eq!(all[0].last_heartbeat, t0 + ChronoDuration::seconds(4));
    }

    #[test]
    fn test_local_descriptors_ignored() {
        let table = DescriptorTable::default();
        table.upsert(ServiceDescriptor::local("echo", Utc::now()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_sweep_marks_stale_then_removes() {
        let table = DescriptorTable::default();
        let t0 = Utc::now();
        table.upsert(remote("echo", 9001, t0));

        // 3 missed 2s heartbeats
        let report = table.sweep_at(t0 + ChronoDuration::seconds(5));
        assert_eq!(report, SweepReport::default());

        let report = table.sweep_at(t0 + ChronoDuration::seconds(7));
        assert_eq!(report.marked_stale, 1);
        assert!(table.resolve("echo").is_empty());
        assert_eq!(table.descriptors()[0].health, Health::Stale);

        let report = table.sweep_at(t0 + ChronoDuration::seconds(17));
        assert_eq!(report.removed, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_heartbeat_revives_stale() {
        let table = DescriptorTable::default();
        let t0 = Utc::now();
        table.upsert(remote("echo", 9001, t0));
        table.sweep_at(t0 + ChronoDuration::seconds(7));
        assert!(table.resolve("echo").is_empty());

        table.upsert(remote("echo", 9001, t0 + ChronoDuration::seconds(8)));
        assert_eq!(table.resolve("echo").len(), 1);
    }

    #[test]
    fn test_open_breaker_skipped_by_resolution() {
        let table = DescriptorTable::default();
        let endpoint = Endpoint::new("10.0.0.5", 9001);
        table.upsert(remote("echo", 9001, Utc::now()));
        table.upsert(remote("echo", 9002, Utc::now()));

        let breaker = table.breaker("echo", &endpoint).unwrap();
        for _ in 0..5 {
            breaker.record_failure();
        }

        let targets = table.resolve("echo");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].endpoint().unwrap().port, 9002);

        let degraded = table
            .descriptors()
            .into_iter()
            .find(|d| d.endpoint() == Some(&endpoint))
            .unwrap();
        assert_eq!(degraded.health, Health::Degraded);
    }

    #[test]
    fn test_remove_capability() {
        let table = DescriptorTable::default();
        table.upsert(remote("echo", 9001, Utc::now()));
        table.upsert(remote("chat", 9002, Utc::now()));
        assert_eq!(table.remove_capability("echo"), 1);
        assert_eq!(table.len(), 1);
    }
}
