use super::{Advertisements, DescriptorTable, Discovery, LivenessConfig};
use crate::config::{DiscoveryMode, LocusConfig};
use crate::network::CircuitBreakerConfig;
use crate::tasks::TaskHandle;
use std::sync::Arc;
use tracing::debug;

/// Socket-free discovery for single-process operation and tests.
#[derive(Debug, Default)]
pub struct LocalOnlyDiscovery {
    table: DescriptorTable,
    advertisements: Advertisements,
}

impl LocalOnlyDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_liveness(liveness: LivenessConfig, breaker: CircuitBreakerConfig) -> Self {
        Self {
            table: DescriptorTable::new(liveness, breaker),
            advertisements: Advertisements::default(),
        }
    }

    pub fn from_config(config: &LocusConfig) -> Self {
        Self::with_liveness(
            LivenessConfig::from_config(config),
            CircuitBreakerConfig {
                failure_threshold: config.network.failure_threshold,
                cooldown: std::time::Duration::from_secs(config.network.cooldown_secs),
            },
        )
    }

    /// Run `sweep` every heartbeat interval.
    pub fn spawn_sweeper(self: &Arc<Self>) -> TaskHandle {
        let discovery = Arc::clone(self);
        let period = self.table.liveness().heartbeat_interval;
        TaskHandle::spawn_interval("discovery-sweeper", period, move || {
            let discovery = discovery.clone();
            async move {
                let report = discovery.sweep();
                if report.removed > 0 || report.marked_stale > 0 {
                    debug!(
                        "Discovery sweep: {} stale, {} removed",
                        report.marked_stale, report.removed
                    );
                }
            }
        })
    }
}

impl Discovery for LocalOnlyDiscovery {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::LocalOnly
    }

    fn table(&self) -> &DescriptorTable {
        &self.table
    }

    fn advertisements(&self) -> &Advertisements {
        &self.advertisements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Endpoint, Health, ServiceDescriptor};
    use chrono::{Duration, Utc};

    #[test]
    fn test_advertise_and_withdraw() {
        let discovery = LocalOnlyDiscovery::new();
        discovery.advertise("echo", Endpoint::new("127.0.0.1", 9000));
        assert!(discovery.advertisements().contains("echo"));
        assert!(discovery.withdraw("echo"));
        assert!(!discovery.withdraw("echo"));
        assert_eq!(discovery.mode(), DiscoveryMode::LocalOnly);
    }

    #[test]
    fn test_remote_seen_then_swept() {
        let discovery = LocalOnlyDiscovery::new();
        let t0 = Utc::now();
        discovery.on_remote_seen(ServiceDescriptor::network(
            "echo",
            Endpoint::new("10.0.0.7", 9100),
            None,
            t0,
        ));
        assert_eq!(discovery.resolve_remote("echo").len(), 1);

        discovery.sweep_at(t0 + Duration::seconds(7));
        assert!(discovery.resolve_remote("echo").is_empty());
        assert_eq!(discovery.descriptors()[0].health, Health::Stale);

        discovery.sweep_at(t0 + Duration::seconds(30));
        assert!(discovery.descriptors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_removes_silent_descriptors() {
        let liveness = LivenessConfig {
            heartbeat_interval: std::time::Duration::from_millis(100),
            missed_heartbeats: 1,
            removal_grace: std::time::Duration::ZERO,
        };
        let discovery = Arc::new(LocalOnlyDiscovery::with_liveness(
            liveness,
            CircuitBreakerConfig::default(),
        ));
        discovery.on_remote_seen(ServiceDescriptor::network(
            "echo",
            Endpoint::new("10.0.0.7", 9100),
            None,
            Utc::now() - Duration::seconds(1),
        ));

        let sweeper = discovery.spawn_sweeper();
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(discovery.descriptors().is_empty());
        sweeper.shutdown().await;
    }
}
