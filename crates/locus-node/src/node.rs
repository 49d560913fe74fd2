//! Node assembly: discovery, cached locator, hosted capabilities.

use crate::echo::{EchoService, ECHO_CAPABILITY};
use anyhow::{Context, Result};
use locus_core::{
    CachedLocator, Discovery, DiscoveryMode, LocalOnlyDiscovery, LocusConfig, MulticastConfig,
    NetworkDiscovery, ServiceHost, ServiceHostHandle, SharedService, TaskHandle, ADMIN_CAPABILITY,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::info;

/// A running node. Dropping it stops every host and background task.
pub struct Node {
    pub locator: CachedLocator,
    pub discovery: Arc<dyn Discovery>,
    pub hosts: Vec<ServiceHostHandle>,
    _tasks: Vec<TaskHandle>,
}

impl Node {
    /// Port of the first hosted capability.
    pub fn primary_port(&self) -> Option<u16> {
        self.hosts.first().map(|h| h.port)
    }
}

pub async fn start_discovery(config: &LocusConfig) -> Result<(Arc<dyn Discovery>, Vec<TaskHandle>)> {
    match config.discovery.mode {
        DiscoveryMode::LocalOnly => {
            let local = Arc::new(LocalOnlyDiscovery::from_config(config));
            let sweeper = local.spawn_sweeper();
            let discovery: Arc<dyn Discovery> = local;
            Ok((discovery, vec![sweeper]))
        }
        DiscoveryMode::Network => {
            let discovery = NetworkDiscovery::start(MulticastConfig::from_config(config))
                .await
                .context("Failed to start multicast discovery")?;
            info!("Discovery instance {}", discovery.instance_id());
            let discovery: Arc<dyn Discovery> = Arc::new(discovery);
            Ok((discovery, Vec::new()))
        }
    }
}

/// Start discovery, the cached locator and one host per local capability.
///
/// `echo` is served on `port` (0 picks one); the admin surface always gets
/// an OS-assigned port.
pub async fn start(config: LocusConfig, host: IpAddr, port: u16) -> Result<Node> {
    config.validate()?;
    let (discovery, mut tasks) = start_discovery(&config).await?;

    let locator = CachedLocator::builder()
        .config(config.clone())
        .discovery(discovery.clone())
        .build()
        .context("Failed to build cached locator")?;
    tasks.push(locator.spawn_maintenance(config.sweep_interval()));

    let echo: SharedService = Arc::new(EchoService::new()?);
    let admin: SharedService = Arc::new(locator.admin()?);
    locator.registry().register(ECHO_CAPABILITY, echo.clone());
    locator.registry().register(ADMIN_CAPABILITY, admin.clone());

    let mut hosts = Vec::new();
    for (capability, service, port) in [(ECHO_CAPABILITY, echo, port), (ADMIN_CAPABILITY, admin, 0)] {
        let handle = ServiceHost::start(capability, service, SocketAddr::new(host, port)).await?;
        discovery.advertise(capability, handle.endpoint(&host.to_string()));
        hosts.push(handle);
    }

    Ok(Node {
        locator,
        discovery,
        hosts,
        _tasks: tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_core::{Kwargs, NetworkProxy, Service};
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> LocusConfig {
        let mut config = LocusConfig::default();
        config.cache.db_path = Some(temp_dir.path().join("cache.sqlite"));
        config
    }

    #[tokio::test]
    async fn test_node_serves_echo_and_admin() {
        let temp_dir = TempDir::new().unwrap();
        let node = start(test_config(&temp_dir), "127.0.0.1".parse().unwrap(), 0)
            .await
            .unwrap();
        assert_eq!(node.hosts.len(), 2);
        assert!(node.discovery.advertisements().contains(ECHO_CAPABILITY));

        let echo = NetworkProxy::connect(ECHO_CAPABILITY, node.hosts[0].endpoint("127.0.0.1")).unwrap();
        assert_eq!(echo.ask(json!("ping"), Kwargs::new()).await.unwrap(), json!("pong"));

        let admin = NetworkProxy::connect(ADMIN_CAPABILITY, node.hosts[1].endpoint("127.0.0.1")).unwrap();
        let services = admin.ask(json!("list services"), Kwargs::new()).await.unwrap();
        assert_eq!(services.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_local_calls_go_through_cache() {
        let temp_dir = TempDir::new().unwrap();
        let node = start(test_config(&temp_dir), "127.0.0.1".parse().unwrap(), 0)
            .await
            .unwrap();

        let echo = node.locator.get_service(ECHO_CAPABILITY, false).unwrap();
        echo.ask(json!("ping"), Kwargs::new()).await.unwrap();
        echo.ask(json!("ping"), Kwargs::new()).await.unwrap();
        let count = echo.perform("count", Kwargs::new()).await.unwrap();
        assert_eq!(count["asks"], json!(1));
    }
}
