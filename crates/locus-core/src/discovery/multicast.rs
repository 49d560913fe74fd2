//! UDP multicast discovery.
//!
//! Every heartbeat interval the node sends one JSON [`Announcement`] per
//! advertised capability to the multicast group. A listener task feeds
//! announcements from other nodes into the descriptor table and a sweeper
//! task ages them out.

use super::{Advertisements, Announcement, DescriptorTable, Discovery, LivenessConfig};
use crate::config::{AppConfig, DiscoveryDefaults, DiscoveryMode, LocusConfig};
use crate::network::CircuitBreakerConfig;
use crate::tasks::TaskHandle;
use crate::{LocusError, Result};
use chrono::Utc;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Multicast group and liveness settings.
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Local interface to join on; unspecified lets the OS pick.
    pub interface: Ipv4Addr,
    pub liveness: LivenessConfig,
    pub breaker: CircuitBreakerConfig,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DiscoveryDefaults::MULTICAST_GROUP,
            port: DiscoveryDefaults::MULTICAST_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            liveness: LivenessConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl MulticastConfig {
    pub fn from_config(config: &LocusConfig) -> Self {
        Self {
            group: config.discovery.multicast_group,
            port: config.discovery.multicast_port,
            interface: Ipv4Addr::UNSPECIFIED,
            liveness: LivenessConfig::from_config(config),
            breaker: CircuitBreakerConfig {
                failure_threshold: config.network.failure_threshold,
                cooldown: std::time::Duration::from_secs(config.network.cooldown_secs),
            },
        }
    }

    fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }
}

/// What the listener did with one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    Accepted,
    OwnAnnouncement,
    VersionMismatch,
    Oversized,
    Malformed,
}

struct Shared {
    instance_id: Uuid,
    config: MulticastConfig,
    table: DescriptorTable,
    advertisements: Advertisements,
}

impl Shared {
    fn handle_datagram(&self, bytes: &[u8], sender: SocketAddr) -> DatagramOutcome {
        if bytes.len() > DiscoveryDefaults::MAX_DATAGRAM_SIZE {
            debug!("Dropping oversized discovery datagram from {}", sender);
            return DatagramOutcome::Oversized;
        }
        let announcement = match Announcement::decode(bytes) {
            Ok(a) => a,
            Err(e) => {
                debug!("Dropping malformed discovery datagram from {}: {}", sender, e);
                return DatagramOutcome::Malformed;
            }
        };
        if announcement.instance_id == self.instance_id {
            return DatagramOutcome::OwnAnnouncement;
        }
        if announcement.protocol_version != AppConfig::PROTOCOL_VERSION {
            debug!(
                "Ignoring protocol v{} announcement from {}",
                announcement.protocol_version, sender
            );
            return DatagramOutcome::VersionMismatch;
        }

        let sender_ip = sender.ip().to_string();
        let descriptor = announcement.into_descriptor(Some(&sender_ip), Utc::now());
        self.table.upsert(descriptor);
        DatagramOutcome::Accepted
    }

    async fn announce_all(&self, socket: &UdpSocket) {
        let target = self.config.group_addr();
        for (capability, endpoint) in self.advertisements.snapshot() {
            let bytes = match Announcement::new(&capability, &endpoint, self.instance_id).encode() {
                Ok(b) => b,
                Err(e) => {
                    warn!(capability = %capability, "Cannot announce: {}", e);
                    continue;
                }
            };
            if let Err(e) = socket.send_to(&bytes, target).await {
                debug!(capability = %capability, "Announcement send failed: {}", e);
            }
        }
    }
}

/// Discovery over UDP multicast. Dropping stops all background tasks.
pub struct NetworkDiscovery {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    tasks: Vec<TaskHandle>,
}

impl NetworkDiscovery {
    /// Bind the multicast socket and start the announcer, listener and sweeper.
    pub async fn start(config: MulticastConfig) -> Result<Self> {
        let socket = bind_multicast(config.group, config.port, config.interface).map_err(|e| {
            LocusError::Network {
                message: format!(
                    "Failed to bind discovery socket {}:{}",
                    config.group, config.port
                ),
                cause: Some(e.to_string()),
            }
        })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let shared = Arc::new(Shared {
            instance_id: Uuid::new_v4(),
            table: DescriptorTable::new(config.liveness.clone(), config.breaker.clone()),
            advertisements: Advertisements::default(),
            config,
        });

        info!(
            "Multicast discovery on {} (instance {})",
            shared.config.group_addr(),
            shared.instance_id
        );

        let tasks = vec![
            spawn_listener(shared.clone(), socket.clone()),
            spawn_announcer(shared.clone(), socket),
            spawn_sweeper(shared.clone()),
        ];

        Ok(Self {
            shared,
            local_addr,
            tasks,
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.shared.instance_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Feed one raw datagram through the listener's acceptance rules.
    pub fn handle_datagram(&self, bytes: &[u8], sender: SocketAddr) -> DatagramOutcome {
        self.shared.handle_datagram(bytes, sender)
    }

    /// Stop the background tasks and wait for them to exit.
    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.shutdown().await;
        }
    }
}

impl Discovery for NetworkDiscovery {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Network
    }

    fn table(&self) -> &DescriptorTable {
        &self.shared.table
    }

    fn advertisements(&self) -> &Advertisements {
        &self.shared.advertisements
    }
}

fn spawn_listener(shared: Arc<Shared>, socket: Arc<UdpSocket>) -> TaskHandle {
    TaskHandle::spawn("discovery-listener", move |mut shutdown_rx| async move {
        // One byte past the limit so oversized datagrams are detectable.
        let mut buf = vec![0u8; DiscoveryDefaults::MAX_DATAGRAM_SIZE + 1];
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, sender)) => {
                        shared.handle_datagram(&buf[..n], sender);
                    }
                    Err(e) => {
                        warn!("Discovery receive error: {}", e);
                        tokio::time::sleep(shared.config.liveness.heartbeat_interval).await;
                    }
                }
            }
        }
    })
}

fn spawn_announcer(shared: Arc<Shared>, socket: Arc<UdpSocket>) -> TaskHandle {
    TaskHandle::spawn("discovery-announcer", move |mut shutdown_rx| async move {
        let mut interval = tokio::time::interval(shared.config.liveness.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => shared.announce_all(&socket).await,
            }
        }
    })
}

fn spawn_sweeper(shared: Arc<Shared>) -> TaskHandle {
    let period = shared.config.liveness.heartbeat_interval;
    TaskHandle::spawn_interval("discovery-sweeper", period, move || {
        let shared = shared.clone();
        async move {
            let report = shared.table.sweep_at(Utc::now());
            if report.marked_stale > 0 || report.removed > 0 {
                debug!(
                    "Discovery sweep: {} stale, {} removed",
                    report.marked_stale, report.removed
                );
            }
        }
    })
}

/// Bind a reusable UDP socket on the group port and join the group.
#[cfg(unix)]
fn bind_multicast(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> std::io::Result<UdpSocket> {
    use nix::sys::socket::{
        bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockProtocol, SockType,
        SockaddrIn,
    };
    use std::os::fd::AsRawFd;

    let fd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        SockProtocol::Udp,
    )?;

    // Several nodes on one host share the group port.
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
    setsockopt(&fd, sockopt::ReusePort, &true)?;

    bind(
        fd.as_raw_fd(),
        &SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
    )?;

    let std_socket = std::net::UdpSocket::from(fd);
    std_socket.set_nonblocking(true)?;
    std_socket.join_multicast_v4(&group, &interface)?;
    std_socket.set_multicast_loop_v4(true)?;
    UdpSocket::from_std(std_socket)
}

#[cfg(not(unix))]
fn bind_multicast(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> std::io::Result<UdpSocket> {
    let std_socket = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    std_socket.set_nonblocking(true)?;
    std_socket.join_multicast_v4(&group, &interface)?;
    std_socket.set_multicast_loop_v4(true)?;
    UdpSocket::from_std(std_socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Endpoint;

    fn shared() -> Shared {
        Shared {
            instance_id: Uuid::new_v4(),
            config: MulticastConfig::default(),
            table: DescriptorTable::default(),
            advertisements: Advertisements::default(),
        }
    }

    fn sender() -> SocketAddr {
        "192.168.1.30:7787".parse().unwrap()
    }

    #[test]
    fn test_accepts_foreign_announcement() {
        let s = shared();
        let ann = Announcement::new("echo", &Endpoint::new("0.0.0.0", 9000), Uuid::new_v4());
        let outcome = s.handle_datagram(&ann.encode().unwrap(), sender());
        assert_eq!(outcome, DatagramOutcome::Accepted);

        let targets = s.table.resolve("echo");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].endpoint().unwrap(), &Endpoint::new("192.168.1.30", 9000));
    }

    #[test]
    fn test_ignores_own_announcement() {
        let s = shared();
        let ann = Announcement::new("echo", &Endpoint::new("10.0.0.1", 9000), s.instance_id);
        assert_eq!(
            s.handle_datagram(&ann.encode().unwrap(), sender()),
            DatagramOutcome::OwnAnnouncement
        );
        assert!(s.table.is_empty());
    }

    #[test]
    fn test_ignores_other_protocol_versions() {
        let s = shared();
        let mut ann = Announcement::new("echo", &Endpoint::new("10.0.0.1", 9000), Uuid::new_v4());
        ann.protocol_version = 2;
        let bytes = serde_json::to_vec(&ann).unwrap();
        assert_eq!(
            s.handle_datagram(&bytes, sender()),
            DatagramOutcome::VersionMismatch
        );
    }

    #[test]
    fn test_drops_oversized_and_malformed() {
        let s = shared();
        let big = vec![b'{'; DiscoveryDefaults::MAX_DATAGRAM_SIZE + 1];
        assert_eq!(s.handle_datagram(&big, sender()), DatagramOutcome::Oversized);
        assert_eq!(
            s.handle_datagram(b"{not json", sender()),
            DatagramOutcome::Malformed
        );
        assert!(s.table.is_empty());
    }
}
