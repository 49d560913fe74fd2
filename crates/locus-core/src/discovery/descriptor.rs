//! Service descriptors: where a capability lives and how alive it looks.

use crate::config::AppConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a capability is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transport {
    Local,
    Network,
}

/// Liveness of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    /// Reachable in principle, but its circuit breaker is not closed.
    Degraded,
    /// Missed too many heartbeats; removed once the grace period passes.
    Stale,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "HEALTHY",
            Health::Degraded => "DEGRADED",
            Health::Stale => "STALE",
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host and port a capability is served on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port`, bracketing IPv6 literals.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where to find the instance. Local handles live in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceRef {
    InProcess,
    Remote(Endpoint),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub capability: String,
    pub transport: Transport,
    pub reference: ServiceRef,
    pub discovered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub health: Health,
    pub protocol_version: u32,
    /// Announcing node, for NETWORK descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Uuid>,
}

impl ServiceDescriptor {
    pub fn local(capability: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            capability: capability.into(),
            transport: Transport::Local,
            reference: ServiceRef::InProcess,
            discovered_at: now,
            last_heartbeat: now,
            health: Health::Healthy,
            protocol_version: AppConfig::PROTOCOL_VERSION,
            instance_id: None,
        }
    }

    pub fn network(
        capability: impl Into<String>,
        endpoint: Endpoint,
        instance_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            capability: capability.into(),
            transport: Transport::Network,
            reference: ServiceRef::Remote(endpoint),
            discovered_at: now,
            last_heartbeat: now,
            health: Health::Healthy,
            protocol_version: AppConfig::PROTOCOL_VERSION,
            instance_id,
        }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        match &self.reference {
            ServiceRef::Remote(endpoint) => Some(endpoint),
            ServiceRef::InProcess => None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }
}
