//! Centralized configuration for Locus.
//!
//! Constant defaults live in unit structs grouped by subsystem. The
//! serde-backed [`LocusConfig`] carries the values a node actually runs
//! with and can be loaded from a JSON file.

use crate::{LocusError, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level constants.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Locus";
    pub const USER_AGENT: &'static str = "Locus/0.1";
    /// Wire protocol version carried in discovery records and host info.
    pub const PROTOCOL_VERSION: u32 = 1;
    pub const CACHE_DB_FILENAME: &'static str = "cache.sqlite";
}

/// Network proxy defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
    /// 50ms, 200ms, 800ms.
    pub const RETRY_EXPONENTIAL_BASE: f64 = 4.0;
    pub const RETRY_MAX_DELAY: Duration = Duration::from_millis(800);
    pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_BREAKER_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Hybrid cache defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const RAM_CAPACITY: usize = 10_000;
    pub const RAM_SHARDS: usize = 16;
    pub const DB_POOL_SIZE: usize = 4;
    pub const DB_BUSY_TIMEOUT_MS: u64 = 250;
    pub const DB_BUSY_RETRIES: u32 = 5;
    pub const DB_BUSY_BACKOFF: Duration = Duration::from_millis(20);
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
    pub const ASK_TTL: Duration = Duration::from_secs(3600);
    pub const TELL_TTL: Duration = Duration::from_secs(1800);
    pub const DO_TTL: Duration = Duration::from_secs(60);
}

/// Discovery defaults.
pub struct DiscoveryDefaults;

impl DiscoveryDefaults {
    pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);
    pub const MULTICAST_PORT: u16 = 7787;
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
    pub const MISSED_HEARTBEATS: u32 = 3;
    pub const REMOVAL_GRACE: Duration = Duration::from_secs(10);
    pub const MAX_DATAGRAM_SIZE: usize = 1024;
}

/// Service locator defaults.
pub struct LocatorDefaults;

impl LocatorDefaults {
    pub const RESOLUTION_GRACE: Duration = Duration::from_secs(5);
    pub const RESOLUTION_CACHE_CAPACITY: u64 = 1024;
}

/// Which discovery implementation a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// No sockets; single-process operation and tests.
    #[default]
    LocalOnly,
    /// UDP multicast announcements on the LAN.
    Network,
}

impl DiscoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMode::LocalOnly => "local_only",
            DiscoveryMode::Network => "network",
        }
    }
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DiscoveryMode {
    type Err = LocusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "local_only" | "local" => Ok(DiscoveryMode::LocalOnly),
            "network" | "multicast" => Ok(DiscoveryMode::Network),
            other => Err(LocusError::Config {
                message: format!("Unknown discovery mode: {}", other),
            }),
        }
    }
}

/// Hybrid cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Total RAM tier capacity, split evenly across shards.
    pub ram_capacity: usize,
    pub ram_shards: usize,
    /// SQLite database file. `None` means the platform data directory.
    pub db_path: Option<PathBuf>,
    pub db_pool_size: usize,
    pub sweep_interval_secs: u64,
    pub ask_ttl_secs: u64,
    pub tell_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ram_capacity: CacheDefaults::RAM_CAPACITY,
            ram_shards: CacheDefaults::RAM_SHARDS,
            db_path: None,
            db_pool_size: CacheDefaults::DB_POOL_SIZE,
            sweep_interval_secs: CacheDefaults::SWEEP_INTERVAL.as_secs(),
            ask_ttl_secs: CacheDefaults::ASK_TTL.as_secs(),
            tell_ttl_secs: CacheDefaults::TELL_TTL.as_secs(),
        }
    }
}

impl CacheSettings {
    /// Resolve the database path, falling back to the platform data directory.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let base = dirs::data_dir().ok_or_else(|| LocusError::Config {
            message: "No platform data directory; set cache.db_path".to_string(),
        })?;
        Ok(base.join("locus").join(AppConfig::CACHE_DB_FILENAME))
    }
}

/// Network proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: NetworkConfig::REQUEST_TIMEOUT.as_millis() as u64,
            max_attempts: NetworkConfig::MAX_ATTEMPTS,
            retry_base_delay_ms: NetworkConfig::RETRY_BASE_DELAY.as_millis() as u64,
            failure_threshold: NetworkConfig::CIRCUIT_BREAKER_FAILURE_THRESHOLD,
            cooldown_secs: NetworkConfig::CIRCUIT_BREAKER_RECOVERY_TIMEOUT.as_secs(),
        }
    }
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub mode: DiscoveryMode,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub heartbeat_interval_ms: u64,
    pub missed_heartbeats: u32,
    pub removal_grace_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            multicast_group: DiscoveryDefaults::MULTICAST_GROUP,
            multicast_port: DiscoveryDefaults::MULTICAST_PORT,
            heartbeat_interval_ms: DiscoveryDefaults::HEARTBEAT_INTERVAL.as_millis() as u64,
            missed_heartbeats: DiscoveryDefaults::MISSED_HEARTBEATS,
            removal_grace_ms: DiscoveryDefaults::REMOVAL_GRACE.as_millis() as u64,
        }
    }
}

/// Service locator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    pub resolution_grace_ms: u64,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            resolution_grace_ms: LocatorDefaults::RESOLUTION_GRACE.as_millis() as u64,
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocusConfig {
    pub cache: CacheSettings,
    pub network: NetworkSettings,
    pub discovery: DiscoverySettings,
    pub locator: LocatorSettings,
}

impl LocusConfig {
    /// Load a configuration file. Missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| LocusError::io_with_path(e, path))?;
        let config: LocusConfig = serde_json::from_str(&contents).map_err(|e| LocusError::Config {
            message: format!("Invalid config {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a subsystem inert or spin.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 7] = [
            ("cache.ram_capacity", self.cache.ram_capacity > 0),
            ("cache.ram_shards", self.cache.ram_shards > 0),
            ("cache.db_pool_size", self.cache.db_pool_size > 0),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs > 0),
            ("network.max_attempts", self.network.max_attempts > 0),
            (
                "discovery.heartbeat_interval_ms",
                self.discovery.heartbeat_interval_ms > 0,
            ),
            (
                "discovery.missed_heartbeats",
                self.discovery.missed_heartbeats > 0,
            ),
        ];
        for (field, ok) in checks {
            if !ok {
                return Err(LocusError::Validation {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.network.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.heartbeat_interval_ms)
    }

    pub fn removal_grace(&self) -> Duration {
        Duration::from_millis(self.discovery.removal_grace_ms)
    }

    pub fn resolution_grace(&self) -> Duration {
        Duration::from_millis(self.locator.resolution_grace_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_retry_schedule_matches_backoff_constants() {
        let base = NetworkConfig::RETRY_BASE_DELAY.as_millis() as f64;
        let third = base * NetworkConfig::RETRY_EXPONENTIAL_BASE.powi(2);
        assert_eq!(third as u128, NetworkConfig::RETRY_MAX_DELAY.as_millis());
    }

    #[test]
    fn test_discovery_mode_parse() {
        assert_eq!(
            "network".parse::<DiscoveryMode>().unwrap(),
            DiscoveryMode::Network
        );
        assert_eq!(
            "local-only".parse::<DiscoveryMode>().unwrap(),
            DiscoveryMode::LocalOnly
        );
        assert!("bonjour".parse::<DiscoveryMode>().is_err());
    }

    #[test]
    fn test_load_partial_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("locus.json");
        std::fs::write(
            &path,
            r#"{ "cache": { "ram_capacity": 32 }, "discovery": { "mode": "network" } }"#,
        )
        .unwrap();

        let config = LocusConfig::load(&path).unwrap();
        assert_eq!(config.cache.ram_capacity, 32);
        assert_eq!(config.cache.ram_shards, CacheDefaults::RAM_SHARDS);
        assert_eq!(config.discovery.mode, DiscoveryMode::Network);
        assert_eq!(config.request_timeout(), NetworkConfig::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = LocusConfig::default();
        config.cache.ram_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LocusError::Validation { ref field, .. } if field == "cache.ram_capacity"));
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let settings = CacheSettings {
            db_path: Some(PathBuf::from("/tmp/locus-test.sqlite")),
            ..Default::default()
        };
        assert_eq!(
            settings.resolved_db_path().unwrap(),
            PathBuf::from("/tmp/locus-test.sqlite")
        );
    }
}
