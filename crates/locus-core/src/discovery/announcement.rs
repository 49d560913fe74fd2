//! Discovery record wire format: one JSON object per UDP datagram.

use super::descriptor::{Endpoint, ServiceDescriptor};
use crate::config::{AppConfig, DiscoveryDefaults};
use crate::{LocusError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub capability: String,
    pub host: String,
    pub port: u16,
    pub protocol_version: u32,
    pub instance_id: Uuid,
}

impl Announcement {
    pub fn new(capability: impl Into<String>, endpoint: &Endpoint, instance_id: Uuid) -> Self {
        Self {
            capability: capability.into(),
            host: endpoint.host.clone(),
            port: endpoint.port,
            protocol_version: AppConfig::PROTOCOL_VERSION,
            instance_id,
        }
    }

    /// Serialize, refusing records that would not fit one datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > DiscoveryDefaults::MAX_DATAGRAM_SIZE {
            return Err(LocusError::Validation {
                field: "announcement".to_string(),
                message: format!(
                    "{} bytes exceeds the {} byte datagram limit",
                    bytes.len(),
                    DiscoveryDefaults::MAX_DATAGRAM_SIZE
                ),
            });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > DiscoveryDefaults::MAX_DATAGRAM_SIZE {
            return Err(LocusError::Validation {
                field: "announcement".to_string(),
                message: format!("oversized datagram ({} bytes)", bytes.len()),
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Build the NETWORK descriptor this record describes.
    ///
    /// An unspecified host (empty or `0.0.0.0`) is replaced by the sender's
    /// address.
    pub fn into_descriptor(self, sender_ip: Option<&str>, now: DateTime<Utc>) -> ServiceDescriptor {
        let host = match (self.host.as_str(), sender_ip) {
            ("" | "0.0.0.0", Some(ip)) => ip.to_string(),
            _ => self.host,
        };
        let mut descriptor = ServiceDescriptor::network(
            self.capability,
            Endpoint::new(host, self.port),
            Some(self.instance_id),
            now,
        );
        descriptor.protocol_version = self.protocol_version;
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let ann = Announcement::new("echo", &Endpoint::new("10.0.0.5", 9000), Uuid::new_v4());
        let bytes = ann.encode().unwrap();
        assert_eq!(Announcement::decode(&bytes).unwrap(), ann);
    }

    #[test]
    fn test_oversized_rejected() {
        let ann = Announcement::new(
            "x".repeat(DiscoveryDefaults::MAX_DATAGRAM_SIZE),
            &Endpoint::new("10.0.0.5", 9000),
            Uuid::new_v4(),
        );
        assert!(ann.encode().is_err());
        assert!(Announcement::decode(&vec![b' '; 2000]).is_err());
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(Announcement::decode(b"{\"capability\": 3}").is_err());
        assert!(Announcement::decode(b"not json").is_err());
    }

    #[test]
    fn test_unspecified_host_uses_sender() {
        let ann = Announcement::new("echo", &Endpoint::new("0.0.0.0", 9000), Uuid::new_v4());
        let desc = ann.into_descriptor(Some("192.168.1.20"), Utc::now());
        assert_eq!(desc.endpoint().unwrap().host, "192.168.1.20");
        assert!(desc.instance_id.is_some());
    }
}
