//! Configuration for the control point
//!
//! [`ControlPointConfig`] controls which interfaces and address families are
//! used, how long subscriptions are requested for, and how many threads the
//! I/O pool may grow to. Every field has a default, so a JSON document only
//! needs to name what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use upnp_ssdp::Protocol;

use crate::error::{ControlPointError, Result};

/// Configuration for the [`ControlPoint`](crate::ControlPoint)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPointConfig {
    /// Address families to discover on
    /// Default: dual stack
    pub protocol: Protocol,

    /// Interface names to use; empty means every usable interface
    /// Default: empty
    pub interfaces: Vec<String>,

    /// Port for the GENA event receiver, 0 for an ephemeral port
    /// Default: 0
    pub event_port: u16,

    /// Timeout requested in `SUBSCRIBE`
    /// Default: 300 seconds
    pub subscription_timeout_secs: u64,

    /// Search target used by `search(None)`
    /// Default: "ssdp:all"
    pub search_target: String,

    /// `MX` sent with `M-SEARCH`
    /// Default: 1
    pub search_mx: u32,

    /// Maximum threads for description downloads
    /// Default: number of CPUs, at least 2
    pub io_pool_size: usize,

    /// Idle time after which pool threads exit
    /// Default: 60 seconds
    pub pool_idle_timeout_secs: u64,

    /// Reuse HTTP connections for SOAP and GENA requests
    /// Default: true
    pub http_keep_alive: bool,

    /// Drop IPv4 SSDP packets from outside the receiving interface's subnet
    /// Default: true
    pub notify_segment_check: bool,

    /// Connect and read timeout for description downloads
    /// Default: 30 seconds
    pub description_timeout_secs: u64,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::DualStack,
            interfaces: Vec::new(),
            event_port: 0,
            subscription_timeout_secs: 300,
            search_target: upnp_ssdp::ST_ALL.to_string(),
            search_mx: 1,
            io_pool_size: default_io_pool_size(),
            pool_idle_timeout_secs: 60,
            http_keep_alive: true,
            notify_segment_check: true,
            description_timeout_secs: 30,
        }
    }
}

fn default_io_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

impl ControlPointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// IPv4 only
    pub fn ipv4_only() -> Self {
        Self {
            protocol: Protocol::IpV4Only,
            ..Default::default()
        }
    }

    /// IPv6 only
    pub fn ipv6_only() -> Self {
        Self {
            protocol: Protocol::IpV6Only,
            ..Default::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ControlPointError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return the first issue found
    pub fn validate(&self) -> Result<()> {
        if self.subscription_timeout_secs == 0 {
            return Err(ControlPointError::Config(
                "Subscription timeout must be greater than 0".to_string(),
            ));
        }

        if self.search_target.trim().is_empty() {
            return Err(ControlPointError::Config(
                "Search target must not be empty".to_string(),
            ));
        }

        if self.search_mx == 0 || self.search_mx > 5 {
            return Err(ControlPointError::Config(
                "Search MX must be between 1 and 5".to_string(),
            ));
        }

        if self.io_pool_size == 0 {
            return Err(ControlPointError::Config(
                "I/O pool size must be greater than 0".to_string(),
            ));
        }

        if self.description_timeout_secs == 0 {
            return Err(ControlPointError::Config(
                "Description timeout must be greater than 0".to_string(),
            ));
        }

        if self.interfaces.iter().any(|name| name.trim().is_empty()) {
            return Err(ControlPointError::Config(
                "Interface names must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_secs(self.subscription_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn description_timeout(&self) -> Duration {
        Duration::from_secs(self.description_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControlPointConfig::default();
        assert_eq!(config.protocol, Protocol::DualStack);
        assert_eq!(config.event_port, 0);
        assert_eq!(config.subscription_timeout(), Duration::from_secs(300));
        assert_eq!(config.search_target, "ssdp:all");
        assert!(config.io_pool_size >= 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(ControlPointConfig::ipv4_only().protocol, Protocol::IpV4Only);
        assert_eq!(ControlPointConfig::ipv6_only().protocol, Protocol::IpV6Only);
        assert_eq!(ControlPointConfig::ipv4_only().search_mx, 1);
    }

    #[test]
    fn test_config_validation() {
        let zero_timeout = ControlPointConfig {
            subscription_timeout_secs: 0,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let bad_mx = ControlPointConfig {
            search_mx: 9,
            ..Default::default()
        };
        assert!(bad_mx.validate().is_err());

        let no_pool = ControlPointConfig {
            io_pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(no_pool.validate(), Err(ControlPointError::Config(_))));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ControlPointConfig::from_json(
            r#"{"protocol": "ip_v4_only", "event_port": 49152, "interfaces": ["eth0"]}"#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::IpV4Only);
        assert_eq!(config.event_port, 49152);
        assert_eq!(config.interfaces, vec!["eth0".to_string()]);
        assert_eq!(config.subscription_timeout_secs, 300);
        assert!(config.http_keep_alive);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(ControlPointConfig::from_json("{not json").is_err());
        assert!(ControlPointConfig::from_json(r#"{"search_target": " "}"#).is_err());
    }
}
