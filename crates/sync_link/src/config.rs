//! Link configuration types and defaults.

use crate::protocol::SpawnBatch;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Configuration shared by both ends of the link.
///
/// The Game process uses `listen_address`, the credentials and the allowed
/// address list; the AI process uses `peer_address` and the credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address the Game process listens on for the AI uplink
    pub listen_address: SocketAddr,

    /// Address the AI process connects to
    pub peer_address: SocketAddr,

    pub username: String,

    pub password: String,

    /// Addresses the AI process may connect from. Empty allows any.
    pub allowed_ai_addresses: Vec<IpAddr>,

    /// Seconds between keepalive pings
    pub ping_interval_secs: u64,

    /// Seconds without traffic after which the peer is disconnected
    pub ping_timeout_secs: u64,

    /// Estimated one-way lag above which a warning is logged
    pub lag_warning_ms: u64,

    /// How often buffered spawns are flushed to the Game process
    pub spawn_flush_ms: u64,

    /// Delay between uplink connection attempts
    pub reconnect_delay_ms: u64,

    /// Maximum entries in one SpawnNpc message
    pub max_batch_entries: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9870);
        Self {
            listen_address: local,
            peer_address: local,
            username: "ai".to_string(),
            password: "changeme".to_string(),
            allowed_ai_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            ping_interval_secs: 5,
            ping_timeout_secs: 15,
            lag_warning_ms: 1500,
            spawn_flush_ms: 200,
            reconnect_delay_ms: 3000,
            max_batch_entries: 500,
        }
    }
}

impl LinkConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn spawn_flush_interval(&self) -> Duration {
        Duration::from_millis(self.spawn_flush_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Whether an AI process connecting from `ip` may log in.
    pub fn is_address_allowed(&self, ip: IpAddr) -> bool {
        self.allowed_ai_addresses.is_empty() || self.allowed_ai_addresses.contains(&ip)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.username.is_empty() {
            return Err("link username must not be empty".to_string());
        }
        if self.ping_interval_secs == 0 {
            return Err("ping interval must be greater than zero".to_string());
        }
        if self.ping_timeout_secs <= self.ping_interval_secs {
            return Err(format!(
                "ping timeout ({}s) must exceed the ping interval ({}s)",
                self.ping_timeout_secs, self.ping_interval_secs
            ));
        }
        if self.spawn_flush_ms == 0 || self.reconnect_delay_ms == 0 {
            return Err("spawn flush and reconnect intervals must be greater than zero".to_string());
        }
        if self.max_batch_entries == 0 {
            return Err("max_batch_entries must be greater than zero".to_string());
        }
        let frame_limit = SpawnBatch::max_entries_per_frame();
        if self.max_batch_entries > frame_limit {
            return Err(format!(
                "max_batch_entries ({}) exceeds the {} spawn entries one frame can carry",
                self.max_batch_entries, frame_limit
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ping_interval(), Duration::from_secs(5));
        assert_eq!(config.ping_timeout(), Duration::from_secs(15));
        assert!(config.is_address_allowed("127.0.0.1".parse().unwrap()));
        assert!(!config.is_address_allowed("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn empty_allow_list_accepts_anyone() {
        let config = LinkConfig {
            allowed_ai_addresses: Vec::new(),
            ..LinkConfig::default()
        };
        assert!(config.is_address_allowed("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn timeout_must_exceed_interval() {
        let config = LinkConfig {
            ping_timeout_secs: 5,
            ..LinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn batch_size_must_fit_one_frame() {
        let fits = LinkConfig {
            max_batch_entries: SpawnBatch::max_entries_per_frame(),
            ..LinkConfig::default()
        };
        assert!(fits.validate().is_ok());

        let oversized = LinkConfig {
            max_batch_entries: 3_000,
            ..LinkConfig::default()
        };
        assert!(oversized.validate().unwrap_err().contains("max_batch_entries"));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: LinkConfig =
            serde_json::from_str(r#"{ "username": "brain", "ping_interval_secs": 2 }"#).unwrap();
        assert_eq!(config.username, "brain");
        assert_eq!(config.ping_interval_secs, 2);
        assert_eq!(config.ping_timeout_secs, 15);
    }
}
