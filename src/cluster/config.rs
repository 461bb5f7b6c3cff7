//! Cluster configuration
//!
//! Everything the connection manager consumes: the peer host list, the
//! shared secret, bind parameters and the dial/retry policy. Peer-list
//! validation is lenient; a malformed entry is logged and skipped so the
//! rest of the configuration still applies.

use std::time::Duration;
use thiserror::Error;

/// Default cluster port
pub const DEFAULT_PORT: u16 = 5277;

/// Default delay before an initiator re-dials a lost link
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Default reconnect budget: very large but finite
pub const DEFAULT_MAX_RECONNECTS: u32 = 99_999_999;

/// Fatal configuration errors; per-entry problems are logged and skipped
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Local host must not be empty")]
    MissingLocalHost,
    #[error("Shared secret must not be empty")]
    MissingSecret,
    #[error(transparent)]
    Credentials(#[from] crate::credentials::CredentialsError),
}

/// Cluster connection manager configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// This node's hostname; also the `from` on opened streams
    pub local_host: String,
    /// Interface to bind the cluster listener on
    pub bind_host: String,
    /// Cluster port, for both listening and dialing
    pub port: u16,
    /// Configured peer entries, `host` or `node@host`
    pub peers: Vec<String>,
    /// Shared secret in its stored form
    pub secret: String,
    /// Name of the codec the stored secret is decoded with
    pub secret_codec: String,
    /// Force dialing every peer instead of the hash tie-break
    pub connect_all: bool,
    /// Reconnect budget per remote host
    pub max_reconnects: u32,
    /// Delay before an initiator re-dials
    pub reconnect_delay: Duration,
    /// Identity membership announcements are addressed to; empty means
    /// `controller@<local_host>`
    pub controller_id: String,
    /// Component name; the component id is `<name>@<local_host>`
    pub component_name: String,
    /// Identity type advertised in discovery info
    pub identity_type: String,
    /// How often the statistics snapshot is published
    pub stats_interval: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            local_host: "localhost".to_string(),
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            peers: Vec::new(),
            secret: String::new(),
            secret_codec: "plain".to_string(),
            connect_all: false,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            controller_id: String::new(),
            component_name: "cluster".to_string(),
            identity_type: "generic".to_string(),
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl ClusterConfig {
    /// This component's own identity
    pub fn component_id(&self) -> String {
        format!("{}@{}", self.component_name, self.local_host)
    }

    /// Where membership announcements go
    pub fn controller_id(&self) -> String {
        if self.controller_id.is_empty() {
            format!("controller@{}", self.local_host)
        } else {
            self.controller_id.clone()
        }
    }

    /// The peer hosts that survive validation, in configuration order.
    /// Malformed entries are logged and skipped; duplicates collapse.
    pub fn peer_hosts(&self) -> Vec<String> {
        let mut hosts = Vec::new();
        for entry in &self.peers {
            match peer_host(entry) {
                Some(host) => {
                    if !hosts.contains(&host) {
                        log::debug!("Found cluster node host: {}", host);
                        hosts.push(host);
                    }
                }
                None => {
                    log::warn!("Skipping malformed cluster peer entry: {:?}", entry);
                }
            }
        }
        hosts
    }

    /// Check the fatal basics
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_host.trim().is_empty() {
            return Err(ConfigError::MissingLocalHost);
        }
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(())
    }
}

/// Extract the host part of a peer entry (`host` or `node@host`).
/// Returns `None` for entries no dial attempt could use.
pub fn peer_host(entry: &str) -> Option<String> {
    let trimmed = entry.trim();
    let host = trimmed.rsplit_once('@').map(|(_, h)| h).unwrap_or(trimmed);
    if host.is_empty() {
        return None;
    }
    let valid = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid || host.starts_with('.') || host.ends_with('.') {
        return None;
    }
    Some(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_host_forms() {
        assert_eq!(peer_host("b.example"), Some("b.example".to_string()));
        assert_eq!(peer_host("node1@b.example"), Some("b.example".to_string()));
        assert_eq!(peer_host("  b.example  "), Some("b.example".to_string()));
        assert_eq!(peer_host("10.0.0.2"), Some("10.0.0.2".to_string()));
    }

    #[test]
    fn test_peer_host_rejects_malformed() {
        assert_eq!(peer_host(""), None);
        assert_eq!(peer_host("node1@"), None);
        assert_eq!(peer_host("b .example"), None);
        assert_eq!(peer_host("b.example/extra"), None);
        assert_eq!(peer_host(".example"), None);
    }

    #[test]
    fn test_malformed_entries_are_skipped_not_fatal() {
        let config = ClusterConfig {
            peers: vec![
                "b.example".to_string(),
                "broken entry".to_string(),
                "node2@c.example".to_string(),
                "b.example".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(config.peer_hosts(), vec!["b.example", "c.example"]);
    }

    #[test]
    fn test_identity_defaults() {
        let config = ClusterConfig {
            local_host: "a.example".to_string(),
            ..Default::default()
        };
        assert_eq!(config.component_id(), "cluster@a.example");
        assert_eq!(config.controller_id(), "controller@a.example");

        let config = ClusterConfig {
            local_host: "a.example".to_string(),
            controller_id: "controller@hub.example".to_string(),
            ..Default::default()
        };
        assert_eq!(config.controller_id(), "controller@hub.example");
    }

    #[test]
    fn test_validate_rejects_missing_essentials() {
        let config = ClusterConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingSecret));

        let config = ClusterConfig {
            local_host: " ".to_string(),
            secret: "s".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingLocalHost));

        let config = ClusterConfig {
            local_host: "a.example".to_string(),
            secret: "s".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
