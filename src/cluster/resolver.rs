//! Host resolution seam
//!
//! Destination hosts pass through a resolver before the routing-table
//! lookup. Resolution is a collaborator concern; the system resolver is
//! the default, and tests plug in a static map.

use std::collections::HashMap;
use std::net::ToSocketAddrs;

/// Resolves a hostname for routing purposes
pub trait HostResolver: Send + Sync {
    /// Resolve the host, falling back to the hostname itself on failure
    fn resolve(&self, host: &str) -> String;
}

/// System DNS resolver
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> String {
        match (host, 0u16).to_socket_addrs() {
            Ok(mut addrs) => addrs
                .next()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| host.to_string()),
            Err(_) => {
                log::warn!("Unknown host: {}", host);
                host.to_string()
            }
        }
    }
}

/// Fixed host map, for tests and static deployments
#[derive(Default)]
pub struct StaticResolver {
    hosts: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, resolved: impl Into<String>) -> Self {
        self.hosts.insert(host.into(), resolved.into());
        self
    }
}

impl HostResolver for StaticResolver {
    fn resolve(&self, host: &str) -> String {
        self.hosts
            .get(host)
            .cloned()
            .unwrap_or_else(|| host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_resolver_falls_back_to_host() {
        let resolver = StaticResolver::new().with_host("b.example", "10.0.0.2");
        assert_eq!(resolver.resolve("b.example"), "10.0.0.2");
        assert_eq!(resolver.resolve("c.example"), "c.example");
    }

    #[test]
    fn test_system_resolver_unknown_host_falls_back() {
        let resolver = SystemResolver;
        // A name that cannot resolve comes back unchanged
        assert_eq!(
            resolver.resolve("definitely-not-a-real-host.invalid"),
            "definitely-not-a-real-host.invalid"
        );
    }
}
