//! Routing table: address patterns to cluster links
//!
//! Each connected peer hostname H owns the triple {H, ".*@H", ".*\.H"}:
//! the literal host, any local part at the host, and any subdomain. The
//! triple is installed and removed as a unit with the owning connection's
//! state transition, so a lookup can never land on a half-torn-down link.

use regex::Regex;
use std::net::SocketAddr;

/// One installed address pattern
#[derive(Debug, Clone)]
enum RoutePattern {
    /// Exact string match; always wins over wildcards
    Literal(String),
    /// Compiled wildcard, full-match anchored
    Wildcard { source: String, regex: Regex },
}

impl RoutePattern {
    fn source(&self) -> &str {
        match self {
            RoutePattern::Literal(s) => s,
            RoutePattern::Wildcard { source, .. } => source,
        }
    }
}

/// A route entry: pattern plus the owning connection's registry key
#[derive(Debug, Clone)]
struct RouteEntry {
    pattern: RoutePattern,
    target: SocketAddr,
}

/// Address-pattern to connection mapping
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The route triple a peer hostname declares: the literal host first,
    /// then the two wildcards. Literal-first keeps registration order such
    /// that the literal always takes precedence.
    pub fn patterns_for_host(host: &str) -> [String; 3] {
        [
            host.to_string(),
            format!(".*@{}", host),
            format!(".*\\.{}", host),
        ]
    }

    /// Install the full route triple for a peer hostname. Installing the
    /// same triple again for the same target is a no-op, so a repeated
    /// "connected" announcement cannot duplicate routes.
    pub fn install_host_routes(&mut self, host: &str, target: SocketAddr) {
        let [literal, local_part, subdomain] = Self::patterns_for_host(host);
        self.install_literal(&literal, target);
        self.install_wildcard(&local_part, target);
        self.install_wildcard(&subdomain, target);
    }

    /// Install a literal route
    pub fn install_literal(&mut self, pattern: &str, target: SocketAddr) {
        if self.has_entry(pattern, target) {
            return;
        }
        log::debug!("Installing literal route {} -> {}", pattern, target);
        self.entries.push(RouteEntry {
            pattern: RoutePattern::Literal(pattern.to_string()),
            target,
        });
    }

    /// Install a wildcard route. A pattern that fails to compile is
    /// registered as a literal string instead; one malformed pattern must
    /// never abort connection setup.
    pub fn install_wildcard(&mut self, pattern: &str, target: SocketAddr) {
        if self.has_entry(pattern, target) {
            return;
        }
        match Regex::new(&format!("^(?:{})$", pattern)) {
            Ok(regex) => {
                log::debug!("Installing wildcard route {} -> {}", pattern, target);
                self.entries.push(RouteEntry {
                    pattern: RoutePattern::Wildcard {
                        source: pattern.to_string(),
                        regex,
                    },
                    target,
                });
            }
            Err(e) => {
                log::warn!(
                    "Route pattern {} does not compile ({}); registering as literal",
                    pattern,
                    e
                );
                self.install_literal(pattern, target);
            }
        }
    }

    /// Remove every route owned by the given connection
    pub fn remove_target(&mut self, target: SocketAddr) {
        let before = self.entries.len();
        self.entries.retain(|e| e.target != target);
        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("Removed {} routes for {}", removed, target);
        }
    }

    /// Resolve a destination address to the owning connection.
    ///
    /// Literal matches take precedence over wildcard matches; among
    /// wildcards, the first registered wins.
    pub fn lookup(&self, address: &str) -> Option<SocketAddr> {
        for entry in &self.entries {
            if let RoutePattern::Literal(s) = &entry.pattern {
                if s == address {
                    return Some(entry.target);
                }
            }
        }
        for entry in &self.entries {
            if let RoutePattern::Wildcard { regex, .. } = &entry.pattern {
                if regex.is_match(address) {
                    return Some(entry.target);
                }
            }
        }
        None
    }

    /// Patterns currently owned by a connection, in registration order
    pub fn patterns_for_target(&self, target: SocketAddr) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.target == target)
            .map(|e| e.pattern.source().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn has_entry(&self, pattern: &str, target: SocketAddr) -> bool {
        self.entries
            .iter()
            .any(|e| e.target == target && e.pattern.source() == pattern)
    }
}
