//! Connection registry and reconnection policy
//!
//! Owns every active peer connection, keyed by remote socket address, and
//! decides which side of a peer pair dials. The registry is only touched
//! from the node's message loop, so it needs no internal locking.

use crate::cluster::connection::{ConnectionError, ConnectionHandle, PeerConnection};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// A reconnect that has been granted by retry policy but not yet attempted.
/// Exists only while an initiator-role link is down.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReconnect {
    /// Remote host to dial again
    pub host: String,
    /// Delay before the attempt fires
    pub delay: Duration,
    /// Attempts the policy will still grant after this one
    pub attempts_left: u32,
}

/// Deterministic 32-bit polynomial string hash (h = 31*h + byte, wrapping).
///
/// Used for the dial tie-break; a platform hasher would not be stable
/// across builds, and both sides of a pair must agree on the comparison.
pub fn text_hash(s: &str) -> i32 {
    s.bytes()
        .fold(0i32, |h, b| h.wrapping_mul(31).wrapping_add(b as i32))
}

/// Dial-vs-wait decision for one configured peer host.
///
/// Exactly one side of a symmetric pair dials: the one whose host hashes
/// lower dials the higher one. The connect-all override forces both sides
/// to dial; deduplication then drops the extra link.
pub fn should_dial(local_host: &str, remote_host: &str, connect_all: bool) -> bool {
    remote_host != local_host
        && (connect_all || text_hash(remote_host) > text_hash(local_host))
}

/// All active cluster links plus the per-host reconnect budget
pub struct ConnectionRegistry {
    connections: HashMap<SocketAddr, PeerConnection>,
    handles: HashMap<SocketAddr, ConnectionHandle>,
    /// Reconnect attempts consumed per remote host
    attempts: HashMap<String, u32>,
    max_reconnects: u32,
    reconnect_delay: Duration,
}

impl ConnectionRegistry {
    pub fn new(max_reconnects: u32, reconnect_delay: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            handles: HashMap::new(),
            attempts: HashMap::new(),
            max_reconnects,
            reconnect_delay,
        }
    }

    /// Register a connection under its remote socket address.
    /// A second connection under the same key is refused, not merged.
    pub fn insert(
        &mut self,
        conn: PeerConnection,
        handle: ConnectionHandle,
    ) -> Result<(), ConnectionError> {
        let addr = conn.addr;
        if self.connections.contains_key(&addr) {
            return Err(ConnectionError::Duplicate(addr));
        }
        self.connections.insert(addr, conn);
        self.handles.insert(addr, handle);
        Ok(())
    }

    /// Drop a connection, returning its record for teardown bookkeeping
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PeerConnection> {
        self.handles.remove(addr);
        self.connections.remove(addr)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&PeerConnection> {
        self.connections.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerConnection> {
        self.connections.get_mut(addr)
    }

    pub fn handle(&self, addr: &SocketAddr) -> Option<ConnectionHandle> {
        self.handles.get(addr).cloned()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.connections.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connected links only, for stats and discovery answers
    pub fn connected_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_connected()).count()
    }

    /// Whether any link (in any state) currently exists to the given host
    pub fn has_link_to(&self, host: &str) -> bool {
        self.connections
            .values()
            .any(|c| c.remote_host() == Some(host))
    }

    /// Whether a different, already-established link to the host exists.
    /// Used to deduplicate competing links under the connect-all override.
    pub fn another_connected_to(&self, host: &str, except: &SocketAddr) -> bool {
        self.connections
            .values()
            .any(|c| c.addr != *except && c.is_connected() && c.remote_host() == Some(host))
    }

    /// Handles for every registered link, for shutdown broadcasts
    pub fn all_handles(&self) -> Vec<ConnectionHandle> {
        self.handles.values().cloned().collect()
    }

    /// Ask the retry policy for another attempt at the given host.
    /// Returns `None` once the budget is exhausted.
    pub fn grant_reconnect(&mut self, host: &str) -> Option<PendingReconnect> {
        let used = self.attempts.entry(host.to_string()).or_insert(0);
        if *used >= self.max_reconnects {
            log::warn!(
                "Reconnect budget exhausted for {} after {} attempts",
                host,
                used
            );
            return None;
        }
        *used += 1;
        Some(PendingReconnect {
            host: host.to_string(),
            delay: self.reconnect_delay,
            attempts_left: self.max_reconnects - *used,
        })
    }

    /// A completed handshake resets the host's reconnect budget
    pub fn reset_reconnects(&mut self, host: &str) {
        self.attempts.remove(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::handshake::Handshake;
    use tokio::sync::mpsc;

    fn test_conn(id: u64, addr: SocketAddr) -> (PeerConnection, ConnectionHandle) {
        let hs = Handshake::initiator("a.example", "b.example", "s3cret");
        let (tx, _rx) = mpsc::channel(4);
        // The receiver is dropped; these tests never write frames
        (PeerConnection::new(id, addr, hs), ConnectionHandle::new(addr, tx))
    }

    #[test]
    fn test_text_hash_matches_polynomial() {
        assert_eq!(text_hash(""), 0);
        assert_eq!(text_hash("a"), 97);
        assert_eq!(text_hash("ab"), 31 * 97 + 98);
        // Stable well-known value for a multi-character string
        assert_eq!(text_hash("abc"), 96354);
    }

    #[test]
    fn test_tie_break_is_asymmetric() {
        let (a, b) = ("a.example", "b.example");
        assert_ne!(text_hash(a), text_hash(b));
        assert_ne!(should_dial(a, b, false), should_dial(b, a, false));
        // Exactly the lower-hash side dials
        let a_dials = text_hash(b) > text_hash(a);
        assert_eq!(should_dial(a, b, false), a_dials);
    }

    #[test]
    fn test_lower_hash_side_dials_concretely() {
        // b.example hashes above a.example, so a.example does the dialing
        assert!(text_hash("b.example") > text_hash("a.example"));
        assert!(should_dial("a.example", "b.example", false));
        assert!(!should_dial("b.example", "a.example", false));
    }

    #[test]
    fn test_connect_all_forces_both_sides() {
        assert!(should_dial("a.example", "b.example", true));
        assert!(should_dial("b.example", "a.example", true));
    }

    #[test]
    fn test_never_dial_self() {
        assert!(!should_dial("a.example", "a.example", true));
        assert!(!should_dial("a.example", "a.example", false));
    }

    #[test]
    fn test_duplicate_key_refused() {
        let mut registry = ConnectionRegistry::new(3, Duration::from_secs(30));
        let addr: SocketAddr = "10.0.0.2:5277".parse().unwrap();

        let (conn, handle) = test_conn(1, addr);
        registry.insert(conn, handle).unwrap();

        let (conn, handle) = test_conn(2, addr);
        assert!(matches!(
            registry.insert(conn, handle),
            Err(ConnectionError::Duplicate(a)) if a == addr
        ));
        assert_eq!(registry.len(), 1);
        // The surviving record is the first one
        assert_eq!(registry.get(&addr).unwrap().id, 1);
    }

    #[test]
    fn test_remove_returns_record() {
        let mut registry = ConnectionRegistry::new(3, Duration::from_secs(30));
        let addr: SocketAddr = "10.0.0.2:5277".parse().unwrap();
        let (conn, handle) = test_conn(1, addr);
        registry.insert(conn, handle).unwrap();

        let removed = registry.remove(&addr).unwrap();
        assert_eq!(removed.addr, addr);
        assert!(registry.is_empty());
        assert!(registry.handle(&addr).is_none());
    }

    #[test]
    fn test_reconnect_budget_counts_down() {
        let mut registry = ConnectionRegistry::new(2, Duration::from_secs(30));

        let first = registry.grant_reconnect("b.example").unwrap();
        assert_eq!(first.attempts_left, 1);
        assert_eq!(first.delay, Duration::from_secs(30));

        let second = registry.grant_reconnect("b.example").unwrap();
        assert_eq!(second.attempts_left, 0);

        assert!(registry.grant_reconnect("b.example").is_none());

        // A successful handshake restores the budget
        registry.reset_reconnects("b.example");
        assert!(registry.grant_reconnect("b.example").is_some());
    }
}
