//! Statistics counters and snapshots
//!
//! The cluster core counts events into lock-free counters; an external
//! statistics collector reads consistent snapshots through the cache. The
//! snapshot is serializable for management tooling.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Event counters maintained by the cluster core
#[derive(Debug, Default)]
pub struct ClusterStats {
    packets_forwarded: AtomicU64,
    addressing_misses: AtomicU64,
    not_implemented_replies: AtomicU64,
    handshakes_accepted: AtomicU64,
    handshakes_rejected: AtomicU64,
    reconnects_scheduled: AtomicU64,
    announcements_sent: AtomicU64,
    links_active: AtomicU64,
}

impl ClusterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn addressing_miss(&self) {
        self.addressing_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn not_implemented_reply(&self) {
        self.not_implemented_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_accepted(&self) {
        self.handshakes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn announcement_sent(&self) {
        self.announcements_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_up(&self) {
        self.links_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_down(&self) {
        // Saturating: a spurious extra down event must not wrap the gauge
        let _ = self
            .links_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// The snapshot hook invoked by the external collector
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            addressing_misses: self.addressing_misses.load(Ordering::Relaxed),
            not_implemented_replies: self.not_implemented_replies.load(Ordering::Relaxed),
            handshakes_accepted: self.handshakes_accepted.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            announcements_sent: self.announcements_sent.load(Ordering::Relaxed),
            links_active: self.links_active.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cluster counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub packets_forwarded: u64,
    pub addressing_misses: u64,
    pub not_implemented_replies: u64,
    pub handshakes_accepted: u64,
    pub handshakes_rejected: u64,
    pub reconnects_scheduled: u64,
    pub announcements_sent: u64,
    pub links_active: u64,
}

/// Last published snapshot, readable by the management side at any time
#[derive(Debug, Default)]
pub struct SnapshotCache {
    latest: RwLock<Option<StatsSnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: StatsSnapshot) {
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(snapshot);
        }
    }

    pub fn read(&self) -> Option<StatsSnapshot> {
        self.latest.read().ok().and_then(|l| l.clone())
    }
}
