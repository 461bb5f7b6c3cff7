//! Packet router
//!
//! Classifies every stanza as local or remote. The component recognizes no
//! application-level operations of its own, so anything addressed to its
//! identity gets a feature-not-implemented error back; everything else is
//! resolved through the routing table and enqueued on the owning link.

use crate::cluster::resolver::HostResolver;
use crate::cluster::routing::RoutingTable;
use crate::stanza::{ErrorCondition, Packet};
use crate::stats::ClusterStats;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of classifying one packet
#[derive(Debug, PartialEq)]
pub enum RouteDecision {
    /// Send this reply back through routing (it carries its own destination)
    Reply(Packet),
    /// Enqueue the packet on the link that owns the destination
    Forward(SocketAddr),
    /// No owner and no reply owed; the miss has been counted
    Drop,
}

/// Strip an address down to its host part
pub fn host_part(address: &str) -> &str {
    address.rsplit_once('@').map(|(_, h)| h).unwrap_or(address)
}

/// Stateless classifier over the shared routing table
pub struct PacketRouter {
    component_id: String,
    routing: Arc<RwLock<RoutingTable>>,
    resolver: Arc<dyn HostResolver>,
    stats: Arc<ClusterStats>,
}

impl PacketRouter {
    pub fn new(
        component_id: String,
        routing: Arc<RwLock<RoutingTable>>,
        resolver: Arc<dyn HostResolver>,
        stats: Arc<ClusterStats>,
    ) -> Self {
        Self {
            component_id,
            routing,
            resolver,
            stats,
        }
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Classify one packet. Never fails; a failure on one packet must not
    /// take the router down.
    pub async fn classify(&self, packet: &Packet) -> RouteDecision {
        log::debug!(
            "Processing packet: {}, type: {:?}",
            packet.elem_name(),
            packet.stanza_type()
        );

        let Some(to) = packet.to() else {
            log::warn!("Dropping packet without destination: {}", packet.elem_name());
            self.stats.addressing_miss();
            return RouteDecision::Drop;
        };

        if to == self.component_id {
            return match packet.error_reply(ErrorCondition::FeatureNotImplemented, "Not implemented")
            {
                Ok(reply) => {
                    self.stats.not_implemented_reply();
                    RouteDecision::Reply(reply)
                }
                Err(e) => {
                    log::warn!("Packet processing exception: {}", e);
                    RouteDecision::Drop
                }
            };
        }

        let table = self.routing.read().await;
        if let Some(target) = table.lookup(to) {
            self.stats.packet_forwarded();
            return RouteDecision::Forward(target);
        }
        // Retry on the bare host, then on the resolved host
        let host = host_part(to);
        if host != to {
            if let Some(target) = table.lookup(host) {
                self.stats.packet_forwarded();
                return RouteDecision::Forward(target);
            }
        }
        let resolved = self.resolver.resolve(host);
        if resolved != host {
            if let Some(target) = table.lookup(&resolved) {
                self.stats.packet_forwarded();
                return RouteDecision::Forward(target);
            }
        }
        drop(table);

        self.stats.addressing_miss();
        log::debug!("No route for {}", to);
        if packet.stanza_type().is_some_and(|t| t.expects_reply()) {
            match packet.error_reply(ErrorCondition::RemoteServerNotFound, "No cluster route") {
                Ok(reply) => RouteDecision::Reply(reply),
                Err(_) => RouteDecision::Drop,
            }
        } else {
            RouteDecision::Drop
        }
    }
}
