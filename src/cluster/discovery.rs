//! Service-discovery directory and membership announcements
//!
//! Keeps a self entry plus one child entry per connected peer and builds
//! the cluster-wide node-connected / node-disconnected announcements. The
//! surrounding discovery query/response wire protocol lives outside this
//! crate; the directory only produces the data shape.

use crate::cluster::XMLNS;
use crate::stanza::{Element, Packet, StanzaType};
use std::collections::BTreeMap;

pub const DISCO_INFO_NS: &str = "http://jabber.org/protocol/disco#info";
pub const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";

/// One directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEntity {
    pub jid: String,
    pub name: String,
}

/// The discovery directory: self entry plus connected peers
pub struct ServiceDirectory {
    self_entity: ServiceEntity,
    identity_type: String,
    items: BTreeMap<String, ServiceEntity>,
}

impl ServiceDirectory {
    pub fn new(component_id: &str, name: &str, identity_type: &str) -> Self {
        Self {
            self_entity: ServiceEntity {
                jid: component_id.to_string(),
                name: name.to_string(),
            },
            identity_type: identity_type.to_string(),
            items: BTreeMap::new(),
        }
    }

    /// Add or refresh the child entry for a peer. Keyed by peer address, so
    /// a repeated announcement cannot create a duplicate entry.
    pub fn add_item(&mut self, peer_addr: &str, name: &str) {
        log::debug!("Directory entry for {}: {}", peer_addr, name);
        self.items.insert(
            peer_addr.to_string(),
            ServiceEntity {
                jid: peer_addr.to_string(),
                name: name.to_string(),
            },
        );
    }

    /// Drop the child entry for a peer
    pub fn remove_item(&mut self, peer_addr: &str) {
        self.items.remove(peer_addr);
    }

    pub fn contains(&self, peer_addr: &str) -> bool {
        self.items.contains_key(peer_addr)
    }

    pub fn items_len(&self) -> usize {
        self.items.len()
    }

    /// Whether this directory answers for the queried node address
    pub fn answers_for(&self, node: &str) -> bool {
        node == self.self_entity.jid
    }

    /// Discovery info for the queried node address
    pub fn disco_info(&self, node: &str) -> Option<Element> {
        if !self.answers_for(node) {
            return None;
        }
        let identity = Element::new("identity")
            .with_attr("category", "component")
            .with_attr("type", self.identity_type.clone())
            .with_attr("name", self.self_entity.name.clone());
        Some(
            Element::new("query")
                .with_attr("xmlns", DISCO_INFO_NS)
                .with_child(identity),
        )
    }

    /// Discovery items for the queried node address: one child per peer
    pub fn disco_items(&self, node: &str) -> Option<Element> {
        if !self.answers_for(node) {
            return None;
        }
        let mut query = Element::new("query").with_attr("xmlns", DISCO_ITEMS_NS);
        for entity in self.items.values() {
            query.add_child(
                Element::new("item")
                    .with_attr("jid", entity.jid.clone())
                    .with_attr("name", entity.name.clone()),
            );
        }
        Some(query)
    }
}

fn membership_announcement(
    event: &str,
    component_id: &str,
    controller_id: &str,
    peer_addr: &str,
) -> Packet {
    Packet::new(
        Element::new("cluster")
            .with_attr("xmlns", XMLNS)
            .with_attr("from", component_id)
            .with_attr("to", controller_id)
            .with_attr("type", StanzaType::Set.as_str())
            .with_child(Element::new(event).with_attr("node", peer_addr)),
    )
}

/// Cluster-wide announcement that a peer joined the mesh
pub fn node_connected(component_id: &str, controller_id: &str, peer_addr: &str) -> Packet {
    membership_announcement("node-connected", component_id, controller_id, peer_addr)
}

/// Cluster-wide announcement that a peer left the mesh
pub fn node_disconnected(component_id: &str, controller_id: &str, peer_addr: &str) -> Packet {
    membership_announcement("node-disconnected", component_id, controller_id, peer_addr)
}
