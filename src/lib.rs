//! Mini-Messenger: a federated instant-messaging server node in Rust
//!
//! This crate provides the cluster side of a federated IM server:
//! - authenticated, long-lived links between server nodes with a
//!   SHA-1 challenge-response handshake
//! - deterministic dial/accept tie-break and initiator-side reconnects
//! - a live routing table from addressing domains to the owning link
//! - a packet router with not-implemented replies for the component's
//!   own identity and addressing-miss accounting
//! - a service-discovery directory with cluster-wide membership
//!   announcements
//!
//! # Example
//!
//! ```rust,no_run
//! use mini_messenger::cluster::{ClusterConfig, ClusterNode, SystemResolver};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClusterConfig {
//!         local_host: "a.example".to_string(),
//!         peers: vec!["b.example".to_string()],
//!         secret: "someSecret".to_string(),
//!         ..Default::default()
//!     };
//!     let node = ClusterNode::new(config, Arc::new(SystemResolver)).unwrap();
//!     node.start().await.unwrap();
//! }
//! ```

pub mod cluster;
pub mod credentials;
pub mod monitor;
pub mod stanza;
pub mod stats;

// Re-export commonly used types
pub use cluster::{
    ClusterConfig, ClusterHandle, ClusterNode, ConnectionRole, ConnectionState, Frame,
    HostResolver, NodeError, PacketRouter, RouteDecision, RoutingTable, StanzaCodec,
    SystemResolver,
};
pub use credentials::CredentialsCodec;
pub use monitor::{Tick, TickScheduler};
pub use stanza::{Element, ErrorCondition, Packet, StanzaType};
pub use stats::{ClusterStats, SnapshotCache, StatsSnapshot};
