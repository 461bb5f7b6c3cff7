//! Cluster connection manager
//!
//! Builds and maintains the mesh of authenticated, long-lived links
//! between server nodes:
//! - challenge-response handshake over each link (initiator and acceptor)
//! - dial/accept tie-break and initiator-side reconnects
//! - live routing table from addressing domains to the owning link
//! - packet forwarding with not-implemented replies for the component's
//!   own identity
//! - service-discovery directory and membership announcements

pub mod codec;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod handshake;
pub mod node;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod routing;

/// The dedicated cluster stream namespace
pub const XMLNS: &str = "messenger:cluster";

/// Namespace of the stream framing prefix
pub const STREAM_NS: &str = "http://etherx.jabber.org/streams";

pub use codec::{Frame, StanzaCodec, MAX_STANZA_SIZE};
pub use config::{peer_host, ClusterConfig, ConfigError, DEFAULT_PORT};
pub use connection::{
    ConnectionError, ConnectionHandle, ConnectionRole, ConnectionState, PeerConnection,
};
pub use discovery::{node_connected, node_disconnected, ServiceDirectory, ServiceEntity};
pub use handshake::{handshake_digest, new_session_id, Handshake, HandshakeError, HandshakeStep};
pub use node::{ClusterHandle, ClusterNode, NodeError};
pub use registry::{should_dial, text_hash, ConnectionRegistry, PendingReconnect};
pub use resolver::{HostResolver, StaticResolver, SystemResolver};
pub use router::{host_part, PacketRouter, RouteDecision};
pub use routing::RoutingTable;
