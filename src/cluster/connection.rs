//! Per-link connection state
//!
//! A [`PeerConnection`] is the registry-owned record for one cluster link;
//! a [`ConnectionHandle`] is the cheap clone the rest of the node uses to
//! enqueue outbound frames. The per-destination mpsc channel behind the
//! handle is what preserves enqueue order on a link.

use crate::cluster::codec::Frame;
use crate::cluster::handshake::{Handshake, HandshakeError};
use crate::stanza::Packet;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Duplicate connection key: {0}")]
    Duplicate(SocketAddr),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Which side of the link this node is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// This node dialed the peer; it re-dials after a link loss
    Initiator,
    /// The peer dialed this node; no reconnect from this side
    Acceptor,
}

impl std::fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionRole::Initiator => write!(f, "initiator"),
            ConnectionRole::Acceptor => write!(f, "acceptor"),
        }
    }
}

/// Lifecycle of a cluster link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    StreamOpened,
    AwaitingDigest,
    AwaitingAck,
    Connected,
    Closed,
}

/// Handle for enqueuing frames to one link's writer task
#[derive(Clone)]
pub struct ConnectionHandle {
    pub addr: SocketAddr,
    tx: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    pub fn new(addr: SocketAddr, tx: mpsc::Sender<Frame>) -> Self {
        Self { addr, tx }
    }

    /// Enqueue a frame; per-link order follows enqueue order
    pub async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| ConnectionError::Disconnected)
    }

    /// Enqueue an outbound stanza
    pub async fn send_packet(&self, packet: Packet) -> Result<(), ConnectionError> {
        self.send(Frame::Stanza(packet.into_element())).await
    }
}

/// Registry-owned record for one cluster link
pub struct PeerConnection {
    /// Registry-assigned connection id
    pub id: u64,
    /// Remote socket address, the registry key
    pub addr: SocketAddr,
    /// Handshake state machine; also carries role, session id and secret
    pub handshake: Handshake,
    /// Routing patterns declared for the peer, installed on Connected
    pub routings: Vec<String>,
    /// Last frame seen on the link
    pub last_activity: Instant,
}

impl PeerConnection {
    pub fn new(id: u64, addr: SocketAddr, handshake: Handshake) -> Self {
        Self {
            id,
            addr,
            handshake,
            routings: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn role(&self) -> ConnectionRole {
        self.handshake.role()
    }

    pub fn state(&self) -> ConnectionState {
        self.handshake.state()
    }

    pub fn is_connected(&self) -> bool {
        self.handshake.is_connected()
    }

    pub fn remote_host(&self) -> Option<&str> {
        self.handshake.remote_host()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
