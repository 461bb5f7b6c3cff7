//! Cluster node orchestrator
//!
//! Owns the listener, the dial decisions and the single message loop that
//! serializes every mutation of the registry, the routing table and the
//! discovery directory. Each socket gets one I/O task; the task is a dumb
//! pipe and all protocol state lives here.
//!
//! Teardown order is part of the contract: routes and the discovery entry
//! are unregistered before the connection handle (and with it the socket)
//! is released, so a concurrent lookup can never return a link that is
//! already gone.

use crate::cluster::codec::{Frame, StanzaCodec};
use crate::cluster::config::{ClusterConfig, ConfigError};
use crate::cluster::connection::{
    ConnectionHandle, ConnectionRole, PeerConnection,
};
use crate::cluster::discovery::{self, ServiceDirectory};
use crate::cluster::handshake::{Handshake, HandshakeStep};
use crate::cluster::registry::{should_dial, ConnectionRegistry};
use crate::cluster::resolver::HostResolver;
use crate::cluster::router::{PacketRouter, RouteDecision};
use crate::cluster::routing::RoutingTable;
use crate::credentials::CredentialsCodec;
use crate::monitor::{Tick, TickScheduler};
use crate::stanza::Packet;
use crate::stats::{ClusterStats, SnapshotCache};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::Framed;

/// Outbound frames buffered per link
const OUTBOUND_QUEUE: usize = 100;

/// Events buffered for the message loop
const EVENT_QUEUE: usize = 1000;

/// Name of the periodic statistics tick
const STATS_TICK: &str = "stats";

/// Process-wide connection id source. Ids disambiguate pipes that share a
/// remote socket address (two dials to the same host), so a refused
/// duplicate closing late cannot tear down the healthy link.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Node-level errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Cluster node is not running")]
    Stopped,
}

/// Everything the message loop reacts to
enum Event {
    /// A socket is up and its pipe task is running
    Opened {
        id: u64,
        addr: SocketAddr,
        handle: ConnectionHandle,
        handshake: Handshake,
    },
    /// One frame arrived on a link
    Frame { addr: SocketAddr, frame: Frame },
    /// A link's pipe task ended; the socket is gone
    Closed { id: u64, addr: SocketAddr },
    /// Dial a peer host now
    Dial { host: String },
    /// A dial attempt failed before a socket existed
    DialFailed { host: String },
    /// An outbound stanza from the rest of the server
    Submit(Packet),
    Shutdown,
}

/// Cheap handle for submitting stanzas and stopping the node
#[derive(Clone)]
pub struct ClusterHandle {
    event_tx: mpsc::Sender<Event>,
}

impl ClusterHandle {
    /// Hand an outbound stanza to the router
    pub async fn submit(&self, packet: Packet) -> Result<(), NodeError> {
        self.event_tx
            .send(Event::Submit(packet))
            .await
            .map_err(|_| NodeError::Stopped)
    }

    /// Stop the node; links get a close trailer, best effort
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.event_tx
            .send(Event::Shutdown)
            .await
            .map_err(|_| NodeError::Stopped)
    }
}

/// The cluster connection manager node
pub struct ClusterNode {
    config: ClusterConfig,
    /// Shared secret after codec decoding
    secret: String,
    routing: Arc<RwLock<RoutingTable>>,
    stats: Arc<ClusterStats>,
    snapshots: Arc<SnapshotCache>,
    router: PacketRouter,
    registry: ConnectionRegistry,
    directory: ServiceDirectory,
    event_tx: mpsc::Sender<Event>,
    event_rx: mpsc::Receiver<Event>,
}

impl ClusterNode {
    /// Build a node from configuration. The secret is decoded through the
    /// configured credentials codec before use.
    pub fn new(
        config: ClusterConfig,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = CredentialsCodec::from_name(&config.secret_codec)?;
        let secret = codec.decode(&config.secret);

        let routing = Arc::new(RwLock::new(RoutingTable::new()));
        let stats = Arc::new(ClusterStats::new());
        let snapshots = Arc::new(SnapshotCache::new());
        let router = PacketRouter::new(
            config.component_id(),
            routing.clone(),
            resolver,
            stats.clone(),
        );
        let directory = ServiceDirectory::new(
            &config.component_id(),
            &format!("cluster connections on {}", config.local_host),
            &config.identity_type,
        );
        let registry = ConnectionRegistry::new(config.max_reconnects, config.reconnect_delay);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        Ok(Self {
            config,
            secret,
            routing,
            stats,
            snapshots,
            router,
            registry,
            directory,
            event_tx,
            event_rx,
        })
    }

    /// Handle for submitting stanzas and shutting down
    pub fn handle(&self) -> ClusterHandle {
        ClusterHandle {
            event_tx: self.event_tx.clone(),
        }
    }

    /// The shared routing table, for collaborator lookups
    pub fn routing(&self) -> Arc<RwLock<RoutingTable>> {
        self.routing.clone()
    }

    /// The live counters, for the external collector
    pub fn stats(&self) -> Arc<ClusterStats> {
        self.stats.clone()
    }

    /// Published statistics snapshots
    pub fn snapshots(&self) -> Arc<SnapshotCache> {
        self.snapshots.clone()
    }

    /// Bind the cluster listener and run until shutdown
    pub async fn start(self) -> Result<(), NodeError> {
        let listener =
            TcpListener::bind((self.config.bind_host.as_str(), self.config.port)).await?;
        self.run(listener).await
    }

    /// Run on an already-bound listener
    pub async fn run(mut self, listener: TcpListener) -> Result<(), NodeError> {
        log::info!(
            "Cluster node {} listening on {}",
            self.config.local_host,
            listener.local_addr()?
        );

        tokio::spawn(accept_loop(
            listener,
            self.event_tx.clone(),
            self.config.local_host.clone(),
            self.secret.clone(),
        ));

        let (scheduler, mut ticks) = TickScheduler::new(8);
        let _stats_task = scheduler.schedule(STATS_TICK, self.config.stats_interval);

        // Startup dial decisions: exactly one side of each pair dials
        for host in self.config.peer_hosts() {
            if should_dial(&self.config.local_host, &host, self.config.connect_all) {
                log::info!("Trying to connect to cluster node: {}", host);
                self.spawn_dial(host);
            } else {
                log::debug!("Waiting for cluster node {} to connect here", host);
            }
        }

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                Some(tick) = ticks.recv() => {
                    self.handle_tick(tick);
                }
            }
        }

        log::info!("Cluster node {} shutting down", self.config.local_host);
        Ok(())
    }

    /// Returns false once the loop should stop
    async fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Opened {
                id,
                addr,
                handle,
                handshake,
            } => self.on_opened(id, addr, handle, handshake).await,
            Event::Frame { addr, frame } => self.on_frame(addr, frame).await,
            Event::Closed { id, addr } => {
                // Only the pipe that owns the registry entry tears it down
                if self.registry.get(&addr).map(|c| c.id) == Some(id) {
                    self.teardown(addr).await;
                } else {
                    log::debug!("Ignoring close of superseded pipe {} for {}", id, addr);
                }
            }
            Event::Dial { host } => {
                if self.registry.has_link_to(&host) {
                    log::debug!("Already linked to {}, skipping dial", host);
                } else {
                    self.spawn_dial(host);
                }
            }
            Event::DialFailed { host } => self.schedule_reconnect(&host),
            Event::Submit(packet) => self.dispatch(packet).await,
            Event::Shutdown => {
                for handle in self.registry.all_handles() {
                    let _ = handle.send(Frame::StreamClose).await;
                }
                return false;
            }
        }
        true
    }

    fn handle_tick(&self, tick: Tick) {
        if tick.name == STATS_TICK {
            let snapshot = self.stats.snapshot();
            log::debug!("Publishing stats snapshot: {:?}", snapshot);
            self.snapshots.publish(snapshot);
        }
    }

    fn spawn_dial(&self, host: String) {
        let event_tx = self.event_tx.clone();
        let port = self.config.port;
        let handshake = Handshake::initiator(&self.config.local_host, &host, &self.secret);
        tokio::spawn(async move {
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => run_connection(stream, event_tx, handshake).await,
                Err(e) => {
                    log::warn!("Connect to cluster node {}:{} failed: {}", host, port, e);
                    let _ = event_tx.send(Event::DialFailed { host }).await;
                }
            }
        });
    }

    async fn on_opened(
        &mut self,
        id: u64,
        addr: SocketAddr,
        handle: ConnectionHandle,
        handshake: Handshake,
    ) {
        let role = handshake.role();
        log::debug!(
            "Cluster connection opened: {}, role: {}, id={}",
            addr,
            role,
            id
        );

        let mut conn = PeerConnection::new(id, addr, handshake);
        if let Some(host) = conn.remote_host() {
            conn.routings = RoutingTable::patterns_for_host(host).to_vec();
        }
        if let Err(e) = self.registry.insert(conn, handle.clone()) {
            log::warn!("Refusing connection from {}: {}", addr, e);
            let _ = handle.send(Frame::StreamClose).await;
            return;
        }

        // The initiator opens the stream; the acceptor waits for the header
        if let Some(frame) = self
            .registry
            .get_mut(&addr)
            .and_then(|c| c.handshake.start())
        {
            if handle.send(frame).await.is_err() {
                log::warn!("Link {} went away before the stream opened", addr);
            }
        }
    }

    async fn on_frame(&mut self, addr: SocketAddr, frame: Frame) {
        enum Action {
            Nothing,
            Dispatch(Packet),
            Send(Frame),
            Accept(Frame),
            Established,
            Teardown,
            FailHandshake,
        }

        let action = {
            let Some(conn) = self.registry.get_mut(&addr) else {
                log::debug!("Frame from unknown link {}", addr);
                return;
            };
            conn.touch();

            if conn.is_connected() {
                match frame {
                    Frame::Stanza(elem) if elem.name() == "handshake" => {
                        log::debug!("Ignoring handshake element on established link {}", addr);
                        Action::Nothing
                    }
                    Frame::Stanza(elem) => Action::Dispatch(Packet::new(elem)),
                    Frame::StreamClose => Action::Teardown,
                    Frame::StreamOpen(_) => {
                        log::debug!("Ignoring repeated stream header from {}", addr);
                        Action::Nothing
                    }
                }
            } else {
                let step = match frame {
                    Frame::StreamOpen(attrs) => conn.handshake.on_stream_open(&attrs),
                    Frame::Stanza(elem) => conn.handshake.on_stanza(&elem),
                    Frame::StreamClose => Ok(HandshakeStep::Ignore),
                };
                match step {
                    Ok(HandshakeStep::Send(reply)) => {
                        // The acceptor learns the remote host from the header
                        if conn.routings.is_empty() {
                            if let Some(host) = conn.remote_host() {
                                conn.routings = RoutingTable::patterns_for_host(host).to_vec();
                            }
                        }
                        Action::Send(reply)
                    }
                    Ok(HandshakeStep::Accept(ack)) => Action::Accept(ack),
                    Ok(HandshakeStep::Established) => Action::Established,
                    Ok(HandshakeStep::Ignore) => {
                        log::warn!("Ignoring pre-handshake content from {}", addr);
                        Action::Nothing
                    }
                    Err(e) => {
                        log::info!("Handshake with {} failed: {}", addr, e);
                        Action::FailHandshake
                    }
                }
            }
        };

        match action {
            Action::Nothing => {}
            Action::Dispatch(packet) => self.dispatch(packet).await,
            Action::Send(reply) => self.send_frame(addr, reply).await,
            Action::Accept(ack) => {
                self.send_frame(addr, ack).await;
                self.service_connected(addr).await;
            }
            Action::Established => self.service_connected(addr).await,
            Action::Teardown => self.teardown(addr).await,
            Action::FailHandshake => {
                self.stats.handshake_rejected();
                // No detail goes back to the peer; the socket just closes
                self.teardown(addr).await;
            }
        }
    }

    async fn send_frame(&mut self, addr: SocketAddr, frame: Frame) {
        let Some(handle) = self.registry.handle(&addr) else {
            return;
        };
        if handle.send(frame).await.is_err() {
            log::warn!("Failed to write to {}; closing", addr);
            self.teardown(addr).await;
        }
    }

    /// Side effects of a completed handshake: routes, directory entry and
    /// exactly one cluster-wide announcement.
    async fn service_connected(&mut self, addr: SocketAddr) {
        let (host, routings) = {
            let Some(conn) = self.registry.get(&addr) else {
                return;
            };
            let Some(host) = conn.remote_host().map(String::from) else {
                log::warn!("Connected link {} has no declared host", addr);
                return;
            };
            (host, conn.routings.clone())
        };

        // Under connect-all both sides dial; only one link may survive
        if self.registry.another_connected_to(&host, &addr) {
            log::info!("Dropping duplicate cluster link to {}", host);
            self.send_frame(addr, Frame::StreamClose).await;
            self.close_quietly(addr).await;
            return;
        }

        self.registry.reset_reconnects(&host);
        {
            let mut table = self.routing.write().await;
            // The declared triple leads with the literal host
            let mut patterns = routings.iter();
            if let Some(literal) = patterns.next() {
                table.install_literal(literal, addr);
            }
            for wildcard in patterns {
                table.install_wildcard(wildcard, addr);
            }
        }
        self.directory.add_item(&host, "cluster node connected");
        self.stats.link_up();
        self.stats.handshake_accepted();
        log::info!("Connected to: {}", host);

        let announcement = discovery::node_connected(
            &self.config.component_id(),
            &self.config.controller_id(),
            &host,
        );
        self.stats.announcement_sent();
        self.dispatch(announcement).await;
    }

    /// Remove a link. Routes and the directory entry go first; releasing
    /// the handle (and with it the socket) comes after.
    async fn teardown(&mut self, addr: SocketAddr) {
        let Some((host, role, was_connected)) = self
            .registry
            .get(&addr)
            .map(|c| (c.remote_host().map(String::from), c.role(), c.is_connected()))
        else {
            return;
        };

        self.routing.write().await.remove_target(addr);
        if let Some(host) = &host {
            self.directory.remove_item(host);
        }
        if let Some(mut conn) = self.registry.remove(&addr) {
            conn.handshake.close();
        }

        if was_connected {
            self.stats.link_down();
            if let Some(host) = &host {
                log::info!("Disconnected from: {}", host);
                let announcement = discovery::node_disconnected(
                    &self.config.component_id(),
                    &self.config.controller_id(),
                    host,
                );
                self.stats.announcement_sent();
                self.dispatch(announcement).await;
            }
        }

        // Only the dialing side retries
        if role == ConnectionRole::Initiator {
            if let Some(host) = host {
                self.schedule_reconnect(&host);
            }
        }
    }

    /// Drop a link without announcements or reconnects (duplicate links)
    async fn close_quietly(&mut self, addr: SocketAddr) {
        self.routing.write().await.remove_target(addr);
        if let Some(mut conn) = self.registry.remove(&addr) {
            conn.handshake.close();
        }
    }

    fn schedule_reconnect(&mut self, host: &str) {
        let Some(pending) = self.registry.grant_reconnect(host) else {
            return;
        };
        self.stats.reconnect_scheduled();
        log::info!(
            "Reconnecting to {} in {:?} ({} attempts left)",
            pending.host,
            pending.delay,
            pending.attempts_left
        );
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(pending.delay).await;
            let _ = event_tx.send(Event::Dial { host: pending.host }).await;
        });
    }

    /// Route one packet: local error reply, forward, or counted drop.
    /// A reply decision re-enters routing once; replies are error-typed and
    /// can never generate a further reply.
    async fn dispatch(&mut self, packet: Packet) {
        let mut current = packet;
        for _ in 0..2 {
            match self.router.classify(&current).await {
                RouteDecision::Forward(target) => {
                    let Some(handle) = self.registry.handle(&target) else {
                        log::warn!("Route target {} has no live link", target);
                        return;
                    };
                    if let Err(e) = handle.send_packet(current).await {
                        log::warn!("Failed to enqueue for {}: {}", target, e);
                    }
                    return;
                }
                RouteDecision::Reply(reply) => {
                    current = reply;
                }
                RouteDecision::Drop => return,
            }
        }
        log::debug!("Reply had no deliverable destination; dropped");
    }
}

/// Accept inbound cluster connections forever
async fn accept_loop(
    listener: TcpListener,
    event_tx: mpsc::Sender<Event>,
    local_host: String,
    secret: String,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                log::info!("Incoming cluster connection from {}", addr);
                let handshake = Handshake::acceptor(&local_host, &secret);
                tokio::spawn(run_connection(stream, event_tx.clone(), handshake));
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
            }
        }
    }
}

/// Pipe task for one socket: frames out of the outbound queue onto the
/// wire, frames off the wire into the message loop. Ends when either side
/// closes or the node drops the connection handle; dropping both halves
/// here is what finally releases the socket.
async fn run_connection(stream: TcpStream, event_tx: mpsc::Sender<Event>, handshake: Handshake) {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            log::warn!("Could not read peer address: {}", e);
            return;
        }
    };
    let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let framed = Framed::new(stream, StanzaCodec);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let handle = ConnectionHandle::new(addr, tx);
    if event_tx
        .send(Event::Opened {
            id,
            addr,
            handle,
            handshake,
        })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        let closing = frame == Frame::StreamClose;
                        if writer.send(frame).await.is_err() {
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    // The node dropped the handle: close the socket
                    None => break,
                }
            }
            inbound = reader.next() => {
                match inbound {
                    Some(Ok(frame)) => {
                        if event_tx.send(Event::Frame { addr, frame }).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("Error reading from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        log::debug!("Peer {} closed the stream", addr);
                        break;
                    }
                }
            }
        }
    }

    let _ = event_tx.send(Event::Closed { id, addr }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::handshake::handshake_digest;
    use crate::cluster::resolver::StaticResolver;
    use crate::stanza::Element;
    use std::time::Duration;

    const SECRET: &str = "someSecret";

    fn test_config(local_host: &str) -> ClusterConfig {
        ClusterConfig {
            local_host: local_host.to_string(),
            secret: SECRET.to_string(),
            reconnect_delay: Duration::from_millis(50),
            max_reconnects: 3,
            ..Default::default()
        }
    }

    async fn spawn_node(config: ClusterConfig) -> (SocketAddr, ClusterHandle, NodeProbe) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = ClusterNode::new(config, Arc::new(StaticResolver::new())).unwrap();
        let handle = node.handle();
        let probe = NodeProbe {
            routing: node.routing(),
            stats: node.stats(),
        };
        tokio::spawn(node.run(listener));
        (addr, handle, probe)
    }

    struct NodeProbe {
        routing: Arc<RwLock<RoutingTable>>,
        stats: Arc<ClusterStats>,
    }

    impl NodeProbe {
        async fn wait_for_route(&self, address: &str) -> SocketAddr {
            for _ in 0..200 {
                if let Some(target) = self.routing.read().await.lookup(address) {
                    return target;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("no route appeared for {}", address);
        }

        async fn wait_until<F: Fn() -> bool>(&self, what: &str, cond: F) {
            for _ in 0..200 {
                if cond() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("condition never held: {}", what);
        }
    }

    /// Drive the initiator side of the handshake over a raw client socket
    async fn client_handshake(
        framed: &mut Framed<TcpStream, StanzaCodec>,
        local_host: &str,
        remote_host: &str,
        secret: &str,
    ) {
        framed
            .send(Frame::stream_open(local_host, remote_host, None))
            .await
            .unwrap();
        let Some(Ok(Frame::StreamOpen(attrs))) = framed.next().await else {
            panic!("expected stream header");
        };
        let id = attrs
            .iter()
            .find(|(n, _)| n == "id")
            .map(|(_, v)| v.clone())
            .expect("acceptor assigns a session id");

        let digest = handshake_digest(&id, secret);
        framed
            .send(Frame::Stanza(Element::new("handshake").with_cdata(digest)))
            .await
            .unwrap();

        let Some(Ok(Frame::Stanza(ack))) = framed.next().await else {
            panic!("expected handshake acknowledgement");
        };
        assert_eq!(ack.name(), "handshake");
        assert!(ack.cdata().is_none());
    }

    #[tokio::test]
    async fn test_acceptor_handshake_installs_route_triple() {
        let (addr, _handle, probe) = spawn_node(test_config("b.example")).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, StanzaCodec);
        client_handshake(&mut framed, "a.example", "b.example", SECRET).await;

        let target = probe.wait_for_route("a.example").await;
        assert_eq!(
            probe.routing.read().await.lookup("alice@a.example"),
            Some(target)
        );
        assert_eq!(
            probe.routing.read().await.lookup("muc.a.example"),
            Some(target)
        );
        assert_eq!(probe.routing.read().await.len(), 3);

        // Exactly one connected announcement
        probe
            .wait_until("one announcement", || {
                probe.stats.snapshot().announcements_sent == 1
            })
            .await;
        let snap = probe.stats.snapshot();
        assert_eq!(snap.handshakes_accepted, 1);
        assert_eq!(snap.links_active, 1);
    }

    #[tokio::test]
    async fn test_wrong_digest_closes_without_routes_or_announcement() {
        let (addr, _handle, probe) = spawn_node(test_config("b.example")).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, StanzaCodec);
        framed
            .send(Frame::stream_open("a.example", "b.example", None))
            .await
            .unwrap();
        let Some(Ok(Frame::StreamOpen(_))) = framed.next().await else {
            panic!("expected stream header");
        };
        framed
            .send(Frame::Stanza(
                Element::new("handshake").with_cdata("0000deadbeef"),
            ))
            .await
            .unwrap();

        // The acceptor closes without echoing any detail
        loop {
            match framed.next().await {
                None => break,
                Some(Err(_)) => break,
                Some(Ok(frame)) => panic!("unexpected frame after bad digest: {:?}", frame),
            }
        }

        probe
            .wait_until("rejection counted", || {
                probe.stats.snapshot().handshakes_rejected == 1
            })
            .await;
        assert!(probe.routing.read().await.is_empty());
        assert_eq!(probe.stats.snapshot().announcements_sent, 0);
        assert_eq!(probe.stats.snapshot().links_active, 0);
    }

    #[tokio::test]
    async fn test_local_identity_packet_gets_not_implemented_reply() {
        let (addr, _handle, probe) = spawn_node(test_config("b.example")).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, StanzaCodec);
        client_handshake(&mut framed, "a.example", "b.example", SECRET).await;
        probe.wait_for_route("a.example").await;

        // Addressed to the component's own identity, from a domain this
        // link owns, so the error reply comes straight back
        framed
            .send(Frame::Stanza(
                Element::new("iq")
                    .with_attr("from", "user@a.example")
                    .with_attr("to", "cluster@b.example")
                    .with_attr("type", "get"),
            ))
            .await
            .unwrap();

        let Some(Ok(Frame::Stanza(reply))) = framed.next().await else {
            panic!("expected an error reply");
        };
        assert_eq!(reply.attr("to"), Some("user@a.example"));
        assert_eq!(reply.attr("type"), Some("error"));
        let error = reply.find_child("error").unwrap();
        assert!(error.find_child("feature-not-implemented").is_some());
    }

    #[tokio::test]
    async fn test_forwarding_between_two_links() {
        let (addr, _handle, probe) = spawn_node(test_config("hub.example")).await;

        let mut framed_a = Framed::new(TcpStream::connect(addr).await.unwrap(), StanzaCodec);
        client_handshake(&mut framed_a, "a.example", "hub.example", SECRET).await;
        let mut framed_c = Framed::new(TcpStream::connect(addr).await.unwrap(), StanzaCodec);
        client_handshake(&mut framed_c, "c.example", "hub.example", SECRET).await;
        probe.wait_for_route("a.example").await;
        probe.wait_for_route("c.example").await;

        // a -> hub -> c, twice, order preserved
        for i in 0..2 {
            framed_a
                .send(Frame::Stanza(
                    Element::new("message")
                        .with_attr("from", "user@a.example")
                        .with_attr("to", "friend@c.example")
                        .with_attr("seq", i.to_string()),
                ))
                .await
                .unwrap();
        }
        for i in 0..2 {
            let Some(Ok(Frame::Stanza(msg))) = framed_c.next().await else {
                panic!("expected forwarded message");
            };
            assert_eq!(msg.attr("from"), Some("user@a.example"));
            assert_eq!(msg.attr("seq"), Some(i.to_string().as_str()));
        }
    }

    #[tokio::test]
    async fn test_teardown_purges_routes_and_announces() {
        let (addr, _handle, probe) = spawn_node(test_config("b.example")).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, StanzaCodec);
        client_handshake(&mut framed, "a.example", "b.example", SECRET).await;
        probe.wait_for_route("a.example").await;

        framed.send(Frame::StreamClose).await.unwrap();
        // One connected plus one disconnected announcement
        probe
            .wait_until("disconnect announced", || {
                probe.stats.snapshot().announcements_sent == 2
            })
            .await;
        // Immediately after the disconnect completed, lookups miss
        assert_eq!(probe.routing.read().await.lookup("a.example"), None);
        assert_eq!(probe.routing.read().await.lookup("alice@a.example"), None);
        assert_eq!(probe.stats.snapshot().links_active, 0);
        // The acceptor side never reconnects
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(probe.stats.snapshot().reconnects_scheduled, 0);
    }

    #[tokio::test]
    async fn test_initiator_dials_handshakes_and_reconnects() {
        // Stand in for the remote acceptor
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_port = listener.local_addr().unwrap().port();

        let config = ClusterConfig {
            port: peer_port,
            peers: vec!["127.0.0.1".to_string()],
            connect_all: true,
            ..test_config("a.example")
        };
        let node = ClusterNode::new(config, Arc::new(StaticResolver::new())).unwrap();
        let stats = node.stats();
        let routing = node.routing();
        let node_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        tokio::spawn(node.run(node_listener));

        // First attempt: complete the handshake, then drop the link
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, StanzaCodec);
        let Some(Ok(Frame::StreamOpen(attrs))) = framed.next().await else {
            panic!("expected stream open from the initiator");
        };
        assert!(attrs.contains(&("from".to_string(), "a.example".to_string())));
        assert!(attrs.iter().all(|(n, _)| n != "id"));

        let session_id = "test-session-1";
        framed
            .send(Frame::stream_open("127.0.0.1", "a.example", Some(session_id)))
            .await
            .unwrap();
        let Some(Ok(Frame::Stanza(digest_elem))) = framed.next().await else {
            panic!("expected digest");
        };
        assert_eq!(
            digest_elem.cdata(),
            Some(handshake_digest(session_id, SECRET).as_str())
        );
        framed.send(Frame::Stanza(Element::new("handshake"))).await.unwrap();

        for _ in 0..200 {
            if routing.read().await.lookup("127.0.0.1").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(routing.read().await.lookup("127.0.0.1").is_some());

        // Drop the link: the initiator must schedule a re-dial
        drop(framed);
        let (_stream2, _) = listener.accept().await.unwrap();
        assert!(stats.snapshot().reconnects_scheduled >= 1);
    }
}
