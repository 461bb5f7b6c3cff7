//! Challenge-response handshake over a cluster link
//!
//! Both roles of the per-connection state machine:
//!
//! ```text
//! New -> StreamOpened -> AwaitingDigest (acceptor)  -> Connected -> Closed
//!                     -> AwaitingAck    (initiator) -> Connected -> Closed
//! ```
//!
//! The initiator opens the stream, receives a session id from the acceptor
//! and proves knowledge of the shared secret by sending
//! `hex(SHA1(session_id ++ secret))`. The secret itself never crosses the
//! wire, and a rejected digest is answered with a plain socket close so no
//! secret material leaks back to a probing peer.

use crate::cluster::codec::Frame;
use crate::cluster::connection::{ConnectionRole, ConnectionState};
use crate::stanza::Element;
use sha1::{Digest, Sha1};
use thiserror::Error;
use uuid::Uuid;

/// Handshake failures; all of them are fatal to the connection attempt
#[derive(Error, Debug, PartialEq)]
pub enum HandshakeError {
    #[error("Handshake digest does not match")]
    DigestMismatch,
    #[error("Stream header carries no session id")]
    MissingSessionId,
    #[error("Stream header carries no sender identity")]
    MissingSender,
}

/// Compute the digest proving knowledge of the shared secret
pub fn handshake_digest(session_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(session_id.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Issue a fresh session id for an accepted stream
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// What the connection driver should do after feeding the machine one input
#[derive(Debug, PartialEq)]
pub enum HandshakeStep {
    /// Write this frame to the peer
    Send(Frame),
    /// Write this acknowledgement; the link is now up (acceptor side)
    Accept(Frame),
    /// The peer acknowledged our digest; the link is now up (initiator side)
    Established,
    /// Pre-connected noise; log and carry on
    Ignore,
}

/// Per-connection handshake state machine
#[derive(Debug)]
pub struct Handshake {
    role: ConnectionRole,
    state: ConnectionState,
    secret: String,
    local_host: String,
    remote_host: Option<String>,
    session_id: Option<String>,
}

impl Handshake {
    /// Dialing side; the remote host is known from the dial parameters
    pub fn initiator(local_host: &str, remote_host: &str, secret: &str) -> Self {
        Self {
            role: ConnectionRole::Initiator,
            state: ConnectionState::New,
            secret: secret.to_string(),
            local_host: local_host.to_string(),
            remote_host: Some(remote_host.to_string()),
            session_id: None,
        }
    }

    /// Accepting side; the remote host is learned from the stream header
    pub fn acceptor(local_host: &str, secret: &str) -> Self {
        Self {
            role: ConnectionRole::Acceptor,
            state: ConnectionState::New,
            secret: secret.to_string(),
            local_host: local_host.to_string(),
            remote_host: None,
            session_id: None,
        }
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn remote_host(&self) -> Option<&str> {
        self.remote_host.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// First move. The initiator opens the stream; the acceptor waits.
    pub fn start(&mut self) -> Option<Frame> {
        match self.role {
            ConnectionRole::Initiator => {
                self.state = ConnectionState::StreamOpened;
                let to = self.remote_host.clone().unwrap_or_default();
                Some(Frame::stream_open(&self.local_host, &to, None))
            }
            ConnectionRole::Acceptor => None,
        }
    }

    /// Feed a received stream header into the machine
    pub fn on_stream_open(
        &mut self,
        attrs: &[(String, String)],
    ) -> Result<HandshakeStep, HandshakeError> {
        let attr = |name: &str| {
            attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };
        match (self.role, self.state) {
            (ConnectionRole::Initiator, ConnectionState::StreamOpened) => {
                let id = attr("id").ok_or(HandshakeError::MissingSessionId)?;
                let digest = handshake_digest(id, &self.secret);
                log::debug!(
                    "Computed handshake digest for session {}: {}",
                    id,
                    digest
                );
                self.session_id = Some(id.to_string());
                self.state = ConnectionState::AwaitingAck;
                Ok(HandshakeStep::Send(Frame::Stanza(
                    Element::new("handshake").with_cdata(digest),
                )))
            }
            (ConnectionRole::Acceptor, ConnectionState::New) => {
                let from = attr("from").ok_or(HandshakeError::MissingSender)?;
                self.remote_host = Some(from.to_string());
                self.state = ConnectionState::StreamOpened;
                let id = new_session_id();
                let reply = Frame::stream_open(&self.local_host, from, Some(&id));
                self.session_id = Some(id);
                self.state = ConnectionState::AwaitingDigest;
                Ok(HandshakeStep::Send(reply))
            }
            _ => Ok(HandshakeStep::Ignore),
        }
    }

    /// Feed a received stanza into the machine
    pub fn on_stanza(&mut self, elem: &Element) -> Result<HandshakeStep, HandshakeError> {
        if elem.name() != "handshake" {
            return Ok(HandshakeStep::Ignore);
        }
        match (self.role, self.state) {
            (ConnectionRole::Initiator, ConnectionState::AwaitingAck) => {
                if elem.cdata().is_none() {
                    self.state = ConnectionState::Connected;
                    Ok(HandshakeStep::Established)
                } else {
                    // An acknowledgement never carries data
                    Ok(HandshakeStep::Ignore)
                }
            }
            (ConnectionRole::Acceptor, ConnectionState::AwaitingDigest) => {
                let session_id = self
                    .session_id
                    .as_deref()
                    .ok_or(HandshakeError::MissingSessionId)?;
                let expected = handshake_digest(session_id, &self.secret);
                match elem.cdata() {
                    Some(digest) if digest == expected => {
                        self.state = ConnectionState::Connected;
                        Ok(HandshakeStep::Accept(Frame::Stanza(Element::new(
                            "handshake",
                        ))))
                    }
                    _ => Err(HandshakeError::DigestMismatch),
                }
            }
            _ => Ok(HandshakeStep::Ignore),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "someSecret";

    fn attrs_of(frame: &Frame) -> &[(String, String)] {
        match frame {
            Frame::StreamOpen(attrs) => attrs,
            other => panic!("expected stream open, got {:?}", other),
        }
    }

    #[test]
    fn test_digest_is_lowercase_hex_sha1() {
        // SHA1("idsecret"), independently computed
        assert_eq!(
            handshake_digest("id", "secret"),
            "2555325ab8349486fb4f5bb190bf753b87a5bbc8"
        );
        // Digest is over the concatenation, so both inputs matter
        assert_ne!(
            handshake_digest("id", "secret"),
            handshake_digest("ids", "ecret2")
        );
        assert_eq!(
            handshake_digest("session-1", "someSecret"),
            "1de516952b761ecd779c8479beab071117c83728"
        );
    }

    #[test]
    fn test_full_handshake_both_roles() {
        let mut initiator = Handshake::initiator("a.example", "b.example", SECRET);
        let mut acceptor = Handshake::acceptor("b.example", SECRET);

        // Initiator opens the stream
        let open = initiator.start().unwrap();
        assert!(acceptor.start().is_none());

        // Acceptor answers with a session id
        let step = acceptor.on_stream_open(attrs_of(&open)).unwrap();
        let HandshakeStep::Send(reply) = step else {
            panic!("expected reply");
        };
        assert_eq!(acceptor.state(), ConnectionState::AwaitingDigest);
        assert_eq!(acceptor.remote_host(), Some("a.example"));

        // Initiator computes and sends the digest
        let step = initiator.on_stream_open(attrs_of(&reply)).unwrap();
        let HandshakeStep::Send(Frame::Stanza(digest_elem)) = step else {
            panic!("expected digest stanza");
        };
        assert_eq!(initiator.state(), ConnectionState::AwaitingAck);
        assert_eq!(initiator.session_id(), acceptor.session_id());

        // Acceptor verifies and acknowledges
        let step = acceptor.on_stanza(&digest_elem).unwrap();
        let HandshakeStep::Accept(Frame::Stanza(ack)) = step else {
            panic!("expected acknowledgement");
        };
        assert!(acceptor.is_connected());
        assert!(ack.cdata().is_none());

        // Initiator sees the empty acknowledgement
        let step = initiator.on_stanza(&ack).unwrap();
        assert_eq!(step, HandshakeStep::Established);
        assert!(initiator.is_connected());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mut initiator = Handshake::initiator("a.example", "b.example", "wrong");
        let mut acceptor = Handshake::acceptor("b.example", SECRET);

        let open = initiator.start().unwrap();
        let HandshakeStep::Send(reply) = acceptor.on_stream_open(attrs_of(&open)).unwrap() else {
            panic!("expected reply");
        };
        let HandshakeStep::Send(Frame::Stanza(digest_elem)) =
            initiator.on_stream_open(attrs_of(&reply)).unwrap()
        else {
            panic!("expected digest stanza");
        };

        let err = acceptor.on_stanza(&digest_elem).unwrap_err();
        assert_eq!(err, HandshakeError::DigestMismatch);
        assert!(!acceptor.is_connected());
    }

    #[test]
    fn test_empty_digest_rejected() {
        let mut acceptor = Handshake::acceptor("b.example", SECRET);
        let open = Frame::stream_open("a.example", "b.example", None);
        acceptor.on_stream_open(attrs_of(&open)).unwrap();

        let err = acceptor.on_stanza(&Element::new("handshake")).unwrap_err();
        assert_eq!(err, HandshakeError::DigestMismatch);
    }

    #[test]
    fn test_header_without_session_id_is_fatal() {
        let mut initiator = Handshake::initiator("a.example", "b.example", SECRET);
        let _ = initiator.start();
        let open = Frame::stream_open("b.example", "a.example", None);
        let err = initiator.on_stream_open(attrs_of(&open)).unwrap_err();
        assert_eq!(err, HandshakeError::MissingSessionId);
    }

    #[test]
    fn test_noise_before_connected_is_ignored() {
        let mut acceptor = Handshake::acceptor("b.example", SECRET);
        let step = acceptor
            .on_stanza(&Element::new("message").with_cdata("hello"))
            .unwrap();
        assert_eq!(step, HandshakeStep::Ignore);
        assert_eq!(acceptor.state(), ConnectionState::New);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
