//! Stanza packets and error replies
//!
//! A [`Packet`] wraps a wire [`Element`] with addressing accessors and the
//! error-reply construction used by the packet router.

use crate::stanza::Element;
use thiserror::Error;

/// Namespace for stanza-level error conditions
pub const ERROR_NS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// Packet construction errors
#[derive(Error, Debug, PartialEq)]
pub enum PacketError {
    #[error("Cannot send an error reply to an error packet")]
    ErrorLoop,
    #[error("Packet has no sender to reply to")]
    NoSender,
}

/// Stanza `type` attribute values the router cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaType {
    Get,
    Set,
    Result,
    Error,
}

impl StanzaType {
    pub fn from_attr(value: &str) -> Option<Self> {
        match value {
            "get" => Some(StanzaType::Get),
            "set" => Some(StanzaType::Set),
            "result" => Some(StanzaType::Result),
            "error" => Some(StanzaType::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StanzaType::Get => "get",
            StanzaType::Set => "set",
            StanzaType::Result => "result",
            StanzaType::Error => "error",
        }
    }

    /// Whether the originator expects a reply to a stanza of this type
    pub fn expects_reply(&self) -> bool {
        matches!(self, StanzaType::Get | StanzaType::Set)
    }
}

/// Stanza-level error conditions produced by this component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCondition {
    /// The component recognizes no application-level operations of its own
    FeatureNotImplemented,
    /// No cluster link currently owns the destination domain
    RemoteServerNotFound,
}

impl ErrorCondition {
    pub fn element_name(&self) -> &'static str {
        match self {
            ErrorCondition::FeatureNotImplemented => "feature-not-implemented",
            ErrorCondition::RemoteServerNotFound => "remote-server-not-found",
        }
    }
}

/// A single stanza in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    element: Element,
}

impl Packet {
    pub fn new(element: Element) -> Self {
        Self { element }
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }

    pub fn elem_name(&self) -> &str {
        self.element.name()
    }

    pub fn to(&self) -> Option<&str> {
        self.element.attr("to")
    }

    pub fn from(&self) -> Option<&str> {
        self.element.attr("from")
    }

    pub fn stanza_type(&self) -> Option<StanzaType> {
        self.element.attr("type").and_then(StanzaType::from_attr)
    }

    pub fn is_error(&self) -> bool {
        self.stanza_type() == Some(StanzaType::Error)
    }

    /// Build an error reply addressed back to the originator.
    ///
    /// The reply swaps `from`/`to`, carries `type='error'` and appends an
    /// `<error>` child with the given condition. Error packets never get an
    /// error reply; that would bounce between nodes forever.
    pub fn error_reply(
        &self,
        condition: ErrorCondition,
        text: &str,
    ) -> Result<Packet, PacketError> {
        if self.is_error() {
            return Err(PacketError::ErrorLoop);
        }
        let sender = self.from().ok_or(PacketError::NoSender)?.to_string();

        let mut reply = Element::new(self.element.name().to_string());
        if let Some(to) = self.to() {
            reply.set_attr("from", to.to_string());
        }
        reply.set_attr("to", sender);
        reply.set_attr("type", StanzaType::Error.as_str());
        for child in self.element.children() {
            reply.add_child(child.clone());
        }

        let mut error = Element::new("error").with_attr("type", "cancel");
        error.add_child(Element::new(condition.element_name()).with_attr("xmlns", ERROR_NS));
        if !text.is_empty() {
            error.add_child(
                Element::new("text")
                    .with_attr("xmlns", ERROR_NS)
                    .with_cdata(text),
            );
        }
        reply.add_child(error);

        Ok(Packet::new(reply))
    }
}

impl From<Element> for Packet {
    fn from(element: Element) -> Self {
        Packet::new(element)
    }
}
