//! Stanza layer: XML elements and packets
//!
//! The cluster wire protocol is XML-stanza framed over a persistent stream.
//! This module holds the element tree, the packet wrapper the router works
//! with, and the error-reply machinery.

pub mod element;
pub mod packet;

pub use element::{escape_attr, escape_text, parse_attributes, Element, ParseError};
pub use packet::{ErrorCondition, Packet, PacketError, StanzaType, ERROR_NS};
