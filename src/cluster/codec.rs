//! Stream transport: stanza framing codec
//!
//! Frames the persistent cluster stream into stream-open / stream-close /
//! stanza frames. Plays the role the length-prefixed message codec plays for
//! binary protocols, except the frame boundary is a balanced XML element.

use crate::cluster::{STREAM_NS, XMLNS};
use crate::stanza::{element, escape_attr, Element};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound for a single buffered stanza; a peer exceeding it is cut off
pub const MAX_STANZA_SIZE: usize = 262_144;

/// One frame on the cluster stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `<stream:stream ...>` header with its attributes
    StreamOpen(Vec<(String, String)>),
    /// `</stream:stream>` trailer
    StreamClose,
    /// A complete top-level stanza
    Stanza(Element),
}

impl Frame {
    /// Build the stream header an endpoint sends when opening a link.
    /// The acceptor side carries the freshly issued session id.
    pub fn stream_open(from: &str, to: &str, id: Option<&str>) -> Frame {
        let mut attrs = vec![
            ("xmlns".to_string(), XMLNS.to_string()),
            ("xmlns:stream".to_string(), STREAM_NS.to_string()),
            ("from".to_string(), from.to_string()),
            ("to".to_string(), to.to_string()),
        ];
        if let Some(id) = id {
            attrs.push(("id".to_string(), id.to_string()));
        }
        Frame::StreamOpen(attrs)
    }
}

/// Codec turning the byte stream into [`Frame`]s and back
pub struct StanzaCodec;

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// Find the unquoted `>` ending the tag that starts at `lt`
fn tag_end(src: &[u8], lt: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in src.iter().enumerate().skip(lt + 1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'>' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

impl Decoder for StanzaCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Skip inter-stanza whitespace and a leading XML declaration
        loop {
            let ws = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
            if ws > 0 {
                src.advance(ws);
            }
            if src.is_empty() {
                return Ok(None);
            }
            if src[0] != b'<' {
                return Err(invalid("text outside stanza"));
            }
            if src.len() >= 2 && src[1] == b'?' {
                match tag_end(src, 0) {
                    Some(end) => {
                        src.advance(end + 1);
                        continue;
                    }
                    None => return Ok(None),
                }
            }
            break;
        }

        // Stream trailer
        if src.starts_with(b"</stream:stream") {
            match tag_end(src, 0) {
                Some(end) => {
                    src.advance(end + 1);
                    return Ok(Some(Frame::StreamClose));
                }
                None => return Ok(None),
            }
        }

        // Stream header: an opening tag that is never closed on its own
        if src.starts_with(b"<stream:stream") {
            let Some(end) = tag_end(src, 0) else {
                return Ok(None);
            };
            let body_end = if src[end - 1] == b'/' { end - 1 } else { end };
            let body = std::str::from_utf8(&src["<stream:stream".len()..body_end])
                .map_err(|_| invalid("stream header is not UTF-8"))?;
            let attrs = element::parse_attributes(body)
                .map_err(|e| invalid(&format!("bad stream header: {}", e)))?;
            src.advance(end + 1);
            return Ok(Some(Frame::StreamOpen(attrs)));
        }

        // Balanced top-level element
        let mut pos = 0;
        let mut depth = 0i32;
        let frame_end = loop {
            let Some(lt) = src[pos..].iter().position(|&b| b == b'<').map(|i| pos + i) else {
                break None;
            };
            let Some(gt) = tag_end(src, lt) else {
                break None;
            };
            let tag = &src[lt..=gt];
            if tag.starts_with(b"</") {
                depth -= 1;
                if depth < 0 {
                    return Err(invalid("unbalanced closing tag"));
                }
                if depth == 0 {
                    break Some(gt);
                }
            } else if tag.starts_with(b"<!") {
                return Err(invalid("markup declarations are not accepted"));
            } else if tag.ends_with(b"/>") {
                if depth == 0 {
                    break Some(gt);
                }
            } else {
                depth += 1;
            }
            pos = gt + 1;
        };

        let Some(end) = frame_end else {
            if src.len() > MAX_STANZA_SIZE {
                return Err(invalid("stanza exceeds maximum size"));
            }
            return Ok(None);
        };

        let raw = src.split_to(end + 1);
        let text =
            std::str::from_utf8(&raw).map_err(|_| invalid("stanza is not UTF-8"))?;
        let elem = Element::parse(text).map_err(|e| invalid(&format!("bad stanza: {}", e)))?;
        Ok(Some(Frame::Stanza(elem)))
    }
}

impl Encoder<Frame> for StanzaCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::StreamOpen(attrs) => {
                let mut out = String::from("<stream:stream");
                for (name, value) in &attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("='");
                    out.push_str(&escape_attr(value));
                    out.push('\'');
                }
                out.push('>');
                dst.extend_from_slice(out.as_bytes());
            }
            Frame::StreamClose => {
                dst.extend_from_slice(b"</stream:stream>");
            }
            Frame::Stanza(elem) => {
                dst.extend_from_slice(elem.to_xml().as_bytes());
            }
        }
        Ok(())
    }
}
