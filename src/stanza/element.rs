//! XML element tree for wire stanzas
//!
//! A deliberately small element model: name, attributes, character data and
//! child elements. Covers the subset of XML that cluster links actually
//! exchange (no comments, no CDATA sections, no processing instructions
//! beyond a leading declaration).

use thiserror::Error;

/// Errors raised while parsing an element from text
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Unexpected end of input")]
    UnexpectedEnd,
    #[error("Malformed tag at byte {0}")]
    MalformedTag(usize),
    #[error("Mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedClose { expected: String, found: String },
    #[error("Trailing content after root element")]
    TrailingContent,
    #[error("Invalid attribute syntax at byte {0}")]
    InvalidAttribute(usize),
}

/// A single XML element
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    cdata: Option<String>,
    children: Vec<Element>,
}

impl Element {
    /// Create an empty element with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            cdata: None,
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style character data setter
    pub fn with_cdata(mut self, cdata: impl Into<String>) -> Self {
        self.cdata = Some(cdata.into());
        self
    }

    /// Builder-style child appender
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an attribute value by name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing any existing value under the same name
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn cdata(&self) -> Option<&str> {
        self.cdata.as_deref()
    }

    pub fn set_cdata(&mut self, cdata: impl Into<String>) {
        self.cdata = Some(cdata.into());
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn add_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Find the first direct child with the given name
    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Render the element (and its subtree) as XML text
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("='");
            out.push_str(&escape_attr(value));
            out.push('\'');
        }
        if self.cdata.is_none() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if let Some(cdata) = &self.cdata {
            out.push_str(&escape_text(cdata));
        }
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Parse a complete, balanced element from text
    pub fn parse(input: &str) -> Result<Element, ParseError> {
        let mut parser = Parser {
            input: input.as_bytes(),
            pos: 0,
        };
        parser.skip_whitespace();
        parser.skip_declaration();
        let element = parser.parse_element()?;
        parser.skip_whitespace();
        if parser.pos < parser.input.len() {
            return Err(ParseError::TrailingContent);
        }
        Ok(element)
    }
}

/// Escape character data for XML output
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape an attribute value for XML output (single-quoted)
pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let (replacement, consumed) = if rest.starts_with("&amp;") {
            ("&", 5)
        } else if rest.starts_with("&lt;") {
            ("<", 4)
        } else if rest.starts_with("&gt;") {
            (">", 4)
        } else if rest.starts_with("&apos;") {
            ("'", 6)
        } else if rest.starts_with("&quot;") {
            ("\"", 6)
        } else {
            ("&", 1)
        };
        out.push_str(replacement);
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

/// Parse the attribute list out of a raw tag body (the text between the tag
/// name and the closing `>`), shared with the stream-open handling in the
/// codec.
pub fn parse_attributes(tag_body: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut parser = Parser {
        input: tag_body.as_bytes(),
        pos: 0,
    };
    parser.parse_attributes()
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn skip_declaration(&mut self) {
        if self.remaining().starts_with(b"<?") {
            if let Some(end) = find(self.input, self.pos, b'>') {
                self.pos = end + 1;
                self.skip_whitespace();
            }
        }
    }

    fn remaining(&self) -> &[u8] {
        &self.input[self.pos..]
    }

    fn parse_element(&mut self) -> Result<Element, ParseError> {
        if self.pos >= self.input.len() || self.input[self.pos] != b'<' {
            return Err(ParseError::MalformedTag(self.pos));
        }
        self.pos += 1;
        let name = self.parse_name()?;
        let attributes = self.parse_attributes()?;
        let mut element = Element::new(name.clone());
        element.attributes = attributes;

        if self.remaining().starts_with(b"/>") {
            self.pos += 2;
            return Ok(element);
        }
        if self.pos >= self.input.len() || self.input[self.pos] != b'>' {
            return Err(ParseError::MalformedTag(self.pos));
        }
        self.pos += 1;

        // Content: interleaved character data and children until the close tag
        let mut cdata = String::new();
        loop {
            let Some(lt) = find(self.input, self.pos, b'<') else {
                return Err(ParseError::UnexpectedEnd);
            };
            let text = std::str::from_utf8(&self.input[self.pos..lt])
                .map_err(|_| ParseError::MalformedTag(self.pos))?;
            cdata.push_str(&unescape(text));
            self.pos = lt;

            if self.remaining().starts_with(b"</") {
                self.pos += 2;
                let close_name = self.parse_name()?;
                self.skip_whitespace();
                if self.pos >= self.input.len() || self.input[self.pos] != b'>' {
                    return Err(ParseError::MalformedTag(self.pos));
                }
                self.pos += 1;
                if close_name != name {
                    return Err(ParseError::MismatchedClose {
                        expected: name,
                        found: close_name,
                    });
                }
                let trimmed = cdata.trim();
                if !trimmed.is_empty() {
                    element.cdata = Some(trimmed.to_string());
                }
                return Ok(element);
            }
            element.children.push(self.parse_element()?);
        }
    }

    fn parse_name(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while self.pos < self.input.len() && is_name_byte(self.input[self.pos]) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::MalformedTag(start));
        }
        let name = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| ParseError::MalformedTag(start))?;
        Ok(name.to_string())
    }

    fn parse_attributes(&mut self) -> Result<Vec<(String, String)>, ParseError> {
        let mut attributes = Vec::new();
        loop {
            self.skip_whitespace();
            if self.pos >= self.input.len() {
                return Ok(attributes);
            }
            match self.input[self.pos] {
                b'>' | b'/' => return Ok(attributes),
                _ => {}
            }
            let name = self.parse_name()?;
            self.skip_whitespace();
            if self.pos >= self.input.len() || self.input[self.pos] != b'=' {
                return Err(ParseError::InvalidAttribute(self.pos));
            }
            self.pos += 1;
            self.skip_whitespace();
            if self.pos >= self.input.len() {
                return Err(ParseError::UnexpectedEnd);
            }
            let quote = self.input[self.pos];
            if quote != b'\'' && quote != b'"' {
                return Err(ParseError::InvalidAttribute(self.pos));
            }
            self.pos += 1;
            let Some(end) = find(self.input, self.pos, quote) else {
                return Err(ParseError::UnexpectedEnd);
            };
            let value = std::str::from_utf8(&self.input[self.pos..end])
                .map_err(|_| ParseError::InvalidAttribute(self.pos))?;
            attributes.push((name, unescape(value)));
            self.pos = end + 1;
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b':' || b == b'-' || b == b'_' || b == b'.'
}

fn find(input: &[u8], from: usize, needle: u8) -> Option<usize> {
    input[from..].iter().position(|&b| b == needle).map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_self_closing() {
        let el = Element::new("handshake");
        assert_eq!(el.to_xml(), "<handshake/>");
    }

    #[test]
    fn test_render_with_cdata_and_attrs() {
        let el = Element::new("handshake").with_cdata("abc123");
        assert_eq!(el.to_xml(), "<handshake>abc123</handshake>");

        let el = Element::new("cluster")
            .with_attr("from", "cluster@a.example")
            .with_attr("type", "set");
        assert_eq!(
            el.to_xml(),
            "<cluster from='cluster@a.example' type='set'/>"
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let el = Element::new("cluster")
            .with_attr("from", "cluster@a.example")
            .with_attr("to", "controller@b.example")
            .with_child(Element::new("node-connected").with_attr("node", "b.example"));
        let parsed = Element::parse(&el.to_xml()).unwrap();
        assert_eq!(parsed, el);
    }

    #[test]
    fn test_parse_cdata() {
        let el = Element::parse("<handshake>deadbeef</handshake>").unwrap();
        assert_eq!(el.name(), "handshake");
        assert_eq!(el.cdata(), Some("deadbeef"));
    }

    #[test]
    fn test_parse_escaped() {
        let el = Element::parse("<message body='a &amp; b'>&lt;hi&gt;</message>").unwrap();
        assert_eq!(el.attr("body"), Some("a & b"));
        assert_eq!(el.cdata(), Some("<hi>"));
    }

    #[test]
    fn test_parse_nested() {
        let xml = "<iq type='get'><query node='a.example'><item/></query></iq>";
        let el = Element::parse(xml).unwrap();
        assert_eq!(el.attr("type"), Some("get"));
        let query = el.find_child("query").unwrap();
        assert_eq!(query.attr("node"), Some("a.example"));
        assert_eq!(query.children().len(), 1);
    }

    #[test]
    fn test_parse_mismatched_close() {
        let err = Element::parse("<a><b></a></b>").unwrap_err();
        assert!(matches!(err, ParseError::MismatchedClose { .. }));
    }

    #[test]
    fn test_parse_trailing_content() {
        let err = Element::parse("<a/><b/>").unwrap_err();
        assert_eq!(err, ParseError::TrailingContent);
    }

    #[test]
    fn test_parse_attributes_helper() {
        let attrs = parse_attributes("from='a.example' to='b.example' id='x-1'").unwrap();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[2], ("id".to_string(), "x-1".to_string()));
    }

    #[test]
    fn test_escape_round_trip() {
        let raw = "a<b>&'\"c";
        assert_eq!(unescape(&escape_attr(raw)), raw);
    }
}
