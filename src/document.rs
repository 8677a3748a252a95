//! XML document parsing into an ordered element tree.
//!
//! Namespace handling follows one rule everywhere: element and attribute names
//! are reduced to their local name (everything after the first `:`), and
//! namespace declarations (`xmlns`, `xmlns:*`) are dropped. If two attributes
//! collapse to the same local name, the first one in document order wins.
//!
//! Both parsing and dropping a tree are iterative, so document depth is
//! bounded by memory rather than by the call stack.

use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt;
use std::str;

use crate::extraction::{Extractor, FieldPath, PathSegment};

/// The input bytes are not a well-formed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedDocument {
    /// Byte offset where the reader gave up
    pub position: u64,
    pub reason: String,
}

impl MalformedDocument {
    fn new(position: u64, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed XML document at byte {}: {}",
            self.position, self.reason
        )
    }
}

impl std::error::Error for MalformedDocument {}

/// One element of a parsed document.
#[derive(Debug, Clone)]
pub struct XmlNode {
    pub tag: String,
    pub attributes: IndexMap<String, String>,
    /// Direct text content; `None` when the element has no text.
    /// Segments split by comments or child elements are trimmed and joined
    /// with a single space.
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: IndexMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// First direct child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Text of the first direct child with the given tag.
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.child(tag).and_then(|c| c.text.as_deref())
    }

    /// Number of elements in this subtree, including this one.
    pub fn element_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(node.children.iter());
        }
        count
    }

    fn append_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match &mut self.text {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(text);
            }
            None => self.text = Some(text.to_string()),
        }
    }
}

impl Drop for XmlNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl Extractor for XmlNode {
    fn extract(&self, path: &FieldPath) -> Option<String> {
        let mut current = self;
        for (i, segment) in path.segments.iter().enumerate() {
            match segment {
                PathSegment::Tag(tag) => current = current.child(tag)?,
                PathSegment::Wildcard => current = current.children.first()?,
                PathSegment::Attribute(name) => {
                    if i + 1 != path.segments.len() {
                        return None;
                    }
                    return current
                        .attribute(name)
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
                }
            }
        }
        current.text.clone()
    }
}

/// Parse raw bytes into an element tree.
///
/// # Errors
///
/// Returns [`MalformedDocument`] for mismatched or unclosed tags, a missing
/// or repeated root element, text outside the root, bad escapes, duplicate
/// attributes, or names that are not valid UTF-8.
pub fn parse_document(bytes: &[u8]) -> Result<XmlNode, MalformedDocument> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut open: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        buf.clear();
        let position = reader.buffer_position() as u64;
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(err) => return Err(MalformedDocument::new(position, err.to_string())),
        };

        match event {
            Event::Start(ref e) => {
                if open.is_empty() && root.is_some() {
                    return Err(MalformedDocument::new(position, "multiple root elements"));
                }
                open.push(element_from_start(e, position)?);
            }
            Event::Empty(ref e) => {
                let node = element_from_start(e, position)?;
                close_element(node, &mut open, &mut root, position)?;
            }
            Event::End(_) => {
                let node = open
                    .pop()
                    .ok_or_else(|| MalformedDocument::new(position, "unexpected closing tag"))?;
                close_element(node, &mut open, &mut root, position)?;
            }
            Event::Text(ref e) => {
                let text = e
                    .unescape()
                    .map_err(|err| MalformedDocument::new(position, err.to_string()))?;
                push_text(&mut open, &text, position)?;
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                let text = str::from_utf8(&raw)
                    .map_err(|err| MalformedDocument::new(position, err.to_string()))?;
                push_text(&mut open, text, position)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = open.last() {
        return Err(MalformedDocument::new(
            reader.buffer_position() as u64,
            format!("unclosed element <{}>", unclosed.tag),
        ));
    }

    root.ok_or_else(|| MalformedDocument::new(0, "document has no root element"))
}

fn element_from_start(start: &BytesStart<'_>, position: u64) -> Result<XmlNode, MalformedDocument> {
    let local_name = start.local_name();
    let tag = str::from_utf8(local_name.as_ref())
        .map_err(|err| MalformedDocument::new(position, err.to_string()))?;
    let mut node = XmlNode::new(tag);

    for attr in start.attributes() {
        let attr = attr.map_err(|err| MalformedDocument::new(position, err.to_string()))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }

        let local = attr.key.local_name();
        let name = str::from_utf8(local.as_ref())
            .map_err(|err| MalformedDocument::new(position, err.to_string()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| MalformedDocument::new(position, err.to_string()))?
            .into_owned();

        node.attributes.entry(name).or_insert(value);
    }

    Ok(node)
}

fn close_element(
    node: XmlNode,
    open: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    position: u64,
) -> Result<(), MalformedDocument> {
    match open.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(MalformedDocument::new(position, "multiple root elements")),
    }
    Ok(())
}

fn push_text(open: &mut [XmlNode], text: &str, position: u64) -> Result<(), MalformedDocument> {
    match open.last_mut() {
        Some(node) => node.append_text(text),
        None if text.trim().is_empty() => {}
        None => return Err(MalformedDocument::new(position, "text outside of root element")),
    }
    Ok(())
}
