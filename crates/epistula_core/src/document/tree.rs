//! Editable XML tree with one stable serialization.
//!
//! # Responsibility
//! - Parse corpus XML into owned nodes, resolving entities once.
//! - Serialize trees into the single canonical byte form used for storage,
//!   export and replay comparison.
//!
//! # Invariants
//! - Serialization is deterministic: attributes sorted by name, childless
//!   elements collapsed to `<name/>`, text minimally escaped.
//! - After [`XmlTree::normalize`] no two text siblings are adjacent and no
//!   text node is empty.
//! - Document-level whitespace is not part of the tree; child indexes count
//!   from the root element and document-level comments only.

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Node name reported for text nodes in paths and errors.
pub const TEXT_NODE_NAME: &str = "#text";
/// Node name reported for comment nodes in paths and errors.
pub const COMMENT_NODE_NAME: &str = "#comment";

/// Document parse failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Malformed XML, with the underlying reader message.
    Syntax(String),
    /// Well-formed construct this engine refuses to carry.
    Unsupported(&'static str),
    /// Document contains no root element.
    NoRootElement,
    /// Document contains more than one root element.
    MultipleRootElements,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(message) => write!(f, "malformed document: {message}"),
            Self::Unsupported(construct) => write!(f, "unsupported construct: {construct}"),
            Self::NoRootElement => write!(f, "document has no root element"),
            Self::MultipleRootElements => write!(f, "document has more than one root element"),
        }
    }
}

impl Error for ParseError {}

/// One element node with sorted attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// BTreeMap keeps serialization order independent of insertion order.
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlNode>,
}

impl Element {
    /// Creates an element without attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Returns the one attribute value, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Concatenated text content of this element's subtree, in document
    /// order. Comments contribute nothing.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.append_text_content(&mut out);
        }
        out
    }
}

/// One node in the editable tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    Comment(String),
}

impl XmlNode {
    /// Name used to address this node in paths: the element name, `#text`
    /// or `#comment`.
    pub fn node_name(&self) -> &str {
        match self {
            Self::Element(element) => &element.name,
            Self::Text(_) => TEXT_NODE_NAME,
            Self::Comment(_) => COMMENT_NODE_NAME,
        }
    }

    /// Returns the element, if this node is one.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Concatenated text content of this node, in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.append_text_content(&mut out);
        out
    }

    fn append_text_content(&self, out: &mut String) {
        match self {
            Self::Element(element) => {
                for child in &element.children {
                    child.append_text_content(out);
                }
            }
            Self::Text(text) => out.push_str(text),
            Self::Comment(_) => {}
        }
    }
}

/// One parsed document.
///
/// `nodes` holds the document-level children: exactly one root element plus
/// any document-level comments, in order. The XML declaration is kept aside
/// so it never shifts child indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlTree {
    pub declaration: Option<String>,
    pub nodes: Vec<XmlNode>,
}

impl XmlTree {
    /// Parses a document into a normalized tree.
    ///
    /// # Errors
    /// - [`ParseError::Syntax`] for malformed input and for non-whitespace
    ///   text outside the root element.
    /// - [`ParseError::Unsupported`] for DOCTYPE and processing
    ///   instructions.
    pub fn parse(input: &str) -> Result<XmlTree, ParseError> {
        let mut reader = Reader::from_str(input);
        let mut declaration: Option<String> = None;
        let mut doc_children: Vec<XmlNode> = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut roots_seen = 0usize;

        loop {
            match reader.read_event() {
                Err(err) => return Err(ParseError::Syntax(err.to_string())),
                Ok(Event::Decl(decl)) => {
                    if declaration.is_some() || !doc_children.is_empty() || !stack.is_empty() {
                        return Err(ParseError::Syntax("misplaced XML declaration".to_string()));
                    }
                    declaration = Some(declaration_text(&decl)?);
                }
                Ok(Event::Start(start)) => {
                    stack.push(element_from_start(&start)?);
                }
                Ok(Event::Empty(start)) => {
                    let element = element_from_start(&start)?;
                    attach(
                        XmlNode::Element(element),
                        &mut stack,
                        &mut doc_children,
                        &mut roots_seen,
                    )?;
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop().ok_or_else(|| {
                        ParseError::Syntax("closing tag without opening tag".to_string())
                    })?;
                    attach(
                        XmlNode::Element(element),
                        &mut stack,
                        &mut doc_children,
                        &mut roots_seen,
                    )?;
                }
                Ok(Event::Text(text)) => {
                    let text = text
                        .unescape()
                        .map_err(|err| ParseError::Syntax(err.to_string()))?
                        .into_owned();
                    attach(
                        XmlNode::Text(text),
                        &mut stack,
                        &mut doc_children,
                        &mut roots_seen,
                    )?;
                }
                Ok(Event::CData(cdata)) => {
                    let text = bytes_to_string(cdata.into_inner())?;
                    attach(
                        XmlNode::Text(text),
                        &mut stack,
                        &mut doc_children,
                        &mut roots_seen,
                    )?;
                }
                Ok(Event::Comment(comment)) => {
                    let text = bytes_to_string(comment.into_inner())?;
                    attach(
                        XmlNode::Comment(text),
                        &mut stack,
                        &mut doc_children,
                        &mut roots_seen,
                    )?;
                }
                Ok(Event::PI(_)) => return Err(ParseError::Unsupported("processing instruction")),
                Ok(Event::DocType(_)) => return Err(ParseError::Unsupported("doctype")),
                Ok(Event::Eof) => break,
            }
        }

        if !stack.is_empty() {
            return Err(ParseError::Syntax(
                "unexpected end of document inside element".to_string(),
            ));
        }
        if roots_seen == 0 {
            return Err(ParseError::NoRootElement);
        }

        let mut tree = XmlTree {
            declaration,
            nodes: doc_children,
        };
        tree.normalize();
        Ok(tree)
    }

    /// Serializes the tree into its canonical byte form.
    ///
    /// The output always ends with a single newline; document-level nodes
    /// are separated by newlines. Everything below the root element is
    /// emitted without any added whitespace.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        if let Some(declaration) = &self.declaration {
            out.push_str(declaration);
            out.push('\n');
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            write_node(&mut out, node);
        }
        out.push('\n');
        out
    }

    /// Returns the root element.
    pub fn root(&self) -> Option<&Element> {
        self.nodes.iter().find_map(XmlNode::as_element)
    }

    /// Merges adjacent text siblings and drops empty text nodes, across the
    /// whole tree. Edits that split or remove nodes call this so child
    /// indexes stay canonical.
    pub fn normalize(&mut self) {
        normalize_children(&mut self.nodes);
    }
}

fn normalize_children(nodes: &mut Vec<XmlNode>) {
    let mut normalized: Vec<XmlNode> = Vec::with_capacity(nodes.len());
    for mut node in nodes.drain(..) {
        match &mut node {
            XmlNode::Text(text) => {
                if text.is_empty() {
                    continue;
                }
                if let Some(XmlNode::Text(previous)) = normalized.last_mut() {
                    previous.push_str(text);
                    continue;
                }
            }
            XmlNode::Element(element) => {
                normalize_children(&mut element.children);
            }
            XmlNode::Comment(_) => {}
        }
        normalized.push(node);
    }
    *nodes = normalized;
}

fn write_node(out: &mut String, node: &XmlNode) {
    match node {
        XmlNode::Element(element) => {
            out.push('<');
            out.push_str(&element.name);
            for (name, value) in &element.attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape(value.as_str()));
                out.push('"');
            }
            if element.children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in &element.children {
                    write_node(out, child);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
        XmlNode::Text(text) => out.push_str(&partial_escape(text.as_str())),
        XmlNode::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
    }
}

fn attach(
    node: XmlNode,
    stack: &mut Vec<Element>,
    doc_children: &mut Vec<XmlNode>,
    roots_seen: &mut usize,
) -> Result<(), ParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }

    match &node {
        XmlNode::Element(_) => {
            *roots_seen += 1;
            if *roots_seen > 1 {
                return Err(ParseError::MultipleRootElements);
            }
            doc_children.push(node);
        }
        XmlNode::Comment(_) => doc_children.push(node),
        // Inter-element whitespace at document level is formatting, not
        // content; anything else there is malformed.
        XmlNode::Text(text) => {
            if !text.trim().is_empty() {
                return Err(ParseError::Syntax(
                    "text content outside the root element".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, ParseError> {
    let name = bytes_to_string(Cow::Borrowed(start.name().as_ref()))?;
    let mut attributes = BTreeMap::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| ParseError::Syntax(err.to_string()))?;
        let key = bytes_to_string(Cow::Borrowed(attribute.key.as_ref()))?;
        let value = attribute
            .unescape_value()
            .map_err(|err| ParseError::Syntax(err.to_string()))?
            .into_owned();
        attributes.insert(key, value);
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn declaration_text(decl: &BytesDecl<'_>) -> Result<String, ParseError> {
    let version = decl
        .version()
        .map_err(|err| ParseError::Syntax(err.to_string()))?;
    let mut out = format!("<?xml version=\"{}\"", bytes_to_string(version)?);
    if let Some(encoding) = decl.encoding() {
        let encoding = encoding.map_err(|err| ParseError::Syntax(err.to_string()))?;
        out.push_str(&format!(" encoding=\"{}\"", bytes_to_string(encoding)?));
    }
    if let Some(standalone) = decl.standalone() {
        let standalone = standalone.map_err(|err| ParseError::Syntax(err.to_string()))?;
        out.push_str(&format!(" standalone=\"{}\"", bytes_to_string(standalone)?));
    }
    out.push_str("?>");
    Ok(out)
}

fn bytes_to_string(value: Cow<'_, [u8]>) -> Result<String, ParseError> {
    std::str::from_utf8(&value)
        .map(str::to_string)
        .map_err(|err| ParseError::Syntax(format!("invalid utf-8: {err}")))
}

/// Returns whether `name` is usable as an element name in wrap actions.
/// Deliberately stricter than the XML grammar: ASCII letters, digits,
/// `_ - . :`, not starting with a digit, dash or dot.
pub(crate) fn is_valid_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_' || first == ':') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}
