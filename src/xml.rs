//! A minimal owned XML element tree, built on top of `quick-xml`.
//!
//! Administrative templates are small (tens of kilobytes at most), and resolving them needs random
//! access to sibling sections (`policyNamespaces` before `categories` before `policies`), so we
//! materialize each document once and walk the tree afterwards.
//!
//! Element and attribute names are stored as *local* names: ADMX/ADML documents put everything in
//! a single default namespace, and the occasional `xsd:`/`xsi:` prefixed attribute is irrelevant.

use std::borrow::Cow;

use encoding::all::{UTF_16BE, UTF_16LE};
use encoding::{DecoderTrap, Encoding};
use quick_xml::Reader;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("document is not valid {encoding}: {message}")]
    Encoding {
        encoding: &'static str,
        message: String,
    },

    #[error("syntax error at position {position}: {source}")]
    Syntax {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("malformed attribute at position {position}: {source}")]
    Attribute {
        position: u64,
        #[source]
        source: AttrError,
    },

    #[error("closing tag without a matching opening tag at position {position}")]
    UnbalancedEnd { position: u64 },

    #[error("document ended while `{name}` was still open")]
    UnexpectedEof { name: String },

    #[error("document has no root element")]
    NoRootElement,

    #[error("document has more than one root element")]
    MultipleRoots,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated text and CDATA content of this element (not of its descendants).
    pub text: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// All elements below this one, in document order (pre-order), excluding `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// Decodes raw file bytes into text, honoring a UTF-8 or UTF-16 byte order mark.
///
/// Files without a BOM are expected to be UTF-8.
pub fn decode_document(bytes: &[u8]) -> Result<Cow<'_, str>, XmlError> {
    if let Some(rest) = bytes.strip_prefix(UTF16LE_BOM) {
        return UTF_16LE
            .decode(rest, DecoderTrap::Strict)
            .map(Cow::Owned)
            .map_err(|e| XmlError::Encoding {
                encoding: "UTF-16LE",
                message: e.into_owned(),
            });
    }

    if let Some(rest) = bytes.strip_prefix(UTF16BE_BOM) {
        return UTF_16BE
            .decode(rest, DecoderTrap::Strict)
            .map(Cow::Owned)
            .map_err(|e| XmlError::Encoding {
                encoding: "UTF-16BE",
                message: e.into_owned(),
            });
    }

    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map(Cow::Borrowed)
        .map_err(|e| XmlError::Encoding {
            encoding: "UTF-8",
            message: e.to_string(),
        })
}

/// Parses raw bytes (see [`decode_document`]) into an element tree.
pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement, XmlError> {
    let text = decode_document(bytes)?;
    parse_document(&text)
}

/// Parses a document into its root element.
pub fn parse_document(xml: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let position = reader.buffer_position() as u64;
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(source) => {
                return Err(XmlError::Syntax {
                    position: reader.buffer_position() as u64,
                    source,
                });
            }
        };

        match event {
            Event::Start(start) => stack.push(element_from_start(&start, position)?),
            Event::Empty(start) => {
                let element = element_from_start(&start, position)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::UnbalancedEnd { position })?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|source| XmlError::Syntax { position, source })?;
                    current.text.push_str(&text);
                }
            }
            Event::CData(cdata) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctypes carry nothing we use.
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::UnexpectedEof { name: open.name });
    }

    root.ok_or(XmlError::NoRootElement)
}

fn element_from_start(start: &BytesStart, position: u64) -> Result<XmlElement, XmlError> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.local_name().as_ref()));

    for attr in start.attributes() {
        let attr = attr.map_err(|source| XmlError::Attribute { position, source })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|source| XmlError::Syntax { position, source })?;
        element.attributes.push((key, value.into_owned()));
    }

    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => return Err(XmlError::MultipleRoots),
        None => *root = Some(element),
    }
    Ok(())
}
