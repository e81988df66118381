//! Shallow XML view used for recorder responses.
//!
//! Recorder responses are flat documents: a root element whose children
//! carry plain text (`<methodresponse><methodname>connect</methodname>
//! <connected>yes</connected>...</methodresponse>`). Only the root name and
//! the text of its direct children are kept.
//!
//! SOAP replies nest deeper; [`XmlElement`] keeps the whole tree with
//! namespace prefixes stripped from element and attribute names.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// A parsed document: root element name plus direct child elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: String,
    pub children: Vec<(String, String)>,
}

impl XmlDocument {
    /// Parse a complete document. Mismatched, unclosed or missing elements
    /// are reported as an error message.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut root: Option<String> = None;
        let mut children = Vec::new();
        let mut depth = 0usize;
        let mut current: Option<(String, String)> = None;

        loop {
            match reader.read_event().map_err(|e| e.to_string())? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    depth += 1;
                    match depth {
                        1 if root.is_none() => root = Some(name),
                        1 => return Err("multiple root elements".to_string()),
                        2 => current = Some((name, String::new())),
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match depth {
                        0 if root.is_none() => root = Some(name),
                        0 => return Err("multiple root elements".to_string()),
                        1 => children.push((name, String::new())),
                        _ => {}
                    }
                }
                Event::Text(t) => {
                    let value = t.unescape().map_err(|e| e.to_string())?;
                    match (&mut current, depth) {
                        (Some((_, text)), 2) => text.push_str(&value),
                        (_, 0) => return Err("text outside root element".to_string()),
                        _ => {}
                    }
                }
                Event::CData(t) => {
                    if let (Some((_, text)), 2) = (&mut current, depth) {
                        text.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::End(_) => {
                    if depth == 2 {
                        if let Some(child) = current.take() {
                            children.push(child);
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err("unclosed element".to_string());
        }
        let root = root.ok_or_else(|| "no root element".to_string())?;
        Ok(XmlDocument { root, children })
    }

    /// Text of the first direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&str> {
        self.children
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Element of a fully parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Local name, without namespace prefix.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated text directly inside this element.
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a document into its root element.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event().map_err(|e| e.to_string())? {
                Event::Start(e) => stack.push(element(&e)?),
                Event::Empty(e) => {
                    let elem = element(&e)?;
                    attach(&mut stack, &mut root, elem)?;
                }
                Event::End(_) => {
                    let elem = stack.pop().ok_or_else(|| "unexpected end tag".to_string())?;
                    attach(&mut stack, &mut root, elem)?;
                }
                Event::Text(t) => {
                    let value = t.unescape().map_err(|e| e.to_string())?;
                    match stack.last_mut() {
                        Some(parent) => parent.text.push_str(&value),
                        None => return Err("text outside root element".to_string()),
                    }
                }
                Event::CData(t) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.text.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err("unclosed element".to_string());
        }
        root.ok_or_else(|| "no root element".to_string())
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Direct children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first direct child with the given local name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// First element with the given local name, depth first, self included.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn element(start: &BytesStart<'_>) -> Result<XmlElement, String> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        ..XmlElement::default()
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    elem: XmlElement,
) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(elem),
        None if root.is_none() => *root = Some(elem),
        None => return Err("multiple root elements".to_string()),
    }
    Ok(())
}
