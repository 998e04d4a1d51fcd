//! Minimal XML element tree built from the `quick-xml` event stream.
//!
//! TEI output from document-structure services is loosely structured: the
//! same information can sit at different depths depending on service
//! version and options. Walking a small owned tree is far simpler than
//! threading that tolerance through a streaming state machine, and TEI
//! documents for a single paper are only a few hundred kilobytes.
//!
//! Element names are stored as local names (`tei:div` → `div`); attribute
//! keys keep their prefix (`xml:id`) and [`Element::attr`] falls back to a
//! local-name match.

use crate::error::Tei2MdError;
use crate::pipeline::postprocess::normalise_whitespace;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes and children in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Element {
        let qname = start.name();
        let name = String::from_utf8_lossy(local_name(qname.as_ref())).into_owned();
        let attrs = start
            .attributes()
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = unescape(&String::from_utf8_lossy(&attr.value));
                (key, value)
            })
            .collect();
        Element {
            name,
            attrs,
            children: Vec::new(),
        }
    }

    /// Attribute value by exact key, then by local name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .or_else(|| {
                self.attrs
                    .iter()
                    .find(|(k, _)| local_name_str(k) == local_name_str(key))
            })
            .map(|(_, v)| v.as_str())
    }

    /// The `xml:id` attribute.
    pub fn id(&self) -> Option<&str> {
        self.attr("xml:id")
    }

    /// Direct element children.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Direct element children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.name == name)
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Follow a path of direct-child names.
    pub fn find_path(&self, path: &[&str]) -> Option<&Element> {
        path.iter()
            .try_fold(self, |current, name| current.child(name))
    }

    /// All descendants with the given local name, in document order.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        collect_descendants(self, name, &mut found);
        found
    }

    /// Concatenated text of this element and all descendants, with
    /// whitespace runs collapsed to single spaces.
    pub fn text(&self) -> String {
        let mut raw = String::new();
        append_text(self, &mut raw);
        normalise_whitespace(&raw)
    }
}

fn collect_descendants<'a>(el: &'a Element, name: &str, out: &mut Vec<&'a Element>) {
    for child in el.elements() {
        if child.name == name {
            out.push(child);
        }
        collect_descendants(child, name, out);
    }
}

fn append_text(el: &Element, out: &mut String) {
    for node in &el.children {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(child) => {
                // Inline children (refs, formulas) flow into the sentence;
                // a space keeps adjacent block-level text from fusing.
                append_text(child, out);
                if !out.ends_with(char::is_whitespace) && is_block(&child.name) {
                    out.push(' ');
                }
            }
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "head" | "item" | "formula" | "note" | "persName" | "forename" | "surname"
    )
}

/// Parse an XML string and return its root element, if any.
///
/// Comments, processing instructions, and the doctype are dropped. Text
/// outside the root element is ignored.
pub fn parse(xml: &str) -> Result<Option<Element>, Tei2MdError> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::from_start(&e)),
            Ok(Event::Empty(e)) => {
                let el = Element::from_start(&e);
                attach(&mut stack, &mut root, el);
            }
            Ok(Event::End(_)) => {
                if let Some(el) = stack.pop() {
                    attach(&mut stack, &mut root, el);
                }
            }
            Ok(Event::Text(e)) => {
                push_text(&mut stack, &String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::CData(e)) => {
                push_text(&mut stack, &String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::GeneralRef(e)) => {
                let entity = String::from_utf8_lossy(e.as_ref());
                if let Some(resolved) = resolve_entity(&entity) {
                    push_text(&mut stack, &resolved);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Tei2MdError::MalformedXml {
                    position: reader.error_position(),
                    detail: e.to_string(),
                })
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Tei2MdError::MalformedXml {
            position: reader.buffer_position(),
            detail: format!("unclosed element <{}>", open.name),
        });
    }

    Ok(root)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(el)),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

fn push_text(stack: &mut [Element], text: &str) {
    let Some(parent) = stack.last_mut() else {
        return;
    };
    if let Some(Node::Text(last)) = parent.children.last_mut() {
        last.push_str(text);
    } else {
        parent.children.push(Node::Text(text.to_string()));
    }
}

/// Extract local name from a namespaced XML name (`tei:div` → `div`).
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

fn local_name_str(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Resolve an XML entity reference (without `&` and `;`).
fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };
    code.and_then(char::from_u32).map(|c| c.to_string())
}

static RE_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(#x[0-9A-Fa-f]+|#[0-9]+|[A-Za-z]+);").unwrap());

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    RE_ENTITY
        .replace_all(value, |caps: &regex::Captures<'_>| {
            resolve_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
