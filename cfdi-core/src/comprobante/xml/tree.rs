//! Namespace-aware element tree used by parsing, validation and canonicalization.
use std::io::{BufReader, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use super::parse::ParseError;

/// One XML element with resolved namespace.
///
/// Attributes keep their qualified name as written (`rfc`,
/// `xsi:schemaLocation`); namespace declarations are not kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    namespace: Option<String>,
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Local name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Elements reached by a `/`-separated path of local names.
    /// An empty path yields `self`.
    pub fn descendants<'a>(&'a self, path: &str) -> Vec<&'a Element> {
        let mut current = vec![self];
        for step in path.split('/').filter(|step| !step.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|element| {
                    element
                        .children
                        .iter()
                        .filter(move |child| child.name == step)
                })
                .collect();
        }
        current
    }
}

/// Reads a single element tree from `source`.
///
/// `source` is consumed and dropped before returning, on success and on
/// every error path.
pub fn read_tree<R: Read>(source: R) -> Result<Element, ParseError> {
    let mut reader = NsReader::from_reader(BufReader::new(source));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut open: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(xml_error)?;
        let namespace = match resolved {
            ResolveResult::Bound(ns) => Some(utf8(ns.as_ref())?.to_string()),
            ResolveResult::Unbound => None,
            ResolveResult::Unknown(prefix) => {
                return Err(ParseError::XmlParse(format!(
                    "unbound namespace prefix {:?}",
                    String::from_utf8_lossy(&prefix)
                )));
            }
        };

        match event {
            Event::Start(start) => {
                open.push(start_element(namespace, &start)?);
            }
            Event::Empty(start) => {
                let element = start_element(namespace, &start)?;
                close_element(&mut open, &mut root, element)?;
            }
            Event::End(_) => {
                let element = open
                    .pop()
                    .ok_or_else(|| ParseError::XmlParse("unexpected end tag".into()))?;
                close_element(&mut open, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_error)?;
                append_text(&mut open, &text)?;
            }
            Event::CData(data) => {
                let bytes = data.into_inner();
                let text = utf8(&bytes)?;
                append_text(&mut open, text)?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
        }
        buf.clear();
    }

    if !open.is_empty() {
        return Err(ParseError::XmlParse(format!(
            "unexpected end of document inside <{}>",
            open.last().map(|element| element.name.as_str()).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| ParseError::XmlParse("document has no root element".into()))
}

fn start_element(namespace: Option<String>, start: &BytesStart<'_>) -> Result<Element, ParseError> {
    let name = utf8(start.local_name().as_ref())?.to_string();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = utf8(attribute.key.as_ref())?.to_string();
        let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        namespace,
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn close_element(
    open: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), ParseError> {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(ParseError::XmlParse("more than one root element".into()));
        }
    }
    Ok(())
}

fn append_text(open: &mut [Element], text: &str) -> Result<(), ParseError> {
    match open.last_mut() {
        Some(current) => {
            current.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(ParseError::XmlParse("text outside the root element".into())),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|e| ParseError::XmlParse(e.to_string()))
}

fn xml_error(err: impl Into<quick_xml::Error>) -> ParseError {
    match err.into() {
        quick_xml::Error::Io(source) => ParseError::Io(source),
        other => ParseError::XmlParse(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_namespaces_attributes_and_children() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<cfdi:Comprobante xmlns:cfdi="http://www.sat.gob.mx/cfd/3" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="a b" version="3.0">
  <cfdi:Emisor rfc="PPL961114GZ1" nombre="A &amp; B"/>
  <cfdi:Conceptos>
    <cfdi:Concepto descripcion="uno"/>
    <cfdi:Concepto descripcion="dos"/>
  </cfdi:Conceptos>
</cfdi:Comprobante>"#;
        let root = read_tree(xml.as_bytes()).expect("tree");
        assert_eq!(root.name(), "Comprobante");
        assert_eq!(root.namespace(), Some("http://www.sat.gob.mx/cfd/3"));
        assert_eq!(root.attribute("version"), Some("3.0"));
        assert_eq!(root.attribute("xsi:schemaLocation"), Some("a b"));
        assert!(root.attribute("xmlns:cfdi").is_none());
        assert_eq!(root.child("Emisor").and_then(|e| e.attribute("nombre")), Some("A & B"));
        let names: Vec<_> = root
            .descendants("Conceptos/Concepto")
            .into_iter()
            .filter_map(|c| c.attribute("descripcion"))
            .collect();
        assert_eq!(names, vec!["uno", "dos"]);
    }

    #[test]
    fn descendants_outlive_the_path_string() {
        let root = read_tree(
            r#"<a><b><c n="1"/><c n="2"/></b><b><c n="3"/></b><d><c n="x"/></d></a>"#.as_bytes(),
        )
        .expect("tree");
        let found = {
            let path = format!("{}/{}", "b", "c");
            root.descendants(&path)
        };
        let values: Vec<_> = found.iter().filter_map(|c| c.attribute("n")).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
        assert_eq!(root.descendants("").len(), 1);
        assert!(root.descendants("b/missing").is_empty());
    }

    #[test]
    fn rejects_unclosed_and_mismatched_documents() {
        assert!(matches!(
            read_tree("<a><b></a>".as_bytes()),
            Err(ParseError::XmlParse(_))
        ));
        assert!(matches!(
            read_tree("<a><b/>".as_bytes()),
            Err(ParseError::XmlParse(_))
        ));
        assert!(matches!(read_tree("".as_bytes()), Err(ParseError::XmlParse(_))));
        assert!(matches!(
            read_tree("<x:a/>".as_bytes()),
            Err(ParseError::XmlParse(_))
        ));
    }

    #[test]
    fn surfaces_reader_failures_as_io_errors() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk gone"))
            }
        }
        assert!(matches!(read_tree(Failing), Err(ParseError::Io(_))));
    }
}
