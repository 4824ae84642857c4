//! Original-string ("cadena original") rendering.
//!
//! A [`Template`] is data: an ordered list of literals and field references.
//! Rendering walks it over the document's element tree and has no knowledge
//! of individual fields.
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use super::Comprobante;
use super::sign::SignatureAlgorithm;
use super::xml::constants::SIGNATURE_FIELDS;
use super::xml::{Element, XmlError, comprobante_tree};
use crate::resources::{Registry, UnsupportedVersion};

#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersion),
    #[error(transparent)]
    Xml(#[from] XmlError),
}

/// Field-ordering template for one document version.
#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    pub version: String,
    pub signature_algorithm: SignatureAlgorithm,
    #[serde(default = "default_separator")]
    pub separator: String,
    pub segments: Vec<Segment>,
}

fn default_separator() -> String {
    "|".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    /// Emitted verbatim.
    Literal(String),
    /// Separator plus value; absent values render as "".
    Field(FieldPath),
    /// Separator plus value, only when the attribute is present.
    Optional(FieldPath),
    /// Nested segments rendered once per matching element.
    Each(EachBlock),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EachBlock {
    pub path: String,
    pub segments: Vec<Segment>,
}

/// `Element/Element@attribute`, relative to the current context element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct FieldPath {
    elements: String,
    attribute: String,
}

impl FieldPath {
    pub fn elements(&self) -> &str {
        &self.elements
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    fn resolve<'a>(&self, context: &'a Element) -> Option<&'a str> {
        context
            .descendants(&self.elements)
            .into_iter()
            .find_map(|element| element.attribute(&self.attribute))
    }
}

impl TryFrom<String> for FieldPath {
    type Error = String;
    fn try_from(value: String) -> Result<Self, String> {
        let (elements, attribute) = value
            .rsplit_once('@')
            .ok_or_else(|| format!("field path {value:?} has no @attribute"))?;
        if attribute.is_empty() {
            return Err(format!("field path {value:?} has an empty attribute name"));
        }
        Ok(FieldPath {
            elements: elements.trim_matches('/').to_string(),
            attribute: attribute.to_string(),
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.elements, self.attribute)
    }
}

impl Template {
    /// Renders the original string for `root`.
    pub fn render(&self, root: &Element) -> String {
        let mut out = String::with_capacity(512);
        render_segments(&self.segments, root, &self.separator, &mut out);
        out
    }

    /// Field paths that address the root's signature attributes.
    pub fn signature_field_references(&self) -> Vec<String> {
        let mut found = Vec::new();
        collect_signature_references(&self.segments, "", &mut found);
        found
    }
}

fn render_segments(segments: &[Segment], context: &Element, separator: &str, out: &mut String) {
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Field(path) => {
                out.push_str(separator);
                if let Some(value) = path.resolve(context) {
                    push_normalized(out, value);
                }
            }
            Segment::Optional(path) => {
                if let Some(value) = path.resolve(context) {
                    out.push_str(separator);
                    push_normalized(out, value);
                }
            }
            Segment::Each(block) => {
                for element in context.descendants(&block.path) {
                    render_segments(&block.segments, element, separator, out);
                }
            }
        }
    }
}

/// Trims and collapses internal whitespace runs to a single space.
fn push_normalized(out: &mut String, value: &str) {
    let mut words = value.split_whitespace();
    if let Some(first) = words.next() {
        out.push_str(first);
        for word in words {
            out.push(' ');
            out.push_str(word);
        }
    }
}

fn collect_signature_references(segments: &[Segment], context: &str, found: &mut Vec<String>) {
    let join = |inner: &str| -> String {
        [context, inner]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    };
    for segment in segments {
        match segment {
            Segment::Literal(_) => {}
            Segment::Field(path) | Segment::Optional(path) => {
                if join(path.elements()).is_empty() && SIGNATURE_FIELDS.contains(&path.attribute()) {
                    found.push(path.to_string());
                }
            }
            Segment::Each(block) => {
                collect_signature_references(&block.segments, &join(&block.path), found);
            }
        }
    }
}

/// Renders the original string for `comprobante` with the template
/// registered for its version.
///
/// # Errors
/// [`CanonicalizeError::UnsupportedVersion`] when `registry` has no template
/// for the document's version.
pub fn canonicalize(
    comprobante: &Comprobante,
    registry: &Registry,
) -> Result<String, CanonicalizeError> {
    let template = registry.template(&comprobante.version)?;
    let root = comprobante_tree(comprobante)?;
    Ok(template.render(&root))
}

/// UTF-8 bytes of the original string; the exact input to the digest.
pub fn original_bytes(
    comprobante: &Comprobante,
    registry: &Registry,
) -> Result<Vec<u8>, CanonicalizeError> {
    canonicalize(comprobante, registry).map(String::into_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comprobante::xml::read_tree;

    fn template(json: &str) -> Template {
        serde_json::from_str(json).expect("template")
    }

    fn tree(xml: &str) -> Element {
        read_tree(xml.as_bytes()).expect("tree")
    }

    #[test]
    fn renders_fields_optionals_and_repeated_blocks() {
        let template = template(
            r#"{
                "version": "1.0",
                "signature_algorithm": "SHA1withRSA",
                "segments": [
                    {"literal": "|"},
                    {"field": "@a"},
                    {"optional": "@missing"},
                    {"field": "@missing"},
                    {"field": "Party@name"},
                    {"each": {"path": "Lines/Line", "segments": [
                        {"field": "@qty"},
                        {"optional": "@unit"}
                    ]}},
                    {"literal": "||"}
                ]
            }"#,
        );
        let root = tree(
            r#"<Doc a="  x   y  "><Party name="P"/><Lines><Line qty="1"/><Line qty="2" unit="kg"/></Lines></Doc>"#,
        );
        assert_eq!(template.render(&root), "||x y||P|1|2|kg||");
    }

    #[test]
    fn custom_separator_is_used_before_each_field() {
        let template = template(
            r#"{"version": "1.0", "signature_algorithm": "SHA256withRSA", "separator": "~",
                "segments": [{"field": "@a"}, {"field": "@b"}]}"#,
        );
        assert_eq!(template.render(&tree(r#"<Doc a="1" b="2"/>"#)), "~1~2");
    }

    #[test]
    fn finds_references_to_signature_fields() {
        let template = template(
            r#"{"version": "1.0", "signature_algorithm": "SHA1withRSA", "segments": [
                {"field": "@version"},
                {"optional": "@sello"},
                {"field": "Emisor@certificado"},
                {"each": {"path": "", "segments": [{"field": "@certificado"}]}}
            ]}"#,
        );
        assert_eq!(
            template.signature_field_references(),
            vec!["@sello".to_string(), "@certificado".to_string()]
        );
    }

    #[test]
    fn rejects_paths_without_attribute() {
        let err = serde_json::from_str::<Template>(
            r#"{"version": "1.0", "signature_algorithm": "SHA1withRSA", "segments": [{"field": "Emisor"}]}"#,
        );
        assert!(err.is_err());
    }
}
