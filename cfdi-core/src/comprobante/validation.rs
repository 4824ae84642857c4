//! Structural validation against versioned schema definitions.
//!
//! Schemas are declarative JSON resources (see [`crate::resources`]). Only
//! structure is checked: element and attribute presence, value types,
//! facets and cardinalities. Business rules such as line items summing to
//! the subtotal are out of scope.
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

use super::xml::{Element, XmlError, comprobante_tree};
use super::{Comprobante, DATE_FORMAT, DATE_TIME_FORMAT, is_decimal_lexical};
use crate::resources::{Registry, UnsupportedVersion};

/// Schema definition for one document version.
#[derive(Debug, Clone, Deserialize)]
pub struct Schema {
    pub version: String,
    pub namespace: String,
    pub schema_location: String,
    pub root: String,
    pub elements: BTreeMap<String, ElementDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementDecl {
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
    #[serde(default)]
    pub children: Vec<Particle>,
    #[serde(default)]
    pub content: Content,
}

/// `any` skips checks on children and text (lax extension points).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Content {
    #[default]
    Elements,
    Any,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub facets: Facets,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Decimal,
    DateTime,
    Date,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Facets {
    pub fixed: Option<String>,
    #[serde(default)]
    pub enumeration: Vec<String>,
    pub pattern: Option<Pattern>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub fraction_digits: Option<usize>,
}

/// Regular expression matched against the whole value.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        Regex::new(&format!("^(?:{source})$"))
            .map(Pattern)
            .map_err(D::Error::custom)
    }
}

/// One entry of an element's ordered child sequence. `max: None` is unbounded.
#[derive(Debug, Clone, Deserialize)]
pub struct Particle {
    pub name: String,
    #[serde(default = "one")]
    pub min: u32,
    #[serde(default = "one_max", deserialize_with = "deserialize_max")]
    pub max: Option<u32>,
}

fn one() -> u32 {
    1
}

fn one_max() -> Option<u32> {
    Some(1)
}

fn deserialize_max<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Count(u32),
        Word(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Count(count) => Ok(Some(count)),
        Raw::Word(word) if word == "unbounded" => Ok(None),
        Raw::Word(word) => Err(D::Error::custom(format!(
            "invalid max occurrence {word:?}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    WrongNamespace,
    UnexpectedElement,
    MissingElement,
    MissingAttribute,
    UnexpectedAttribute,
    InvalidValue,
    UnexpectedText,
}

/// A single structural problem, located by an element path such as
/// `/Comprobante/Conceptos/Concepto[2]@importe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl Display for SchemaViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Receives every violation found during a collecting validation run.
pub trait ViolationSink {
    fn report(&mut self, violation: SchemaViolation);
}

impl ViolationSink for Vec<SchemaViolation> {
    fn report(&mut self, violation: SchemaViolation) {
        self.push(violation);
    }
}

#[derive(Default)]
struct FirstViolation(Option<SchemaViolation>);

impl ViolationSink for FirstViolation {
    fn report(&mut self, violation: SchemaViolation) {
        if self.0.is_none() {
            self.0 = Some(violation);
        }
    }
}

struct CountingSink<'a> {
    inner: &'a mut dyn ViolationSink,
    count: usize,
}

impl ViolationSink for CountingSink<'_> {
    fn report(&mut self, violation: SchemaViolation) {
        self.count += 1;
        self.inner.report(violation);
    }
}

/// Validation failure.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("schema violation: {0}")]
    Violation(SchemaViolation),
    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersion),
    #[error(transparent)]
    Xml(#[from] XmlError),
}

impl Schema {
    /// Checks `root`, failing with the first violation found.
    pub fn validate(&self, root: &Element) -> Result<(), ValidationError> {
        let mut first = FirstViolation::default();
        self.validate_with(root, &mut first);
        match first.0 {
            Some(violation) => Err(ValidationError::Violation(violation)),
            None => Ok(()),
        }
    }

    /// Checks `root`, reporting every violation to `sink`. Returns how many
    /// were reported.
    pub fn validate_with(&self, root: &Element, sink: &mut dyn ViolationSink) -> usize {
        let mut counting = CountingSink {
            inner: sink,
            count: 0,
        };
        let path = format!("/{}", root.name());
        if root.name() != self.root {
            counting.report(SchemaViolation {
                path,
                kind: ViolationKind::UnexpectedElement,
                message: format!("root element must be {}", self.root),
            });
        } else {
            self.check_element(root, &path, &mut counting);
        }
        counting.count
    }

    fn check_element(&self, el: &Element, path: &str, sink: &mut dyn ViolationSink) {
        if el.namespace() != Some(self.namespace.as_str()) {
            sink.report(SchemaViolation {
                path: path.to_string(),
                kind: ViolationKind::WrongNamespace,
                message: format!(
                    "element is in namespace {:?}, expected {:?}",
                    el.namespace().unwrap_or_default(),
                    self.namespace
                ),
            });
            return;
        }
        let Some(decl) = self.elements.get(el.name()) else {
            sink.report(SchemaViolation {
                path: path.to_string(),
                kind: ViolationKind::UnexpectedElement,
                message: format!("element {} is not declared", el.name()),
            });
            return;
        };

        self.check_attributes(el, decl, path, sink);

        if decl.content == Content::Any {
            return;
        }
        if !el.text().trim().is_empty() {
            sink.report(SchemaViolation {
                path: path.to_string(),
                kind: ViolationKind::UnexpectedText,
                message: "text content is not allowed here".into(),
            });
        }
        self.check_children(el, decl, path, sink);
    }

    fn check_attributes(
        &self,
        el: &Element,
        decl: &ElementDecl,
        path: &str,
        sink: &mut dyn ViolationSink,
    ) {
        for attr in &decl.attributes {
            match el.attribute(&attr.name) {
                Some(value) => {
                    if let Some(message) = check_value(attr, value) {
                        sink.report(SchemaViolation {
                            path: format!("{path}@{}", attr.name),
                            kind: ViolationKind::InvalidValue,
                            message,
                        });
                    }
                }
                None if attr.required => sink.report(SchemaViolation {
                    path: format!("{path}@{}", attr.name),
                    kind: ViolationKind::MissingAttribute,
                    message: format!("required attribute {} is missing", attr.name),
                }),
                None => {}
            }
        }

        // Qualified attributes (xsi:*) belong to other vocabularies.
        for (name, _) in el.attributes().filter(|(name, _)| !name.contains(':')) {
            if !decl.attributes.iter().any(|attr| attr.name == name) {
                sink.report(SchemaViolation {
                    path: format!("{path}@{name}"),
                    kind: ViolationKind::UnexpectedAttribute,
                    message: format!("attribute {name} is not declared"),
                });
            }
        }
    }

    fn check_children(
        &self,
        el: &Element,
        decl: &ElementDecl,
        path: &str,
        sink: &mut dyn ViolationSink,
    ) {
        let children = el.children();
        let mut index = 0;
        for particle in &decl.children {
            let mut count = 0u32;
            while let Some(child) = children.get(index) {
                if child.name() != particle.name || particle.max.is_some_and(|max| count >= max) {
                    break;
                }
                count += 1;
                let child_path = if particle.max == Some(1) {
                    format!("{path}/{}", child.name())
                } else {
                    format!("{path}/{}[{count}]", child.name())
                };
                self.check_element(child, &child_path, sink);
                index += 1;
            }
            if count < particle.min {
                sink.report(SchemaViolation {
                    path: format!("{path}/{}", particle.name),
                    kind: ViolationKind::MissingElement,
                    message: format!(
                        "expected at least {} {} element(s), found {count}",
                        particle.min, particle.name
                    ),
                });
            }
        }
        for child in &children[index..] {
            sink.report(SchemaViolation {
                path: format!("{path}/{}", child.name()),
                kind: ViolationKind::UnexpectedElement,
                message: format!("element {} is not expected here", child.name()),
            });
        }
    }
}

fn check_value(attr: &AttributeDecl, value: &str) -> Option<String> {
    let facets = &attr.facets;
    match attr.value_type {
        ValueType::Decimal => {
            let collapsed = value.trim();
            if !is_decimal_lexical(collapsed) {
                return Some(format!("{value:?} is not a valid decimal"));
            }
            if let Some(max) = facets.fraction_digits {
                let digits = collapsed
                    .split_once('.')
                    .map(|(_, fraction)| fraction.len())
                    .unwrap_or(0);
                if digits > max {
                    return Some(format!(
                        "{value:?} has {digits} fraction digits, at most {max} allowed"
                    ));
                }
            }
        }
        ValueType::DateTime => {
            if NaiveDateTime::parse_from_str(value.trim(), DATE_TIME_FORMAT).is_err() {
                return Some(format!("{value:?} is not a valid date-time"));
            }
        }
        ValueType::Date => {
            if NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).is_err() {
                return Some(format!("{value:?} is not a valid date"));
            }
        }
        ValueType::String => {}
    }

    if let Some(fixed) = facets.fixed.as_deref().filter(|fixed| value != *fixed) {
        return Some(format!("value must be {fixed:?}, found {value:?}"));
    }
    if !facets.enumeration.is_empty() && !facets.enumeration.iter().any(|v| v == value) {
        return Some(format!(
            "{value:?} is not one of {}",
            facets.enumeration.join(", ")
        ));
    }
    let length = value.chars().count();
    if let Some(min) = facets.min_length.filter(|min| length < *min) {
        return Some(format!("length {length} is below the minimum of {min}"));
    }
    if let Some(max) = facets.max_length.filter(|max| length > *max) {
        return Some(format!("length {length} exceeds the maximum of {max}"));
    }
    if facets.pattern.as_ref().is_some_and(|pattern| !pattern.is_match(value)) {
        return Some(format!("{value:?} does not match the required pattern"));
    }
    None
}

/// Validates `comprobante` against the schema registered for its version,
/// failing with the first violation.
pub fn validate(comprobante: &Comprobante, registry: &Registry) -> Result<(), ValidationError> {
    let schema = registry.schema(&comprobante.version)?;
    schema.validate(&comprobante_tree(comprobante)?)
}

/// Validates `comprobante`, reporting every violation to `sink`. Returns the
/// number of violations.
pub fn validate_with(
    comprobante: &Comprobante,
    registry: &Registry,
    sink: &mut dyn ViolationSink,
) -> Result<usize, ValidationError> {
    let schema = registry.schema(&comprobante.version)?;
    let count = schema.validate_with(&comprobante_tree(comprobante)?, sink);
    debug!(version = %comprobante.version, violations = count, "validated document");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comprobante::xml::read_tree;

    const SCHEMA: &str = r#"{
        "version": "1.0",
        "namespace": "urn:test",
        "schema_location": "urn:test test.xsd",
        "root": "Doc",
        "elements": {
            "Doc": {
                "attributes": [
                    {"name": "version", "required": true, "facets": {"fixed": "1.0"}},
                    {"name": "total", "type": "decimal", "required": true, "facets": {"fraction_digits": 2}},
                    {"name": "code", "facets": {"pattern": "[A-Z]{3}", "min_length": 3}}
                ],
                "children": [
                    {"name": "Item", "min": 1, "max": "unbounded"},
                    {"name": "Extra", "min": 0}
                ]
            },
            "Item": {
                "attributes": [{"name": "kind", "required": true, "facets": {"enumeration": ["a", "b"]}}]
            },
            "Extra": {"content": "any"}
        }
    }"#;

    fn schema() -> Schema {
        serde_json::from_str(SCHEMA).expect("schema")
    }

    fn tree(xml: &str) -> Element {
        read_tree(xml.as_bytes()).expect("tree")
    }

    #[test]
    fn accepts_conforming_document() {
        let doc = tree(
            r#"<t:Doc xmlns:t="urn:test" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="urn:test test.xsd" version="1.0" total="1.50" code="ABC"><t:Item kind="a"/><t:Item kind="b"/><t:Extra><anything at="all">text</anything></t:Extra></t:Doc>"#,
        );
        assert!(schema().validate(&doc).is_ok());
    }

    #[test]
    fn collector_receives_every_violation() {
        let doc = tree(
            r#"<t:Doc xmlns:t="urn:test" version="2.0" total="1.555" code="abcd" bogus="1"><t:Item kind="c"/><t:Other/></t:Doc>"#,
        );
        let mut violations: Vec<SchemaViolation> = Vec::new();
        let count = schema().validate_with(&doc, &mut violations);
        assert_eq!(count, violations.len());

        let kinds: Vec<_> = violations.iter().map(|v| (v.kind, v.path.as_str())).collect();
        assert!(kinds.contains(&(ViolationKind::InvalidValue, "/Doc@version")));
        assert!(kinds.contains(&(ViolationKind::InvalidValue, "/Doc@total")));
        assert!(kinds.contains(&(ViolationKind::InvalidValue, "/Doc@code")));
        assert!(kinds.contains(&(ViolationKind::UnexpectedAttribute, "/Doc@bogus")));
        assert!(kinds.contains(&(ViolationKind::InvalidValue, "/Doc/Item[1]@kind")));
        assert!(kinds.contains(&(ViolationKind::UnexpectedElement, "/Doc/Other")));
        assert_eq!(violations.len(), 6);
    }

    #[test]
    fn first_violation_fails_without_collector() {
        let doc = tree(r#"<t:Doc xmlns:t="urn:test" version="1.0" total="x"/>"#);
        let err = schema().validate(&doc).unwrap_err();
        match err {
            ValidationError::Violation(violation) => {
                assert_eq!(violation.path, "/Doc@total");
                assert_eq!(violation.kind, ViolationKind::InvalidValue);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn reports_missing_children_and_attributes() {
        let doc = tree(r#"<t:Doc xmlns:t="urn:test" version="1.0"/>"#);
        let mut violations = Vec::new();
        schema().validate_with(&doc, &mut violations);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].kind, ViolationKind::MissingAttribute);
        assert_eq!(violations[1].kind, ViolationKind::MissingElement);
        assert_eq!(violations[1].path, "/Doc/Item");
    }

    #[test]
    fn wrong_namespace_is_reported() {
        let doc = tree(r#"<Doc xmlns="urn:other" version="1.0" total="1"/>"#);
        let err = schema().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Violation(SchemaViolation {
                kind: ViolationKind::WrongNamespace,
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_max_occurrence_keyword() {
        let bad = SCHEMA.replace(r#""max": "unbounded""#, r#""max": "many""#);
        assert!(serde_json::from_str::<Schema>(&bad).is_err());
    }
}
