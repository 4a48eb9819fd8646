use std::cmp::Ordering;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use roxmltree::{Document, Node};

use crate::{Error, InnerError};

const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

// Guards against self-referencing named types.
const MAX_TYPE_DEPTH: usize = 32;

/// Decides whether a payload may enter (or leave) the transport.
pub trait SchemaValidator: Send + Sync {
    /// `Ok` if the payload is well-formed and acceptable.
    fn validate(&self, xml: &[u8]) -> Result<(), Error>;
}

/// Accepts any well-formed UTF-8 XML document.
#[derive(Debug, Clone, Copy, Default)]
pub struct WellFormed;

impl SchemaValidator for WellFormed {
    fn validate(&self, xml: &[u8]) -> Result<(), Error> {
        let text = std::str::from_utf8(xml)?;
        let _ = Document::parse(text)?;
        Ok(())
    }
}

/// Load the XSD at `schema_path`, or fall back to a well-formedness check.
pub fn load_validator(schema_path: Option<&Path>) -> Result<Arc<dyn SchemaValidator>, Error> {
    match schema_path {
        Some(path) => Ok(Arc::new(XmlSchema::open(path)?)),
        None => Ok(Arc::new(WellFormed)),
    }
}

/// A compiled subset of W3C XML Schema.
///
/// Supports top-level element declarations, named and inline complex types
/// built from `sequence`, `all` or `choice` groups of elements (with their
/// own occurrence bounds), attributes, mixed content, `targetNamespace` with
/// `elementFormDefault`/`form`, the common built-in simple types with their
/// value ranges and whitespace rules, and enumerations. Schema constructs
/// outside that subset are rejected when the schema is loaded rather than
/// silently ignored.
#[derive(Debug, Clone)]
pub struct XmlSchema {
    roots: Vec<ElementDecl>,
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    namespace: Option<String>,
    min: u32,
    /// `None` is unbounded
    max: Option<u32>,
    content: Content,
}

impl ElementDecl {
    fn matches(&self, node: Node<'_, '_>) -> bool {
        node.tag_name().name() == self.name
            && node.tag_name().namespace() == self.namespace.as_deref()
    }
}

#[derive(Debug, Clone)]
enum Content {
    Any,
    Simple(SimpleType),
    Complex(ComplexType),
}

#[derive(Debug, Clone, Default)]
struct ComplexType {
    mixed: bool,
    attributes: Vec<AttributeDecl>,
    group: Option<Group>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Sequence,
    All,
    Choice,
}

#[derive(Debug, Clone)]
struct Group {
    kind: GroupKind,
    min: u32,
    max: Option<u32>,
    particles: Vec<ElementDecl>,
}

impl Group {
    fn accepts_empty(&self) -> bool {
        match self.kind {
            GroupKind::Sequence | GroupKind::All => self.particles.iter().all(|p| p.min == 0),
            GroupKind::Choice => self.particles.iter().any(|p| p.min == 0),
        }
    }
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    required: bool,
    ty: SimpleType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    String,
    NormalizedString,
    Token,
    Byte,
    Short,
    Int,
    Long,
    Integer,
    NonNegativeInteger,
    PositiveInteger,
    NonPositiveInteger,
    NegativeInteger,
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
    UnsignedLong,
    Decimal,
    Float,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhiteSpace {
    Preserve,
    Replace,
    Collapse,
}

impl Builtin {
    fn from_name(local: &str) -> Option<Builtin> {
        let builtin = match local {
            "string" => Builtin::String,
            "normalizedString" => Builtin::NormalizedString,
            "token" | "anyURI" | "NMTOKEN" | "Name" | "NCName" | "ID" | "IDREF" | "language" => {
                Builtin::Token
            }
            "byte" => Builtin::Byte,
            "short" => Builtin::Short,
            "int" => Builtin::Int,
            "long" => Builtin::Long,
            "integer" => Builtin::Integer,
            "nonNegativeInteger" => Builtin::NonNegativeInteger,
            "positiveInteger" => Builtin::PositiveInteger,
            "nonPositiveInteger" => Builtin::NonPositiveInteger,
            "negativeInteger" => Builtin::NegativeInteger,
            "unsignedByte" => Builtin::UnsignedByte,
            "unsignedShort" => Builtin::UnsignedShort,
            "unsignedInt" => Builtin::UnsignedInt,
            "unsignedLong" => Builtin::UnsignedLong,
            "decimal" => Builtin::Decimal,
            "float" | "double" => Builtin::Float,
            "boolean" => Builtin::Boolean,
            _ => return None,
        };
        Some(builtin)
    }

    fn white_space(self) -> WhiteSpace {
        match self {
            Builtin::String => WhiteSpace::Preserve,
            Builtin::NormalizedString => WhiteSpace::Replace,
            _ => WhiteSpace::Collapse,
        }
    }

    fn accepts(self, value: &str) -> bool {
        match self {
            Builtin::String | Builtin::NormalizedString | Builtin::Token => true,
            Builtin::Byte => value.parse::<i8>().is_ok(),
            Builtin::Short => value.parse::<i16>().is_ok(),
            Builtin::Int => value.parse::<i32>().is_ok(),
            Builtin::Long => value.parse::<i64>().is_ok(),
            Builtin::UnsignedByte => value.parse::<u8>().is_ok(),
            Builtin::UnsignedShort => value.parse::<u16>().is_ok(),
            Builtin::UnsignedInt => value.parse::<u32>().is_ok(),
            Builtin::UnsignedLong => value.parse::<u64>().is_ok(),
            Builtin::Integer => integer_sign(value).is_some(),
            Builtin::NonNegativeInteger => {
                matches!(integer_sign(value), Some(Ordering::Equal | Ordering::Greater))
            }
            Builtin::PositiveInteger => integer_sign(value) == Some(Ordering::Greater),
            Builtin::NonPositiveInteger => {
                matches!(integer_sign(value), Some(Ordering::Equal | Ordering::Less))
            }
            Builtin::NegativeInteger => integer_sign(value) == Some(Ordering::Less),
            Builtin::Decimal => is_decimal(value),
            Builtin::Float => matches!(value, "INF" | "+INF" | "-INF" | "NaN") || is_float(value),
            Builtin::Boolean => matches!(value, "true" | "false" | "1" | "0"),
        }
    }
}

fn split_sign(value: &str) -> (bool, &str) {
    if let Some(rest) = value.strip_prefix('-') {
        (true, rest)
    } else {
        (false, value.strip_prefix('+').unwrap_or(value))
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Sign of an arbitrary-size `xs:integer`, or `None` if it is not one.
fn integer_sign(value: &str) -> Option<Ordering> {
    let (negative, digits) = split_sign(value);
    if !is_digits(digits) {
        return None;
    }
    if digits.bytes().all(|b| b == b'0') {
        Some(Ordering::Equal)
    } else if negative {
        Some(Ordering::Less)
    } else {
        Some(Ordering::Greater)
    }
}

fn is_decimal(value: &str) -> bool {
    let (_, unsigned) = split_sign(value);
    let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    (!int.is_empty() || !frac.is_empty())
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

fn is_float(value: &str) -> bool {
    match value.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => is_decimal(mantissa) && is_digits(split_sign(exponent).1),
        None => is_decimal(value),
    }
}

#[derive(Debug, Clone)]
struct SimpleType {
    base: Builtin,
    enumeration: Vec<String>,
}

impl SimpleType {
    fn plain(base: Builtin) -> SimpleType {
        SimpleType {
            base,
            enumeration: Vec::new(),
        }
    }

    fn normalize(&self, raw: &str) -> String {
        match self.base.white_space() {
            WhiteSpace::Preserve => raw.to_owned(),
            WhiteSpace::Replace => raw.replace(['\t', '\n', '\r'], " "),
            WhiteSpace::Collapse => raw
                .split([' ', '\t', '\n', '\r'])
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let value = self.normalize(raw);
        if !self.base.accepts(&value) {
            return Err(format!("{value:?} is not a valid {:?}", self.base));
        }
        if !self.enumeration.is_empty() && !self.enumeration.iter().any(|e| *e == value) {
            return Err(format!("{value:?} is not one of {:?}", self.enumeration));
        }
        Ok(())
    }
}

impl XmlSchema {
    /// Load an XSD document from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<XmlSchema, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        text.parse()
    }
}

impl FromStr for XmlSchema {
    type Err = Error;

    fn from_str(text: &str) -> Result<XmlSchema, Error> {
        let document = Document::parse(text)?;
        let loader = Loader::new(&document)?;
        let roots = loader
            .schema
            .children()
            .filter(|n| is_xs(*n, "element"))
            .map(|n| loader.element(n, 0, true))
            .collect::<Result<Vec<_>, Error>>()?;

        if roots.is_empty() {
            return Err(invalid("schema declares no top-level elements"));
        }

        Ok(XmlSchema { roots })
    }
}

impl SchemaValidator for XmlSchema {
    fn validate(&self, xml: &[u8]) -> Result<(), Error> {
        let text = std::str::from_utf8(xml)?;
        let document = Document::parse(text)?;
        let root = document.root_element();
        let path = format!("/{}", root.tag_name().name());

        let Some(decl) = self.roots.iter().find(|d| d.matches(root)) else {
            return Err(violation(format!(
                "{path}: not a declared root element in namespace {:?}",
                root.tag_name().namespace()
            )));
        };

        check_element(decl, root, &path)
    }
}

struct Loader<'a, 'input> {
    schema: Node<'a, 'input>,
    target_namespace: Option<String>,
    elements_qualified: bool,
}

impl<'a, 'input> Loader<'a, 'input> {
    fn new(document: &'a Document<'input>) -> Result<Self, Error> {
        let schema = document.root_element();
        if !is_xs(schema, "schema") {
            return Err(invalid("root element is not xs:schema"));
        }
        Ok(Loader {
            schema,
            target_namespace: schema.attribute("targetNamespace").map(str::to_owned),
            elements_qualified: schema.attribute("elementFormDefault") == Some("qualified"),
        })
    }

    fn top_level(&self, kind: &str, name: &str) -> Option<Node<'a, 'input>> {
        self.schema
            .children()
            .find(|n| is_xs(*n, kind) && n.attribute("name") == Some(name))
    }

    fn element(
        &self,
        node: Node<'_, '_>,
        depth: usize,
        top_level: bool,
    ) -> Result<ElementDecl, Error> {
        if depth > MAX_TYPE_DEPTH {
            return Err(invalid("type nesting too deep"));
        }
        if node.attribute("ref").is_some() {
            return Err(invalid("element references are not supported"));
        }
        let Some(name) = node.attribute("name") else {
            return Err(invalid("element declaration without a name"));
        };

        let qualified = match node.attribute("form") {
            Some("qualified") => true,
            Some("unqualified") => false,
            _ => top_level || self.elements_qualified,
        };

        let content = if let Some(ty) = node.attribute("type") {
            self.named_type(node, ty, depth + 1)?
        } else if let Some(ct) = xs_child(node, "complexType") {
            Content::Complex(self.complex_type(ct, depth + 1)?)
        } else if let Some(st) = xs_child(node, "simpleType") {
            Content::Simple(self.simple_type(st, depth + 1)?)
        } else {
            Content::Any
        };

        let (min, max) = occurs(node)?;
        Ok(ElementDecl {
            name: name.to_owned(),
            namespace: if qualified {
                self.target_namespace.clone()
            } else {
                None
            },
            min,
            max,
            content,
        })
    }

    fn named_type(&self, node: Node<'_, '_>, qname: &str, depth: usize) -> Result<Content, Error> {
        if depth > MAX_TYPE_DEPTH {
            return Err(invalid("type nesting too deep"));
        }
        let (namespace, local) = resolve_qname(node, qname)?;

        if namespace.as_deref() == Some(XS_NAMESPACE) {
            return match local {
                "anyType" => Ok(Content::Any),
                "anySimpleType" => Ok(Content::Simple(SimpleType::plain(Builtin::String))),
                _ => Builtin::from_name(local)
                    .map(|b| Content::Simple(SimpleType::plain(b)))
                    .ok_or_else(|| invalid(format!("unsupported built-in type {qname}"))),
            };
        }

        if namespace != self.target_namespace {
            return Err(invalid(format!("unknown type {qname}")));
        }
        if let Some(ct) = self.top_level("complexType", local) {
            return Ok(Content::Complex(self.complex_type(ct, depth)?));
        }
        if let Some(st) = self.top_level("simpleType", local) {
            return Ok(Content::Simple(self.simple_type(st, depth)?));
        }
        Err(invalid(format!("unknown type {qname}")))
    }

    fn simple_type(&self, node: Node<'_, '_>, depth: usize) -> Result<SimpleType, Error> {
        if depth > MAX_TYPE_DEPTH {
            return Err(invalid("type nesting too deep"));
        }
        let Some(restriction) = xs_child(node, "restriction") else {
            return Err(invalid("only xs:restriction simple types are supported"));
        };
        let Some(base) = restriction.attribute("base") else {
            return Err(invalid("xs:restriction without a base"));
        };
        let parent = match self.named_type(restriction, base, depth + 1)? {
            Content::Simple(parent) => parent,
            _ => return Err(invalid(format!("unsupported restriction base {base}"))),
        };

        let mut enumeration = Vec::new();
        for facet in restriction.children().filter(Node::is_element) {
            match xs_local(facet) {
                Some("enumeration") => {
                    if let Some(value) = facet.attribute("value") {
                        enumeration.push(parent.normalize(value));
                    }
                }
                Some("annotation") => {}
                _ => {
                    return Err(invalid(format!(
                        "unsupported facet <{}>",
                        facet.tag_name().name()
                    )));
                }
            }
        }

        Ok(SimpleType {
            base: parent.base,
            enumeration: if enumeration.is_empty() {
                parent.enumeration
            } else {
                enumeration
            },
        })
    }

    fn complex_type(&self, node: Node<'_, '_>, depth: usize) -> Result<ComplexType, Error> {
        let mut ct = ComplexType {
            mixed: node.attribute("mixed") == Some("true"),
            ..Default::default()
        };

        for child in node.children().filter(Node::is_element) {
            match xs_local(child) {
                Some("sequence" | "all" | "choice") if ct.group.is_none() => {
                    ct.group = Some(self.group(child, depth)?);
                }
                Some("attribute") => ct.attributes.push(self.attribute(child, depth)?),
                Some("annotation") => {}
                _ => {
                    return Err(invalid(format!(
                        "unsupported <{}> in complexType",
                        child.tag_name().name()
                    )));
                }
            }
        }

        Ok(ct)
    }

    fn group(&self, node: Node<'_, '_>, depth: usize) -> Result<Group, Error> {
        let kind = match xs_local(node) {
            Some("sequence") => GroupKind::Sequence,
            Some("all") => GroupKind::All,
            _ => GroupKind::Choice,
        };

        let mut particles = Vec::new();
        for child in node.children().filter(Node::is_element) {
            match xs_local(child) {
                Some("element") => particles.push(self.element(child, depth + 1, false)?),
                Some("annotation") => {}
                _ => {
                    return Err(invalid(format!(
                        "unsupported particle <{}>",
                        child.tag_name().name()
                    )));
                }
            }
        }

        let (min, max) = occurs(node)?;
        if kind == GroupKind::All {
            if min > 1 || max != Some(1) {
                return Err(invalid("xs:all may occur at most once"));
            }
            if particles.iter().any(|p| p.max.is_none_or(|m| m > 1)) {
                return Err(invalid("xs:all particles may occur at most once"));
            }
        }

        Ok(Group {
            kind,
            min,
            max,
            particles,
        })
    }

    fn attribute(&self, node: Node<'_, '_>, depth: usize) -> Result<AttributeDecl, Error> {
        let Some(name) = node.attribute("name") else {
            return Err(invalid("attribute declaration without a name"));
        };

        let ty = if let Some(qname) = node.attribute("type") {
            match self.named_type(node, qname, depth + 1)? {
                Content::Simple(ty) => ty,
                Content::Any => SimpleType::plain(Builtin::String),
                Content::Complex(_) => {
                    return Err(invalid(format!("attribute {name} has a complex type")));
                }
            }
        } else if let Some(st) = xs_child(node, "simpleType") {
            self.simple_type(st, depth + 1)?
        } else {
            SimpleType::plain(Builtin::String)
        };

        Ok(AttributeDecl {
            name: name.to_owned(),
            required: node.attribute("use") == Some("required"),
            ty,
        })
    }
}

fn check_element(decl: &ElementDecl, node: Node<'_, '_>, path: &str) -> Result<(), Error> {
    match &decl.content {
        Content::Any => Ok(()),
        Content::Simple(ty) => {
            if node.children().any(|c| c.is_element()) {
                return Err(violation(format!("{path}: element content not allowed")));
            }
            check_attributes(&[], node, path)?;
            ty.check(&text_of(node))
                .map_err(|m| violation(format!("{path}: {m}")))
        }
        Content::Complex(ct) => {
            check_attributes(&ct.attributes, node, path)?;
            if !ct.mixed && !text_of(node).trim().is_empty() {
                return Err(violation(format!("{path}: text content not allowed")));
            }

            let children: Vec<Node<'_, '_>> = node.children().filter(Node::is_element).collect();
            match &ct.group {
                Some(group) => check_group(group, &children, path),
                None => match children.first() {
                    Some(extra) => Err(unexpected(path, *extra)),
                    None => Ok(()),
                },
            }
        }
    }
}

fn check_attributes(decls: &[AttributeDecl], node: Node<'_, '_>, path: &str) -> Result<(), Error> {
    for decl in decls {
        match node.attribute(decl.name.as_str()) {
            Some(value) => decl
                .ty
                .check(value)
                .map_err(|m| violation(format!("{path}/@{}: {m}", decl.name)))?,
            None if decl.required => {
                return Err(violation(format!(
                    "{path}: missing required attribute {}",
                    decl.name
                )));
            }
            None => {}
        }
    }

    for attribute in node.attributes() {
        if attribute.namespace().is_some() {
            continue;
        }
        if !decls.iter().any(|d| d.name == attribute.name()) {
            return Err(violation(format!(
                "{path}: undeclared attribute {}",
                attribute.name()
            )));
        }
    }

    Ok(())
}

/// Match `children` against every repetition of `group`.
fn check_group(group: &Group, children: &[Node<'_, '_>], path: &str) -> Result<(), Error> {
    let mut index = 0;
    let mut occurrences = 0u32;
    while index < children.len() && group.max.is_none_or(|max| occurrences < max) {
        let end = match_occurrence(group, children, index, path)?;
        if end == index {
            break;
        }
        index = end;
        occurrences += 1;
    }

    if occurrences < group.min && !group.accepts_empty() {
        // Matching against nothing names the first missing element.
        match_occurrence(group, children, children.len(), path)?;
        return Err(violation(format!("{path}: incomplete content")));
    }

    match children.get(index) {
        Some(extra) => Err(unexpected(path, *extra)),
        None => Ok(()),
    }
}

/// Match one repetition of `group` starting at `start`, returning where it
/// ended.
fn match_occurrence(
    group: &Group,
    children: &[Node<'_, '_>],
    start: usize,
    path: &str,
) -> Result<usize, Error> {
    match group.kind {
        GroupKind::Sequence => {
            let mut index = start;
            for particle in &group.particles {
                index = consume(particle, children, index, path)?;
            }
            Ok(index)
        }
        GroupKind::Choice => {
            let chosen = children
                .get(start)
                .and_then(|c| group.particles.iter().find(|p| p.matches(*c)));
            match (chosen, children.get(start)) {
                (Some(particle), _) => consume(particle, children, start, path),
                (None, _) if group.particles.iter().any(|p| p.min == 0) => Ok(start),
                (None, Some(child)) => Err(unexpected(path, *child)),
                (None, None) => Err(violation(format!(
                    "{path}: expected one of {:?}",
                    group.particles.iter().map(|p| &p.name).collect::<Vec<_>>()
                ))),
            }
        }
        GroupKind::All => {
            let mut counts = vec![0u32; group.particles.len()];
            let mut index = start;
            while let Some(child) = children.get(index) {
                let Some(i) = group.particles.iter().position(|p| p.matches(*child)) else {
                    break;
                };
                counts[i] += 1;
                if counts[i] > 1 {
                    return Err(violation(format!(
                        "{path}: too many <{}>",
                        group.particles[i].name
                    )));
                }
                let particle = &group.particles[i];
                check_element(particle, *child, &child_path(path, &particle.name))?;
                index += 1;
            }
            for (particle, count) in group.particles.iter().zip(counts) {
                if count < particle.min {
                    return Err(violation(format!("{path}: missing <{}>", particle.name)));
                }
            }
            Ok(index)
        }
    }
}

fn consume(
    particle: &ElementDecl,
    children: &[Node<'_, '_>],
    start: usize,
    path: &str,
) -> Result<usize, Error> {
    let mut index = start;
    let mut count = 0u32;
    while let Some(child) = children.get(index) {
        if !particle.matches(*child) || particle.max.is_some_and(|max| count >= max) {
            break;
        }
        check_element(particle, *child, &child_path(path, &particle.name))?;
        count += 1;
        index += 1;
    }
    if count < particle.min {
        return Err(violation(format!(
            "{path}: expected at least {} <{}>, found {count}",
            particle.min, particle.name
        )));
    }
    Ok(index)
}

fn text_of(node: Node<'_, '_>) -> String {
    node.children()
        .filter(Node::is_text)
        .filter_map(|c| c.text())
        .collect()
}

fn child_path(path: &str, name: &str) -> String {
    format!("{path}/{name}")
}

fn is_xs(node: Node<'_, '_>, local: &str) -> bool {
    xs_local(node) == Some(local)
}

fn xs_local<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    if node.is_element() && node.tag_name().namespace() == Some(XS_NAMESPACE) {
        Some(node.tag_name().name())
    } else {
        None
    }
}

fn xs_child<'a, 'input>(node: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| is_xs(*c, local))
}

/// Split a `prefix:local` reference and look up the prefix in scope at `node`.
fn resolve_qname<'q>(
    node: Node<'_, '_>,
    qname: &'q str,
) -> Result<(Option<String>, &'q str), Error> {
    let (prefix, local) = match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    };
    let namespace = node
        .namespaces()
        .find(|ns| ns.name() == prefix)
        .map(|ns| ns.uri().to_owned());
    if prefix.is_some() && namespace.is_none() {
        return Err(invalid(format!("unbound prefix in {qname}")));
    }
    Ok((namespace, local))
}

fn occurs(node: Node<'_, '_>) -> Result<(u32, Option<u32>), Error> {
    let min = match node.attribute("minOccurs") {
        Some(v) => v
            .parse()
            .map_err(|_| invalid(format!("bad minOccurs {v:?}")))?,
        None => 1,
    };
    let max = match node.attribute("maxOccurs") {
        Some("unbounded") => None,
        Some(v) => Some(
            v.parse()
                .map_err(|_| invalid(format!("bad maxOccurs {v:?}")))?,
        ),
        None => Some(1),
    };
    if max.is_some_and(|max| max < min) {
        return Err(invalid("maxOccurs is smaller than minOccurs"));
    }
    Ok((min, max))
}

#[track_caller]
fn invalid(message: impl Into<String>) -> Error {
    InnerError::InvalidSchema(message.into()).into_err()
}

#[track_caller]
fn violation(message: String) -> Error {
    InnerError::SchemaViolation(message).into_err()
}

#[track_caller]
fn unexpected(path: &str, node: Node<'_, '_>) -> Error {
    violation(format!(
        "{path}: unexpected element <{}>",
        node.tag_name().name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    const GAME_XSD: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="join">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="name" type="xs:string"/>
        <xs:element name="level" type="xs:nonNegativeInteger" minOccurs="0"/>
      </xs:sequence>
      <xs:attribute name="team" type="teamType"/>
    </xs:complexType>
  </xs:element>
  <xs:element name="joined" type="joinedType"/>
  <xs:element name="move">
    <xs:complexType>
      <xs:choice>
        <xs:element name="step" type="xs:int" maxOccurs="unbounded"/>
        <xs:element name="stop"/>
      </xs:choice>
      <xs:attribute name="seq" type="xs:int" use="required"/>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="joinedType">
    <xs:all>
      <xs:element name="name" type="xs:string"/>
      <xs:element name="players" type="xs:int" minOccurs="0"/>
    </xs:all>
  </xs:complexType>
  <xs:simpleType name="teamType">
    <xs:restriction base="xs:string">
      <xs:enumeration value="red"/>
      <xs:enumeration value="blue"/>
    </xs:restriction>
  </xs:simpleType>
</xs:schema>"#;

    const NAMESPACED_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    xmlns:g="urn:game" targetNamespace="urn:game" elementFormDefault="qualified">
  <xs:element name="join" type="g:joinType"/>
  <xs:complexType name="joinType">
    <xs:sequence>
      <xs:element name="name" type="xs:string"/>
      <xs:element name="note" type="xs:string" form="unqualified" minOccurs="0"/>
    </xs:sequence>
  </xs:complexType>
</xs:schema>"#;

    fn schema() -> XmlSchema {
        GAME_XSD.parse().unwrap()
    }

    fn single_field(ty: &str) -> XmlSchema {
        format!(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
                 <xs:element name="v" type="{ty}"/>
               </xs:schema>"#
        )
        .parse()
        .unwrap()
    }

    fn accepts(schema: &XmlSchema, value: &str) -> bool {
        schema.validate(format!("<v>{value}</v>").as_bytes()).is_ok()
    }

    fn assert_violation(result: Result<(), Error>) {
        let err = result.unwrap_err();
        assert!(
            matches!(err.inner, InnerError::SchemaViolation(_)),
            "expected schema violation, got {err}"
        );
    }

    #[test]
    fn sequence_accepts_valid_documents() {
        let schema = schema();
        schema.validate(b"<join><name>alice</name></join>").unwrap();
        schema
            .validate(br#"<join team="red"><name>bob</name><level>3</level></join>"#)
            .unwrap();
    }

    #[test]
    fn sequence_rejects_missing_and_misordered_children() {
        let schema = schema();
        assert_violation(schema.validate(b"<join></join>"));
        assert_violation(schema.validate(b"<join><level>3</level><name>bob</name></join>"));
        assert_violation(schema.validate(b"<join><name>a</name><name>b</name></join>"));
        assert_violation(schema.validate(b"<join><name>a</name><color>red</color></join>"));
    }

    #[test]
    fn simple_types_are_checked() {
        let schema = schema();
        assert_violation(schema.validate(b"<join><name>a</name><level>-1</level></join>"));
        assert_violation(schema.validate(br#"<join team="green"><name>a</name></join>"#));
        assert_violation(schema.validate(b"<join><name><first>a</first></name></join>"));
    }

    #[test]
    fn undeclared_attributes_and_text_are_rejected() {
        let schema = schema();
        assert_violation(schema.validate(br#"<join mood="happy"><name>a</name></join>"#));
        assert_violation(schema.validate(b"<join>hello<name>a</name></join>"));
    }

    #[test]
    fn all_group_ignores_order() {
        let schema = schema();
        schema
            .validate(b"<joined><players>2</players><name>a</name></joined>")
            .unwrap();
        schema.validate(b"<joined><name>a</name></joined>").unwrap();
        assert_violation(schema.validate(b"<joined><players>2</players></joined>"));
        assert_violation(schema.validate(b"<joined><name>a</name><name>b</name></joined>"));
    }

    #[test]
    fn choice_and_required_attribute() {
        let schema = schema();
        schema
            .validate(br#"<move seq="1"><step>1</step><step>-2</step></move>"#)
            .unwrap();
        schema
            .validate(br#"<move seq="2"><stop><anything/></stop></move>"#)
            .unwrap();
        assert_violation(schema.validate(b"<move><stop/></move>"));
        assert_violation(schema.validate(br#"<move seq="3"><step>1</step><stop/></move>"#));
        assert_violation(schema.validate(br#"<move seq="4"></move>"#));
    }

    #[test]
    fn repeated_groups() {
        let schema: XmlSchema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="roster"><xs:complexType>
              <xs:sequence maxOccurs="unbounded"><xs:element name="p"/></xs:sequence>
            </xs:complexType></xs:element>
            <xs:element name="moves"><xs:complexType>
              <xs:choice minOccurs="2" maxOccurs="3">
                <xs:element name="left"/><xs:element name="right"/>
              </xs:choice>
            </xs:complexType></xs:element>
          </xs:schema>"#
            .parse()
            .unwrap();

        schema.validate(b"<roster><p>a</p><p>b</p></roster>").unwrap();
        assert_violation(schema.validate(b"<roster></roster>"));

        schema
            .validate(b"<moves><left/><right/><left/></moves>")
            .unwrap();
        assert_violation(schema.validate(b"<moves><left/></moves>"));
        assert_violation(schema.validate(b"<moves><left/><left/><left/><right/></moves>"));
    }

    #[test]
    fn all_group_bounds_are_enforced_at_load() {
        let err = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="a"><xs:complexType>
              <xs:all maxOccurs="unbounded"><xs:element name="b"/></xs:all>
            </xs:complexType></xs:element>
          </xs:schema>"#
            .parse::<XmlSchema>()
            .unwrap_err();
        assert!(matches!(err.inner, InnerError::InvalidSchema(_)));
    }

    #[test]
    fn element_namespaces_must_match() {
        let schema: XmlSchema = NAMESPACED_XSD.parse().unwrap();
        schema
            .validate(br#"<join xmlns="urn:game"><name>a</name><note xmlns="">hi</note></join>"#)
            .unwrap();
        schema
            .validate(br#"<g:join xmlns:g="urn:game"><g:name>a</g:name></g:join>"#)
            .unwrap();

        assert_violation(schema.validate(b"<join><name>a</name></join>"));
        assert_violation(
            schema.validate(br#"<g:join xmlns:g="urn:other"><g:name>a</g:name></g:join>"#),
        );
        assert_violation(
            schema.validate(br#"<g:join xmlns:g="urn:game"><name>a</name></g:join>"#),
        );
        assert_violation(
            schema.validate(br#"<join xmlns="urn:game"><name>a</name><note>hi</note></join>"#),
        );
    }

    #[test]
    fn unqualified_schema_rejects_namespaced_documents() {
        assert_violation(
            schema().validate(br#"<g:join xmlns:g="urn:other"><name>a</name></g:join>"#),
        );
    }

    #[test]
    fn integer_types_have_their_own_ranges() {
        let byte = single_field("xs:byte");
        assert!(accepts(&byte, "-128"));
        assert!(accepts(&byte, " 127 "));
        assert!(!accepts(&byte, "300"));

        let short = single_field("xs:short");
        assert!(accepts(&short, "32767"));
        assert!(!accepts(&short, "32768"));

        let int = single_field("xs:int");
        assert!(accepts(&int, "+2147483647"));
        assert!(!accepts(&int, "2147483648"));

        let unsigned = single_field("xs:unsignedByte");
        assert!(accepts(&unsigned, "255"));
        assert!(!accepts(&unsigned, "256"));

        let integer = single_field("xs:integer");
        assert!(accepts(&integer, "123456789012345678901234567890"));
        assert!(accepts(&integer, "-42"));
        assert!(!accepts(&integer, "4.2"));

        let positive = single_field("xs:positiveInteger");
        assert!(accepts(&positive, "99999999999999999999999"));
        assert!(!accepts(&positive, "000"));

        let negative = single_field("xs:negativeInteger");
        assert!(accepts(&negative, "-1"));
        assert!(!accepts(&negative, "-0"));
    }

    #[test]
    fn decimal_and_float_lexical_forms() {
        let decimal = single_field("xs:decimal");
        assert!(accepts(&decimal, "-1.5"));
        assert!(accepts(&decimal, ".5"));
        assert!(accepts(&decimal, "3."));
        assert!(!accepts(&decimal, "NaN"));
        assert!(!accepts(&decimal, "inf"));
        assert!(!accepts(&decimal, "1e3"));
        assert!(!accepts(&decimal, "."));

        let double = single_field("xs:double");
        assert!(accepts(&double, "1.5E-3"));
        assert!(accepts(&double, "-INF"));
        assert!(accepts(&double, "NaN"));
        assert!(!accepts(&double, "inf"));
        assert!(!accepts(&double, "infinity"));
        assert!(!accepts(&double, "1e"));
    }

    #[test]
    fn string_enumerations_preserve_whitespace() {
        let schema: XmlSchema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="s"><xs:simpleType>
              <xs:restriction base="xs:string"><xs:enumeration value="red"/></xs:restriction>
            </xs:simpleType></xs:element>
            <xs:element name="t"><xs:simpleType>
              <xs:restriction base="xs:token"><xs:enumeration value="dark red"/></xs:restriction>
            </xs:simpleType></xs:element>
          </xs:schema>"#
            .parse()
            .unwrap();

        schema.validate(b"<s>red</s>").unwrap();
        assert_violation(schema.validate(b"<s> red </s>"));
        schema.validate(b"<t>  dark \n red </t>").unwrap();
    }

    #[test]
    fn derived_simple_types_inherit_base() {
        let schema: XmlSchema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="lvl" type="level"/>
            <xs:simpleType name="small"><xs:restriction base="xs:byte"/></xs:simpleType>
            <xs:simpleType name="level"><xs:restriction base="small">
              <xs:enumeration value="1"/><xs:enumeration value="2"/>
            </xs:restriction></xs:simpleType>
          </xs:schema>"#
            .parse()
            .unwrap();

        schema.validate(b"<lvl>2</lvl>").unwrap();
        assert_violation(schema.validate(b"<lvl>3</lvl>"));
    }

    #[test]
    fn unknown_root_is_a_violation() {
        assert_violation(schema().validate(b"<leave/>"));
    }

    #[test]
    fn malformed_xml_is_not_a_violation() {
        let err = schema().validate(b"<join><name>a</join>").unwrap_err();
        assert!(matches!(err.inner, InnerError::MalformedXml(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn unsupported_schemas_fail_to_load() {
        let not_schema = "<schema/>".parse::<XmlSchema>().unwrap_err();
        assert!(matches!(not_schema.inner, InnerError::InvalidSchema(_)));

        let with_ref = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="a"><xs:complexType><xs:sequence>
              <xs:element ref="b"/>
            </xs:sequence></xs:complexType></xs:element>
          </xs:schema>"#
            .parse::<XmlSchema>()
            .unwrap_err();
        assert!(matches!(with_ref.inner, InnerError::InvalidSchema(_)));

        let unknown_type = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="a" type="nowhere"/>
          </xs:schema>"#
            .parse::<XmlSchema>()
            .unwrap_err();
        assert!(matches!(unknown_type.inner, InnerError::InvalidSchema(_)));

        let unsupported_builtin = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="a" type="xs:dateTime"/>
          </xs:schema>"#
            .parse::<XmlSchema>()
            .unwrap_err();
        assert!(matches!(unsupported_builtin.inner, InnerError::InvalidSchema(_)));

        let bad_bounds = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="a"><xs:complexType><xs:sequence>
              <xs:element name="b" minOccurs="3" maxOccurs="2"/>
            </xs:sequence></xs:complexType></xs:element>
          </xs:schema>"#
            .parse::<XmlSchema>()
            .unwrap_err();
        assert!(matches!(bad_bounds.inner, InnerError::InvalidSchema(_)));
    }

    #[test]
    fn recursive_types_are_refused() {
        let err = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="node" type="nodeType"/>
            <xs:complexType name="nodeType"><xs:sequence>
              <xs:element name="node" type="nodeType" minOccurs="0"/>
            </xs:sequence></xs:complexType>
          </xs:schema>"#
            .parse::<XmlSchema>()
            .unwrap_err();
        assert!(matches!(err.inner, InnerError::InvalidSchema(_)));
    }

    #[test]
    fn load_validator_from_path_and_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GAME_XSD.as_bytes()).unwrap();

        let validator = load_validator(Some(file.path())).unwrap();
        validator.validate(b"<join><name>a</name></join>").unwrap();
        assert!(validator.validate(b"<free-form/>").is_err());

        let fallback = load_validator(None).unwrap();
        fallback.validate(b"<free-form/>").unwrap();
        assert!(fallback.validate(b"<free-form>").is_err());
    }

    #[test]
    fn missing_schema_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = XmlSchema::open(dir.path().join("absent.xsd")).unwrap_err();
        assert!(matches!(err.inner, InnerError::Io(_)));
    }
}
