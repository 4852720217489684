//! Element schema: attributes, child roles, capabilities and dynamic values
//!
//! Every element type is described by an [`ElementSpec`]. Specs form a single
//! inheritance tree through `supertype`; abstract specs only exist to be
//! inherited from and to name groups of child types (a child role that names
//! an abstract type accepts any of its subtypes).

use indexmap::IndexMap;
use std::fmt;

use super::{AttributeValue, DeclNode};
use crate::error::{CompileError, CompileResult};

/// Tag identifying an add-on capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityTag(&'static str);

impl CapabilityTag {
    /// Reads and validates the `name` attribute
    pub const NAMED: CapabilityTag = CapabilityTag("named");
    /// Reads the `type` attribute
    pub const TYPED: CapabilityTag = CapabilityTag("typed");
    /// Gives the element a local model set holding its dynamic values
    pub const WITH_ELEMENT_MODEL: CapabilityTag = CapabilityTag("with-element-model");

    /// Tag for a capability registered outside the engine
    pub const fn new(name: &'static str) -> Self {
        CapabilityTag(name)
    }

    /// Tag name as it appears in diagnostics
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Kind of value an attribute holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Free text
    Text,
    /// Identifier
    Name,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Expression; strings are name paths
    Expression,
    /// Type spec such as `Value<int>`
    Type,
}

impl AttributeKind {
    fn accepts(self, value: &AttributeValue) -> bool {
        match self {
            AttributeKind::Text | AttributeKind::Name | AttributeKind::Type => {
                matches!(value, AttributeValue::Text(_))
            }
            AttributeKind::Bool => match value {
                AttributeValue::Bool(_) => true,
                AttributeValue::Text(t) => t == "true" || t == "false",
                _ => false,
            },
            AttributeKind::Int => matches!(value, AttributeValue::Int(_)),
            AttributeKind::Expression => true,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            AttributeKind::Text => "a string",
            AttributeKind::Name => "a name",
            AttributeKind::Bool => "a boolean",
            AttributeKind::Int => "an integer",
            AttributeKind::Expression => "an expression",
            AttributeKind::Type => "a type",
        }
    }
}

/// One attribute of an element type
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    /// Attribute name
    pub name: String,
    /// Kind of value the attribute holds
    pub kind: AttributeKind,
    /// Whether compiling fails without it
    pub required: bool,
}

/// One child role of an element type
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSpec {
    /// Role name, or an abstract element type whose subtypes are accepted
    pub role: String,
    /// Fewest children allowed
    pub min: usize,
    /// Most children allowed; `None` is unbounded
    pub max: Option<usize>,
}

impl ChildSpec {
    fn bound(&self) -> String {
        match (self.min, self.max) {
            (min, Some(max)) if min == max => format!("exactly {}", min),
            (0, Some(max)) => format!("at most {}", max),
            (min, Some(max)) => format!("{} to {}", min, max),
            (min, None) => format!("at least {}", min),
        }
    }
}

/// Declaration of a dynamic value an element type contributes to its local models
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DynamicValueDecl {
    /// Name used when no name attribute is given
    pub name: String,
    /// Attribute overriding the name
    pub name_attribute: Option<String>,
    /// Declared type; `None` leaves it to be satisfied later
    pub type_spec: Option<String>,
    /// Attribute whose expression satisfies the value at compile time
    pub source_attribute: Option<String>,
}

impl DynamicValueDecl {
    /// Value named `name` with no type and no source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_attribute: None,
            type_spec: None,
            source_attribute: None,
        }
    }

    /// Let `attribute` override the name
    pub fn named_by(mut self, attribute: impl Into<String>) -> Self {
        self.name_attribute = Some(attribute.into());
        self
    }

    /// Declare the value's type
    pub fn typed(mut self, spec: impl Into<String>) -> Self {
        self.type_spec = Some(spec.into());
        self
    }

    /// Satisfy the value from the expression in `attribute`
    pub fn sourced_from(mut self, attribute: impl Into<String>) -> Self {
        self.source_attribute = Some(attribute.into());
        self
    }

    /// Key identifying the value among an element type's declarations
    pub fn identity_key(&self) -> String {
        match &self.name_attribute {
            Some(attribute) => format!("{{{}}}", attribute),
            None => self.name.clone(),
        }
    }

    /// The name this value takes on a given declaration
    pub fn resolve_name(&self, node: &DeclNode) -> CompileResult<String> {
        match &self.name_attribute {
            Some(attribute) => Ok(node
                .text_attr(attribute)?
                .map(str::to_string)
                .unwrap_or_else(|| self.name.clone())),
            None => Ok(self.name.clone()),
        }
    }
}

/// Schema entry for one element type
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpec {
    /// Element type name
    pub name: String,
    /// Element type this one extends
    pub supertype: Option<String>,
    /// Abstract types only group their subtypes
    pub is_abstract: bool,
    /// Attributes declared by this type itself
    pub attributes: Vec<AttributeSpec>,
    /// Child roles declared by this type itself
    pub children: Vec<ChildSpec>,
    /// Capabilities declared by this type itself
    pub capabilities: Vec<CapabilityTag>,
    /// Dynamic values the type contributes
    pub dynamic_values: Vec<DynamicValueDecl>,
    /// Kind of the element content, if it takes any
    pub value: Option<AttributeKind>,
}

impl ElementSpec {
    /// Concrete element type with nothing declared
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supertype: None,
            is_abstract: false,
            attributes: Vec::new(),
            children: Vec::new(),
            capabilities: Vec::new(),
            dynamic_values: Vec::new(),
            value: None,
        }
    }

    /// Abstract element type
    pub fn abstract_type(name: impl Into<String>) -> Self {
        Self {
            is_abstract: true,
            ..Self::new(name)
        }
    }

    /// Set the supertype
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    /// Add an optional attribute
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Add a required attribute
    pub fn required(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Add a child role with its cardinality
    pub fn child(mut self, role: impl Into<String>, min: usize, max: Option<usize>) -> Self {
        self.children.push(ChildSpec {
            role: role.into(),
            min,
            max,
        });
        self
    }

    /// Add a capability
    pub fn capability(mut self, tag: CapabilityTag) -> Self {
        self.capabilities.push(tag);
        self
    }

    /// Add a dynamic value declaration
    pub fn dynamic_value(mut self, decl: DynamicValueDecl) -> Self {
        self.dynamic_values.push(decl);
        self
    }

    /// Accept element content of the given kind
    pub fn content(mut self, kind: AttributeKind) -> Self {
        self.value = Some(kind);
        self
    }
}

/// What a capability contributes to every element type that has it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilitySpec {
    /// Attributes every element with the capability accepts
    pub attributes: Vec<AttributeSpec>,
    /// Dynamic values every element with the capability contributes
    pub dynamic_values: Vec<DynamicValueDecl>,
}

/// The set of known element types
#[derive(Debug, Clone, Default)]
pub struct Schema {
    elements: IndexMap<String, ElementSpec>,
    capabilities: IndexMap<CapabilityTag, CapabilitySpec>,
}

impl Schema {
    /// Schema with no element types
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an element type
    pub fn register(&mut self, spec: ElementSpec) {
        self.elements.insert(spec.name.clone(), spec);
    }

    /// Register or replace what a capability contributes
    pub fn register_capability(&mut self, tag: CapabilityTag, spec: CapabilitySpec) {
        self.capabilities.insert(tag, spec);
    }

    /// Spec of an element type
    pub fn get(&self, name: &str) -> Option<&ElementSpec> {
        self.elements.get(name)
    }

    /// Whether the element type is known
    pub fn contains(&self, name: &str) -> bool {
        self.elements.contains_key(name)
    }

    /// Names of all registered element types
    pub fn element_names(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// The element spec and its supertypes, most specific first
    pub fn lineage(&self, name: &str) -> Vec<&ElementSpec> {
        let mut lineage = Vec::new();
        let mut current = self.elements.get(name);
        while let Some(spec) = current {
            if lineage.iter().any(|s: &&ElementSpec| s.name == spec.name) {
                break;
            }
            lineage.push(spec);
            current = spec.supertype.as_deref().and_then(|s| self.elements.get(s));
        }
        lineage
    }

    /// Whether `name` is `ancestor` or extends it
    pub fn is_subtype(&self, name: &str, ancestor: &str) -> bool {
        self.lineage(name).iter().any(|s| s.name == ancestor)
    }

    /// Capabilities of an element type: its own first, then its supertype's,
    /// depth-first, each at most once
    pub fn capabilities_of(&self, name: &str) -> Vec<CapabilityTag> {
        let mut tags = Vec::new();
        for spec in self.lineage(name) {
            for tag in &spec.capabilities {
                if !tags.contains(tag) {
                    tags.push(*tag);
                }
            }
        }
        tags
    }

    /// Dynamic values a capability contributes
    pub fn capability_decls(&self, tag: CapabilityTag) -> &[DynamicValueDecl] {
        self.capabilities
            .get(&tag)
            .map(|c| c.dynamic_values.as_slice())
            .unwrap_or(&[])
    }

    /// Every attribute an element type accepts, including inherited and
    /// capability attributes
    pub fn attributes_of(&self, name: &str) -> Vec<&AttributeSpec> {
        let mut attributes: Vec<&AttributeSpec> = Vec::new();
        for spec in self.lineage(name) {
            attributes.extend(spec.attributes.iter());
        }
        for tag in self.capabilities_of(name) {
            if let Some(capability) = self.capabilities.get(&tag) {
                attributes.extend(capability.attributes.iter());
            }
        }
        attributes
    }

    fn children_of(&self, name: &str) -> Vec<&ChildSpec> {
        self.lineage(name)
            .into_iter()
            .flat_map(|spec| spec.children.iter())
            .collect()
    }

    fn content_of(&self, name: &str) -> Option<AttributeKind> {
        self.lineage(name).into_iter().find_map(|spec| spec.value)
    }

    fn matches_role(&self, child: &DeclNode, spec: &ChildSpec) -> bool {
        if child.role() == spec.role {
            return true;
        }
        child.role.is_none() && self.is_subtype(&child.element_type, &spec.role)
    }

    /// Check a node's attributes, content and children against its spec
    pub fn validate(&self, node: &DeclNode) -> CompileResult<&ElementSpec> {
        let spec = self
            .elements
            .get(&node.element_type)
            .filter(|s| !s.is_abstract)
            .ok_or_else(|| CompileError::UnknownElementType {
                name: node.element_type.clone(),
                position: node.position,
            })?;

        let attributes = self.attributes_of(&spec.name);
        for (name, value) in &node.attributes {
            let attribute = attributes
                .iter()
                .find(|a| &a.name == name)
                .ok_or_else(|| CompileError::UnknownAttribute {
                    element: spec.name.clone(),
                    attribute: name.clone(),
                    position: node.position,
                })?;
            if !attribute.kind.accepts(value) {
                return Err(CompileError::MalformedAttribute {
                    attribute: name.clone(),
                    message: format!(
                        "expected {}, found {}",
                        attribute.kind.describe(),
                        value.kind_name()
                    ),
                    position: node.position,
                });
            }
        }
        for attribute in attributes.iter().filter(|a| a.required) {
            if !node.has_attribute(&attribute.name) {
                return Err(CompileError::MissingAttribute {
                    element: spec.name.clone(),
                    attribute: attribute.name.clone(),
                    position: node.position,
                });
            }
        }

        if let Some(value) = &node.value {
            match self.content_of(&spec.name) {
                Some(kind) if kind.accepts(value) => {}
                Some(kind) => {
                    return Err(CompileError::MalformedAttribute {
                        attribute: "content".to_string(),
                        message: format!("expected {}, found {}", kind.describe(), value.kind_name()),
                        position: node.position,
                    })
                }
                None => {
                    return Err(CompileError::MalformedAttribute {
                        attribute: "content".to_string(),
                        message: format!("element '{}' takes no content", spec.name),
                        position: node.position,
                    })
                }
            }
        }

        let child_specs = self.children_of(&spec.name);
        let mut counts = vec![0usize; child_specs.len()];
        for child in &node.children {
            let index = child_specs
                .iter()
                .position(|c| self.matches_role(child, c))
                .ok_or_else(|| CompileError::UnknownChild {
                    element: spec.name.clone(),
                    role: child.role().to_string(),
                    position: child.position,
                })?;
            counts[index] += 1;
        }
        for (child_spec, count) in child_specs.iter().zip(counts) {
            if count < child_spec.min || child_spec.max.is_some_and(|max| count > max) {
                return Err(CompileError::ChildCount {
                    element: spec.name.clone(),
                    role: child_spec.role.clone(),
                    expected: child_spec.bound(),
                    actual: count,
                    position: node.position,
                });
            }
        }

        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.register_capability(
            CapabilityTag::NAMED,
            CapabilitySpec {
                attributes: vec![AttributeSpec {
                    name: "name".to_string(),
                    kind: AttributeKind::Name,
                    required: true,
                }],
                dynamic_values: Vec::new(),
            },
        );
        schema.register(ElementSpec::abstract_type("model-value").capability(CapabilityTag::NAMED));
        schema.register(
            ElementSpec::new("models")
                .capability(CapabilityTag::WITH_ELEMENT_MODEL)
                .child("model-value", 0, None),
        );
        schema.register(
            ElementSpec::new("constant")
                .extends("model-value")
                .capability(CapabilityTag::TYPED)
                .required("value", AttributeKind::Expression),
        );
        schema.register(
            ElementSpec::new("list")
                .extends("model-value")
                .child("element", 0, None),
        );
        schema.register(ElementSpec::new("element").content(AttributeKind::Expression));
        schema.register(
            ElementSpec::new("loop")
                .extends("model-value")
                .attribute("max", AttributeKind::Int)
                .child("finally", 0, Some(1)),
        );
        schema
    }

    // ── Lineage and capabilities ────────────────────────────────────────

    #[test]
    fn test_capabilities_own_before_inherited() {
        let schema = schema();
        assert_eq!(
            schema.capabilities_of("constant"),
            vec![CapabilityTag::TYPED, CapabilityTag::NAMED]
        );
        assert!(schema.is_subtype("list", "model-value"));
        assert!(!schema.is_subtype("models", "model-value"));
    }

    #[test]
    fn test_identity_key() {
        assert_eq!(DynamicValueDecl::new("source").identity_key(), "source");
        assert_eq!(
            DynamicValueDecl::new("source").named_by("source-as").identity_key(),
            "{source-as}"
        );
        let node = DeclNode::new("map-to").attr("source-as", "s");
        let decl = DynamicValueDecl::new("source").named_by("source-as");
        assert_eq!(decl.resolve_name(&node).unwrap(), "s");
        assert_eq!(decl.resolve_name(&DeclNode::new("map-to")).unwrap(), "source");
    }

    // ── Validation ──────────────────────────────────────────────────────

    #[test]
    fn test_validate_accepts_subtype_children() {
        let schema = schema();
        let node = DeclNode::new("models")
            .child(DeclNode::new("constant").attr("name", "a").attr("value", 1i64))
            .child(
                DeclNode::new("list")
                    .attr("name", "b")
                    .child(DeclNode::new("element").with_value(2i64)),
            );
        assert!(schema.validate(&node).is_ok());
        assert!(schema.validate(&node.children[1]).is_ok());
    }

    #[test]
    fn test_validate_errors() {
        let schema = schema();
        let missing = DeclNode::new("constant").attr("name", "a");
        assert_eq!(schema.validate(&missing).unwrap_err().code(), "E1002");

        let unknown = DeclNode::new("constant")
            .attr("name", "a")
            .attr("value", 1i64)
            .attr("colour", "red");
        assert_eq!(schema.validate(&unknown).unwrap_err().code(), "E1005");

        let malformed = DeclNode::new("loop").attr("name", "l").attr("max", "ten");
        assert_eq!(schema.validate(&malformed).unwrap_err().code(), "E1006");

        let child = DeclNode::new("list").attr("name", "l").child(DeclNode::new("models"));
        assert_eq!(schema.validate(&child).unwrap_err().code(), "E1007");

        let count = DeclNode::new("loop")
            .attr("name", "l")
            .child(DeclNode::new("element").with_role("finally"))
            .child(DeclNode::new("element").with_role("finally"));
        let err = schema.validate(&count).unwrap_err();
        assert_eq!(err.code(), "E1008");
        assert!(err.to_string().contains("at most 1"));

        assert_eq!(
            schema.validate(&DeclNode::new("model-value")).unwrap_err().code(),
            "E1001"
        );
        assert_eq!(schema.validate(&DeclNode::new("widget")).unwrap_err().code(), "E1001");
    }
}
