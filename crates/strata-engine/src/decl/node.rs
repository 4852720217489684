//! Declaration nodes: the already-parsed input of the compiler

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::SourcePosition;
use crate::error::{CompileError, CompileResult};
use crate::expr::{Expr, Literal};

/// A typed attribute value
///
/// Strings in expression attributes are dotted name paths; full expressions
/// are written as `{"expr": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// Text, or a dotted name path in expression attributes
    Text(String),
    /// Full expression
    Expr {
        /// The expression
        expr: Expr,
    },
}

impl AttributeValue {
    /// Name of the value's kind for messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "boolean",
            AttributeValue::Int(_) => "integer",
            AttributeValue::Float(_) => "float",
            AttributeValue::Text(_) => "string",
            AttributeValue::Expr { .. } => "expression",
        }
    }

    /// The value read as an expression
    pub fn to_expr(&self) -> Expr {
        match self {
            AttributeValue::Bool(b) => Expr::Lit(Literal::Bool(*b)),
            AttributeValue::Int(i) => Expr::Lit(Literal::Int(*i)),
            AttributeValue::Float(f) => Expr::Lit(Literal::Float(*f)),
            AttributeValue::Text(path) => Expr::Name(path.clone()),
            AttributeValue::Expr { expr } => expr.clone(),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<Expr> for AttributeValue {
    fn from(expr: Expr) -> Self {
        AttributeValue::Expr { expr }
    }
}

/// One declared element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclNode {
    /// Element type name
    #[serde(rename = "type")]
    pub element_type: String,

    /// Child role; defaults to the element type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Where the node was declared
    #[serde(default)]
    pub position: SourcePosition,

    /// Attributes in declaration order
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, AttributeValue>,

    /// Child nodes in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DeclNode>,

    /// Element content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
}

impl DeclNode {
    /// Node of the given element type with no attributes or children
    pub fn new(element_type: impl Into<String>) -> Self {
        Self {
            element_type: element_type.into(),
            role: None,
            position: SourcePosition::default(),
            attributes: IndexMap::new(),
            children: Vec::new(),
            value: None,
        }
    }

    /// Parse a node tree from JSON
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Set the source position
    pub fn at(mut self, position: SourcePosition) -> Self {
        self.position = position;
        self
    }

    /// Set the role the node plays in its parent
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Add or replace an attribute
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Append a child
    pub fn child(mut self, child: DeclNode) -> Self {
        self.children.push(child);
        self
    }

    /// Set the element content
    pub fn with_value(mut self, value: impl Into<AttributeValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Role under which the node appears in its parent
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(&self.element_type)
    }

    /// Raw attribute value
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Whether the attribute is present
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Children with the given role, in declaration order
    pub fn children_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a DeclNode> + 'a {
        self.children.iter().filter(move |c| c.role() == role)
    }

    /// The single child with the given role, if any
    pub fn child_with_role(&self, role: &str) -> Option<&DeclNode> {
        self.children.iter().find(|c| c.role() == role)
    }

    // ── Typed attribute access ────────────────────────────────────────

    fn malformed(&self, attribute: &str, expected: &str, found: &AttributeValue) -> CompileError {
        CompileError::MalformedAttribute {
            attribute: attribute.to_string(),
            message: format!("expected {}, found {}", expected, found.kind_name()),
            position: self.position,
        }
    }

    /// Text attribute
    pub fn text_attr(&self, name: &str) -> CompileResult<Option<&str>> {
        match self.attributes.get(name) {
            None => Ok(None),
            Some(AttributeValue::Text(text)) => Ok(Some(text.as_str())),
            Some(other) => Err(self.malformed(name, "a string", other)),
        }
    }

    /// Text attribute that must be present
    pub fn required_text(&self, name: &str) -> CompileResult<&str> {
        self.text_attr(name)?
            .ok_or_else(|| CompileError::MissingAttribute {
                element: self.element_type.clone(),
                attribute: name.to_string(),
                position: self.position,
            })
    }

    /// Boolean attribute; `"true"`/`"false"` strings are accepted
    pub fn bool_attr(&self, name: &str, default: bool) -> CompileResult<bool> {
        match self.attributes.get(name) {
            None => Ok(default),
            Some(AttributeValue::Bool(b)) => Ok(*b),
            Some(AttributeValue::Text(t)) if t == "true" => Ok(true),
            Some(AttributeValue::Text(t)) if t == "false" => Ok(false),
            Some(other) => Err(self.malformed(name, "a boolean", other)),
        }
    }

    /// Non-negative integer attribute
    pub fn count_attr(&self, name: &str, default: usize) -> CompileResult<usize> {
        match self.attributes.get(name) {
            None => Ok(default),
            Some(AttributeValue::Int(i)) if *i >= 0 => Ok(*i as usize),
            Some(AttributeValue::Text(t)) => t
                .parse::<usize>()
                .map_err(|_| self.malformed(name, "a non-negative integer", &AttributeValue::Text(t.clone()))),
            Some(other) => Err(self.malformed(name, "a non-negative integer", other)),
        }
    }

    /// Expression attribute
    pub fn expr_attr(&self, name: &str) -> Option<Arc<Expr>> {
        self.attributes.get(name).map(|v| Arc::new(v.to_expr()))
    }

    /// Expression attribute that must be present
    pub fn required_expr(&self, name: &str) -> CompileResult<Arc<Expr>> {
        self.expr_attr(name).ok_or_else(|| CompileError::MissingAttribute {
            element: self.element_type.clone(),
            attribute: name.to_string(),
            position: self.position,
        })
    }

    /// Element content read as an expression
    pub fn value_expr(&self) -> Option<Arc<Expr>> {
        self.value.as_ref().map(|v| Arc::new(v.to_expr()))
    }
}
