//! Traceability tables
//!
//! Tools inspecting a compiled document ask one question in three stages:
//! what does attribute `x` of this element look like as declared, as
//! interpreted, and live. Each element type registers a table of accessors
//! for that. Accessors are written against the concrete definition and
//! interpretation types and erased once, when the table is built.

use rustc_hash::FxHashMap;
use std::fmt;
use std::marker::PhantomData;
use strata_reactive::Datum;

use crate::decl::Schema;
use crate::element::{ElementDef, ElementId, ElementInstance, ElementInterpreted};

type DefAccessor = Box<dyn Fn(&dyn ElementDef) -> Option<String> + Send + Sync>;
type InterpAccessor = Box<dyn Fn(&dyn ElementInterpreted) -> Option<String> + Send + Sync>;
type DefChildren = Box<dyn Fn(&dyn ElementDef) -> Vec<ElementId> + Send + Sync>;
type InterpChildren = Box<dyn Fn(&dyn ElementInterpreted) -> Vec<ElementId> + Send + Sync>;

/// What a query is asked against
#[derive(Clone, Copy)]
pub enum TraceTarget<'a> {
    /// Compiled definition
    Definition(&'a dyn ElementDef),
    /// Interpretation
    Interpretation(&'a dyn ElementInterpreted),
    /// Live instance
    Instance(&'a ElementInstance),
}

impl TraceTarget<'_> {
    fn element_type(&self) -> &str {
        match self {
            TraceTarget::Definition(def) => &def.core().element_type,
            TraceTarget::Interpretation(interpreted) => &interpreted.core().element_type,
            TraceTarget::Instance(instance) => instance.element_type(),
        }
    }
}

impl fmt::Debug for TraceTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TraceTarget::Definition(_) => "Definition",
            TraceTarget::Interpretation(_) => "Interpretation",
            TraceTarget::Instance(_) => "Instance",
        };
        write!(f, "{}({})", stage, self.element_type())
    }
}

/// Answer to a value query
#[derive(Debug, Clone, PartialEq)]
pub enum TraceValue {
    /// Declared or resolved form, rendered as text
    Text(String),
    /// Current content of a live value
    Datum(Datum),
}

struct AttributeAccessor {
    def: DefAccessor,
    interp: InterpAccessor,
}

struct ChildAccessor {
    def: DefChildren,
    interp: InterpChildren,
}

/// Accessors of one element type
#[derive(Default)]
pub struct TraceTable {
    element_type: String,
    attributes: FxHashMap<String, AttributeAccessor>,
    value: Option<AttributeAccessor>,
    children: FxHashMap<String, ChildAccessor>,
}

impl TraceTable {
    /// Start a table for element type `element_type`, whose definitions are
    /// `D` and interpretations `I`
    pub fn builder<D, I>(element_type: impl Into<String>) -> TraceTableBuilder<D, I>
    where
        D: ElementDef,
        I: ElementInterpreted + 'static,
    {
        TraceTableBuilder {
            table: TraceTable {
                element_type: element_type.into(),
                ..TraceTable::default()
            },
            _types: PhantomData,
        }
    }

    /// Element type the table describes
    pub fn element_type(&self) -> &str {
        &self.element_type
    }

    /// Whether the table has an accessor for `name`
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Whether the table has an accessor for `role`
    pub fn has_child(&self, role: &str) -> bool {
        self.children.contains_key(role)
    }
}

impl fmt::Debug for TraceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attributes: Vec<_> = self.attributes.keys().collect();
        attributes.sort();
        let mut children: Vec<_> = self.children.keys().collect();
        children.sort();
        f.debug_struct("TraceTable")
            .field("element_type", &self.element_type)
            .field("attributes", &attributes)
            .field("value", &self.value.is_some())
            .field("children", &children)
            .finish()
    }
}

/// Typed construction of a [`TraceTable`]
pub struct TraceTableBuilder<D, I> {
    table: TraceTable,
    _types: PhantomData<fn(&D, &I)>,
}

impl<D, I> TraceTableBuilder<D, I>
where
    D: ElementDef,
    I: ElementInterpreted + 'static,
{
    /// Attribute read from the concrete definition and interpretation
    pub fn attribute(
        mut self,
        name: &str,
        def: impl Fn(&D) -> Option<String> + Send + Sync + 'static,
        interp: impl Fn(&I) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.table
            .attributes
            .insert(name.to_string(), erase(def, interp));
        self
    }

    /// Attribute every element type shares, read through the trait objects
    pub fn common(
        mut self,
        name: &str,
        def: impl Fn(&dyn ElementDef) -> Option<String> + Send + Sync + 'static,
        interp: impl Fn(&dyn ElementInterpreted) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.table.attributes.insert(
            name.to_string(),
            AttributeAccessor {
                def: Box::new(def),
                interp: Box::new(interp),
            },
        );
        self
    }

    /// The `name` attribute of the `named` capability
    pub fn named(self) -> Self {
        self.common(
            "name",
            |def| def.core().name().map(str::to_string),
            |interp| interp.core().name.clone(),
        )
    }

    /// The `type` attribute of the `typed` capability; interpretations
    /// answer with the resolved type
    pub fn typed(self) -> Self {
        self.common(
            "type",
            |def| def.core().declared_type().map(|t| t.to_string()),
            |interp| interp.value().map(|v| v.value_type().to_string()),
        )
    }

    /// The element's content
    pub fn value(
        mut self,
        def: impl Fn(&D) -> Option<String> + Send + Sync + 'static,
        interp: impl Fn(&I) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.table.value = Some(erase(def, interp));
        self
    }

    /// Children with a role
    pub fn child(
        mut self,
        role: &str,
        def: impl Fn(&D) -> Vec<ElementId> + Send + Sync + 'static,
        interp: impl Fn(&I) -> Vec<ElementId> + Send + Sync + 'static,
    ) -> Self {
        self.table.children.insert(
            role.to_string(),
            ChildAccessor {
                def: Box::new(move |d: &dyn ElementDef| {
                    d.as_any().downcast_ref::<D>().map(&def).unwrap_or_default()
                }),
                interp: Box::new(move |i: &dyn ElementInterpreted| {
                    i.as_any().downcast_ref::<I>().map(&interp).unwrap_or_default()
                }),
            },
        );
        self
    }

    /// The finished table
    pub fn build(self) -> TraceTable {
        self.table
    }
}

fn erase<D, I>(
    def: impl Fn(&D) -> Option<String> + Send + Sync + 'static,
    interp: impl Fn(&I) -> Option<String> + Send + Sync + 'static,
) -> AttributeAccessor
where
    D: ElementDef,
    I: ElementInterpreted + 'static,
{
    AttributeAccessor {
        def: Box::new(move |d: &dyn ElementDef| d.as_any().downcast_ref::<D>().and_then(&def)),
        interp: Box::new(move |i: &dyn ElementInterpreted| {
            i.as_any().downcast_ref::<I>().and_then(&interp)
        }),
    }
}

/// Every table of a toolkit, keyed by element type
#[derive(Debug, Default)]
pub struct Traceability {
    tables: FxHashMap<String, TraceTable>,
}

impl Traceability {
    /// No tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the table of its element type
    pub fn register(&mut self, table: TraceTable) {
        self.tables.insert(table.element_type.clone(), table);
    }

    /// Whether `element_type` has a table
    pub fn has_table(&self, element_type: &str) -> bool {
        self.tables.contains_key(element_type)
    }

    /// Table of `element_type`
    pub fn table(&self, element_type: &str) -> Option<&TraceTable> {
        self.tables.get(element_type)
    }

    /// Schema attributes of `element_type` that have no accessor
    pub fn validate(&self, schema: &Schema, element_type: &str) -> Vec<String> {
        let Some(table) = self.tables.get(element_type) else {
            return Vec::new();
        };
        let mut missing = Vec::new();
        for attribute in schema.attributes_of(element_type) {
            if !table.has_attribute(&attribute.name) && !missing.contains(&attribute.name) {
                missing.push(attribute.name.clone());
            }
        }
        missing
    }

    /// An attribute as declared or as interpreted; instances answer with the
    /// name they were instantiated under
    pub fn get_attribute(&self, target: TraceTarget<'_>, name: &str) -> Option<String> {
        let table = self.tables.get(target.element_type())?;
        match target {
            TraceTarget::Definition(def) => (table.attributes.get(name)?.def)(def),
            TraceTarget::Interpretation(interp) => (table.attributes.get(name)?.interp)(interp),
            TraceTarget::Instance(instance) => match name {
                "name" => instance
                    .add_on_as::<crate::element::NamedInstance>(crate::decl::CapabilityTag::NAMED)
                    .map(|n| n.name.clone())
                    .filter(|n| !n.is_empty()),
                _ => None,
            },
        }
    }

    /// The element's content; instances answer with their live value
    pub fn get_value(&self, target: TraceTarget<'_>) -> Option<TraceValue> {
        let table = self.tables.get(target.element_type())?;
        match target {
            TraceTarget::Definition(def) => (table.value.as_ref()?.def)(def).map(TraceValue::Text),
            TraceTarget::Interpretation(interp) => {
                (table.value.as_ref()?.interp)(interp).map(TraceValue::Text)
            }
            TraceTarget::Instance(instance) => instance.value().map(|v| TraceValue::Datum(v.to_datum())),
        }
    }

    /// Children with a role; instances answer with their element children
    pub fn get_child(&self, target: TraceTarget<'_>, role: &str) -> Vec<ElementId> {
        let Some(table) = self.tables.get(target.element_type()) else {
            return Vec::new();
        };
        match target {
            TraceTarget::Definition(def) => table
                .children
                .get(role)
                .map(|c| (c.def)(def))
                .unwrap_or_default(),
            TraceTarget::Interpretation(interp) => table
                .children
                .get(role)
                .map(|c| (c.interp)(interp))
                .unwrap_or_default(),
            TraceTarget::Instance(instance) => {
                if table.has_child(role) {
                    instance.children().iter().map(|c| c.id()).collect()
                } else {
                    Vec::new()
                }
            }
        }
    }
}
