//! The toolkit: element types, their factories and traceability tables

use rustc_hash::FxHashMap;
use std::fmt;

use crate::decl::{AttributeKind, AttributeSpec, CapabilitySpec, CapabilityTag, ElementSpec, Schema};
use crate::element::{AddOnDef, DefCore, ElementDef, ElementModelAddOn, NamedAddOn, TypedAddOn};
use crate::trace::{TraceTable, Traceability};

/// Builds the definition for a freshly allocated element
pub type DefFactory = fn(DefCore) -> Box<dyn ElementDef>;

/// Builds the add-on for one capability
pub type AddOnFactory = fn() -> Box<dyn AddOnDef>;

/// Everything the compiler knows about element types
pub struct Toolkit {
    schema: Schema,
    factories: FxHashMap<String, DefFactory>,
    add_ons: FxHashMap<CapabilityTag, AddOnFactory>,
    traceability: Traceability,
}

impl Toolkit {
    /// A toolkit with the built-in capabilities and no element types
    pub fn new() -> Self {
        let mut toolkit = Self {
            schema: Schema::new(),
            factories: FxHashMap::default(),
            add_ons: FxHashMap::default(),
            traceability: Traceability::new(),
        };
        toolkit.register_capability(
            CapabilityTag::NAMED,
            CapabilitySpec {
                attributes: vec![AttributeSpec {
                    name: "name".to_string(),
                    kind: AttributeKind::Name,
                    required: false,
                }],
                dynamic_values: Vec::new(),
            },
            || Box::new(NamedAddOn::default()) as Box<dyn AddOnDef>,
        );
        toolkit.register_capability(
            CapabilityTag::TYPED,
            CapabilitySpec {
                attributes: vec![AttributeSpec {
                    name: "type".to_string(),
                    kind: AttributeKind::Type,
                    required: false,
                }],
                dynamic_values: Vec::new(),
            },
            || Box::new(TypedAddOn::default()) as Box<dyn AddOnDef>,
        );
        toolkit.register_capability(
            CapabilityTag::WITH_ELEMENT_MODEL,
            CapabilitySpec::default(),
            || Box::new(ElementModelAddOn::default()) as Box<dyn AddOnDef>,
        );
        toolkit
    }

    /// Every element type of the declared model value language
    pub fn standard() -> Self {
        let mut toolkit = Self::new();
        crate::values::install(&mut toolkit);
        crate::transform::install(&mut toolkit);
        toolkit
    }

    /// Register an element type; abstract types have no factory
    pub fn register(&mut self, spec: ElementSpec, factory: Option<DefFactory>) {
        if let Some(factory) = factory {
            self.factories.insert(spec.name.clone(), factory);
        }
        self.schema.register(spec);
    }

    /// Register a capability with the factory creating its add-on
    pub fn register_capability(&mut self, tag: CapabilityTag, spec: CapabilitySpec, factory: AddOnFactory) {
        self.schema.register_capability(tag, spec);
        self.add_ons.insert(tag, factory);
    }

    /// Register the trace table of an element type
    pub fn register_trace(&mut self, table: TraceTable) {
        self.traceability.register(table);
    }

    /// Every registered element type
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Factory creating definitions of `element_type`
    pub fn factory(&self, element_type: &str) -> Option<DefFactory> {
        self.factories.get(element_type).copied()
    }

    /// Fresh add-on definition for a capability
    pub fn create_add_on(&self, tag: CapabilityTag) -> Option<Box<dyn AddOnDef>> {
        self.add_ons.get(&tag).map(|factory| factory())
    }

    /// Registered trace tables
    pub fn traceability(&self) -> &Traceability {
        &self.traceability
    }
}

impl Default for Toolkit {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolkit")
            .field("element_types", &self.schema.element_names().count())
            .field("factories", &self.factories.len())
            .finish()
    }
}
