//! Compile-time model sets: named components visible to expressions
//!
//! A model set belongs either to the document root, to a `model` element (a
//! named sub-model) or to an element with a local element model. Sets form a
//! parent chain; name lookup walks it outward. Components are values declared
//! by elements, dynamic slots, or nested sub-models.

use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::decl::SourcePosition;
use crate::element::ElementId;
use crate::error::{CompileError, CompileResult};
use crate::expr::Expr;
use crate::types::ModelInstanceType;

/// Identifies a model set within a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelSetId(pub(crate) u32);

/// Identifies a component across every model set of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a component name stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Value produced by a declared element
    Element(ElementId),
    /// Late-bound slot, see [`DynamicState`]
    Dynamic,
    /// Nested model set
    SubModel(ModelSetId),
}

/// A named component of a model set
#[derive(Debug, Clone)]
pub struct ModelComponent {
    /// Document-wide id
    pub id: ComponentId,
    /// Name within the set
    pub name: String,
    /// Where the component was declared
    pub position: SourcePosition,
    /// What produces the component's value
    pub kind: ComponentKind,
}

/// One set of named components
#[derive(Debug)]
pub struct ModelSet {
    /// Index of the set in [`ModelSets`]
    pub id: ModelSetId,
    /// Enclosing set
    pub parent: Option<ModelSetId>,
    /// Element owning the set; `None` for the root
    pub owner: Option<ElementId>,
    /// Dotted path from the root, empty for the root set
    pub path: String,
    components: IndexMap<String, ModelComponent>,
}

impl ModelSet {
    /// Components in declaration order
    pub fn components(&self) -> impl Iterator<Item = &ModelComponent> {
        self.components.values()
    }

    /// Component declared under `name`
    pub fn get(&self, name: &str) -> Option<&ModelComponent> {
        self.components.get(name)
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the set declares nothing
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// A producer fixed for a dynamic value at compile time
#[derive(Debug, Clone, PartialEq)]
pub enum Satisfier {
    /// Expression evaluated in the given models
    Expression {
        /// The producing expression
        expr: Arc<Expr>,
        /// Models the expression resolves names against
        models: ModelSetId,
        /// Where the expression was declared
        position: SourcePosition,
    },
    /// Value of another element
    Element(ElementId),
}

/// Satisfaction state of a dynamic slot
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicState {
    /// Slot name
    pub name: String,
    /// Declared type, if the declaration fixed one
    pub declared: Option<ModelInstanceType>,
    /// Producer, once satisfied with one
    pub producer: Option<Satisfier>,
    /// Type fixed without a producer; the value is then supplied per instance
    pub satisfied_type: Option<ModelInstanceType>,
    /// Declared by a `hollow` element for an outer layer to satisfy
    pub hollow: bool,
}

impl DynamicState {
    /// Unsatisfied slot
    pub fn new(name: impl Into<String>, declared: Option<ModelInstanceType>) -> Self {
        Self {
            name: name.into(),
            declared,
            producer: None,
            satisfied_type: None,
            hollow: false,
        }
    }

    /// Mark the slot as declared by a `hollow` element
    pub fn hollow(mut self) -> Self {
        self.hollow = true;
        self
    }

    /// Best known type of the slot
    pub fn effective_type(&self) -> Option<&ModelInstanceType> {
        self.satisfied_type.as_ref().or(self.declared.as_ref())
    }

    /// Whether a producer or a type has been fixed
    pub fn is_satisfied(&self) -> bool {
        self.producer.is_some() || self.satisfied_type.is_some()
    }
}

/// Every model set of a document
#[derive(Debug, Default)]
pub struct ModelSets {
    sets: Vec<ModelSet>,
    owned: FxHashMap<ElementId, ModelSetId>,
    component_sets: FxHashMap<ComponentId, ModelSetId>,
    next_component: u32,
    dynamic: RwLock<FxHashMap<ComponentId, DynamicState>>,
}

impl ModelSets {
    /// No sets at all
    pub fn new() -> Self {
        Self::default()
    }

    fn push_set(&mut self, parent: Option<ModelSetId>, owner: Option<ElementId>, path: String) -> ModelSetId {
        let id = ModelSetId(self.sets.len() as u32);
        self.sets.push(ModelSet {
            id,
            parent,
            owner,
            path,
            components: IndexMap::new(),
        });
        id
    }

    /// Create a parentless set
    pub fn create_root(&mut self) -> ModelSetId {
        self.push_set(None, None, String::new())
    }

    /// The set owned by `owner`, created on first request
    pub fn ensure_owned_set(&mut self, owner: ElementId, parent: ModelSetId, path: &str) -> ModelSetId {
        if let Some(id) = self.owned.get(&owner).copied() {
            let set = &mut self.sets[id.0 as usize];
            set.parent = Some(parent);
            set.path = path.to_string();
            return id;
        }
        let id = self.push_set(Some(parent), Some(owner), path.to_string());
        self.owned.insert(owner, id);
        id
    }

    /// Set owned by an element, if one was created
    pub fn owned_set(&self, owner: ElementId) -> Option<ModelSetId> {
        self.owned.get(&owner).copied()
    }

    /// Set by id
    pub fn set(&self, id: ModelSetId) -> &ModelSet {
        &self.sets[id.0 as usize]
    }

    /// Forget every component of a set before it is declared again
    pub fn clear(&mut self, id: ModelSetId) {
        let set = &mut self.sets[id.0 as usize];
        let mut dynamic = self.dynamic.write();
        for component in set.components.values() {
            self.component_sets.remove(&component.id);
            dynamic.remove(&component.id);
        }
        set.components.clear();
    }

    /// Add a component; names are unique within one set
    pub fn declare(
        &mut self,
        set: ModelSetId,
        name: &str,
        position: SourcePosition,
        kind: ComponentKind,
    ) -> CompileResult<ComponentId> {
        if self.sets[set.0 as usize].components.contains_key(name) {
            return Err(CompileError::DuplicateName {
                name: name.to_string(),
                position,
            });
        }
        let id = ComponentId(self.next_component);
        self.next_component += 1;
        self.sets[set.0 as usize].components.insert(
            name.to_string(),
            ModelComponent {
                id,
                name: name.to_string(),
                position,
                kind,
            },
        );
        self.component_sets.insert(id, set);
        Ok(id)
    }

    /// Add a dynamic slot
    pub fn declare_dynamic(
        &mut self,
        set: ModelSetId,
        position: SourcePosition,
        state: DynamicState,
    ) -> CompileResult<ComponentId> {
        let id = self.declare(set, &state.name.clone(), position, ComponentKind::Dynamic)?;
        self.dynamic.write().insert(id, state);
        Ok(id)
    }

    /// Component declared directly in `set`
    pub fn lookup(&self, set: ModelSetId, name: &str) -> Option<&ModelComponent> {
        self.sets[set.0 as usize].components.get(name)
    }

    /// Resolve a dotted path: the first segment is looked up through the
    /// parent chain, later segments descend into sub-models
    pub fn resolve(&self, set: ModelSetId, path: &str) -> Option<&ModelComponent> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = Some(set);
        let mut found = None;
        while let Some(id) = current {
            if let Some(component) = self.lookup(id, first) {
                found = Some(component);
                break;
            }
            current = self.sets[id.0 as usize].parent;
        }
        let mut component = found?;
        for segment in segments {
            match component.kind {
                ComponentKind::SubModel(sub) => component = self.lookup(sub, segment)?,
                _ => return None,
            }
        }
        Some(component)
    }

    /// Whether an enclosing set already declares `name`
    pub fn shadows(&self, set: ModelSetId, name: &str) -> Option<&ModelComponent> {
        let mut current = self.sets[set.0 as usize].parent;
        while let Some(id) = current {
            if let Some(component) = self.lookup(id, name) {
                return Some(component);
            }
            current = self.sets[id.0 as usize].parent;
        }
        None
    }

    /// Component by document-wide id
    pub fn component(&self, id: ComponentId) -> Option<&ModelComponent> {
        let set = self.component_sets.get(&id)?;
        self.sets[set.0 as usize]
            .components
            .values()
            .find(|c| c.id == id)
    }

    /// Set declaring the component
    pub fn set_of(&self, id: ComponentId) -> Option<ModelSetId> {
        self.component_sets.get(&id).copied()
    }

    /// Dotted path of a component, for messages
    pub fn path_of(&self, id: ComponentId) -> String {
        match (self.set_of(id), self.component(id)) {
            (Some(set), Some(component)) => {
                let prefix = &self.sets[set.0 as usize].path;
                if prefix.is_empty() {
                    component.name.clone()
                } else {
                    format!("{}.{}", prefix, component.name)
                }
            }
            _ => id.to_string(),
        }
    }

    // ── Dynamic slots ─────────────────────────────────────────────────

    /// Snapshot of a slot's satisfaction state
    pub fn dynamic(&self, id: ComponentId) -> Option<DynamicState> {
        self.dynamic.read().get(&id).cloned()
    }

    /// Mutate a slot's state; `None` when the component is not dynamic
    pub fn update_dynamic<R>(&self, id: ComponentId, f: impl FnOnce(&mut DynamicState) -> R) -> Option<R> {
        self.dynamic.write().get_mut(&id).map(f)
    }
}
