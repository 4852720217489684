//! Definitions and the document arena that owns them

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::addon::{AddOnDef, AddOnSet, NamedAddOn, TypedAddOn};
use super::{ElementInterpreted, UpdateSession, ValueInterpreted};
use crate::decl::{CapabilityTag, DeclNode, SourcePosition};
use crate::error::CompileResult;
use crate::model::{CompiledModelValue, ModelSetId, ModelSets};
use crate::transform::OperationDef;
use crate::types::{ElementType, ModelType};

/// Identifies a definition within its document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) u32);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// State every definition carries
pub struct DefCore {
    /// Document-wide id
    pub id: ElementId,
    /// Declared element type
    pub element_type: String,
    /// Where the element was declared
    pub position: SourcePosition,
    /// Enclosing definition
    pub parent: Option<ElementId>,
    /// Models the element's expressions resolve in
    pub models: ModelSetId,
    /// Models the element declares for its own content
    pub local_models: Option<ModelSetId>,
    /// Definitions of the element's capabilities
    pub add_ons: AddOnSet<Box<dyn AddOnDef>>,
    pub(crate) add_ons_discovered: bool,
    /// Declaration the definition was last updated from
    pub node: Option<Arc<DeclNode>>,
    /// Child definitions, in declaration order
    pub children: Vec<ElementId>,
    /// The definition changed in the current compile
    pub updated: bool,
    /// The last update failed; its diagnostics were already reported
    pub failed: bool,
}

impl DefCore {
    /// Core of a fresh definition for `node`
    pub fn new(
        id: ElementId,
        node: Arc<DeclNode>,
        parent: Option<ElementId>,
        models: ModelSetId,
    ) -> Self {
        Self {
            id,
            element_type: node.element_type.clone(),
            position: node.position,
            parent,
            models,
            local_models: None,
            add_ons: AddOnSet::default(),
            add_ons_discovered: false,
            node: Some(node),
            children: Vec::new(),
            updated: false,
            failed: false,
        }
    }

    /// Models for the element's own content
    pub fn content_models(&self) -> ModelSetId {
        self.local_models.unwrap_or(self.models)
    }

    /// Add-on of a concrete type
    pub fn add_on<T: AddOnDef>(&self, tag: CapabilityTag) -> Option<&T> {
        self.add_ons
            .get(tag)
            .and_then(|a| a.as_any().downcast_ref::<T>())
    }

    /// Name read by the `named` add-on
    pub fn name(&self) -> Option<&str> {
        self.add_on::<NamedAddOn>(CapabilityTag::NAMED)
            .and_then(|n| n.name())
    }

    /// Type read by the `typed` add-on
    pub fn declared_type(&self) -> Option<&ElementType> {
        self.add_on::<TypedAddOn>(CapabilityTag::TYPED)
            .and_then(|t| t.declared())
    }

    /// Name for messages
    pub fn describe(&self) -> String {
        match self.name() {
            Some(name) => format!("{} '{}'", self.element_type, name),
            None => self.element_type.clone(),
        }
    }
}

impl fmt::Debug for DefCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefCore")
            .field("id", &self.id)
            .field("element_type", &self.element_type)
            .field("position", &self.position)
            .field("add_ons", &self.add_ons.tags().collect::<Vec<_>>())
            .field("updated", &self.updated)
            .finish()
    }
}

/// Compiled form of one declared element
///
/// `do_update` must be idempotent: it runs at least once, and again whenever
/// the element is re-compiled from a changed declaration.
pub trait ElementDef: Any {
    /// State shared by every definition
    fn core(&self) -> &DefCore;
    /// Mutable core
    fn core_mut(&mut self) -> &mut DefCore;

    /// Update from the declaration; add-on hooks run around it
    fn do_update(&mut self, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()>;

    /// Runs after every add-on finished its own post-update
    fn post_update(&mut self, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        Ok(())
    }

    /// The interpretation for this definition, not yet updated
    fn interpret(&self, parent: Option<ElementId>) -> Box<dyn ElementInterpreted> {
        Box::new(ValueInterpreted::new(self.core(), parent))
    }

    /// Compiled model value, for elements producing one
    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        None
    }

    /// Operation, for elements inside a transform
    fn as_operation(&self) -> Option<&dyn OperationDef> {
        None
    }

    /// Mutable operation
    fn as_operation_mut(&mut self) -> Option<&mut dyn OperationDef> {
        None
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

impl dyn ElementDef {
    /// Model type once updated
    pub fn model_type(&self) -> Option<ModelType> {
        self.as_model_value().and_then(|v| v.model_type())
    }
}

enum DefSlot {
    Present(Box<dyn ElementDef>),
    /// Being updated; re-entrant requests see it as absent
    CheckedOut,
    Removed,
}

/// Arena of definitions plus the model sets they declare
pub struct Document {
    slots: Vec<DefSlot>,
    pub(crate) model_sets: ModelSets,
}

impl Document {
    /// Empty document
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            model_sets: ModelSets::new(),
        }
    }

    /// Every model set the document declares
    pub fn model_sets(&self) -> &ModelSets {
        &self.model_sets
    }

    /// Mutable model sets
    pub fn model_sets_mut(&mut self) -> &mut ModelSets {
        &mut self.model_sets
    }

    /// Allocate a slot and fill it with the definition built for its id
    pub fn alloc(&mut self, build: impl FnOnce(ElementId) -> Box<dyn ElementDef>) -> ElementId {
        let id = ElementId(self.slots.len() as u32);
        self.slots.push(DefSlot::CheckedOut);
        self.slots[id.0 as usize] = DefSlot::Present(build(id));
        id
    }

    /// Definition by id; `None` while it is checked out
    pub fn get(&self, id: ElementId) -> Option<&dyn ElementDef> {
        match self.slots.get(id.0 as usize) {
            Some(DefSlot::Present(def)) => Some(def.as_ref()),
            _ => None,
        }
    }

    /// Mutable definition by id
    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut (dyn ElementDef + 'static)> {
        match self.slots.get_mut(id.0 as usize) {
            Some(DefSlot::Present(def)) => Some(def.as_mut()),
            _ => None,
        }
    }

    /// Definition of a concrete type
    pub fn get_as<T: ElementDef>(&self, id: ElementId) -> Option<&T> {
        self.get(id).and_then(|d| d.as_any().downcast_ref::<T>())
    }

    /// Whether the definition is taken out for its own update
    pub fn is_checked_out(&self, id: ElementId) -> bool {
        matches!(self.slots.get(id.0 as usize), Some(DefSlot::CheckedOut))
    }

    pub(crate) fn take(&mut self, id: ElementId) -> Option<Box<dyn ElementDef>> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        match std::mem::replace(slot, DefSlot::CheckedOut) {
            DefSlot::Present(def) => Some(def),
            other => {
                *slot = other;
                None
            }
        }
    }

    pub(crate) fn restore(&mut self, id: ElementId, def: Box<dyn ElementDef>) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            *slot = DefSlot::Present(def);
        }
    }

    /// Drop a definition and its descendants
    pub fn remove(&mut self, id: ElementId) {
        let children = self
            .get(id)
            .map(|d| d.core().children.clone())
            .unwrap_or_default();
        for child in children {
            self.remove(child);
        }
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            *slot = DefSlot::Removed;
        }
    }

    /// Ids of every live definition
    pub fn ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, DefSlot::Present(_)))
            .map(|(i, _)| ElementId(i as u32))
    }

    /// Number of live definitions
    pub fn len(&self) -> usize {
        self.ids().count()
    }

    /// Whether the document has no definitions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("definitions", &self.len())
            .finish()
    }
}
