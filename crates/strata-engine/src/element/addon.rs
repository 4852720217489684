//! Add-ons: capability mixins attached to definitions
//!
//! Each capability tag of an element type (its own, then its supertype's) gets
//! one add-on. Add-ons run hooks around the owner's update and follow it
//! through interpretation and instantiation; element instances keep one add-on
//! instance per tag.

use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::{DefCore, InterpretEnv, UpdateSession};
use crate::decl::{CapabilityTag, DeclNode};
use crate::error::{CompileError, CompileResult, InstantiationResult, InterpretResult, WarningCode};
use crate::model::{DynamicState, ModelInstance, ModelSetId, Satisfier};
use crate::types::{parse_element_type, parse_model_type, ElementType};

/// Ordered add-ons with lookup by tag
pub struct AddOnSet<T> {
    items: Vec<(CapabilityTag, T)>,
    index: FxHashMap<CapabilityTag, usize>,
}

impl<T> AddOnSet<T> {
    /// Empty set
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Add an entry; an existing entry with the same tag is replaced in place
    pub fn push(&mut self, tag: CapabilityTag, item: T) {
        match self.index.get(&tag) {
            Some(&i) => self.items[i].1 = item,
            None => {
                self.index.insert(tag, self.items.len());
                self.items.push((tag, item));
            }
        }
    }

    /// Entry registered under `tag`
    pub fn get(&self, tag: CapabilityTag) -> Option<&T> {
        self.index.get(&tag).map(|&i| &self.items[i].1)
    }

    /// Mutable entry registered under `tag`
    pub fn get_mut(&mut self, tag: CapabilityTag) -> Option<&mut T> {
        match self.index.get(&tag) {
            Some(&i) => Some(&mut self.items[i].1),
            None => None,
        }
    }

    /// Whether an entry is registered under `tag`
    pub fn contains(&self, tag: CapabilityTag) -> bool {
        self.index.contains_key(&tag)
    }

    /// Tags in insertion order
    pub fn tags(&self) -> impl Iterator<Item = CapabilityTag> + '_ {
        self.items.iter().map(|(tag, _)| *tag)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, item)| item)
    }

    /// Mutable entries in insertion order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut().map(|(_, item)| item)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set has no entries
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for AddOnSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Lifecycle traits
// ============================================================================

/// Definition side of an add-on
pub trait AddOnDef: Any {
    /// Capability the add-on implements
    fn tag(&self) -> CapabilityTag;

    /// Before the add-on `update` hooks; may change the owner's core
    fn pre_update(
        &mut self,
        _core: &mut DefCore,
        _node: &DeclNode,
        _session: &mut UpdateSession<'_>,
    ) -> CompileResult<()> {
        Ok(())
    }

    /// Before the owner's own update
    fn update(&mut self, _core: &DefCore, _node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        Ok(())
    }

    /// After the owner's own update
    fn post_update(&mut self, _core: &DefCore, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        Ok(())
    }

    /// Interpretation of the add-on, not yet updated
    fn interpret(&self) -> Box<dyn AddOnInterpreted>;

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Interpretation side of an add-on
pub trait AddOnInterpreted: Send + Sync {
    /// Capability the add-on implements
    fn tag(&self) -> CapabilityTag;

    /// Resolve types; runs before the owner's own update
    fn update(&mut self, _env: &mut InterpretEnv<'_>) -> InterpretResult<()> {
        Ok(())
    }

    /// Instantiator producing the add-on's instances
    fn instantiate(&self) -> Arc<dyn AddOnInstantiator>;
}

/// Produces add-on instances
pub trait AddOnInstantiator: Send + Sync {
    /// Tag of the instances this produces
    fn tag(&self) -> CapabilityTag;

    /// Add-on state for a new element instance
    fn create(&self, models: &ModelInstance) -> InstantiationResult<Arc<dyn AddOnInstance>>;
}

/// Runtime add-on state of an element instance
pub trait AddOnInstance: Send + Sync + fmt::Debug {
    /// Capability the add-on implements
    fn tag(&self) -> CapabilityTag;

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Add-on interpretation that carries no state of its own
struct StatelessInterpreted<F> {
    tag: CapabilityTag,
    make: F,
}

impl<F> AddOnInterpreted for StatelessInterpreted<F>
where
    F: Fn() -> Arc<dyn AddOnInstantiator> + Send + Sync,
{
    fn tag(&self) -> CapabilityTag {
        self.tag
    }

    fn instantiate(&self) -> Arc<dyn AddOnInstantiator> {
        (self.make)()
    }
}

/// Instantiator cloning one fixed instance value into every element instance
struct FixedInstantiator<I> {
    tag: CapabilityTag,
    template: I,
}

impl<I> AddOnInstantiator for FixedInstantiator<I>
where
    I: AddOnInstance + Clone + 'static,
{
    fn tag(&self) -> CapabilityTag {
        self.tag
    }

    fn create(&self, _models: &ModelInstance) -> InstantiationResult<Arc<dyn AddOnInstance>> {
        Ok(Arc::new(self.template.clone()))
    }
}

fn fixed<I>(tag: CapabilityTag, template: I) -> Box<dyn AddOnInterpreted>
where
    I: AddOnInstance + Clone + 'static,
{
    let instantiator: Arc<dyn AddOnInstantiator> = Arc::new(FixedInstantiator { tag, template });
    Box::new(StatelessInterpreted {
        tag,
        make: move || instantiator.clone(),
    })
}

// ============================================================================
// named
// ============================================================================

/// Whether `name` can name a model component
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Reads and validates the `name` attribute
#[derive(Debug, Default)]
pub struct NamedAddOn {
    name: Option<String>,
}

impl NamedAddOn {
    /// The validated name, once updated
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Name of an element instance
#[derive(Debug, Clone)]
pub struct NamedInstance {
    /// Declared name
    pub name: String,
}

impl AddOnInstance for NamedInstance {
    fn tag(&self) -> CapabilityTag {
        CapabilityTag::NAMED
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AddOnDef for NamedAddOn {
    fn tag(&self) -> CapabilityTag {
        CapabilityTag::NAMED
    }

    fn pre_update(&mut self, _core: &mut DefCore, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.name = None;
        if let Some(name) = node.text_attr("name")? {
            if !is_valid_name(name) {
                return Err(CompileError::InvalidName {
                    name: name.to_string(),
                    position: node.position,
                });
            }
            self.name = Some(name.to_string());
        }
        Ok(())
    }

    fn interpret(&self) -> Box<dyn AddOnInterpreted> {
        fixed(
            CapabilityTag::NAMED,
            NamedInstance {
                name: self.name.clone().unwrap_or_default(),
            },
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// typed
// ============================================================================

/// Reads the `type` attribute
#[derive(Debug, Default)]
pub struct TypedAddOn {
    declared: Option<ElementType>,
}

impl TypedAddOn {
    /// The parsed type, if one was declared
    pub fn declared(&self) -> Option<&ElementType> {
        self.declared.as_ref()
    }
}

/// Declared type of an element instance
#[derive(Debug, Clone)]
pub struct TypedInstance {
    /// Parsed `type` attribute
    pub declared: Option<ElementType>,
}

impl AddOnInstance for TypedInstance {
    fn tag(&self) -> CapabilityTag {
        CapabilityTag::TYPED
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AddOnDef for TypedAddOn {
    fn tag(&self) -> CapabilityTag {
        CapabilityTag::TYPED
    }

    fn pre_update(&mut self, _core: &mut DefCore, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.declared = match node.text_attr("type")? {
            Some(spec) => Some(parse_element_type(spec).map_err(|message| CompileError::InvalidType {
                spec: spec.to_string(),
                message,
                position: node.position,
            })?),
            None => None,
        };
        Ok(())
    }

    fn interpret(&self) -> Box<dyn AddOnInterpreted> {
        fixed(
            CapabilityTag::TYPED,
            TypedInstance {
                declared: self.declared.clone(),
            },
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// with-element-model
// ============================================================================

/// Gives its owner a local model set holding the owner type's dynamic values
#[derive(Debug, Default)]
pub struct ElementModelAddOn {
    set: Option<ModelSetId>,
    slots: Vec<String>,
}

impl ElementModelAddOn {
    /// The local model set, once created
    pub fn set(&self) -> Option<ModelSetId> {
        self.set
    }

    /// Names of the declared dynamic values
    pub fn slots(&self) -> &[String] {
        &self.slots
    }
}

/// Names of the element-local dynamic values of an instance
#[derive(Debug, Clone)]
pub struct ElementModelInstance {
    /// Slot names in declaration order
    pub slots: Vec<String>,
}

impl AddOnInstance for ElementModelInstance {
    fn tag(&self) -> CapabilityTag {
        CapabilityTag::WITH_ELEMENT_MODEL
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AddOnDef for ElementModelAddOn {
    fn tag(&self) -> CapabilityTag {
        CapabilityTag::WITH_ELEMENT_MODEL
    }

    fn pre_update(&mut self, core: &mut DefCore, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        let declarations = session
            .registry
            .declarations(session.toolkit.schema(), &core.element_type)
            .map_err(|source| CompileError::Dynamic {
                source,
                position: node.position,
            })?;

        let path = session.document.model_sets().set(core.models).path.clone();
        let sets = session.document.model_sets_mut();
        let set = sets.ensure_owned_set(core.id, core.models, &path);
        sets.clear(set);
        self.slots.clear();

        for identity in declarations.values() {
            let decl = &identity.decl;
            let name = decl.resolve_name(node)?;
            let declared = match &decl.type_spec {
                Some(spec) => Some(parse_model_type(spec).map_err(|message| CompileError::InvalidType {
                    spec: spec.clone(),
                    message,
                    position: node.position,
                })?),
                None => None,
            };
            let mut state = DynamicState::new(name.clone(), declared);
            if let Some(expr) = decl.source_attribute.as_deref().and_then(|a| node.expr_attr(a)) {
                state.producer = Some(Satisfier::Expression {
                    expr,
                    models: core.models,
                    position: node.position,
                });
            }
            let sets = session.document.model_sets_mut();
            sets.declare_dynamic(set, node.position, state)?;
            if sets.shadows(set, &name).is_some() {
                session.diagnostics.warn(
                    WarningCode::ShadowedName,
                    format!("'{}' hides a value of the same name in the enclosing models", name),
                    node.position,
                );
            }
            self.slots.push(name);
        }

        self.set = Some(set);
        core.local_models = Some(set);
        Ok(())
    }

    fn interpret(&self) -> Box<dyn AddOnInterpreted> {
        fixed(
            CapabilityTag::WITH_ELEMENT_MODEL,
            ElementModelInstance {
                slots: self.slots.clone(),
            },
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_on_set_keeps_order_and_replaces_by_tag() {
        let mut set = AddOnSet::new();
        set.push(CapabilityTag::TYPED, 1);
        set.push(CapabilityTag::NAMED, 2);
        set.push(CapabilityTag::TYPED, 3);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(CapabilityTag::TYPED), Some(&3));
        assert_eq!(
            set.tags().collect::<Vec<_>>(),
            vec![CapabilityTag::TYPED, CapabilityTag::NAMED]
        );
        assert!(!set.contains(CapabilityTag::WITH_ELEMENT_MODEL));
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("total"));
        assert!(is_valid_name("_x1"));
        assert!(is_valid_name("max-size"));
        assert!(!is_valid_name("1x"));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name(""));
    }
}
