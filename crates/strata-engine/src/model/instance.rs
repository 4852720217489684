//! Model instances: runtime scopes binding component ids to live values
//!
//! An instance is built in two phases. While building, values may be bound and
//! pending producers are resolved on first read. `build()` forces every pending
//! value and seals the instance; after that bindings are read-only. Child
//! scopes created with `wrap` fall back to their parent for components they do
//! not own.

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_reactive::Lifespan;
use tracing::trace;

use super::{ComponentId, InstantiatorRef, ModelSetId, ModelValue};
use crate::error::{InstantiationError, InstantiationResult};
use crate::types::ModelInstanceType;

/// Names and slots of one model instance
#[derive(Debug, Clone)]
pub struct ModelLayout {
    /// Model set the layout was built from
    pub set: ModelSetId,
    /// Dotted path of the set, for messages
    pub path: String,
    names: IndexMap<String, ComponentId>,
    dynamic: FxHashMap<ComponentId, (String, Option<ModelInstanceType>)>,
    hollow: FxHashSet<ComponentId>,
}

impl ModelLayout {
    /// Layout with no components
    pub fn new(set: ModelSetId, path: impl Into<String>) -> Self {
        Self {
            set,
            path: path.into(),
            names: IndexMap::new(),
            dynamic: FxHashMap::default(),
            hollow: FxHashSet::default(),
        }
    }

    /// Add a component produced by the set's instantiators
    pub fn add_component(&mut self, name: impl Into<String>, id: ComponentId) {
        self.names.insert(name.into(), id);
    }

    /// Add a slot whose value is supplied per instance
    pub fn add_dynamic(
        &mut self,
        name: impl Into<String>,
        id: ComponentId,
        ty: Option<ModelInstanceType>,
        hollow: bool,
    ) {
        let name = name.into();
        self.names.insert(name.clone(), id);
        self.dynamic.insert(id, (name, ty));
        if hollow {
            self.hollow.insert(id);
        }
    }

    /// Component declared under `name`
    pub fn id_of(&self, name: &str) -> Option<ComponentId> {
        self.names.get(name).copied()
    }

    /// Whether the component belongs to this layout
    pub fn owns(&self, id: ComponentId) -> bool {
        self.names.values().any(|c| *c == id)
    }

    /// Name the component is declared under
    pub fn name_of(&self, id: ComponentId) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, c)| **c == id)
            .map(|(name, _)| name.as_str())
    }

    /// Every component name, in declaration order
    pub fn names(&self) -> impl Iterator<Item = (&str, ComponentId)> {
        self.names.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Slot name and declared type of a dynamic component
    pub fn dynamic_slot(&self, id: ComponentId) -> Option<(&str, Option<&ModelInstanceType>)> {
        self.dynamic
            .get(&id)
            .map(|(name, ty)| (name.as_str(), ty.as_ref()))
    }

    /// Whether the slot waits for an outer layer to satisfy it
    pub fn is_hollow(&self, id: ComponentId) -> bool {
        self.hollow.contains(&id)
    }

    /// Hollow slots of the layout
    pub fn hollows(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.hollow.iter().copied()
    }
}

enum Pending {
    Instantiate(InstantiatorRef),
    Copy {
        instantiator: InstantiatorRef,
        value: ModelValue,
        source: ModelInstance,
    },
}

struct InstanceInner {
    parent: Option<ModelInstance>,
    layout: Arc<ModelLayout>,
    values: RwLock<FxHashMap<ComponentId, ModelValue>>,
    pending: Mutex<FxHashMap<ComponentId, Pending>>,
    resolving: Mutex<FxHashSet<ComponentId>>,
    sealed: AtomicBool,
    lifespan: Lifespan,
}

/// Runtime scope
#[derive(Clone)]
pub struct ModelInstance {
    inner: Arc<InstanceInner>,
}

impl ModelInstance {
    /// Empty, unsealed instance
    pub fn new(layout: Arc<ModelLayout>, parent: Option<&ModelInstance>, lifespan: Lifespan) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                parent: parent.cloned(),
                layout,
                values: RwLock::new(FxHashMap::default()),
                pending: Mutex::new(FxHashMap::default()),
                resolving: Mutex::new(FxHashSet::default()),
                sealed: AtomicBool::new(false),
                lifespan,
            }),
        }
    }

    /// Child scope with its own layout, ending with this instance
    pub fn wrap(&self, layout: Arc<ModelLayout>) -> ModelInstance {
        ModelInstance::new(layout, Some(self), self.inner.lifespan.child())
    }

    /// Names and slots of the instance
    pub fn layout(&self) -> &Arc<ModelLayout> {
        &self.inner.layout
    }

    /// Enclosing instance names fall back to
    pub fn parent(&self) -> Option<&ModelInstance> {
        self.inner.parent.as_ref()
    }

    /// Lifespan the instance's values live in
    pub fn lifespan(&self) -> &Lifespan {
        &self.inner.lifespan
    }

    /// Whether values can no longer be bound
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same instance
    pub fn ptr_eq(&self, other: &ModelInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn defer(&self, id: ComponentId, instantiator: InstantiatorRef) {
        self.inner
            .pending
            .lock()
            .insert(id, Pending::Instantiate(instantiator));
    }

    pub(crate) fn defer_copy(
        &self,
        id: ComponentId,
        instantiator: InstantiatorRef,
        value: ModelValue,
        source: ModelInstance,
    ) {
        self.inner.pending.lock().insert(
            id,
            Pending::Copy {
                instantiator,
                value,
                source,
            },
        );
    }

    /// Bind a value directly
    pub fn bind(&self, id: ComponentId, value: ModelValue) -> InstantiationResult<()> {
        if self.is_sealed() {
            return Err(InstantiationError::Sealed);
        }
        self.inner.values.write().insert(id, value);
        Ok(())
    }

    /// Value bound in this instance itself, without resolving pending producers
    pub fn bound_value(&self, id: ComponentId) -> Option<ModelValue> {
        self.inner.values.read().get(&id).cloned()
    }

    /// Whether this instance has a producer waiting for `id`
    pub fn has_pending(&self, id: ComponentId) -> bool {
        self.inner.pending.lock().contains_key(&id)
    }

    fn component_name(&self, id: ComponentId) -> String {
        self.inner
            .layout
            .name_of(id)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    /// Value of a component, looking outward through parent scopes
    pub fn get(&self, id: ComponentId) -> InstantiationResult<ModelValue> {
        if let Some(value) = self.inner.values.read().get(&id) {
            return Ok(value.clone());
        }

        let pending = self.inner.pending.lock().remove(&id);
        if let Some(pending) = pending {
            self.inner.resolving.lock().insert(id);
            let result = match &pending {
                Pending::Instantiate(instantiator) => instantiator.get(self),
                Pending::Copy {
                    instantiator,
                    value,
                    source,
                } => instantiator.for_model_copy(value, source, self),
            };
            self.inner.resolving.lock().remove(&id);
            return match result {
                Ok(value) => {
                    trace!(component = %id, "resolved pending value");
                    self.inner.values.write().insert(id, value.clone());
                    Ok(value)
                }
                Err(err) => {
                    self.inner.pending.lock().insert(id, pending);
                    Err(err)
                }
            };
        }

        if self.inner.layout.owns(id) {
            let name = self.component_name(id);
            if self.inner.resolving.lock().contains(&id) {
                return Err(InstantiationError::Cycle { name });
            }
            if self.inner.layout.dynamic_slot(id).is_some() {
                return Err(InstantiationError::Unsatisfied { name });
            }
            return Err(InstantiationError::Unbound { name });
        }

        match &self.inner.parent {
            Some(parent) => parent.get(id),
            None => Err(InstantiationError::Unbound {
                name: id.to_string(),
            }),
        }
    }

    /// Value of a named component of this instance or an enclosing one
    pub fn get_by_name(&self, name: &str) -> InstantiationResult<ModelValue> {
        match self.inner.layout.id_of(name) {
            Some(id) => self.get(id),
            None => match &self.inner.parent {
                Some(parent) => parent.get_by_name(name),
                None => Err(InstantiationError::Unbound {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// Resolve every pending producer, then seal
    pub fn build(&self) -> InstantiationResult<()> {
        loop {
            let next = self.inner.pending.lock().keys().next().copied();
            match next {
                Some(id) => {
                    self.get(id)?;
                }
                None => break,
            }
        }
        self.inner.sealed.store(true, Ordering::Release);
        Ok(())
    }

    /// Seal without forcing pending producers
    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance")
            .field("path", &self.inner.layout.path)
            .field("bound", &self.inner.values.read().len())
            .field("pending", &self.inner.pending.lock().len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// Produces model instances for one model set
///
/// Sub-models are flattened into the same instance; their components appear
/// under dotted names.
pub struct ModelSetInstantiator {
    layout: Arc<ModelLayout>,
    entries: Vec<(ComponentId, InstantiatorRef)>,
}

impl ModelSetInstantiator {
    /// Instantiator for `layout` producing each entry's value
    pub fn new(layout: ModelLayout, entries: Vec<(ComponentId, InstantiatorRef)>) -> Self {
        Self {
            layout: Arc::new(layout),
            entries,
        }
    }

    /// Layout shared by every instance
    pub fn layout(&self) -> &Arc<ModelLayout> {
        &self.layout
    }

    /// Instantiator of one component
    pub fn instantiator(&self, id: ComponentId) -> Option<&InstantiatorRef> {
        self.entries.iter().find(|(c, _)| *c == id).map(|(_, i)| i)
    }

    /// A fresh, unsealed instance; satisfy hollow values, then `build()` it
    pub fn create(&self, parent: Option<&ModelInstance>, lifespan: Lifespan) -> ModelInstance {
        let instance = ModelInstance::new(self.layout.clone(), parent, lifespan);
        for (id, instantiator) in &self.entries {
            instance.defer(*id, instantiator.clone());
        }
        instance
    }

    /// An unsealed instance re-deriving the values of `source`
    ///
    /// Each value is produced with `for_model_copy`, so values that would not
    /// differ keep their identity.
    pub fn copy(
        &self,
        source: &ModelInstance,
        parent: Option<&ModelInstance>,
        lifespan: Lifespan,
    ) -> InstantiationResult<ModelInstance> {
        let instance = ModelInstance::new(self.layout.clone(), parent, lifespan);
        for (id, instantiator) in &self.entries {
            let value = source.get(*id)?;
            instance.defer_copy(*id, instantiator.clone(), value, source.clone());
        }
        Ok(instance)
    }
}

impl fmt::Debug for ModelSetInstantiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSetInstantiator")
            .field("layout", &self.layout)
            .field("entries", &self.entries.len())
            .finish()
    }
}
