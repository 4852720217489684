//! The interpretation stage: type resolution over a compiled document

use rustc_hash::{FxHashMap, FxHashSet};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, trace};

use super::addon::{AddOnInterpreted, AddOnSet};
use super::instance::ElementInstantiator;
use super::{DefCore, Document, ElementDef, ElementId};
use crate::config::EngineConfig;
use crate::decl::{CapabilityTag, SourcePosition};
use crate::diagnostic::Diagnostics;
use crate::dynamic::DynamicRegistry;
use crate::error::{InstantiationResult, InterpretError, InterpretResult, WarningCode};
use crate::expr::CompiledExpression;
use crate::model::{
    ComponentId, ComponentKind, InstantiatorRef, InterpretedNode, InterpretedRef, ModelInstance,
    ModelLayout, ModelSetId, ModelSetInstantiator, ModelValue, Satisfier, ValueInstantiator,
};
use crate::toolkit::Toolkit;

/// State every interpretation carries
pub struct InterpretedCore {
    /// Id of the definition
    pub id: ElementId,
    /// Declared element type
    pub element_type: String,
    /// Name read by the `named` add-on, if any
    pub name: Option<String>,
    /// Where the element was declared
    pub position: SourcePosition,
    /// Enclosing interpretation
    pub parent: Option<ElementId>,
    /// Interpretations of the element's capabilities
    pub add_ons: AddOnSet<Box<dyn AddOnInterpreted>>,
}

impl InterpretedCore {
    /// Core copied from the definition, with no add-ons yet
    pub fn new(def: &DefCore, parent: Option<ElementId>) -> Self {
        Self {
            id: def.id,
            element_type: def.element_type.clone(),
            name: def.name().map(str::to_string),
            position: def.position,
            parent,
            add_ons: AddOnSet::default(),
        }
    }

    /// Tags of the interpreted add-ons
    pub fn add_on_tags(&self) -> Vec<CapabilityTag> {
        self.add_ons.tags().collect()
    }
}

/// Type-resolved form of one definition
pub trait ElementInterpreted: Send + Sync {
    /// State shared by every interpretation
    fn core(&self) -> &InterpretedCore;
    /// Mutable core
    fn core_mut(&mut self) -> &mut InterpretedCore;

    /// Resolve types; runs once per interpretation
    fn update(&mut self, env: &mut InterpretEnv<'_>) -> InterpretResult<()>;

    /// The model value the element produces, if any
    fn value(&self) -> Option<InterpretedRef> {
        None
    }

    /// Model set the element instantiates for its children
    fn models(&self) -> Option<Arc<ModelSetInstantiator>> {
        None
    }

    /// Child elements that get element instances of their own
    fn children(&self) -> Vec<ElementId> {
        Vec::new()
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Interpretation of any element producing a model value
pub struct ValueInterpreted {
    core: InterpretedCore,
    value: Option<InterpretedRef>,
}

impl ValueInterpreted {
    /// Interpretation with no value yet
    pub fn new(def: &DefCore, parent: Option<ElementId>) -> Self {
        Self {
            core: InterpretedCore::new(def, parent),
            value: None,
        }
    }

    /// The interpreted value, once resolved
    pub fn value(&self) -> Option<InterpretedRef> {
        self.value.clone()
    }
}

impl ElementInterpreted for ValueInterpreted {
    fn core(&self) -> &InterpretedCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InterpretedCore {
        &mut self.core
    }

    fn update(&mut self, env: &mut InterpretEnv<'_>) -> InterpretResult<()> {
        let document = env.document;
        let def = document
            .get(self.core.id)
            .ok_or_else(|| InterpretError::internal("definition removed", self.core.position))?;
        if let Some(compiled) = def.as_model_value() {
            self.value = Some(compiled.interpret_value(env)?);
        }
        Ok(())
    }

    fn value(&self) -> Option<InterpretedRef> {
        self.value.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reads a component from the model instance
pub struct ComponentInstantiator {
    component: ComponentId,
}

impl ComponentInstantiator {
    /// Instantiator reading `component`
    pub fn new(component: ComponentId) -> Self {
        Self { component }
    }

    /// Component the instantiator reads
    pub fn component(&self) -> ComponentId {
        self.component
    }
}

impl ValueInstantiator for ComponentInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        models.get(self.component)
    }

    /// Unbound in both scopes counts as equal
    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        match (source.get(self.component), target.get(self.component)) {
            (Ok(a), Ok(b)) => Ok(!a.ptr_eq(&b)),
            (Err(_), Err(_)) => Ok(false),
            _ => Ok(true),
        }
    }
}

enum Slot {
    Busy,
    Ready(Arc<dyn ElementInterpreted>),
    Failed,
}

/// Everything an interpretation can reach
pub struct InterpretEnv<'a> {
    /// Definitions being interpreted
    pub document: &'a Document,
    /// Element types and operator families
    pub toolkit: &'a Toolkit,
    /// Dynamic value rules
    pub registry: &'a DynamicRegistry,
    /// Engine settings
    pub config: &'a EngineConfig,
    /// Diagnostics reported while interpreting
    pub diagnostics: Diagnostics,
    interpretations: FxHashMap<ElementId, Slot>,
    component_values: FxHashMap<ComponentId, InterpretedRef>,
    references: FxHashMap<ComponentId, InterpretedRef>,
    resolving: FxHashSet<ComponentId>,
    set_instantiators: FxHashMap<ModelSetId, Arc<ModelSetInstantiator>>,
    element_instantiators: FxHashMap<ElementId, Arc<ElementInstantiator>>,
}

impl<'a> InterpretEnv<'a> {
    /// Environment over `document` with nothing interpreted
    pub fn new(
        document: &'a Document,
        toolkit: &'a Toolkit,
        registry: &'a DynamicRegistry,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            document,
            toolkit,
            registry,
            config,
            diagnostics: Diagnostics::new(config.warning_config()),
            interpretations: FxHashMap::default(),
            component_values: FxHashMap::default(),
            references: FxHashMap::default(),
            resolving: FxHashSet::default(),
            set_instantiators: FxHashMap::default(),
            element_instantiators: FxHashMap::default(),
        }
    }

    fn not_interpreted(core: &DefCore) -> InterpretError {
        InterpretError::NotInterpreted {
            element: core.describe(),
            position: core.position,
        }
    }

    /// Report an error unless it echoes one reported already
    pub fn report(&mut self, error: &InterpretError) {
        self.diagnostics.report_interpret(error);
    }

    /// Interpretation of a definition, created and updated on first request
    ///
    /// Errors are reported here; callers receive a cascade error that is not
    /// reported again.
    pub fn interpret_element(&mut self, id: ElementId) -> InterpretResult<Arc<dyn ElementInterpreted>> {
        let document = self.document;
        let def = document.get(id).ok_or_else(|| {
            InterpretError::internal(format!("no definition {}", id), SourcePosition::default())
        })?;
        let core = def.core();
        match self.interpretations.get(&id) {
            Some(Slot::Ready(interpreted)) => {
                trace!(id = %id, "interpretation cache hit");
                return Ok(interpreted.clone());
            }
            Some(Slot::Busy) => {
                return Err(InterpretError::CyclicReference {
                    name: core.describe(),
                    position: core.position,
                })
            }
            Some(Slot::Failed) => return Err(Self::not_interpreted(core)),
            None => {}
        }
        if core.failed {
            self.interpretations.insert(id, Slot::Failed);
            return Err(Self::not_interpreted(core));
        }

        self.interpretations.insert(id, Slot::Busy);
        debug!(element = %core.element_type, id = %id, "interpreting");
        match self.run_interpretation(def) {
            Ok(interpreted) => {
                let interpreted: Arc<dyn ElementInterpreted> = Arc::from(interpreted);
                self.interpretations
                    .insert(id, Slot::Ready(interpreted.clone()));
                Ok(interpreted)
            }
            Err(err) => {
                self.report(&err);
                self.interpretations.insert(id, Slot::Failed);
                Err(Self::not_interpreted(core))
            }
        }
    }

    fn run_interpretation(&mut self, def: &'a dyn ElementDef) -> InterpretResult<Box<dyn ElementInterpreted>> {
        let core = def.core();
        let mut interpreted = def.interpret(core.parent);
        for add_on in core.add_ons.iter() {
            let mut add_on = add_on.interpret();
            add_on.update(self)?;
            interpreted.core_mut().add_ons.push(add_on.tag(), add_on);
        }
        interpreted.update(self)?;
        Ok(interpreted)
    }

    /// The interpretation producing a component's value
    pub fn component_value(&mut self, id: ComponentId, position: SourcePosition) -> InterpretResult<InterpretedRef> {
        if let Some(value) = self.component_values.get(&id) {
            return Ok(value.clone());
        }
        let document = self.document;
        let sets = document.model_sets();
        let component = sets.component(id).ok_or_else(|| {
            InterpretError::internal(format!("unknown component {}", id), position)
        })?;
        let name = sets.path_of(id);

        let value: InterpretedRef = match component.kind {
            ComponentKind::Element(element) => self.element_value(element, &name, position)?,
            ComponentKind::SubModel(_) => return Err(InterpretError::NotAValue { name, position }),
            ComponentKind::Dynamic => {
                let state = sets.dynamic(id).ok_or_else(|| {
                    InterpretError::internal(format!("'{}' has no dynamic state", name), position)
                })?;
                match state.producer {
                    Some(Satisfier::Element(element)) => self.element_value(element, &name, position)?,
                    Some(Satisfier::Expression {
                        expr,
                        models,
                        position: at,
                    }) => {
                        if !self.resolving.insert(id) {
                            return Err(InterpretError::CyclicReference {
                                name: format!("'{}'", name),
                                position,
                            });
                        }
                        let result = CompiledExpression::new(expr, models, at).interpret(self);
                        self.resolving.remove(&id);
                        let value = result?;
                        if let Some(declared) = &state.declared {
                            if !value.value_type().is_assignable_to(declared) {
                                return Err(InterpretError::mismatch(declared, value.value_type(), at));
                            }
                        }
                        value
                    }
                    None => match state.effective_type() {
                        Some(ty) => {
                            InterpretedNode::of(ty.clone(), Arc::new(ComponentInstantiator::new(id)))
                        }
                        _ => return Err(InterpretError::Unsatisfied { name, position }),
                    },
                }
            }
        };
        self.component_values.insert(id, value.clone());
        Ok(value)
    }

    fn element_value(&mut self, element: ElementId, name: &str, position: SourcePosition) -> InterpretResult<InterpretedRef> {
        let interpreted = self.interpret_element(element)?;
        interpreted.value().ok_or_else(|| InterpretError::NotAValue {
            name: name.to_string(),
            position,
        })
    }

    /// A reference to a component: reads whatever the model instance binds
    ///
    /// All references to one component share one interpretation.
    pub fn reference(&mut self, id: ComponentId, position: SourcePosition) -> InterpretResult<InterpretedRef> {
        if let Some(reference) = self.references.get(&id) {
            return Ok(reference.clone());
        }
        let value = self.component_value(id, position)?;
        let reference: InterpretedRef =
            InterpretedNode::of(value.value_type().clone(), Arc::new(ComponentInstantiator::new(id)));
        self.references.insert(id, reference.clone());
        Ok(reference)
    }

    /// Instantiator of a model set, with sub-models flattened under dotted names
    pub fn model_set_instantiator(&mut self, set: ModelSetId) -> Arc<ModelSetInstantiator> {
        if let Some(instantiator) = self.set_instantiators.get(&set) {
            return instantiator.clone();
        }
        let path = self.document.model_sets().set(set).path.clone();
        let mut layout = ModelLayout::new(set, path);
        let mut entries = Vec::new();
        self.collect_components(set, "", &mut layout, &mut entries);
        let instantiator = Arc::new(ModelSetInstantiator::new(layout, entries));
        self.set_instantiators.insert(set, instantiator.clone());
        instantiator
    }

    fn collect_components(
        &mut self,
        set: ModelSetId,
        prefix: &str,
        layout: &mut ModelLayout,
        entries: &mut Vec<(ComponentId, InstantiatorRef)>,
    ) {
        let document = self.document;
        let sets = document.model_sets();
        for component in sets.set(set).components() {
            let name = format!("{}{}", prefix, component.name);
            match component.kind {
                ComponentKind::SubModel(sub) => {
                    self.collect_components(sub, &format!("{}.", name), layout, entries);
                }
                ComponentKind::Dynamic => {
                    let state = sets.dynamic(component.id);
                    let has_producer = state.as_ref().is_some_and(|s| s.producer.is_some());
                    if has_producer {
                        layout.add_component(name, component.id);
                        match self.component_value(component.id, component.position) {
                            Ok(value) => entries.push((component.id, value.instantiate())),
                            Err(err) => self.report(&err),
                        }
                    } else {
                        let hollow = state.as_ref().is_some_and(|s| s.hollow);
                        let ty = state.as_ref().and_then(|s| s.effective_type().cloned());
                        if hollow {
                            self.diagnostics.warn(
                                WarningCode::UnsatisfiedDynamicValue,
                                format!("'{}' must be satisfied by each model instance", name),
                                component.position,
                            );
                        }
                        layout.add_dynamic(name, component.id, ty, hollow);
                    }
                }
                ComponentKind::Element(_) => {
                    layout.add_component(name, component.id);
                    match self.component_value(component.id, component.position) {
                        Ok(value) => entries.push((component.id, value.instantiate())),
                        Err(err) => self.report(&err),
                    }
                }
            }
        }
    }

    /// Element instantiator for a definition and its element children
    pub fn element_instantiator(&mut self, id: ElementId) -> InterpretResult<Arc<ElementInstantiator>> {
        if let Some(instantiator) = self.element_instantiators.get(&id) {
            return Ok(instantiator.clone());
        }
        let interpreted = self.interpret_element(id)?;
        let document = self.document;
        let def = document
            .get(id)
            .ok_or_else(|| InterpretError::internal("definition removed", interpreted.core().position))?;
        let component = def.core().name().and_then(|name| {
            document
                .model_sets()
                .lookup(def.core().models, name)
                .filter(|c| c.kind == ComponentKind::Element(id))
                .map(|c| c.id)
        });
        let mut children = Vec::new();
        for child in interpreted.children() {
            match self.element_instantiator(child) {
                Ok(instantiator) => children.push(instantiator),
                Err(err) => self.report(&err),
            }
        }
        let add_ons = interpreted
            .core()
            .add_ons
            .iter()
            .map(|a| a.instantiate())
            .collect();
        let instantiator = Arc::new(ElementInstantiator::new(
            id,
            interpreted.core().element_type.clone(),
            add_ons,
            interpreted.models(),
            component,
            children,
        ));
        self.element_instantiators.insert(id, instantiator.clone());
        Ok(instantiator)
    }
}
