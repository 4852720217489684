//! `map-to` and its reverse
//!
//! A mapping evaluates its `map` expression once per source element, with
//! the element bound as `source` (renamed with `source-as`) in the mapping's
//! own models. `combine-with` children add further named values to those
//! models. A `replace-source` or `modify-source` child makes the mapping
//! writable: the written target is bound as `target` (renamed with
//! `target-as`) in the reverse's models, which sit inside the mapping's.

use parking_lot::Mutex;
use std::sync::Arc;
use strata_reactive::{
    ActionRef, CollectStrategy, CollectionFlow, Datum, ElementReverse, FlowStage, MapFn, MappedEvent,
    MappedValue, ReactiveResult, SettableRef, SettableValue, ValueReverse,
};
use tracing::trace;

use super::chain::{EfficientCopy, FlowLink, OperationInstantiator, OperationRef};
use super::scope::{satisfy_slot, Evaluator, OpScope};
use super::{target_model, Family, OperationDef, OperationInterpreted};
use crate::decl::{AttributeKind, CapabilityTag, DeclNode, DynamicValueDecl, ElementSpec, SourcePosition};
use crate::element::{
    update_element, DefCore, ElementDef, ElementId, ElementModelAddOn, InterpretEnv, UpdateSession,
    ValueInterpreted,
};
use crate::error::{
    CompileError, CompileResult, InstantiationError, InstantiationResult, InterpretError, InterpretResult,
};
use crate::expr::CompiledExpression;
use crate::model::{DynamicState, InstantiatorRef, InterpretedRef, ModelInstance, ModelSetId, ModelValue, Satisfier};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{ModelInstanceType, ModelType};
use crate::values::{def_core, expect_model, expression, expression_text, interpret_value_expr};

/// Abstract type of the reverse children of `map-to`
const REVERSE: &str = "source-reverse";

pub(super) fn register(toolkit: &mut Toolkit) {
    toolkit.register(
        ElementSpec::new("map-to")
            .extends("operation")
            .attribute("source-as", AttributeKind::Name)
            .required("map", AttributeKind::Expression)
            .attribute("null-to-null", AttributeKind::Bool)
            .attribute("cache", AttributeKind::Bool)
            .capability(CapabilityTag::TYPED)
            .capability(CapabilityTag::WITH_ELEMENT_MODEL)
            .dynamic_value(DynamicValueDecl::new("source").named_by("source-as").typed("Value<?>"))
            .child("combine-with", 0, None)
            .child(REVERSE, 0, Some(1)),
        Some(|core| Box::new(MapToDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register(
        ElementSpec::new("combine-with")
            .required("name", AttributeKind::Name)
            .required("value", AttributeKind::Expression),
        None,
    );
    toolkit.register_trace(
        TraceTable::builder::<MapToDef, ValueInterpreted>("map-to")
            .typed()
            .attribute("source-as", |d| slot_of(&d.core), |_| None)
            .attribute("map", |d| expression_text(&d.map), |_| None)
            .attribute("null-to-null", |d| Some(d.null_to_null.to_string()), |_| None)
            .attribute("cache", |d| Some(d.cache.to_string()), |_| None)
            .child(REVERSE, |d| d.reverse.into_iter().collect(), |_| Vec::new())
            .build(),
    );

    toolkit.register(
        ElementSpec::abstract_type(REVERSE)
            .attribute("target-as", AttributeKind::Name)
            .attribute("stateful", AttributeKind::Bool)
            .attribute("enabled", AttributeKind::Expression)
            .attribute("accept", AttributeKind::Expression)
            .attribute("add", AttributeKind::Expression)
            .attribute("add-accept", AttributeKind::Expression)
            .capability(CapabilityTag::WITH_ELEMENT_MODEL)
            .dynamic_value(DynamicValueDecl::new("target").named_by("target-as").typed("Value<?>")),
        None,
    );
    toolkit.register(
        ElementSpec::new("replace-source")
            .extends(REVERSE)
            .required("replace", AttributeKind::Expression)
            .attribute("inexact", AttributeKind::Bool),
        Some(|core| Box::new(ReverseDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register(
        ElementSpec::new("modify-source")
            .extends(REVERSE)
            .required("modify", AttributeKind::Expression),
        Some(|core| Box::new(ReverseDef::new(core)) as Box<dyn ElementDef>),
    );
    for name in ["replace-source", "modify-source"] {
        toolkit.register_trace(
            TraceTable::builder::<ReverseDef, ValueInterpreted>(name)
                .attribute("target-as", |d| slot_of(&d.core), |_| None)
                .attribute("stateful", |d| Some(d.stateful.to_string()), |_| None)
                .attribute("enabled", |d| expression_text(&d.enabled), |_| None)
                .attribute("accept", |d| expression_text(&d.accept), |_| None)
                .attribute("add", |d| expression_text(&d.add), |_| None)
                .attribute("add-accept", |d| expression_text(&d.add_accept), |_| None)
                .attribute(
                    "replace",
                    |d| match &d.kind {
                        Some(ReverseKind::Replace { replace, .. }) => Some(replace.to_string()),
                        _ => None,
                    },
                    |_| None,
                )
                .attribute(
                    "inexact",
                    |d| match &d.kind {
                        Some(ReverseKind::Replace { inexact, .. }) => Some(inexact.to_string()),
                        _ => None,
                    },
                    |_| None,
                )
                .attribute(
                    "modify",
                    |d| match &d.kind {
                        Some(ReverseKind::Modify { modify }) => Some(modify.to_string()),
                        _ => None,
                    },
                    |_| None,
                )
                .build(),
        );
    }
}

/// Resolved name of the single element-local value of a definition
fn slot_of(core: &DefCore) -> Option<String> {
    core.add_on::<ElementModelAddOn>(CapabilityTag::WITH_ELEMENT_MODEL)
        .and_then(|add_on| add_on.slots().first().cloned())
}

// ============================================================================
// Definitions
// ============================================================================

/// How a reverse pushes a target back
#[derive(Debug, Clone)]
pub enum ReverseKind {
    /// Compute the new source from the target
    Replace { replace: CompiledExpression, inexact: bool },
    /// Run an action with the target bound
    Modify { modify: CompiledExpression },
}

/// `replace-source` or `modify-source`
pub struct ReverseDef {
    core: DefCore,
    kind: Option<ReverseKind>,
    stateful: bool,
    enabled: Option<CompiledExpression>,
    accept: Option<CompiledExpression>,
    add: Option<CompiledExpression>,
    add_accept: Option<CompiledExpression>,
}

impl ReverseDef {
    /// Definition with no reverse kind yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            kind: None,
            stateful: false,
            enabled: None,
            accept: None,
            add: None,
            add_accept: None,
        }
    }

    /// Kind of reverse, once updated
    pub fn kind(&self) -> Option<&ReverseKind> {
        self.kind.as_ref()
    }
}

impl ElementDef for ReverseDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        let models = self.core.content_models();
        let required = |name: &str| -> CompileResult<CompiledExpression> {
            Ok(CompiledExpression::new(node.required_expr(name)?, models, node.position))
        };
        self.kind = Some(match self.core.element_type.as_str() {
            "replace-source" => ReverseKind::Replace {
                replace: required("replace")?,
                inexact: node.bool_attr("inexact", false)?,
            },
            _ => ReverseKind::Modify {
                modify: required("modify")?,
            },
        });
        self.stateful = node.bool_attr("stateful", false)?;
        self.enabled = expression(node, "enabled", models);
        self.accept = expression(node, "accept", models);
        self.add = expression(node, "add", models);
        self.add_accept = expression(node, "add-accept", models);
        Ok(())
    }
}

/// `map-to`
pub struct MapToDef {
    core: DefCore,
    source_model: Option<ModelType>,
    family: Option<Family>,
    map: Option<CompiledExpression>,
    null_to_null: bool,
    cache: bool,
    reverse: Option<ElementId>,
}

impl MapToDef {
    /// Definition with no map expression yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            source_model: None,
            family: None,
            map: None,
            null_to_null: false,
            cache: false,
            reverse: None,
        }
    }

    /// Declare each `combine-with` child as a value of the local models,
    /// produced by its expression in the enclosing ones
    fn declare_combined(&self, set: ModelSetId, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        for child in node.children_with_role("combine-with") {
            let name = child.required_text("name")?;
            let mut state = DynamicState::new(name, None);
            state.producer = Some(Satisfier::Expression {
                expr: child.required_expr("value")?,
                models: self.core.models,
                position: child.position,
            });
            session
                .document
                .model_sets_mut()
                .declare_dynamic(set, child.position, state)?;
        }
        Ok(())
    }
}

impl ElementDef for MapToDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.map = None;
        let model = self.source_model.ok_or_else(|| {
            CompileError::internal("operation updated outside a transform", node.position)
        })?;
        self.family = Some(Family::of(model).ok_or_else(|| CompileError::NoTransformForModelType {
            model_type: model.to_string(),
            position: node.position,
        })?);
        let set = self
            .core
            .local_models
            .ok_or_else(|| CompileError::internal("map-to without an element model", node.position))?;

        self.declare_combined(set, node, session)?;
        self.null_to_null = node.bool_attr("null-to-null", false)?;
        self.cache = node.bool_attr("cache", false)?;

        let schema = session.toolkit.schema();
        let reverse_node = node
            .children
            .iter()
            .find(|child| schema.is_subtype(&child.element_type, REVERSE))
            .cloned()
            .map(Arc::new);
        let previous = self.reverse.take();
        match reverse_node {
            Some(reverse_node) => {
                let id = session.reuse_or_create(previous, Some(self.core.id), set, &reverse_node)?;
                update_element(session, id, &reverse_node);
                self.reverse = Some(id);
            }
            None => {
                if let Some(stale) = previous {
                    session.document.remove(stale);
                }
            }
        }
        self.core.children = self.reverse.into_iter().collect();

        self.map = Some(CompiledExpression::new(node.required_expr("map")?, set, node.position));
        Ok(())
    }

    fn as_operation(&self) -> Option<&dyn OperationDef> {
        Some(self)
    }

    fn as_operation_mut(&mut self) -> Option<&mut dyn OperationDef> {
        Some(self)
    }
}

impl OperationDef for MapToDef {
    fn family(&self) -> Option<Family> {
        self.family
    }

    fn set_source_model(&mut self, model: ModelType) {
        self.source_model = Some(model);
    }

    fn target_model_type(&self) -> Option<ModelType> {
        self.map.as_ref()?;
        self.source_model.map(|model| target_model("map-to", model))
    }

    fn interpret_op(&self) -> Box<dyn OperationInterpreted> {
        Box::new(MapInterpreted {
            def: self.core.id,
            family: self.family,
            map: self.map.clone(),
            local: self.core.local_models,
            slot: slot_of(&self.core).unwrap_or_else(|| "source".to_string()),
            null_to_null: self.null_to_null,
            cache: self.cache,
            reverse: self.reverse,
            position: self.core.position,
            interpreted: None,
        })
    }
}

// ============================================================================
// Interpretation
// ============================================================================

struct MapInterpreted {
    def: ElementId,
    family: Option<Family>,
    map: Option<CompiledExpression>,
    local: Option<ModelSetId>,
    slot: String,
    null_to_null: bool,
    cache: bool,
    reverse: Option<ElementId>,
    position: SourcePosition,
    interpreted: Option<Interpreted>,
}

struct Interpreted {
    scope: OpScope,
    map: InterpretedRef,
    reverse: Option<ReverseInterpreted>,
}

struct ReverseInterpreted {
    scope: OpScope,
    replace: Option<(InterpretedRef, bool)>,
    modify: Option<InterpretedRef>,
    stateful: bool,
    enabled: Option<InterpretedRef>,
    accept: Option<InterpretedRef>,
    add: Option<InterpretedRef>,
    add_accept: Option<InterpretedRef>,
}

impl MapInterpreted {
    fn interpret_reverse(
        &self,
        id: ElementId,
        source: &ModelInstanceType,
        target: &ModelInstanceType,
        env: &mut InterpretEnv<'_>,
    ) -> InterpretResult<ReverseInterpreted> {
        let document = env.document;
        let def = document
            .get_as::<ReverseDef>(id)
            .ok_or_else(|| InterpretError::internal("reverse removed", self.position))?;
        let position = def.core.position;
        let kind = match (&def.kind, def.core.failed) {
            (Some(kind), false) => kind,
            _ => {
                return Err(InterpretError::NotInterpreted {
                    element: def.core.describe(),
                    position,
                })
            }
        };
        if self.family == Some(Family::Event) {
            return Err(InterpretError::UnsupportedReverse {
                message: "events cannot be written back".to_string(),
                position,
            });
        }
        let set = def
            .core
            .local_models
            .ok_or_else(|| InterpretError::internal("reverse without an element model", position))?;
        let name = slot_of(&def.core).unwrap_or_else(|| "target".to_string());
        let slot = satisfy_slot(env, set, &name, target.clone(), position)?;

        let (mut replace, mut modify) = (None, None);
        match kind {
            ReverseKind::Replace { replace: expr, inexact } => {
                let value = expr.interpret(env)?;
                let expected = ModelInstanceType::value(source.element().clone());
                if !value.value_type().is_assignable_to(&expected) {
                    return Err(InterpretError::mismatch(expected, value.value_type(), expr.position()));
                }
                replace = Some((value, *inexact));
            }
            ReverseKind::Modify { modify: expr } => {
                let action = expr.interpret(env)?;
                expect_model(&action, ModelType::Action, expr.position())?;
                modify = Some(action);
            }
        }
        let reverse = ReverseInterpreted {
            replace,
            modify,
            stateful: def.stateful,
            enabled: interpret_value_expr(&def.enabled, env)?,
            accept: interpret_value_expr(&def.accept, env)?,
            add: interpret_value_expr(&def.add, env)?,
            add_accept: interpret_value_expr(&def.add_accept, env)?,
            scope: OpScope::new(env, set, vec![slot]),
        };
        Ok(reverse)
    }
}

impl OperationInterpreted for MapInterpreted {
    fn update(&mut self, source: &ModelInstanceType, env: &mut InterpretEnv<'_>) -> InterpretResult<ModelInstanceType> {
        let (Some(family), Some(map), Some(set)) = (self.family, self.map.clone(), self.local) else {
            return Err(InterpretError::internal("map-to was not compiled", self.position));
        };
        let element = ModelInstanceType::value(source.element().clone());
        let slot = satisfy_slot(env, set, &self.slot, element.clone(), self.position)?;
        let value = map.interpret(env)?;
        expect_model(&value, ModelType::Value, map.position())?;
        let mapped = value.value_type().element().clone();

        let declared = env
            .document
            .get(self.def)
            .and_then(|def| def.core().declared_type().cloned());
        if let Some(declared) = declared {
            if !mapped.is_assignable_to(&declared) {
                return Err(InterpretError::mismatch(&declared, &mapped, self.position));
            }
        }

        let reverse = match self.reverse {
            Some(id) => Some(self.interpret_reverse(id, &element, &ModelInstanceType::value(mapped.clone()), env)?),
            None => None,
        };
        self.interpreted = Some(Interpreted {
            scope: OpScope::new(env, set, vec![slot]),
            map: value,
            reverse,
        });

        let model = target_model("map-to", source.model);
        Ok(match family {
            Family::Event => ModelInstanceType::event(mapped),
            Family::Value => ModelInstanceType::value(mapped),
            _ => ModelInstanceType::collection(model, mapped),
        })
    }

    fn passive(&self) -> Option<bool> {
        match self.family? {
            Family::Collection => Some(true),
            _ => None,
        }
    }

    fn operator(&self) -> &'static str {
        "map-to"
    }

    fn instantiate(&self) -> OperationRef {
        let interpreted = self.interpreted.as_ref();
        Arc::new(MapInstantiator {
            family: self.family.unwrap_or(Family::Value),
            null_to_null: self.null_to_null,
            cache: self.cache,
            scope: interpreted.map(|i| i.scope.clone()),
            map: interpreted.map(|i| i.map.instantiate()),
            reverse: interpreted.and_then(|i| i.reverse.as_ref()).map(|r| ReverseInstantiator {
                scope: r.scope.clone(),
                replace: r.replace.as_ref().map(|(v, inexact)| (v.instantiate(), *inexact)),
                modify: r.modify.as_ref().map(|m| m.instantiate()),
                stateful: r.stateful,
                enabled: r.enabled.as_ref().map(|e| e.instantiate()),
                accept: r.accept.as_ref().map(|e| e.instantiate()),
                add: r.add.as_ref().map(|e| e.instantiate()),
                add_accept: r.add_accept.as_ref().map(|e| e.instantiate()),
            }),
        })
    }
}

// ============================================================================
// Runtime
// ============================================================================

struct ReverseInstantiator {
    scope: OpScope,
    replace: Option<(InstantiatorRef, bool)>,
    modify: Option<InstantiatorRef>,
    stateful: bool,
    enabled: Option<InstantiatorRef>,
    accept: Option<InstantiatorRef>,
    add: Option<InstantiatorRef>,
    add_accept: Option<InstantiatorRef>,
}

impl ReverseInstantiator {
    fn live(&self, map: &Scope, map_fn: MapFn) -> InstantiationResult<ExprReverse> {
        let scope = self.scope.create(&map.instance)?;
        let value = |i: &Option<InstantiatorRef>| -> InstantiationResult<Option<SettableRef>> {
            i.as_ref().map(|i| i.get(&scope.instance)?.into_value()).transpose()
        };
        let kind = match (&self.replace, &self.modify) {
            (Some((replace, inexact)), _) => LiveReverse::Replace {
                value: replace.get(&scope.instance)?.into_value()?,
                inexact: *inexact,
            },
            (None, Some(modify)) => LiveReverse::Modify(modify.get(&scope.instance)?.into_action()?),
            (None, None) => return Err(InstantiationError::Internal("reverse without an operation".to_string())),
        };
        Ok(ExprReverse {
            evaluator: map.evaluator.extend(&scope.slots),
            map: map_fn,
            stateful: self.stateful,
            kind,
            enabled: value(&self.enabled)?,
            accept: value(&self.accept)?,
            add: value(&self.add)?,
            add_accept: value(&self.add_accept)?,
        })
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        if self.scope.is_different(source, target)? {
            return Ok(true);
        }
        let parts = self
            .replace
            .iter()
            .map(|(replace, _)| replace)
            .chain(&self.modify)
            .chain(&self.enabled)
            .chain(&self.accept)
            .chain(&self.add)
            .chain(&self.add_accept);
        for part in parts {
            if part.is_different(source, target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Mapping scope of one model instance
struct Scope {
    instance: ModelInstance,
    evaluator: Evaluator,
    result: SettableRef,
    combined: Vec<SettableRef>,
}

struct MapInstantiator {
    family: Family,
    null_to_null: bool,
    cache: bool,
    scope: Option<OpScope>,
    map: Option<InstantiatorRef>,
    reverse: Option<ReverseInstantiator>,
}

impl MapInstantiator {
    fn scope(&self, models: &ModelInstance) -> InstantiationResult<Scope> {
        let (Some(scope), Some(map)) = (&self.scope, &self.map) else {
            return Err(InstantiationError::Internal("map-to was not interpreted".to_string()));
        };
        let created = scope.create(models)?;
        let result = map.get(&created.instance)?.into_value()?;
        let combined = created.values_of(scope.extras())?;
        Ok(Scope {
            evaluator: created.evaluator(),
            instance: created.instance,
            result,
            combined,
        })
    }

    fn map_fn(&self, scope: &Scope) -> MapFn {
        let evaluator = scope.evaluator.clone();
        let result = scope.result.clone();
        let combined = scope.combined.clone();
        let null_to_null = self.null_to_null;
        let cache = self.cache.then(|| Mutex::new(None::<(Vec<Datum>, Datum)>));
        Arc::new(move |input: &Datum| {
            if null_to_null && input.is_null() {
                return Datum::Null;
            }
            let Some(cache) = &cache else {
                return evaluator.eval(std::slice::from_ref(input), &result);
            };
            let key: Vec<Datum> = std::iter::once(input.clone())
                .chain(combined.iter().map(|c| c.get()))
                .collect();
            let mut last = cache.lock();
            if let Some((cached_key, cached)) = last.as_ref() {
                if *cached_key == key {
                    trace!("mapping served from cache");
                    return cached.clone();
                }
            }
            let mapped = evaluator.eval(std::slice::from_ref(input), &result);
            *last = Some((key, mapped.clone()));
            mapped
        })
    }

    /// Forward mapping and live reverse for one model instance
    fn live(&self, models: &ModelInstance) -> InstantiationResult<(Scope, MapFn, Option<Arc<ExprReverse>>)> {
        let scope = self.scope(models)?;
        let map = self.map_fn(&scope);
        let reverse = match &self.reverse {
            Some(reverse) => Some(Arc::new(reverse.live(&scope, map.clone())?)),
            None => None,
        };
        Ok((scope, map, reverse))
    }
}

impl OperationInstantiator for MapInstantiator {
    fn transform(&self, source: ModelValue, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        Ok(match self.family {
            Family::Collection => {
                let stage = self.stage(models)?;
                let mut flow = CollectionFlow::new(source.into_collection()?);
                if let Some(stage) = stage {
                    flow = flow.then(stage);
                }
                ModelValue::Collection(flow.collect(CollectStrategy::Auto, models.lifespan())?)
            }
            Family::Event => {
                let (_, map, _) = self.live(models)?;
                ModelValue::Event(Arc::new(MappedEvent::new(source.into_event()?, map)))
            }
            _ => {
                let (scope, map, reverse) = self.live(models)?;
                let reverse = reverse.map(|r| r as Arc<dyn ValueReverse>);
                ModelValue::Value(Arc::new(
                    MappedValue::new(source.into_value()?, map, reverse).with_inputs(scope.combined),
                ))
            }
        })
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        if let Some(scope) = &self.scope {
            if scope.is_different(source, target)? {
                return Ok(true);
            }
        }
        if let Some(map) = &self.map {
            if map.is_different(source, target)? {
                return Ok(true);
            }
        }
        match &self.reverse {
            Some(reverse) => reverse.is_different(source, target),
            None => Ok(false),
        }
    }

    fn as_efficient_copy(&self) -> Option<&dyn EfficientCopy> {
        match self.family {
            Family::Collection => None,
            _ => Some(self),
        }
    }

    fn as_flow(&self) -> Option<&dyn FlowLink> {
        match self.family {
            Family::Collection => Some(self),
            _ => None,
        }
    }
}

impl EfficientCopy for MapInstantiator {}

impl FlowLink for MapInstantiator {
    fn stage(&self, models: &ModelInstance) -> InstantiationResult<Option<FlowStage>> {
        let (_, map, reverse) = self.live(models)?;
        Ok(Some(FlowStage::Map {
            map,
            reverse: reverse.map(|r| r as Arc<dyn ElementReverse>),
        }))
    }
}

// ============================================================================
// Live reverse
// ============================================================================

enum LiveReverse {
    Replace { value: SettableRef, inexact: bool },
    Modify(ActionRef),
}

/// Reverse evaluated against a mapping scope; inputs are bound as
/// `[source, target]`
struct ExprReverse {
    evaluator: Evaluator,
    map: MapFn,
    stateful: bool,
    kind: LiveReverse,
    enabled: Option<SettableRef>,
    accept: Option<SettableRef>,
    add: Option<SettableRef>,
    add_accept: Option<SettableRef>,
}

impl ExprReverse {
    fn inputs(&self, current: Option<&Datum>, target: &Datum) -> [Datum; 2] {
        let source = match current {
            Some(current) if self.stateful => current.clone(),
            _ => Datum::Null,
        };
        [source, target.clone()]
    }

    fn check_enabled(&self, current: Option<&Datum>) -> Option<String> {
        if let LiveReverse::Modify(action) = &self.kind {
            if let Some(message) = action.is_enabled() {
                return Some(message);
            }
        }
        let enabled = self.enabled.as_ref()?;
        self.evaluator
            .check(&self.inputs(current, &Datum::Null), enabled, "Reverse is disabled")
    }

    fn check_accept(&self, current: Option<&Datum>, target: &Datum) -> Option<String> {
        let inputs = self.inputs(current, target);
        if let Some(accept) = &self.accept {
            if let Some(message) = self.evaluator.check(&inputs, accept, "Value is not acceptable") {
                return Some(message);
            }
        }
        match &self.kind {
            LiveReverse::Replace { value, inexact: false } => {
                let source = self.evaluator.eval(&inputs, value);
                let round_trip = (self.map)(&source);
                (round_trip != *target).then(|| format!("{} cannot be reversed exactly", target))
            }
            _ => None,
        }
    }

    /// New source element, or `None` when the action changed the source itself
    fn replace(&self, current: Option<&Datum>, target: &Datum) -> ReactiveResult<Option<Datum>> {
        let inputs = self.inputs(current, target);
        match &self.kind {
            LiveReverse::Replace { value, .. } => Ok(Some(self.evaluator.eval(&inputs, value))),
            LiveReverse::Modify(action) => self.evaluator.run(&inputs, action).map(|_| None),
        }
    }
}

impl ValueReverse for ExprReverse {
    fn enabled(&self, source: &dyn SettableValue) -> Option<String> {
        if let LiveReverse::Replace { .. } = self.kind {
            if let Some(message) = source.is_enabled() {
                return Some(message);
            }
        }
        self.check_enabled(Some(&source.get()))
    }

    fn accept(&self, source: &dyn SettableValue, target: &Datum) -> Option<String> {
        let current = source.get();
        ValueReverse::enabled(self, source).or_else(|| self.check_accept(Some(&current), target))
    }

    fn apply(&self, source: &dyn SettableValue, target: Datum) -> ReactiveResult<()> {
        match self.replace(Some(&source.get()), &target)? {
            Some(new_source) => source.set(new_source).map(|_| ()),
            None => Ok(()),
        }
    }
}

impl ElementReverse for ExprReverse {
    fn enabled(&self) -> Option<String> {
        self.check_enabled(None)
    }

    fn accept(&self, target: &Datum) -> Option<String> {
        self.check_enabled(None).or_else(|| self.check_accept(None, target))
    }

    fn reverse(&self, target: &Datum, current: &Datum) -> ReactiveResult<Option<Datum>> {
        self.replace(Some(current), target)
    }

    fn can_add(&self, target: &Datum) -> Option<String> {
        if self.add.is_none() && matches!(self.kind, LiveReverse::Modify(_)) {
            return Some("Adding is not supported".to_string());
        }
        let add_accept = self.add_accept.as_ref()?;
        self.evaluator
            .check(&self.inputs(None, target), add_accept, "Value cannot be added")
    }

    fn add(&self, target: &Datum) -> ReactiveResult<Option<Datum>> {
        match &self.add {
            Some(add) => Ok(Some(self.evaluator.eval(&self.inputs(None, target), add))),
            None => self.replace(None, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_reactive::{ComputeFn, DerivedValue, FnAction, SimpleValue};

    /// Reverse of `x * 2` with `target / 2`, over fresh slots
    fn halving(stateful: bool, inexact: bool) -> (ExprReverse, Arc<SimpleValue>) {
        let (source, target) = (
            Arc::new(SimpleValue::new(Datum::Null)),
            Arc::new(SimpleValue::new(Datum::Null)),
        );
        let evaluator = Evaluator::new(vec![source.clone(), target.clone()]);
        let halve: ComputeFn = Arc::new(|d: &[Datum]| match d[0] {
            Datum::Int(i) => Datum::Int(i / 2),
            _ => Datum::Null,
        });
        let map: MapFn = Arc::new(|d: &Datum| match d {
            Datum::Int(i) => Datum::Int(i * 2),
            _ => Datum::Null,
        });
        let reverse = ExprReverse {
            evaluator,
            map,
            stateful,
            kind: LiveReverse::Replace {
                value: Arc::new(DerivedValue::new(vec![target.clone() as SettableRef], halve)),
                inexact,
            },
            enabled: None,
            accept: None,
            add: None,
            add_accept: None,
        };
        (reverse, source)
    }

    // ── Replace ─────────────────────────────────────────────────────────

    #[test]
    fn test_replace_writes_reversed_source() {
        let (reverse, _) = halving(false, false);
        let source = SimpleValue::new(Datum::Int(5));
        assert!(ValueReverse::accept(&reverse, &source, &Datum::Int(20)).is_none());
        reverse.apply(&source, Datum::Int(20)).unwrap();
        assert_eq!(source.get(), Datum::Int(10));
    }

    #[test]
    fn test_replace_checks_round_trip() {
        let (exact, _) = halving(false, false);
        assert!(exact.check_accept(None, &Datum::Int(21)).is_some());
        let (inexact, _) = halving(false, true);
        assert!(inexact.check_accept(None, &Datum::Int(21)).is_none());
    }

    #[test]
    fn test_stateful_binds_current_source() {
        let (stateless, slot) = halving(false, true);
        stateless.replace(Some(&Datum::Int(7)), &Datum::Int(4)).unwrap();
        assert_eq!(slot.get(), Datum::Null);
        let (stateful, slot) = halving(true, true);
        stateful.replace(Some(&Datum::Int(7)), &Datum::Int(4)).unwrap();
        assert_eq!(slot.get(), Datum::Int(7));
    }

    #[test]
    fn test_element_add_falls_back_to_replace() {
        let (reverse, _) = halving(false, false);
        assert!(reverse.can_add(&Datum::Int(8)).is_none());
        assert_eq!(reverse.add(&Datum::Int(8)).unwrap(), Some(Datum::Int(4)));
    }

    // ── Modify ──────────────────────────────────────────────────────────

    #[test]
    fn test_modify_runs_action() {
        let (mut reverse, _) = halving(false, false);
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = runs.clone();
        reverse.kind = LiveReverse::Modify(Arc::new(FnAction::new(Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }))));
        assert_eq!(reverse.reverse(&Datum::Int(2), &Datum::Int(1)).unwrap(), None);
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(reverse.can_add(&Datum::Int(2)).is_some());
    }

    // ── Filters ─────────────────────────────────────────────────────────

    #[test]
    fn test_enabled_filter_message() {
        let (mut reverse, _) = halving(false, false);
        reverse.enabled = Some(Arc::new(SimpleValue::new(Datum::text("Locked"))));
        assert_eq!(ElementReverse::enabled(&reverse), Some("Locked".to_string()));
        assert_eq!(
            ElementReverse::accept(&reverse, &Datum::Int(20)),
            Some("Locked".to_string())
        );
    }
}
