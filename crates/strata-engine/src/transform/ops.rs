//! Operators other than `map-to`
//!
//! One definition type covers them all; the element type selects the
//! [`Operator`]. Operators evaluated per element (`filter`, `filter-accept`,
//! `sort`, `refresh-each`, `reduce`) evaluate their expression in an
//! element-local model holding the element as `source` (renamed with
//! `source-as`). `reduce` also binds the running result as `temp` (renamed
//! with `temp-as`).

use std::cmp::Ordering;
use std::sync::Arc;
use strata_reactive::{
    AcceptFilteredValue, AcceptFn, CollectStrategy, CollectionFlow, CollectionRef, CompareFn, Datum,
    DisabledAction, DisabledValue, EventRef, FilteredEvent, FilteredValue, FlattenedValue,
    FlowStage, NoInitEvent, PredicateFn, ReduceFn, ReducedValue, RefreshFn, RefreshingValue,
    SettableRef, SizeValue, SkipEvent, TakeEvent, TakeUntilEvent, UnmodifiableValue,
};

use super::chain::{EfficientCopy, FlowLink, OperationInstantiator, OperationRef};
use super::scope::{satisfy_slot, OpScope};
use super::{target_model, Family, OperationDef, OperationInterpreted};
use crate::decl::{AttributeKind, CapabilityTag, DeclNode, DynamicValueDecl, ElementSpec, SourcePosition};
use crate::element::{DefCore, ElementDef, ElementModelAddOn, InterpretEnv, UpdateSession, ValueInterpreted};
use crate::error::{
    CompileError, CompileResult, InstantiationError, InstantiationResult, InterpretError, InterpretResult,
};
use crate::expr::CompiledExpression;
use crate::model::{InstantiatorRef, InterpretedRef, ModelInstance, ModelSetId, ModelValue};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{ElementType, ModelInstanceType, ModelType};
use crate::values::{def_core, enablement, expect_model};

/// Operators evaluated per element
const SCOPED: [&str; 5] = ["filter", "filter-accept", "sort", "refresh-each", "reduce"];

/// Operators without attributes
const PLAIN: [&str; 6] = ["unmodifiable", "flatten", "reverse", "distinct", "size", "no-init"];

/// Attributes of each operator, for registration and traceability
const ATTRIBUTES: [(&str, &[(&str, AttributeKind, bool)]); 11] = [
    ("filter", &[("test", AttributeKind::Expression, true)]),
    ("filter-accept", &[("test", AttributeKind::Expression, true)]),
    (
        "sort",
        &[
            ("by", AttributeKind::Expression, false),
            ("descending", AttributeKind::Bool, false),
        ],
    ),
    ("disable", &[("with", AttributeKind::Expression, true)]),
    ("refresh", &[("on", AttributeKind::Expression, true)]),
    ("collect", &[("active", AttributeKind::Bool, false)]),
    ("skip", &[("times", AttributeKind::Int, true)]),
    ("refresh-each", &[("on", AttributeKind::Expression, true)]),
    (
        "where-contained",
        &[
            ("filter", AttributeKind::Expression, true),
            ("inclusive", AttributeKind::Bool, false),
        ],
    ),
    ("take-until", &[("until", AttributeKind::Expression, true)]),
    (
        "reduce",
        &[
            ("seed", AttributeKind::Expression, true),
            ("combine", AttributeKind::Expression, true),
        ],
    ),
];

pub(super) fn register(toolkit: &mut Toolkit) {
    let mut specs: Vec<(&str, Vec<(&str, AttributeKind, bool)>)> = ATTRIBUTES
        .iter()
        .map(|(name, attributes)| (*name, attributes.to_vec()))
        .collect();
    specs.push(("take", vec![("times", AttributeKind::Int, true)]));
    specs.extend(PLAIN.iter().map(|name| (*name, Vec::new())));

    for (name, attributes) in specs {
        let mut spec = ElementSpec::new(name).extends("operation");
        let mut table = TraceTable::builder::<OperatorDef, ValueInterpreted>(name);
        for (attribute, kind, required) in attributes {
            spec = if required {
                spec.required(attribute, kind)
            } else {
                spec.attribute(attribute, kind)
            };
            table = table.attribute(attribute, move |d| d.attribute_text(attribute), |_| None);
        }
        if SCOPED.contains(&name) {
            spec = spec
                .attribute("source-as", AttributeKind::Name)
                .capability(CapabilityTag::WITH_ELEMENT_MODEL)
                .dynamic_value(DynamicValueDecl::new("source").named_by("source-as").typed("Value<?>"));
            table = table.attribute("source-as", |d| d.slot_names().first().cloned(), |_| None);
        }
        if name == "reduce" {
            spec = spec
                .attribute("temp-as", AttributeKind::Name)
                .dynamic_value(DynamicValueDecl::new("temp").named_by("temp-as").typed("Value<?>"));
            table = table.attribute("temp-as", |d| d.slot_names().get(1).cloned(), |_| None);
        }
        toolkit.register(spec, Some(|core| Box::new(OperatorDef::new(core)) as Box<dyn ElementDef>));
        toolkit.register_trace(table.value(|d| d.target_text(), |_| None).build());
    }
}

// ============================================================================
// Definition
// ============================================================================

/// What an operator does, as declared
#[derive(Debug, Clone)]
pub enum Operator {
    /// Keep values passing `test`
    Filter { test: CompiledExpression },
    /// Reject writes failing `test`
    FilterAccept { test: CompiledExpression },
    /// Disable writes with the message from `with`
    Disable { with: CompiledExpression },
    /// Re-read the source when `on` fires
    Refresh { on: CompiledExpression },
    /// Reject all writes
    Unmodifiable,
    /// Value of the inner value
    Flatten,
    /// Order elements, optionally by a comparison expression
    Sort { by: Option<CompiledExpression>, descending: bool },
    /// Reverse element order
    Reverse,
    /// Drop repeated elements
    Distinct,
    /// Element count as a value
    Size,
    /// Materialize the flow; `None` keeps the configured default
    Collect { active: Option<bool> },
    /// Drop the first events
    Skip(usize),
    /// Keep only the first events
    Take(usize),
    /// Re-check each element when its `on` event fires
    RefreshEach { on: CompiledExpression },
    /// Keep elements by membership in `filter`
    WhereContained { filter: CompiledExpression, inclusive: bool },
    /// Stop forwarding once `until` fires
    TakeUntil { until: CompiledExpression },
    /// Drop events fired while subscribing
    NoInit,
    /// Fold elements into a value, starting from `seed`
    Reduce { seed: CompiledExpression, combine: CompiledExpression },
}

impl Operator {
    /// `models` holds the operator's content, `outer` the models around it
    fn parse(element_type: &str, node: &DeclNode, models: ModelSetId, outer: ModelSetId) -> CompileResult<Operator> {
        let expr = |name: &str| -> CompileResult<CompiledExpression> {
            Ok(CompiledExpression::new(node.required_expr(name)?, models, node.position))
        };
        let times = || -> CompileResult<usize> {
            match node.attribute("times") {
                Some(_) => node.count_attr("times", 0),
                None => Err(CompileError::MissingAttribute {
                    element: element_type.to_string(),
                    attribute: "times".to_string(),
                    position: node.position,
                }),
            }
        };
        Ok(match element_type {
            "filter" => Operator::Filter { test: expr("test")? },
            "filter-accept" => Operator::FilterAccept { test: expr("test")? },
            "disable" => Operator::Disable { with: expr("with")? },
            "refresh" => Operator::Refresh { on: expr("on")? },
            "unmodifiable" => Operator::Unmodifiable,
            "flatten" => Operator::Flatten,
            "sort" => Operator::Sort {
                by: node
                    .expr_attr("by")
                    .map(|by| CompiledExpression::new(by, models, node.position)),
                descending: node.bool_attr("descending", false)?,
            },
            "reverse" => Operator::Reverse,
            "distinct" => Operator::Distinct,
            "size" => Operator::Size,
            "collect" => Operator::Collect {
                active: match node.attribute("active") {
                    Some(_) => Some(node.bool_attr("active", false)?),
                    None => None,
                },
            },
            "skip" => Operator::Skip(times()?),
            "take" => Operator::Take(times()?),
            "refresh-each" => Operator::RefreshEach { on: expr("on")? },
            "where-contained" => Operator::WhereContained {
                filter: expr("filter")?,
                inclusive: node.bool_attr("inclusive", true)?,
            },
            "take-until" => Operator::TakeUntil { until: expr("until")? },
            "no-init" => Operator::NoInit,
            "reduce" => Operator::Reduce {
                seed: CompiledExpression::new(node.required_expr("seed")?, outer, node.position),
                combine: expr("combine")?,
            },
            other => {
                return Err(CompileError::internal(
                    format!("'{}' is not an operator", other),
                    node.position,
                ))
            }
        })
    }

    /// Element type the operator is declared with
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Filter { .. } => "filter",
            Operator::FilterAccept { .. } => "filter-accept",
            Operator::Disable { .. } => "disable",
            Operator::Refresh { .. } => "refresh",
            Operator::Unmodifiable => "unmodifiable",
            Operator::Flatten => "flatten",
            Operator::Sort { .. } => "sort",
            Operator::Reverse => "reverse",
            Operator::Distinct => "distinct",
            Operator::Size => "size",
            Operator::Collect { .. } => "collect",
            Operator::Skip(_) => "skip",
            Operator::Take(_) => "take",
            Operator::RefreshEach { .. } => "refresh-each",
            Operator::WhereContained { .. } => "where-contained",
            Operator::TakeUntil { .. } => "take-until",
            Operator::NoInit => "no-init",
            Operator::Reduce { .. } => "reduce",
        }
    }

    /// The per-element expression, if any
    fn scoped_expr(&self) -> Option<&CompiledExpression> {
        match self {
            Operator::Filter { test } | Operator::FilterAccept { test } => Some(test),
            Operator::Sort { by, .. } => by.as_ref(),
            Operator::RefreshEach { on } => Some(on),
            Operator::Reduce { combine, .. } => Some(combine),
            _ => None,
        }
    }

    /// The expression evaluated in the enclosing models, if any
    fn outer_expr(&self) -> Option<&CompiledExpression> {
        match self {
            Operator::Disable { with } => Some(with),
            Operator::Refresh { on } => Some(on),
            Operator::WhereContained { filter, .. } => Some(filter),
            Operator::TakeUntil { until } => Some(until),
            _ => None,
        }
    }

    /// Model type the outer expression must produce
    fn outer_model(&self) -> ModelType {
        match self {
            Operator::Refresh { .. } | Operator::TakeUntil { .. } => ModelType::Event,
            Operator::WhereContained { .. } => ModelType::Collection,
            _ => ModelType::Value,
        }
    }

    /// Default names of the element-local values
    fn default_slots(&self) -> Vec<String> {
        match self {
            Operator::Reduce { .. } => vec!["source".to_string(), "temp".to_string()],
            _ => vec!["source".to_string()],
        }
    }
}

/// Definition of any operator but `map-to`
pub struct OperatorDef {
    core: DefCore,
    source_model: Option<ModelType>,
    family: Option<Family>,
    operator: Option<Operator>,
}

impl OperatorDef {
    /// Definition with no operator yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            source_model: None,
            family: None,
            operator: None,
        }
    }

    /// The parsed operator, once updated
    pub fn operator(&self) -> Option<&Operator> {
        self.operator.as_ref()
    }

    fn attribute_text(&self, attribute: &str) -> Option<String> {
        match (self.operator.as_ref()?, attribute) {
            (Operator::Filter { test } | Operator::FilterAccept { test }, "test") => Some(test.to_string()),
            (Operator::Disable { with }, "with") => Some(with.to_string()),
            (Operator::Refresh { on }, "on") => Some(on.to_string()),
            (Operator::Sort { by, .. }, "by") => by.as_ref().map(|b| b.to_string()),
            (Operator::Sort { descending, .. }, "descending") => Some(descending.to_string()),
            (Operator::Collect { active }, "active") => active.map(|a| a.to_string()),
            (Operator::Skip(n) | Operator::Take(n), "times") => Some(n.to_string()),
            (Operator::RefreshEach { on }, "on") => Some(on.to_string()),
            (Operator::WhereContained { filter, .. }, "filter") => Some(filter.to_string()),
            (Operator::WhereContained { inclusive, .. }, "inclusive") => Some(inclusive.to_string()),
            (Operator::TakeUntil { until }, "until") => Some(until.to_string()),
            (Operator::Reduce { seed, .. }, "seed") => Some(seed.to_string()),
            (Operator::Reduce { combine, .. }, "combine") => Some(combine.to_string()),
            _ => None,
        }
    }

    /// Resolved names of the element-local values, `source` first
    fn slot_names(&self) -> Vec<String> {
        self.core
            .add_on::<ElementModelAddOn>(CapabilityTag::WITH_ELEMENT_MODEL)
            .map(|add_on| add_on.slots().to_vec())
            .unwrap_or_default()
    }

    fn target_text(&self) -> Option<String> {
        self.target_model_type().map(|t| t.to_string())
    }
}

impl ElementDef for OperatorDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.operator = None;
        let model = self.source_model.ok_or_else(|| {
            CompileError::internal("operation updated outside a transform", node.position)
        })?;
        self.family = Some(Family::of(model).ok_or_else(|| CompileError::NoTransformForModelType {
            model_type: model.to_string(),
            position: node.position,
        })?);
        self.operator = Some(Operator::parse(
            &self.core.element_type,
            node,
            self.core.content_models(),
            self.core.models,
        )?);
        Ok(())
    }

    fn as_operation(&self) -> Option<&dyn OperationDef> {
        Some(self)
    }

    fn as_operation_mut(&mut self) -> Option<&mut dyn OperationDef> {
        Some(self)
    }
}

impl OperationDef for OperatorDef {
    fn family(&self) -> Option<Family> {
        self.family
    }

    fn set_source_model(&mut self, model: ModelType) {
        self.source_model = Some(model);
    }

    fn target_model_type(&self) -> Option<ModelType> {
        let operator = self.operator.as_ref()?;
        self.source_model.map(|model| target_model(operator.name(), model))
    }

    fn interpret_op(&self) -> Box<dyn OperationInterpreted> {
        let mut slots = self.slot_names();
        if slots.is_empty() {
            slots = self.operator.as_ref().map(Operator::default_slots).unwrap_or_default();
        }
        Box::new(OperatorInterpreted {
            operator: self.operator.clone(),
            family: self.family,
            local: self.core.local_models,
            slots,
            position: self.core.position,
            scope: None,
            expr: None,
            seed: None,
        })
    }
}

// ============================================================================
// Interpretation
// ============================================================================

struct OperatorInterpreted {
    operator: Option<Operator>,
    family: Option<Family>,
    local: Option<ModelSetId>,
    slots: Vec<String>,
    position: SourcePosition,
    scope: Option<OpScope>,
    expr: Option<InterpretedRef>,
    /// Starting value of a reduction
    seed: Option<InterpretedRef>,
}

/// Type of a flattened element: the content type of the nested value
fn flattened(element: &ElementType, family: Family, position: SourcePosition) -> InterpretResult<ElementType> {
    match element {
        ElementType::Model(inner) if inner.model == ModelType::Value => Ok(inner.element().clone()),
        ElementType::Model(inner) if family == Family::Collection && inner.model.is_collection() => {
            Ok(inner.element().clone())
        }
        open if open.is_open() => Ok(ElementType::Any),
        other => Err(InterpretError::TypeMismatch {
            expected: "a nested value".to_string(),
            actual: other.to_string(),
            position,
        }),
    }
}

impl OperatorInterpreted {
    /// Interpret the per-element expression with each slot typed as a value
    /// of the matching element type
    fn interpret_scoped(
        &mut self,
        expr: &CompiledExpression,
        slot_types: &[ElementType],
        expected: ModelType,
        env: &mut InterpretEnv<'_>,
    ) -> InterpretResult<InterpretedRef> {
        let set = self
            .local
            .ok_or_else(|| InterpretError::internal("operator without an element model", self.position))?;
        if self.slots.len() < slot_types.len() {
            return Err(InterpretError::internal("operator is missing element values", self.position));
        }
        let mut slots = Vec::with_capacity(slot_types.len());
        for (name, ty) in self.slots.iter().zip(slot_types) {
            slots.push(satisfy_slot(env, set, name, ModelInstanceType::value(ty.clone()), self.position)?);
        }
        let value = expr.interpret(env)?;
        expect_model(&value, expected, expr.position())?;
        self.scope = Some(OpScope::new(env, set, slots));
        Ok(value)
    }
}

impl OperationInterpreted for OperatorInterpreted {
    fn update(&mut self, source: &ModelInstanceType, env: &mut InterpretEnv<'_>) -> InterpretResult<ModelInstanceType> {
        let operator = self
            .operator
            .clone()
            .ok_or_else(|| InterpretError::internal("operator was not compiled", self.position))?;
        let family = self
            .family
            .ok_or_else(|| InterpretError::internal("operator has no family", self.position))?;
        let element = source.element().clone();

        let mut slot_types = vec![element.clone()];
        if let Operator::Reduce { seed, .. } = &operator {
            let value = seed.interpret(env)?;
            expect_model(&value, ModelType::Value, seed.position())?;
            slot_types.push(value.value_type().element().clone());
            self.seed = Some(value);
        }
        if let Some(expr) = operator.scoped_expr() {
            let expected = match operator {
                Operator::RefreshEach { .. } => ModelType::Event,
                _ => ModelType::Value,
            };
            let value = self.interpret_scoped(expr, &slot_types, expected, env)?;
            let produced = value.value_type().element().clone();
            match operator {
                Operator::Filter { .. } if !produced.is_open() && produced != ElementType::Bool => {
                    return Err(InterpretError::mismatch(ElementType::Bool, &produced, expr.position()));
                }
                Operator::Reduce { .. } if !produced.is_assignable_to(&slot_types[1]) => {
                    return Err(InterpretError::mismatch(&slot_types[1], &produced, expr.position()));
                }
                _ => {}
            }
            self.expr = Some(value);
        }
        if let Some(expr) = operator.outer_expr() {
            let value = expr.interpret(env)?;
            expect_model(&value, operator.outer_model(), expr.position())?;
            self.expr = Some(value);
        }

        let model = target_model(operator.name(), source.model);
        Ok(match operator {
            Operator::Size => ModelInstanceType::value(ElementType::Int),
            Operator::Reduce { .. } => ModelInstanceType::value(slot_types[1].clone()),
            Operator::Flatten => {
                ModelInstanceType::collection(model, flattened(&element, family, self.position)?)
            }
            _ => source.with_model(model),
        })
    }

    fn passive(&self) -> Option<bool> {
        match (self.family?, self.operator.as_ref()?) {
            (Family::Collection, Operator::Size | Operator::Reduce { .. }) => None,
            (Family::Collection, operator) => Some(matches!(
                operator,
                Operator::Reverse
                    | Operator::Refresh { .. }
                    | Operator::RefreshEach { .. }
                    | Operator::Unmodifiable
                    | Operator::Collect { .. }
            )),
            _ => None,
        }
    }

    fn forced_strategy(&self) -> Option<CollectStrategy> {
        match self.operator.as_ref()? {
            Operator::Collect { active } => Some(strategy_of(*active)),
            _ => None,
        }
    }

    fn operator(&self) -> &'static str {
        self.operator.as_ref().map(Operator::name).unwrap_or("operation")
    }

    fn instantiate(&self) -> OperationRef {
        Arc::new(OperatorInstantiator {
            stage: self.operator.as_ref().map(Stage::of),
            family: self.family.unwrap_or(Family::Value),
            scope: self.scope.clone(),
            expr: self.expr.as_ref().map(|e| e.instantiate()),
            seed: self.seed.as_ref().map(|e| e.instantiate()),
        })
    }
}

fn strategy_of(active: Option<bool>) -> CollectStrategy {
    match active {
        Some(true) => CollectStrategy::Active,
        Some(false) => CollectStrategy::Passive,
        None => CollectStrategy::Auto,
    }
}

// ============================================================================
// Runtime
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Filter,
    FilterAccept,
    Disable,
    Refresh,
    Unmodifiable,
    Flatten,
    Sort { descending: bool },
    Reverse,
    Distinct,
    Size,
    Collect(CollectStrategy),
    Skip(usize),
    Take(usize),
    RefreshEach,
    WhereContained { inclusive: bool },
    TakeUntil,
    NoInit,
    Reduce,
}

impl Stage {
    fn of(operator: &Operator) -> Stage {
        match operator {
            Operator::Filter { .. } => Stage::Filter,
            Operator::FilterAccept { .. } => Stage::FilterAccept,
            Operator::Disable { .. } => Stage::Disable,
            Operator::Refresh { .. } => Stage::Refresh,
            Operator::Unmodifiable => Stage::Unmodifiable,
            Operator::Flatten => Stage::Flatten,
            Operator::Sort { descending, .. } => Stage::Sort {
                descending: *descending,
            },
            Operator::Reverse => Stage::Reverse,
            Operator::Distinct => Stage::Distinct,
            Operator::Size => Stage::Size,
            Operator::Collect { active } => Stage::Collect(strategy_of(*active)),
            Operator::Skip(n) => Stage::Skip(*n),
            Operator::Take(n) => Stage::Take(*n),
            Operator::RefreshEach { .. } => Stage::RefreshEach,
            Operator::WhereContained { inclusive, .. } => Stage::WhereContained { inclusive: *inclusive },
            Operator::TakeUntil { .. } => Stage::TakeUntil,
            Operator::NoInit => Stage::NoInit,
            Operator::Reduce { .. } => Stage::Reduce,
        }
    }

    /// Stages producing a value from a whole collection instead of a flow
    fn is_terminal(self) -> bool {
        matches!(self, Stage::Size | Stage::Reduce)
    }
}

/// `None` stage: the operator failed to compile
struct OperatorInstantiator {
    stage: Option<Stage>,
    family: Family,
    scope: Option<OpScope>,
    expr: Option<InstantiatorRef>,
    seed: Option<InstantiatorRef>,
}

impl OperatorInstantiator {
    fn compiled_stage(&self) -> InstantiationResult<Stage> {
        self.stage
            .ok_or_else(|| InstantiationError::Internal("operator was not compiled".to_string()))
    }

    fn expr(&self) -> InstantiationResult<&InstantiatorRef> {
        self.expr
            .as_ref()
            .ok_or_else(|| InstantiationError::Internal("operator without an expression".to_string()))
    }

    /// Per-element evaluation of the scoped expression
    fn scoped(&self, models: &ModelInstance) -> InstantiationResult<Option<(super::scope::Evaluator, SettableRef)>> {
        let (Some(scope), Some(expr)) = (&self.scope, &self.expr) else {
            return Ok(None);
        };
        let scope = scope.create(models)?;
        let result = expr.get(&scope.instance)?.into_value()?;
        Ok(Some((scope.evaluator(), result)))
    }

    fn predicate(&self, models: &ModelInstance) -> InstantiationResult<PredicateFn> {
        let (evaluator, test) = self
            .scoped(models)?
            .ok_or_else(|| InstantiationError::Internal("filter without a test".to_string()))?;
        Ok(Arc::new(move |d: &Datum| {
            evaluator.eval(std::slice::from_ref(d), &test) == Datum::Bool(true)
        }))
    }

    fn accept(&self, models: &ModelInstance) -> InstantiationResult<AcceptFn> {
        let (evaluator, test) = self
            .scoped(models)?
            .ok_or_else(|| InstantiationError::Internal("filter without a test".to_string()))?;
        Ok(Arc::new(move |d: &Datum| {
            evaluator.check(std::slice::from_ref(d), &test, "Value is not acceptable")
        }))
    }

    fn compare(&self, models: &ModelInstance, descending: bool) -> InstantiationResult<CompareFn> {
        let key = self.scoped(models)?;
        let ordered = move |a: &Datum, b: &Datum| -> Ordering {
            let ordering = match &key {
                Some((evaluator, by)) => {
                    let ka = evaluator.eval(std::slice::from_ref(a), by);
                    let kb = evaluator.eval(std::slice::from_ref(b), by);
                    ka.compare(&kb)
                }
                None => a.compare(b),
            };
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        };
        Ok(Arc::new(ordered))
    }

    fn outer_value(&self, models: &ModelInstance) -> InstantiationResult<SettableRef> {
        self.expr()?.get(models)?.into_value()
    }

    fn outer_event(&self, models: &ModelInstance) -> InstantiationResult<EventRef> {
        self.expr()?.get(models)?.into_event()
    }

    fn outer_collection(&self, models: &ModelInstance) -> InstantiationResult<CollectionRef> {
        self.expr()?.get(models)?.into_collection()
    }

    /// The event each element is refreshed on, read in the element's scope
    fn refresh_fn(&self, models: &ModelInstance) -> InstantiationResult<RefreshFn> {
        let (Some(scope), Some(expr)) = (&self.scope, &self.expr) else {
            return Err(InstantiationError::Internal("refresh-each without an event".to_string()));
        };
        let scope = scope.create(models)?;
        let event = expr.get(&scope.instance)?.into_event()?;
        Ok(Arc::new(move |_: &Datum| Some(event.clone())))
    }

    /// Seed and combining function of a reduction
    fn reduction(&self, models: &ModelInstance) -> InstantiationResult<(SettableRef, ReduceFn)> {
        let seed = self
            .seed
            .as_ref()
            .ok_or_else(|| InstantiationError::Internal("reduce without a seed".to_string()))?
            .get(models)?
            .into_value()?;
        let (evaluator, combine) = self
            .scoped(models)?
            .ok_or_else(|| InstantiationError::Internal("reduce without a combination".to_string()))?;
        let combine: ReduceFn = Arc::new(move |temp: &Datum, element: &Datum| {
            evaluator.eval(&[element.clone(), temp.clone()], &combine)
        });
        Ok((seed, combine))
    }
}

impl OperationInstantiator for OperatorInstantiator {
    fn transform(&self, source: ModelValue, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        Ok(match (self.family, self.compiled_stage()?) {
            (Family::Collection, Stage::Size) => {
                ModelValue::Value(Arc::new(SizeValue::new(source.into_collection()?)))
            }
            (Family::Collection, Stage::Reduce) => {
                let (seed, combine) = self.reduction(models)?;
                ModelValue::Value(Arc::new(ReducedValue::new(source.into_collection()?, seed, combine)))
            }
            (Family::Collection, _) => {
                let mut flow = CollectionFlow::new(source.into_collection()?);
                if let Some(stage) = self.stage(models)? {
                    flow = flow.then(stage);
                }
                let strategy = self.strategy().unwrap_or_default();
                ModelValue::Collection(flow.collect(strategy, models.lifespan())?)
            }
            (Family::Action, Stage::Disable) => ModelValue::Action(Arc::new(DisabledAction::new(
                source.into_action()?,
                enablement(self.outer_value(models)?),
            ))),
            (Family::Event, Stage::Filter) => {
                ModelValue::Event(Arc::new(FilteredEvent::new(source.into_event()?, self.predicate(models)?)))
            }
            (Family::Event, Stage::Skip(n)) => ModelValue::Event(Arc::new(SkipEvent::new(source.into_event()?, n))),
            (Family::Event, Stage::Take(n)) => ModelValue::Event(Arc::new(TakeEvent::new(source.into_event()?, n))),
            (Family::Event, Stage::TakeUntil) => ModelValue::Event(Arc::new(TakeUntilEvent::new(
                source.into_event()?,
                self.outer_event(models)?,
            ))),
            (Family::Event, Stage::NoInit) => ModelValue::Event(Arc::new(NoInitEvent::new(source.into_event()?))),
            (Family::Value, stage) => {
                let value = source.into_value()?;
                let derived: SettableRef = match stage {
                    Stage::Filter => Arc::new(FilteredValue::new(value, self.predicate(models)?)),
                    Stage::FilterAccept => Arc::new(AcceptFilteredValue::new(value, self.accept(models)?)),
                    Stage::Disable => Arc::new(DisabledValue::new(value, enablement(self.outer_value(models)?))),
                    Stage::Refresh => Arc::new(RefreshingValue::new(value, self.outer_event(models)?)),
                    Stage::Unmodifiable => Arc::new(UnmodifiableValue::new(value)),
                    Stage::Flatten => Arc::new(FlattenedValue::new(value)),
                    other => {
                        return Err(InstantiationError::Internal(format!(
                            "{:?} is not a value operator",
                            other
                        )))
                    }
                };
                ModelValue::Value(derived)
            }
            (family, stage) => {
                return Err(InstantiationError::Internal(format!(
                    "{:?} is not a {:?} operator",
                    stage, family
                )))
            }
        })
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        if let Some(scope) = &self.scope {
            if scope.is_different(source, target)? {
                return Ok(true);
            }
        }
        for part in self.expr.iter().chain(&self.seed) {
            if part.is_different(source, target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn as_efficient_copy(&self) -> Option<&dyn EfficientCopy> {
        match (self.family, self.stage?) {
            (Family::Collection, stage) if stage.is_terminal() => Some(self),
            (Family::Collection, _) => None,
            _ => Some(self),
        }
    }

    fn as_flow(&self) -> Option<&dyn FlowLink> {
        match (self.family, self.stage?) {
            (Family::Collection, stage) if stage.is_terminal() => None,
            (Family::Collection, _) => Some(self),
            _ => None,
        }
    }
}

impl EfficientCopy for OperatorInstantiator {}

impl FlowLink for OperatorInstantiator {
    fn stage(&self, models: &ModelInstance) -> InstantiationResult<Option<FlowStage>> {
        Ok(Some(match self.compiled_stage()? {
            Stage::Filter => FlowStage::Filter(self.predicate(models)?),
            Stage::Sort { descending } => FlowStage::Sort(self.compare(models, descending)?),
            Stage::Reverse => FlowStage::Reverse,
            Stage::Distinct => FlowStage::Distinct,
            Stage::Refresh => FlowStage::Refresh(self.outer_event(models)?),
            Stage::Unmodifiable => FlowStage::Unmodifiable,
            Stage::Flatten => FlowStage::Flatten,
            Stage::RefreshEach => FlowStage::RefreshEach(self.refresh_fn(models)?),
            Stage::WhereContained { inclusive } => FlowStage::WhereContained {
                filter: self.outer_collection(models)?,
                inclusive,
            },
            _ => return Ok(None),
        }))
    }

    fn strategy(&self) -> Option<CollectStrategy> {
        match self.stage? {
            Stage::Collect(strategy) => Some(strategy),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::AttributeValue;
    use crate::expr::Expr;
    use crate::model::{ModelLayout, ModelSets};
    use strata_reactive::{
        CollectionShape, EventSource, Lifespan, ObservableEvent, SettableValue, SimpleCollection,
        SimpleValue,
    };

    fn instance() -> ModelInstance {
        let set = ModelSets::new().create_root();
        ModelInstance::new(Arc::new(ModelLayout::new(set, "")), None, Lifespan::new())
    }

    fn plain(stage: Stage, family: Family) -> OperatorInstantiator {
        OperatorInstantiator {
            stage: Some(stage),
            family,
            scope: None,
            expr: None,
            seed: None,
        }
    }

    // ── Parsing ─────────────────────────────────────────────────────────

    #[test]
    fn test_parse_operators() {
        let models = ModelSets::new().create_root();
        let node = DeclNode::new("skip").attr("times", 2i64);
        assert!(matches!(Operator::parse("skip", &node, models, models).unwrap(), Operator::Skip(2)));

        let node = DeclNode::new("collect").attr("active", true);
        assert!(matches!(
            Operator::parse("collect", &node, models, models).unwrap(),
            Operator::Collect { active: Some(true) }
        ));

        let node = DeclNode::new("sort").attr("descending", AttributeValue::Text("true".into()));
        match Operator::parse("sort", &node, models, models).unwrap() {
            Operator::Sort { by, descending } => {
                assert!(by.is_none());
                assert!(descending);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_attributes() {
        let models = ModelSets::new().create_root();
        assert!(Operator::parse("take", &DeclNode::new("take"), models, models).is_err());
        assert!(Operator::parse("filter", &DeclNode::new("filter"), models, models).is_err());
    }

    #[test]
    fn test_parse_membership_and_reduction() {
        let models = ModelSets::new().create_root();
        let node = DeclNode::new("where-contained").attr("filter", Expr::name("allowed"));
        assert!(matches!(
            Operator::parse("where-contained", &node, models, models).unwrap(),
            Operator::WhereContained { inclusive: true, .. }
        ));
        let node = DeclNode::new("reduce").attr("seed", Expr::int(0));
        assert!(Operator::parse("reduce", &node, models, models).is_err());
        let node = node.attr("combine", Expr::name("temp"));
        let reduce = Operator::parse("reduce", &node, models, models).unwrap();
        assert_eq!(reduce.name(), "reduce");
        assert_eq!(reduce.default_slots(), vec!["source".to_string(), "temp".to_string()]);
        assert!(matches!(Operator::parse("no-init", &DeclNode::new("no-init"), models, models), Ok(Operator::NoInit)));
    }

    // ── Types ───────────────────────────────────────────────────────────

    #[test]
    fn test_flattened_types() {
        let position = SourcePosition::default();
        let nested = ElementType::model(ModelInstanceType::value(ElementType::Int));
        assert_eq!(flattened(&nested, Family::Value, position).unwrap(), ElementType::Int);
        let list = ElementType::model(ModelInstanceType::collection(ModelType::Collection, ElementType::Text));
        assert_eq!(flattened(&list, Family::Collection, position).unwrap(), ElementType::Text);
        assert!(flattened(&list, Family::Value, position).is_err());
        assert_eq!(flattened(&ElementType::Any, Family::Value, position).unwrap(), ElementType::Any);
        assert!(flattened(&ElementType::Int, Family::Value, position).is_err());
    }

    #[test]
    fn test_collect_strategies() {
        assert_eq!(strategy_of(Some(true)), CollectStrategy::Active);
        assert_eq!(strategy_of(Some(false)), CollectStrategy::Passive);
        assert_eq!(strategy_of(None), CollectStrategy::Auto);
    }

    // ── Runtime ─────────────────────────────────────────────────────────

    #[test]
    fn test_size_is_an_efficient_step() {
        let models = instance();
        let size = plain(Stage::Size, Family::Collection);
        assert!(size.as_flow().is_none());
        let source = Arc::new(SimpleCollection::new(
            CollectionShape::LIST,
            vec![Datum::Int(1), Datum::Int(2)],
        ));
        let value = size.transform(ModelValue::Collection(source.clone()), &models).unwrap();
        assert_eq!(value.as_value().unwrap().get(), Datum::Int(2));
        let recovered = size.get_source(&value).unwrap();
        assert!(recovered.ptr_eq(&ModelValue::Collection(source)));
    }

    #[test]
    fn test_sort_without_key() {
        let models = instance();
        let sort = plain(Stage::Sort { descending: true }, Family::Collection);
        let compare = sort.compare(&models, true).unwrap();
        assert_eq!(compare(&Datum::Int(1), &Datum::Int(2)), Ordering::Greater);
        assert!(matches!(sort.stage(&models).unwrap(), Some(FlowStage::Sort(_))));
    }

    #[test]
    fn test_collect_has_no_stage() {
        let models = instance();
        let collect = plain(Stage::Collect(CollectStrategy::Active), Family::Collection);
        assert!(collect.stage(&models).unwrap().is_none());
        assert_eq!(collect.strategy(), Some(CollectStrategy::Active));
    }

    #[test]
    fn test_unmodifiable_value() {
        let models = instance();
        let link = plain(Stage::Unmodifiable, Family::Value);
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(1)));
        let value = link
            .transform(ModelValue::Value(source.clone()), &models)
            .unwrap()
            .into_value()
            .unwrap();
        assert!(value.set(Datum::Int(2)).is_err());
        source.set(Datum::Int(3)).unwrap();
        assert_eq!(value.get(), Datum::Int(3));
    }

    #[test]
    fn test_take_events() {
        let models = instance();
        let link = plain(Stage::Take(1), Family::Event);
        let source = Arc::new(EventSource::new());
        let taken = link
            .transform(ModelValue::Event(source.clone()), &models)
            .unwrap()
            .into_event()
            .unwrap();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        let _subscription = taken.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        source.fire(&Datum::Int(1));
        source.fire(&Datum::Int(2));
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_init_keeps_later_events() {
        let models = instance();
        let link = plain(Stage::NoInit, Family::Event);
        let source = Arc::new(EventSource::new());
        let quiet = link
            .transform(ModelValue::Event(source.clone()), &models)
            .unwrap();
        let recovered = link.get_source(&quiet).unwrap();
        assert!(recovered.ptr_eq(&ModelValue::Event(source.clone())));
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        let _subscription = quiet.into_event().unwrap().subscribe(Arc::new(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        source.fire(&Datum::Int(1));
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reduce_is_not_a_flow_stage() {
        let reduce = plain(Stage::Reduce, Family::Collection);
        assert!(reduce.as_flow().is_none());
        assert!(reduce.as_efficient_copy().is_some());
        let where_contained = plain(Stage::WhereContained { inclusive: false }, Family::Collection);
        assert!(where_contained.as_flow().is_some());
    }

    #[test]
    fn test_uncompiled_operator_fails_to_instantiate() {
        let models = instance();
        let interpreted = OperatorInterpreted {
            operator: None,
            family: Some(Family::Value),
            local: None,
            slots: Vec::new(),
            position: SourcePosition::default(),
            scope: None,
            expr: None,
            seed: None,
        };
        let link = interpreted.instantiate();
        assert!(link.as_efficient_copy().is_none());
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(1)));
        match link.transform(ModelValue::Value(source), &models) {
            Err(InstantiationError::Internal(message)) => assert!(message.contains("not compiled")),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("an uncompiled operator produced a value"),
        }
    }
}
