//! Transformations
//!
//! A `transform` element runs a source expression through an ordered chain
//! of operations. Each operation is chosen by the model type flowing into it
//! (its family), resolves a target type at interpretation, and contributes
//! one link to a [`ChainInstantiator`] at runtime.
//!
//! ```json
//! {"type": "transform", "name": "doubled", "attributes": {"source": "count"},
//!  "children": [
//!    {"type": "map-to", "attributes": {"map": {"expr":
//!      {"binary": {"op": "mul", "left": {"name": "source"}, "right": {"lit": 2}}}}}},
//!    {"type": "filter", "attributes": {"test": {"expr":
//!      {"binary": {"op": "gt", "left": {"name": "source"}, "right": {"lit": 0}}}}}}
//!  ]}
//! ```

mod chain;
mod map;
mod ops;
mod scope;

pub use chain::{
    compose, source_of, ChainInstantiator, EfficientCopy, FlowLink, OperationInstantiator,
    OperationRef, Transform,
};
pub use map::{MapToDef, ReverseDef};
pub use ops::{Operator, OperatorDef};

use std::sync::Arc;
use strata_reactive::CollectStrategy;
use tracing::debug;

use crate::decl::{AttributeKind, DeclNode, ElementSpec, SourcePosition};
use crate::element::{update_element, DefCore, ElementDef, ElementId, InterpretEnv, UpdateSession, ValueInterpreted};
use crate::error::{CompileError, CompileResult, InterpretError, InterpretResult};
use crate::expr::CompiledExpression;
use crate::model::{CompiledModelValue, InstantiatorRef, InterpretedNode, InterpretedRef};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{ModelInstanceType, ModelType};
use crate::values::{def_core, expression_text, type_text};

// ============================================================================
// Families
// ============================================================================

const VALUE_OPERATORS: &[&str] = &[
    "map-to",
    "filter",
    "filter-accept",
    "disable",
    "refresh",
    "unmodifiable",
    "flatten",
];

const COLLECTION_OPERATORS: &[&str] = &[
    "map-to",
    "filter",
    "sort",
    "reverse",
    "distinct",
    "refresh",
    "unmodifiable",
    "flatten",
    "size",
    "collect",
    "refresh-each",
    "where-contained",
    "reduce",
];

const EVENT_OPERATORS: &[&str] = &["map-to", "filter", "skip", "take", "take-until", "no-init"];

const ACTION_OPERATORS: &[&str] = &["disable"];

/// Operator family, chosen by the model type an operation receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Operators over `Value`
    Value,
    /// Operators over the collection shapes
    Collection,
    /// Operators over `Event`
    Event,
    /// Operators over `Action`
    Action,
}

impl Family {
    /// Family handling `model`; maps have none
    pub fn of(model: ModelType) -> Option<Family> {
        match model {
            ModelType::Value => Some(Family::Value),
            ModelType::Event => Some(Family::Event),
            ModelType::Action => Some(Family::Action),
            other if other.is_collection() => Some(Family::Collection),
            _ => None,
        }
    }

    /// Operator element types of the family
    pub fn operators(self) -> &'static [&'static str] {
        match self {
            Family::Value => VALUE_OPERATORS,
            Family::Collection => COLLECTION_OPERATORS,
            Family::Event => EVENT_OPERATORS,
            Family::Action => ACTION_OPERATORS,
        }
    }

    /// Whether `operator` belongs to the family
    pub fn supports(self, operator: &str) -> bool {
        self.operators().contains(&operator)
    }
}

// ============================================================================
// Operation contract
// ============================================================================

/// Definition side of one operation
pub trait OperationDef {
    /// Family chosen when the operation was last updated
    fn family(&self) -> Option<Family>;

    /// Set by the enclosing transform before the operation is updated
    fn set_source_model(&mut self, model: ModelType);

    /// Model type the operation produces, once updated
    fn target_model_type(&self) -> Option<ModelType>;

    /// Interpretation of the operation, not yet updated
    fn interpret_op(&self) -> Box<dyn OperationInterpreted>;
}

/// Interpretation side of one operation
pub trait OperationInterpreted: Send + Sync {
    /// Resolve the target type from the source type
    fn update(&mut self, source: &ModelInstanceType, env: &mut InterpretEnv<'_>) -> InterpretResult<ModelInstanceType>;

    /// For collection links: whether the link's stage allows a passive view
    fn passive(&self) -> Option<bool> {
        None
    }

    /// Strategy the link forces on its flow
    fn forced_strategy(&self) -> Option<CollectStrategy> {
        None
    }

    /// Short operator name
    fn operator(&self) -> &'static str;

    /// Instantiator applying the operation
    fn instantiate(&self) -> OperationRef;
}

/// Model type after an operation, known before interpretation
pub(crate) fn target_model(operator: &str, source: ModelType) -> ModelType {
    match operator {
        "map-to" if source.is_collection() => ModelType::Collection,
        "flatten" if source.is_collection() => ModelType::Collection,
        "sort" => source.sorted(),
        "reverse" => source.unsorted(),
        "distinct" => source.distinct(),
        "size" | "reduce" => ModelType::Value,
        _ => source,
    }
}

/// Fail with E2008 when a collect forces a passive view over a link that
/// cannot support one
fn check_passive(links: &[(Box<dyn OperationInterpreted>, SourcePosition)]) -> InterpretResult<()> {
    let mut blocker: Option<&'static str> = None;
    for (link, position) in links {
        match link.passive() {
            None => blocker = None,
            Some(passive) => {
                if !passive && blocker.is_none() {
                    blocker = Some(link.operator());
                }
                if let Some(strategy) = link.forced_strategy() {
                    if let (CollectStrategy::Passive, Some(stage)) = (strategy, blocker) {
                        return Err(InterpretError::PassiveNotSupported {
                            stage: stage.to_string(),
                            position: *position,
                        });
                    }
                    blocker = None;
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Registration
// ============================================================================

pub(crate) fn install(toolkit: &mut Toolkit) {
    toolkit.register(ElementSpec::abstract_type("operation"), None);
    toolkit.register(
        ElementSpec::new("transform")
            .extends("typed-value")
            .required("source", AttributeKind::Expression)
            .child("operation", 0, None),
        Some(|core| Box::new(TransformDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register_trace(
        TraceTable::builder::<TransformDef, ValueInterpreted>("transform")
            .named()
            .typed()
            .attribute("source", |d| expression_text(&d.source), |_| None)
            .value(
                |d| d.target.map(|t| t.to_string()),
                |i| type_text(&i.value()),
            )
            .child("operation", |d| d.ops.clone(), |_| Vec::new())
            .build(),
    );
    map::register(toolkit);
    ops::register(toolkit);
}

// ============================================================================
// transform
// ============================================================================

/// A source expression and its chain of operations
pub struct TransformDef {
    core: DefCore,
    source: Option<CompiledExpression>,
    ops: Vec<ElementId>,
    target: Option<ModelType>,
}

impl TransformDef {
    /// Definition with no source or operations yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            source: None,
            ops: Vec::new(),
            target: None,
        }
    }

    /// Operation definitions in chain order
    pub fn ops(&self) -> &[ElementId] {
        &self.ops
    }

    /// Create, reuse or replace the operation at `index` and update it
    ///
    /// Returns the operation's target model type, or `None` when it failed.
    fn update_op(
        &self,
        index: usize,
        previous: &[ElementId],
        node: &Arc<DeclNode>,
        model: ModelType,
        session: &mut UpdateSession<'_>,
    ) -> CompileResult<(ElementId, Option<ModelType>)> {
        let family = Family::of(model).ok_or_else(|| CompileError::NoTransformForModelType {
            model_type: model.to_string(),
            position: node.position,
        })?;
        if !family.supports(&node.element_type) {
            return Err(CompileError::UnsupportedOperator {
                operator: node.element_type.clone(),
                model_type: model.to_string(),
                position: node.position,
            });
        }

        let existing = previous.get(index).copied().filter(|id| {
            session.document.get(*id).is_some_and(|def| {
                def.core().element_type == node.element_type
                    && def.as_operation().and_then(|op| op.family()) == Some(family)
            })
        });
        if let (None, Some(stale)) = (existing, previous.get(index)) {
            session.document.remove(*stale);
        }
        let models = self.core.content_models();
        let id = session.reuse_or_create(existing, Some(self.core.id), models, node)?;
        match session.document.get_mut(id).and_then(|def| def.as_operation_mut()) {
            Some(op) => op.set_source_model(model),
            None => {
                return Err(CompileError::internal(
                    format!("'{}' is not an operation", node.element_type),
                    node.position,
                ))
            }
        }

        if !update_element(session, id, node) {
            return Ok((id, None));
        }
        let target = session
            .document
            .get(id)
            .and_then(|def| def.as_operation())
            .and_then(|op| op.target_model_type());
        Ok((id, target))
    }
}

impl ElementDef for TransformDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.target = None;
        let source = CompiledExpression::new(
            node.required_expr("source")?,
            self.core.content_models(),
            node.position,
        );
        let mut model = source.model_type(session)?;
        self.source = Some(source);

        let schema = session.toolkit.schema();
        let nodes: Vec<Arc<DeclNode>> = node
            .children
            .iter()
            .filter(|child| schema.is_subtype(&child.element_type, "operation"))
            .cloned()
            .map(Arc::new)
            .collect();

        let previous = std::mem::take(&mut self.ops);
        let mut ops = Vec::with_capacity(nodes.len());
        let mut failure = None;
        for (i, op_node) in nodes.iter().enumerate() {
            match self.update_op(i, &previous, op_node, model, session) {
                Ok((id, Some(target))) => {
                    ops.push(id);
                    model = target;
                }
                Ok((id, None)) => {
                    ops.push(id);
                    failure = Some(i);
                    break;
                }
                Err(err) => {
                    failure = Some(i);
                    session.diagnostics.report_compile(&err);
                    break;
                }
            }
        }
        for stale in previous.iter().skip(ops.len()) {
            if !ops.contains(stale) {
                session.document.remove(*stale);
            }
        }
        self.ops = ops;
        self.core.children = self.ops.clone();

        if let Some(index) = failure {
            debug!(index, "transform chain stopped at a failed operation");
            return Ok(());
        }
        self.target = Some(model);
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for TransformDef {
    fn model_type(&self) -> Option<ModelType> {
        self.target
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let source_expr = self
            .source
            .as_ref()
            .ok_or_else(|| InterpretError::internal("transform without a source", self.core.position))?;
        if self.target.is_none() {
            return Err(InterpretError::NotInterpreted {
                element: self.core.describe(),
                position: self.core.position,
            });
        }
        let source = source_expr.interpret(env)?;
        let mut ty = source.value_type().clone();

        let document = env.document;
        let mut links: Vec<(Box<dyn OperationInterpreted>, SourcePosition)> = Vec::with_capacity(self.ops.len());
        for id in &self.ops {
            let def = document
                .get(*id)
                .ok_or_else(|| InterpretError::internal("operation removed", self.core.position))?;
            let core = def.core();
            let op = def
                .as_operation()
                .ok_or_else(|| InterpretError::internal("not an operation", core.position))?;
            let mut link = op.interpret_op();
            ty = link.update(&ty, env)?;
            debug!(operator = link.operator(), target = %ty, "operation interpreted");
            links.push((link, core.position));
        }
        check_passive(&links)?;

        if let Some(declared) = self.core.declared_type() {
            if !ty.element().is_assignable_to(declared) {
                return Err(InterpretError::mismatch(declared, ty.element(), self.core.position));
            }
        }

        let fallback = env.config.collections.fallback();
        let links: Vec<Box<dyn OperationInterpreted>> = links.into_iter().map(|(link, _)| link).collect();
        Ok(InterpretedNode::new(ty, vec![source], move |c: &[InterpretedRef]| {
            let ops = links.iter().map(|link| link.instantiate()).collect();
            Arc::new(ChainInstantiator::new(c[0].instantiate(), ops, fallback)) as InstantiatorRef
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Link {
        passive: Option<bool>,
        forced: Option<CollectStrategy>,
        name: &'static str,
    }

    impl OperationInterpreted for Link {
        fn update(&mut self, source: &ModelInstanceType, _env: &mut InterpretEnv<'_>) -> InterpretResult<ModelInstanceType> {
            Ok(source.clone())
        }

        fn passive(&self) -> Option<bool> {
            self.passive
        }

        fn forced_strategy(&self) -> Option<CollectStrategy> {
            self.forced
        }

        fn operator(&self) -> &'static str {
            self.name
        }

        fn instantiate(&self) -> OperationRef {
            unreachable!()
        }
    }

    fn link(name: &'static str, passive: Option<bool>, forced: Option<CollectStrategy>) -> (Box<dyn OperationInterpreted>, SourcePosition) {
        (
            Box::new(Link { passive, forced, name }),
            SourcePosition::at(1, 1),
        )
    }

    // ── Families ────────────────────────────────────────────────────────

    #[test]
    fn test_family_by_model_type() {
        assert_eq!(Family::of(ModelType::Value), Some(Family::Value));
        assert_eq!(Family::of(ModelType::SortedSet), Some(Family::Collection));
        assert_eq!(Family::of(ModelType::ValueSet), Some(Family::Collection));
        assert_eq!(Family::of(ModelType::Event), Some(Family::Event));
        assert_eq!(Family::of(ModelType::Action), Some(Family::Action));
        assert_eq!(Family::of(ModelType::Map), None);
    }

    #[test]
    fn test_operator_tables() {
        assert!(Family::Value.supports("filter-accept"));
        assert!(!Family::Value.supports("sort"));
        assert!(Family::Collection.supports("size"));
        assert!(Family::Event.supports("skip"));
        assert!(!Family::Action.supports("map-to"));
        assert!(Family::Collection.supports("reduce"));
        assert!(Family::Collection.supports("where-contained"));
        assert!(!Family::Value.supports("refresh-each"));
        assert!(Family::Event.supports("take-until"));
        assert!(Family::Event.supports("no-init"));
    }

    #[test]
    fn test_target_models() {
        assert_eq!(target_model("map-to", ModelType::SortedSet), ModelType::Collection);
        assert_eq!(target_model("map-to", ModelType::Value), ModelType::Value);
        assert_eq!(target_model("sort", ModelType::Set), ModelType::SortedSet);
        assert_eq!(target_model("reverse", ModelType::SortedCollection), ModelType::Collection);
        assert_eq!(target_model("distinct", ModelType::Collection), ModelType::Set);
        assert_eq!(target_model("size", ModelType::Collection), ModelType::Value);
        assert_eq!(target_model("take", ModelType::Event), ModelType::Event);
        assert_eq!(target_model("reduce", ModelType::Set), ModelType::Value);
        assert_eq!(target_model("where-contained", ModelType::SortedSet), ModelType::SortedSet);
    }

    // ── Passive collection ──────────────────────────────────────────────

    #[test]
    fn test_forced_passive_over_a_filter_fails() {
        let links = vec![
            link("filter", Some(false), None),
            link("collect", Some(true), Some(CollectStrategy::Passive)),
        ];
        match check_passive(&links) {
            Err(InterpretError::PassiveNotSupported { stage, .. }) => assert_eq!(stage, "filter"),
            other => panic!("expected E2008, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_group_boundaries_reset_the_blocker() {
        let links = vec![
            link("filter", Some(false), None),
            link("collect", Some(true), Some(CollectStrategy::Active)),
            link("map-to", Some(true), None),
            link("collect", Some(true), Some(CollectStrategy::Passive)),
        ];
        assert!(check_passive(&links).is_ok());

        let links = vec![
            link("sort", Some(false), None),
            link("size", None, None),
        ];
        assert!(check_passive(&links).is_ok());
    }
}
