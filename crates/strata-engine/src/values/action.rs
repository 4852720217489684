//! `action`, `action-group` and `loop`

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use strata_reactive::{
    ActionRef, Datum, DisabledAction, ObservableAction, ReactiveResult, SequenceAction, SettableRef,
};
use tracing::{debug, warn};

use super::{def_core, enablement, expect_model, expression, expression_text, interpret_value_expr};
use crate::decl::{AttributeKind, DeclNode, ElementSpec};
use crate::element::{DefCore, ElementDef, ElementId, InterpretEnv, UpdateSession, ValueInterpreted};
use crate::error::{CompileResult, InstantiationResult, InterpretError, InterpretResult};
use crate::expr::CompiledExpression;
use crate::model::{
    CompiledModelValue, InstantiatorRef, InterpretedNode, InterpretedRef, ModelInstance, ModelValue,
    ValueInstantiator,
};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{ModelInstanceType, ModelType};

const LOOP_STEPS: [&str; 5] = ["init", "before-while", "before-body", "after-body", "finally"];

pub(super) fn register(toolkit: &mut Toolkit) {
    toolkit.register(
        ElementSpec::new("action")
            .extends("model-value")
            .required("action", AttributeKind::Expression)
            .attribute("enabled", AttributeKind::Expression),
        Some(|core| Box::new(ActionDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register(
        ElementSpec::new("action-group")
            .extends("model-value")
            .child("model-value", 1, None),
        Some(|core| Box::new(ActionGroupDef::new(core)) as Box<dyn ElementDef>),
    );
    let mut loop_spec = ElementSpec::new("loop")
        .extends("model-value")
        .required("while", AttributeKind::Expression)
        .child("model-value", 0, None);
    for step in LOOP_STEPS {
        loop_spec = loop_spec.attribute(step, AttributeKind::Expression);
    }
    toolkit.register(loop_spec, Some(|core| Box::new(LoopDef::new(core)) as Box<dyn ElementDef>));

    toolkit.register_trace(
        TraceTable::builder::<ActionDef, ValueInterpreted>("action")
            .named()
            .attribute("action", |d| expression_text(&d.action), |_| None)
            .attribute("enabled", |d| expression_text(&d.enabled), |_| None)
            .value(|d| expression_text(&d.action), |_| Some("Action".to_string()))
            .build(),
    );
    toolkit.register_trace(
        TraceTable::builder::<ActionGroupDef, ValueInterpreted>("action-group")
            .named()
            .child("model-value", |d| d.actions.clone(), |_| Vec::new())
            .build(),
    );
    let mut loop_trace = TraceTable::builder::<LoopDef, ValueInterpreted>("loop")
        .named()
        .attribute("while", |d| expression_text(&d.condition), |_| None)
        .child("model-value", |d| d.body.clone(), |_| Vec::new());
    for (index, step) in LOOP_STEPS.into_iter().enumerate() {
        loop_trace = loop_trace.attribute(step, move |d| expression_text(&d.steps[index]), |_| None);
    }
    toolkit.register_trace(loop_trace.build());
}

/// Interpret an optional expression that must produce an action
fn interpret_action(
    expr: &Option<CompiledExpression>,
    env: &mut InterpretEnv<'_>,
) -> InterpretResult<Option<InterpretedRef>> {
    match expr {
        Some(expr) => {
            let action = expr.interpret(env)?;
            expect_model(&action, ModelType::Action, expr.position())?;
            Ok(Some(action))
        }
        None => Ok(None),
    }
}

/// Actions produced by child elements, in declaration order
fn child_actions(children: &[ElementId], env: &mut InterpretEnv<'_>) -> InterpretResult<Vec<InterpretedRef>> {
    let mut actions = Vec::with_capacity(children.len());
    for child in children {
        let interpreted = env.interpret_element(*child)?;
        let at = interpreted.core().position;
        let action = interpreted.value().ok_or_else(|| InterpretError::NotAValue {
            name: interpreted.core().element_type.clone(),
            position: at,
        })?;
        expect_model(&action, ModelType::Action, at)?;
        actions.push(action);
    }
    Ok(actions)
}

fn actions_of(parts: &[InstantiatorRef], models: &ModelInstance) -> InstantiationResult<Vec<ActionRef>> {
    parts.iter().map(|p| p.get(models)?.into_action()).collect()
}

fn any_different(parts: &[InstantiatorRef], source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
    for part in parts {
        if part.is_different(source, target)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ============================================================================
// action
// ============================================================================

/// An action expression, optionally disabled by a message-or-boolean value
pub struct ActionDef {
    core: DefCore,
    action: Option<CompiledExpression>,
    enabled: Option<CompiledExpression>,
}

impl ActionDef {
    /// Definition with nothing read yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            action: None,
            enabled: None,
        }
    }
}

impl ElementDef for ActionDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        let models = self.core.content_models();
        self.action = expression(node, "action", models);
        self.enabled = expression(node, "enabled", models);
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for ActionDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(ModelType::Action)
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let action = interpret_action(&self.action, env)?
            .ok_or_else(|| InterpretError::internal("action without an action", self.core.position))?;
        let Some(enabled) = interpret_value_expr(&self.enabled, env)? else {
            return Ok(action);
        };
        Ok(InterpretedNode::new(
            ModelInstanceType::action(),
            vec![action, enabled],
            |c: &[InterpretedRef]| {
                Arc::new(EnabledActionInstantiator {
                    action: c[0].instantiate(),
                    enabled: c[1].instantiate(),
                }) as InstantiatorRef
            },
        ))
    }
}

struct EnabledActionInstantiator {
    action: InstantiatorRef,
    enabled: InstantiatorRef,
}

impl ValueInstantiator for EnabledActionInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let action = self.action.get(models)?.into_action()?;
        let enabled = self.enabled.get(models)?.into_value()?;
        Ok(ModelValue::Action(Arc::new(DisabledAction::new(action, enablement(enabled)))))
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        Ok(self.action.is_different(source, target)? || self.enabled.is_different(source, target)?)
    }
}

// ============================================================================
// action-group
// ============================================================================

/// Runs its child actions in order
pub struct ActionGroupDef {
    core: DefCore,
    actions: Vec<ElementId>,
}

impl ActionGroupDef {
    /// Definition with no actions yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            actions: Vec::new(),
        }
    }
}

impl ElementDef for ActionGroupDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        let nodes: Vec<Arc<DeclNode>> = node.children.iter().cloned().map(Arc::new).collect();
        let previous = std::mem::take(&mut self.actions);
        self.actions = session.update_children(self.core.id, self.core.content_models(), &previous, &nodes);
        self.core.children = self.actions.clone();
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for ActionGroupDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(ModelType::Action)
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let actions = child_actions(&self.actions, env)?;
        Ok(InterpretedNode::new(
            ModelInstanceType::action(),
            actions,
            |c: &[InterpretedRef]| {
                Arc::new(GroupInstantiator {
                    actions: c.iter().map(|a| a.instantiate()).collect(),
                }) as InstantiatorRef
            },
        ))
    }
}

struct GroupInstantiator {
    actions: Vec<InstantiatorRef>,
}

impl ValueInstantiator for GroupInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        Ok(ModelValue::Action(Arc::new(SequenceAction::new(actions_of(
            &self.actions,
            models,
        )?))))
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        any_different(&self.actions, source, target)
    }
}

// ============================================================================
// loop
// ============================================================================

/// A bounded loop over child body actions
pub struct LoopDef {
    core: DefCore,
    condition: Option<CompiledExpression>,
    /// Expressions of [`LOOP_STEPS`], by index
    steps: [Option<CompiledExpression>; 5],
    body: Vec<ElementId>,
}

impl LoopDef {
    /// Definition with no steps or body yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            condition: None,
            steps: Default::default(),
            body: Vec::new(),
        }
    }
}

impl ElementDef for LoopDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        let models = self.core.content_models();
        self.condition = expression(node, "while", models);
        for (index, step) in LOOP_STEPS.into_iter().enumerate() {
            self.steps[index] = expression(node, step, models);
        }
        let nodes: Vec<Arc<DeclNode>> = node.children.iter().cloned().map(Arc::new).collect();
        let previous = std::mem::take(&mut self.body);
        self.body = session.update_children(self.core.id, models, &previous, &nodes);
        self.core.children = self.body.clone();
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for LoopDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(ModelType::Action)
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let condition = interpret_value_expr(&self.condition, env)?
            .ok_or_else(|| InterpretError::internal("loop without a condition", self.core.position))?;
        let mut components = vec![condition];
        let mut present = [false; 5];
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(action) = interpret_action(step, env)? {
                present[index] = true;
                components.push(action);
            }
        }
        let body_start = components.len();
        components.extend(child_actions(&self.body, env)?);

        let max_iterations = env.config.loops.max_iterations;
        Ok(InterpretedNode::new(
            ModelInstanceType::action(),
            components,
            move |c: &[InterpretedRef]| {
                let mut next = 1;
                let mut steps: [Option<InstantiatorRef>; 5] = Default::default();
                for (index, slot) in steps.iter_mut().enumerate() {
                    if present[index] {
                        *slot = Some(c[next].instantiate());
                        next += 1;
                    }
                }
                Arc::new(LoopInstantiator {
                    condition: c[0].instantiate(),
                    steps,
                    body: c[body_start..].iter().map(|b| b.instantiate()).collect(),
                    max_iterations,
                }) as InstantiatorRef
            },
        ))
    }
}

struct LoopInstantiator {
    condition: InstantiatorRef,
    steps: [Option<InstantiatorRef>; 5],
    body: Vec<InstantiatorRef>,
    max_iterations: u64,
}

impl ValueInstantiator for LoopInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let mut steps: [Option<ActionRef>; 5] = Default::default();
        for (slot, step) in steps.iter_mut().zip(&self.steps) {
            if let Some(step) = step {
                *slot = Some(step.get(models)?.into_action()?);
            }
        }
        let [init, before_while, before_body, after_body, finally] = steps;
        Ok(ModelValue::Action(Arc::new(LoopAction {
            condition: self.condition.get(models)?.into_value()?,
            init,
            before_while,
            before_body,
            body: actions_of(&self.body, models)?,
            after_body,
            finally,
            max_iterations: self.max_iterations,
        })))
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        if self.condition.is_different(source, target)? || any_different(&self.body, source, target)? {
            return Ok(true);
        }
        for step in self.steps.iter().flatten() {
            if step.is_different(source, target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// The live loop
struct LoopAction {
    condition: SettableRef,
    init: Option<ActionRef>,
    before_while: Option<ActionRef>,
    before_body: Option<ActionRef>,
    body: Vec<ActionRef>,
    after_body: Option<ActionRef>,
    finally: Option<ActionRef>,
    max_iterations: u64,
}

fn run(action: &Option<ActionRef>) -> ReactiveResult<()> {
    match action {
        Some(action) => action.act(),
        None => Ok(()),
    }
}

impl LoopAction {
    /// Iterations run; the cap ends the loop like a false condition
    fn iterate(&self) -> ReactiveResult<u64> {
        run(&self.init)?;
        let mut iterations = 0;
        loop {
            run(&self.before_while)?;
            if !matches!(self.condition.get(), Datum::Bool(true)) {
                return Ok(iterations);
            }
            if iterations >= self.max_iterations {
                warn!(
                    max_iterations = self.max_iterations,
                    "loop reached its iteration cap and was stopped"
                );
                return Ok(iterations);
            }
            run(&self.before_body)?;
            for action in &self.body {
                action.act()?;
            }
            run(&self.after_body)?;
            iterations += 1;
        }
    }
}

impl ObservableAction for LoopAction {
    fn act(&self) -> ReactiveResult<()> {
        let result = self.iterate();
        let finished = run(&self.finally);
        let iterations = result?;
        debug!(iterations, "loop finished");
        finished
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for LoopAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopAction")
            .field("body", &self.body.len())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use strata_reactive::{ActFn, FnAction, ReactiveError, SettableValue, SimpleValue};

    fn counter(value: Arc<SimpleValue>) -> ActionRef {
        let act: ActFn = Arc::new(move || {
            let next = value.get().as_int().unwrap_or(0) + 1;
            value.set(Datum::Int(next))?;
            Ok(())
        });
        Arc::new(FnAction::new(act))
    }

    fn record(log: Arc<Mutex<Vec<&'static str>>>, entry: &'static str) -> ActionRef {
        Arc::new(FnAction::new(Arc::new(move || {
            log.lock().push(entry);
            Ok(())
        })))
    }

    fn lt(value: Arc<SimpleValue>, limit: i64) -> SettableRef {
        Arc::new(strata_reactive::DerivedValue::new(
            vec![value],
            Arc::new(move |d: &[Datum]| Datum::Bool(d[0].as_int().unwrap_or(0) < limit)),
        ))
    }

    // ── Iteration ──────────────────────────────────────────────────────

    #[test]
    fn test_loop_runs_until_condition_fails() {
        let i = Arc::new(SimpleValue::new(Datum::Int(0)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let action = LoopAction {
            condition: lt(i.clone(), 3),
            init: Some(record(log.clone(), "init")),
            before_while: None,
            before_body: None,
            body: vec![counter(i.clone())],
            after_body: Some(record(log.clone(), "after")),
            finally: Some(record(log.clone(), "finally")),
            max_iterations: 100,
        };
        action.act().unwrap();
        assert_eq!(i.get(), Datum::Int(3));
        assert_eq!(*log.lock(), vec!["init", "after", "after", "after", "finally"]);
    }

    #[test]
    fn test_loop_cap_ends_normally() {
        let i = Arc::new(SimpleValue::new(Datum::Int(0)));
        let action = LoopAction {
            condition: Arc::new(SimpleValue::new(Datum::Bool(true))),
            init: None,
            before_while: None,
            before_body: None,
            body: vec![counter(i.clone())],
            after_body: None,
            finally: None,
            max_iterations: 5,
        };
        assert!(action.act().is_ok());
        assert_eq!(i.get(), Datum::Int(5));
    }

    #[test]
    fn test_finally_runs_after_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: ActionRef = Arc::new(FnAction::new(Arc::new(|| Err(ReactiveError::rejected("boom")))));
        let action = LoopAction {
            condition: Arc::new(SimpleValue::new(Datum::Bool(true))),
            init: None,
            before_while: None,
            before_body: None,
            body: vec![failing],
            after_body: None,
            finally: Some(record(log.clone(), "finally")),
            max_iterations: 10,
        };
        assert_eq!(action.act(), Err(ReactiveError::rejected("boom")));
        assert_eq!(*log.lock(), vec!["finally"]);
    }
}
