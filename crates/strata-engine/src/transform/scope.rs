//! Element-local scopes of operations
//!
//! Operations such as `map-to` and `filter` evaluate their expressions once
//! per element flowing through them. Each model instance gets one scope: a
//! child instance of the operation's local model set whose slots (`source`,
//! `target`) are plain values rewritten before every evaluation.

use parking_lot::ReentrantMutex;
use std::sync::Arc;
use strata_reactive::{ActionRef, Datum, ReactiveResult, SettableRef, SettableValue, SimpleValue};

use crate::decl::SourcePosition;
use crate::element::InterpretEnv;
use crate::error::{InstantiationResult, InterpretError, InterpretResult};
use crate::model::{ComponentId, ModelInstance, ModelSetId, ModelSetInstantiator, ModelValue};
use crate::types::ModelInstanceType;

/// Fix the type of a local slot before anything in the set is interpreted
pub(crate) fn satisfy_slot(
    env: &mut InterpretEnv<'_>,
    set: ModelSetId,
    name: &str,
    ty: ModelInstanceType,
    position: SourcePosition,
) -> InterpretResult<ComponentId> {
    let sets = env.document.model_sets();
    let dynamic = |source| InterpretError::Dynamic { source, position };
    let id = env.registry.get_component(sets, name, set).map_err(dynamic)?;
    env.registry.satisfy_type(sets, name, set, ty).map_err(dynamic)?;
    Ok(id)
}

/// Interpreted form of an operation's local model set
#[derive(Clone)]
pub(crate) struct OpScope {
    set: Arc<ModelSetInstantiator>,
    slots: Vec<ComponentId>,
    extras: Vec<ComponentId>,
}

impl OpScope {
    /// Call once every slot in `slots` has its type
    pub fn new(env: &mut InterpretEnv<'_>, set: ModelSetId, slots: Vec<ComponentId>) -> Self {
        let set = env.model_set_instantiator(set);
        let extras = set
            .layout()
            .names()
            .filter_map(|(_, id)| set.instantiator(id).map(|_| id))
            .collect();
        Self { set, slots, extras }
    }

    /// A built scope under `parent`, with every slot bound to `Null`
    pub fn create(&self, parent: &ModelInstance) -> InstantiationResult<Scope> {
        let instance = self.set.create(Some(parent), parent.lifespan().child());
        let mut slots = Vec::with_capacity(self.slots.len());
        for id in &self.slots {
            let slot = Arc::new(SimpleValue::new(Datum::Null));
            instance.bind(*id, ModelValue::Value(slot.clone()))?;
            slots.push(slot);
        }
        instance.build()?;
        Ok(Scope { instance, slots })
    }

    /// Whether the set's own producers would differ between the instances
    pub fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        for id in &self.extras {
            if let Some(instantiator) = self.set.instantiator(*id) {
                if instantiator.is_different(source, target)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Component ids of the combined values, in declaration order
    pub fn extras(&self) -> &[ComponentId] {
        &self.extras
    }
}

/// A scope of one model instance
pub(crate) struct Scope {
    pub instance: ModelInstance,
    pub slots: Vec<Arc<SimpleValue>>,
}

impl Scope {
    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.slots.clone())
    }

    /// Values of the combined components, for change tracking
    pub fn values_of(&self, ids: &[ComponentId]) -> InstantiationResult<Vec<SettableRef>> {
        let mut values = Vec::new();
        for id in ids {
            if let ModelValue::Value(value) = self.instance.get(*id)? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

/// Evaluates scope expressions for given slot contents
///
/// Slot writes and the read that follows happen under one lock, so
/// concurrent readers of the mapped containers never see each other's
/// inputs.
#[derive(Clone)]
pub(crate) struct Evaluator {
    slots: Vec<Arc<SimpleValue>>,
    lock: Arc<ReentrantMutex<()>>,
}

impl Evaluator {
    pub fn new(slots: Vec<Arc<SimpleValue>>) -> Self {
        Self {
            slots,
            lock: Arc::new(ReentrantMutex::new(())),
        }
    }

    fn bind(&self, inputs: &[Datum]) {
        for (slot, input) in self.slots.iter().zip(inputs) {
            slot.replace(input.clone());
        }
    }

    pub fn eval(&self, inputs: &[Datum], result: &SettableRef) -> Datum {
        let _guard = self.lock.lock();
        self.bind(inputs);
        result.get()
    }

    /// Read a message-or-boolean filter
    pub fn check(&self, inputs: &[Datum], filter: &SettableRef, refused: &str) -> Option<String> {
        crate::values::message_of(&self.eval(inputs, filter), refused)
    }

    pub fn run(&self, inputs: &[Datum], action: &ActionRef) -> ReactiveResult<()> {
        let _guard = self.lock.lock();
        self.bind(inputs);
        action.act()
    }

    /// Evaluator over more slots, sharing this one's lock
    pub fn extend(&self, more: &[Arc<SimpleValue>]) -> Evaluator {
        let mut slots = self.slots.clone();
        slots.extend(more.iter().cloned());
        Evaluator {
            slots,
            lock: self.lock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_reactive::{ComputeFn, DerivedValue};

    fn doubled(slot: &Arc<SimpleValue>) -> SettableRef {
        let compute: ComputeFn = Arc::new(|d: &[Datum]| match d[0] {
            Datum::Int(i) => Datum::Int(i * 2),
            _ => Datum::Null,
        });
        Arc::new(DerivedValue::new(vec![slot.clone() as SettableRef], compute))
    }

    #[test]
    fn test_eval_rebinds_slots() {
        let slot = Arc::new(SimpleValue::new(Datum::Null));
        let evaluator = Evaluator {
            slots: vec![slot.clone()],
            lock: Arc::new(ReentrantMutex::new(())),
        };
        let result = doubled(&slot);
        assert_eq!(evaluator.eval(&[Datum::Int(4)], &result), Datum::Int(8));
        assert_eq!(evaluator.eval(&[Datum::Int(-1)], &result), Datum::Int(-2));
        assert_eq!(slot.get(), Datum::Int(-1));
    }

    #[test]
    fn test_extended_evaluator_binds_in_order() {
        let (a, b) = (
            Arc::new(SimpleValue::new(Datum::Null)),
            Arc::new(SimpleValue::new(Datum::Null)),
        );
        let base = Evaluator {
            slots: vec![a.clone()],
            lock: Arc::new(ReentrantMutex::new(())),
        };
        let extended = base.extend(&[b.clone()]);
        let result = doubled(&b);
        assert_eq!(extended.eval(&[Datum::Int(1), Datum::Int(3)], &result), Datum::Int(6));
        assert_eq!(a.get(), Datum::Int(1));
        assert!(Arc::ptr_eq(&base.lock, &extended.lock));
    }

    #[test]
    fn test_check_reads_messages() {
        let slot = Arc::new(SimpleValue::new(Datum::Null));
        let evaluator = Evaluator {
            slots: vec![slot.clone()],
            lock: Arc::new(ReentrantMutex::new(())),
        };
        let positive: SettableRef = Arc::new(DerivedValue::new(
            vec![slot.clone() as SettableRef],
            Arc::new(|d: &[Datum]| Datum::Bool(d[0].as_int().is_some_and(|i| i > 0))),
        ));
        assert_eq!(evaluator.check(&[Datum::Int(1)], &positive, "no"), None);
        assert_eq!(
            evaluator.check(&[Datum::Int(0)], &positive, "no"),
            Some("no".to_string())
        );
    }
}
