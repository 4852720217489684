//! The model value contract shared by all three lifecycle stages
//!
//! - [`CompiledModelValue`]: definition side; knows its model type once updated
//! - [`InterpretedValue`]: type-resolved; produces one instantiator
//! - [`ValueInstantiator`]: stateless producer of live values for a model instance

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

use super::{ModelInstance, ModelValue};
use crate::element::InterpretEnv;
use crate::error::{InstantiationResult, InterpretResult};
use crate::types::{ModelInstanceType, ModelType};

/// Stateless, re-entrant producer of live values
pub trait ValueInstantiator: Send + Sync {
    /// Produce the value for `models`
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue>;

    /// Re-derive `value`, produced for `source`, for `target`
    ///
    /// Returns `value` itself when nothing it depends on differs between the
    /// two instances.
    fn for_model_copy(
        &self,
        value: &ModelValue,
        source: &ModelInstance,
        target: &ModelInstance,
    ) -> InstantiationResult<ModelValue> {
        if self.is_different(source, target)? {
            self.get(target)
        } else {
            Ok(value.clone())
        }
    }

    /// Whether the value would differ between the two instances
    fn is_different(&self, _source: &ModelInstance, _target: &ModelInstance) -> InstantiationResult<bool> {
        Ok(true)
    }
}

/// Shared instantiator handle
pub type InstantiatorRef = Arc<dyn ValueInstantiator>;

/// A type-resolved model value
pub trait InterpretedValue: Send + Sync {
    /// Resolved type; never changes once computed
    fn value_type(&self) -> &ModelInstanceType;

    /// Interpretations this value is built from
    fn components(&self) -> Vec<Arc<dyn InterpretedValue>> {
        Vec::new()
    }

    /// The instantiator; every call returns the same `Arc`
    fn instantiate(&self) -> InstantiatorRef;
}

/// Shared interpretation handle
pub type InterpretedRef = Arc<dyn InterpretedValue>;

/// Definition-side view of an element producing a model value
pub trait CompiledModelValue {
    /// Model type, when it is known after update
    fn model_type(&self) -> Option<ModelType>;

    /// Resolve types and produce the interpretation
    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef>;
}

type Factory = Box<dyn Fn(&[InterpretedRef]) -> InstantiatorRef + Send + Sync>;

/// General-purpose interpretation: a resolved type, its components and a
/// factory building the instantiator on first request
pub struct InterpretedNode {
    value_type: ModelInstanceType,
    components: Vec<InterpretedRef>,
    factory: Factory,
    instantiator: OnceCell<InstantiatorRef>,
}

impl InterpretedNode {
    /// Node whose instantiator `factory` builds from the components' instantiators
    pub fn new(
        value_type: ModelInstanceType,
        components: Vec<InterpretedRef>,
        factory: impl Fn(&[InterpretedRef]) -> InstantiatorRef + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            value_type,
            components,
            factory: Box::new(factory),
            instantiator: OnceCell::new(),
        })
    }

    /// Interpretation with a fixed instantiator
    pub fn of(value_type: ModelInstanceType, instantiator: InstantiatorRef) -> Arc<Self> {
        let cell = OnceCell::new();
        let _ = cell.set(instantiator.clone());
        Arc::new(Self {
            value_type,
            components: Vec::new(),
            factory: Box::new(move |_| instantiator.clone()),
            instantiator: cell,
        })
    }
}

impl InterpretedValue for InterpretedNode {
    fn value_type(&self) -> &ModelInstanceType {
        &self.value_type
    }

    fn components(&self) -> Vec<InterpretedRef> {
        self.components.clone()
    }

    fn instantiate(&self) -> InstantiatorRef {
        self.instantiator
            .get_or_init(|| (self.factory)(&self.components))
            .clone()
    }
}

impl fmt::Debug for InterpretedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpretedNode")
            .field("value_type", &self.value_type)
            .field("components", &self.components.len())
            .finish()
    }
}

/// Whether two instantiator handles are the same object
pub fn same_instantiator(a: &InstantiatorRef, b: &InstantiatorRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_reactive::{ConstantValue, Datum};

    struct Fixed;

    impl ValueInstantiator for Fixed {
        fn get(&self, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
            Ok(ModelValue::Value(Arc::new(ConstantValue::new(Datum::Int(1)))))
        }
    }

    #[test]
    fn test_instantiate_is_stable_and_lazy() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let node = InterpretedNode::new(ModelInstanceType::value(ElementType::Int), Vec::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(Fixed) as InstantiatorRef
        });
        assert_eq!(built.load(Ordering::SeqCst), 0);
        let a = node.instantiate();
        let b = node.instantiate();
        assert!(same_instantiator(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
