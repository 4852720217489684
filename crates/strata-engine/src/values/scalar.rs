//! `constant` and `value`

use std::sync::Arc;
use strata_reactive::{AcceptFn, ConstantValue, Datum, SimpleValue};

use super::{def_core, expression, expression_text, interpret_value_expr, resolve_element, type_accept, type_text};
use crate::decl::{AttributeKind, DeclNode, ElementSpec};
use crate::element::{DefCore, ElementDef, InterpretEnv, UpdateSession, ValueInterpreted};
use crate::error::{CompileError, CompileResult, InstantiationResult, InterpretError, InterpretResult};
use crate::expr::CompiledExpression;
use crate::model::{
    CompiledModelValue, InstantiatorRef, InterpretedNode, InterpretedRef, ModelInstance, ModelValue,
    ValueInstantiator,
};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{ElementType, ModelInstanceType, ModelType};

pub(super) fn register(toolkit: &mut Toolkit) {
    toolkit.register(
        ElementSpec::new("constant")
            .extends("typed-value")
            .required("value", AttributeKind::Expression),
        Some(|core| Box::new(ConstantDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register(
        ElementSpec::new("value")
            .extends("typed-value")
            .attribute("init", AttributeKind::Expression)
            .attribute("value", AttributeKind::Expression),
        Some(|core| Box::new(ValueDef::new(core)) as Box<dyn ElementDef>),
    );

    toolkit.register_trace(
        TraceTable::builder::<ConstantDef, ValueInterpreted>("constant")
            .named()
            .typed()
            .attribute("value", |d| expression_text(&d.value), |i| type_text(&i.value()))
            .value(|d| expression_text(&d.value), |i| type_text(&i.value()))
            .build(),
    );
    toolkit.register_trace(
        TraceTable::builder::<ValueDef, ValueInterpreted>("value")
            .named()
            .typed()
            .attribute("init", |d| expression_text(&d.init), |_| None)
            .attribute("value", |d| expression_text(&d.value), |i| type_text(&i.value()))
            .value(
                |d| expression_text(if d.value.is_some() { &d.value } else { &d.init }),
                |i| type_text(&i.value()),
            )
            .build(),
    );
}

/// Element type for a value: the declared one must accept what the
/// expression produces
fn checked_element(
    declared: Option<&ElementType>,
    value: &InterpretedRef,
    position: crate::decl::SourcePosition,
) -> InterpretResult<ElementType> {
    let inferred = value.value_type().element().clone();
    if let Some(declared) = declared {
        if !inferred.is_assignable_to(declared) {
            return Err(InterpretError::mismatch(declared, &inferred, position));
        }
    }
    Ok(resolve_element(declared, inferred))
}

// ============================================================================
// constant
// ============================================================================

/// A value computed once per model instance and never changed
pub struct ConstantDef {
    core: DefCore,
    value: Option<CompiledExpression>,
}

impl ConstantDef {
    /// Definition with no value yet
    pub fn new(core: DefCore) -> Self {
        Self { core, value: None }
    }
}

impl ElementDef for ConstantDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.value = expression(node, "value", self.core.content_models());
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for ConstantDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(ModelType::Value)
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let value = interpret_value_expr(&self.value, env)?
            .ok_or_else(|| InterpretError::internal("constant without a value", self.core.position))?;
        let element = checked_element(self.core.declared_type(), &value, self.core.position)?;
        Ok(InterpretedNode::new(
            ModelInstanceType::value(element),
            vec![value],
            |c: &[InterpretedRef]| {
                Arc::new(ConstantInstantiator {
                    source: c[0].instantiate(),
                }) as InstantiatorRef
            },
        ))
    }
}

struct ConstantInstantiator {
    source: InstantiatorRef,
}

impl ValueInstantiator for ConstantInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let datum = self.source.get(models)?.into_value()?.get();
        Ok(ModelValue::Value(Arc::new(ConstantValue::new(datum))))
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        self.source.is_different(source, target)
    }
}

// ============================================================================
// value
// ============================================================================

/// A settable value: fresh with `init`, or bound to another value with `value`
pub struct ValueDef {
    core: DefCore,
    init: Option<CompiledExpression>,
    value: Option<CompiledExpression>,
}

impl ValueDef {
    /// Definition with no initializer yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            init: None,
            value: None,
        }
    }
}

impl ElementDef for ValueDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        if node.has_attribute("init") && node.has_attribute("value") {
            return Err(CompileError::MalformedAttribute {
                attribute: "init".to_string(),
                message: "'init' and 'value' cannot both be given".to_string(),
                position: node.position,
            });
        }
        let models = self.core.content_models();
        self.init = expression(node, "init", models);
        self.value = expression(node, "value", models);
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for ValueDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(ModelType::Value)
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let declared = self.core.declared_type();
        if let Some(bound) = interpret_value_expr(&self.value, env)? {
            checked_element(declared, &bound, self.core.position)?;
            return Ok(bound);
        }

        let init = interpret_value_expr(&self.init, env)?;
        let element = match &init {
            Some(init) => checked_element(declared, init, self.core.position)?,
            None => resolve_element(declared, ElementType::Unknown),
        };
        let accept = type_accept(element.clone());
        Ok(InterpretedNode::new(
            ModelInstanceType::value(element),
            init.into_iter().collect(),
            move |c: &[InterpretedRef]| {
                Arc::new(FreshValueInstantiator {
                    init: c.first().map(|i| i.instantiate()),
                    accept: accept.clone(),
                }) as InstantiatorRef
            },
        ))
    }
}

/// Creates a new settable value per model instance
struct FreshValueInstantiator {
    init: Option<InstantiatorRef>,
    accept: AcceptFn,
}

impl ValueInstantiator for FreshValueInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let initial = match &self.init {
            Some(init) => init.get(models)?.into_value()?.get(),
            None => Datum::Null,
        };
        Ok(ModelValue::Value(Arc::new(SimpleValue::with_accept(
            initial,
            self.accept.clone(),
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelLayout, ModelSets};
    use strata_reactive::{Lifespan, SettableValue};

    struct Fixed(i64);

    impl ValueInstantiator for Fixed {
        fn get(&self, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
            Ok(ModelValue::Value(Arc::new(SimpleValue::new(Datum::Int(self.0)))))
        }
    }

    fn empty_instance() -> ModelInstance {
        let set = ModelSets::new().create_root();
        ModelInstance::new(Arc::new(ModelLayout::new(set, "")), None, Lifespan::new())
    }

    #[test]
    fn test_constant_snapshots_its_source() {
        let models = empty_instance();
        let constant = ConstantInstantiator {
            source: Arc::new(Fixed(3)),
        };
        let value = constant.get(&models).unwrap().into_value().unwrap();
        assert_eq!(value.get(), Datum::Int(3));
        assert!(value.set(Datum::Int(4)).is_err());
    }

    #[test]
    fn test_fresh_value_is_new_per_instance() {
        let models = empty_instance();
        let fresh = FreshValueInstantiator {
            init: Some(Arc::new(Fixed(1))),
            accept: type_accept(ElementType::Int),
        };
        let a = fresh.get(&models).unwrap();
        let b = fresh.get(&models).unwrap();
        assert!(!a.ptr_eq(&b));

        let a = a.into_value().unwrap();
        a.set(Datum::Int(7)).unwrap();
        assert_eq!(a.get(), Datum::Int(7));
        assert!(a.set(Datum::text("x")).is_err());
        assert!(fresh.is_different(&models, &empty_instance()).unwrap());
    }
}
