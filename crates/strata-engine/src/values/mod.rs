//! Declared model values
//!
//! The element types a document declares its models with: the `models` root
//! and named sub-models, scalars, collections, maps, actions, loops, events
//! and hollow slots. Transformations live in [`crate::transform`].

mod action;
mod collection;
mod container;
mod event;
mod scalar;

pub use action::{ActionDef, ActionGroupDef, LoopDef};
pub use collection::{CollectionDef, MapDef};
pub use container::{HollowDef, ModelsDef, ModelsInterpreted, SubModelDef};
pub use event::EventDef;
pub use scalar::{ConstantDef, ValueDef};

use std::sync::Arc;
use strata_reactive::{AcceptFn, ComputeFn, Datum, DerivedValue, SettableRef};

use crate::decl::{CapabilityTag, DeclNode, ElementSpec, SourcePosition};
use crate::element::InterpretEnv;
use crate::error::{InterpretError, InterpretResult};
use crate::expr::CompiledExpression;
use crate::model::{InterpretedRef, ModelSetId};
use crate::toolkit::Toolkit;
use crate::types::{ElementType, ModelType};

/// Register every declared model value type
pub(crate) fn install(toolkit: &mut Toolkit) {
    toolkit.register(
        ElementSpec::abstract_type("model-value").capability(CapabilityTag::NAMED),
        None,
    );
    toolkit.register(
        ElementSpec::abstract_type("typed-value")
            .extends("model-value")
            .capability(CapabilityTag::TYPED),
        None,
    );
    container::register(toolkit);
    scalar::register(toolkit);
    collection::register(toolkit);
    action::register(toolkit);
    event::register(toolkit);
}

/// Implements the `ElementDef` accessors every definition shares
macro_rules! def_core {
    () => {
        fn core(&self) -> &$crate::element::DefCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut $crate::element::DefCore {
            &mut self.core
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    };
}
pub(crate) use def_core;

/// Expression attribute bound to `models`
pub(crate) fn expression(node: &DeclNode, attribute: &str, models: ModelSetId) -> Option<CompiledExpression> {
    node.expr_attr(attribute)
        .map(|expr| CompiledExpression::new(expr, models, node.position))
}

/// Rendered expression, for traceability
pub(crate) fn expression_text(expr: &Option<CompiledExpression>) -> Option<String> {
    expr.as_ref().map(|e| e.to_string())
}

/// Resolved type of an interpretation, for traceability
pub(crate) fn type_text(value: &Option<InterpretedRef>) -> Option<String> {
    value.as_ref().map(|v| v.value_type().to_string())
}

/// Fail unless the interpretation has model type `expected`
pub(crate) fn expect_model(
    value: &InterpretedRef,
    expected: ModelType,
    position: SourcePosition,
) -> InterpretResult<()> {
    let actual = value.value_type();
    if actual.model.is_a(expected) {
        Ok(())
    } else {
        Err(InterpretError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
            position,
        })
    }
}

/// Interpret an optional expression that must be a single value
pub(crate) fn interpret_value_expr(
    expr: &Option<CompiledExpression>,
    env: &mut InterpretEnv<'_>,
) -> InterpretResult<Option<InterpretedRef>> {
    match expr {
        Some(expr) => {
            let value = expr.interpret(env)?;
            expect_model(&value, ModelType::Value, expr.position())?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Declared type, else the inferred one; an unresolved result is `Any`
pub(crate) fn resolve_element(declared: Option<&ElementType>, inferred: ElementType) -> ElementType {
    match declared {
        Some(declared) => declared.clone(),
        None if inferred == ElementType::Unknown => ElementType::Any,
        None => inferred,
    }
}

/// Rejects data the element type does not accept
pub(crate) fn type_accept(ty: ElementType) -> AcceptFn {
    Arc::new(move |datum: &Datum| {
        if ty.accepts(datum) {
            None
        } else {
            Some(format!("{} is not a {}", datum.kind_name(), ty))
        }
    })
}

/// Reading of a message-or-boolean filter: `Null` and `true` allow, `false`
/// refuses with a generic message, text refuses with that text
pub(crate) fn message_of(datum: &Datum, refused: &str) -> Option<String> {
    match datum {
        Datum::Null | Datum::Bool(true) => None,
        Datum::Bool(false) => Some(refused.to_string()),
        Datum::Text(text) if text.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Disablement value over a message-or-boolean source: `Null` while enabled,
/// the message otherwise
pub(crate) fn enablement(source: SettableRef) -> SettableRef {
    let compute: ComputeFn = Arc::new(|d: &[Datum]| match message_of(&d[0], "Disabled") {
        Some(message) => Datum::text(message),
        None => Datum::Null,
    });
    Arc::new(DerivedValue::new(vec![source], compute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_reactive::{SettableValue, SimpleValue};

    #[test]
    fn test_message_or_boolean() {
        assert_eq!(message_of(&Datum::Null, "no"), None);
        assert_eq!(message_of(&Datum::Bool(true), "no"), None);
        assert_eq!(message_of(&Datum::Bool(false), "no"), Some("no".to_string()));
        assert_eq!(
            message_of(&Datum::text("Too large"), "no"),
            Some("Too large".to_string())
        );
    }

    #[test]
    fn test_enablement_follows_source() {
        let source = Arc::new(SimpleValue::new(Datum::Bool(true)));
        let enabled = enablement(source.clone());
        assert_eq!(enabled.get(), Datum::Null);
        source.set(Datum::Bool(false)).unwrap();
        assert_eq!(enabled.get(), Datum::text("Disabled"));
    }

    #[test]
    fn test_type_accept() {
        let accept = type_accept(ElementType::Int);
        assert!(accept(&Datum::Int(1)).is_none());
        assert!(accept(&Datum::Null).is_none());
        assert!(accept(&Datum::text("x")).is_some());
    }
}
