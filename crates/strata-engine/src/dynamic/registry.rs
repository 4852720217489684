//! Satisfaction of dynamic values
//!
//! A dynamic value is satisfied once, either at compile time with a producer
//! or with only a type, in which case every model instance supplies its own
//! value. Misuse is a hard error rather than a diagnostic.

use tracing::debug;

use super::cache::{DeclarationCache, Declarations};
use crate::decl::Schema;
use crate::error::DynamicValueError;
use crate::model::{ComponentId, ComponentKind, ModelInstance, ModelSetId, ModelSets, ModelValue, Satisfier};
use crate::types::ModelInstanceType;

/// Entry point for dynamic value declarations and their satisfaction
#[derive(Default)]
pub struct DynamicRegistry {
    cache: DeclarationCache,
}

impl DynamicRegistry {
    /// Registry with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized declarations
    pub fn cache(&self) -> &DeclarationCache {
        &self.cache
    }

    /// Dynamic values an element type declares, memoized
    pub fn declarations(&self, schema: &Schema, element_type: &str) -> Result<Declarations, DynamicValueError> {
        self.cache.get_or_compute(schema, element_type)
    }

    /// The dynamic component `name` refers to from `set`
    pub fn get_component(&self, sets: &ModelSets, name: &str, set: ModelSetId) -> Result<ComponentId, DynamicValueError> {
        let component = sets
            .resolve(set, name)
            .ok_or_else(|| DynamicValueError::UnknownSlot {
                name: name.to_string(),
            })?;
        if component.kind != ComponentKind::Dynamic {
            return Err(DynamicValueError::NotDynamic {
                name: name.to_string(),
            });
        }
        Ok(component.id)
    }

    /// Fix the producer of a dynamic value
    ///
    /// Satisfying again with an equal producer is a no-op. With
    /// `ignore_if_satisfied`, an unequal producer is ignored instead of
    /// failing.
    pub fn satisfy(
        &self,
        sets: &ModelSets,
        name: &str,
        set: ModelSetId,
        producer: Satisfier,
        ignore_if_satisfied: bool,
    ) -> Result<(), DynamicValueError> {
        let id = self.get_component(sets, name, set)?;
        let result = sets.update_dynamic(id, |state| {
            if state.producer.is_none() && state.satisfied_type.is_some() {
                return Err(DynamicValueError::WrongVariant {
                    name: name.to_string(),
                    message: "its type was fixed for per-instance satisfaction".to_string(),
                });
            }
            match &state.producer {
                Some(existing) if *existing == producer => Ok(()),
                Some(_) if ignore_if_satisfied => Ok(()),
                Some(_) => Err(DynamicValueError::AlreadySatisfied {
                    name: name.to_string(),
                }),
                None => {
                    debug!(name, "dynamic value satisfied with a producer");
                    state.producer = Some(producer);
                    Ok(())
                }
            }
        });
        result.unwrap_or_else(|| {
            Err(DynamicValueError::NotDynamic {
                name: name.to_string(),
            })
        })
    }

    /// Fix only the type; each model instance then supplies the value
    pub fn satisfy_type(
        &self,
        sets: &ModelSets,
        name: &str,
        set: ModelSetId,
        ty: ModelInstanceType,
    ) -> Result<(), DynamicValueError> {
        let id = self.get_component(sets, name, set)?;
        let result = sets.update_dynamic(id, |state| {
            if state.producer.is_some() {
                return Err(DynamicValueError::WrongVariant {
                    name: name.to_string(),
                    message: "it is already satisfied with a producer".to_string(),
                });
            }
            if let Some(declared) = &state.declared {
                if !ty.is_assignable_to(declared) {
                    return Err(DynamicValueError::TypeMismatch {
                        name: name.to_string(),
                        expected: declared.to_string(),
                        actual: ty.to_string(),
                    });
                }
            }
            match &state.satisfied_type {
                Some(existing) if *existing == ty => Ok(()),
                Some(_) => Err(DynamicValueError::AlreadySatisfied {
                    name: name.to_string(),
                }),
                None => {
                    debug!(name, ty = %ty, "dynamic value type fixed");
                    state.satisfied_type = Some(ty);
                    Ok(())
                }
            }
        });
        result.unwrap_or_else(|| {
            Err(DynamicValueError::NotDynamic {
                name: name.to_string(),
            })
        })
    }

    /// Whether `models` (or an enclosing instance) holds a value of type `ty`
    /// for the slot `name`
    pub fn is_satisfied(&self, name: &str, ty: &ModelInstanceType, models: &ModelInstance) -> bool {
        match find_slot(name, models) {
            Ok((instance, id)) => {
                instance.has_pending(id)
                    || instance
                        .bound_value(id)
                        .is_some_and(|value| value.conforms_to(ty))
            }
            Err(_) => false,
        }
    }

    /// Supply the value of a slot for one model instance
    ///
    /// The instance must still be building. Supplying the identical value
    /// again is a no-op; any other value fails.
    pub fn satisfy_instance_value(
        &self,
        name: &str,
        ty: &ModelInstanceType,
        models: &ModelInstance,
        value: ModelValue,
    ) -> Result<(), DynamicValueError> {
        let (instance, id) = find_slot(name, models)?;
        if instance.is_sealed() {
            return Err(DynamicValueError::Sealed {
                name: name.to_string(),
            });
        }
        if instance.has_pending(id) {
            return Err(DynamicValueError::WrongVariant {
                name: name.to_string(),
                message: "it is satisfied with a producer".to_string(),
            });
        }
        let declared = instance
            .layout()
            .dynamic_slot(id)
            .and_then(|(_, declared)| declared.cloned());
        if let Some(declared) = declared {
            if !ty.is_assignable_to(&declared) {
                return Err(DynamicValueError::TypeMismatch {
                    name: name.to_string(),
                    expected: declared.to_string(),
                    actual: ty.to_string(),
                });
            }
        }
        if !value.conforms_to(ty) {
            return Err(DynamicValueError::TypeMismatch {
                name: name.to_string(),
                expected: ty.to_string(),
                actual: value.kind().to_string(),
            });
        }
        if let Some(existing) = instance.bound_value(id) {
            return if existing.ptr_eq(&value) {
                Ok(())
            } else {
                Err(DynamicValueError::AlreadySatisfied {
                    name: name.to_string(),
                })
            };
        }
        instance.bind(id, value).map_err(|_| DynamicValueError::Sealed {
            name: name.to_string(),
        })
    }
}

/// Innermost instance declaring `name` as a dynamic slot
fn find_slot<'m>(name: &str, models: &'m ModelInstance) -> Result<(&'m ModelInstance, ComponentId), DynamicValueError> {
    let mut current = Some(models);
    while let Some(instance) = current {
        if let Some(id) = instance.layout().id_of(name) {
            if instance.layout().dynamic_slot(id).is_none() {
                return Err(DynamicValueError::NotDynamic {
                    name: name.to_string(),
                });
            }
            return Ok((instance, id));
        }
        current = instance.parent();
    }
    Err(DynamicValueError::UnknownSlot {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::SourcePosition;
    use crate::element::ElementId;
    use crate::expr::Expr;
    use crate::model::{DynamicState, ModelLayout};
    use crate::types::ElementType;
    use std::sync::Arc;
    use strata_reactive::{Lifespan, SimpleValue};

    fn int_value() -> ModelInstanceType {
        ModelInstanceType::value(ElementType::Int)
    }

    fn sets_with_slot() -> (ModelSets, ModelSetId) {
        let mut sets = ModelSets::new();
        let root = sets.create_root();
        sets.declare_dynamic(root, SourcePosition::default(), DynamicState::new("slot", Some(int_value())))
            .unwrap();
        sets.declare(root, "plain", SourcePosition::default(), ComponentKind::Element(ElementId(0)))
            .unwrap();
        (sets, root)
    }

    fn producer(n: i64) -> Satisfier {
        Satisfier::Expression {
            expr: Arc::new(Expr::int(n)),
            models: ModelSetId(0),
            position: SourcePosition::default(),
        }
    }

    // ── Compile-time satisfaction ───────────────────────────────────────

    #[test]
    fn test_satisfy_is_idempotent_for_equal_producers() {
        let (sets, root) = sets_with_slot();
        let registry = DynamicRegistry::new();
        let id = registry.get_component(&sets, "slot", root).unwrap();
        assert!(!sets.dynamic(id).unwrap().is_satisfied());

        registry.satisfy(&sets, "slot", root, producer(1), false).unwrap();
        registry.satisfy(&sets, "slot", root, producer(1), false).unwrap();
        assert!(sets.dynamic(id).unwrap().is_satisfied());

        let err = registry.satisfy(&sets, "slot", root, producer(2), false).unwrap_err();
        assert!(matches!(err, DynamicValueError::AlreadySatisfied { .. }));
        registry.satisfy(&sets, "slot", root, producer(2), true).unwrap();
        assert_eq!(sets.dynamic(id).unwrap().producer, Some(producer(1)));
    }

    #[test]
    fn test_wrong_variants() {
        let (sets, root) = sets_with_slot();
        let registry = DynamicRegistry::new();
        registry.satisfy_type(&sets, "slot", root, int_value()).unwrap();
        let err = registry.satisfy(&sets, "slot", root, producer(1), false).unwrap_err();
        assert!(matches!(err, DynamicValueError::WrongVariant { .. }));

        let (sets, root) = sets_with_slot();
        registry.satisfy(&sets, "slot", root, producer(1), false).unwrap();
        let err = registry.satisfy_type(&sets, "slot", root, int_value()).unwrap_err();
        assert!(matches!(err, DynamicValueError::WrongVariant { .. }));
    }

    #[test]
    fn test_satisfy_type_checks_declared_type() {
        let (sets, root) = sets_with_slot();
        let registry = DynamicRegistry::new();
        let err = registry
            .satisfy_type(&sets, "slot", root, ModelInstanceType::value(ElementType::Text))
            .unwrap_err();
        assert!(matches!(err, DynamicValueError::TypeMismatch { .. }));
    }

    #[test]
    fn test_lookup_errors() {
        let (sets, root) = sets_with_slot();
        let registry = DynamicRegistry::new();
        assert!(matches!(
            registry.get_component(&sets, "missing", root),
            Err(DynamicValueError::UnknownSlot { .. })
        ));
        assert!(matches!(
            registry.get_component(&sets, "plain", root),
            Err(DynamicValueError::NotDynamic { .. })
        ));
    }

    // ── Instance satisfaction ───────────────────────────────────────────

    fn instance() -> ModelInstance {
        let mut layout = ModelLayout::new(ModelSetId(0), "");
        layout.add_dynamic("slot", ComponentId(0), Some(int_value()), true);
        ModelInstance::new(Arc::new(layout), None, Lifespan::new())
    }

    fn value(n: i64) -> ModelValue {
        ModelValue::Value(Arc::new(SimpleValue::new(n.into())))
    }

    #[test]
    fn test_instance_value_once() {
        let registry = DynamicRegistry::new();
        let models = instance();
        assert!(!registry.is_satisfied("slot", &int_value(), &models));

        let v = value(3);
        registry
            .satisfy_instance_value("slot", &int_value(), &models, v.clone())
            .unwrap();
        assert!(registry.is_satisfied("slot", &int_value(), &models));
        registry
            .satisfy_instance_value("slot", &int_value(), &models, v)
            .unwrap();
        let err = registry
            .satisfy_instance_value("slot", &int_value(), &models, value(4))
            .unwrap_err();
        assert!(matches!(err, DynamicValueError::AlreadySatisfied { .. }));
    }

    #[test]
    fn test_instance_value_rejected_after_seal() {
        let registry = DynamicRegistry::new();
        let models = instance();
        models.seal();
        let err = registry
            .satisfy_instance_value("slot", &int_value(), &models, value(1))
            .unwrap_err();
        assert!(matches!(err, DynamicValueError::Sealed { .. }));
    }

    #[test]
    fn test_instance_value_wrong_model_type() {
        let registry = DynamicRegistry::new();
        let err = registry
            .satisfy_instance_value(
                "slot",
                &ModelInstanceType::action(),
                &instance(),
                value(1),
            )
            .unwrap_err();
        assert!(matches!(err, DynamicValueError::TypeMismatch { .. }));
    }
}
