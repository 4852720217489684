//! Type checking of expressions and the instantiators they produce

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use strata_reactive::{
    ComputeFn, ConstantValue, Datum, DerivedCollection, DerivedValue, FnAction, ReactiveResult,
    SettableRef, SettableValue,
};

use super::eval::{eval_binary, eval_cond, eval_unary};
use super::{BinaryOp, Expr, UnaryOp};
use crate::decl::SourcePosition;
use crate::element::InterpretEnv;
use crate::error::{InstantiationResult, InterpretError, InterpretResult};
use crate::model::{
    InstantiatorRef, InterpretedNode, InterpretedRef, ModelInstance, ModelSetId, ModelValue,
    ValueInstantiator,
};
use crate::types::{ElementType, ModelInstanceType, ModelType};

pub(crate) fn interpret_expr(
    expr: &Expr,
    models: ModelSetId,
    position: SourcePosition,
    env: &mut InterpretEnv<'_>,
) -> InterpretResult<InterpretedRef> {
    match expr {
        Expr::Lit(literal) => Ok(InterpretedNode::of(
            ModelInstanceType::value(literal.element_type()),
            Arc::new(LiteralInstantiator(literal.to_datum())),
        )),

        Expr::Name(path) => {
            let id = env
                .document
                .model_sets()
                .resolve(models, path)
                .map(|c| c.id)
                .ok_or_else(|| InterpretError::UnresolvedName {
                    name: path.clone(),
                    position,
                })?;
            env.reference(id, position)
        }

        Expr::Unary { op, operand } => {
            let operand = interpret_expr(operand, models, position, env)?;
            let ty = unary_type(*op, value_element(&operand, op.symbol(), position)?, position)?;
            let op = *op;
            Ok(derived(ty, vec![operand], Arc::new(move |d: &[Datum]| eval_unary(op, &d[0]))))
        }

        Expr::Binary { op, left, right } => {
            let left = interpret_expr(left, models, position, env)?;
            let right = interpret_expr(right, models, position, env)?;
            let ty = binary_type(
                *op,
                value_element(&left, op.symbol(), position)?,
                value_element(&right, op.symbol(), position)?,
                position,
            )?;
            let op = *op;
            Ok(derived(
                ty,
                vec![left, right],
                Arc::new(move |d: &[Datum]| eval_binary(op, &d[0], &d[1])),
            ))
        }

        Expr::Cond {
            test,
            then,
            otherwise,
        } => {
            let test = interpret_expr(test, models, position, env)?;
            let then = interpret_expr(then, models, position, env)?;
            let otherwise = interpret_expr(otherwise, models, position, env)?;
            let test_type = value_element(&test, "?:", position)?;
            if !test_type.is_open() && *test_type != ElementType::Bool {
                return Err(invalid("?:", test_type, position));
            }
            let ty = value_element(&then, "?:", position)?.unify(value_element(&otherwise, "?:", position)?);
            Ok(derived(
                ty,
                vec![test, then, otherwise],
                Arc::new(|d: &[Datum]| eval_cond(&d[0], &d[1], &d[2])),
            ))
        }

        Expr::Assign { target, value } => {
            let Expr::Name(_) = target.as_ref() else {
                return Err(InterpretError::InvalidOperand {
                    op: "=".to_string(),
                    operand: "a non-name target".to_string(),
                    position,
                });
            };
            let target = interpret_expr(target, models, position, env)?;
            let value = interpret_expr(value, models, position, env)?;
            let target_type = value_element(&target, "=", position)?;
            let value_type = value_element(&value, "=", position)?;
            if !value_type.is_assignable_to(target_type) {
                return Err(InterpretError::mismatch(target_type, value_type, position));
            }
            Ok(InterpretedNode::new(
                ModelInstanceType::action(),
                vec![target, value],
                |c: &[InterpretedRef]| {
                    Arc::new(AssignInstantiator {
                        target: c[0].instantiate(),
                        value: c[1].instantiate(),
                    }) as InstantiatorRef
                },
            ))
        }

        Expr::List(items) => {
            let mut element = ElementType::Unknown;
            let mut components = Vec::with_capacity(items.len());
            for item in items {
                let item = interpret_expr(item, models, position, env)?;
                element = element.unify(value_element(&item, "[]", position)?);
                components.push(item);
            }
            Ok(InterpretedNode::new(
                ModelInstanceType::collection(ModelType::Collection, element),
                components,
                |c: &[InterpretedRef]| {
                    Arc::new(ListInstantiator {
                        items: c.iter().map(|i| i.instantiate()).collect(),
                    }) as InstantiatorRef
                },
            ))
        }
    }
}

fn invalid(op: &str, operand: impl fmt::Display, position: SourcePosition) -> InterpretError {
    InterpretError::InvalidOperand {
        op: op.to_string(),
        operand: operand.to_string(),
        position,
    }
}

/// Element type of an operand, which must be a single value
fn value_element<'a>(operand: &'a InterpretedRef, op: &str, position: SourcePosition) -> InterpretResult<&'a ElementType> {
    let ty = operand.value_type();
    if ty.model != ModelType::Value {
        return Err(invalid(op, ty, position));
    }
    Ok(ty.element())
}

fn unary_type(op: UnaryOp, operand: &ElementType, position: SourcePosition) -> InterpretResult<ElementType> {
    match op {
        UnaryOp::Neg if operand.is_numeric() || operand.is_open() => Ok(operand.clone()),
        UnaryOp::Not if *operand == ElementType::Bool || operand.is_open() => Ok(ElementType::Bool),
        _ => Err(invalid(op.symbol(), operand, position)),
    }
}

fn binary_type(
    op: BinaryOp,
    left: &ElementType,
    right: &ElementType,
    position: SourcePosition,
) -> InterpretResult<ElementType> {
    let numeric = |t: &ElementType| t.is_numeric() || t.is_open();
    let fail = || invalid(op.symbol(), format!("{} and {}", left, right), position);
    match op {
        op if op.is_arithmetic() => match (left, right) {
            (ElementType::Int, ElementType::Int) => Ok(ElementType::Int),
            (l, r) if l.is_open() || r.is_open() => {
                if numeric(l) && numeric(r) {
                    Ok(ElementType::Any)
                } else {
                    Err(fail())
                }
            }
            (l, r) if l.is_numeric() && r.is_numeric() => Ok(ElementType::Float),
            _ => Err(fail()),
        },
        BinaryOp::Eq | BinaryOp::Ne => Ok(ElementType::Bool),
        op if op.is_ordering() => {
            let text = |t: &ElementType| *t == ElementType::Text || t.is_open();
            if (numeric(left) && numeric(right)) || (text(left) && text(right)) {
                Ok(ElementType::Bool)
            } else {
                Err(fail())
            }
        }
        BinaryOp::And | BinaryOp::Or => {
            let boolean = |t: &ElementType| *t == ElementType::Bool || t.is_open();
            if boolean(left) && boolean(right) {
                Ok(ElementType::Bool)
            } else {
                Err(fail())
            }
        }
        _ => Ok(ElementType::Text),
    }
}

fn derived(element: ElementType, operands: Vec<InterpretedRef>, compute: ComputeFn) -> InterpretedRef {
    InterpretedNode::new(ModelInstanceType::value(element), operands, move |c: &[InterpretedRef]| {
        Arc::new(DerivedInstantiator {
            operands: c.iter().map(|o| o.instantiate()).collect(),
            compute: compute.clone(),
        }) as InstantiatorRef
    })
}

fn any_different(parts: &[InstantiatorRef], source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
    for part in parts {
        if part.is_different(source, target)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn values_of(parts: &[InstantiatorRef], models: &ModelInstance) -> InstantiationResult<Vec<SettableRef>> {
    parts
        .iter()
        .map(|p| p.get(models)?.into_value())
        .collect()
}

// ============================================================================
// Instantiators
// ============================================================================

struct LiteralInstantiator(Datum);

impl ValueInstantiator for LiteralInstantiator {
    fn get(&self, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
        Ok(ModelValue::Value(Arc::new(ConstantValue::new(self.0.clone()))))
    }

    fn is_different(&self, _source: &ModelInstance, _target: &ModelInstance) -> InstantiationResult<bool> {
        Ok(false)
    }
}

struct DerivedInstantiator {
    operands: Vec<InstantiatorRef>,
    compute: ComputeFn,
}

impl ValueInstantiator for DerivedInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let sources = values_of(&self.operands, models)?;
        Ok(ModelValue::Value(Arc::new(DerivedValue::new(sources, self.compute.clone()))))
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        any_different(&self.operands, source, target)
    }
}

struct AssignInstantiator {
    target: InstantiatorRef,
    value: InstantiatorRef,
}

impl ValueInstantiator for AssignInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let target = self.target.get(models)?.into_value()?;
        let value = self.value.get(models)?.into_value()?;
        let enablement: SettableRef = Arc::new(SettableMessage(target.clone()));
        let act = move || -> ReactiveResult<()> {
            target.set(value.get())?;
            Ok(())
        };
        Ok(ModelValue::Action(Arc::new(
            FnAction::new(Arc::new(act)).with_enablement(enablement),
        )))
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        Ok(self.target.is_different(source, target)? || self.value.is_different(source, target)?)
    }
}

struct ListInstantiator {
    items: Vec<InstantiatorRef>,
}

impl ValueInstantiator for ListInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let values = values_of(&self.items, models)?;
        Ok(ModelValue::Collection(Arc::new(DerivedCollection::new(values))))
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        any_different(&self.items, source, target)
    }
}

/// Why a value cannot be set, as a value; `Null` while it can
#[derive(Debug)]
struct SettableMessage(SettableRef);

impl SettableValue for SettableMessage {
    fn get(&self) -> Datum {
        self.0.is_enabled().map(Datum::from).unwrap_or(Datum::Null)
    }

    fn stamp(&self) -> u64 {
        self.0.stamp()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
