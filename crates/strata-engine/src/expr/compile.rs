//! Expressions bound to the models they resolve in

use std::fmt;
use std::sync::Arc;

use super::interpret::interpret_expr;
use super::Expr;
use crate::decl::SourcePosition;
use crate::element::{InterpretEnv, UpdateSession};
use crate::error::{CompileError, CompileResult, InterpretError, InterpretResult};
use crate::model::{ComponentId, ComponentKind, InterpretedRef, ModelSetId, ModelSets, Satisfier};
use crate::types::{ModelInstanceType, ModelType};

const MAX_REFERENCE_DEPTH: usize = 64;

/// An expression plus the model set its names resolve in
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    expr: Arc<Expr>,
    models: ModelSetId,
    position: SourcePosition,
}

impl CompiledExpression {
    /// Expression bound to the model set it is evaluated against
    pub fn new(expr: Arc<Expr>, models: ModelSetId, position: SourcePosition) -> Self {
        Self {
            expr,
            models,
            position,
        }
    }

    /// The parsed expression
    pub fn expr(&self) -> &Arc<Expr> {
        &self.expr
    }

    /// Model set names resolve against
    pub fn models(&self) -> ModelSetId {
        self.models
    }

    /// Where the expression was declared
    pub fn position(&self) -> SourcePosition {
        self.position
    }

    /// Component a plain name expression refers to
    pub fn component(&self, sets: &ModelSets) -> Option<ComponentId> {
        match self.expr.as_ref() {
            Expr::Name(path) => sets.resolve(self.models, path).map(|c| c.id),
            _ => None,
        }
    }

    /// Model type of the expression, known before interpretation
    ///
    /// Names are followed to the element or dynamic value they refer to;
    /// elements not updated yet are updated on demand.
    pub fn model_type(&self, session: &mut UpdateSession<'_>) -> CompileResult<ModelType> {
        model_type_of(&self.expr, self.models, self.position, session, 0)
    }

    /// Resolve types and produce the interpretation
    pub fn interpret(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        interpret_expr(&self.expr, self.models, self.position, env)
    }

    /// Interpret and check the result against `expected`
    pub fn interpret_as(&self, env: &mut InterpretEnv<'_>, expected: &ModelInstanceType) -> InterpretResult<InterpretedRef> {
        let interpreted = self.interpret(env)?;
        if !interpreted.value_type().is_assignable_to(expected) {
            return Err(InterpretError::mismatch(expected, interpreted.value_type(), self.position));
        }
        Ok(interpreted)
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

fn model_type_of(
    expr: &Expr,
    models: ModelSetId,
    position: SourcePosition,
    session: &mut UpdateSession<'_>,
    depth: usize,
) -> CompileResult<ModelType> {
    let path = match expr {
        Expr::Lit(_) | Expr::Unary { .. } | Expr::Binary { .. } | Expr::Cond { .. } => {
            return Ok(ModelType::Value)
        }
        Expr::Assign { .. } => return Ok(ModelType::Action),
        Expr::List(_) => return Ok(ModelType::Collection),
        Expr::Name(path) => path,
    };
    let unresolved = || CompileError::UnresolvedModelType {
        name: path.clone(),
        position,
    };
    if depth > MAX_REFERENCE_DEPTH {
        return Err(unresolved());
    }

    let (id, kind) = session
        .document
        .model_sets()
        .resolve(models, path)
        .map(|c| (c.id, c.kind))
        .ok_or_else(|| CompileError::UnresolvedName {
            name: path.clone(),
            position,
        })?;
    match kind {
        ComponentKind::Element(element) => session.model_type_of(element)?.ok_or_else(unresolved),
        ComponentKind::SubModel(_) => Err(unresolved()),
        ComponentKind::Dynamic => {
            let state = session.document.model_sets().dynamic(id).ok_or_else(unresolved)?;
            match state.producer {
                Some(Satisfier::Expression { expr, models, position }) => {
                    model_type_of(&expr, models, position, session, depth + 1)
                }
                Some(Satisfier::Element(element)) => {
                    session.model_type_of(element)?.ok_or_else(unresolved)
                }
                None => state.effective_type().map(|t| t.model).ok_or_else(unresolved),
            }
        }
    }
}
