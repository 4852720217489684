//! Expressions: AST, compile-time model types, interpretation and evaluation

mod ast;
mod compile;
mod eval;
mod interpret;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use compile::CompiledExpression;
pub use eval::{eval_binary, eval_cond, eval_unary};
