//! Expression AST
//!
//! Expressions arrive already built: deserialized from a declaration document
//! or constructed in code. The JSON form is externally tagged, e.g.
//! `{"binary": {"op": "mul", "left": {"name": "x"}, "right": {"lit": 2}}}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_reactive::Datum;

use crate::types::ElementType;

/// An expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expr {
    /// Literal constant
    Lit(Literal),
    /// Dotted reference into the enclosing models
    Name(String),
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Conditional
    Cond {
        /// Condition
        test: Box<Expr>,
        /// Result when the condition holds
        then: Box<Expr>,
        /// Result otherwise
        otherwise: Box<Expr>,
    },
    /// Assignment; evaluates to an action
    Assign {
        /// Settable value written to
        target: Box<Expr>,
        /// Value written
        value: Box<Expr>,
    },
    /// Collection literal
    List(Vec<Expr>),
}

/// Literal constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Text(String),
}

impl Literal {
    /// Runtime value of the literal
    pub fn to_datum(&self) -> Datum {
        match self {
            Literal::Null => Datum::Null,
            Literal::Bool(b) => Datum::Bool(*b),
            Literal::Int(i) => Datum::Int(*i),
            Literal::Float(f) => Datum::Float(*f),
            Literal::Text(s) => Datum::text(s.as_str()),
        }
    }

    /// Static type of the literal
    pub fn element_type(&self) -> ElementType {
        match self {
            Literal::Null => ElementType::Any,
            Literal::Bool(_) => ElementType::Bool,
            Literal::Int(_) => ElementType::Int,
            Literal::Float(_) => ElementType::Float,
            Literal::Text(_) => ElementType::Text,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Logical negation
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`; integer division truncates
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
    /// Text concatenation
    Concat,
}

impl UnaryOp {
    /// Operator as written in expressions
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

impl BinaryOp {
    /// Operator as written in expressions
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Concat => "++",
        }
    }

    /// Whether the operator combines numbers into a number
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    /// Whether the operator orders its operands
    pub fn is_ordering(self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }
}

// ============================================================================
// Builders
// ============================================================================

impl Expr {
    /// Reference to a dotted name path
    pub fn name(path: impl Into<String>) -> Self {
        Expr::Name(path.into())
    }

    /// The null literal
    pub fn null() -> Self {
        Expr::Lit(Literal::Null)
    }

    /// Boolean literal
    pub fn bool(value: bool) -> Self {
        Expr::Lit(Literal::Bool(value))
    }

    /// Integer literal
    pub fn int(value: i64) -> Self {
        Expr::Lit(Literal::Int(value))
    }

    /// Floating-point literal
    pub fn float(value: f64) -> Self {
        Expr::Lit(Literal::Float(value))
    }

    /// Text literal
    pub fn text(value: impl Into<String>) -> Self {
        Expr::Lit(Literal::Text(value.into()))
    }

    /// Unary operation
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Binary operation
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `test ? then : otherwise`
    pub fn cond(test: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Cond {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Assignment; evaluates to an action
    pub fn assign(target: Expr, value: Expr) -> Self {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// List of items; evaluates to a collection
    pub fn list(items: Vec<Expr>) -> Self {
        Expr::List(items)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(Literal::Null) => write!(f, "null"),
            Expr::Lit(Literal::Bool(b)) => write!(f, "{}", b),
            Expr::Lit(Literal::Int(i)) => write!(f, "{}", i),
            Expr::Lit(Literal::Float(x)) => write!(f, "{}", x),
            Expr::Lit(Literal::Text(s)) => write!(f, "{:?}", s),
            Expr::Name(path) => write!(f, "{}", path),
            Expr::Unary { op, operand } => write!(f, "{}{}", op.symbol(), operand),
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Cond {
                test,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", test, then, otherwise),
            Expr::Assign { target, value } => write!(f, "{} = {}", target, value),
            Expr::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let json = r#"{"binary": {"op": "mul", "left": {"name": "x"}, "right": {"lit": 2}}}"#;
        let expr: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(
            expr,
            Expr::binary(BinaryOp::Mul, Expr::name("x"), Expr::int(2))
        );
    }

    #[test]
    fn test_literals_deserialize_untagged() {
        let lits: Vec<Expr> =
            serde_json::from_str(r#"[{"lit": null}, {"lit": true}, {"lit": 1.5}, {"lit": "a"}]"#)
                .unwrap();
        assert_eq!(
            lits,
            vec![Expr::null(), Expr::bool(true), Expr::float(1.5), Expr::text("a")]
        );
    }

    #[test]
    fn test_display() {
        let expr = Expr::cond(
            Expr::binary(BinaryOp::Gt, Expr::name("x"), Expr::int(0)),
            Expr::name("x"),
            Expr::unary(UnaryOp::Neg, Expr::name("x")),
        );
        assert_eq!(expr.to_string(), "((x > 0) ? x : -x)");
    }
}
