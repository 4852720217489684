//! Runtime evaluation of operators over datums
//!
//! Operations that have no defined result (a null operand, division by zero,
//! integer overflow, mismatched operands) evaluate to `Null`.

use std::cmp::Ordering;
use strata_reactive::Datum;

use super::{BinaryOp, UnaryOp};

/// Evaluate a unary operator
pub fn eval_unary(op: UnaryOp, operand: &Datum) -> Datum {
    let result = match (op, operand) {
        (UnaryOp::Neg, Datum::Int(i)) => i.checked_neg().map(Datum::Int),
        (UnaryOp::Neg, Datum::Float(f)) => Some(Datum::Float(-f)),
        (UnaryOp::Not, Datum::Bool(b)) => Some(Datum::Bool(!b)),
        _ => None,
    };
    result.unwrap_or(Datum::Null)
}

/// Evaluate a binary operator
pub fn eval_binary(op: BinaryOp, left: &Datum, right: &Datum) -> Datum {
    match op {
        BinaryOp::Eq => return Datum::Bool(left == right),
        BinaryOp::Ne => return Datum::Bool(left != right),
        BinaryOp::Concat => return concat(left, right),
        _ => {}
    }
    if left.is_null() || right.is_null() {
        return Datum::Null;
    }
    binary(op, left, right).unwrap_or(Datum::Null)
}

fn binary(op: BinaryOp, left: &Datum, right: &Datum) -> Option<Datum> {
    match (op, left, right) {
        // Integer arithmetic
        (BinaryOp::Add, Datum::Int(a), Datum::Int(b)) => a.checked_add(*b).map(Datum::Int),
        (BinaryOp::Sub, Datum::Int(a), Datum::Int(b)) => a.checked_sub(*b).map(Datum::Int),
        (BinaryOp::Mul, Datum::Int(a), Datum::Int(b)) => a.checked_mul(*b).map(Datum::Int),
        (BinaryOp::Div, Datum::Int(a), Datum::Int(b)) => a.checked_div(*b).map(Datum::Int),
        (BinaryOp::Mod, Datum::Int(a), Datum::Int(b)) => a.checked_rem(*b).map(Datum::Int),

        // Mixed and float arithmetic
        (op, a, b) if op.is_arithmetic() => float_arithmetic(op, a.as_float()?, b.as_float()?),

        // Ordering
        (op, a, b) if op.is_ordering() => ordering(a, b).map(|ord| {
            Datum::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }),

        // Boolean operations
        (BinaryOp::And, Datum::Bool(a), Datum::Bool(b)) => Some(Datum::Bool(*a && *b)),
        (BinaryOp::Or, Datum::Bool(a), Datum::Bool(b)) => Some(Datum::Bool(*a || *b)),

        _ => None,
    }
}

/// Evaluate a conditional
pub fn eval_cond(test: &Datum, then: &Datum, otherwise: &Datum) -> Datum {
    match test {
        Datum::Bool(true) => then.clone(),
        Datum::Bool(false) => otherwise.clone(),
        _ => Datum::Null,
    }
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Option<Datum> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b != 0.0 => a / b,
        BinaryOp::Mod if b != 0.0 => a % b,
        _ => return None,
    };
    Some(Datum::Float(value))
}

fn ordering(a: &Datum, b: &Datum) -> Option<Ordering> {
    match (a, b) {
        (Datum::Text(x), Datum::Text(y)) => Some(x.cmp(y)),
        (x, y) => {
            let (x, y) = (x.as_float()?, y.as_float()?);
            x.partial_cmp(&y)
        }
    }
}

fn concat(left: &Datum, right: &Datum) -> Datum {
    let text = |d: &Datum| match d {
        Datum::Null => String::new(),
        other => other.to_string(),
    };
    Datum::text(format!("{}{}", text(left), text(right)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(eval_binary(BinaryOp::Mul, &Datum::Int(5), &Datum::Int(2)), Datum::Int(10));
        assert_eq!(eval_binary(BinaryOp::Div, &Datum::Int(7), &Datum::Int(2)), Datum::Int(3));
        assert_eq!(eval_binary(BinaryOp::Mod, &Datum::Int(7), &Datum::Int(2)), Datum::Int(1));
    }

    #[test]
    fn test_undefined_results_are_null() {
        assert!(eval_binary(BinaryOp::Div, &Datum::Int(1), &Datum::Int(0)).is_null());
        assert!(eval_binary(BinaryOp::Add, &Datum::Int(i64::MAX), &Datum::Int(1)).is_null());
        assert!(eval_binary(BinaryOp::Add, &Datum::Null, &Datum::Int(1)).is_null());
        assert!(eval_unary(UnaryOp::Not, &Datum::Int(1)).is_null());
        assert!(eval_unary(UnaryOp::Neg, &Datum::Int(i64::MIN)).is_null());
    }

    #[test]
    fn test_mixed_arithmetic_widens() {
        assert_eq!(
            eval_binary(BinaryOp::Add, &Datum::Int(1), &Datum::Float(0.5)),
            Datum::Float(1.5)
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_binary(BinaryOp::Gt, &Datum::Int(5), &Datum::Int(0)), Datum::Bool(true));
        assert_eq!(eval_binary(BinaryOp::Le, &Datum::Int(-5), &Datum::Float(-5.0)), Datum::Bool(true));
        assert_eq!(
            eval_binary(BinaryOp::Lt, &Datum::text("a"), &Datum::text("b")),
            Datum::Bool(true)
        );
        assert_eq!(eval_binary(BinaryOp::Eq, &Datum::Null, &Datum::Null), Datum::Bool(true));
        assert!(eval_binary(BinaryOp::Lt, &Datum::text("a"), &Datum::Int(1)).is_null());
    }

    #[test]
    fn test_concat_and_cond() {
        assert_eq!(
            eval_binary(BinaryOp::Concat, &Datum::text("n="), &Datum::Int(3)),
            Datum::text("n=3")
        );
        assert_eq!(
            eval_cond(&Datum::Bool(false), &Datum::Int(1), &Datum::Int(2)),
            Datum::Int(2)
        );
        assert!(eval_cond(&Datum::Null, &Datum::Int(1), &Datum::Int(2)).is_null());
    }
}
