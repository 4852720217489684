//! Dynamically typed element values
//!
//! Every reactive container carries `Datum`s. Nested containers are carried by
//! reference so that values of values and collections of collections can be
//! flattened.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::collection::{CollectionRef, ObservableCollection};
use crate::value::{SettableRef, SettableValue};

/// A single element value
#[derive(Clone, Debug, Default)]
pub enum Datum {
    /// Absent value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Immutable text
    Text(Arc<str>),
    /// A nested reactive value
    Value(SettableRef),
    /// A nested reactive collection
    Collection(CollectionRef),
}

impl Datum {
    /// Create a text datum
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Datum::Text(text.into())
    }

    /// Whether this is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Boolean content, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Datum::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric content widened to a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text content, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Datum::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Short name of the runtime kind, for messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "bool",
            Datum::Int(_) => "int",
            Datum::Float(_) => "float",
            Datum::Text(_) => "string",
            Datum::Value(_) => "value",
            Datum::Collection(_) => "collection",
        }
    }

    /// Total order used by sorted containers
    ///
    /// Null sorts first, then booleans, numbers, text and finally nested
    /// containers (which compare equal to each other).
    pub fn compare(&self, other: &Datum) -> Ordering {
        fn rank(d: &Datum) -> u8 {
            match d {
                Datum::Null => 0,
                Datum::Bool(_) => 1,
                Datum::Int(_) | Datum::Float(_) => 2,
                Datum::Text(_) => 3,
                Datum::Value(_) | Datum::Collection(_) => 4,
            }
        }
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::Text(a), Datum::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Null, Datum::Null) => true,
            (Datum::Bool(a), Datum::Bool(b)) => a == b,
            (Datum::Int(a), Datum::Int(b)) => a == b,
            (Datum::Float(a), Datum::Float(b)) => a == b,
            (Datum::Int(a), Datum::Float(b)) | (Datum::Float(b), Datum::Int(a)) => {
                (*a as f64) == *b
            }
            (Datum::Text(a), Datum::Text(b)) => a == b,
            (Datum::Value(a), Datum::Value(b)) => Arc::ptr_eq(a, b),
            (Datum::Collection(a), Datum::Collection(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "null"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Float(x) => write!(f, "{}", x),
            Datum::Text(t) => write!(f, "{}", t),
            Datum::Value(v) => write!(f, "{}", v.get()),
            Datum::Collection(c) => {
                write!(f, "[")?;
                for (i, element) in c.elements().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Bool(value)
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Int(value)
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Datum::Float(value)
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::text(value)
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::text(value)
    }
}
