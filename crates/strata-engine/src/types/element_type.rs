//! Element types and the two-part model instance type descriptor

use std::fmt;
use strata_reactive::Datum;

use super::ModelType;

/// Type of the elements a model value carries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Not resolved yet; matches anything
    Unknown,
    /// Top type
    Any,
    /// No content
    Void,
    /// `bool`
    Bool,
    /// `int`, 64-bit
    Int,
    /// `float`, 64-bit
    Float,
    /// `string`
    Text,
    /// Nested model values
    Model(Box<ModelInstanceType>),
}

impl ElementType {
    /// Nested model type
    pub fn model(inner: ModelInstanceType) -> Self {
        ElementType::Model(Box::new(inner))
    }

    /// Whether a value of this type may be stored where `target` is expected
    pub fn is_assignable_to(&self, target: &ElementType) -> bool {
        match (self, target) {
            (ElementType::Unknown, _) | (_, ElementType::Unknown) => true,
            (_, ElementType::Any) => true,
            (ElementType::Int, ElementType::Float) => true,
            (ElementType::Model(a), ElementType::Model(b)) => a.is_assignable_to(b),
            (a, b) => a == b,
        }
    }

    /// Whether a runtime datum conforms to this type
    ///
    /// `Null` conforms to every type.
    pub fn accepts(&self, datum: &Datum) -> bool {
        match (self, datum) {
            (_, Datum::Null) => true,
            (ElementType::Unknown | ElementType::Any, _) => true,
            (ElementType::Bool, Datum::Bool(_)) => true,
            (ElementType::Int, Datum::Int(_)) => true,
            (ElementType::Float, Datum::Int(_) | Datum::Float(_)) => true,
            (ElementType::Text, Datum::Text(_)) => true,
            (ElementType::Model(t), Datum::Value(_)) => t.model == ModelType::Value,
            (ElementType::Model(t), Datum::Collection(_)) => t.model.is_collection(),
            _ => false,
        }
    }

    /// Type of a runtime datum
    pub fn of_datum(datum: &Datum) -> ElementType {
        match datum {
            Datum::Null => ElementType::Any,
            Datum::Bool(_) => ElementType::Bool,
            Datum::Int(_) => ElementType::Int,
            Datum::Float(_) => ElementType::Float,
            Datum::Text(_) => ElementType::Text,
            Datum::Value(_) => ElementType::model(ModelInstanceType::value(ElementType::Unknown)),
            Datum::Collection(_) => ElementType::model(ModelInstanceType::collection(
                ModelType::Collection,
                ElementType::Unknown,
            )),
        }
    }

    /// Whether arithmetic applies
    pub fn is_numeric(&self) -> bool {
        matches!(self, ElementType::Int | ElementType::Float)
    }

    /// Whether the type is dynamic enough to defer checks to runtime
    pub fn is_open(&self) -> bool {
        matches!(self, ElementType::Unknown | ElementType::Any)
    }

    /// Whether no `Unknown` remains anywhere in the type
    pub fn is_resolved(&self) -> bool {
        match self {
            ElementType::Unknown => false,
            ElementType::Model(inner) => inner.is_resolved(),
            _ => true,
        }
    }

    /// Smallest common type of two alternatives
    pub fn unify(&self, other: &ElementType) -> ElementType {
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (ElementType::Unknown, b) => b.clone(),
            (a, ElementType::Unknown) => a.clone(),
            (ElementType::Int, ElementType::Float) | (ElementType::Float, ElementType::Int) => {
                ElementType::Float
            }
            _ => ElementType::Any,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Unknown => write!(f, "?"),
            ElementType::Any => write!(f, "any"),
            ElementType::Void => write!(f, "void"),
            ElementType::Bool => write!(f, "bool"),
            ElementType::Int => write!(f, "int"),
            ElementType::Float => write!(f, "float"),
            ElementType::Text => write!(f, "string"),
            ElementType::Model(inner) => write!(f, "{}", inner),
        }
    }
}

/// A model type bound to its ordered element types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelInstanceType {
    /// Shape of the value
    pub model: ModelType,
    /// Element types, as many as the shape takes
    pub types: Vec<ElementType>,
}

impl ModelInstanceType {
    /// Descriptor with checked arity
    pub fn new(model: ModelType, types: Vec<ElementType>) -> Result<Self, String> {
        if types.len() != model.type_count() {
            return Err(format!(
                "{} takes {} type argument(s), got {}",
                model,
                model.type_count(),
                types.len()
            ));
        }
        Ok(Self { model, types })
    }

    /// `Value<element>`
    pub fn value(element: ElementType) -> Self {
        Self {
            model: ModelType::Value,
            types: vec![element],
        }
    }

    /// A collection shape over `element`
    pub fn collection(model: ModelType, element: ElementType) -> Self {
        Self {
            model,
            types: vec![element],
        }
    }

    /// A map shape from `key` to `value`
    pub fn map(model: ModelType, key: ElementType, value: ElementType) -> Self {
        Self {
            model,
            types: vec![key, value],
        }
    }

    /// `Action`
    pub fn action() -> Self {
        Self {
            model: ModelType::Action,
            types: Vec::new(),
        }
    }

    /// `Event<element>`
    pub fn event(element: ElementType) -> Self {
        Self {
            model: ModelType::Event,
            types: vec![element],
        }
    }

    /// First element type, or `Unknown` for arity-0 types
    pub fn element(&self) -> &ElementType {
        static UNKNOWN: ElementType = ElementType::Unknown;
        self.types.first().unwrap_or(&UNKNOWN)
    }

    /// Same element types under another model type
    pub fn with_model(&self, model: ModelType) -> Self {
        Self {
            model,
            types: self.types.clone(),
        }
    }

    /// Model type check at chain-link boundaries
    pub fn is_assignable_to(&self, target: &ModelInstanceType) -> bool {
        self.model.is_a(target.model)
            && self.types.len() == target.types.len()
            && self
                .types
                .iter()
                .zip(&target.types)
                .all(|(a, b)| a.is_assignable_to(b))
    }

    /// Whether no element type is still unknown
    pub fn is_resolved(&self) -> bool {
        self.types.iter().all(ElementType::is_resolved)
    }
}

impl fmt::Display for ModelInstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model)?;
        if !self.types.is_empty() {
            write!(f, "<")?;
            for (i, t) in self.types.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", t)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_widens_to_float() {
        assert!(ElementType::Int.is_assignable_to(&ElementType::Float));
        assert!(!ElementType::Float.is_assignable_to(&ElementType::Int));
        assert!(ElementType::Text.is_assignable_to(&ElementType::Any));
        assert!(ElementType::Unknown.is_assignable_to(&ElementType::Bool));
    }

    #[test]
    fn test_instance_type_assignability() {
        let sorted = ModelInstanceType::collection(ModelType::SortedSet, ElementType::Int);
        let wanted = ModelInstanceType::collection(ModelType::Collection, ElementType::Float);
        assert!(sorted.is_assignable_to(&wanted));
        assert!(!wanted.is_assignable_to(&sorted));
        let value = ModelInstanceType::value(ElementType::Int);
        assert!(!value.is_assignable_to(&wanted));
    }

    #[test]
    fn test_arity_checked() {
        assert!(ModelInstanceType::new(ModelType::Map, vec![ElementType::Text]).is_err());
        assert!(ModelInstanceType::new(ModelType::Action, vec![]).is_ok());
    }

    #[test]
    fn test_accepts_datum() {
        assert!(ElementType::Float.accepts(&Datum::Int(1)));
        assert!(!ElementType::Int.accepts(&Datum::Float(1.5)));
        assert!(ElementType::Text.accepts(&Datum::Null));
        assert!(!ElementType::Bool.accepts(&Datum::text("yes")));
    }

    #[test]
    fn test_display_nested() {
        let nested = ModelInstanceType::collection(
            ModelType::Collection,
            ElementType::model(ModelInstanceType::value(ElementType::Int)),
        );
        assert_eq!(nested.to_string(), "Collection<Value<int>>");
        assert_eq!(ModelInstanceType::action().to_string(), "Action");
    }
}
