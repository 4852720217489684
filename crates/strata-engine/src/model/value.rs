//! Runtime model values

use std::fmt;
use std::sync::Arc;
use strata_reactive::{ActionRef, CollectionRef, Datum, EventRef, MapRef, SettableRef};

use crate::error::{InstantiationError, InstantiationResult};
use crate::types::{ModelInstanceType, ModelType};

/// A live reactive value of any model type
#[derive(Clone)]
pub enum ModelValue {
    /// `Value<T>`
    Value(SettableRef),
    /// `Collection<T>`, `Set<T>` and the sorted variants
    Collection(CollectionRef),
    /// `Map<K, V>` and the multi-map variants
    Map(MapRef),
    /// `Action<T>`
    Action(ActionRef),
    /// `Event<T>`
    Event(EventRef),
}

fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl ModelValue {
    /// Coarse model type: the container family of the value
    pub fn kind(&self) -> ModelType {
        match self {
            ModelValue::Value(_) => ModelType::Value,
            ModelValue::Collection(_) => ModelType::Collection,
            ModelValue::Map(_) => ModelType::Map,
            ModelValue::Action(_) => ModelType::Action,
            ModelValue::Event(_) => ModelType::Event,
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ModelValue) -> bool {
        match (self, other) {
            (ModelValue::Value(a), ModelValue::Value(b)) => same(a, b),
            (ModelValue::Collection(a), ModelValue::Collection(b)) => same(a, b),
            (ModelValue::Map(a), ModelValue::Map(b)) => same(a, b),
            (ModelValue::Action(a), ModelValue::Action(b)) => same(a, b),
            (ModelValue::Event(a), ModelValue::Event(b)) => same(a, b),
            _ => false,
        }
    }

    /// Whether the value can stand where `ty` is expected
    pub fn conforms_to(&self, ty: &ModelInstanceType) -> bool {
        match self {
            ModelValue::Value(_) => ty.model == ModelType::Value,
            ModelValue::Collection(_) => ty.model.is_collection(),
            ModelValue::Map(_) => ty.model.is_map(),
            ModelValue::Action(_) => ty.model == ModelType::Action,
            ModelValue::Event(_) => ty.model == ModelType::Event,
        }
    }

    fn wrong(&self, expected: ModelType) -> InstantiationError {
        InstantiationError::WrongModelType {
            expected: expected.to_string(),
            actual: self.kind().to_string(),
        }
    }

    /// The settable value, or a type mismatch
    pub fn into_value(self) -> InstantiationResult<SettableRef> {
        match self {
            ModelValue::Value(v) => Ok(v),
            other => Err(other.wrong(ModelType::Value)),
        }
    }

    /// The collection, or a type mismatch
    pub fn into_collection(self) -> InstantiationResult<CollectionRef> {
        match self {
            ModelValue::Collection(c) => Ok(c),
            other => Err(other.wrong(ModelType::Collection)),
        }
    }

    /// The map, or a type mismatch
    pub fn into_map(self) -> InstantiationResult<MapRef> {
        match self {
            ModelValue::Map(m) => Ok(m),
            other => Err(other.wrong(ModelType::Map)),
        }
    }

    /// The action, or a type mismatch
    pub fn into_action(self) -> InstantiationResult<ActionRef> {
        match self {
            ModelValue::Action(a) => Ok(a),
            other => Err(other.wrong(ModelType::Action)),
        }
    }

    /// The event, or a type mismatch
    pub fn into_event(self) -> InstantiationResult<EventRef> {
        match self {
            ModelValue::Event(e) => Ok(e),
            other => Err(other.wrong(ModelType::Event)),
        }
    }

    /// Borrowed settable value
    pub fn as_value(&self) -> Option<&SettableRef> {
        match self {
            ModelValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Borrowed collection
    pub fn as_collection(&self) -> Option<&CollectionRef> {
        match self {
            ModelValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Borrowed action
    pub fn as_action(&self) -> Option<&ActionRef> {
        match self {
            ModelValue::Action(a) => Some(a),
            _ => None,
        }
    }

    /// The value nested as a datum, for collections of values and flattening
    pub fn to_datum(&self) -> Datum {
        match self {
            ModelValue::Value(v) => Datum::Value(v.clone()),
            ModelValue::Collection(c) => Datum::Collection(c.clone()),
            _ => Datum::Null,
        }
    }
}

impl fmt::Debug for ModelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelValue::Value(v) => write!(f, "Value({:?})", v),
            ModelValue::Collection(c) => write!(f, "Collection({:?})", c),
            ModelValue::Map(m) => write!(f, "Map({:?})", m),
            ModelValue::Action(a) => write!(f, "Action({:?})", a),
            ModelValue::Event(e) => write!(f, "Event({:?})", e),
        }
    }
}

/// Renders the current content
impl fmt::Display for ModelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelValue::Value(v) => write!(f, "{}", v.get()),
            ModelValue::Collection(c) => {
                write!(f, "[")?;
                for (i, element) in c.elements().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
            ModelValue::Map(m) => {
                write!(f, "{{")?;
                for (i, (key, value)) in m.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            ModelValue::Action(a) => match a.is_enabled() {
                None => write!(f, "<action>"),
                Some(reason) => write!(f, "<action disabled: {}>", reason),
            },
            ModelValue::Event(_) => write!(f, "<event>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_reactive::{CollectionShape, SimpleCollection, SimpleValue};

    #[test]
    fn test_ptr_eq_is_identity() {
        let a: SettableRef = Arc::new(SimpleValue::new(Datum::Int(1)));
        let b: SettableRef = Arc::new(SimpleValue::new(Datum::Int(1)));
        assert!(ModelValue::Value(a.clone()).ptr_eq(&ModelValue::Value(a.clone())));
        assert!(!ModelValue::Value(a).ptr_eq(&ModelValue::Value(b)));
    }

    #[test]
    fn test_conversions_check_kind() {
        let c: CollectionRef = Arc::new(SimpleCollection::new(
            CollectionShape::LIST,
            vec![Datum::Int(1), Datum::Int(2)],
        ));
        let value = ModelValue::Collection(c);
        assert_eq!(value.to_string(), "[1, 2]");
        assert!(value.conforms_to(&ModelInstanceType::collection(
            ModelType::SortedSet,
            crate::types::ElementType::Int
        )));
        assert!(matches!(
            value.into_value(),
            Err(InstantiationError::WrongModelType { .. })
        ));
    }
}
