//! Model types: the shape identity of a reactive value

use std::fmt;

/// Shape identity of a reactive model value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelType {
    /// Single settable value
    Value,
    /// Ordered collection allowing duplicates
    Collection,
    /// Collection without duplicates
    Set,
    /// Collection kept in sorted order
    SortedCollection,
    /// Sorted collection without duplicates
    SortedSet,
    /// Collection of distinct values compared by value
    ValueSet,
    /// Key to value mapping
    Map,
    /// Map kept in key order
    SortedMap,
    /// Key to many values
    MultiMap,
    /// Executable action
    Action,
    /// Stream of fired values
    Event,
}

impl ModelType {
    /// Every model type, in declaration order
    pub const ALL: [ModelType; 11] = [
        ModelType::Value,
        ModelType::Collection,
        ModelType::Set,
        ModelType::SortedCollection,
        ModelType::SortedSet,
        ModelType::ValueSet,
        ModelType::Map,
        ModelType::SortedMap,
        ModelType::MultiMap,
        ModelType::Action,
        ModelType::Event,
    ];

    /// Number of element type slots
    pub fn type_count(self) -> usize {
        match self {
            ModelType::Action => 0,
            ModelType::Map | ModelType::SortedMap | ModelType::MultiMap => 2,
            _ => 1,
        }
    }

    /// Name used in type specs
    pub fn name(self) -> &'static str {
        match self {
            ModelType::Value => "Value",
            ModelType::Collection => "Collection",
            ModelType::Set => "Set",
            ModelType::SortedCollection => "SortedCollection",
            ModelType::SortedSet => "SortedSet",
            ModelType::ValueSet => "ValueSet",
            ModelType::Map => "Map",
            ModelType::SortedMap => "SortedMap",
            ModelType::MultiMap => "MultiMap",
            ModelType::Action => "Action",
            ModelType::Event => "Event",
        }
    }

    /// Model type written as `name`
    pub fn from_name(name: &str) -> Option<ModelType> {
        ModelType::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Whether a value of this type may be used where `other` is expected
    pub fn is_a(self, other: ModelType) -> bool {
        use ModelType::*;
        if self == other {
            return true;
        }
        match self {
            Set | SortedCollection | ValueSet => other == Collection,
            SortedSet => matches!(other, Set | SortedCollection | Collection),
            SortedMap => other == Map,
            _ => false,
        }
    }

    /// Whether this is one of the collection shapes
    pub fn is_collection(self) -> bool {
        self.is_a(ModelType::Collection)
    }

    /// Whether this is one of the map shapes
    pub fn is_map(self) -> bool {
        matches!(self, ModelType::Map | ModelType::SortedMap | ModelType::MultiMap)
    }

    /// Whether elements or keys stay sorted
    pub fn is_sorted(self) -> bool {
        matches!(
            self,
            ModelType::SortedCollection | ModelType::SortedSet | ModelType::SortedMap
        )
    }

    /// Whether duplicates are rejected
    pub fn is_distinct(self) -> bool {
        matches!(self, ModelType::Set | ModelType::SortedSet | ModelType::ValueSet)
    }

    /// The sorted counterpart of a collection shape
    pub fn sorted(self) -> ModelType {
        match self {
            ModelType::Set | ModelType::SortedSet | ModelType::ValueSet => ModelType::SortedSet,
            ModelType::Map => ModelType::SortedMap,
            other if other.is_collection() => ModelType::SortedCollection,
            other => other,
        }
    }

    /// The distinct counterpart of a collection shape
    pub fn distinct(self) -> ModelType {
        match self {
            ModelType::SortedCollection | ModelType::SortedSet => ModelType::SortedSet,
            ModelType::ValueSet => ModelType::ValueSet,
            other if other.is_collection() => ModelType::Set,
            other => other,
        }
    }

    /// The shape after sort order is lost
    pub fn unsorted(self) -> ModelType {
        match self {
            ModelType::SortedCollection => ModelType::Collection,
            ModelType::SortedSet => ModelType::Set,
            ModelType::SortedMap => ModelType::Map,
            other => other,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_counts() {
        assert_eq!(ModelType::Action.type_count(), 0);
        assert_eq!(ModelType::Value.type_count(), 1);
        assert_eq!(ModelType::SortedSet.type_count(), 1);
        assert_eq!(ModelType::MultiMap.type_count(), 2);
    }

    #[test]
    fn test_is_a_lattice() {
        assert!(ModelType::SortedSet.is_a(ModelType::Set));
        assert!(ModelType::SortedSet.is_a(ModelType::Collection));
        assert!(ModelType::SortedSet.is_a(ModelType::SortedCollection));
        assert!(ModelType::ValueSet.is_a(ModelType::Collection));
        assert!(ModelType::SortedMap.is_a(ModelType::Map));
        assert!(!ModelType::Collection.is_a(ModelType::Set));
        assert!(!ModelType::MultiMap.is_a(ModelType::Map));
        assert!(!ModelType::Value.is_a(ModelType::Collection));
    }

    #[test]
    fn test_shape_transitions() {
        assert_eq!(ModelType::Collection.sorted(), ModelType::SortedCollection);
        assert_eq!(ModelType::Set.sorted(), ModelType::SortedSet);
        assert_eq!(ModelType::SortedCollection.distinct(), ModelType::SortedSet);
        assert_eq!(ModelType::SortedSet.unsorted(), ModelType::Set);
        assert_eq!(ModelType::from_name("ValueSet"), Some(ModelType::ValueSet));
        assert_eq!(ModelType::from_name("Thing"), None);
    }
}
