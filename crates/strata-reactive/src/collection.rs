//! Reactive collections

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::datum::Datum;
use crate::error::{ReactiveError, ReactiveResult};
use crate::value::{sum_stamps, AcceptFn, SettableRef, SettableValue};

/// Message reported by collections that cannot be modified
pub const UNMODIFIABLE: &str = "Collection is unmodifiable";

/// An ordered reactive collection
pub trait ObservableCollection: Send + Sync + fmt::Debug {
    /// Snapshot of the current elements
    fn elements(&self) -> Vec<Datum>;

    /// Modification stamp
    fn stamp(&self) -> u64;

    /// Number of elements
    fn len(&self) -> usize {
        self.elements().len()
    }

    /// Whether there are no elements
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` if `value` could be added now, else the reason it could not
    fn can_add(&self, _value: &Datum) -> Option<String> {
        Some(UNMODIFIABLE.to_string())
    }

    /// Add an element
    fn add(&self, value: Datum) -> ReactiveResult<()> {
        Err(ReactiveError::Rejected(
            self.can_add(&value)
                .unwrap_or_else(|| UNMODIFIABLE.to_string()),
        ))
    }

    /// Replace the element at `index`, returning the previous element
    fn set_at(&self, _index: usize, _value: Datum) -> ReactiveResult<Datum> {
        Err(ReactiveError::rejected(UNMODIFIABLE))
    }

    /// Remove the element at `index`
    fn remove_at(&self, _index: usize) -> ReactiveResult<Datum> {
        Err(ReactiveError::rejected(UNMODIFIABLE))
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a collection
pub type CollectionRef = Arc<dyn ObservableCollection>;

/// Distinctness and ordering guarantees of a simple collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionShape {
    /// Equal elements are rejected
    pub distinct: bool,
    /// Elements are kept in `Datum::compare` order
    pub sorted: bool,
}

impl CollectionShape {
    /// Insertion-ordered, duplicates allowed
    pub const LIST: CollectionShape = CollectionShape {
        distinct: false,
        sorted: false,
    };
    /// Insertion-ordered, distinct
    pub const SET: CollectionShape = CollectionShape {
        distinct: true,
        sorted: false,
    };
    /// Sorted, duplicates allowed
    pub const SORTED_LIST: CollectionShape = CollectionShape {
        distinct: false,
        sorted: true,
    };
    /// Sorted, distinct
    pub const SORTED_SET: CollectionShape = CollectionShape {
        distinct: true,
        sorted: true,
    };
}

/// In-memory collection
pub struct SimpleCollection {
    elements: RwLock<Vec<Datum>>,
    stamp: AtomicU64,
    shape: CollectionShape,
    accept: Option<AcceptFn>,
}

impl SimpleCollection {
    /// Create a collection holding `initial`, normalized to `shape`
    pub fn new(shape: CollectionShape, initial: Vec<Datum>) -> Self {
        let mut elements: Vec<Datum> = Vec::with_capacity(initial.len());
        for element in initial {
            if shape.distinct && elements.contains(&element) {
                continue;
            }
            elements.push(element);
        }
        if shape.sorted {
            elements.sort_by(|a, b| a.compare(b));
        }
        Self {
            elements: RwLock::new(elements),
            stamp: AtomicU64::new(0),
            shape,
            accept: None,
        }
    }

    /// Check every added element with `accept`
    pub fn with_accept(mut self, accept: AcceptFn) -> Self {
        self.accept = Some(accept);
        self
    }

    /// The collection's shape
    pub fn shape(&self) -> CollectionShape {
        self.shape
    }

    fn touch(&self) {
        self.stamp.fetch_add(1, Ordering::AcqRel);
    }
}

impl ObservableCollection for SimpleCollection {
    fn elements(&self) -> Vec<Datum> {
        self.elements.read().clone()
    }

    fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.elements.read().len()
    }

    fn can_add(&self, value: &Datum) -> Option<String> {
        if let Some(message) = self.accept.as_ref().and_then(|accept| accept(value)) {
            return Some(message);
        }
        if self.shape.distinct && self.elements.read().contains(value) {
            return Some("Element already present".to_string());
        }
        None
    }

    fn add(&self, value: Datum) -> ReactiveResult<()> {
        if let Some(message) = self.can_add(&value) {
            return Err(ReactiveError::Rejected(message));
        }
        let mut elements = self.elements.write();
        let index = if self.shape.sorted {
            elements.partition_point(|e| e.compare(&value).is_le())
        } else {
            elements.len()
        };
        elements.insert(index, value);
        drop(elements);
        self.touch();
        Ok(())
    }

    fn set_at(&self, index: usize, value: Datum) -> ReactiveResult<Datum> {
        if let Some(message) = self.accept.as_ref().and_then(|accept| accept(&value)) {
            return Err(ReactiveError::Rejected(message));
        }
        let mut elements = self.elements.write();
        let size = elements.len();
        if index >= size {
            return Err(ReactiveError::IndexOutOfBounds { index, size });
        }
        if self.shape.distinct
            && elements
                .iter()
                .enumerate()
                .any(|(i, e)| i != index && *e == value)
        {
            return Err(ReactiveError::rejected("Element already present"));
        }
        let previous = std::mem::replace(&mut elements[index], value);
        if self.shape.sorted {
            elements.sort_by(|a, b| a.compare(b));
        }
        drop(elements);
        self.touch();
        Ok(previous)
    }

    fn remove_at(&self, index: usize) -> ReactiveResult<Datum> {
        let mut elements = self.elements.write();
        let size = elements.len();
        if index >= size {
            return Err(ReactiveError::IndexOutOfBounds { index, size });
        }
        let removed = elements.remove(index);
        drop(elements);
        self.touch();
        Ok(removed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for SimpleCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleCollection")
            .field("elements", &*self.elements.read())
            .field("shape", &self.shape)
            .finish()
    }
}

/// A read-only collection of the current contents of several values
#[derive(Debug)]
pub struct DerivedCollection {
    values: Vec<SettableRef>,
}

impl DerivedCollection {
    /// Collect the contents of `values`
    pub fn new(values: Vec<SettableRef>) -> Self {
        Self { values }
    }
}

impl ObservableCollection for DerivedCollection {
    fn elements(&self) -> Vec<Datum> {
        self.values.iter().map(|v| v.get()).collect()
    }

    fn stamp(&self) -> u64 {
        sum_stamps(self.values.iter().map(|v| v.stamp()))
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The size of a collection as a value
#[derive(Debug)]
pub struct SizeValue {
    collection: CollectionRef,
}

impl SizeValue {
    /// Observe the size of `collection`
    pub fn new(collection: CollectionRef) -> Self {
        Self { collection }
    }

    /// The measured collection
    pub fn source(&self) -> &CollectionRef {
        &self.collection
    }
}

impl SettableValue for SizeValue {
    fn get(&self) -> Datum {
        Datum::Int(self.collection.len() as i64)
    }

    fn stamp(&self) -> u64 {
        self.collection.stamp()
    }

    fn is_enabled(&self) -> Option<String> {
        Some("Size is not settable".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Folds an accumulated value with the next element
pub type ReduceFn = Arc<dyn Fn(&Datum, &Datum) -> Datum + Send + Sync>;

/// A collection folded into one value, starting from a seed
pub struct ReducedValue {
    collection: CollectionRef,
    seed: SettableRef,
    combine: ReduceFn,
}

impl ReducedValue {
    /// Fold `collection` with `combine`, starting from the current `seed`
    pub fn new(collection: CollectionRef, seed: SettableRef, combine: ReduceFn) -> Self {
        Self {
            collection,
            seed,
            combine,
        }
    }

    /// The folded collection
    pub fn source(&self) -> &CollectionRef {
        &self.collection
    }
}

impl SettableValue for ReducedValue {
    fn get(&self) -> Datum {
        self.collection
            .elements()
            .iter()
            .fold(self.seed.get(), |acc, element| (self.combine)(&acc, element))
    }

    fn stamp(&self) -> u64 {
        sum_stamps([self.collection.stamp(), self.seed.stamp()].into_iter())
    }

    fn is_enabled(&self) -> Option<String> {
        Some("Reduced values are not modifiable".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for ReducedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducedValue")
            .field("collection", &self.collection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SimpleValue;

    fn ints(values: &[i64]) -> Vec<Datum> {
        values.iter().map(|i| Datum::Int(*i)).collect()
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let set = SimpleCollection::new(CollectionShape::SET, ints(&[1, 2, 1]));
        assert_eq!(set.elements(), ints(&[1, 2]));
        assert!(set.add(Datum::Int(2)).is_err());
        assert!(set.add(Datum::Int(3)).is_ok());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_sorted_insertion() {
        let list = SimpleCollection::new(CollectionShape::SORTED_LIST, ints(&[5, 1]));
        list.add(Datum::Int(3)).unwrap();
        list.add(Datum::Int(3)).unwrap();
        assert_eq!(list.elements(), ints(&[1, 3, 3, 5]));
    }

    #[test]
    fn test_set_at_and_remove() {
        let list = SimpleCollection::new(CollectionShape::LIST, ints(&[1, 2, 3]));
        let stamp = list.stamp();
        assert_eq!(list.set_at(1, Datum::Int(9)), Ok(Datum::Int(2)));
        assert_eq!(list.remove_at(0), Ok(Datum::Int(1)));
        assert_eq!(list.elements(), ints(&[9, 3]));
        assert!(list.stamp() > stamp);
        assert_eq!(
            list.remove_at(5),
            Err(ReactiveError::IndexOutOfBounds { index: 5, size: 2 })
        );
    }

    #[test]
    fn test_size_value_tracks_collection() {
        let list: CollectionRef =
            Arc::new(SimpleCollection::new(CollectionShape::LIST, ints(&[1])));
        let size = SizeValue::new(list.clone());
        assert_eq!(size.get(), Datum::Int(1));
        list.add(Datum::Int(2)).unwrap();
        assert_eq!(size.get(), Datum::Int(2));
    }

    #[test]
    fn test_derived_collection_reads_values() {
        let a = Arc::new(SimpleValue::new(Datum::Int(1)));
        let b = Arc::new(SimpleValue::new(Datum::Int(2)));
        let derived = DerivedCollection::new(vec![a.clone(), b]);
        a.replace(Datum::Int(7));
        assert_eq!(derived.elements(), ints(&[7, 2]));
        assert!(derived.add(Datum::Int(3)).is_err());
    }

    #[test]
    fn test_reduced_value_folds_from_seed() {
        let list: CollectionRef =
            Arc::new(SimpleCollection::new(CollectionShape::LIST, ints(&[1, 2, 3])));
        let seed = Arc::new(SimpleValue::new(Datum::Int(10)));
        let sum = ReducedValue::new(
            list.clone(),
            seed.clone(),
            Arc::new(|acc: &Datum, d: &Datum| {
                Datum::Int(acc.as_int().unwrap_or(0) + d.as_int().unwrap_or(0))
            }),
        );
        assert_eq!(sum.get(), Datum::Int(16));
        let stamp = sum.stamp();
        list.add(Datum::Int(4)).unwrap();
        assert_ne!(sum.stamp(), stamp);
        assert_eq!(sum.get(), Datum::Int(20));
        seed.set(Datum::Int(0)).unwrap();
        assert_eq!(sum.get(), Datum::Int(10));
        assert!(sum.set(Datum::Int(1)).is_err());
    }
}
