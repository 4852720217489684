//! Reactive maps and multi-maps

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::datum::Datum;
use crate::error::ReactiveResult;

/// A keyed container
pub trait ObservableMap: Send + Sync + fmt::Debug {
    /// All entries, in key order for sorted maps and insertion order otherwise
    fn entries(&self) -> Vec<(Datum, Datum)>;

    /// Modification stamp
    fn stamp(&self) -> u64;

    /// Associate `value` with `key`, returning the replaced value if any
    ///
    /// Multi-maps keep every value and never replace.
    fn put(&self, key: Datum, value: Datum) -> ReactiveResult<Option<Datum>>;

    /// First value for `key`
    fn get(&self, key: &Datum) -> Option<Datum> {
        self.entries()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Every value for `key`
    fn get_all(&self, key: &Datum) -> Vec<Datum> {
        self.entries()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }

    /// Distinct keys
    fn keys(&self) -> Vec<Datum> {
        let mut keys: Vec<Datum> = Vec::new();
        for (key, _) in self.entries() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a map
pub type MapRef = Arc<dyn ObservableMap>;

/// In-memory map, optionally sorted by key and optionally multi-valued
pub struct SimpleMap {
    entries: RwLock<Vec<(Datum, Datum)>>,
    stamp: AtomicU64,
    sorted: bool,
    multi: bool,
}

impl SimpleMap {
    /// Create an empty map
    pub fn new(sorted: bool, multi: bool) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            stamp: AtomicU64::new(0),
            sorted,
            multi,
        }
    }

    /// Whether keys are kept sorted
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Whether a key may hold several values
    pub fn is_multi(&self) -> bool {
        self.multi
    }
}

impl ObservableMap for SimpleMap {
    fn entries(&self) -> Vec<(Datum, Datum)> {
        self.entries.read().clone()
    }

    fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    fn put(&self, key: Datum, value: Datum) -> ReactiveResult<Option<Datum>> {
        let mut entries = self.entries.write();
        let replaced = if self.multi {
            None
        } else {
            entries
                .iter_mut()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| std::mem::replace(v, value.clone()))
        };
        if replaced.is_none() {
            let index = if self.sorted {
                entries.partition_point(|(k, _)| k.compare(&key).is_le())
            } else {
                entries.len()
            };
            entries.insert(index, (key, value));
        }
        self.stamp.fetch_add(1, Ordering::AcqRel);
        Ok(replaced)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for SimpleMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleMap")
            .field("entries", &self.entries.read().len())
            .field("sorted", &self.sorted)
            .field("multi", &self.multi)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_replaces() {
        let map = SimpleMap::new(false, false);
        assert_eq!(map.put(Datum::text("a"), Datum::Int(1)), Ok(None));
        assert_eq!(
            map.put(Datum::text("a"), Datum::Int(2)),
            Ok(Some(Datum::Int(1)))
        );
        assert_eq!(map.get(&Datum::text("a")), Some(Datum::Int(2)));
        assert_eq!(map.entries().len(), 1);
    }

    #[test]
    fn test_sorted_multi_map() {
        let map = SimpleMap::new(true, true);
        map.put(Datum::Int(2), Datum::text("b")).unwrap();
        map.put(Datum::Int(1), Datum::text("a")).unwrap();
        map.put(Datum::Int(2), Datum::text("c")).unwrap();
        assert_eq!(map.keys(), vec![Datum::Int(1), Datum::Int(2)]);
        assert_eq!(
            map.get_all(&Datum::Int(2)),
            vec![Datum::text("b"), Datum::text("c")]
        );
    }
}
