//! Reactive single values
//!
//! `SettableValue` is the contract every value container implements. Derived
//! values (mapped, filtered, disabled, ...) keep a reference to their source
//! and expose it, so callers can walk a chain of derivations backwards.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::datum::Datum;
use crate::error::{ReactiveError, ReactiveResult};
use crate::event::{EventRef, Subscription};

/// Message reported by values that can never be set
pub const NOT_SETTABLE: &str = "Value is not settable";

/// Maps one datum to another
pub type MapFn = Arc<dyn Fn(&Datum) -> Datum + Send + Sync>;
/// Tests a datum
pub type PredicateFn = Arc<dyn Fn(&Datum) -> bool + Send + Sync>;
/// Checks a datum, returning a rejection message or `None` when acceptable
pub type AcceptFn = Arc<dyn Fn(&Datum) -> Option<String> + Send + Sync>;
/// Computes a datum from the current content of several sources
pub type ComputeFn = Arc<dyn Fn(&[Datum]) -> Datum + Send + Sync>;

/// A reactive value that may be settable
pub trait SettableValue: Send + Sync + fmt::Debug {
    /// Current content
    fn get(&self) -> Datum;

    /// Modification stamp; changes whenever `get()` may return something new
    fn stamp(&self) -> u64;

    /// `None` if the value can currently be set, else the reason it cannot
    fn is_enabled(&self) -> Option<String> {
        Some(NOT_SETTABLE.to_string())
    }

    /// `None` if `value` could be set now, else the reason it could not
    fn is_acceptable(&self, _value: &Datum) -> Option<String> {
        self.is_enabled()
    }

    /// Replace the content, returning the previous content
    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        Err(ReactiveError::Rejected(
            self.is_acceptable(&value)
                .unwrap_or_else(|| NOT_SETTABLE.to_string()),
        ))
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a value
pub type SettableRef = Arc<dyn SettableValue>;

/// Pushes a change on a derived value back to its source
pub trait ValueReverse: Send + Sync {
    /// `None` if reversal is currently possible
    fn enabled(&self, source: &dyn SettableValue) -> Option<String>;

    /// `None` if `target` could be pushed back to the source now
    fn accept(&self, source: &dyn SettableValue, target: &Datum) -> Option<String>;

    /// Push `target` back to the source
    fn apply(&self, source: &dyn SettableValue, target: Datum) -> ReactiveResult<()>;
}

// ============================================================================
// Simple and constant values
// ============================================================================

/// A plain settable value
pub struct SimpleValue {
    value: RwLock<Datum>,
    stamp: AtomicU64,
    accept: Option<AcceptFn>,
}

impl SimpleValue {
    /// Create a value with the given initial content
    pub fn new(initial: Datum) -> Self {
        Self {
            value: RwLock::new(initial),
            stamp: AtomicU64::new(0),
            accept: None,
        }
    }

    /// Create a value that checks every new content with `accept`
    pub fn with_accept(initial: Datum, accept: AcceptFn) -> Self {
        Self {
            value: RwLock::new(initial),
            stamp: AtomicU64::new(0),
            accept: Some(accept),
        }
    }

    /// Replace the content without any check
    pub fn replace(&self, value: Datum) -> Datum {
        let previous = std::mem::replace(&mut *self.value.write(), value);
        self.stamp.fetch_add(1, Ordering::AcqRel);
        previous
    }
}

impl SettableValue for SimpleValue {
    fn get(&self) -> Datum {
        self.value.read().clone()
    }

    fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    fn is_enabled(&self) -> Option<String> {
        None
    }

    fn is_acceptable(&self, value: &Datum) -> Option<String> {
        self.accept.as_ref().and_then(|accept| accept(value))
    }

    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        if let Some(message) = self.is_acceptable(&value) {
            return Err(ReactiveError::Rejected(message));
        }
        Ok(self.replace(value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for SimpleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleValue")
            .field("value", &*self.value.read())
            .finish()
    }
}

/// A value that never changes
#[derive(Debug)]
pub struct ConstantValue {
    value: Datum,
}

impl ConstantValue {
    /// Wrap a datum
    pub fn new(value: Datum) -> Self {
        Self { value }
    }
}

impl SettableValue for ConstantValue {
    fn get(&self) -> Datum {
        self.value.clone()
    }

    fn stamp(&self) -> u64 {
        0
    }

    fn is_enabled(&self) -> Option<String> {
        Some("Constant value".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A read-only value computed from several sources
pub struct DerivedValue {
    sources: Vec<SettableRef>,
    compute: ComputeFn,
}

impl DerivedValue {
    /// Derive from `sources` with `compute`
    pub fn new(sources: Vec<SettableRef>, compute: ComputeFn) -> Self {
        Self { sources, compute }
    }

    /// The values this one is computed from
    pub fn sources(&self) -> &[SettableRef] {
        &self.sources
    }
}

impl SettableValue for DerivedValue {
    fn get(&self) -> Datum {
        let inputs: Vec<Datum> = self.sources.iter().map(|s| s.get()).collect();
        (self.compute)(&inputs)
    }

    fn stamp(&self) -> u64 {
        sum_stamps(self.sources.iter().map(|s| s.stamp()))
    }

    fn is_enabled(&self) -> Option<String> {
        Some("Derived value is not settable".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for DerivedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedValue")
            .field("sources", &self.sources.len())
            .finish()
    }
}

pub(crate) fn sum_stamps(stamps: impl Iterator<Item = u64>) -> u64 {
    stamps.fold(0u64, |acc, s| acc.wrapping_add(s))
}

// ============================================================================
// Derivations of a single source
// ============================================================================

/// A value mapped from a source, optionally reversible
pub struct MappedValue {
    source: SettableRef,
    map: MapFn,
    reverse: Option<Arc<dyn ValueReverse>>,
    inputs: Vec<SettableRef>,
}

impl MappedValue {
    /// Map `source` through `map`
    pub fn new(source: SettableRef, map: MapFn, reverse: Option<Arc<dyn ValueReverse>>) -> Self {
        Self {
            source,
            map,
            reverse,
            inputs: Vec::new(),
        }
    }

    /// Additional values the mapping reads, which contribute to the stamp
    pub fn with_inputs(mut self, inputs: Vec<SettableRef>) -> Self {
        self.inputs = inputs;
        self
    }

    /// The mapped source
    pub fn source(&self) -> &SettableRef {
        &self.source
    }

    /// Whether a reverse was supplied
    pub fn is_reversible(&self) -> bool {
        self.reverse.is_some()
    }
}

impl SettableValue for MappedValue {
    fn get(&self) -> Datum {
        (self.map)(&self.source.get())
    }

    fn stamp(&self) -> u64 {
        sum_stamps(
            std::iter::once(self.source.stamp()).chain(self.inputs.iter().map(|i| i.stamp())),
        )
    }

    fn is_enabled(&self) -> Option<String> {
        match &self.reverse {
            Some(reverse) => reverse.enabled(self.source.as_ref()),
            None => Some("No reverse defined for mapping".to_string()),
        }
    }

    fn is_acceptable(&self, value: &Datum) -> Option<String> {
        match &self.reverse {
            Some(reverse) => reverse.accept(self.source.as_ref(), value),
            None => Some("No reverse defined for mapping".to_string()),
        }
    }

    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        let reverse = self
            .reverse
            .as_ref()
            .ok_or_else(|| ReactiveError::rejected("No reverse defined for mapping"))?;
        if let Some(message) = reverse.accept(self.source.as_ref(), &value) {
            return Err(ReactiveError::Rejected(message));
        }
        let previous = self.get();
        reverse.apply(self.source.as_ref(), value)?;
        Ok(previous)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for MappedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedValue")
            .field("source", &self.source)
            .field("reversible", &self.reverse.is_some())
            .finish()
    }
}

/// A value that reads as `Null` whenever the source fails a test
pub struct FilteredValue {
    source: SettableRef,
    test: PredicateFn,
}

impl FilteredValue {
    /// Filter `source` with `test`
    pub fn new(source: SettableRef, test: PredicateFn) -> Self {
        Self { source, test }
    }

    /// The filtered source
    pub fn source(&self) -> &SettableRef {
        &self.source
    }
}

impl SettableValue for FilteredValue {
    fn get(&self) -> Datum {
        let value = self.source.get();
        if (self.test)(&value) {
            value
        } else {
            Datum::Null
        }
    }

    fn stamp(&self) -> u64 {
        self.source.stamp()
    }

    fn is_enabled(&self) -> Option<String> {
        self.source.is_enabled()
    }

    fn is_acceptable(&self, value: &Datum) -> Option<String> {
        if !(self.test)(value) {
            return Some("Value rejected by filter".to_string());
        }
        self.source.is_acceptable(value)
    }

    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        if !(self.test)(&value) {
            return Err(ReactiveError::rejected("Value rejected by filter"));
        }
        self.source.set(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for FilteredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredValue")
            .field("source", &self.source)
            .finish()
    }
}

/// A value that restricts which contents may be set on its source
pub struct AcceptFilteredValue {
    source: SettableRef,
    test: AcceptFn,
}

impl AcceptFilteredValue {
    /// Restrict `source` with `test`
    pub fn new(source: SettableRef, test: AcceptFn) -> Self {
        Self { source, test }
    }

    /// The restricted source
    pub fn source(&self) -> &SettableRef {
        &self.source
    }
}

impl SettableValue for AcceptFilteredValue {
    fn get(&self) -> Datum {
        self.source.get()
    }

    fn stamp(&self) -> u64 {
        self.source.stamp()
    }

    fn is_enabled(&self) -> Option<String> {
        self.source.is_enabled()
    }

    fn is_acceptable(&self, value: &Datum) -> Option<String> {
        (self.test)(value).or_else(|| self.source.is_acceptable(value))
    }

    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        if let Some(message) = (self.test)(&value) {
            return Err(ReactiveError::Rejected(message));
        }
        self.source.set(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for AcceptFilteredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptFilteredValue")
            .field("source", &self.source)
            .finish()
    }
}

/// A value disabled whenever a message value is non-null
#[derive(Debug)]
pub struct DisabledValue {
    source: SettableRef,
    disablement: SettableRef,
}

impl DisabledValue {
    /// Disable `source` with the message held by `disablement`
    pub fn new(source: SettableRef, disablement: SettableRef) -> Self {
        Self {
            source,
            disablement,
        }
    }

    /// The disabled source
    pub fn source(&self) -> &SettableRef {
        &self.source
    }

    /// The value holding the disablement message
    pub fn disablement(&self) -> &SettableRef {
        &self.disablement
    }

    fn message(&self) -> Option<String> {
        match self.disablement.get() {
            Datum::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl SettableValue for DisabledValue {
    fn get(&self) -> Datum {
        self.source.get()
    }

    fn stamp(&self) -> u64 {
        self.source.stamp().wrapping_add(self.disablement.stamp())
    }

    fn is_enabled(&self) -> Option<String> {
        self.message().or_else(|| self.source.is_enabled())
    }

    fn is_acceptable(&self, value: &Datum) -> Option<String> {
        self.message().or_else(|| self.source.is_acceptable(value))
    }

    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        if let Some(message) = self.message() {
            return Err(ReactiveError::Rejected(message));
        }
        self.source.set(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value whose stamp also advances each time an event fires
pub struct RefreshingValue {
    source: SettableRef,
    refresh: EventRef,
    fired: Arc<AtomicU64>,
    subscription: Mutex<Option<Subscription>>,
}

impl RefreshingValue {
    /// Refresh `source` whenever `refresh` fires
    pub fn new(source: SettableRef, refresh: EventRef) -> Self {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let subscription = refresh.subscribe(Arc::new(move |_: &Datum| {
            counter.fetch_add(1, Ordering::AcqRel);
        }));
        Self {
            source,
            refresh,
            fired,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    /// The refreshed source
    pub fn source(&self) -> &SettableRef {
        &self.source
    }

    /// The refreshing event
    pub fn refresh(&self) -> &EventRef {
        &self.refresh
    }
}

impl SettableValue for RefreshingValue {
    fn get(&self) -> Datum {
        self.source.get()
    }

    fn stamp(&self) -> u64 {
        self.source
            .stamp()
            .wrapping_add(self.fired.load(Ordering::Acquire))
    }

    fn is_enabled(&self) -> Option<String> {
        self.source.is_enabled()
    }

    fn is_acceptable(&self, value: &Datum) -> Option<String> {
        self.source.is_acceptable(value)
    }

    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        self.source.set(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for RefreshingValue {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }
}

impl fmt::Debug for RefreshingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshingValue")
            .field("source", &self.source)
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .finish()
    }
}

/// A read-only view of a source
#[derive(Debug)]
pub struct UnmodifiableValue {
    source: SettableRef,
}

impl UnmodifiableValue {
    /// Wrap `source`
    pub fn new(source: SettableRef) -> Self {
        Self { source }
    }

    /// The wrapped source
    pub fn source(&self) -> &SettableRef {
        &self.source
    }
}

impl SettableValue for UnmodifiableValue {
    fn get(&self) -> Datum {
        self.source.get()
    }

    fn stamp(&self) -> u64 {
        self.source.stamp()
    }

    fn is_enabled(&self) -> Option<String> {
        Some("Value is unmodifiable".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The content of a value whose content is itself a value
#[derive(Debug)]
pub struct FlattenedValue {
    outer: SettableRef,
}

impl FlattenedValue {
    /// Flatten `outer`
    pub fn new(outer: SettableRef) -> Self {
        Self { outer }
    }

    /// The outer value
    pub fn source(&self) -> &SettableRef {
        &self.outer
    }

    fn inner(&self) -> Option<SettableRef> {
        match self.outer.get() {
            Datum::Value(inner) => Some(inner),
            _ => None,
        }
    }
}

impl SettableValue for FlattenedValue {
    fn get(&self) -> Datum {
        match self.outer.get() {
            Datum::Value(inner) => inner.get(),
            _ => Datum::Null,
        }
    }

    fn stamp(&self) -> u64 {
        let inner = self.inner().map_or(0, |inner| inner.stamp());
        self.outer.stamp().wrapping_add(inner)
    }

    fn is_enabled(&self) -> Option<String> {
        match self.inner() {
            Some(inner) => inner.is_enabled(),
            None => Some("No value to set".to_string()),
        }
    }

    fn is_acceptable(&self, value: &Datum) -> Option<String> {
        match self.inner() {
            Some(inner) => inner.is_acceptable(value),
            None => Some("No value to set".to_string()),
        }
    }

    fn set(&self, value: Datum) -> ReactiveResult<Datum> {
        match self.inner() {
            Some(inner) => inner.set(value),
            None => Err(ReactiveError::rejected("No value to set")),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSource;

    fn doubled() -> MapFn {
        Arc::new(|d: &Datum| match d {
            Datum::Int(i) => Datum::Int(i * 2),
            _ => Datum::Null,
        })
    }

    struct Halve;

    impl ValueReverse for Halve {
        fn enabled(&self, source: &dyn SettableValue) -> Option<String> {
            source.is_enabled()
        }

        fn accept(&self, source: &dyn SettableValue, target: &Datum) -> Option<String> {
            match target {
                Datum::Int(i) if i % 2 == 0 => source.is_acceptable(&Datum::Int(i / 2)),
                _ => Some("Odd".to_string()),
            }
        }

        fn apply(&self, source: &dyn SettableValue, target: Datum) -> ReactiveResult<()> {
            let half = target.as_int().map(|i| i / 2).unwrap_or_default();
            source.set(Datum::Int(half)).map(|_| ())
        }
    }

    #[test]
    fn test_simple_value_set_advances_stamp() {
        let value = SimpleValue::new(Datum::Int(1));
        let before = value.stamp();
        assert_eq!(value.set(Datum::Int(2)), Ok(Datum::Int(1)));
        assert_eq!(value.get(), Datum::Int(2));
        assert!(value.stamp() > before);
    }

    #[test]
    fn test_simple_value_accept_rejects() {
        let value = SimpleValue::with_accept(
            Datum::Int(1),
            Arc::new(|d: &Datum| match d {
                Datum::Int(_) => None,
                _ => Some("Not an int".to_string()),
            }),
        );
        assert_eq!(
            value.set(Datum::text("x")),
            Err(ReactiveError::rejected("Not an int"))
        );
        assert_eq!(value.get(), Datum::Int(1));
    }

    #[test]
    fn test_constant_is_not_settable() {
        let value = ConstantValue::new(Datum::Int(3));
        assert!(value.is_enabled().is_some());
        assert!(value.set(Datum::Int(4)).is_err());
    }

    #[test]
    fn test_mapped_value_reverse() {
        let source: Arc<SimpleValue> = Arc::new(SimpleValue::new(Datum::Int(5)));
        let mapped = MappedValue::new(source.clone(), doubled(), Some(Arc::new(Halve)));
        assert_eq!(mapped.get(), Datum::Int(10));
        assert_eq!(mapped.set(Datum::Int(20)), Ok(Datum::Int(10)));
        assert_eq!(source.get(), Datum::Int(10));
        assert_eq!(mapped.is_acceptable(&Datum::Int(3)), Some("Odd".to_string()));
    }

    #[test]
    fn test_mapped_value_without_reverse_rejects() {
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(5)));
        let mapped = MappedValue::new(source, doubled(), None);
        assert!(mapped.is_enabled().is_some());
        assert!(mapped.set(Datum::Int(2)).is_err());
    }

    #[test]
    fn test_filtered_value_reads_null_when_excluded() {
        let source = Arc::new(SimpleValue::new(Datum::Int(5)));
        let filtered = FilteredValue::new(
            source.clone(),
            Arc::new(|d: &Datum| d.as_int().is_some_and(|i| i > 0)),
        );
        assert_eq!(filtered.get(), Datum::Int(5));
        source.replace(Datum::Int(-5));
        assert_eq!(filtered.get(), Datum::Null);
        assert!(filtered.set(Datum::Int(-1)).is_err());
        assert!(filtered.set(Datum::Int(1)).is_ok());
    }

    #[test]
    fn test_disabled_value_reports_message() {
        let source = Arc::new(SimpleValue::new(Datum::Int(1)));
        let message = Arc::new(SimpleValue::new(Datum::text("Locked")));
        let disabled = DisabledValue::new(source, message.clone());
        assert_eq!(disabled.is_enabled(), Some("Locked".to_string()));
        assert!(disabled.set(Datum::Int(2)).is_err());
        message.replace(Datum::Null);
        assert_eq!(disabled.is_enabled(), None);
        assert!(disabled.set(Datum::Int(2)).is_ok());
    }

    #[test]
    fn test_refreshing_value_stamp_follows_event() {
        let source = Arc::new(SimpleValue::new(Datum::Int(1)));
        let event = Arc::new(EventSource::new());
        let refreshing = RefreshingValue::new(source, event.clone());
        let before = refreshing.stamp();
        event.fire(&Datum::Null);
        assert_ne!(refreshing.stamp(), before);
    }

    #[test]
    fn test_flattened_value_follows_inner() {
        let first: SettableRef = Arc::new(SimpleValue::new(Datum::Int(1)));
        let second: SettableRef = Arc::new(SimpleValue::new(Datum::Int(2)));
        let outer = Arc::new(SimpleValue::new(Datum::Value(first.clone())));
        let flat = FlattenedValue::new(outer.clone());
        assert_eq!(flat.get(), Datum::Int(1));
        flat.set(Datum::Int(7)).unwrap();
        assert_eq!(first.get(), Datum::Int(7));
        outer.replace(Datum::Value(second));
        assert_eq!(flat.get(), Datum::Int(2));
    }
}
