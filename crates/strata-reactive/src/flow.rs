//! Deferred collection pipelines
//!
//! A `CollectionFlow` is a source collection plus an ordered list of stages.
//! Nothing is computed until the flow is collected:
//!
//! - **Passive** collections recompute the pipeline on every read and push
//!   writes back through it. Only flows made of mapping, reversal, refresh and
//!   unmodifiable stages can be collected passively.
//! - **Refresh-each** stages watch one event per element. The watched events
//!   are resynchronized with the elements whenever the collection is read.
//! - **Active** collections cache the pipeline's output, recompute it when the
//!   source changes, and freeze when their lifespan ends.

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::collection::{CollectionRef, ObservableCollection, UNMODIFIABLE};
use crate::datum::Datum;
use crate::error::{ReactiveError, ReactiveResult};
use crate::event::{EventRef, Subscription};
use crate::lifespan::Lifespan;
use crate::value::{MapFn, PredicateFn};

/// Orders two elements
pub type CompareFn = Arc<dyn Fn(&Datum, &Datum) -> CmpOrdering + Send + Sync>;

/// The event whose firing refreshes an element, if any
pub type RefreshFn = Arc<dyn Fn(&Datum) -> Option<EventRef> + Send + Sync>;

/// Pushes changes on mapped elements back to the source elements
pub trait ElementReverse: Send + Sync {
    /// `None` if reversal is currently possible
    fn enabled(&self) -> Option<String>;

    /// `None` if `target` may replace a mapped element
    fn accept(&self, target: &Datum) -> Option<String>;

    /// Reverse a replaced element
    ///
    /// Returns the new source element, or `None` if the reverse already
    /// modified the source itself.
    fn reverse(&self, target: &Datum, current: &Datum) -> ReactiveResult<Option<Datum>>;

    /// `None` if `target` may be added
    fn can_add(&self, target: &Datum) -> Option<String>;

    /// Reverse an added element, with the same return convention as `reverse`
    fn add(&self, target: &Datum) -> ReactiveResult<Option<Datum>>;
}

/// One stage of a flow
#[derive(Clone)]
pub enum FlowStage {
    /// Map every element, optionally reversibly
    Map {
        /// Forward mapping
        map: MapFn,
        /// Reverse mapping, if declared
        reverse: Option<Arc<dyn ElementReverse>>,
    },
    /// Keep elements passing the test
    Filter(PredicateFn),
    /// Sort elements
    Sort(CompareFn),
    /// Reverse element order
    Reverse,
    /// Drop later duplicates
    Distinct,
    /// Treat each firing of the event as a change
    Refresh(EventRef),
    /// Treat each firing of an element's own event as a change
    RefreshEach(RefreshFn),
    /// Keep elements that are (or, when not inclusive, are not) in another
    /// collection
    WhereContained {
        /// Collection tested for membership
        filter: CollectionRef,
        /// Whether contained elements are kept
        inclusive: bool,
    },
    /// Reject every modification
    Unmodifiable,
    /// Replace nested collections and values by their content
    Flatten,
}

impl FlowStage {
    /// Short name used in messages
    pub fn name(&self) -> &'static str {
        match self {
            FlowStage::Map { .. } => "map",
            FlowStage::Filter(_) => "filter",
            FlowStage::Sort(_) => "sort",
            FlowStage::Reverse => "reverse",
            FlowStage::Distinct => "distinct",
            FlowStage::Refresh(_) => "refresh",
            FlowStage::RefreshEach(_) => "refresh-each",
            FlowStage::WhereContained { .. } => "where-contained",
            FlowStage::Unmodifiable => "unmodifiable",
            FlowStage::Flatten => "flatten",
        }
    }

    /// Whether a passive view can be kept over this stage
    pub fn supports_passive(&self) -> bool {
        matches!(
            self,
            FlowStage::Map { .. }
                | FlowStage::Reverse
                | FlowStage::Refresh(_)
                | FlowStage::RefreshEach(_)
                | FlowStage::Unmodifiable
        )
    }

    fn apply(&self, elements: Vec<Datum>) -> Vec<Datum> {
        match self {
            FlowStage::Map { map, .. } => elements.iter().map(|e| map(e)).collect(),
            FlowStage::Filter(test) => elements.into_iter().filter(|e| test(e)).collect(),
            FlowStage::Sort(compare) => {
                let mut elements = elements;
                elements.sort_by(|a, b| compare(a, b));
                elements
            }
            FlowStage::Reverse => {
                let mut elements = elements;
                elements.reverse();
                elements
            }
            FlowStage::Distinct => {
                let mut distinct: Vec<Datum> = Vec::with_capacity(elements.len());
                for element in elements {
                    if !distinct.contains(&element) {
                        distinct.push(element);
                    }
                }
                distinct
            }
            FlowStage::WhereContained { filter, inclusive } => {
                let contained = filter.elements();
                elements
                    .into_iter()
                    .filter(|e| contained.contains(e) == *inclusive)
                    .collect()
            }
            FlowStage::Refresh(_) | FlowStage::RefreshEach(_) | FlowStage::Unmodifiable => elements,
            FlowStage::Flatten => elements
                .into_iter()
                .flat_map(|element| match element {
                    Datum::Collection(inner) => inner.elements(),
                    Datum::Value(inner) => vec![inner.get()],
                    other => vec![other],
                })
                .collect(),
        }
    }
}

impl fmt::Debug for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a flow is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectStrategy {
    /// Passive when the flow supports it, else active
    #[default]
    Auto,
    /// Recomputed view
    Passive,
    /// Cached, invalidated on teardown
    Active,
}

/// A deferred collection pipeline
#[derive(Clone)]
pub struct CollectionFlow {
    source: CollectionRef,
    stages: Vec<FlowStage>,
}

impl CollectionFlow {
    /// Start a flow over `source`
    pub fn new(source: CollectionRef) -> Self {
        Self {
            source,
            stages: Vec::new(),
        }
    }

    /// The source collection
    pub fn source(&self) -> &CollectionRef {
        &self.source
    }

    /// The stages, in application order
    pub fn stages(&self) -> &[FlowStage] {
        &self.stages
    }

    /// Append a stage
    pub fn then(mut self, stage: FlowStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a mapping stage
    pub fn map(self, map: MapFn, reverse: Option<Arc<dyn ElementReverse>>) -> Self {
        self.then(FlowStage::Map { map, reverse })
    }

    /// Append a filter stage
    pub fn filter(self, test: PredicateFn) -> Self {
        self.then(FlowStage::Filter(test))
    }

    /// Append a sort stage
    pub fn sorted(self, compare: CompareFn) -> Self {
        self.then(FlowStage::Sort(compare))
    }

    /// Append an order reversal stage
    pub fn reversed(self) -> Self {
        self.then(FlowStage::Reverse)
    }

    /// Append a distinct stage
    pub fn distinct(self) -> Self {
        self.then(FlowStage::Distinct)
    }

    /// Append a refresh stage
    pub fn refresh(self, on: EventRef) -> Self {
        self.then(FlowStage::Refresh(on))
    }

    /// Append a stage refreshing each element on its own event
    pub fn refresh_each(self, on: RefreshFn) -> Self {
        self.then(FlowStage::RefreshEach(on))
    }

    /// Append a membership filter against `filter`
    pub fn where_contained(self, filter: CollectionRef, inclusive: bool) -> Self {
        self.then(FlowStage::WhereContained { filter, inclusive })
    }

    /// Append an unmodifiable stage
    pub fn unmodifiable(self) -> Self {
        self.then(FlowStage::Unmodifiable)
    }

    /// Append a flatten stage
    pub fn flatten(self) -> Self {
        self.then(FlowStage::Flatten)
    }

    /// Whether every stage supports a passive view
    pub fn supports_passive(&self) -> bool {
        self.stages.iter().all(FlowStage::supports_passive)
    }

    /// The first stage preventing a passive view
    pub fn passive_blocker(&self) -> Option<&FlowStage> {
        self.stages.iter().find(|s| !s.supports_passive())
    }

    /// Run the pipeline over the source's current elements
    pub fn evaluate(&self) -> Vec<Datum> {
        self.stages
            .iter()
            .fold(self.source.elements(), |elements, stage| stage.apply(elements))
    }

    /// Elements before the first stage and after every stage
    fn levels(&self) -> Vec<Vec<Datum>> {
        let mut levels = Vec::with_capacity(self.stages.len() + 1);
        levels.push(self.source.elements());
        for stage in &self.stages {
            let next = stage.apply(levels[levels.len() - 1].clone());
            levels.push(next);
        }
        levels
    }

    /// Stamp of the source plus every collection a stage reads
    fn dependency_stamp(&self) -> u64 {
        self.stages.iter().fold(self.source.stamp(), |stamp, stage| match stage {
            FlowStage::WhereContained { filter, .. } => stamp.wrapping_add(filter.stamp()),
            _ => stamp,
        })
    }

    fn has_refresh_each(&self) -> bool {
        self.stages.iter().any(|s| matches!(s, FlowStage::RefreshEach(_)))
    }

    fn is_volatile(&self) -> bool {
        self.stages.iter().any(|s| matches!(s, FlowStage::Flatten))
    }

    /// Materialize with `strategy`
    pub fn collect(self, strategy: CollectStrategy, lifespan: &Lifespan) -> ReactiveResult<CollectionRef> {
        match strategy {
            CollectStrategy::Passive => self.collect_passive(),
            CollectStrategy::Active => Ok(self.collect_active(lifespan)),
            CollectStrategy::Auto if self.supports_passive() => self.collect_passive(),
            CollectStrategy::Auto => Ok(self.collect_active(lifespan)),
        }
    }

    /// Materialize as a recomputed view
    pub fn collect_passive(self) -> ReactiveResult<CollectionRef> {
        if let Some(stage) = self.passive_blocker() {
            return Err(ReactiveError::Unsupported(format!(
                "passive collection over a {} stage",
                stage.name()
            )));
        }
        let refresh = RefreshCounter::subscribe(&self.stages);
        refresh.sync(&self);
        Ok(Arc::new(PassiveCollection { flow: self, refresh }))
    }

    /// Materialize as a cached collection that freezes when `lifespan` ends
    pub fn collect_active(self, lifespan: &Lifespan) -> CollectionRef {
        let refresh = RefreshCounter::subscribe(&self.stages);
        refresh.sync(&self);
        let alive = Arc::new(AtomicBool::new(true));
        let collection = Arc::new(ActiveCollection {
            flow: self,
            refresh: refresh.clone(),
            cache: RwLock::new(ActiveCache::default()),
            alive: alive.clone(),
        });
        collection.elements();
        lifespan.on_end(move || {
            alive.store(false, Ordering::Release);
            refresh.release();
        });
        collection
    }

    fn check_add(&self, value: &Datum) -> Option<String> {
        for stage in self.stages.iter().rev() {
            match stage {
                FlowStage::Unmodifiable => return Some(UNMODIFIABLE.to_string()),
                FlowStage::Flatten => return Some("Cannot add through a flatten stage".to_string()),
                FlowStage::Filter(test) if !test(value) => {
                    return Some("Element rejected by filter".to_string())
                }
                FlowStage::WhereContained { filter, inclusive }
                    if filter.elements().contains(value) != *inclusive =>
                {
                    return Some("Element rejected by filter".to_string())
                }
                FlowStage::Map { reverse: None, .. } => {
                    return Some("No reverse defined for mapping".to_string())
                }
                FlowStage::Map {
                    reverse: Some(reverse),
                    ..
                } => return reverse.can_add(value),
                _ => {}
            }
        }
        self.source.can_add(value)
    }

    fn write_add(&self, value: Datum) -> ReactiveResult<()> {
        let mut value = value;
        for stage in self.stages.iter().rev() {
            match stage {
                FlowStage::Unmodifiable => return Err(ReactiveError::rejected(UNMODIFIABLE)),
                FlowStage::Flatten => {
                    return Err(ReactiveError::Unsupported("add through flatten".to_string()))
                }
                FlowStage::Filter(test) if !test(&value) => {
                    return Err(ReactiveError::rejected("Element rejected by filter"))
                }
                FlowStage::WhereContained { filter, inclusive }
                    if filter.elements().contains(&value) != *inclusive =>
                {
                    return Err(ReactiveError::rejected("Element rejected by filter"))
                }
                FlowStage::Map { reverse: None, .. } => {
                    return Err(ReactiveError::rejected("No reverse defined for mapping"))
                }
                FlowStage::Map {
                    reverse: Some(reverse),
                    ..
                } => {
                    if let Some(message) = reverse.can_add(&value) {
                        return Err(ReactiveError::Rejected(message));
                    }
                    match reverse.add(&value)? {
                        Some(source_value) => value = source_value,
                        None => return Ok(()),
                    }
                }
                _ => {}
            }
        }
        self.source.add(value)
    }

    fn write_set(&self, index: usize, value: Datum) -> ReactiveResult<Datum> {
        let levels = self.levels();
        let output = &levels[levels.len() - 1];
        if index >= output.len() {
            return Err(ReactiveError::IndexOutOfBounds {
                index,
                size: output.len(),
            });
        }
        let previous = output[index].clone();
        let mut index = index;
        let mut value = value;
        for (i, stage) in self.stages.iter().enumerate().rev() {
            match stage {
                FlowStage::Reverse => index = levels[i].len() - 1 - index,
                FlowStage::Refresh(_) | FlowStage::RefreshEach(_) => {}
                FlowStage::Unmodifiable => return Err(ReactiveError::rejected(UNMODIFIABLE)),
                FlowStage::Map { reverse: None, .. } => {
                    return Err(ReactiveError::rejected("No reverse defined for mapping"))
                }
                FlowStage::Map {
                    reverse: Some(reverse),
                    ..
                } => {
                    if let Some(message) = reverse.accept(&value) {
                        return Err(ReactiveError::Rejected(message));
                    }
                    match reverse.reverse(&value, &levels[i][index])? {
                        Some(source_value) => value = source_value,
                        None => return Ok(previous),
                    }
                }
                other => {
                    return Err(ReactiveError::Unsupported(format!(
                        "replace through a {} stage",
                        other.name()
                    )))
                }
            }
        }
        self.source.set_at(index, value)?;
        Ok(previous)
    }

    fn write_remove(&self, index: usize) -> ReactiveResult<Datum> {
        let levels = self.levels();
        let output = &levels[levels.len() - 1];
        if index >= output.len() {
            return Err(ReactiveError::IndexOutOfBounds {
                index,
                size: output.len(),
            });
        }
        let removed = output[index].clone();
        let mut index = index;
        for (i, stage) in self.stages.iter().enumerate().rev() {
            match stage {
                FlowStage::Reverse => index = levels[i].len() - 1 - index,
                FlowStage::Refresh(_) | FlowStage::RefreshEach(_) | FlowStage::Map { .. } => {}
                FlowStage::Unmodifiable => return Err(ReactiveError::rejected(UNMODIFIABLE)),
                other => {
                    return Err(ReactiveError::Unsupported(format!(
                        "remove through a {} stage",
                        other.name()
                    )))
                }
            }
        }
        self.source.remove_at(index)?;
        Ok(removed)
    }
}

impl fmt::Debug for CollectionFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionFlow")
            .field("source", &self.source)
            .field("stages", &self.stages)
            .finish()
    }
}

/// Counts firings of every refresh stage's event
struct RefreshCounter {
    fired: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
    /// Per-element events of refresh-each stages, keyed by event address
    watched: Mutex<Vec<(usize, Subscription)>>,
}

impl RefreshCounter {
    fn subscribe(stages: &[FlowStage]) -> Arc<RefreshCounter> {
        let counter = Arc::new(RefreshCounter {
            fired: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
            watched: Mutex::new(Vec::new()),
        });
        for stage in stages {
            if let FlowStage::Refresh(event) = stage {
                let subscription = counter.watch(event);
                counter.subscriptions.lock().push(subscription);
            }
        }
        counter
    }

    fn watch(self: &Arc<Self>, event: &EventRef) -> Subscription {
        let weak = Arc::downgrade(self);
        event.subscribe(Arc::new(move |_: &Datum| {
            if let Some(counter) = weak.upgrade() {
                counter.fired.fetch_add(1, Ordering::AcqRel);
            }
        }))
    }

    /// Watch the events of the current elements of every refresh-each stage
    /// and drop those no element asks for anymore
    fn sync(self: &Arc<Self>, flow: &CollectionFlow) {
        if !flow.has_refresh_each() {
            return;
        }
        let levels = flow.levels();
        let mut wanted: Vec<(usize, EventRef)> = Vec::new();
        for (i, stage) in flow.stages.iter().enumerate() {
            if let FlowStage::RefreshEach(on) = stage {
                for element in &levels[i] {
                    if let Some(event) = on(element) {
                        let key = Arc::as_ptr(&event) as *const () as usize;
                        if !wanted.iter().any(|(k, _)| *k == key) {
                            wanted.push((key, event));
                        }
                    }
                }
            }
        }
        let mut watched = self.watched.lock();
        let (kept, stale): (Vec<_>, Vec<_>) = std::mem::take(&mut *watched)
            .into_iter()
            .partition(|(key, _)| wanted.iter().any(|(k, _)| k == key));
        for (_, subscription) in stale {
            subscription.unsubscribe();
        }
        *watched = kept;
        for (key, event) in wanted {
            if !watched.iter().any(|(k, _)| *k == key) {
                let subscription = self.watch(&event);
                watched.push((key, subscription));
            }
        }
    }

    fn count(&self) -> u64 {
        self.fired.load(Ordering::Acquire)
    }

    fn release(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        let watched = std::mem::take(&mut *self.watched.lock());
        for (_, subscription) in watched {
            subscription.unsubscribe();
        }
    }
}

// ============================================================================
// Collected flows
// ============================================================================

/// A flow recomputed on every read
pub struct PassiveCollection {
    flow: CollectionFlow,
    refresh: Arc<RefreshCounter>,
}

impl PassiveCollection {
    /// The collected flow
    pub fn flow(&self) -> &CollectionFlow {
        &self.flow
    }
}

impl ObservableCollection for PassiveCollection {
    fn elements(&self) -> Vec<Datum> {
        self.refresh.sync(&self.flow);
        self.flow.evaluate()
    }

    fn stamp(&self) -> u64 {
        self.refresh.sync(&self.flow);
        self.flow.dependency_stamp().wrapping_add(self.refresh.count())
    }

    fn can_add(&self, value: &Datum) -> Option<String> {
        self.flow.check_add(value)
    }

    fn add(&self, value: Datum) -> ReactiveResult<()> {
        self.flow.write_add(value)
    }

    fn set_at(&self, index: usize, value: Datum) -> ReactiveResult<Datum> {
        self.flow.write_set(index, value)
    }

    fn remove_at(&self, index: usize) -> ReactiveResult<Datum> {
        self.flow.write_remove(index)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PassiveCollection {
    fn drop(&mut self) {
        self.refresh.release();
    }
}

impl fmt::Debug for PassiveCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassiveCollection")
            .field("flow", &self.flow)
            .finish()
    }
}

#[derive(Default)]
struct ActiveCache {
    stamp: Option<u64>,
    elements: Vec<Datum>,
}

/// A flow whose output is cached until its source changes
pub struct ActiveCollection {
    flow: CollectionFlow,
    refresh: Arc<RefreshCounter>,
    cache: RwLock<ActiveCache>,
    alive: Arc<AtomicBool>,
}

impl ActiveCollection {
    /// The collected flow
    pub fn flow(&self) -> &CollectionFlow {
        &self.flow
    }

    /// Whether the owning lifespan is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn current_stamp(&self) -> u64 {
        self.refresh.sync(&self.flow);
        self.flow.dependency_stamp().wrapping_add(self.refresh.count())
    }
}

impl ObservableCollection for ActiveCollection {
    fn elements(&self) -> Vec<Datum> {
        if !self.is_alive() {
            return self.cache.read().elements.clone();
        }
        let stamp = self.current_stamp();
        if !self.flow.is_volatile() {
            let cache = self.cache.read();
            if cache.stamp == Some(stamp) {
                return cache.elements.clone();
            }
        }
        let fresh = self.flow.evaluate();
        *self.cache.write() = ActiveCache {
            stamp: Some(stamp),
            elements: fresh.clone(),
        };
        fresh
    }

    fn stamp(&self) -> u64 {
        if self.is_alive() {
            self.current_stamp()
        } else {
            self.cache.read().stamp.unwrap_or(0)
        }
    }

    fn can_add(&self, value: &Datum) -> Option<String> {
        if !self.is_alive() {
            return Some("Collection is no longer active".to_string());
        }
        self.flow.check_add(value)
    }

    fn add(&self, value: Datum) -> ReactiveResult<()> {
        if !self.is_alive() {
            return Err(ReactiveError::rejected("Collection is no longer active"));
        }
        self.flow.write_add(value)
    }

    fn set_at(&self, _index: usize, _value: Datum) -> ReactiveResult<Datum> {
        Err(ReactiveError::Unsupported(
            "replace by index in an active collection".to_string(),
        ))
    }

    fn remove_at(&self, _index: usize) -> ReactiveResult<Datum> {
        Err(ReactiveError::Unsupported(
            "remove by index in an active collection".to_string(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for ActiveCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCollection")
            .field("flow", &self.flow)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionShape, SimpleCollection};
    use crate::event::EventSource;

    fn ints(values: &[i64]) -> Vec<Datum> {
        values.iter().map(|i| Datum::Int(*i)).collect()
    }

    fn source(values: &[i64]) -> Arc<SimpleCollection> {
        Arc::new(SimpleCollection::new(CollectionShape::LIST, ints(values)))
    }

    fn times_ten() -> MapFn {
        Arc::new(|d: &Datum| Datum::Int(d.as_int().unwrap_or(0) * 10))
    }

    struct TenthReverse;

    impl ElementReverse for TenthReverse {
        fn enabled(&self) -> Option<String> {
            None
        }

        fn accept(&self, target: &Datum) -> Option<String> {
            match target.as_int() {
                Some(i) if i % 10 == 0 => None,
                _ => Some("Not a multiple of ten".to_string()),
            }
        }

        fn reverse(&self, target: &Datum, _current: &Datum) -> ReactiveResult<Option<Datum>> {
            Ok(Some(Datum::Int(target.as_int().unwrap_or(0) / 10)))
        }

        fn can_add(&self, target: &Datum) -> Option<String> {
            self.accept(target)
        }

        fn add(&self, target: &Datum) -> ReactiveResult<Option<Datum>> {
            self.reverse(target, &Datum::Null)
        }
    }

    #[test]
    fn test_passive_view_recomputes() {
        let src = source(&[1, 2, 3]);
        let view = CollectionFlow::new(src.clone())
            .map(times_ten(), None)
            .reversed()
            .collect_passive()
            .unwrap();
        assert_eq!(view.elements(), ints(&[30, 20, 10]));
        src.add(Datum::Int(4)).unwrap();
        assert_eq!(view.elements(), ints(&[40, 30, 20, 10]));
    }

    #[test]
    fn test_passive_write_through_reverse() {
        let src = source(&[1, 2, 3]);
        let view = CollectionFlow::new(src.clone())
            .map(times_ten(), Some(Arc::new(TenthReverse)))
            .reversed()
            .collect_passive()
            .unwrap();
        assert_eq!(view.set_at(0, Datum::Int(90)), Ok(Datum::Int(30)));
        assert_eq!(src.elements(), ints(&[1, 2, 9]));
        view.add(Datum::Int(50)).unwrap();
        assert_eq!(src.elements(), ints(&[1, 2, 9, 5]));
        assert!(view.add(Datum::Int(51)).is_err());
        assert_eq!(view.remove_at(0), Ok(Datum::Int(50)));
        assert_eq!(src.elements(), ints(&[1, 2, 9]));
    }

    #[test]
    fn test_filter_cannot_be_passive() {
        let flow = CollectionFlow::new(source(&[1])).filter(Arc::new(|_: &Datum| true));
        assert!(!flow.supports_passive());
        assert!(flow.collect_passive().is_err());
    }

    #[test]
    fn test_auto_strategy_chooses_active_for_filter() {
        let lifespan = Lifespan::new();
        let collected = CollectionFlow::new(source(&[1, -2, 3]))
            .filter(Arc::new(|d: &Datum| d.as_int().is_some_and(|i| i > 0)))
            .collect(CollectStrategy::Auto, &lifespan)
            .unwrap();
        assert!(collected.as_any().is::<ActiveCollection>());
        assert_eq!(collected.elements(), ints(&[1, 3]));
    }

    #[test]
    fn test_active_collection_tracks_source_until_teardown() {
        let src = source(&[3, 1, 2]);
        let lifespan = Lifespan::new();
        let sorted = CollectionFlow::new(src.clone())
            .sorted(Arc::new(|a: &Datum, b: &Datum| a.compare(b)))
            .collect_active(&lifespan);
        assert_eq!(sorted.elements(), ints(&[1, 2, 3]));
        src.add(Datum::Int(0)).unwrap();
        assert_eq!(sorted.elements(), ints(&[0, 1, 2, 3]));
        lifespan.end();
        src.add(Datum::Int(-1)).unwrap();
        assert_eq!(sorted.elements(), ints(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_distinct_and_flatten() {
        let inner_a: CollectionRef = source(&[1, 2]);
        let inner_b: CollectionRef = source(&[2, 3]);
        let outer = Arc::new(SimpleCollection::new(
            CollectionShape::LIST,
            vec![Datum::Collection(inner_a), Datum::Collection(inner_b.clone())],
        ));
        let flat = CollectionFlow::new(outer).flatten().distinct();
        assert_eq!(flat.evaluate(), ints(&[1, 2, 3]));
        inner_b.add(Datum::Int(4)).unwrap();
        let lifespan = Lifespan::new();
        let collected = flat.collect_active(&lifespan);
        assert_eq!(collected.elements(), ints(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_refresh_advances_stamp() {
        let event = Arc::new(EventSource::new());
        let view = CollectionFlow::new(source(&[1]))
            .refresh(event.clone())
            .collect_passive()
            .unwrap();
        let before = view.stamp();
        event.fire(&Datum::Null);
        assert_ne!(view.stamp(), before);
        drop(view);
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn test_unmodifiable_rejects_writes() {
        let view = CollectionFlow::new(source(&[1]))
            .unmodifiable()
            .collect_passive()
            .unwrap();
        assert!(view.can_add(&Datum::Int(2)).is_some());
        assert!(view.add(Datum::Int(2)).is_err());
        assert!(view.set_at(0, Datum::Int(2)).is_err());
    }

    #[test]
    fn test_where_contained_follows_filter_collection() {
        let allowed = source(&[2, 3]);
        let lifespan = Lifespan::new();
        let kept = CollectionFlow::new(source(&[1, 2, 3, 4]))
            .where_contained(allowed.clone(), true)
            .collect(CollectStrategy::Auto, &lifespan)
            .unwrap();
        let dropped = CollectionFlow::new(source(&[1, 2, 3, 4]))
            .where_contained(allowed.clone(), false)
            .collect(CollectStrategy::Auto, &lifespan)
            .unwrap();
        assert_eq!(kept.elements(), ints(&[2, 3]));
        assert_eq!(dropped.elements(), ints(&[1, 4]));
        allowed.add(Datum::Int(4)).unwrap();
        assert_eq!(kept.elements(), ints(&[2, 3, 4]));
        assert_eq!(dropped.elements(), ints(&[1]));
        assert!(kept.can_add(&Datum::Int(9)).is_some());
        assert!(kept.can_add(&Datum::Int(2)).is_none());
    }

    #[test]
    fn test_refresh_each_watches_element_events() {
        let odd = Arc::new(EventSource::new());
        let watched: EventRef = odd.clone();
        let src = source(&[2, 4]);
        let view = CollectionFlow::new(src.clone())
            .refresh_each(Arc::new(move |d: &Datum| {
                d.as_int().filter(|i| i % 2 != 0).map(|_| watched.clone())
            }))
            .collect_passive()
            .unwrap();
        assert_eq!(odd.listener_count(), 0);
        src.add(Datum::Int(5)).unwrap();
        let before = view.stamp();
        assert_eq!(odd.listener_count(), 1);
        odd.fire(&Datum::Null);
        assert_ne!(view.stamp(), before);
        src.remove_at(2).unwrap();
        let _ = view.stamp();
        assert_eq!(odd.listener_count(), 0);
    }
}
