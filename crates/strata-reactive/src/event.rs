//! Reactive event streams

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::datum::Datum;
use crate::value::{MapFn, PredicateFn};

/// Receives fired events
pub type Listener = Arc<dyn Fn(&Datum) + Send + Sync>;

/// A stream of events
pub trait ObservableEvent: Send + Sync + fmt::Debug {
    /// Register a listener until the returned subscription is released
    fn subscribe(&self, listener: Listener) -> Subscription;

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to an event stream
pub type EventRef = Arc<dyn ObservableEvent>;

/// Handle that removes a listener when released
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription released by `release`
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Subscription with nothing to release
    pub fn empty() -> Self {
        Self { release: None }
    }

    /// Remove the listener
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

// ============================================================================
// Event source
// ============================================================================

type ListenerList = Arc<Mutex<Vec<(u64, Listener)>>>;

/// An event stream fired explicitly
#[derive(Default)]
pub struct EventSource {
    listeners: ListenerList,
    next_id: AtomicU64,
    fired: AtomicU64,
}

impl EventSource {
    /// Create an event source with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every current listener
    pub fn fire(&self, event: &Datum) {
        self.fired.fetch_add(1, Ordering::AcqRel);
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Number of times the event has fired
    pub fn fire_count(&self) -> u64 {
        self.fired.load(Ordering::Acquire)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl ObservableEvent for EventSource {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.listeners.lock().push((id, listener));
        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|(other, _)| *other != id);
            }
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("listeners", &self.listener_count())
            .field("fired", &self.fire_count())
            .finish()
    }
}

// ============================================================================
// Derived events
// ============================================================================

/// Events of a source mapped through a function
pub struct MappedEvent {
    source: EventRef,
    map: MapFn,
}

impl MappedEvent {
    /// Map events of `source`
    pub fn new(source: EventRef, map: MapFn) -> Self {
        Self { source, map }
    }

    /// The mapped source
    pub fn source(&self) -> &EventRef {
        &self.source
    }
}

impl ObservableEvent for MappedEvent {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let map = self.map.clone();
        self.source
            .subscribe(Arc::new(move |event: &Datum| listener(&map(event))))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for MappedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedEvent")
            .field("source", &self.source)
            .finish()
    }
}

/// Events of a source that pass a test
pub struct FilteredEvent {
    source: EventRef,
    test: PredicateFn,
}

impl FilteredEvent {
    /// Filter events of `source`
    pub fn new(source: EventRef, test: PredicateFn) -> Self {
        Self { source, test }
    }

    /// The filtered source
    pub fn source(&self) -> &EventRef {
        &self.source
    }
}

impl ObservableEvent for FilteredEvent {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let test = self.test.clone();
        self.source.subscribe(Arc::new(move |event: &Datum| {
            if test(event) {
                listener(event);
            }
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for FilteredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredEvent")
            .field("source", &self.source)
            .finish()
    }
}

/// Events of a source after the first `times` for each subscriber
#[derive(Debug)]
pub struct SkipEvent {
    source: EventRef,
    times: usize,
}

impl SkipEvent {
    /// Skip the first `times` events of `source`
    pub fn new(source: EventRef, times: usize) -> Self {
        Self { source, times }
    }

    /// The source
    pub fn source(&self) -> &EventRef {
        &self.source
    }
}

impl ObservableEvent for SkipEvent {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let seen = AtomicUsize::new(0);
        let times = self.times;
        self.source.subscribe(Arc::new(move |event: &Datum| {
            if seen.fetch_add(1, Ordering::AcqRel) >= times {
                listener(event);
            }
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Only the first `times` events of a source for each subscriber
#[derive(Debug)]
pub struct TakeEvent {
    source: EventRef,
    times: usize,
}

impl TakeEvent {
    /// Take the first `times` events of `source`
    pub fn new(source: EventRef, times: usize) -> Self {
        Self { source, times }
    }

    /// The source
    pub fn source(&self) -> &EventRef {
        &self.source
    }
}

impl ObservableEvent for TakeEvent {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let seen = AtomicUsize::new(0);
        let times = self.times;
        self.source.subscribe(Arc::new(move |event: &Datum| {
            if seen.fetch_add(1, Ordering::AcqRel) < times {
                listener(event);
            }
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Events of a source until another event first fires
#[derive(Debug)]
pub struct TakeUntilEvent {
    source: EventRef,
    until: EventRef,
}

impl TakeUntilEvent {
    /// Pass events of `source` until `until` fires
    pub fn new(source: EventRef, until: EventRef) -> Self {
        Self { source, until }
    }

    /// The source
    pub fn source(&self) -> &EventRef {
        &self.source
    }

    /// The terminating event
    pub fn until(&self) -> &EventRef {
        &self.until
    }
}

impl ObservableEvent for TakeUntilEvent {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let done = Arc::new(AtomicBool::new(false));
        let finished = done.clone();
        let stop = self.until.subscribe(Arc::new(move |_: &Datum| {
            finished.store(true, Ordering::Release);
        }));
        let events = self.source.subscribe(Arc::new(move |event: &Datum| {
            if !done.load(Ordering::Acquire) {
                listener(event);
            }
        }));
        Subscription::new(move || {
            events.unsubscribe();
            stop.unsubscribe();
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Events of a source, minus any fired while a listener is being subscribed
#[derive(Debug)]
pub struct NoInitEvent {
    source: EventRef,
}

impl NoInitEvent {
    /// Drop the initial events `source` fires on subscription
    pub fn new(source: EventRef) -> Self {
        Self { source }
    }

    /// The source
    pub fn source(&self) -> &EventRef {
        &self.source
    }
}

impl ObservableEvent for NoInitEvent {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let subscribing = Arc::new(AtomicBool::new(true));
        let initial = subscribing.clone();
        let subscription = self.source.subscribe(Arc::new(move |event: &Datum| {
            if !initial.load(Ordering::Acquire) {
                listener(event);
            }
        }));
        subscribing.store(false, Ordering::Release);
        subscription
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
