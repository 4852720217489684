//! Strata Reactive Primitives
//!
//! The container library the Strata engine programs against:
//! - **Datum**: the dynamically typed element carried by every container (`datum` module)
//! - **Values**: settable, derived, mapped, filtered and disabled values (`value` module)
//! - **Collections**: simple collections plus deferred flows collected
//!   passively or actively (`collection` and `flow` modules)
//! - **Maps, actions and events** (`map`, `action` and `event` modules)
//! - **Lifespans**: teardown handles that invalidate active containers (`lifespan` module)
//!
//! Containers are pull-based: reading a derived container recomputes it from its
//! sources. Every container exposes a `stamp()` that changes whenever its content
//! may have changed, which is what cached (active) containers key on.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_reactive::{Datum, MappedValue, SettableValue, SimpleValue};
//!
//! let source = Arc::new(SimpleValue::new(Datum::Int(5)));
//! let doubled = MappedValue::new(source.clone(), Arc::new(|d: &Datum| match d {
//!     Datum::Int(i) => Datum::Int(i * 2),
//!     _ => Datum::Null,
//! }), None);
//! assert_eq!(doubled.get(), Datum::Int(10));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod action;
pub mod collection;
pub mod datum;
pub mod error;
pub mod event;
pub mod flow;
pub mod lifespan;
pub mod map;
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use action::{ActFn, ActionRef, DisabledAction, FnAction, ObservableAction, SequenceAction};
pub use collection::{
    CollectionRef, CollectionShape, DerivedCollection, ObservableCollection, ReduceFn,
    ReducedValue, SimpleCollection, SizeValue,
};
pub use datum::Datum;
pub use error::{ReactiveError, ReactiveResult};
pub use event::{
    EventRef, EventSource, FilteredEvent, Listener, MappedEvent, NoInitEvent, ObservableEvent,
    SkipEvent, Subscription, TakeEvent, TakeUntilEvent,
};
pub use flow::{
    ActiveCollection, CollectStrategy, CollectionFlow, CompareFn, ElementReverse, FlowStage,
    PassiveCollection, RefreshFn,
};
pub use lifespan::Lifespan;
pub use map::{MapRef, ObservableMap, SimpleMap};
pub use value::{
    AcceptFilteredValue, AcceptFn, ComputeFn, ConstantValue, DerivedValue, DisabledValue,
    FilteredValue, FlattenedValue, MapFn, MappedValue, PredicateFn, RefreshingValue,
    SettableRef, SettableValue, SimpleValue, UnmodifiableValue, ValueReverse,
};
