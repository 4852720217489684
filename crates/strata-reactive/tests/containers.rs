//! Containers composed the way the engine composes them

use std::sync::Arc;
use strata_reactive::{
    CollectStrategy, CollectionFlow, CollectionShape, Datum, FilteredValue, Lifespan, MapFn,
    MappedValue, ObservableCollection, PredicateFn, SettableValue, SimpleCollection, SimpleValue,
};

fn double() -> MapFn {
    Arc::new(|d: &Datum| match d {
        Datum::Int(i) => Datum::Int(i * 2),
        _ => Datum::Null,
    })
}

fn positive() -> PredicateFn {
    Arc::new(|d: &Datum| matches!(d, Datum::Int(i) if *i > 0))
}

// ── Values ──────────────────────────────────────────────────────────────

#[test]
fn test_mapped_then_filtered_value() {
    let source = Arc::new(SimpleValue::new(Datum::Int(5)));
    let mapped = Arc::new(MappedValue::new(source.clone(), double(), None));
    let filtered = FilteredValue::new(mapped, positive());
    assert_eq!(filtered.get(), Datum::Int(10));
    source.set(Datum::Int(-5)).unwrap();
    assert_eq!(filtered.get(), Datum::Null);
}

#[test]
fn test_stamp_moves_with_source() {
    let source = Arc::new(SimpleValue::new(Datum::Int(1)));
    let mapped = MappedValue::new(source.clone(), double(), None);
    let before = mapped.stamp();
    source.set(Datum::Int(2)).unwrap();
    assert_ne!(mapped.stamp(), before);
}

// ── Flows ───────────────────────────────────────────────────────────────

fn numbers() -> Arc<SimpleCollection> {
    Arc::new(SimpleCollection::new(
        CollectionShape::LIST,
        vec![Datum::Int(3), Datum::Int(-1), Datum::Int(2)],
    ))
}

#[test]
fn test_passive_view_tracks_source() {
    let source = numbers();
    let view = CollectionFlow::new(source.clone())
        .filter(positive())
        .map(double(), None)
        .collect(CollectStrategy::Passive, &Lifespan::new())
        .unwrap();
    assert_eq!(view.elements(), vec![Datum::Int(6), Datum::Int(4)]);
    source.add(Datum::Int(5)).unwrap();
    assert_eq!(view.elements(), vec![Datum::Int(6), Datum::Int(4), Datum::Int(10)]);
}

#[test]
fn test_active_collection_freezes_when_lifespan_ends() {
    let source = numbers();
    let lifespan = Lifespan::new();
    let active = CollectionFlow::new(source.clone())
        .filter(positive())
        .collect(CollectStrategy::Active, &lifespan)
        .unwrap();
    assert_eq!(active.len(), 2);
    lifespan.end();
    source.add(Datum::Int(7)).unwrap();
    assert_eq!(active.elements(), vec![Datum::Int(3), Datum::Int(2)]);
}
