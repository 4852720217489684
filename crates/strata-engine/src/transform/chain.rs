//! Runtime composition of operation chains
//!
//! Each link of a transformation produces an [`OperationInstantiator`]. The
//! chain fuses consecutive collection links into one deferred flow, composes
//! the resulting segments into a single [`Transform`], and re-derives values
//! for new model instances as cheaply as the links allow.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use strata_reactive::{
    AcceptFilteredValue, CollectStrategy, CollectionFlow, DisabledAction, DisabledValue,
    FilteredEvent, FilteredValue, FlattenedValue, FlowStage, MappedEvent, MappedValue,
    NoInitEvent, ReducedValue, RefreshingValue, SizeValue, SkipEvent, TakeEvent, TakeUntilEvent,
    UnmodifiableValue,
};
use tracing::trace;

use crate::error::InstantiationResult;
use crate::model::{InstantiatorRef, ModelInstance, ModelValue, ValueInstantiator};

/// Runtime side of one link
pub trait OperationInstantiator: Send + Sync {
    /// Derive the link's output from `source`
    fn transform(&self, source: ModelValue, models: &ModelInstance) -> InstantiationResult<ModelValue>;

    /// Whether the link would derive differently in the two instances
    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool>;

    /// Links that can recover their source from their output
    fn as_efficient_copy(&self) -> Option<&dyn EfficientCopy> {
        None
    }

    /// Collection links that become a stage of a fused flow
    fn as_flow(&self) -> Option<&dyn FlowLink> {
        None
    }
}

/// Shared link handle
pub type OperationRef = Arc<dyn OperationInstantiator>;

/// A link whose output remembers the value it was derived from
pub trait EfficientCopy: OperationInstantiator {
    /// The value `target` was derived from
    fn get_source(&self, target: &ModelValue) -> Option<ModelValue> {
        source_of(target)
    }

    /// Re-derive `previous` over `new_source` for the `target` instance
    ///
    /// Keeps `previous` when its source is `new_source` and the link itself
    /// does not differ between the instances.
    fn for_model_copy(
        &self,
        previous: &ModelValue,
        new_source: &ModelValue,
        source: &ModelInstance,
        target: &ModelInstance,
    ) -> InstantiationResult<ModelValue> {
        let same_source = self
            .get_source(previous)
            .is_some_and(|old| old.ptr_eq(new_source));
        if same_source && !self.is_different(source, target)? {
            Ok(previous.clone())
        } else {
            self.transform(new_source.clone(), target)
        }
    }
}

/// A collection link contributing to a fused flow
pub trait FlowLink {
    /// The stage to append; `None` for links that only choose the strategy
    fn stage(&self, models: &ModelInstance) -> InstantiationResult<Option<FlowStage>>;

    /// Strategy the link forces on its flow
    fn strategy(&self) -> Option<CollectStrategy> {
        None
    }
}

fn downcast<T: Any>(value: &dyn Any) -> Option<&T> {
    value.downcast_ref::<T>()
}

/// Source of a value derived by one of the reactive single-source containers
pub fn source_of(target: &ModelValue) -> Option<ModelValue> {
    match target {
        ModelValue::Value(value) => {
            let any = value.as_any();
            let source = downcast::<MappedValue>(any)
                .map(|v| v.source().clone())
                .or_else(|| downcast::<FilteredValue>(any).map(|v| v.source().clone()))
                .or_else(|| downcast::<AcceptFilteredValue>(any).map(|v| v.source().clone()))
                .or_else(|| downcast::<DisabledValue>(any).map(|v| v.source().clone()))
                .or_else(|| downcast::<RefreshingValue>(any).map(|v| v.source().clone()))
                .or_else(|| downcast::<UnmodifiableValue>(any).map(|v| v.source().clone()))
                .or_else(|| downcast::<FlattenedValue>(any).map(|v| v.source().clone()));
            match source {
                Some(source) => Some(ModelValue::Value(source)),
                None => downcast::<SizeValue>(any)
                    .map(|v| v.source().clone())
                    .or_else(|| downcast::<ReducedValue>(any).map(|v| v.source().clone()))
                    .map(ModelValue::Collection),
            }
        }
        ModelValue::Event(event) => {
            let any = event.as_any();
            downcast::<MappedEvent>(any)
                .map(|e| e.source().clone())
                .or_else(|| downcast::<FilteredEvent>(any).map(|e| e.source().clone()))
                .or_else(|| downcast::<SkipEvent>(any).map(|e| e.source().clone()))
                .or_else(|| downcast::<TakeEvent>(any).map(|e| e.source().clone()))
                .or_else(|| downcast::<TakeUntilEvent>(any).map(|e| e.source().clone()))
                .or_else(|| downcast::<NoInitEvent>(any).map(|e| e.source().clone()))
                .map(ModelValue::Event)
        }
        ModelValue::Action(action) => downcast::<DisabledAction>(action.as_any())
            .map(|a| ModelValue::Action(a.source().clone())),
        _ => None,
    }
}

// ============================================================================
// Transform
// ============================================================================

type TransformFn = dyn Fn(ModelValue, &ModelInstance) -> InstantiationResult<ModelValue> + Send + Sync;

/// A composed `(source, models) -> target` function
#[derive(Clone)]
pub struct Transform(Arc<TransformFn>);

impl Transform {
    /// The identity
    pub fn unity() -> Self {
        Transform(Arc::new(|value, _| Ok(value)))
    }

    /// Transform applying `apply`
    pub fn new(
        apply: impl Fn(ModelValue, &ModelInstance) -> InstantiationResult<ModelValue> + Send + Sync + 'static,
    ) -> Self {
        Transform(Arc::new(apply))
    }

    /// This transform applied to the output of `before`
    pub fn after(&self, before: &Transform) -> Transform {
        let (outer, inner) = (self.0.clone(), before.0.clone());
        Transform(Arc::new(move |value, models| outer(inner(value, models)?, models)))
    }

    /// Run the transform on a source value
    pub fn apply(&self, source: ModelValue, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        (self.0)(source, models)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform")
    }
}

enum Segment {
    Step(OperationRef),
    /// Consecutive collection links collected once
    Flow {
        links: Vec<OperationRef>,
        strategy: CollectStrategy,
    },
}

/// Group links: flow links fuse until a link forcing a strategy or a
/// non-flow link ends the group
fn segments(links: &[OperationRef], fallback: CollectStrategy) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut group: Vec<OperationRef> = Vec::new();
    for link in links {
        match link.as_flow() {
            Some(flow) => {
                group.push(link.clone());
                if let Some(strategy) = flow.strategy() {
                    segments.push(Segment::Flow {
                        links: std::mem::take(&mut group),
                        strategy,
                    });
                }
            }
            None => {
                if !group.is_empty() {
                    segments.push(Segment::Flow {
                        links: std::mem::take(&mut group),
                        strategy: fallback,
                    });
                }
                segments.push(Segment::Step(link.clone()));
            }
        }
    }
    if !group.is_empty() {
        segments.push(Segment::Flow {
            links: group,
            strategy: fallback,
        });
    }
    segments
}

fn flow_transform(links: Vec<OperationRef>, strategy: CollectStrategy) -> Transform {
    Transform::new(move |source, models| {
        let mut flow = CollectionFlow::new(source.into_collection()?);
        for link in &links {
            if let Some(stage) = link.as_flow().map(|f| f.stage(models)).transpose()?.flatten() {
                flow = flow.then(stage);
            }
        }
        trace!(stages = flow.stages().len(), ?strategy, "collecting fused flow");
        Ok(ModelValue::Collection(flow.collect(strategy, models.lifespan())?))
    })
}

/// Compose links right-to-left, starting from the identity
pub fn compose(links: &[OperationRef], fallback: CollectStrategy) -> Transform {
    segments(links, fallback)
        .into_iter()
        .fold(Transform::unity(), |chain, segment| {
            let link = match segment {
                Segment::Step(step) => Transform::new(move |value, models| step.transform(value, models)),
                Segment::Flow { links, strategy } => flow_transform(links, strategy),
            };
            link.after(&chain)
        })
}

// ============================================================================
// Chain instantiator
// ============================================================================

/// Instantiator of a whole transformation: source expression plus links
pub struct ChainInstantiator {
    source: InstantiatorRef,
    links: Vec<OperationRef>,
    transform: Transform,
}

impl ChainInstantiator {
    /// Chain over `source`; collection flows without a `collect` link use `fallback`
    pub fn new(source: InstantiatorRef, links: Vec<OperationRef>, fallback: CollectStrategy) -> Self {
        let transform = compose(&links, fallback);
        Self {
            source,
            links,
            transform,
        }
    }

    /// Number of links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the chain passes its source through unchanged
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn is_efficient(&self) -> bool {
        self.links.iter().all(|l| l.as_efficient_copy().is_some())
    }

    /// Values along the chain, from the source to `value`, recovered backward
    fn recover(&self, value: &ModelValue) -> Option<Vec<ModelValue>> {
        let mut values = vec![value.clone()];
        for link in self.links.iter().rev() {
            let previous = link.as_efficient_copy()?.get_source(values.last()?)?;
            values.push(previous);
        }
        values.reverse();
        Some(values)
    }
}

impl ValueInstantiator for ChainInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let source = self.source.get(models)?;
        self.transform.apply(source, models)
    }

    fn for_model_copy(
        &self,
        value: &ModelValue,
        source: &ModelInstance,
        target: &ModelInstance,
    ) -> InstantiationResult<ModelValue> {
        if self.is_efficient() {
            if let Some(values) = self.recover(value) {
                trace!(links = self.links.len(), "efficient chain copy");
                let mut current = self.source.for_model_copy(&values[0], source, target)?;
                for (i, link) in self.links.iter().enumerate() {
                    if let Some(copy) = link.as_efficient_copy() {
                        current = copy.for_model_copy(&values[i + 1], &current, source, target)?;
                    }
                }
                return Ok(current);
            }
        }
        if self.is_different(source, target)? {
            self.get(target)
        } else {
            Ok(value.clone())
        }
    }

    fn is_different(&self, source: &ModelInstance, target: &ModelInstance) -> InstantiationResult<bool> {
        if self.source.is_different(source, target)? {
            return Ok(true);
        }
        for link in &self.links {
            if link.is_different(source, target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelLayout, ModelSets};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_reactive::{
        CollectionShape, Datum, Lifespan, MapFn, SettableRef, SimpleCollection, SimpleValue,
    };

    fn instance() -> ModelInstance {
        let set = ModelSets::new().create_root();
        ModelInstance::new(Arc::new(ModelLayout::new(set, "")), None, Lifespan::new())
    }

    fn plus(n: i64) -> MapFn {
        Arc::new(move |d: &Datum| match d {
            Datum::Int(i) => Datum::Int(i + n),
            _ => Datum::Null,
        })
    }

    struct Shared(SettableRef);

    impl ValueInstantiator for Shared {
        fn get(&self, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
            Ok(ModelValue::Value(self.0.clone()))
        }

        fn is_different(&self, _a: &ModelInstance, _b: &ModelInstance) -> InstantiationResult<bool> {
            Ok(false)
        }
    }

    struct AddLink(i64, Arc<AtomicUsize>);

    impl OperationInstantiator for AddLink {
        fn transform(&self, source: ModelValue, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(ModelValue::Value(Arc::new(MappedValue::new(
                source.into_value()?,
                plus(self.0),
                None,
            ))))
        }

        fn is_different(&self, _a: &ModelInstance, _b: &ModelInstance) -> InstantiationResult<bool> {
            Ok(false)
        }

        fn as_efficient_copy(&self) -> Option<&dyn EfficientCopy> {
            Some(self)
        }
    }

    impl EfficientCopy for AddLink {}

    /// Neither a flow nor efficient-copying; reports a fixed difference
    struct Rebuild(bool);

    impl OperationInstantiator for Rebuild {
        fn transform(&self, source: ModelValue, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
            Ok(ModelValue::Value(Arc::new(MappedValue::new(source.into_value()?, plus(0), None))))
        }

        fn is_different(&self, _a: &ModelInstance, _b: &ModelInstance) -> InstantiationResult<bool> {
            Ok(self.0)
        }
    }

    struct StageLink(FlowStage, Option<CollectStrategy>);

    impl OperationInstantiator for StageLink {
        fn transform(&self, _source: ModelValue, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
            unreachable!("flow links are fused")
        }

        fn is_different(&self, _a: &ModelInstance, _b: &ModelInstance) -> InstantiationResult<bool> {
            Ok(false)
        }

        fn as_flow(&self) -> Option<&dyn FlowLink> {
            Some(self)
        }
    }

    impl FlowLink for StageLink {
        fn stage(&self, _models: &ModelInstance) -> InstantiationResult<Option<FlowStage>> {
            Ok(Some(self.0.clone()))
        }

        fn strategy(&self) -> Option<CollectStrategy> {
            self.1
        }
    }

    // ── Composition ─────────────────────────────────────────────────────

    #[test]
    fn test_unity_and_after() {
        let models = instance();
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(1)));
        let same = Transform::unity()
            .apply(ModelValue::Value(source.clone()), &models)
            .unwrap();
        assert!(same.ptr_eq(&ModelValue::Value(source.clone())));

        let add = |n: i64| {
            Transform::new(move |v, _| {
                Ok(ModelValue::Value(Arc::new(MappedValue::new(v.into_value()?, plus(n), None))))
            })
        };
        let chain = add(10).after(&add(1));
        let out = chain.apply(ModelValue::Value(source), &models).unwrap();
        assert_eq!(out.into_value().unwrap().get(), Datum::Int(12));
    }

    #[test]
    fn test_flow_links_fuse_until_a_forced_strategy() {
        let links: Vec<OperationRef> = vec![
            Arc::new(StageLink(FlowStage::Reverse, None)),
            Arc::new(StageLink(FlowStage::Distinct, Some(CollectStrategy::Active))),
            Arc::new(StageLink(FlowStage::Reverse, None)),
        ];
        let groups = segments(&links, CollectStrategy::Auto);
        assert_eq!(groups.len(), 2);
        assert!(matches!(
            &groups[0],
            Segment::Flow { links, strategy: CollectStrategy::Active } if links.len() == 2
        ));

        let models = instance();
        let source = Arc::new(SimpleCollection::new(
            CollectionShape::LIST,
            vec![Datum::Int(1), Datum::Int(2), Datum::Int(2)],
        ));
        let out = compose(&links, CollectStrategy::Auto)
            .apply(ModelValue::Collection(source), &models)
            .unwrap();
        assert_eq!(out.to_string(), "[1, 2]");
    }

    // ── Model copies ────────────────────────────────────────────────────

    #[test]
    fn test_efficient_copy_keeps_identity() {
        let count = Arc::new(AtomicUsize::new(0));
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(1)));
        let chain = ChainInstantiator::new(
            Arc::new(Shared(source)),
            vec![
                Arc::new(AddLink(1, count.clone())),
                Arc::new(AddLink(2, count.clone())),
            ],
            CollectStrategy::Auto,
        );
        let (a, b) = (instance(), instance());
        let value = chain.get(&a).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        let copy = chain.for_model_copy(&value, &a, &b).unwrap();
        assert!(copy.ptr_eq(&value));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recover_walks_back_to_the_source() {
        let count = Arc::new(AtomicUsize::new(0));
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(5)));
        let chain = ChainInstantiator::new(
            Arc::new(Shared(source.clone())),
            vec![Arc::new(AddLink(1, count))],
            CollectStrategy::Auto,
        );
        let value = chain.get(&instance()).unwrap();
        let values = chain.recover(&value).unwrap();
        assert_eq!(values.len(), 2);
        assert!(values[0].ptr_eq(&ModelValue::Value(source)));
    }

    #[test]
    fn test_plain_copy_reuses_value_without_difference() {
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(3)));
        let chain = ChainInstantiator::new(
            Arc::new(Shared(source)),
            vec![Arc::new(Rebuild(false))],
            CollectStrategy::Auto,
        );
        let (a, b) = (instance(), instance());
        let value = chain.get(&a).unwrap();
        assert!(chain.for_model_copy(&value, &a, &b).unwrap().ptr_eq(&value));
    }

    #[test]
    fn test_plain_copy_recomputes_on_difference() {
        let source: SettableRef = Arc::new(SimpleValue::new(Datum::Int(3)));
        let chain = ChainInstantiator::new(
            Arc::new(Shared(source)),
            vec![Arc::new(Rebuild(true))],
            CollectStrategy::Auto,
        );
        let (a, b) = (instance(), instance());
        let value = chain.get(&a).unwrap();
        let copy = chain.for_model_copy(&value, &a, &b).unwrap();
        assert!(!copy.ptr_eq(&value));
        assert_eq!(copy.into_value().unwrap().get(), Datum::Int(3));
    }
}
