//! Element instances and their instantiators

use std::fmt;
use std::sync::Arc;
use strata_reactive::Lifespan;
use tracing::{debug, trace};

use super::addon::{AddOnInstance, AddOnInstantiator};
use super::ElementId;
use crate::decl::CapabilityTag;
use crate::error::{InstantiationError, InstantiationResult};
use crate::model::{ComponentId, ModelInstance, ModelSetInstantiator, ModelValue};

/// Produces element instances for one interpreted element
pub struct ElementInstantiator {
    id: ElementId,
    element_type: String,
    add_ons: Vec<Arc<dyn AddOnInstantiator>>,
    models: Option<Arc<ModelSetInstantiator>>,
    component: Option<ComponentId>,
    children: Vec<Arc<ElementInstantiator>>,
}

impl ElementInstantiator {
    /// Instantiator for one interpreted element
    pub fn new(
        id: ElementId,
        element_type: String,
        add_ons: Vec<Arc<dyn AddOnInstantiator>>,
        models: Option<Arc<ModelSetInstantiator>>,
        component: Option<ComponentId>,
        children: Vec<Arc<ElementInstantiator>>,
    ) -> Self {
        Self {
            id,
            element_type,
            add_ons,
            models,
            component,
            children,
        }
    }

    /// Id of the element
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// Declared element type
    pub fn element_type(&self) -> &str {
        &self.element_type
    }

    /// Model set the element creates an instance of, for root elements
    pub fn models(&self) -> Option<&Arc<ModelSetInstantiator>> {
        self.models.as_ref()
    }

    /// Instantiators of the children, in declaration order
    pub fn children(&self) -> &[Arc<ElementInstantiator>] {
        &self.children
    }

    /// Create an instance; elements owning a model set get a fresh model instance
    pub fn create(&self, parent: Option<ElementId>, models: Option<&ModelInstance>) -> InstantiationResult<ElementInstance> {
        self.create_with(parent, models, &|_| Ok(()))
    }

    /// Create an instance, running `init` on a fresh model instance before
    /// it is built
    ///
    /// Elements owning a model set get a new model instance whose parent is
    /// `models`; `init` is where hollow values get satisfied. Other elements
    /// share `models`.
    pub fn create_with(
        &self,
        parent: Option<ElementId>,
        models: Option<&ModelInstance>,
        init: &dyn Fn(&ModelInstance) -> InstantiationResult<()>,
    ) -> InstantiationResult<ElementInstance> {
        let models = match (&self.models, models) {
            (Some(set), outer) => {
                let lifespan = outer
                    .map(|m| m.lifespan().child())
                    .unwrap_or_else(Lifespan::new);
                let instance = set.create(outer, lifespan);
                init(&instance)?;
                instance.build()?;
                instance
            }
            (None, Some(models)) => models.clone(),
            (None, None) => {
                return Err(InstantiationError::Internal(format!(
                    "'{}' needs an enclosing model instance",
                    self.element_type
                )))
            }
        };
        debug!(element = %self.element_type, id = %self.id, "creating element instance");
        let mut instance = ElementInstance {
            id: self.id,
            element_type: self.element_type.clone(),
            models: models.clone(),
            value: None,
            add_ons: Vec::new(),
            children: Vec::new(),
            parent,
        };
        self.instantiate(&mut instance, &models)?;
        Ok(instance)
    }

    /// Bind `instance` to `models`
    ///
    /// Add-on instances whose tag is still present are kept as they are,
    /// missing ones are created and stale ones dropped. The resulting order
    /// follows the interpretation.
    pub fn instantiate(&self, instance: &mut ElementInstance, models: &ModelInstance) -> InstantiationResult<()> {
        instance.models = models.clone();
        instance.value = match self.component {
            Some(component) => Some(models.get(component)?),
            None => None,
        };

        let mut previous = std::mem::take(&mut instance.add_ons);
        let mut add_ons = Vec::with_capacity(self.add_ons.len());
        for add_on in &self.add_ons {
            let tag = add_on.tag();
            match previous.iter().position(|a| a.tag() == tag) {
                Some(index) => add_ons.push(previous.remove(index)),
                None => {
                    trace!(tag = %tag.name(), "creating add-on instance");
                    add_ons.push(add_on.create(models)?);
                }
            }
        }
        for stale in &previous {
            trace!(tag = %stale.tag().name(), "dropping add-on instance");
        }
        instance.add_ons = add_ons;

        let mut previous = std::mem::take(&mut instance.children);
        let mut children = Vec::with_capacity(self.children.len());
        for child in &self.children {
            match previous.iter().position(|c| c.id == child.id) {
                Some(index) => {
                    let mut existing = previous.remove(index);
                    child.instantiate(&mut existing, models)?;
                    children.push(existing);
                }
                None => children.push(child.create(Some(self.id), Some(models))?),
            }
        }
        instance.children = children;
        Ok(())
    }
}

impl fmt::Debug for ElementInstantiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementInstantiator")
            .field("id", &self.id)
            .field("element_type", &self.element_type)
            .field("add_ons", &self.add_ons.iter().map(|a| a.tag()).collect::<Vec<_>>())
            .field("children", &self.children.len())
            .finish()
    }
}

/// A live element bound to a model instance
#[derive(Debug)]
pub struct ElementInstance {
    id: ElementId,
    element_type: String,
    models: ModelInstance,
    value: Option<ModelValue>,
    add_ons: Vec<Arc<dyn AddOnInstance>>,
    children: Vec<ElementInstance>,
    parent: Option<ElementId>,
}

impl ElementInstance {
    /// Id of the element
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// Declared element type
    pub fn element_type(&self) -> &str {
        &self.element_type
    }

    /// Enclosing element
    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    /// Model instance the element's values live in
    pub fn models(&self) -> &ModelInstance {
        &self.models
    }

    /// The model value this element produces, if it is a model value
    pub fn value(&self) -> Option<&ModelValue> {
        self.value.as_ref()
    }

    /// Add-on instances in interpretation order
    pub fn add_ons(&self) -> &[Arc<dyn AddOnInstance>] {
        &self.add_ons
    }

    /// Add-on instance registered under `tag`
    pub fn add_on(&self, tag: CapabilityTag) -> Option<&Arc<dyn AddOnInstance>> {
        self.add_ons.iter().find(|a| a.tag() == tag)
    }

    /// Add-on instance of a concrete type
    pub fn add_on_as<T: 'static>(&self, tag: CapabilityTag) -> Option<&T> {
        self.add_on(tag).and_then(|a| a.as_any().downcast_ref::<T>())
    }

    /// Child instances in declaration order
    pub fn children(&self) -> &[ElementInstance] {
        &self.children
    }

    /// Value of a named component visible from this element
    pub fn get(&self, name: &str) -> InstantiationResult<ModelValue> {
        self.models.get_by_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelLayout, ModelSetId};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Marker(CapabilityTag);

    impl AddOnInstance for Marker {
        fn tag(&self) -> CapabilityTag {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Counting(CapabilityTag, Arc<AtomicUsize>);

    impl AddOnInstantiator for Counting {
        fn tag(&self) -> CapabilityTag {
            self.0
        }

        fn create(&self, _models: &ModelInstance) -> InstantiationResult<Arc<dyn AddOnInstance>> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Marker(self.0)))
        }
    }

    fn instantiator(tags: &[CapabilityTag], created: &Arc<AtomicUsize>) -> ElementInstantiator {
        let add_ons = tags
            .iter()
            .map(|t| Arc::new(Counting(*t, created.clone())) as Arc<dyn AddOnInstantiator>)
            .collect();
        ElementInstantiator::new(ElementId(0), "value".to_string(), add_ons, None, None, Vec::new())
    }

    fn models() -> ModelInstance {
        ModelInstance::new(Arc::new(ModelLayout::new(ModelSetId(0), "")), None, Lifespan::new())
    }

    #[test]
    fn test_add_ons_reconcile_by_tag() {
        let created = Arc::new(AtomicUsize::new(0));
        let models = models();
        let first = instantiator(&[CapabilityTag::NAMED, CapabilityTag::TYPED], &created);
        let mut instance = first.create(None, Some(&models)).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        let typed = instance.add_on(CapabilityTag::TYPED).unwrap().clone();

        let second = instantiator(&[CapabilityTag::TYPED, CapabilityTag::WITH_ELEMENT_MODEL], &created);
        second.instantiate(&mut instance, &models).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 3);
        let tags: Vec<_> = instance.add_ons().iter().map(|a| a.tag()).collect();
        assert_eq!(tags, vec![CapabilityTag::TYPED, CapabilityTag::WITH_ELEMENT_MODEL]);
        assert!(Arc::ptr_eq(instance.add_on(CapabilityTag::TYPED).unwrap(), &typed));
        assert!(instance.add_on(CapabilityTag::NAMED).is_none());
    }

    #[test]
    fn test_add_on_downcast() {
        let created = Arc::new(AtomicUsize::new(0));
        let instance = instantiator(&[CapabilityTag::NAMED], &created)
            .create(None, Some(&models()))
            .unwrap();
        let marker = instance.add_on_as::<Marker>(CapabilityTag::NAMED).unwrap();
        assert_eq!(marker.0, CapabilityTag::NAMED);
    }

    #[test]
    fn test_create_without_models_fails() {
        let created = Arc::new(AtomicUsize::new(0));
        let err = instantiator(&[], &created).create(None, None).unwrap_err();
        assert!(matches!(err, InstantiationError::Internal(_)));
    }
}
