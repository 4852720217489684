//! Declared collections and maps

use std::sync::Arc;
use strata_reactive::{AcceptFn, CollectionShape, ObservableMap, SimpleCollection, SimpleMap};

use super::{def_core, expect_model, resolve_element, type_accept, type_text};
use crate::decl::{AttributeKind, DeclNode, ElementSpec, SourcePosition};
use crate::element::{DefCore, ElementDef, InterpretEnv, UpdateSession, ValueInterpreted};
use crate::error::{CompileError, CompileResult, InstantiationResult, InterpretError, InterpretResult};
use crate::expr::CompiledExpression;
use crate::model::{
    CompiledModelValue, InstantiatorRef, InterpretedNode, InterpretedRef, ModelInstance, ModelValue,
    ValueInstantiator,
};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{parse_element_type, ElementType, ModelInstanceType, ModelType};

const COLLECTIONS: [(&str, ModelType); 5] = [
    ("list", ModelType::Collection),
    ("set", ModelType::Set),
    ("sorted-list", ModelType::SortedCollection),
    ("sorted-set", ModelType::SortedSet),
    ("value-set", ModelType::ValueSet),
];

const MAPS: [(&str, ModelType); 3] = [
    ("map", ModelType::Map),
    ("sorted-map", ModelType::SortedMap),
    ("multi-map", ModelType::MultiMap),
];

pub(super) fn register(toolkit: &mut Toolkit) {
    toolkit.register(ElementSpec::new("element").content(AttributeKind::Expression), None);
    toolkit.register(
        ElementSpec::new("entry")
            .required("key", AttributeKind::Expression)
            .required("value", AttributeKind::Expression),
        None,
    );

    for (name, _) in COLLECTIONS {
        toolkit.register(
            ElementSpec::new(name)
                .extends("typed-value")
                .child("element", 0, None),
            Some(|core| Box::new(CollectionDef::new(core)) as Box<dyn ElementDef>),
        );
        toolkit.register_trace(
            TraceTable::builder::<CollectionDef, ValueInterpreted>(name)
                .named()
                .typed()
                .value(|d| Some(d.describe_elements()), |i| type_text(&i.value()))
                .build(),
        );
    }
    for (name, _) in MAPS {
        toolkit.register(
            ElementSpec::new(name)
                .extends("typed-value")
                .attribute("key-type", AttributeKind::Type)
                .child("entry", 0, None),
            Some(|core| Box::new(MapDef::new(core)) as Box<dyn ElementDef>),
        );
        toolkit.register_trace(
            TraceTable::builder::<MapDef, ValueInterpreted>(name)
                .named()
                .typed()
                .attribute(
                    "key-type",
                    |d| d.key_type.as_ref().map(|t| t.to_string()),
                    |i| i.value().and_then(|v| v.value_type().types.first().map(|t| t.to_string())),
                )
                .value(|d| Some(format!("{} entries", d.entries.len())), |i| type_text(&i.value()))
                .build(),
        );
    }
}

fn model_of(table: &[(&str, ModelType)], element_type: &str, position: SourcePosition) -> CompileResult<ModelType> {
    table
        .iter()
        .find(|(name, _)| *name == element_type)
        .map(|(_, model)| *model)
        .ok_or_else(|| CompileError::internal(format!("no model type for '{}'", element_type), position))
}

fn shape_of(model: ModelType) -> CollectionShape {
    match model {
        ModelType::Set | ModelType::ValueSet => CollectionShape::SET,
        ModelType::SortedCollection => CollectionShape::SORTED_LIST,
        ModelType::SortedSet => CollectionShape::SORTED_SET,
        _ => CollectionShape::LIST,
    }
}

/// Interpret initial content expressions and unify their element types
fn interpret_items(
    items: &[CompiledExpression],
    env: &mut InterpretEnv<'_>,
) -> InterpretResult<(Vec<InterpretedRef>, ElementType)> {
    let mut element = ElementType::Unknown;
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let value = item.interpret(env)?;
        expect_model(&value, ModelType::Value, item.position())?;
        element = element.unify(value.value_type().element());
        values.push(value);
    }
    Ok((values, element))
}

fn check_declared(declared: Option<&ElementType>, inferred: ElementType, position: SourcePosition) -> InterpretResult<ElementType> {
    if let Some(declared) = declared {
        if !inferred.is_assignable_to(declared) {
            return Err(InterpretError::mismatch(declared, &inferred, position));
        }
    }
    Ok(resolve_element(declared, inferred))
}

// ============================================================================
// Collections
// ============================================================================

/// `list`, `set`, `sorted-list`, `sorted-set` and `value-set`
pub struct CollectionDef {
    core: DefCore,
    model: ModelType,
    elements: Vec<CompiledExpression>,
}

impl CollectionDef {
    /// Definition with no elements yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            model: ModelType::Collection,
            elements: Vec::new(),
        }
    }

    fn describe_elements(&self) -> String {
        let items: Vec<String> = self.elements.iter().map(|e| e.to_string()).collect();
        format!("[{}]", items.join(", "))
    }
}

impl ElementDef for CollectionDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.model = model_of(&COLLECTIONS, &self.core.element_type, node.position)?;
        let models = self.core.content_models();
        self.elements = node
            .children_with_role("element")
            .map(|child| {
                child
                    .value_expr()
                    .map(|expr| CompiledExpression::new(expr, models, child.position))
                    .ok_or_else(|| CompileError::MissingAttribute {
                        element: "element".to_string(),
                        attribute: "content".to_string(),
                        position: child.position,
                    })
            })
            .collect::<CompileResult<_>>()?;
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for CollectionDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(self.model)
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let (items, inferred) = interpret_items(&self.elements, env)?;
        let element = check_declared(self.core.declared_type(), inferred, self.core.position)?;
        let shape = shape_of(self.model);
        let accept = type_accept(element.clone());
        Ok(InterpretedNode::new(
            ModelInstanceType::collection(self.model, element),
            items,
            move |c: &[InterpretedRef]| {
                Arc::new(CollectionInstantiator {
                    shape,
                    items: c.iter().map(|i| i.instantiate()).collect(),
                    accept: accept.clone(),
                }) as InstantiatorRef
            },
        ))
    }
}

/// A fresh collection per model instance, seeded with the declared elements
struct CollectionInstantiator {
    shape: CollectionShape,
    items: Vec<InstantiatorRef>,
    accept: AcceptFn,
}

impl ValueInstantiator for CollectionInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let mut initial = Vec::with_capacity(self.items.len());
        for item in &self.items {
            initial.push(item.get(models)?.into_value()?.get());
        }
        let collection = SimpleCollection::new(self.shape, initial).with_accept(self.accept.clone());
        Ok(ModelValue::Collection(Arc::new(collection)))
    }
}

// ============================================================================
// Maps
// ============================================================================

struct Entry {
    key: CompiledExpression,
    value: CompiledExpression,
}

/// `map`, `sorted-map` and `multi-map`
pub struct MapDef {
    core: DefCore,
    model: ModelType,
    key_type: Option<ElementType>,
    entries: Vec<Entry>,
}

impl MapDef {
    /// Definition with no entries yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            model: ModelType::Map,
            key_type: None,
            entries: Vec::new(),
        }
    }
}

impl ElementDef for MapDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.model = model_of(&MAPS, &self.core.element_type, node.position)?;
        self.key_type = match node.text_attr("key-type")? {
            Some(spec) => Some(parse_element_type(spec).map_err(|message| CompileError::InvalidType {
                spec: spec.to_string(),
                message,
                position: node.position,
            })?),
            None => None,
        };
        let models = self.core.content_models();
        let mut entries = Vec::new();
        for child in node.children_with_role("entry") {
            entries.push(Entry {
                key: CompiledExpression::new(child.required_expr("key")?, models, child.position),
                value: CompiledExpression::new(child.required_expr("value")?, models, child.position),
            });
        }
        self.entries = entries;
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for MapDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(self.model)
    }

    fn interpret_value(&self, env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let keys: Vec<CompiledExpression> = self.entries.iter().map(|e| e.key.clone()).collect();
        let values: Vec<CompiledExpression> = self.entries.iter().map(|e| e.value.clone()).collect();
        let (keys, key_inferred) = interpret_items(&keys, env)?;
        let (values, value_inferred) = interpret_items(&values, env)?;
        let key_type = check_declared(self.key_type.as_ref(), key_inferred, self.core.position)?;
        let value_type = check_declared(self.core.declared_type(), value_inferred, self.core.position)?;

        let sorted = self.model == ModelType::SortedMap;
        let multi = self.model == ModelType::MultiMap;
        let count = keys.len();
        let components = keys.into_iter().chain(values).collect();
        Ok(InterpretedNode::new(
            ModelInstanceType::map(self.model, key_type, value_type),
            components,
            move |c: &[InterpretedRef]| {
                let (keys, values) = c.split_at(count);
                Arc::new(MapInstantiator {
                    sorted,
                    multi,
                    entries: keys
                        .iter()
                        .zip(values)
                        .map(|(k, v)| (k.instantiate(), v.instantiate()))
                        .collect(),
                }) as InstantiatorRef
            },
        ))
    }
}

struct MapInstantiator {
    sorted: bool,
    multi: bool,
    entries: Vec<(InstantiatorRef, InstantiatorRef)>,
}

impl ValueInstantiator for MapInstantiator {
    fn get(&self, models: &ModelInstance) -> InstantiationResult<ModelValue> {
        let map = SimpleMap::new(self.sorted, self.multi);
        for (key, value) in &self.entries {
            let key = key.get(models)?.into_value()?.get();
            let value = value.get(models)?.into_value()?.get();
            map.put(key, value)?;
        }
        Ok(ModelValue::Map(Arc::new(map)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes_follow_model_types() {
        assert_eq!(shape_of(ModelType::Collection), CollectionShape::LIST);
        assert_eq!(shape_of(ModelType::ValueSet), CollectionShape::SET);
        assert_eq!(shape_of(ModelType::SortedSet), CollectionShape::SORTED_SET);
    }

    #[test]
    fn test_declared_element_type_is_checked() {
        let position = SourcePosition::default();
        assert_eq!(
            check_declared(Some(&ElementType::Float), ElementType::Int, position).unwrap(),
            ElementType::Float
        );
        assert!(check_declared(Some(&ElementType::Int), ElementType::Text, position).is_err());
        assert_eq!(check_declared(None, ElementType::Unknown, position).unwrap(), ElementType::Any);
    }

    #[test]
    fn test_every_collection_type_maps_to_a_model() {
        for (name, model) in COLLECTIONS {
            assert_eq!(model_of(&COLLECTIONS, name, SourcePosition::default()).unwrap(), model);
            assert!(model.is_collection());
        }
        for (name, model) in MAPS {
            assert_eq!(model_of(&MAPS, name, SourcePosition::default()).unwrap(), model);
            assert!(model.is_map());
        }
    }
}
