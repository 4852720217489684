//! The three lifecycle stages behind one entry point
//!
//! ```text
//! DeclNode ──compile──▶ CompiledDocument ──interpret──▶ InterpretedDocument ──instantiate──▶ ElementInstance
//! ```
//!
//! Each stage accumulates its own [`Diagnostics`]; a failed element is
//! reported once and its siblings carry on.

use indexmap::IndexMap;
use std::sync::Arc;
use strata_reactive::Lifespan;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::decl::{DeclNode, SourcePosition};
use crate::diagnostic::Diagnostics;
use crate::dynamic::DynamicRegistry;
use crate::element::{
    update_element, Document, ElementId, ElementInstance, ElementInstantiator, InterpretEnv, UpdateSession,
};
use crate::error::{InstantiationError, InstantiationResult};
use crate::model::{ModelInstance, ModelSetId, ModelValue};
use crate::toolkit::Toolkit;
use crate::types::ModelInstanceType;

/// Compiles, interprets and instantiates declaration documents
pub struct Compiler {
    toolkit: Arc<Toolkit>,
    registry: DynamicRegistry,
    config: EngineConfig,
}

impl Compiler {
    /// A compiler over the standard element types
    pub fn new(config: EngineConfig) -> Self {
        Self::with_toolkit(Toolkit::standard(), config)
    }

    /// A compiler over a custom set of element types
    pub fn with_toolkit(toolkit: Toolkit, config: EngineConfig) -> Self {
        Self {
            toolkit: Arc::new(toolkit),
            registry: DynamicRegistry::new(),
            config,
        }
    }

    /// Element types and operator families in use
    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    /// Dynamic value rules shared by every document
    pub fn registry(&self) -> &DynamicRegistry {
        &self.registry
    }

    /// Settings the compiler was created with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile a document from scratch
    pub fn compile(&self, node: DeclNode) -> CompiledDocument {
        let mut document = Document::new();
        let root_models = document.model_sets_mut().create_root();
        let mut compiled = CompiledDocument {
            document,
            root: None,
            root_models,
            diagnostics: Diagnostics::new(self.config.warning_config()),
        };
        self.update(&mut compiled, node);
        compiled
    }

    /// Re-compile `compiled` from a changed declaration
    ///
    /// Definitions are reused wherever the element types still line up, so
    /// their add-ons and owned model sets carry over.
    pub fn update(&self, compiled: &mut CompiledDocument, node: DeclNode) {
        let node = Arc::new(node);
        let mut diagnostics = Diagnostics::new(self.config.warning_config());
        let root = {
            let mut session = UpdateSession::new(
                &mut compiled.document,
                &self.toolkit,
                &self.registry,
                &mut diagnostics,
                compiled.root_models,
            );
            match session.reuse_or_create(compiled.root, None, compiled.root_models, &node) {
                Ok(id) => {
                    update_element(&mut session, id, &node);
                    Some(id)
                }
                Err(err) => {
                    session.diagnostics.report_compile(&err);
                    None
                }
            }
        };
        info!(
            element = %node.element_type,
            errors = diagnostics.error_count(),
            warnings = diagnostics.warning_count(),
            "compiled document"
        );
        compiled.root = root;
        compiled.diagnostics = diagnostics;
    }

    /// Resolve types and build the instantiators of a compiled document
    pub fn interpret(&self, compiled: &CompiledDocument) -> InterpretedDocument {
        let mut env = InterpretEnv::new(&compiled.document, &self.toolkit, &self.registry, &self.config);
        let root = compiled
            .root
            .and_then(|id| match env.element_instantiator(id) {
                Ok(instantiator) => Some(instantiator),
                Err(err) => {
                    env.report(&err);
                    None
                }
            });

        let mut types = IndexMap::new();
        let models = root
            .as_ref()
            .and_then(|r| r.models().cloned())
            .unwrap_or_else(|| env.model_set_instantiator(compiled.root_models));
        let names: Vec<(String, _)> = models
            .layout()
            .names()
            .map(|(name, id)| (name.to_string(), id))
            .collect();
        for (name, id) in names {
            match env.component_value(id, SourcePosition::default()) {
                Ok(value) => {
                    types.insert(name, value.value_type().clone());
                }
                Err(err) => debug!(name = %name, error = %err, "no type for top-level value"),
            }
        }

        let diagnostics = env.diagnostics;
        info!(
            errors = diagnostics.error_count(),
            warnings = diagnostics.warning_count(),
            "interpreted document"
        );
        InterpretedDocument {
            root,
            types,
            diagnostics,
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Output of the compile stage
pub struct CompiledDocument {
    /// Every definition and the model sets they declare
    pub document: Document,
    /// Definition of the root declaration, unless it could not be created
    pub root: Option<ElementId>,
    root_models: ModelSetId,
    /// Errors and warnings of the last compilation
    pub diagnostics: Diagnostics,
}

impl CompiledDocument {
    /// Model set the root declaration lives in
    pub fn root_models(&self) -> ModelSetId {
        self.root_models
    }

    /// Whether compiling reported an error
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Output of the interpret stage
pub struct InterpretedDocument {
    root: Option<Arc<ElementInstantiator>>,
    types: IndexMap<String, ModelInstanceType>,
    /// Errors and warnings of the interpretation
    pub diagnostics: Diagnostics,
}

impl InterpretedDocument {
    /// Instantiator of the root element
    pub fn root(&self) -> Option<&Arc<ElementInstantiator>> {
        self.root.as_ref()
    }

    /// Resolved types of the top-level values, in declaration order
    pub fn types(&self) -> &IndexMap<String, ModelInstanceType> {
        &self.types
    }

    /// Resolved type of a top-level value
    pub fn type_of(&self, name: &str) -> Option<&ModelInstanceType> {
        self.types.get(name)
    }

    /// Whether compiling or interpreting reported an error
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// A fresh instance of the root element
    pub fn instantiate(&self) -> InstantiationResult<ElementInstance> {
        self.instantiate_with(&|_| Ok(()))
    }

    /// A fresh instance of the root element; `init` runs on the root model
    /// instance before it is built, which is where hollow values are supplied
    pub fn instantiate_with(
        &self,
        init: &dyn Fn(&ModelInstance) -> InstantiationResult<()>,
    ) -> InstantiationResult<ElementInstance> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| InstantiationError::Internal("the document has no interpreted root".to_string()))?;
        root.create_with(None, None, init)
    }

    /// Instance of the root element with hollow values supplied by name
    pub fn instantiate_satisfying(
        &self,
        registry: &DynamicRegistry,
        values: &[(&str, ModelValue)],
    ) -> InstantiationResult<ElementInstance> {
        self.instantiate_with(&|models| satisfy(registry, models, values))
    }

    /// Copy of the root model instance of `source`
    ///
    /// Hollow values are never copied; every one the document declares must
    /// appear in `values`. Derived values whose inputs are unchanged keep
    /// their identity.
    pub fn copy_satisfying(
        &self,
        registry: &DynamicRegistry,
        source: &ElementInstance,
        values: &[(&str, ModelValue)],
    ) -> InstantiationResult<ModelInstance> {
        let set = self
            .root
            .as_ref()
            .and_then(|root| root.models())
            .ok_or_else(|| InstantiationError::Internal("the document root owns no models".to_string()))?;
        let copy = set.copy(source.models(), None, Lifespan::new())?;
        satisfy(registry, &copy, values)?;
        copy.build()?;
        Ok(copy)
    }
}

fn satisfy(registry: &DynamicRegistry, models: &ModelInstance, values: &[(&str, ModelValue)]) -> InstantiationResult<()> {
    for (name, value) in values {
        let ty = models
            .layout()
            .id_of(name)
            .and_then(|id| models.layout().dynamic_slot(id))
            .and_then(|(_, ty)| ty.cloned())
            .ok_or_else(|| InstantiationError::Unbound {
                name: name.to_string(),
            })?;
        registry.satisfy_instance_value(name, &ty, models, value.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_reactive::{Datum, SettableValue, SimpleValue};

    fn document() -> DeclNode {
        DeclNode::new("models")
            .child(DeclNode::new("value").attr("name", "x").attr("type", "int").attr("init", 4i64))
            .child(DeclNode::new("hollow").attr("name", "h").attr("type", "Value<int>"))
    }

    #[test]
    fn test_stages() {
        let compiler = Compiler::default();
        let compiled = compiler.compile(document());
        assert!(!compiled.has_errors(), "{:?}", compiled.diagnostics);
        let interpreted = compiler.interpret(&compiled);
        assert!(!interpreted.has_errors(), "{:?}", interpreted.diagnostics);
        assert_eq!(interpreted.type_of("x").map(|t| t.to_string()), Some("Value<int>".to_string()));

        let h = Arc::new(SimpleValue::new(Datum::Int(1)));
        let instance = interpreted
            .instantiate_satisfying(compiler.registry(), &[("h", ModelValue::Value(h.clone()))])
            .unwrap();
        assert_eq!(instance.get("x").unwrap().to_datum(), Datum::Int(4));
        h.set(Datum::Int(2)).unwrap();
        assert_eq!(instance.get("h").unwrap().to_datum(), Datum::Int(2));
    }

    #[test]
    fn test_unknown_root() {
        let compiler = Compiler::default();
        let compiled = compiler.compile(DeclNode::new("nothing"));
        assert!(compiled.root.is_none());
        assert!(compiled.diagnostics.contains_code("E1001"));
        let interpreted = compiler.interpret(&compiled);
        assert!(interpreted.instantiate().is_err());
    }

    #[test]
    fn test_update_reuses_root() {
        let compiler = Compiler::default();
        let mut compiled = compiler.compile(document());
        let root = compiled.root;
        compiler.update(&mut compiled, document());
        assert_eq!(compiled.root, root);
        assert!(!compiled.has_errors());
    }
}
