//! `models`, `model` and `hollow`: the structure of a model set

use std::any::Any;
use std::sync::Arc;

use super::def_core;
use crate::decl::{AttributeKind, DeclNode, ElementSpec};
use crate::element::{
    is_valid_name, update_element, DefCore, ElementDef, ElementId, ElementInterpreted, InterpretEnv,
    InterpretedCore, UpdateSession, ValueInterpreted,
};
use crate::error::{CompileError, CompileResult, InterpretResult};
use crate::model::{ComponentKind, DynamicState, ModelSetId, ModelSetInstantiator, ModelSets};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{parse_model_type, ModelInstanceType};

pub(super) fn register(toolkit: &mut Toolkit) {
    toolkit.register(
        ElementSpec::new("models").child("model-value", 0, None),
        Some(|core| Box::new(ModelsDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register(
        ElementSpec::new("model")
            .extends("model-value")
            .child("model-value", 0, None),
        Some(|core| Box::new(SubModelDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register(
        ElementSpec::new("hollow")
            .extends("model-value")
            .required("type", AttributeKind::Type),
        Some(|core| Box::new(HollowDef::new(core)) as Box<dyn ElementDef>),
    );

    toolkit.register_trace(
        TraceTable::builder::<ModelsDef, ModelsInterpreted>("models")
            .child("model-value", |d| d.members.clone(), |i| i.members.clone())
            .build(),
    );
    toolkit.register_trace(
        TraceTable::builder::<SubModelDef, ModelsInterpreted>("model")
            .named()
            .child("model-value", |d| d.members.clone(), |i| i.members.clone())
            .build(),
    );
    toolkit.register_trace(
        TraceTable::builder::<HollowDef, ValueInterpreted>("hollow")
            .named()
            .attribute("type", |d| d.declared.as_ref().map(|t| t.to_string()), |_| None)
            .build(),
    );
}

fn type_spec(node: &DeclNode) -> CompileResult<Option<ModelInstanceType>> {
    match node.text_attr("type")? {
        Some(spec) => parse_model_type(spec)
            .map(Some)
            .map_err(|message| CompileError::InvalidType {
                spec: spec.to_string(),
                message,
                position: node.position,
            }),
        None => Ok(None),
    }
}

/// Set owned by a `model` element, named `name` inside `parent`
fn sub_model_set(sets: &mut ModelSets, owner: ElementId, parent: ModelSetId, name: &str) -> ModelSetId {
    let prefix = &sets.set(parent).path;
    let path = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    };
    sets.ensure_owned_set(owner, parent, &path)
}

/// Declare the name a member contributes to `set`
///
/// Malformed names and types are left for the member's own update to report.
fn declare_member(
    session: &mut UpdateSession<'_>,
    set: ModelSetId,
    id: ElementId,
    node: &DeclNode,
) -> CompileResult<()> {
    let Some(def) = session.document.get(id) else {
        return Ok(());
    };
    let is_model = def.as_any().is::<SubModelDef>();
    let is_hollow = def.as_any().is::<HollowDef>();
    let Some(name) = node.text_attr("name").ok().flatten().filter(|n| is_valid_name(n)) else {
        return Ok(());
    };

    let sets = session.document.model_sets_mut();
    if is_hollow {
        let declared = type_spec(node).ok().flatten();
        sets.declare_dynamic(set, node.position, DynamicState::new(name, declared).hollow())?;
    } else if is_model {
        let sub = sub_model_set(sets, id, set, name);
        sets.declare(set, name, node.position, ComponentKind::SubModel(sub))?;
    } else {
        sets.declare(set, name, node.position, ComponentKind::Element(id))?;
    }
    Ok(())
}

/// Compile the members of a model set
///
/// Every name is declared before any member is updated, so members may refer
/// to each other in any order. Sub-models are updated first so dotted names
/// into them resolve. Members already updated on demand are not updated again.
fn update_members(
    owner: ElementId,
    set: ModelSetId,
    previous: &[ElementId],
    node: &DeclNode,
    session: &mut UpdateSession<'_>,
) -> Vec<ElementId> {
    session.document.model_sets_mut().clear(set);
    let mut members = Vec::with_capacity(node.children.len());
    for (i, child) in node.children.iter().enumerate() {
        let child = Arc::new(child.clone());
        match session.reuse_or_create(previous.get(i).copied(), Some(owner), set, &child) {
            Ok(id) => {
                if let Err(err) = declare_member(session, set, id, &child) {
                    session.diagnostics.report_compile(&err);
                }
                members.push((id, child));
            }
            Err(err) => session.diagnostics.report_compile(&err),
        }
    }
    for stale in previous.iter().skip(node.children.len()) {
        session.document.remove(*stale);
    }

    let is_model = |session: &UpdateSession<'_>, id: ElementId| {
        session
            .document
            .get(id)
            .is_some_and(|d| d.as_any().is::<SubModelDef>())
    };
    let (models, others): (Vec<_>, Vec<_>) = members
        .iter()
        .partition(|(id, _)| is_model(session, *id));
    for (id, child) in models.into_iter().chain(others) {
        let pending = session.document.get(*id).is_some_and(|d| !d.core().updated);
        if pending {
            update_element(session, *id, child);
        }
    }
    members.into_iter().map(|(id, _)| id).collect()
}

// ============================================================================
// models
// ============================================================================

/// The document root
pub struct ModelsDef {
    core: DefCore,
    members: Vec<ElementId>,
}

impl ModelsDef {
    /// Root definition with no members yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            members: Vec::new(),
        }
    }

    /// Member definitions in declaration order
    pub fn members(&self) -> &[ElementId] {
        &self.members
    }
}

impl ElementDef for ModelsDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        let previous = std::mem::take(&mut self.members);
        self.members = update_members(self.core.id, self.core.content_models(), &previous, node, session);
        self.core.children = self.members.clone();
        Ok(())
    }

    fn interpret(&self, parent: Option<ElementId>) -> Box<dyn ElementInterpreted> {
        Box::new(ModelsInterpreted::new(
            &self.core,
            parent,
            self.members.clone(),
            Some(self.core.content_models()),
        ))
    }
}

/// Interpretation of `models` and `model`
///
/// Only the root creates a model instance; sub-models are flattened into it.
pub struct ModelsInterpreted {
    core: InterpretedCore,
    members: Vec<ElementId>,
    set: Option<ModelSetId>,
    models: Option<Arc<ModelSetInstantiator>>,
}

impl ModelsInterpreted {
    fn new(def: &DefCore, parent: Option<ElementId>, members: Vec<ElementId>, set: Option<ModelSetId>) -> Self {
        Self {
            core: InterpretedCore::new(def, parent),
            members,
            set,
            models: None,
        }
    }
}

impl ElementInterpreted for ModelsInterpreted {
    fn core(&self) -> &InterpretedCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InterpretedCore {
        &mut self.core
    }

    fn update(&mut self, env: &mut InterpretEnv<'_>) -> InterpretResult<()> {
        if let Some(set) = self.set {
            self.models = Some(env.model_set_instantiator(set));
        }
        Ok(())
    }

    fn models(&self) -> Option<Arc<ModelSetInstantiator>> {
        self.models.clone()
    }

    fn children(&self) -> Vec<ElementId> {
        self.members.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// model
// ============================================================================

/// A named sub-model; its members are reached with dotted names
pub struct SubModelDef {
    core: DefCore,
    set: Option<ModelSetId>,
    members: Vec<ElementId>,
}

impl SubModelDef {
    /// Definition with no set or members yet
    pub fn new(core: DefCore) -> Self {
        Self {
            core,
            set: None,
            members: Vec::new(),
        }
    }

    /// Model set the sub-model declares, once created
    pub fn set(&self) -> Option<ModelSetId> {
        self.set
    }
}

impl ElementDef for SubModelDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, session: &mut UpdateSession<'_>) -> CompileResult<()> {
        let name = node.required_text("name")?;
        let set = sub_model_set(session.document.model_sets_mut(), self.core.id, self.core.models, name);
        self.set = Some(set);
        let previous = std::mem::take(&mut self.members);
        self.members = update_members(self.core.id, set, &previous, node, session);
        self.core.children = self.members.clone();
        Ok(())
    }

    fn interpret(&self, parent: Option<ElementId>) -> Box<dyn ElementInterpreted> {
        Box::new(ModelsInterpreted::new(&self.core, parent, self.members.clone(), None))
    }
}

// ============================================================================
// hollow
// ============================================================================

/// A slot each model instance (or an outer layer) must fill
pub struct HollowDef {
    core: DefCore,
    declared: Option<ModelInstanceType>,
}

impl HollowDef {
    /// Definition with no declared type yet
    pub fn new(core: DefCore) -> Self {
        Self { core, declared: None }
    }

    /// Type the hollow value must have
    pub fn declared(&self) -> Option<&ModelInstanceType> {
        self.declared.as_ref()
    }
}

impl ElementDef for HollowDef {
    def_core!();

    fn do_update(&mut self, node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        self.declared = type_spec(node)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Diagnostics;
    use crate::dynamic::DynamicRegistry;
    use crate::element::Document;
    use crate::error::WarningConfig;

    fn compile(node: DeclNode) -> (Document, Diagnostics, ElementId) {
        let toolkit = Toolkit::standard();
        let registry = DynamicRegistry::new();
        let mut document = Document::new();
        let mut diagnostics = Diagnostics::new(WarningConfig::default());
        let root = document.model_sets_mut().create_root();
        let node = Arc::new(node);
        let id = {
            let mut session = UpdateSession::new(&mut document, &toolkit, &registry, &mut diagnostics, root);
            let id = session.create_child(None, root, &node).unwrap();
            update_element(&mut session, id, &node);
            id
        };
        (document, diagnostics, id)
    }

    #[test]
    fn test_members_and_sub_models_are_declared() {
        let node = DeclNode::new("models")
            .child(DeclNode::new("constant").attr("name", "a").attr("value", 1i64))
            .child(
                DeclNode::new("model")
                    .attr("name", "inner")
                    .child(DeclNode::new("constant").attr("name", "b").attr("value", "a")),
            )
            .child(DeclNode::new("hollow").attr("name", "h").attr("type", "Value<int>"));
        let (document, diagnostics, id) = compile(node);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics.iter().collect::<Vec<_>>());

        let sets = document.model_sets();
        let root = document.get(id).unwrap().core().models;
        assert!(matches!(sets.resolve(root, "a").unwrap().kind, ComponentKind::Element(_)));
        assert!(matches!(sets.resolve(root, "inner.b").unwrap().kind, ComponentKind::Element(_)));
        let h = sets.resolve(root, "h").unwrap();
        assert_eq!(h.kind, ComponentKind::Dynamic);
        assert!(sets.dynamic(h.id).unwrap().hollow);
        assert_eq!(document.get_as::<ModelsDef>(id).unwrap().members().len(), 3);
    }

    #[test]
    fn test_duplicate_member_reported_once() {
        let node = DeclNode::new("models")
            .child(DeclNode::new("constant").attr("name", "a").attr("value", 1i64))
            .child(DeclNode::new("constant").attr("name", "a").attr("value", 2i64));
        let (_, diagnostics, _) = compile(node);
        assert_eq!(diagnostics.error_count(), 1);
        assert!(diagnostics.contains_code("E1009"));
    }

    #[test]
    fn test_invalid_hollow_type() {
        let node = DeclNode::new("models")
            .child(DeclNode::new("hollow").attr("name", "h").attr("type", "int"));
        let (_, diagnostics, _) = compile(node);
        assert_eq!(diagnostics.error_count(), 1);
        assert!(diagnostics.contains_code("E1012"));
    }
}
