//! The definition update pass

use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::debug;

use super::{DefCore, Document, ElementDef, ElementId};
use crate::decl::DeclNode;
use crate::diagnostic::Diagnostics;
use crate::dynamic::DynamicRegistry;
use crate::error::{CompileError, CompileResult, WarningCode};
use crate::model::ModelSetId;
use crate::toolkit::Toolkit;
use crate::types::ModelType;

/// Everything a definition update can reach
pub struct UpdateSession<'a> {
    /// Definitions being updated
    pub document: &'a mut Document,
    /// Element types and operator families
    pub toolkit: &'a Toolkit,
    /// Dynamic value rules
    pub registry: &'a DynamicRegistry,
    /// Diagnostics reported while compiling
    pub diagnostics: &'a mut Diagnostics,
    /// Models of the element currently updating its content
    pub models: ModelSetId,
    traceability_checked: FxHashSet<String>,
}

impl<'a> UpdateSession<'a> {
    /// Session starting in `models`
    pub fn new(
        document: &'a mut Document,
        toolkit: &'a Toolkit,
        registry: &'a DynamicRegistry,
        diagnostics: &'a mut Diagnostics,
        models: ModelSetId,
    ) -> Self {
        Self {
            document,
            toolkit,
            registry,
            diagnostics,
            models,
            traceability_checked: FxHashSet::default(),
        }
    }

    /// Allocate a definition for `node` without updating it
    pub fn create_child(
        &mut self,
        parent: Option<ElementId>,
        models: ModelSetId,
        node: &Arc<DeclNode>,
    ) -> CompileResult<ElementId> {
        let factory = self
            .toolkit
            .factory(&node.element_type)
            .ok_or_else(|| CompileError::UnknownElementType {
                name: node.element_type.clone(),
                position: node.position,
            })?;
        let node = node.clone();
        Ok(self
            .document
            .alloc(|id| factory(DefCore::new(id, node, parent, models))))
    }

    /// Reuse `existing` when it has the same element type, else replace it
    pub fn reuse_or_create(
        &mut self,
        existing: Option<ElementId>,
        parent: Option<ElementId>,
        models: ModelSetId,
        node: &Arc<DeclNode>,
    ) -> CompileResult<ElementId> {
        if let Some(id) = existing {
            if let Some(def) = self.document.get_mut(id) {
                if def.core().element_type == node.element_type {
                    let core = def.core_mut();
                    core.models = models;
                    core.parent = parent;
                    core.node = Some(node.clone());
                    core.updated = false;
                    return Ok(id);
                }
            }
            self.document.remove(id);
        }
        self.create_child(parent, models, node)
    }

    /// Create or reuse, then update, the children of `parent` declared by
    /// `nodes`; failed children stay in place with their errors reported
    pub fn update_children(
        &mut self,
        parent: ElementId,
        models: ModelSetId,
        previous: &[ElementId],
        nodes: &[Arc<DeclNode>],
    ) -> Vec<ElementId> {
        let mut children = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            match self.reuse_or_create(previous.get(i).copied(), Some(parent), models, node) {
                Ok(id) => {
                    update_element(self, id, node);
                    children.push(id);
                }
                Err(err) => self.diagnostics.report_compile(&err),
            }
        }
        for stale in previous.iter().skip(nodes.len()) {
            self.document.remove(*stale);
        }
        children
    }

    /// Model type of a definition, updating it first when it has not been
    ///
    /// A definition that is itself being updated cannot report a type yet.
    pub fn model_type_of(&mut self, id: ElementId) -> CompileResult<Option<ModelType>> {
        if self.document.is_checked_out(id) {
            return Ok(None);
        }
        let pending = match self.document.get(id) {
            Some(def) if !def.core().updated => def.core().node.clone(),
            Some(_) => None,
            None => return Ok(None),
        };
        if let Some(node) = pending {
            update_element(self, id, &node);
        }
        Ok(self.document.get(id).and_then(|d| d.model_type()))
    }

    fn check_traceability(&mut self, element_type: &str, def: &DefCore) {
        if !self.traceability_checked.insert(element_type.to_string()) {
            return;
        }
        let traceability = self.toolkit.traceability();
        if !traceability.has_table(element_type) {
            self.diagnostics.warn(
                WarningCode::MissingTraceability,
                format!("Element type '{}' has no traceability table", element_type),
                def.position,
            );
            return;
        }
        for attribute in traceability.validate(self.toolkit.schema(), element_type) {
            self.diagnostics.warn(
                WarningCode::MissingTraceability,
                format!(
                    "Attribute '{}' of '{}' has no traceability accessor",
                    attribute, element_type
                ),
                def.position,
            );
        }
    }
}

/// Update one definition from its declaration
///
/// Failures are reported to the session diagnostics and `false` is returned;
/// the caller carries on with the next sibling. A definition already being
/// updated further up the stack is left alone.
pub fn update_element(session: &mut UpdateSession<'_>, id: ElementId, node: &Arc<DeclNode>) -> bool {
    let Some(mut def) = session.document.take(id) else {
        return false;
    };
    let saved_models = session.models;
    debug!(element = %node.element_type, id = %id, "updating definition");
    let result = run_update(def.as_mut(), node, session);
    session.models = saved_models;
    {
        let core = def.core_mut();
        core.updated = true;
        core.failed = result.is_err();
    }
    session.document.restore(id, def);
    match result {
        Ok(()) => true,
        Err(err) => {
            session.diagnostics.report_compile(&err);
            false
        }
    }
}

fn run_update(def: &mut dyn ElementDef, node: &Arc<DeclNode>, session: &mut UpdateSession<'_>) -> CompileResult<()> {
    session.toolkit.schema().validate(node)?;
    session.check_traceability(&node.element_type, def.core());

    {
        let core = def.core_mut();
        core.node = Some(node.clone());
        core.position = node.position;
        if !core.add_ons_discovered {
            for tag in session.toolkit.schema().capabilities_of(&core.element_type) {
                if let Some(add_on) = session.toolkit.create_add_on(tag) {
                    core.add_ons.push(tag, add_on);
                }
            }
            core.add_ons_discovered = true;
        }
    }

    let mut add_ons = std::mem::take(&mut def.core_mut().add_ons);
    let hooks = (|| -> CompileResult<()> {
        for add_on in add_ons.iter_mut() {
            add_on.pre_update(def.core_mut(), node, session)?;
        }
        session.models = def.core().content_models();
        for add_on in add_ons.iter_mut() {
            add_on.update(def.core(), node, session)?;
        }
        Ok(())
    })();
    def.core_mut().add_ons = add_ons;
    hooks?;

    def.do_update(node, session)?;

    let mut add_ons = std::mem::take(&mut def.core_mut().add_ons);
    let hooks = (|| -> CompileResult<()> {
        for add_on in add_ons.iter_mut() {
            add_on.post_update(def.core(), session)?;
        }
        Ok(())
    })();
    def.core_mut().add_ons = add_ons;
    hooks?;

    def.post_update(session)
}
