//! `event`: a stream fired from outside the model

use std::sync::Arc;
use strata_reactive::EventSource;

use super::{def_core, resolve_element};
use crate::decl::{DeclNode, ElementSpec};
use crate::element::{DefCore, ElementDef, InterpretEnv, UpdateSession, ValueInterpreted};
use crate::error::{CompileResult, InstantiationResult, InterpretResult};
use crate::model::{
    CompiledModelValue, InterpretedNode, InterpretedRef, ModelInstance, ModelValue, ValueInstantiator,
};
use crate::toolkit::Toolkit;
use crate::trace::TraceTable;
use crate::types::{ElementType, ModelInstanceType, ModelType};

pub(super) fn register(toolkit: &mut Toolkit) {
    toolkit.register(
        ElementSpec::new("event").extends("typed-value"),
        Some(|core| Box::new(EventDef::new(core)) as Box<dyn ElementDef>),
    );
    toolkit.register_trace(
        TraceTable::builder::<EventDef, ValueInterpreted>("event")
            .named()
            .typed()
            .build(),
    );
}

/// An event source of the declared element type
pub struct EventDef {
    core: DefCore,
}

impl EventDef {
    /// Definition of an event source
    pub fn new(core: DefCore) -> Self {
        Self { core }
    }
}

impl ElementDef for EventDef {
    def_core!();

    fn do_update(&mut self, _node: &DeclNode, _session: &mut UpdateSession<'_>) -> CompileResult<()> {
        Ok(())
    }

    fn as_model_value(&self) -> Option<&dyn CompiledModelValue> {
        Some(self)
    }
}

impl CompiledModelValue for EventDef {
    fn model_type(&self) -> Option<ModelType> {
        Some(ModelType::Event)
    }

    fn interpret_value(&self, _env: &mut InterpretEnv<'_>) -> InterpretResult<InterpretedRef> {
        let element = resolve_element(self.core.declared_type(), ElementType::Unknown);
        Ok(InterpretedNode::of(
            ModelInstanceType::event(element),
            Arc::new(EventInstantiator),
        ))
    }
}

struct EventInstantiator;

impl ValueInstantiator for EventInstantiator {
    fn get(&self, _models: &ModelInstance) -> InstantiationResult<ModelValue> {
        Ok(ModelValue::Event(Arc::new(EventSource::new())))
    }
}
