//! Model sets, model values and model instances

mod contract;
mod instance;
mod set;
mod value;

pub use contract::{
    same_instantiator, CompiledModelValue, InstantiatorRef, InterpretedNode, InterpretedRef,
    InterpretedValue, ValueInstantiator,
};
pub use instance::{ModelInstance, ModelLayout, ModelSetInstantiator};
pub use set::{
    ComponentId, ComponentKind, DynamicState, ModelComponent, ModelSet, ModelSetId, ModelSets,
    Satisfier,
};
pub use value::ModelValue;
