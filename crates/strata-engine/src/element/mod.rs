//! Element lifecycle: definitions, interpretations and instances
//!
//! A declaration compiles into a definition held in the [`Document`] arena.
//! Interpretation resolves types against an [`InterpretEnv`]; instantiation
//! binds the result to a model instance. Add-ons attach capability behavior
//! to every stage.

mod addon;
mod def;
mod env;
mod instance;
mod session;

pub use addon::{
    is_valid_name, AddOnDef, AddOnInstance, AddOnInstantiator, AddOnInterpreted, AddOnSet,
    ElementModelAddOn, ElementModelInstance, NamedAddOn, NamedInstance, TypedAddOn,
    TypedInstance,
};
pub use def::{DefCore, Document, ElementDef, ElementId};
pub use env::{ComponentInstantiator, ElementInterpreted, InterpretEnv, InterpretedCore, ValueInterpreted};
pub use instance::{ElementInstance, ElementInstantiator};
pub use session::{update_element, UpdateSession};
