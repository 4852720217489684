//! Dynamic and hollow values
//!
//! Element types declare named slots whose type or producer is fixed late:
//! by the element that owns them, by an operation once its source type is
//! known, or by each model instance (hollow values).

mod cache;
mod registry;

pub use cache::{DeclarationCache, Declarations, DynamicValueIdentity};
pub use registry::DynamicRegistry;
