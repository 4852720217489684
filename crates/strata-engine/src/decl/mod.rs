//! Declaration input: positioned nodes and the schema they are checked against

mod node;
mod position;
mod schema;

pub use node::{AttributeValue, DeclNode};
pub use position::SourcePosition;
pub use schema::{
    AttributeKind, AttributeSpec, CapabilitySpec, CapabilityTag, ChildSpec, DynamicValueDecl,
    ElementSpec, Schema,
};
