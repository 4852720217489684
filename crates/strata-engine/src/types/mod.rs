//! Model types, element types and type specs

mod element_type;
mod model_type;
mod spec;

pub use element_type::{ElementType, ModelInstanceType};
pub use model_type::ModelType;
pub use spec::{parse_element_type, parse_model_type};
