//! Strata Engine
//!
//! A staged compiler for reactive model values:
//! - **Compile**: declarations become definitions checked against the
//!   element schema (`decl`, `element`)
//! - **Interpret**: definitions get resolved types and cached instantiators
//!   (`model`, `values`, `transform`, `expr`)
//! - **Instantiate**: instantiators produce live `strata_reactive` containers
//!   bound to a model instance
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_engine::{Compiler, DeclNode, EngineConfig};
//!
//! let node = DeclNode::from_json(r#"{
//!     "type": "models",
//!     "children": [
//!         {"type": "value", "attributes": {"name": "x", "type": "int", "init": 5}},
//!         {"type": "transform", "attributes": {"name": "y", "source": "x"}, "children": [
//!             {"type": "map-to", "attributes": {"map": {"expr": {"binary": {
//!                 "op": "mul", "left": {"name": "source"}, "right": {"lit": 2}}}}}}
//!         ]}
//!     ]
//! }"#)?;
//!
//! let compiler = Compiler::new(EngineConfig::default());
//! let compiled = compiler.compile(node);
//! let interpreted = compiler.interpret(&compiled);
//! let instance = interpreted.instantiate()?;
//! assert_eq!(instance.get("y")?.to_datum(), Datum::Int(10));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]

// ============================================================================
// Modules
// ============================================================================

/// Compile, interpret and instantiate entry point
pub mod compiler;

/// Engine configuration (strata.toml)
pub mod config;

/// Declaration nodes and the element schema
pub mod decl;

/// Diagnostics accumulation and rendering
pub mod diagnostic;

/// Dynamic and hollow value registry
pub mod dynamic;

/// Element lifecycle
pub mod element;

/// Error types
pub mod error;

/// Expressions
pub mod expr;

/// Model sets, instances and the model value contract
pub mod model;

/// Registered element types and capabilities
pub mod toolkit;

/// Traceability tables
pub mod trace;

/// Transformations of model values
pub mod transform;

/// Model and element types
pub mod types;

/// Declared model values
pub mod values;

// ============================================================================
// Re-exports
// ============================================================================

pub use compiler::{CompiledDocument, Compiler, InterpretedDocument};
pub use config::{ConfigError, EngineConfig};
pub use decl::{AttributeValue, DeclNode, SourcePosition};
pub use diagnostic::{Diagnostic, Diagnostics, Severity};
pub use element::{ElementId, ElementInstance};
pub use error::{
    CompileError, DynamicValueError, InstantiationError, InterpretError, WarningCode, WarningConfig,
};
pub use expr::Expr;
pub use model::{ModelInstance, ModelValue};
pub use toolkit::Toolkit;
pub use types::{ElementType, ModelInstanceType, ModelType};
