//! Error types for every lifecycle stage
//!
//! Compile and interpretation errors carry the source position of the
//! declaration that caused them and are reported to the diagnostics sink at the
//! lifecycle boundary. Instantiation errors are runtime failures returned to
//! the caller. Dynamic value misuse is a hard failure in every stage.

use crate::decl::SourcePosition;
use strata_reactive::ReactiveError;
use thiserror::Error;

/// Result alias for the definition stage
pub type CompileResult<T> = Result<T, CompileError>;
/// Result alias for the interpretation stage
pub type InterpretResult<T> = Result<T, InterpretError>;
/// Result alias for instantiation and runtime
pub type InstantiationResult<T> = Result<T, InstantiationError>;

/// Errors raised while compiling declarations into definitions
#[derive(Debug, Error, Clone)]
pub enum CompileError {
    /// No element type with this name is known
    #[error("Unknown element type '{name}'")]
    UnknownElementType {
        /// Element type name
        name: String,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// A required attribute is absent
    #[error("Element '{element}' requires attribute '{attribute}'")]
    MissingAttribute {
        /// Element type name
        element: String,
        /// Attribute name
        attribute: String,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// The model type at this point of a transformation has no operator family
    #[error("No transformations are available for model type {model_type}")]
    NoTransformForModelType {
        /// Model type reaching the operation
        model_type: String,
        /// Location of the operation
        position: SourcePosition,
    },

    /// The operator is not part of the family for the current model type
    #[error("Operator '{operator}' is not supported for model type {model_type}")]
    UnsupportedOperator {
        /// Operator name
        operator: String,
        /// Model type reaching the operation
        model_type: String,
        /// Location of the operation
        position: SourcePosition,
    },

    /// The schema does not declare this attribute for the element
    #[error("Element '{element}' has no attribute '{attribute}'")]
    UnknownAttribute {
        /// Element type name
        element: String,
        /// Attribute name
        attribute: String,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// An attribute has the wrong kind of value
    #[error("Attribute '{attribute}' is malformed: {message}")]
    MalformedAttribute {
        /// Attribute name
        attribute: String,
        /// What was wrong
        message: String,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// The schema does not declare this child role for the element
    #[error("Element '{element}' has no child role '{role}'")]
    UnknownChild {
        /// Element type name
        element: String,
        /// Child role
        role: String,
        /// Location of the child
        position: SourcePosition,
    },

    /// A child role appears too few or too many times
    #[error("Element '{element}' expects {expected} '{role}' children, found {actual}")]
    ChildCount {
        /// Element type name
        element: String,
        /// Child role
        role: String,
        /// Human readable bound, e.g. "at most 1"
        expected: String,
        /// Number present
        actual: usize,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// Two components of one model set share a name
    #[error("Duplicate name '{name}'")]
    DuplicateName {
        /// Conflicting name
        name: String,
        /// Location of the duplicate
        position: SourcePosition,
    },

    /// A name does not resolve in the enclosing models
    #[error("Cannot find '{name}' in the enclosing models")]
    UnresolvedName {
        /// Dotted name
        name: String,
        /// Location of the reference
        position: SourcePosition,
    },

    /// The model type of a value cannot be determined yet
    #[error("Cannot determine the model type of '{name}'")]
    UnresolvedModelType {
        /// Name or description of the value
        name: String,
        /// Location of the reference
        position: SourcePosition,
    },

    /// A type spec could not be parsed
    #[error("Invalid type '{spec}': {message}")]
    InvalidType {
        /// The type spec text
        spec: String,
        /// Parser message
        message: String,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// A name attribute is not a valid identifier
    #[error("Invalid name '{name}'")]
    InvalidName {
        /// The offending name
        name: String,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// Dynamic value misuse while compiling
    #[error("{source}")]
    Dynamic {
        /// Underlying failure
        source: DynamicValueError,
        /// Location of the declaration
        position: SourcePosition,
    },

    /// Unexpected failure inside a definition update
    #[error("Internal error: {message}")]
    Internal {
        /// Description
        message: String,
        /// Location of the declaration
        position: SourcePosition,
    },
}

impl CompileError {
    /// Get the position associated with this error
    pub fn position(&self) -> SourcePosition {
        match self {
            CompileError::UnknownElementType { position, .. } => *position,
            CompileError::MissingAttribute { position, .. } => *position,
            CompileError::NoTransformForModelType { position, .. } => *position,
            CompileError::UnsupportedOperator { position, .. } => *position,
            CompileError::UnknownAttribute { position, .. } => *position,
            CompileError::MalformedAttribute { position, .. } => *position,
            CompileError::UnknownChild { position, .. } => *position,
            CompileError::ChildCount { position, .. } => *position,
            CompileError::DuplicateName { position, .. } => *position,
            CompileError::UnresolvedName { position, .. } => *position,
            CompileError::UnresolvedModelType { position, .. } => *position,
            CompileError::InvalidType { position, .. } => *position,
            CompileError::InvalidName { position, .. } => *position,
            CompileError::Dynamic { position, .. } => *position,
            CompileError::Internal { position, .. } => *position,
        }
    }

    /// Get the error code (e.g. "E1003")
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UnknownElementType { .. } => "E1001",
            CompileError::MissingAttribute { .. } => "E1002",
            CompileError::NoTransformForModelType { .. } => "E1003",
            CompileError::UnsupportedOperator { .. } => "E1004",
            CompileError::UnknownAttribute { .. } => "E1005",
            CompileError::MalformedAttribute { .. } => "E1006",
            CompileError::UnknownChild { .. } => "E1007",
            CompileError::ChildCount { .. } => "E1008",
            CompileError::DuplicateName { .. } => "E1009",
            CompileError::UnresolvedName { .. } => "E1010",
            CompileError::UnresolvedModelType { .. } => "E1011",
            CompileError::InvalidType { .. } => "E1012",
            CompileError::InvalidName { .. } => "E1013",
            CompileError::Dynamic { .. } => "E1014",
            CompileError::Internal { .. } => "E1099",
        }
    }

    pub(crate) fn internal(message: impl Into<String>, position: SourcePosition) -> Self {
        CompileError::Internal {
            message: message.into(),
            position,
        }
    }
}

/// Errors raised while resolving types of definitions
#[derive(Debug, Error, Clone)]
pub enum InterpretError {
    /// A value's type is not assignable where it is used
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type
        actual: String,
        /// Location of the use
        position: SourcePosition,
    },

    /// A name refers to something that does not produce a value
    #[error("'{name}' is not a model value")]
    NotAValue {
        /// Dotted name
        name: String,
        /// Location of the reference
        position: SourcePosition,
    },

    /// A name does not resolve in the enclosing models
    #[error("Cannot find '{name}' in the enclosing models")]
    UnresolvedName {
        /// Dotted name
        name: String,
        /// Location of the reference
        position: SourcePosition,
    },

    /// A value's type depends on itself
    #[error("{name} depends on itself")]
    CyclicReference {
        /// Quoted description of the value
        name: String,
        /// Location of the reference
        position: SourcePosition,
    },

    /// A dynamic value has neither a producer nor a type
    #[error("Dynamic value '{name}' is not satisfied")]
    Unsatisfied {
        /// Slot name
        name: String,
        /// Location of the reference
        position: SourcePosition,
    },

    /// An operator cannot be applied to an operand type
    #[error("Operator '{op}' cannot be applied to {operand}")]
    InvalidOperand {
        /// Operator
        op: String,
        /// Operand type(s)
        operand: String,
        /// Location of the expression
        position: SourcePosition,
    },

    /// A reverse declaration cannot be honored
    #[error("Unsupported reverse: {message}")]
    UnsupportedReverse {
        /// Description
        message: String,
        /// Location of the reverse
        position: SourcePosition,
    },

    /// Passive collection was forced on a flow that needs an active one
    #[error("A '{stage}' stage cannot be collected passively")]
    PassiveNotSupported {
        /// First stage preventing a passive view
        stage: String,
        /// Location of the collect operation
        position: SourcePosition,
    },

    /// An element depended on one whose interpretation already failed
    #[error("'{element}' could not be interpreted")]
    NotInterpreted {
        /// Element type of the failed dependency
        element: String,
        /// Location of the dependency
        position: SourcePosition,
    },

    /// Dynamic value misuse while interpreting
    #[error("{source}")]
    Dynamic {
        /// Underlying failure
        source: DynamicValueError,
        /// Location of the element
        position: SourcePosition,
    },

    /// Unexpected failure inside an interpretation update
    #[error("Internal error: {message}")]
    Internal {
        /// Description
        message: String,
        /// Location of the element
        position: SourcePosition,
    },
}

impl InterpretError {
    /// Get the position associated with this error
    pub fn position(&self) -> SourcePosition {
        match self {
            InterpretError::TypeMismatch { position, .. } => *position,
            InterpretError::NotAValue { position, .. } => *position,
            InterpretError::UnresolvedName { position, .. } => *position,
            InterpretError::CyclicReference { position, .. } => *position,
            InterpretError::Unsatisfied { position, .. } => *position,
            InterpretError::InvalidOperand { position, .. } => *position,
            InterpretError::UnsupportedReverse { position, .. } => *position,
            InterpretError::PassiveNotSupported { position, .. } => *position,
            InterpretError::NotInterpreted { position, .. } => *position,
            InterpretError::Dynamic { position, .. } => *position,
            InterpretError::Internal { position, .. } => *position,
        }
    }

    /// Get the error code (e.g. "E2001")
    pub fn code(&self) -> &'static str {
        match self {
            InterpretError::TypeMismatch { .. } => "E2001",
            InterpretError::NotAValue { .. } => "E2002",
            InterpretError::UnresolvedName { .. } => "E2003",
            InterpretError::CyclicReference { .. } => "E2004",
            InterpretError::Unsatisfied { .. } => "E2005",
            InterpretError::InvalidOperand { .. } => "E2006",
            InterpretError::UnsupportedReverse { .. } => "E2007",
            InterpretError::PassiveNotSupported { .. } => "E2008",
            InterpretError::NotInterpreted { .. } => "E2009",
            InterpretError::Dynamic { .. } => "E2010",
            InterpretError::Internal { .. } => "E2099",
        }
    }

    /// Whether this error only echoes a failure already reported elsewhere
    pub fn is_cascade(&self) -> bool {
        matches!(self, InterpretError::NotInterpreted { .. })
    }

    pub(crate) fn internal(message: impl Into<String>, position: SourcePosition) -> Self {
        InterpretError::Internal {
            message: message.into(),
            position,
        }
    }

    pub(crate) fn mismatch(
        expected: impl ToString,
        actual: impl ToString,
        position: SourcePosition,
    ) -> Self {
        InterpretError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
            position,
        }
    }
}

/// Runtime failures while materializing values against a model instance
#[derive(Debug, Error, Clone)]
pub enum InstantiationError {
    /// No binding exists for a component in the scope chain
    #[error("'{name}' is not bound in this model instance")]
    Unbound {
        /// Component name
        name: String,
    },

    /// A hollow value was never satisfied
    #[error("Dynamic value '{name}' was not satisfied")]
    Unsatisfied {
        /// Slot name
        name: String,
    },

    /// A value of the wrong model type was supplied
    #[error("Expected a {expected}, got a {actual}")]
    WrongModelType {
        /// Expected model type
        expected: String,
        /// Supplied model type
        actual: String,
    },

    /// The model instance was already built
    #[error("Model instance is sealed")]
    Sealed,

    /// A value depends on itself at runtime
    #[error("'{name}' depends on itself")]
    Cycle {
        /// Component name
        name: String,
    },

    /// Dynamic value misuse at runtime
    #[error(transparent)]
    Dynamic(#[from] DynamicValueError),

    /// A reactive container refused an operation
    #[error(transparent)]
    Reactive(#[from] ReactiveError),

    /// Unexpected failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InstantiationError {
    /// Get the error code (e.g. "E3001")
    pub fn code(&self) -> &'static str {
        match self {
            InstantiationError::Unbound { .. } => "E3001",
            InstantiationError::Unsatisfied { .. } => "E3002",
            InstantiationError::WrongModelType { .. } => "E3003",
            InstantiationError::Sealed => "E3004",
            InstantiationError::Cycle { .. } => "E3005",
            InstantiationError::Dynamic(_) => "E3006",
            InstantiationError::Reactive(_) => "E3007",
            InstantiationError::Internal(_) => "E3099",
        }
    }
}

/// Misuse of a dynamic value slot
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DynamicValueError {
    /// Satisfied again with a producer unequal to the first
    #[error("Dynamic value '{name}' is already satisfied with a different producer")]
    AlreadySatisfied {
        /// Slot name
        name: String,
    },

    /// Satisfied through the wrong variant for this slot
    #[error("Dynamic value '{name}': {message}")]
    WrongVariant {
        /// Slot name
        name: String,
        /// Which variant was expected
        message: String,
    },

    /// The satisfying type does not fit the declared type
    #[error("Dynamic value '{name}' is declared as {expected}, got {actual}")]
    TypeMismatch {
        /// Slot name
        name: String,
        /// Declared type
        expected: String,
        /// Supplied type
        actual: String,
    },

    /// No slot with this name is visible
    #[error("No dynamic value named '{name}'")]
    UnknownSlot {
        /// Slot name
        name: String,
    },

    /// The name resolves to a component that is not a dynamic slot
    #[error("'{name}' is not a dynamic value")]
    NotDynamic {
        /// Component name
        name: String,
    },

    /// Two declarations of one element type share a name
    #[error("Element type '{element_type}' declares dynamic value '{name}' more than once")]
    NameClash {
        /// Slot name
        name: String,
        /// Declaring element type
        element_type: String,
    },

    /// The declaring element type is not in the schema
    #[error("Unknown element type '{name}'")]
    UnknownElementType {
        /// Element type name
        name: String,
    },

    /// The model instance holding the slot was already built
    #[error("Dynamic value '{name}' belongs to a sealed model instance")]
    Sealed {
        /// Slot name
        name: String,
    },
}

// ========================================================================
// Warnings
// ========================================================================

/// Warning codes for configurable warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCode {
    /// Hollow value left for the instance to satisfy (W1001)
    UnsatisfiedDynamicValue,
    /// Local model name hides an outer one (W1002)
    ShadowedName,
    /// Element type has no traceability table (W2001)
    MissingTraceability,
}

impl WarningCode {
    /// Get the warning code string (e.g., "W1001")
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::UnsatisfiedDynamicValue => "W1001",
            WarningCode::ShadowedName => "W1002",
            WarningCode::MissingTraceability => "W2001",
        }
    }

    /// Parse a warning code from its configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unsatisfied-dynamic-value" => Some(WarningCode::UnsatisfiedDynamicValue),
            "shadowed-name" => Some(WarningCode::ShadowedName),
            "missing-traceability" => Some(WarningCode::MissingTraceability),
            _ => None,
        }
    }
}

/// Configuration for which warnings are enabled/disabled
#[derive(Debug, Clone, Default)]
pub struct WarningConfig {
    /// Disabled warning codes (suppressed)
    pub disabled: std::collections::HashSet<WarningCode>,
    /// Warnings promoted to errors
    pub deny: std::collections::HashSet<WarningCode>,
    /// When true, ALL warnings become errors
    pub strict: bool,
}

impl WarningConfig {
    /// Strict mode, where all warnings are errors
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Check if a warning should be emitted
    pub fn is_enabled(&self, code: WarningCode) -> bool {
        !self.disabled.contains(&code)
    }

    /// Check if a warning should be treated as an error
    pub fn is_denied(&self, code: WarningCode) -> bool {
        self.strict || self.deny.contains(&code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Codes ───────────────────────────────────────────────────────────

    #[test]
    fn test_compile_error_codes() {
        let position = SourcePosition::at(2, 4);
        let err = CompileError::NoTransformForModelType {
            model_type: "Map".to_string(),
            position,
        };
        assert_eq!(err.code(), "E1003");
        assert_eq!(err.position(), position);
        assert!(err.to_string().contains("Map"));
    }

    #[test]
    fn test_instantiation_error_from_reactive() {
        let err: InstantiationError = ReactiveError::rejected("nope").into();
        assert_eq!(err.code(), "E3007");
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn test_cascade_detection() {
        let err = InterpretError::NotInterpreted {
            element: "value".to_string(),
            position: SourcePosition::default(),
        };
        assert!(err.is_cascade());
        assert!(!InterpretError::internal("x", SourcePosition::default()).is_cascade());
    }

    // ── WarningCode ─────────────────────────────────────────────────────

    #[test]
    fn test_warning_code_round_trip_names() {
        assert_eq!(WarningCode::ShadowedName.as_str(), "W1002");
        assert_eq!(
            WarningCode::from_name("missing-traceability"),
            Some(WarningCode::MissingTraceability)
        );
        assert_eq!(WarningCode::from_name("unknown"), None);
    }

    // ── WarningConfig ───────────────────────────────────────────────────

    #[test]
    fn test_warning_config_strict_denies_everything() {
        let config = WarningConfig::strict();
        assert!(config.is_enabled(WarningCode::ShadowedName));
        assert!(config.is_denied(WarningCode::ShadowedName));
        assert!(config.is_denied(WarningCode::UnsatisfiedDynamicValue));
    }

    #[test]
    fn test_warning_config_disabled() {
        let mut config = WarningConfig::default();
        config.disabled.insert(WarningCode::MissingTraceability);
        assert!(!config.is_enabled(WarningCode::MissingTraceability));
        assert!(config.is_enabled(WarningCode::ShadowedName));
        assert!(!config.is_denied(WarningCode::ShadowedName));
    }
}
