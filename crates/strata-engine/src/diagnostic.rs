//! Diagnostic infrastructure for error reporting
//!
//! Every lifecycle stage reports into a `Diagnostics` accumulator instead of
//! aborting, so one broken declaration does not stop its siblings from
//! compiling. Diagnostics render through codespan-reporting for terminals and
//! as JSON for tooling.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, Severity as CsSeverity};
use codespan_reporting::files::{Files, SimpleFiles};
use codespan_reporting::term;
use termcolor::WriteColor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::decl::SourcePosition;
use crate::error::{CompileError, InstantiationError, InterpretError, WarningCode, WarningConfig};

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails the stage
    Error,
    /// Reported without failing
    Warning,
    /// Extra context
    Note,
}

impl Severity {
    fn to_codespan(self) -> CsSeverity {
        match self {
            Severity::Error => CsSeverity::Error,
            Severity::Warning => CsSeverity::Warning,
            Severity::Note => CsSeverity::Note,
        }
    }
}

/// A diagnostic message keyed by source position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the problem is
    pub severity: Severity,
    /// Error or warning code (e.g., "E1003")
    pub code: Option<String>,
    /// Primary message
    pub message: String,
    /// Declaration the message is about
    pub position: SourcePosition,
    /// Additional notes and help
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(severity: Severity, message: impl Into<String>, position: SourcePosition) -> Self {
        Diagnostic {
            severity,
            code: None,
            message: message.into(),
            position,
            notes: Vec::new(),
        }
    }

    /// Create an error diagnostic
    pub fn error(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(Severity::Error, message, position)
    }

    /// Create a warning diagnostic
    pub fn warning(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(Severity::Warning, message, position)
    }

    /// Set the code
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    /// Add a note (additional context)
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Add a help suggestion
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.notes.push(format!("help: {}", help.into()));
        self
    }

    /// Create diagnostic from a CompileError
    pub fn from_compile_error(error: &CompileError) -> Self {
        let diag = Diagnostic::error(error.to_string(), error.position()).with_code(error.code());
        match error {
            CompileError::NoTransformForModelType { .. } => {
                diag.with_note("Transformations exist for values, collections, events and actions")
            }
            CompileError::UnsupportedOperator { .. } => {
                diag.with_help("Check the operator name against the operators of this model type")
            }
            CompileError::Internal { .. } => {
                diag.with_note("Sibling declarations were still compiled")
            }
            _ => diag,
        }
    }

    /// Create diagnostic from an InterpretError
    pub fn from_interpret_error(error: &InterpretError) -> Self {
        let diag = Diagnostic::error(error.to_string(), error.position()).with_code(error.code());
        match error {
            InterpretError::PassiveNotSupported { .. } => {
                diag.with_help("Collect actively or remove the stage")
            }
            InterpretError::Unsatisfied { .. } => {
                diag.with_help("Satisfy the value with a producer or a type before use")
            }
            _ => diag,
        }
    }

    /// Create diagnostic from a runtime failure of the element at `position`
    pub fn from_instantiation_error(error: &InstantiationError, position: SourcePosition) -> Self {
        Diagnostic::error(error.to_string(), position).with_code(error.code())
    }

    /// Convert to a codespan diagnostic labelled in `file_id`
    pub fn to_codespan(&self, file_id: usize) -> CsDiagnostic<usize> {
        let mut inner = CsDiagnostic::new(self.severity.to_codespan()).with_message(&self.message);
        if let Some(code) = &self.code {
            inner = inner.with_code(code);
        }
        if self.position.has_span() {
            let label = Label::primary(file_id, self.position.start..self.position.end)
                .with_message(format!("at {}", self.position));
            inner = inner.with_labels(vec![label]);
        } else {
            inner.notes.push(format!("at line {}, column {}", self.position.line, self.position.column));
        }
        inner.notes.extend(self.notes.iter().cloned());
        inner
    }

    /// JSON representation, with labels resolved against `files`
    pub fn to_json_value(&self, files: &SimpleFiles<String, String>, file_id: usize) -> JsonDiagnostic {
        JsonDiagnostic::from_diagnostic(self, files, file_id)
    }
}

/// JSON representation of a diagnostic for tooling
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonDiagnostic {
    /// Error or warning code
    pub code: Option<String>,
    /// How serious the problem is
    pub severity: Severity,
    /// Primary message
    pub message: String,
    /// Line of the declaration (1-indexed, 0 when unknown)
    pub line: u32,
    /// Column of the declaration (1-indexed, 0 when unknown)
    pub column: u32,
    /// Source locations with labels
    pub labels: Vec<JsonLabel>,
    /// Additional notes and help
    pub notes: Vec<String>,
}

/// JSON representation of a diagnostic label
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLabel {
    /// Name of the source file
    pub file: String,
    /// 1-indexed
    pub start_line: usize,
    /// 1-indexed
    pub start_column: usize,
    /// 1-indexed
    pub end_line: usize,
    /// 1-indexed, exclusive
    pub end_column: usize,
}

impl JsonDiagnostic {
    /// Convert a Diagnostic to JSON representation
    pub fn from_diagnostic(diag: &Diagnostic, files: &SimpleFiles<String, String>, file_id: usize) -> Self {
        let labels = if diag.position.has_span() {
            label_of(files, file_id, diag.position).into_iter().collect()
        } else {
            Vec::new()
        };
        JsonDiagnostic {
            code: diag.code.clone(),
            severity: diag.severity,
            message: diag.message.clone(),
            line: diag.position.line,
            column: diag.position.column,
            labels,
            notes: diag.notes.clone(),
        }
    }
}

fn label_of(files: &SimpleFiles<String, String>, file_id: usize, position: SourcePosition) -> Option<JsonLabel> {
    let file = files.get(file_id).ok()?;
    let start = file.location((), position.start).ok()?;
    let end = file.location((), position.end).ok()?;
    Some(JsonLabel {
        file: file.name().to_string(),
        start_line: start.line_number,
        start_column: start.column_number,
        end_line: end.line_number,
        end_column: end.column_number,
    })
}

/// Helper to create a SimpleFiles instance from source text
pub fn create_files(path: impl Into<PathBuf>, source: impl Into<String>) -> SimpleFiles<String, String> {
    let mut files = SimpleFiles::new();
    files.add(path.into().display().to_string(), source.into());
    files
}

// ============================================================================
// Accumulator
// ============================================================================

/// Ordered collection of diagnostics produced by one stage
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    warnings: WarningConfig,
}

impl Diagnostics {
    /// Create an empty accumulator applying `warnings`
    pub fn new(warnings: WarningConfig) -> Self {
        Self {
            items: Vec::new(),
            warnings,
        }
    }

    /// Add a diagnostic
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    /// Report a compile failure
    pub fn report_compile(&mut self, error: &CompileError) {
        tracing::debug!(code = error.code(), %error, "compile error");
        self.push(Diagnostic::from_compile_error(error));
    }

    /// Report an interpretation failure unless it only echoes an earlier one
    pub fn report_interpret(&mut self, error: &InterpretError) {
        if error.is_cascade() {
            return;
        }
        tracing::debug!(code = error.code(), %error, "interpretation error");
        self.push(Diagnostic::from_interpret_error(error));
    }

    /// Report a configurable warning, honoring the warning configuration
    pub fn warn(&mut self, code: WarningCode, message: impl Into<String>, position: SourcePosition) {
        if !self.warnings.is_enabled(code) {
            return;
        }
        let severity = if self.warnings.is_denied(code) {
            Severity::Error
        } else {
            Severity::Warning
        };
        self.push(Diagnostic::new(severity, message, position).with_code(code.as_str()));
    }

    /// Append every diagnostic of `other`
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Diagnostics in the order they were reported
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Number of diagnostics of any severity
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was reported
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of errors
    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.severity == Severity::Error).count()
    }

    /// Number of warnings
    pub fn warning_count(&self) -> usize {
        self.items.iter().filter(|d| d.severity == Severity::Warning).count()
    }

    /// Whether any error was reported
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Whether any diagnostic carries `code`
    pub fn contains_code(&self, code: &str) -> bool {
        self.items.iter().any(|d| d.code.as_deref() == Some(code))
    }

    /// Render every diagnostic to `writer`
    pub fn emit(
        &self,
        writer: &mut dyn WriteColor,
        files: &SimpleFiles<String, String>,
        file_id: usize,
    ) -> Result<(), codespan_reporting::files::Error> {
        let config = term::Config::default();
        for diagnostic in &self.items {
            term::emit(writer, &config, files, &diagnostic.to_codespan(file_id))?;
        }
        Ok(())
    }

    /// Convert to a JSON array for tooling
    pub fn to_json(&self, files: &SimpleFiles<String, String>, file_id: usize) -> Result<String, serde_json::Error> {
        let json: Vec<JsonDiagnostic> = self
            .items
            .iter()
            .map(|d| d.to_json_value(files, file_id))
            .collect();
        serde_json::to_string_pretty(&json)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_compile_error_carries_code() {
        let error = CompileError::UnsupportedOperator {
            operator: "sort".to_string(),
            model_type: "Value".to_string(),
            position: SourcePosition::new(5, 9, 1, 6),
        };
        let diag = Diagnostic::from_compile_error(&error);
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("E1004"));
        assert!(diag.message.contains("sort"));
        assert_eq!(diag.notes.len(), 1);
    }

    #[test]
    fn test_cascade_errors_are_not_reported() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.report_interpret(&InterpretError::NotInterpreted {
            element: "value".to_string(),
            position: SourcePosition::default(),
        });
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_warning_config_applies() {
        let mut config = WarningConfig::default();
        config.deny.insert(WarningCode::ShadowedName);
        config.disabled.insert(WarningCode::MissingTraceability);
        let mut diagnostics = Diagnostics::new(config);
        diagnostics.warn(WarningCode::ShadowedName, "hides outer x", SourcePosition::at(1, 1));
        diagnostics.warn(WarningCode::MissingTraceability, "no table", SourcePosition::at(2, 1));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.has_errors());
        assert!(diagnostics.contains_code("W1002"));
    }

    #[test]
    fn test_json_output() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.report_compile(&CompileError::MissingAttribute {
            element: "transform".to_string(),
            attribute: "source".to_string(),
            position: SourcePosition::new(2, 11, 1, 3),
        });
        let files = create_files("doc.json", "{ transform }");
        let json = diagnostics.to_json(&files, 0).unwrap();
        assert!(json.contains("\"E1002\""));
        assert!(json.contains("\"error\""));
        assert!(json.contains("\"start_line\""));
    }

    #[test]
    fn test_codespan_without_span_uses_note() {
        let diag = Diagnostic::warning("careful", SourcePosition::at(4, 2));
        let inner = diag.to_codespan(0);
        assert!(inner.labels.is_empty());
        assert!(inner.notes[0].contains("line 4"));
    }

    #[test]
    fn test_emit_renders() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.push(Diagnostic::error("boom", SourcePosition::new(0, 4, 1, 1)));
        let files = create_files("doc.json", "boom boom");
        let mut buffer = termcolor::Buffer::no_color();
        diagnostics.emit(&mut buffer, &files, 0).unwrap();
        let text = String::from_utf8_lossy(buffer.as_slice()).to_string();
        assert!(text.contains("boom"));
    }
}
