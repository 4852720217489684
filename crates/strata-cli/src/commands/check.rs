//! `strata check`: compile and interpret, then report diagnostics

use strata_engine::{Compiler, Diagnostics};
use termcolor::{ColorChoice, StandardStream};

use super::Document;
use crate::output::StyledOutput;
use crate::Format;

/// Diagnostics of both stages, in order
pub fn diagnose(document: &Document) -> Diagnostics {
    let compiler = Compiler::new(document.config.clone());
    let compiled = compiler.compile(document.node.clone());
    let interpreted = compiler.interpret(&compiled);
    let mut diagnostics = compiled.diagnostics.clone();
    diagnostics.merge(interpreted.diagnostics);
    diagnostics
}

/// Report diagnostics in `format`; exit code 1 when any is an error
pub fn execute(document: &Document, format: Format, color: ColorChoice) -> anyhow::Result<i32> {
    let diagnostics = diagnose(document);
    let files = document.files();
    match format {
        Format::Json => println!("{}", diagnostics.to_json(&files, 0)?),
        Format::Human => {
            let mut stderr = StandardStream::stderr(color);
            diagnostics.emit(&mut stderr, &files, 0)?;
            let mut out = StyledOutput::new(color);
            out.summary(&document.path.display().to_string(), &diagnostics);
        }
    }
    Ok(if diagnostics.has_errors() { 1 } else { 0 })
}
