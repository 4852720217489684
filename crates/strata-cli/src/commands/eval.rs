//! `strata eval`: instantiate a document and print its values

use anyhow::bail;
use strata_engine::{Compiler, ModelValue};
use strata_reactive::ObservableAction;
use termcolor::{ColorChoice, StandardStream};
use tracing::debug;

use super::Document;
use crate::output::StyledOutput;

/// Printed form of a live value
pub fn render(value: &ModelValue) -> String {
    match value {
        ModelValue::Value(_) | ModelValue::Collection(_) => value.to_datum().to_string(),
        ModelValue::Map(map) => format!("{:?}", map),
        ModelValue::Action(action) => match action.is_enabled() {
            Some(message) => format!("<action, disabled: {}>", message),
            None => "<action>".to_string(),
        },
        ModelValue::Event(_) => "<event>".to_string(),
    }
}

pub fn execute(document: &Document, names: &[String], color: ColorChoice) -> anyhow::Result<i32> {
    let compiler = Compiler::new(document.config.clone());
    let compiled = compiler.compile(document.node.clone());
    let interpreted = compiler.interpret(&compiled);
    let mut diagnostics = compiled.diagnostics.clone();
    diagnostics.merge(interpreted.diagnostics.clone());
    if diagnostics.has_errors() {
        let mut stderr = StandardStream::stderr(color);
        diagnostics.emit(&mut stderr, &document.files(), 0)?;
        return Ok(1);
    }

    let instance = interpreted.instantiate()?;
    let selected: Vec<String> = if names.is_empty() {
        interpreted.types().keys().cloned().collect()
    } else {
        names.to_vec()
    };

    let mut out = StyledOutput::new(color);
    for name in &selected {
        let Some(ty) = interpreted.type_of(name) else {
            bail!("'{}' is not a top-level value of {}", name, document.path.display());
        };
        match instance.get(name) {
            Ok(value) => out.binding(name, &ty.to_string(), &render(&value)),
            Err(err) => {
                debug!(name = %name, error = %err, "value not available");
                out.unavailable(name, &ty.to_string(), &err.to_string());
            }
        }
    }
    Ok(0)
}
