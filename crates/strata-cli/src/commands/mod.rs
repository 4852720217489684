//! Subcommands and the document loading they share

pub mod check;
pub mod eval;

use anyhow::Context;
use codespan_reporting::files::SimpleFiles;
use std::path::{Path, PathBuf};
use strata_engine::diagnostic::create_files;
use strata_engine::{DeclNode, EngineConfig};

/// Name of the configuration file looked up next to a document
pub const CONFIG_FILE: &str = "strata.toml";

/// A declaration document with its source text and configuration
pub struct Document {
    pub path: PathBuf,
    pub source: String,
    pub node: DeclNode,
    pub config: EngineConfig,
}

impl Document {
    /// Read and parse `path`, with configuration from `config` or the
    /// `strata.toml` beside the document
    pub fn load(path: &Path, config: Option<&Path>) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let node = DeclNode::from_json(&source)
            .with_context(|| format!("{} is not a declaration document", path.display()))?;
        let config = load_config(path, config)?;
        Ok(Self {
            path: path.to_path_buf(),
            source,
            node,
            config,
        })
    }

    /// Source files for diagnostic rendering; the document has id 0
    pub fn files(&self) -> SimpleFiles<String, String> {
        create_files(&self.path, self.source.clone())
    }
}

fn load_config(document: &Path, explicit: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let beside = document
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(CONFIG_FILE);
            if !beside.is_file() {
                return Ok(EngineConfig::default());
            }
            beside
        }
    };
    EngineConfig::from_file(&path).with_context(|| format!("Invalid configuration in {}", path.display()))
}
