//! Engine configuration (strata.toml)

use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_reactive::CollectStrategy;
use thiserror::Error;

use crate::error::{WarningCode, WarningConfig};

/// Default bound on loop iterations
pub const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Loop safeguards
    pub loops: LoopConfig,

    /// Collection materialization
    pub collections: CollectionConfig,

    /// Warning configuration
    pub warnings: WarningsConfig,

    /// Logging
    pub log: LogConfig,
}

/// `[loops]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Iterations after which a loop stops even if its condition holds
    pub max_iterations: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Strategy names accepted in `[collections]`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyName {
    /// Recomputed views wherever possible
    #[default]
    Passive,
    /// Cached collections
    Active,
}

/// `[collections]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectionConfig {
    /// Strategy for flows that do not force one
    pub default_strategy: StrategyName,
}

impl CollectionConfig {
    /// Strategy used when no operation forces one
    pub fn fallback(&self) -> CollectStrategy {
        match self.default_strategy {
            StrategyName::Passive => CollectStrategy::Auto,
            StrategyName::Active => CollectStrategy::Active,
        }
    }
}

/// `[warnings]` section, using warning names such as "shadowed-name"
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarningsConfig {
    /// Warnings that are never reported
    pub disabled: Vec<String>,
    /// Warnings reported as errors
    pub deny: Vec<String>,
    /// Report every warning as an error
    pub strict: bool,
}

/// `[log]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive for tracing output
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loops.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "loops.max_iterations must be at least 1".to_string(),
            ));
        }

        for name in self.warnings.disabled.iter().chain(&self.warnings.deny) {
            if WarningCode::from_name(name).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown warning '{}'",
                    name
                )));
            }
        }

        if self.log.level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "log.level cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Warning configuration for diagnostics
    pub fn warning_config(&self) -> WarningConfig {
        WarningConfig {
            disabled: self
                .warnings
                .disabled
                .iter()
                .filter_map(|name| WarningCode::from_name(name))
                .collect(),
            deny: self
                .warnings
                .deny
                .iter()
                .filter_map(|name| WarningCode::from_name(name))
                .collect(),
            strict: self.warnings.strict,
        }
    }
}
