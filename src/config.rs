//! Compiler configuration
//!
//! Threaded explicitly through the tokenizer, parser and code generator. Can
//! be loaded from a TOML file; missing keys fall back to the defaults.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// Default bound on the number of arguments a single statement may carry
pub const DEFAULT_MAX_STATEMENT_ARGS: usize = 64;

/// Configuration for a compilation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Maximum number of top-level arguments in one statement
    pub max_statement_args: usize,
    /// Runtime support header included at the top of the generated file
    pub header: String,
}

impl CompilerConfig {
    pub fn new(max_statement_args: usize, header: impl Into<String>) -> Self {
        Self {
            max_statement_args,
            header: header.into(),
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> CompileResult<Self> {
        let config: CompilerConfig = toml::from_str(text)
            .map_err(|e| CompileError::config(format!("failed to parse TOML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> CompileResult<Self> {
        info!(path = path.display().to_string(); "Loading configuration");
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> CompileResult<()> {
        if self.max_statement_args == 0 {
            return Err(CompileError::config("max_statement_args must be at least 1"));
        }
        if self.header.trim().is_empty() {
            return Err(CompileError::config("header must not be empty"));
        }
        Ok(())
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STATEMENT_ARGS, "npe.h")
    }
}
