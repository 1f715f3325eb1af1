//! Error types for the binding compiler

use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
///
/// The first three variants are the compiler proper and always carry the
/// 1-based source line they were raised at. `Io` and `Config` only come from
/// the command-line surface.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Tokenization error at line {line}: {message}")]
    Tokenization { line: usize, message: String },

    #[error("Structural error at line {line}: {message}")]
    Structural { line: usize, message: String },

    #[error("Semantic error at line {line}: {message}")]
    Semantic { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CompileError {
    pub fn tokenization(line: usize, msg: impl Into<String>) -> Self {
        CompileError::Tokenization { line, message: msg.into() }
    }

    pub fn structural(line: usize, msg: impl Into<String>) -> Self {
        CompileError::Structural { line, message: msg.into() }
    }

    pub fn semantic(line: usize, msg: impl Into<String>) -> Self {
        CompileError::Semantic { line, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::Config { message: msg.into() }
    }

    /// Short label for the error class, used as the CLI report prefix
    pub fn class(&self) -> &'static str {
        match self {
            CompileError::Tokenization { .. } | CompileError::Structural { .. } => "Syntax Error",
            CompileError::Semantic { .. } => "Semantic Error",
            CompileError::Io(_) => "I/O Error",
            CompileError::Config { .. } => "Configuration Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_and_message() {
        let err = CompileError::semantic(7, "mix of sparse and dense types");
        assert_eq!(err.class(), "Semantic Error");
        assert_eq!(
            err.to_string(),
            "Semantic error at line 7: mix of sparse and dense types"
        );
    }

    #[test]
    fn test_syntax_errors_share_a_class() {
        assert_eq!(CompileError::tokenization(1, "x").class(), "Syntax Error");
        assert_eq!(CompileError::structural(1, "x").class(), "Syntax Error");
        assert_eq!(CompileError::config("bad value").class(), "Configuration Error");
    }
}
