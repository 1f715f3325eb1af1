//! NumpyEigen binding compiler
//!
//! Compiles a binding description (a C++ source file annotated with
//! `npe_function`, `npe_arg`, `npe_default_arg`, `npe_doc`,
//! `npe_begin_code` and `npe_end_code` statements) into C++ that registers
//! a pybind11 function. The generated function inspects its NumPy and SciPy
//! array arguments at call time and dispatches to an Eigen instantiation of
//! the body specialized for their element type and memory layout.
//!
//! # Example
//!
//! ```rust
//! use npe_codegen::{compile, CompilerConfig};
//!
//! let source = "\
//! npe_function(scale)
//! npe_arg(a, dense_f32, dense_f64)
//! npe_arg(s, double)
//! npe_begin_code()
//!     return npe::move(a * s);
//! npe_end_code()
//! ";
//! let output = compile(source, "scale.cpp", &CompilerConfig::default()).unwrap();
//! assert!(output.contains("void pybind_output_fun_scale_cpp(pybind11::module& m)"));
//! ```

pub mod analyzer;
pub mod ast;
pub mod catalog;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;

pub use analyzer::Analyzer;
pub use ast::*;
pub use catalog::{ArrayType, ElementKind, Layout, Storage};
pub use codegen::{dispatch_branches, Branch, CodeGenerator, DispatchChoice};
pub use config::CompilerConfig;
pub use error::{CompileError, CompileResult};
pub use parser::Parser;

/// Parse and analyze a binding description without generating code
pub fn analyze_source(source: &str, config: &CompilerConfig) -> CompileResult<Binding> {
    let mut parser = Parser::new(source, config);
    let binding = parser.parse_binding()?;

    let analyzer = Analyzer::new();
    analyzer.analyze(binding)
}

/// Main compilation function: binding description in, C++ source out.
///
/// `unit_name` is the input file name; it becomes the suffix of the
/// generated `pybind_output_fun_*` registration function.
pub fn compile(source: &str, unit_name: &str, config: &CompilerConfig) -> CompileResult<String> {
    config.validate()?;
    let binding = analyze_source(source, config)?;

    let mut codegen = CodeGenerator::new(config.clone(), unit_name);
    codegen.generate(&binding)
}
