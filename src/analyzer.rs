//! Semantic analysis of a parsed binding
//!
//! Runs after the whole file has been parsed, once every `npe_matches`
//! reference has had the chance to resolve. Checks that each type group is
//! homogeneous in sparse-vs-dense and non-empty, then fixes the layout class
//! of every argument.

use log::debug;

use crate::ast::{ArgumentKind, Binding, LayoutClass};
use crate::error::{CompileError, CompileResult};
use crate::parser::MATCHES_TOKEN;

/// Validator for type-group constraints
pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    /// Validate `binding` and set the layout class of its arguments.
    ///
    /// Arguments are checked in declaration order and the first violation is
    /// returned.
    pub fn analyze(&self, mut binding: Binding) -> CompileResult<Binding> {
        check_generated_names(&binding)?;

        let Binding {
            arguments, groups, ..
        } = &mut binding;

        for arg in arguments.values_mut() {
            let group = match arg.kind {
                ArgumentKind::Scalar { .. } => {
                    arg.layout_class = LayoutClass::Unresolved;
                    continue;
                }
                ArgumentKind::Array { group } => &groups[group],
            };

            match &arg.matches {
                None => {
                    let mut storages = group.candidate_types.iter().map(|t| t.storage);
                    let first = storages.next();
                    if storages.any(|storage| Some(storage) != first) {
                        return Err(CompileError::semantic(
                            arg.line,
                            format!(
                                "input variable `{}` (line {}) has a mix of sparse and dense types",
                                arg.name, arg.line
                            ),
                        ));
                    }
                }
                Some(other) if group.candidate_types.is_empty() => {
                    return Err(CompileError::semantic(
                        arg.line,
                        format!(
                            "input variable `{}` (line {}) was declared with type {}({}) \
                             but was unmatched with an array type",
                            arg.name, arg.line, MATCHES_TOKEN, other
                        ),
                    ));
                }
                Some(_) => {}
            }

            arg.layout_class = group
                .candidate_types
                .first()
                .map(|t| LayoutClass::from(t.storage))
                .unwrap_or(LayoutClass::Unresolved);
        }

        for (id, group) in binding.groups.iter().enumerate() {
            debug!(
                "Type group {}: {:?} -> [{}]",
                id,
                group.members,
                group
                    .candidate_types
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(binding)
    }
}

/// Local names the generated registration code declares for each array
/// argument `a`; no argument may reuse one of them
fn generated_names(array: &str) -> [String; 8] {
    [
        format!("{}_shape_0", array),
        format!("{}_shape_1", array),
        format!("Map_{}", array),
        format!("Matrix_{}", array),
        format!("Scalar_{}", array),
        format!("npe_Map_{}", array),
        format!("npe_Matrix_{}", array),
        format!("npe_Scalar_{}", array),
    ]
}

fn check_generated_names(binding: &Binding) -> CompileResult<()> {
    for array in binding.array_arguments() {
        for name in generated_names(&array.name) {
            if let Some(clash) = binding.argument(&name) {
                return Err(CompileError::semantic(
                    clash.line,
                    format!(
                        "argument `{}` clashes with a name generated for array argument `{}` (line {})",
                        clash.name, array.name, array.line
                    ),
                ));
            }
        }
    }
    Ok(())
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}
