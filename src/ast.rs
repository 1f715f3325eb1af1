//! Binding model produced by the parser
//!
//! One [`Binding`] describes a single bound function: its ordered arguments,
//! the type groups constraining its array arguments, and the verbatim
//! preamble and body text.

use indexmap::IndexMap;
use serde::Serialize;

use crate::catalog::{ArrayType, Storage};

/// Index of a [`TypeGroup`] in its binding's group arena
pub type GroupId = usize;

/// How an argument is passed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ArgumentKind {
    /// Plain value of a literal target-language type, e.g. `int` or `double`
    Scalar { type_text: String },
    /// Dense or sparse array dispatched on at call time
    Array { group: GroupId },
}

/// Storage class of an argument, fixed by semantic analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayoutClass {
    Dense,
    Sparse,
    Unresolved,
}

impl From<Storage> for LayoutClass {
    fn from(storage: Storage) -> Self {
        match storage {
            Storage::Dense => LayoutClass::Dense,
            Storage::Sparse => LayoutClass::Sparse,
        }
    }
}

/// A single argument of a binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Argument {
    pub name: String,
    pub kind: ArgumentKind,
    /// Name of the argument this one was declared to match, if any
    pub matches: Option<String>,
    /// Default value expression, copied through unevaluated
    pub default_value: Option<String>,
    pub layout_class: LayoutClass,
    /// Line of the declaring statement
    pub line: usize,
}

impl Argument {
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ArgumentKind::Array { .. })
    }

    pub fn is_sparse(&self) -> bool {
        self.layout_class == LayoutClass::Sparse
    }

    pub fn group(&self) -> Option<GroupId> {
        match self.kind {
            ArgumentKind::Array { group } => Some(group),
            ArgumentKind::Scalar { .. } => None,
        }
    }
}

/// Arguments that must share one element type and one layout at call time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TypeGroup {
    /// Declared member names, in declaration order
    pub members: Vec<String>,
    /// Allowed element types; empty until a member declares them
    pub candidate_types: Vec<ArrayType>,
}

impl TypeGroup {
    /// The member whose runtime type the rest of the group is checked against
    pub fn representative(&self) -> Option<&str> {
        self.members.first().map(String::as_str)
    }
}

/// One compiled function description
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Binding {
    pub name: String,
    pub preamble_text: String,
    /// Arguments keyed by name, in declaration order
    pub arguments: IndexMap<String, Argument>,
    pub groups: Vec<TypeGroup>,
    pub body_text: String,
    /// Raw documentation token (a target-language string expression)
    pub doc_text: Option<String>,
    /// Line of the `npe_function` statement
    pub line: usize,
}

impl Binding {
    /// Iterate over the arguments in the order they were declared
    pub fn arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.values()
    }

    pub fn array_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments().filter(|arg| arg.is_array())
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.get(name)
    }

    pub fn has_array_arguments(&self) -> bool {
        self.array_arguments().next().is_some()
    }

    pub fn num_args(&self) -> usize {
        self.arguments.len()
    }

    /// Array arguments belonging to `group`, in declaration order
    pub fn group_members(&self, group: GroupId) -> impl Iterator<Item = &Argument> {
        self.array_arguments()
            .filter(move |arg| arg.group() == Some(group))
    }
}
