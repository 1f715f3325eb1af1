//! Code generator for type-dispatching pybind11 bindings
//!
//! Expands an analyzed [`Binding`] into C++ source: a generic `callit` entry
//! point holding the user's body, and a registration function whose lambda
//! inspects each array argument at call time, validates the type groups, and
//! dispatches to one concretely typed instantiation of `callit` per
//! (element type, layout) combination.

use log::{debug, info};

use crate::ast::{Argument, ArgumentKind, Binding, GroupId, LayoutClass, TypeGroup};
use crate::catalog::{ArrayType, Layout};
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};

const PRIVATE_ID_PREFIX: &str = "_NPE_PY_BINDING_";
const PRIVATE_NAMESPACE: &str = "npe::detail";
const FOR_REAL_DEFINE: &str = "__NPE_FOR_REAL__";
const MAP_TYPE_PREFIX: &str = "npe_Map_";
const MATRIX_TYPE_PREFIX: &str = "npe_Matrix_";
const SCALAR_TYPE_PREFIX: &str = "npe_Scalar_";
const UNREACHABLE_MESSAGE: &str =
    "This should never happen but clearly it did. No dispatch branch matched the argument types.";

fn type_name_var(name: &str) -> String {
    format!("{}{}_type_s", PRIVATE_ID_PREFIX, name)
}

fn storage_order_var(name: &str) -> String {
    format!("{}{}_so", PRIVATE_ID_PREFIX, name)
}

fn type_id_var(name: &str) -> String {
    format!("{}{}_t_id", PRIVATE_ID_PREFIX, name)
}

/// Turn an input file name into the identifier suffix of the generated
/// registration function, e.g. `scale.npe.cpp` -> `scale_npe_cpp`
pub fn unit_identifier(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// The fixed (type, layout) a branch selects for one type group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchChoice {
    pub group: GroupId,
    pub array_type: ArrayType,
    pub layout: Layout,
}

/// One statically emitted code path, with one choice per type group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub choices: Vec<DispatchChoice>,
}

/// Branch space of a single group: each candidate type crossed with the
/// layouts it supports, in candidate order then layout order
fn group_choices(id: GroupId, group: &TypeGroup) -> Vec<DispatchChoice> {
    group
        .candidate_types
        .iter()
        .flat_map(|&array_type| {
            array_type.layouts().iter().map(move |&layout| DispatchChoice {
                group: id,
                array_type,
                layout,
            })
        })
        .collect()
}

/// Enumerate the dispatch branches of `binding`.
///
/// The result is the Cartesian product of every group's branch space, with
/// the first group varying slowest. A binding without type groups has exactly
/// one, empty, branch.
pub fn dispatch_branches(binding: &Binding) -> Vec<Branch> {
    let mut combos: Vec<Vec<DispatchChoice>> = vec![Vec::new()];

    for (id, group) in binding.groups.iter().enumerate() {
        let choices = group_choices(id, group);
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                choices.iter().map(move |&choice| {
                    let mut combo = prefix.clone();
                    combo.push(choice);
                    combo
                })
            })
            .collect();
    }

    combos
        .into_iter()
        .map(|choices| Branch { choices })
        .collect()
}

/// Code generator for a single binding
pub struct CodeGenerator {
    config: CompilerConfig,
    unit_name: String,
    out: String,
}

impl CodeGenerator {
    pub fn new(config: CompilerConfig, unit_name: &str) -> Self {
        Self {
            config,
            unit_name: unit_identifier(unit_name),
            out: String::new(),
        }
    }

    /// Generate the C++ source for an analyzed binding
    pub fn generate(&mut self, binding: &Binding) -> CompileResult<String> {
        check_analyzed(binding)?;
        self.out.clear();

        let branches = dispatch_branches(binding);

        self.write_header(binding);
        self.write_entry_point(binding);
        self.write_registration_start(binding);

        if binding.has_array_arguments() {
            for arg in binding.array_arguments() {
                self.write_detection(arg);
            }
            for (id, group) in binding.groups.iter().enumerate() {
                self.write_group_guards(binding, id, group);
            }
            self.write_dispatch(binding, &branches);
        } else {
            self.line(1, "{");
            self.line(2, call_expression(binding));
            self.line(1, "}");
        }

        self.write_registration_end(binding);

        info!(
            binding = binding.name.as_str(),
            branches = branches.len();
            "Generated binding"
        );
        Ok(std::mem::take(&mut self.out))
    }

    fn line(&mut self, depth: usize, text: impl AsRef<str>) {
        for _ in 0..depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn write_header(&mut self, binding: &Binding) {
        self.line(0, format!("#define {}", FOR_REAL_DEFINE));
        self.line(0, format!("#include <{}>", self.config.header));
        self.raw(&binding.preamble_text);
        self.line(0, "");
    }

    /// The generic function holding the user's body, templated over the
    /// map, matrix and scalar type of every array argument
    fn write_entry_point(&mut self, binding: &Binding) {
        if binding.has_array_arguments() {
            let template_params: Vec<String> = binding
                .array_arguments()
                .flat_map(|arg| {
                    [MAP_TYPE_PREFIX, MATRIX_TYPE_PREFIX, SCALAR_TYPE_PREFIX]
                        .map(|prefix| format!("typename {}{}", prefix, arg.name))
                })
                .collect();
            self.line(0, format!("template <{}>", template_params.join(", ")));
        }

        let params: Vec<String> = binding
            .arguments()
            .map(|arg| match &arg.kind {
                ArgumentKind::Array { .. } => format!("{}{} {}", MAP_TYPE_PREFIX, arg.name, arg.name),
                ArgumentKind::Scalar { type_text } => format!("{} {}", type_text, arg.name),
            })
            .collect();
        self.line(0, format!("static auto callit({}) {{", params.join(", ")));
        self.raw(&binding.body_text);
        self.line(0, "}");
        self.line(0, "");
    }

    fn write_registration_start(&mut self, binding: &Binding) {
        self.line(
            0,
            format!("void pybind_output_fun_{}(pybind11::module& m) {{", self.unit_name),
        );

        let params: Vec<String> = binding
            .arguments()
            .map(|arg| match &arg.kind {
                ArgumentKind::Array { .. } if arg.is_sparse() => format!("npe::sparse_array {}", arg.name),
                ArgumentKind::Array { .. } => format!("pybind11::array {}", arg.name),
                ArgumentKind::Scalar { type_text } => format!("{} {}", type_text, arg.name),
            })
            .collect();
        self.line(0, format!("m.def(\"{}\", []({}) {{", binding.name, params.join(", ")));
    }

    /// Detect element type, layout and (rows, cols) of one array argument
    fn write_detection(&mut self, arg: &Argument) {
        let name = arg.name.as_str();
        let ns = PRIVATE_NAMESPACE;

        self.line(1, format!("const char {} = {}.dtype().type();", type_name_var(name), name));
        self.line(1, format!("ssize_t {}_shape_0 = 0;", name));
        self.line(1, format!("ssize_t {}_shape_1 = 0;", name));
        self.line(1, format!("if ({}.ndim() == 1) {{", name));
        self.line(2, format!("{0}_shape_0 = {0}.shape()[0];", name));
        self.line(2, format!("{0}_shape_1 = {0}.shape()[0] == 0 ? 0 : 1;", name));
        self.line(1, format!("}} else if ({}.ndim() == 2) {{", name));
        self.line(2, format!("{0}_shape_0 = {0}.shape()[0];", name));
        self.line(2, format!("{0}_shape_1 = {0}.shape()[1];", name));
        self.line(1, format!("}} else if ({}.ndim() > 2) {{", name));
        self.line(
            2,
            format!(
                "throw std::invalid_argument(\"Argument {} has invalid number of dimensions. Must be 1 or 2.\");",
                name
            ),
        );
        self.line(1, "}");

        self.line(
            1,
            format!(
                "const {ns}::StorageOrder {so} = ({name}.flags() & NPY_ARRAY_F_CONTIGUOUS) ? {ns}::ColMajor : \
                 ({name}.flags() & NPY_ARRAY_C_CONTIGUOUS ? {ns}::RowMajor : {ns}::NoOrder);",
                ns = ns,
                so = storage_order_var(name),
                name = name,
            ),
        );
        self.line(
            1,
            format!(
                "const int {} = {ns}::get_type_id({ns}::is_sparse<decltype({name})>::value, {}, {});",
                type_id_var(name),
                type_name_var(name),
                storage_order_var(name),
                ns = ns,
                name = name,
            ),
        );
    }

    /// The representative must have one of the group's element types; every
    /// other member must have exactly the representative's type and layout
    fn write_group_guards(&mut self, binding: &Binding, id: GroupId, group: &TypeGroup) {
        let mut members = binding.group_members(id);
        let Some(representative) = members.next() else {
            return;
        };
        let rep = representative.name.as_str();

        let condition = group
            .candidate_types
            .iter()
            .map(|t| {
                format!(
                    "{} != {}::NumpyTypeChar::char_{}",
                    type_name_var(rep),
                    PRIVATE_NAMESPACE,
                    t.element.code()
                )
            })
            .collect::<Vec<_>>()
            .join(" && ");
        let expected = group
            .candidate_types
            .iter()
            .map(|t| t.element.pretty_name())
            .collect::<Vec<_>>()
            .join(", ");

        self.line(1, format!("if ({}) {{", condition));
        self.line(
            2,
            format!(
                "throw std::invalid_argument(std::string(\"Invalid type (\") + {}::type_to_str({}) + \
                 std::string(\") for argument '{}'. Expected one of [{}].\"));",
                PRIVATE_NAMESPACE,
                type_name_var(rep),
                rep,
                expected
            ),
        );
        self.line(1, "}");

        for member in members {
            let name = member.name.as_str();
            self.line(1, format!("if ({} != {}) {{", type_id_var(rep), type_id_var(name)));
            self.line(
                2,
                format!(
                    "std::string err_msg = std::string(\"Invalid type (\") + {ns}::type_to_str({}) + \
                     std::string(\") for argument '{}'. Expected it to match argument '{}' which is of type \") + \
                     {ns}::type_to_str({}) + std::string(\".\");",
                    type_name_var(name),
                    name,
                    rep,
                    type_name_var(rep),
                    ns = PRIVATE_NAMESPACE,
                ),
            );
            self.line(2, "throw std::invalid_argument(err_msg);");
            self.line(1, "}");
        }
    }

    fn write_dispatch(&mut self, binding: &Binding, branches: &[Branch]) {
        for (i, branch) in branches.iter().enumerate() {
            let condition = branch
                .choices
                .iter()
                .map(|choice| {
                    let rep = binding.groups[choice.group].representative().unwrap_or_default();
                    format!(
                        "{} == {}::TypeId::{}{}",
                        type_id_var(rep),
                        PRIVATE_NAMESPACE,
                        choice.array_type,
                        choice.layout.suffix()
                    )
                })
                .collect::<Vec<_>>()
                .join(" && ");

            let keyword = if i == 0 { "if" } else { "} else if" };
            self.line(1, format!("{} ({}) {{", keyword, condition));
            for choice in &branch.choices {
                for arg in binding.group_members(choice.group) {
                    self.write_typedefs(arg, choice);
                }
            }
            self.line(2, call_expression(binding));
        }

        self.line(1, "} else {");
        self.line(2, format!("throw std::invalid_argument(\"{}\");", UNREACHABLE_MESSAGE));
        self.line(1, "}");
        debug!("Emitted {} dispatch branches", branches.len());
    }

    fn write_typedefs(&mut self, arg: &Argument, choice: &DispatchChoice) {
        let name = arg.name.as_str();
        let cpp_type = choice.array_type.element.cpp_type();
        let order = format!(
            "{}::StorageOrder::{}",
            PRIVATE_NAMESPACE,
            choice.layout.storage_order()
        );

        self.line(2, format!("typedef {} Scalar_{};", cpp_type, name));
        if choice.array_type.is_sparse() {
            self.line(
                2,
                format!("typedef Eigen::SparseMatrix<{}, {}, int> Matrix_{};", cpp_type, order, name),
            );
            self.raw("#if EIGEN_WORLD_VERSION == 3 && EIGEN_MAJOR_VERSION <= 2\n");
            self.line(
                2,
                format!(
                    "typedef Eigen::MappedSparseMatrix<{}, {}, int> Map_{};",
                    cpp_type, order, name
                ),
            );
            self.raw("#elif (EIGEN_WORLD_VERSION == 3 && EIGEN_MAJOR_VERSION > 2) || (EIGEN_WORLD_VERSION > 3)\n");
            self.line(2, format!("typedef Eigen::Map<Matrix_{0}> Map_{0};", name));
            self.raw("#endif\n");
        } else {
            self.line(
                2,
                format!(
                    "typedef Eigen::Matrix<{}, Eigen::Dynamic, Eigen::Dynamic, {}> Matrix_{};",
                    cpp_type, order, name
                ),
            );
            self.line(
                2,
                format!(
                    "typedef Eigen::Map<Matrix_{0}, {1}::Alignment::{2}> Map_{0};",
                    name,
                    PRIVATE_NAMESPACE,
                    choice.layout.alignment()
                ),
            );
        }
    }

    fn write_registration_end(&mut self, binding: &Binding) {
        let mut tail = String::from("}");
        if let Some(doc) = &binding.doc_text {
            tail.push_str(", ");
            tail.push_str(doc);
        }
        for arg in binding.arguments() {
            tail.push_str(&format!(", pybind11::arg(\"{}\")", arg.name));
            if let Some(default) = &arg.default_value {
                tail.push_str(&format!("={}", default));
            }
        }
        tail.push_str(");");

        self.line(0, tail);
        self.line(0, "}");
    }
}

/// `return callit<...>(...);` for the typedefs in scope of a branch
fn call_expression(binding: &Binding) -> String {
    let template = if binding.has_array_arguments() {
        let params: Vec<String> = binding
            .array_arguments()
            .map(|arg| format!("Map_{0}, Matrix_{0}, Scalar_{0}", arg.name))
            .collect();
        format!("<{}>", params.join(", "))
    } else {
        String::new()
    };

    let args: Vec<String> = binding
        .arguments()
        .map(|arg| match arg.kind {
            ArgumentKind::Array { .. } if arg.is_sparse() => {
                format!("{0}.as_eigen<Matrix_{0}>()", arg.name)
            }
            ArgumentKind::Array { .. } => format!(
                "Map_{0}((Scalar_{0}*) {0}.data(), {0}_shape_0, {0}_shape_1)",
                arg.name
            ),
            ArgumentKind::Scalar { .. } => arg.name.clone(),
        })
        .collect();

    format!("return callit{}({});", template, args.join(", "))
}

fn check_analyzed(binding: &Binding) -> CompileResult<()> {
    for arg in binding.array_arguments() {
        let resolved = arg.layout_class != LayoutClass::Unresolved
            && arg
                .group()
                .and_then(|id| binding.groups.get(id))
                .is_some_and(|group| !group.candidate_types.is_empty());
        if !resolved {
            return Err(CompileError::semantic(
                arg.line,
                format!(
                    "argument `{}` of binding `{}` has no resolved array type",
                    arg.name, binding.name
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn analyzed(args: &str) -> Binding {
        let source = format!(
            "npe_function(f)\n{}npe_begin_code()\n    return 0;\nnpe_end_code()\n",
            args
        );
        let binding = Parser::new(&source, &CompilerConfig::default())
            .parse_binding()
            .unwrap();
        Analyzer::new().analyze(binding).unwrap()
    }

    fn generate(binding: &Binding) -> String {
        CodeGenerator::new(CompilerConfig::default(), "f.npe")
            .generate(binding)
            .unwrap()
    }

    fn branch_lines(output: &str) -> Vec<&str> {
        output
            .lines()
            .filter(|l| l.contains("_t_id == npe::detail::TypeId::"))
            .collect()
    }

    /// Bodies of the dispatch branches, fallback excluded
    fn branch_blocks(output: &str) -> Vec<&str> {
        let start = output.find("_t_id == npe::detail::TypeId::").unwrap();
        let dispatch = output[start..].split("} else {").next().unwrap();
        dispatch.split("} else if").collect()
    }

    #[test]
    fn test_shared_group_branches() {
        let binding = analyzed("npe_arg(a, dense_f32, dense_f64)\nnpe_arg(b, npe_matches(a))\n");
        let branches = dispatch_branches(&binding);
        assert_eq!(branches.len(), 6);

        let output = generate(&binding);
        assert_eq!(branch_lines(&output).len(), 6);

        // Every branch binds a and b to the same scalar type
        let blocks = branch_blocks(&output);
        assert_eq!(blocks.len(), 6);
        for block in blocks {
            let a = block.lines().find(|l| l.contains("Scalar_a;")).unwrap().trim();
            let b = block.lines().find(|l| l.contains("Scalar_b;")).unwrap().trim();
            assert_eq!(a.replace("Scalar_a", ""), b.replace("Scalar_b", ""));
        }
    }

    #[test]
    fn test_branch_order() {
        let binding = analyzed("npe_arg(a, dense_f32, dense_f64)\n");
        let order: Vec<String> = dispatch_branches(&binding)
            .iter()
            .map(|b| format!("{}{}", b.choices[0].array_type, b.choices[0].layout.suffix()))
            .collect();
        assert_eq!(
            order,
            vec![
                "dense_f32_cm",
                "dense_f32_rm",
                "dense_f32_x",
                "dense_f64_cm",
                "dense_f64_rm",
                "dense_f64_x"
            ]
        );
    }

    #[test]
    fn test_sparse_branches_skip_unordered_layout() {
        let binding = analyzed("npe_arg(s, sparse_f32, sparse_f64)\n");
        assert_eq!(dispatch_branches(&binding).len(), 4);

        let output = generate(&binding);
        assert!(!output.contains("sparse_f32_x"));
        assert!(output.contains("npe::sparse_array s"));
        assert!(output.contains("s.as_eigen<Matrix_s>()"));
        assert!(output.contains("Eigen::SparseMatrix<float, npe::detail::StorageOrder::RowMajor, int> Matrix_s;"));
    }

    #[test]
    fn test_independent_groups_multiply() {
        let binding = analyzed(
            "npe_arg(a, dense_f32, dense_f64)\nnpe_arg(s, sparse_i32)\nnpe_arg(n, int)\n",
        );
        let branches = dispatch_branches(&binding);
        assert_eq!(branches.len(), 6 * 2);
        // First group varies slowest
        assert_eq!(branches[0].choices[0].layout, Layout::ColMajor);
        assert_eq!(branches[1].choices[0].layout, Layout::ColMajor);
        assert_eq!(branches[1].choices[1].layout, Layout::RowMajor);
        assert_eq!(branch_lines(&generate(&binding)).len(), 12);
    }

    #[test]
    fn test_scalar_only_binding_has_one_branch() {
        let binding = analyzed("npe_arg(n, int)\n");
        assert_eq!(dispatch_branches(&binding), vec![Branch { choices: vec![] }]);

        let output = generate(&binding);
        assert!(output.contains("static auto callit(int n) {"));
        assert!(output.contains("return callit(n);"));
        assert!(!output.contains("template <"));
        assert!(!output.contains("_t_id"));
    }

    #[test]
    fn test_signature_order_follows_declaration() {
        let binding = analyzed(
            "npe_arg(n, int)\nnpe_arg(b, npe_matches(a))\nnpe_arg(a, dense_f64)\nnpe_default_arg(tol, double, 1e-6)\n",
        );
        let output = generate(&binding);

        assert!(output.contains("static auto callit(int n, npe_Map_b b, npe_Map_a a, double tol) {"));
        assert!(output.contains(
            "template <typename npe_Map_b, typename npe_Matrix_b, typename npe_Scalar_b, \
             typename npe_Map_a, typename npe_Matrix_a, typename npe_Scalar_a>"
        ));
        assert!(output.contains("m.def(\"f\", [](int n, pybind11::array b, pybind11::array a, double tol) {"));
        assert!(output.contains(
            "}, pybind11::arg(\"n\"), pybind11::arg(\"b\"), pybind11::arg(\"a\"), pybind11::arg(\"tol\")=1e-6);"
        ));
        // b was declared first, so it is the group's representative
        assert!(output.contains("if (_NPE_PY_BINDING_b_t_id != _NPE_PY_BINDING_a_t_id) {"));
        assert!(output.contains("if (_NPE_PY_BINDING_b_t_id == npe::detail::TypeId::dense_f64_cm) {"));
    }

    #[test]
    fn test_type_detection_and_guard() {
        let binding = analyzed("npe_arg(a, dense_f32, dense_i64)\n");
        let output = generate(&binding);

        assert!(output.contains("const char _NPE_PY_BINDING_a_type_s = a.dtype().type();"));
        assert!(output.contains("a_shape_1 = a.shape()[0] == 0 ? 0 : 1;"));
        assert!(output.contains("throw std::invalid_argument(\"Argument a has invalid number of dimensions. Must be 1 or 2.\");"));
        assert!(output.contains(
            "if (_NPE_PY_BINDING_a_type_s != npe::detail::NumpyTypeChar::char_f32 && \
             _NPE_PY_BINDING_a_type_s != npe::detail::NumpyTypeChar::char_i64) {"
        ));
        assert!(output.contains("Expected one of [float32, int64]."));
        assert!(output.contains("typedef Eigen::Map<Matrix_a, npe::detail::Alignment::Unaligned> Map_a;"));
        assert!(output.contains(UNREACHABLE_MESSAGE));
    }

    #[test]
    fn test_unit_identifier() {
        assert_eq!(unit_identifier("scale.npe.cpp"), "scale_npe_cpp");
        assert_eq!(unit_identifier("my-binding.cpp"), "my_binding_cpp");
    }

    #[test]
    fn test_rejects_unanalyzed_binding() {
        let source = "npe_function(f)\nnpe_arg(a, dense_f32)\nnpe_begin_code()\nnpe_end_code()\n";
        let binding = Parser::new(source, &CompilerConfig::default())
            .parse_binding()
            .unwrap();
        let result = CodeGenerator::new(CompilerConfig::default(), "f").generate(&binding);
        assert!(matches!(result, Err(CompileError::Semantic { line: 2, .. })));
    }
}
