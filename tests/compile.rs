use npe_codegen::{
    analyze_source, compile, dispatch_branches, ArgumentKind, CompileError, CompilerConfig,
    LayoutClass,
};
use pretty_assertions::assert_eq;

fn binding_file(args: &str) -> String {
    format!(
        "#include <Eigen/Core>\nnpe_function(f)\n{}npe_begin_code()\n    return a;\nnpe_end_code()\n",
        args
    )
}

#[test]
fn matched_group_dispatches_six_ways() {
    let source = binding_file("npe_arg(a, dense_f32, dense_f64)\nnpe_arg(b, npe_matches(a))\n");
    let config = CompilerConfig::default();

    let binding = analyze_source(&source, &config).unwrap();
    assert_eq!(binding.groups.len(), 1);
    assert_eq!(binding.groups[0].members, vec!["a", "b"]);
    assert_eq!(dispatch_branches(&binding).len(), 6);

    let output = compile(&source, "f.cpp", &config).unwrap();
    let conditions: Vec<&str> = output
        .lines()
        .filter(|l| l.contains("_t_id == npe::detail::TypeId::"))
        .collect();
    assert_eq!(conditions.len(), 6);
    for layout in ["_cm", "_rm", "_x"] {
        for ty in ["dense_f32", "dense_f64"] {
            let needle = format!("TypeId::{}{})", ty, layout);
            assert_eq!(conditions.iter().filter(|l| l.contains(&needle)).count(), 1);
        }
    }
}

#[test]
fn mixed_storage_is_rejected_at_its_line() {
    let source = binding_file("npe_arg(n, int)\nnpe_arg(x, dense_f32, sparse_f64)\n");
    let err = compile(&source, "f.cpp", &CompilerConfig::default()).unwrap_err();

    assert!(matches!(err, CompileError::Semantic { line: 4, .. }));
    assert!(err.to_string().contains("mix of sparse and dense"));
}

#[test]
fn undeclared_match_is_unmatched() {
    let source = binding_file("npe_arg(a, dense_f32)\nnpe_arg(y, npe_matches(z))\n");
    let err = compile(&source, "f.cpp", &CompilerConfig::default()).unwrap_err();

    assert!(matches!(err, CompileError::Semantic { line: 4, .. }));
    assert!(err.to_string().contains("unmatched"));
}

#[test]
fn scalar_arguments_pass_through() {
    let source = binding_file(
        "npe_arg(a, dense_f32, dense_f64)\nnpe_arg(n, int)\nnpe_default_arg(tol, double, 1e-6)\n",
    );
    let config = CompilerConfig::default();

    let binding = analyze_source(&source, &config).unwrap();
    let n = binding.argument("n").unwrap();
    assert_eq!(n.kind, ArgumentKind::Scalar { type_text: "int".to_string() });
    assert_eq!(n.layout_class, LayoutClass::Unresolved);
    let tol = binding.argument("tol").unwrap();
    assert_eq!(tol.default_value.as_deref(), Some("1e-6"));
    // Scalars contribute no dispatch branches
    assert_eq!(dispatch_branches(&binding).len(), 6);

    let output = compile(&source, "f.cpp", &config).unwrap();
    assert!(output.contains("static auto callit(npe_Map_a a, int n, double tol) {"));
    assert!(output.contains("pybind11::arg(\"n\"), pybind11::arg(\"tol\")=1e-6);"));
}

#[test]
fn too_many_statement_arguments() {
    let types: Vec<&str> = std::iter::repeat("dense_f32").take(69).collect();
    let source = binding_file(&format!("npe_arg(a, {})\n", types.join(", ")));
    let err = compile(&source, "f.cpp", &CompilerConfig::default()).unwrap_err();

    assert!(matches!(err, CompileError::Tokenization { line: 3, .. }));
}

#[test]
fn branch_count_law() {
    // (3 * 2) * (3 * 3 - 2) * (3 * 1 - 1)
    let source = binding_file(
        "npe_arg(a, dense_f32, dense_f64)\n\
         npe_arg(b, dense_i8, dense_u8, dense_c64)\n\
         npe_arg(c, npe_matches(b))\n\
         npe_arg(s, sparse_f64)\n",
    );
    let binding = analyze_source(&source, &CompilerConfig::default()).unwrap();
    assert_eq!(dispatch_branches(&binding).len(), 6 * 9 * 2);

    let source = binding_file("npe_arg(s, sparse_f32, sparse_f64)\nnpe_arg(t, npe_matches(s))\n");
    let binding = analyze_source(&source, &CompilerConfig::default()).unwrap();
    assert_eq!(dispatch_branches(&binding).len(), 4);
}

#[test]
fn output_is_deterministic() {
    let source = binding_file(
        "npe_arg(b, npe_matches(a))\nnpe_arg(a, dense_f32, dense_i32)\nnpe_arg(s, sparse_f64)\nnpe_doc(\"docs\")\n",
    );
    let config = CompilerConfig::default();

    let first = compile(&source, "f.cpp", &config).unwrap();
    for _ in 0..5 {
        assert_eq!(compile(&source, "f.cpp", &config).unwrap(), first);
    }
}

#[test]
fn custom_header_and_bound() {
    let config = CompilerConfig::from_toml("header = \"npe_runtime.h\"\nmax_statement_args = 2\n").unwrap();

    let source = binding_file("npe_arg(a, dense_f32)\n");
    let output = compile(&source, "f.cpp", &config).unwrap();
    assert!(output.starts_with("#define __NPE_FOR_REAL__\n#include <npe_runtime.h>\n#include <Eigen/Core>\n"));

    let source = binding_file("npe_arg(a, dense_f32, dense_f64)\n");
    assert!(matches!(
        compile(&source, "f.cpp", &config),
        Err(CompileError::Tokenization { line: 3, .. })
    ));
}

#[test]
fn scalar_only_golden() {
    let source = "\
#include <cmath>
npe_function(clamp_scalar)
npe_arg(x, double)
npe_default_arg(hi, double, 1.0)
npe_doc(\"Clamp x\")
npe_begin_code()
    return std::min(x, hi);
npe_end_code()
";
    let expected = "\
#define __NPE_FOR_REAL__
#include <npe.h>
#include <cmath>

static auto callit(double x, double hi) {
    return std::min(x, hi);
}

void pybind_output_fun_clamp_cpp(pybind11::module& m) {
m.def(\"clamp_scalar\", [](double x, double hi) {
    {
        return callit(x, hi);
    }
}, \"Clamp x\", pybind11::arg(\"x\"), pybind11::arg(\"hi\")=1.0);
}
";
    let output = compile(source, "clamp.cpp", &CompilerConfig::default()).unwrap();
    assert_eq!(output, expected);
}

#[test]
fn mixed_dispatch_golden() {
    let source = "\
#include <Eigen/Core>
npe_function(blend)
npe_arg(w, npe_matches(v))
npe_arg(v, dense_f64)
npe_arg(s, sparse_f32)
npe_arg(n, int)
npe_default_arg(alpha, double, 0.5)
npe_doc(\"Blend w and v\")
npe_begin_code()
    return n;
npe_end_code()
";
    let expected = include_str!("golden/mixed_dispatch.cpp");
    let output = compile(source, "blend.cpp", &CompilerConfig::default()).unwrap();
    assert_eq!(output, expected);
}
