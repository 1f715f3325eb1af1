//! Example: Scaled sum of two matching arrays
//!
//! Compiles a binding whose two array arguments must share an element type
//! and layout, prints the dispatch plan and the generated C++.
//!
//! Run with: cargo run --example scaled_sum

use npe_codegen::{analyze_source, dispatch_branches, CodeGenerator, CompilerConfig};

const SOURCE: &str = r#"#include <Eigen/Core>

npe_function(scaled_sum)
npe_arg(a, dense_f32, dense_f64)
npe_arg(b, npe_matches(a))
npe_default_arg(k, double, 1.0)
npe_doc("Return k * (a + b)")
npe_begin_code()
    return npe::move(k * (a + b));
npe_end_code()
"#;

fn main() {
    println!("=== Scaled Sum Binding Example ===\n");

    let config = CompilerConfig::default();
    let binding = analyze_source(SOURCE, &config).unwrap();

    println!("Binding: {}", binding.name);
    for arg in binding.arguments() {
        println!("  {:<4} {:?}", arg.name, arg.kind);
    }
    println!();

    let branches = dispatch_branches(&binding);
    println!("Dispatch plan ({} branches):", branches.len());
    for (i, branch) in branches.iter().enumerate() {
        let choices: Vec<String> = branch
            .choices
            .iter()
            .map(|c| format!("group {} -> {}{}", c.group, c.array_type, c.layout.suffix()))
            .collect();
        println!("  {}: {}", i, choices.join(", "));
    }
    println!();

    let mut codegen = CodeGenerator::new(config, "scaled_sum.cpp");
    let output = codegen.generate(&binding).unwrap();
    println!("Generated C++:\n");
    println!("{}", output);
}
