//! NumpyEigen binding compiler CLI
//!
//! Usage:
//!   npe-codegen scale.cpp -o scale.out.cpp
//!   npe-codegen scale.cpp -c npe.toml --max-args 128
//!   npe-codegen scale.cpp --emit-model

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use clap::Parser as ClapParser;
use colored::Colorize;
use log::{debug, info, LevelFilter};
use tempfile::NamedTempFile;

use npe_codegen::{analyze_source, CodeGenerator, CompileResult, CompilerConfig};

#[derive(ClapParser, Debug)]
#[command(name = "npe-codegen")]
#[command(author = "NumpyEigen Team")]
#[command(version = "0.1.0")]
#[command(about = "Compiles NumpyEigen binding descriptions to pybind11 C++")]
struct Args {
    /// Binding description to compile
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Where to write the generated C++
    #[arg(short = 'o', long = "output", default_value = "a.out")]
    output: PathBuf,

    /// TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Maximum number of arguments in a single statement
    #[arg(long = "max-args")]
    max_args: Option<usize>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,

    /// Print the analyzed binding as JSON on stdout
    #[arg(long = "emit-model")]
    emit_model: bool,
}

fn main() {
    let args = Args::parse();

    let log_level = LevelFilter::from_str(&args.log_level).unwrap_or_else(|_| {
        eprintln!("Invalid log level: {}. Using 'warn' instead.", args.log_level);
        LevelFilter::Warn
    });
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(log_level)
        .init();

    debug!(args:?; "Parsed arguments");

    if let Err(err) = run(&args) {
        eprintln!(
            "{}: {}: {}",
            err.class().red().bold(),
            args.input.display(),
            err
        );
        process::exit(1);
    }
}

fn run(args: &Args) -> CompileResult<()> {
    let mut config = match &args.config {
        Some(path) => CompilerConfig::load(path)?,
        None => CompilerConfig::default(),
    };
    if let Some(max_args) = args.max_args {
        config.max_statement_args = max_args;
    }
    config.validate()?;

    let source = fs::read_to_string(&args.input)?;
    let unit_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "binding".to_string());

    let binding = analyze_source(&source, &config)?;
    info!(
        binding = binding.name.as_str(),
        arguments = binding.num_args(),
        groups = binding.groups.len();
        "Binding analyzed"
    );

    if args.emit_model {
        let json = serde_json::to_string_pretty(&binding).map_err(std::io::Error::from)?;
        println!("{}", json);
    }

    let mut codegen = CodeGenerator::new(config, &unit_name);
    let output = codegen.generate(&binding)?;

    write_atomically(&args.output, &output)?;
    info!(path = args.output.display().to_string(); "Wrote generated source");
    Ok(())
}

/// Write through a temporary file in the destination directory so that a
/// failed run never leaves a partial output behind
fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(contents.as_bytes())?;
    temp_file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
