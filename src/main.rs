use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use shale::compiler::{self, types::Type};
use shale::config::TestManifest;
use shale::interp::{self, CallOptions, TypedValue};

#[derive(Parser)]
#[command(name = "shale")]
#[command(about = "A statically-typed shading language interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Type check a source file and run an entry point
    Run {
        /// The source file to run
        file: PathBuf,

        /// Entry function to call
        #[arg(long, default_value = "main")]
        entry: String,

        /// int32 arguments for the entry point
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<i32>,

        /// Trace inliner instantiations
        #[arg(long)]
        trace_inline: bool,
    },
    /// Type check a source file without running it
    Check {
        /// The source file to check
        file: PathBuf,

        /// Emit the diagnostic as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the cases declared in a TOML test manifest
    Test {
        /// The manifest file
        manifest: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            entry,
            args,
            trace_inline,
        } => {
            if let Err(e) = run_entry(&file, &entry, &args, trace_inline) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Check { file, json } => {
            let source = match std::fs::read_to_string(&file) {
                Ok(source) => source,
                Err(e) => {
                    eprintln!("failed to read {}: {}", file.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            match compiler::check(&source) {
                Ok(_) => {
                    if json {
                        println!("{}", serde_json::json!({ "ok": true }));
                    } else {
                        println!("Type check passed.");
                    }
                }
                Err(e) => {
                    if json {
                        let span = e.span();
                        println!(
                            "{}",
                            serde_json::json!({
                                "ok": false,
                                "kind": e.kind(),
                                "message": e.message(),
                                "line": span.line,
                                "column": span.column,
                            })
                        );
                    } else {
                        eprintln!("{}", compiler::format_error(&file.display().to_string(), &e));
                    }
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Test { manifest } => {
            let parsed = match TestManifest::load(&manifest) {
                Ok(parsed) => parsed,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let dir = manifest.parent().unwrap_or(Path::new(".")).to_path_buf();
            let outcomes = shale::config::run_manifest(&dir, &parsed);

            let mut passed = 0;
            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(()) => {
                        passed += 1;
                        println!("\u{2713} {} passed", outcome.name);
                    }
                    Err(e) => {
                        failed += 1;
                        println!("\u{2717} {} failed: {}", outcome.name, e);
                    }
                }
            }
            println!();
            println!("{} passed, {} failed", passed, failed);
            if failed > 0 {
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn run_entry(file: &Path, entry: &str, args: &[i32], trace_inline: bool) -> Result<(), String> {
    let source = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {}", file.display(), e))?;
    let program = compiler::check(&source)
        .map_err(|e| compiler::format_error(&file.display().to_string(), &e))?;

    let args: Vec<TypedValue> = args.iter().map(|&v| TypedValue::int32(v)).collect();
    let type_args: Vec<Type> = Vec::new();
    let options = CallOptions { trace_inline };
    let result = interp::call_function_with(&program, entry, &type_args, args, options)
        .map_err(|e| e.to_string())?;

    if !result.is_void() {
        println!("{}", result);
    }
    Ok(())
}
