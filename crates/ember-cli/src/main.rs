//! Command-line driver: REPL when run with no arguments, file runner
//! when given a script path.
//!
//! Grounded on `atlas-cli/src/main.rs`'s `clap`/`rustyline`/`colored`
//! shape, trimmed to the subset a single-file script runner needs — no
//! subcommands, no project/workspace discovery.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use ember_runtime::{run, run_in, CompileError, InterpretOutcome, Options, RuntimeFailure, Vm};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Ember language interpreter.
#[derive(Parser, Debug)]
#[command(name = "ember", version, about)]
struct Args {
    /// Script to run. Omit to start an interactive REPL.
    path: Option<PathBuf>,

    /// Print each instruction and the value stack as it executes.
    #[arg(long)]
    trace: bool,

    /// Collect garbage before every allocation instead of only at the
    /// usual threshold — exercises GC paths small scripts rarely hit.
    #[arg(long)]
    stress_gc: bool,

    /// Print each function's disassembly right after it compiles.
    #[arg(long)]
    disassemble: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let options = Options::new()
        .with_trace_execution(args.trace)
        .with_stress_gc(args.stress_gc)
        .with_disassemble_on_compile(args.disassemble);

    match args.path {
        Some(path) => run_file(&path, options),
        None => run_repl(options),
    }
}

fn run_file(path: &PathBuf, options: Options) -> ExitCode {
    let source = match fs::read_to_string(path).with_context(|| format!("couldn't read {}", path.display())) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}: {err:#}", "ember".red().bold());
            return ExitCode::from(74);
        }
    };

    match run(&source, options) {
        InterpretOutcome::Ok => ExitCode::SUCCESS,
        outcome => {
            report_outcome(&outcome);
            ExitCode::from(outcome.exit_code() as u8)
        }
    }
}

fn run_repl(options: Options) -> ExitCode {
    println!("ember {} — type code, Ctrl-D to exit", env!("CARGO_PKG_VERSION"));
    let mut vm = Vm::new(options);
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("{}: {err}", "ember".red().bold());
            return ExitCode::from(74);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                let outcome = run_in(&line, &mut vm);
                report_outcome(&outcome);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{}: {err}", "ember".red().bold());
                break;
            }
        }
    }
    ExitCode::SUCCESS
}

fn report_outcome(outcome: &InterpretOutcome) {
    match outcome {
        InterpretOutcome::Ok => {}
        InterpretOutcome::CompileError(errors) => {
            for error in errors {
                report_compile_error(error);
            }
        }
        InterpretOutcome::RuntimeError(error) => report_runtime_error(error),
    }
}

fn report_compile_error(error: &CompileError) {
    eprintln!("{}", error.to_string().red());
}

fn report_runtime_error(failure: &RuntimeFailure) {
    eprintln!("{}", failure.error.to_string().red());
    for frame in &failure.trace {
        let location = if frame.function_name == "script" {
            "script".to_string()
        } else {
            format!("{}()", frame.function_name)
        };
        eprintln!("{}", format!("[line {}] in {location}", frame.line).dimmed());
    }
}
