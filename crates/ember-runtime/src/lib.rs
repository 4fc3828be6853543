//! Ember: a small dynamically-typed, class-based scripting language.
//!
//! This crate is the whole language implementation — lexer, single-pass
//! bytecode compiler, mark-sweep heap, and stack VM — factored out of
//! `ember-cli` so a host can embed an interpreter without a terminal
//! attached (spec.md §9's "explicit aggregates, not globals" redesign
//! flag, mirrored from `atlas-runtime`'s own lib/bin split).

pub mod chunk;
pub mod compiler;
pub mod disasm;
pub mod error;
pub mod heap;
pub mod lexer;
pub mod native;
pub mod options;
pub mod table;
pub mod token;
pub mod value;
pub mod vm;

pub use compiler::Compiler;
pub use error::{CompileError, RuntimeError, RuntimeFailure, TraceFrame};
pub use heap::Heap;
pub use options::Options;
pub use value::Value;
pub use vm::Vm;

/// Outcome of running one source string to completion, distinguishing
/// the two failure stages a host needs to report differently
/// (spec.md §7's exit-code contract: 0 success, 65 compile error, 70
/// runtime error).
pub enum InterpretOutcome {
    Ok,
    CompileError(Vec<CompileError>),
    RuntimeError(RuntimeFailure),
}

impl InterpretOutcome {
    /// Process exit code for this outcome, matching `original_source/clox`'s
    /// own `main.c` (`EX_DATAERR` 65, `EX_SOFTWARE` 70).
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretOutcome::Ok => 0,
            InterpretOutcome::CompileError(_) => 65,
            InterpretOutcome::RuntimeError(_) => 70,
        }
    }
}

/// Compile and run `source` in a fresh `Vm`. This is the one-shot entry
/// point file-running callers want; a REPL instead keeps its own `Vm`
/// alive across lines and calls `Compiler::compile` + `Vm::interpret`
/// directly so globals persist between inputs.
pub fn run(source: &str, options: Options) -> InterpretOutcome {
    let mut vm = Vm::new(options);
    run_in(source, &mut vm)
}

/// Compile and run `source` against an existing `Vm`, so a REPL's
/// globals and heap survive across separate top-level inputs.
pub fn run_in(source: &str, vm: &mut Vm) -> InterpretOutcome {
    let function = match Compiler::compile(source, vm.heap()) {
        Ok(function) => function,
        Err(errors) => return InterpretOutcome::CompileError(errors),
    };
    match vm.interpret(function) {
        Ok(()) => InterpretOutcome::Ok,
        Err(error) => InterpretOutcome::RuntimeError(error),
    }
}
