//! Error types shared by the compiler and VM
//!
//! Compile errors accumulate across a single compile run (spec.md §4.1,
//! "panic mode"); runtime errors abort the current VM run. Both carry a
//! source line rather than a byte span, since that is all spec.md's
//! error taxonomy (§7) requires for a stack trace.

use thiserror::Error;

/// One diagnostic produced while compiling. A compile run collects as
/// many of these as it can before giving up, following the teacher's
/// `Diagnostic` aggregation pattern (`atlas-runtime/src/diagnostic.rs`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[line {line}] Error: {message}")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Runtime error taxonomy (spec.md §7). Each variant carries the line
/// of the instruction that failed so the VM/driver can print a trace.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("[line {line}] Operand must be a number.")]
    NotANumber { line: u32 },

    #[error("[line {line}] Operands must be two numbers or two strings.")]
    BadAddOperands { line: u32 },

    #[error("[line {line}] Undefined variable '{name}'.")]
    UndefinedGlobal { name: String, line: u32 },

    #[error("[line {line}] Only instances have properties.")]
    NotAnInstance { line: u32 },

    #[error("[line {line}] Undefined property '{name}'.")]
    UndefinedProperty { name: String, line: u32 },

    #[error("[line {line}] Superclass must be a class.")]
    SuperclassNotAClass { line: u32 },

    #[error("[line {line}] Can only call functions and classes.")]
    NotCallable { line: u32 },

    #[error("[line {line}] Expected {expected} arguments but got {got}.")]
    ArityMismatch {
        expected: usize,
        got: usize,
        line: u32,
    },

    #[error("[line {line}] Stack overflow.")]
    StackOverflow { line: u32 },

    #[error("[line {line}] Undefined method '{name}'.")]
    UndefinedMethod { name: String, line: u32 },
}

impl RuntimeError {
    pub fn line(&self) -> u32 {
        match self {
            RuntimeError::NotANumber { line }
            | RuntimeError::BadAddOperands { line }
            | RuntimeError::UndefinedGlobal { line, .. }
            | RuntimeError::NotAnInstance { line }
            | RuntimeError::UndefinedProperty { line, .. }
            | RuntimeError::SuperclassNotAClass { line }
            | RuntimeError::NotCallable { line }
            | RuntimeError::ArityMismatch { line, .. }
            | RuntimeError::StackOverflow { line }
            | RuntimeError::UndefinedMethod { line, .. } => *line,
        }
    }
}

/// One active call frame at the moment a runtime error was raised,
/// innermost (failing) frame first. Grounded on real clox's
/// `runtimeError()` in `original_source/clox/src/vm.c`, which walks
/// `vm.frames` top to bottom printing each frame's function name and
/// the source line its `ip` was on before resetting the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function_name: String,
    pub line: u32,
}

/// A `RuntimeError` plus the call-frame chain active when it surfaced.
/// The VM snapshots this chain before clearing its frame stack, since
/// by the time a caller sees the error the frames themselves are gone.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeFailure {
    pub error: RuntimeError,
    pub trace: Vec<TraceFrame>,
}

impl std::fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RuntimeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
