//! Runtime configuration
//!
//! Replaces clox's compile-time `DEBUG_*` macros with a plain struct the
//! host decides at startup, so the same binary can run traced and
//! untraced interpreters side by side (redesign flag in spec.md §9).

/// Knobs that change *how* a program runs without changing *what* it
/// computes: tracing, GC pressure-testing, and disassembly are all
/// diagnostics, never semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Print each instruction and the value stack before executing it.
    pub trace_execution: bool,
    /// Collect garbage before every allocation instead of only when the
    /// heap crosses its threshold — exercises GC correctness paths that
    /// would otherwise rarely trigger in small programs.
    pub stress_gc: bool,
    /// Dump each function's disassembly right after it compiles.
    pub disassemble_on_compile: bool,
    /// Multiplier applied to `bytes_allocated` to compute the next
    /// collection threshold. `None` keeps the heap's built-in default.
    pub gc_growth_factor: Option<f64>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_execution(mut self, value: bool) -> Self {
        self.trace_execution = value;
        self
    }

    pub fn with_stress_gc(mut self, value: bool) -> Self {
        self.stress_gc = value;
        self
    }

    pub fn with_disassemble_on_compile(mut self, value: bool) -> Self {
        self.disassemble_on_compile = value;
        self
    }

    pub fn with_gc_growth_factor(mut self, value: f64) -> Self {
        self.gc_growth_factor = Some(value);
        self
    }
}
