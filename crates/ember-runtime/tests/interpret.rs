//! Black-box tests against the public `run`/`run_in` API, covering the
//! success/compile-error/runtime-error classification spec.md §7
//! promises callers (mirrored in `InterpretOutcome::exit_code`).

use ember_runtime::{run, run_in, InterpretOutcome, Options, Vm};

fn outcome(source: &str) -> InterpretOutcome {
    run(source, Options::new())
}

#[test]
fn a_well_formed_script_runs_to_completion() {
    let result = outcome("print 1 + 1;");
    assert!(matches!(result, InterpretOutcome::Ok));
    assert_eq!(result.exit_code(), 0);
}

#[test]
fn an_unterminated_string_is_a_compile_error() {
    let result = outcome("print \"unterminated;");
    assert!(matches!(result, InterpretOutcome::CompileError(_)));
    assert_eq!(result.exit_code(), 65);
}

#[test]
fn panic_mode_can_surface_more_than_one_compile_error() {
    let result = outcome("var; var;");
    match result {
        InterpretOutcome::CompileError(errors) => assert!(errors.len() >= 2),
        other => panic!("expected multiple compile errors, got an interpreter outcome instead of errors: exit {}", other.exit_code()),
    }
}

#[test]
fn dividing_by_a_string_is_a_runtime_error() {
    let result = outcome(r#"1 / "oops";"#);
    assert!(matches!(result, InterpretOutcome::RuntimeError(_)));
    assert_eq!(result.exit_code(), 70);
}

#[test]
fn calling_a_number_is_a_runtime_error() {
    let result = outcome("var x = 5; x();");
    assert!(matches!(result, InterpretOutcome::RuntimeError(_)));
    assert_eq!(result.exit_code(), 70);
}

#[test]
fn run_in_shares_globals_across_separate_inputs_like_a_repl() {
    let mut vm = Vm::new(Options::new());
    let first = run_in("var counter = 1;", &mut vm);
    assert!(matches!(first, InterpretOutcome::Ok));
    let second = run_in("counter = counter + 1;", &mut vm);
    assert!(matches!(second, InterpretOutcome::Ok));
}

#[test]
fn a_runtime_error_does_not_poison_a_reused_vm() {
    let mut vm = Vm::new(Options::new());
    let failed = run_in("nil + 1;", &mut vm);
    assert!(matches!(failed, InterpretOutcome::RuntimeError(_)));
    let recovered = run_in("var x = 1 + 1;", &mut vm);
    assert!(matches!(recovered, InterpretOutcome::Ok));
}

#[test]
fn stress_gc_does_not_change_whether_a_program_succeeds() {
    let result = run(
        "class Node { init(v) { this.v = v; } } \
         var n = nil; \
         for (var i = 0; i < 200; i = i + 1) { n = Node(i); } \
         print n.v;",
        Options::new().with_stress_gc(true),
    );
    assert!(matches!(result, InterpretOutcome::Ok));
}
