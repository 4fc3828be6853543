//! End-to-end tests driving the compiled `ember` binary against temp
//! script files, asserting on captured stdout/exit code — the six
//! worked scenarios from spec.md §8 plus the exit-code contract.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn script_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("couldn't create a temp script file");
    file.write_all(source.as_bytes()).expect("couldn't write script source");
    file
}

fn ember() -> Command {
    Command::cargo_bin("ember").expect("couldn't find the `ember` binary")
}

#[test]
fn scenario_one_arithmetic_precedence() {
    let file = script_file("print 1 + 2 * 3;");
    ember()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("7\n"));
}

#[test]
fn scenario_two_comparison() {
    let file = script_file("print 1 < 2;");
    ember()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("true\n"));
}

#[test]
fn scenario_three_a_closure_keeps_its_own_upvalue() {
    let file = script_file(
        "fun make() { var x = 0; fun inc() { x = x + 1; print x; } return inc; }\
         var f = make(); f(); f();",
    );
    ember()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("1\n2\n"));
}

#[test]
fn scenario_four_subclass_method_lookup() {
    let file = script_file(
        r#"class A { greet() { print "hi"; } } class B < A {} B().greet();"#,
    );
    ember()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("hi\n"));
}

#[test]
fn scenario_five_a_for_loop_accumulation() {
    let file = script_file("var x = 0; for (var i = 0; i < 1000; i = i + 1) { x = x + i; } print x;");
    ember()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("499500\n"));
}

#[test]
fn scenario_five_under_stress_gc_is_unchanged() {
    let file = script_file("var x = 0; for (var i = 0; i < 1000; i = i + 1) { x = x + i; } print x;");
    ember()
        .arg(file.path())
        .arg("--stress-gc")
        .assert()
        .success()
        .stdout(predicate::str::diff("499500\n"));
}

#[test]
fn scenario_six_init_binds_this() {
    let file = script_file("class C { init(x) { this.x = x; } } print C(42).x;");
    ember()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("42\n"));
}

#[test]
fn a_compile_error_exits_sixty_five() {
    let file = script_file("print \"unterminated;");
    ember().arg(file.path()).assert().code(65);
}

#[test]
fn a_runtime_error_exits_seventy() {
    let file = script_file("nil + 1;");
    ember().arg(file.path()).assert().code(70);
}

#[test]
fn a_runtime_error_several_calls_deep_reports_every_frame() {
    let file = script_file("fun f() { return 1 / nil; } fun g() { f(); } g();");
    ember()
        .arg(file.path())
        .assert()
        .code(70)
        .stderr(predicate::str::contains("in f()"))
        .stderr(predicate::str::contains("in g()"))
        .stderr(predicate::str::contains("in script"));
}

#[test]
fn an_unreadable_path_exits_seventy_four() {
    ember().arg("/nonexistent/path/does/not/exist.ember").assert().code(74);
}
