//! Native (built-in) functions installed into every VM's global scope
//!
//! spec.md §4.6 calls for exactly one: `clock()`. No `chrono` dependency
//! is pulled in for a single monotonic reading — `std::time::Instant`
//! is the idiomatic choice the teacher's own crates reach for when they
//! only need elapsed time, not wall-clock dates.

use std::time::Instant;

use crate::error::RuntimeError;
use crate::value::Value;

thread_local! {
    static START: Instant = Instant::now();
}

/// Seconds elapsed since the process started, as an `f64` (spec.md
/// §4.6). Matches clox's `clock() / CLOCKS_PER_SEC` closely enough for
/// benchmarking scripts without depending on libc's clock semantics.
pub fn clock(_args: &[Value]) -> Result<Value, RuntimeError> {
    let elapsed = START.with(|start| start.elapsed());
    Ok(Value::Number(elapsed.as_secs_f64()))
}
