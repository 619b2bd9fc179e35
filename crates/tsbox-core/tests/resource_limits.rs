//! Black-box checks for per-run and cumulative resource limits.

use tsbox_core::sandbox::{EvalOptions, Sandbox, SandboxOptions};
use tsbox_core::{AbortSignal, CumulativeLimits, ResourceLimits};

#[test]
fn loop_iteration_limit_is_enforced() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let options = EvalOptions {
        limits: ResourceLimits::new().max_loop_iterations(5),
        ..EvalOptions::default()
    };
    let result = sandbox.evaluate("let i = 0; for (;;) { i++; }", options);
    assert!(result.is_err());
}

#[test]
fn call_stack_depth_limit_is_enforced() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let options = EvalOptions {
        limits: ResourceLimits::new().max_call_stack_depth(10),
        ..EvalOptions::default()
    };
    let result = sandbox.evaluate("function f(n) { return f(n + 1); } f(0)", options);
    assert!(result.is_err());
}

#[test]
fn memory_estimate_limit_is_enforced() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let options = EvalOptions {
        limits: ResourceLimits::new().max_memory(64),
        ..EvalOptions::default()
    };
    let result = sandbox.evaluate(
        "let last; for (let i = 0; i < 1000; i++) { last = { a: 1, b: 2, c: 3 }; }",
        options,
    );
    assert!(result.is_err());
}

#[test]
fn abort_signal_stops_evaluation() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let signal = AbortSignal::new();
    signal.trigger();
    let options = EvalOptions {
        limits: ResourceLimits::new().signal(signal),
        ..EvalOptions::default()
    };
    let result = sandbox.evaluate("let i = 0; while (true) { i++; }", options);
    assert!(result.is_err());
}

#[test]
fn cumulative_iteration_limit_spans_calls() {
    let options = SandboxOptions {
        cumulative_limits: CumulativeLimits {
            max_total_iterations: Some(10),
            ..CumulativeLimits::default()
        },
        ..SandboxOptions::default()
    };
    let mut sandbox = Sandbox::new(options).unwrap();
    for _ in 0..5 {
        let _ = sandbox.evaluate("for (let i = 0; i < 3; i++) {}", EvalOptions::default());
    }
    let result = sandbox.evaluate("for (let i = 0; i < 3; i++) {}", EvalOptions::default());
    assert!(result.is_err());
}
