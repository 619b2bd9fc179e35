//! Black-box checks for the numbered scenarios a reader could hand-verify
//! against this interpreter directly.

use tsbox_core::sandbox::{EvalOptions, Sandbox, SandboxOptions};
use tsbox_core::value::Value;
use tsbox_core::{CumulativeLimits, ResourceLimits};

fn eval(src: &str) -> Value {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    sandbox.evaluate(src, EvalOptions::default()).unwrap()
}

#[test]
fn arithmetic_expression() {
    assert_eq!(eval("2 + 3"), Value::Number(5.0));
}

#[test]
fn loop_with_conditional_accumulation() {
    let result = eval(
        "let sum = 0; for (let i = 0; i < 10; i++) { if (i % 2 === 0) sum = sum + i; } sum",
    );
    assert_eq!(result, Value::Number(20.0));
}

#[test]
fn closures_capture_enclosing_scope() {
    let result = eval("function makeAdder(x) { return y => x + y; } makeAdder(10)(5)");
    assert_eq!(result, Value::Number(15.0));
}

#[test]
fn nested_destructuring_binds_both_levels() {
    let result = eval("let obj = { a: 1, b: { c: 2 } }; let { a, b: { c } } = obj; a + c");
    assert_eq!(result, Value::Number(3.0));
}

#[test]
fn dangerous_property_read_is_a_security_error() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let result = sandbox.evaluate("let obj = {}; obj.__proto__", EvalOptions::default());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("__proto__"));
}

#[test]
fn runaway_loop_is_capped_by_per_run_iteration_limit() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let options = EvalOptions {
        limits: ResourceLimits::new().max_loop_iterations(1000),
        ..EvalOptions::default()
    };
    let result = sandbox.evaluate("let i = 0; while (true) { i = i + 1; }", options);
    assert!(result.is_err());
}

#[test]
fn async_function_resolves_under_async_evaluation() {
    let sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let mut run = sandbox
        .evaluate_async("async function f() { return 42; } f()", EvalOptions::default())
        .unwrap();
    let value = loop {
        match run.poll() {
            tsbox_core::executor::RunProgress::Done(result) => break result.unwrap(),
            tsbox_core::executor::RunProgress::Suspended => continue,
        }
    };
    let Value::Promise(handle) = value else { panic!("expected a promise") };
    let state = handle.0.borrow();
    match &*state {
        tsbox_core::value::PromiseState::Fulfilled(v) => assert_eq!(*v, Value::Number(42.0)),
        other => panic!("expected a fulfilled promise, got {other:?}"),
    }
}

#[test]
fn async_function_call_rejected_under_sync_evaluation() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let result = sandbox.evaluate("async function f() { return 42; } f()", EvalOptions::default());
    let err = result.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("suspend"));
}

#[test]
fn cumulative_limits_are_enforced_across_calls() {
    let options = SandboxOptions {
        cumulative_limits: CumulativeLimits {
            max_total_evaluations: Some(1),
            ..CumulativeLimits::default()
        },
        ..SandboxOptions::default()
    };
    let mut sandbox = Sandbox::new(options).unwrap();
    assert!(sandbox.evaluate("1", EvalOptions::default()).is_ok());
    assert!(sandbox.evaluate("1", EvalOptions::default()).is_err());
}
