//! Black-box checks for the host-proxy boundary: dangerous-property
//! rejection, silent-drop writes, and call-through to a host function.

use std::collections::HashMap;

use tsbox_core::{HostCallOutcome, HostCallable, HostObject, HostValue};
use tsbox_core::sandbox::{EvalOptions, Sandbox, SandboxOptions};
use tsbox_core::Value;

#[derive(Debug)]
struct Point {
    x: f64,
    y: f64,
}

impl HostObject for Point {
    fn get(&self, name: &str) -> Option<HostValue> {
        match name {
            "x" => Some(HostValue::Number(self.x)),
            "y" => Some(HostValue::Number(self.y)),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }
}

#[derive(Debug)]
struct AddTwo;

impl HostCallable for AddTwo {
    fn call(&self, _this: Option<HostValue>, args: Vec<HostValue>) -> Result<HostCallOutcome, String> {
        let HostValue::Number(a) = args.first().cloned().unwrap_or(HostValue::Number(0.0)) else {
            return Err("expected a number".to_string());
        };
        let HostValue::Number(b) = args.get(1).cloned().unwrap_or(HostValue::Number(0.0)) else {
            return Err("expected a number".to_string());
        };
        Ok(HostCallOutcome::Ready(HostValue::Number(a + b)))
    }
}

fn sandbox_with_point() -> Sandbox {
    let mut globals = HashMap::new();
    globals.insert(
        "point".to_string(),
        HostValue::Object(std::rc::Rc::new(Point { x: 1.0, y: 2.0 })),
    );
    Sandbox::new(SandboxOptions {
        globals,
        ..SandboxOptions::default()
    })
    .unwrap()
}

#[test]
fn reads_a_plain_property_through_the_proxy() {
    let mut sandbox = sandbox_with_point();
    let result = sandbox.evaluate("point.x + point.y", EvalOptions::default()).unwrap();
    assert_eq!(result, Value::Number(3.0));
}

#[test]
fn dangerous_property_reads_fail_with_a_security_error() {
    let mut sandbox = sandbox_with_point();
    for prop in ["__proto__", "constructor", "prototype"] {
        let result = sandbox.evaluate(&format!("point.{prop}"), EvalOptions::default());
        let err = result.unwrap_err();
        assert!(err.to_string().contains(prop));
    }
}

#[test]
fn writes_to_a_host_object_are_silently_dropped() {
    let mut sandbox = sandbox_with_point();
    let result = sandbox
        .evaluate("point.x = 99; point.x", EvalOptions::default())
        .unwrap();
    assert_eq!(result, Value::Number(1.0));
}

#[test]
fn host_function_globals_are_callable() {
    let mut globals = HashMap::new();
    globals.insert(
        "addTwo".to_string(),
        HostValue::Function(std::rc::Rc::new(AddTwo)),
    );
    let mut sandbox = Sandbox::new(SandboxOptions {
        globals,
        ..SandboxOptions::default()
    })
    .unwrap();
    let result = sandbox.evaluate("addTwo(4, 5)", EvalOptions::default()).unwrap();
    assert_eq!(result, Value::Number(9.0));
}

#[test]
fn forbidden_global_names_cannot_be_registered() {
    let mut globals = HashMap::new();
    globals.insert("globalThis".to_string(), HostValue::Undefined);
    let result = Sandbox::new(SandboxOptions {
        globals,
        ..SandboxOptions::default()
    });
    assert!(result.is_err());
}
