//! `Value` formatting: the inspect-style string representation used both for
//! uncaught-error display and for string coercion of non-primitive values
//! (shared by `coerce::to_display_string`).
//!
//! Object/array formatting walks the reference graph and guards against
//! cycles with a visited-pointer set, since sandbox code can build
//! self-referential structures (`const a = {}; a.self = a;`) and the
//! formatter must never recurse forever on one.

use std::rc::Rc;

use ahash::AHashSet;

use crate::value::{PropertySlot, Value};

/// Renders a value the way an uncaught error or a top-level REPL result
/// would be shown to a human, not the way `String(value)` coerces it for use
/// inside the language (see `coerce::to_js_string` for that).
pub fn display_value(value: &Value) -> String {
    let mut seen = AHashSet::default();
    let mut out = String::new();
    write_value(value, &mut out, &mut seen);
    out
}

fn ptr_of(value: &Value) -> Option<usize> {
    match value {
        Value::Array(a) => Some(Rc::as_ptr(a) as *const () as usize),
        Value::Object(o) => Some(Rc::as_ptr(o) as *const () as usize),
        _ => None,
    }
}

fn write_value(value: &Value, out: &mut String, seen: &mut AHashSet<usize>) {
    match value {
        Value::Undefined => out.push_str("undefined"),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::String(s) => out.push_str(s),
        Value::BigInt(b) => {
            out.push_str(&b.to_string());
            out.push('n');
        }
        Value::Array(arr) => {
            let ptr = ptr_of(value).unwrap();
            if !seen.insert(ptr) {
                out.push_str("[Circular]");
                return;
            }
            out.push('[');
            let arr = arr.borrow();
            for (i, slot) in arr.items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(&slot.as_value(), out, seen);
            }
            out.push(']');
            seen.remove(&ptr);
        }
        Value::Object(obj) => {
            let ptr = ptr_of(value).unwrap();
            if !seen.insert(ptr) {
                out.push_str("[Circular]");
                return;
            }
            out.push('{');
            let obj = obj.borrow();
            let mut first = true;
            for (key, slot) in obj.properties.iter() {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                out.push_str(key);
                out.push_str(": ");
                match slot {
                    PropertySlot::Value(v) => write_value(v, out, seen),
                    PropertySlot::Accessor { .. } => out.push_str("[Getter/Setter]"),
                }
            }
            out.push('}');
            seen.remove(&ptr);
        }
        Value::Closure(c) => {
            write_function_like(c.name.as_deref(), out);
        }
        Value::BoundMethod(c, _) => write_function_like(c.name.as_deref(), out),
        Value::Class(c) => {
            out.push_str("class ");
            out.push_str(c.name.as_deref().unwrap_or("(anonymous)"));
        }
        Value::HostFunction(_) => out.push_str("function () { [native code] }"),
        Value::HostProxy(..) => out.push_str("[object HostObject]"),
        Value::Generator(_) => out.push_str("[object Generator]"),
        Value::Promise(_) => out.push_str("[object Promise]"),
    }
}

fn write_function_like(name: Option<&str>, out: &mut String) {
    out.push_str("function ");
    out.push_str(name.unwrap_or(""));
    out.push_str("() { ... }");
}

/// Number-to-string adopting JS semantics (`NaN`,
/// `Infinity`/`-Infinity` spelled out; everything else via `ryu`'s shortest
/// round-trippable representation, with the trailing `.0` ryu always emits
/// for integral floats stripped since sandbox code expects `String(1)` to be
/// `"1"` not `"1.0"`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() };
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "0".to_owned() } else { "0".to_owned() };
    }
    let mut buf = ryu::Buffer::new();
    let rendered = buf.format(n);
    if let Some(stripped) = rendered.strip_suffix(".0") {
        stripped.to_owned()
    } else {
        rendered.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{JsArray, PlainObject};
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn formats_primitives() {
        assert_eq!(display_value(&Value::Undefined), "undefined");
        assert_eq!(display_value(&Value::Number(1.0)), "1");
        assert_eq!(display_value(&Value::Number(1.5)), "1.5");
        assert_eq!(display_value(&Value::Bool(true)), "true");
    }

    #[test]
    fn formats_array() {
        let v = Value::new_array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(display_value(&v), "[1, 2]");
    }

    #[test]
    fn guards_against_cycles() {
        let obj = Rc::new(StdRefCell::new(PlainObject::new()));
        let v = Value::Object(obj.clone());
        obj.borrow_mut().set("self", v.clone());
        let rendered = display_value(&v);
        assert!(rendered.contains("[Circular]"));
    }

    #[test]
    fn formats_nested_array_cycle() {
        let arr = Rc::new(StdRefCell::new(JsArray::from_values(vec![Value::Number(1.0)])));
        let v = Value::Array(arr.clone());
        arr.borrow_mut().set(1, v.clone());
        let rendered = display_value(&v);
        assert!(rendered.contains("[Circular]"));
    }
}
