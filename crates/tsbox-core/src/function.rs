//! Call-setup helpers shared by ordinary function calls, method calls, and
//! constructor calls (component C4/C9): binding parameters (including
//! defaults and rest) into a fresh function frame, and destructuring a
//! pattern against an arbitrary value.
//!
//! Pattern destructuring lives here rather than in `evaluator.rs` because
//! both parameter binding and `let [a, b] = ...`/`for (const {x} of xs)`
//! statement forms need the identical recursive algorithm.

use crate::ast::{ArrayElement, ObjectPatternProp, ObjectProperty, Param, Pattern, PropertyKey};
use crate::environment::{BindingKind, Environment};
use crate::error::TsError;
use crate::value::{ArraySlot, GeneratorResume, Value};

/// A single destructured leaf assignment: either declare a fresh binding (for
/// `let`/`const`/parameter patterns) or write through to an existing
/// reference (for bare assignment-pattern destructuring, `([a, b] = x)`).
pub enum BindTarget<'a> {
    Declare { env: &'a Environment, kind: BindingKind },
    Assign { env: &'a Environment },
}

/// Binds `pattern` against `value` according to `target`, recursing through
/// nested array/object patterns and defaults.
pub fn bind_pattern(pattern: &Pattern, value: Value, target: &BindTarget) -> Result<(), TsError> {
    match pattern {
        Pattern::Identifier(name) => bind_leaf(name, value, target),
        Pattern::Assignment { left, right: _ } => {
            // Default-value application happens in the caller (it needs to
            // evaluate `right` with the evaluator, which this module does
            // not have access to); by the time we get here `value` has
            // already had the default substituted for `undefined`.
            bind_pattern(left, value, target)
        }
        Pattern::Array { elements, rest } => bind_array_pattern(elements, rest.as_deref(), value, target),
        Pattern::Object { properties, rest } => bind_object_pattern(properties, rest.as_deref(), value, target),
        Pattern::Member(_) => Err(TsError::security(
            "member expression assignment targets cannot be bound as declarations",
        )),
    }
}

fn bind_leaf(name: &str, value: Value, target: &BindTarget) -> Result<(), TsError> {
    match target {
        BindTarget::Declare { env, kind } => env.declare(name, *kind, value),
        BindTarget::Assign { env } => env.assign(name, value),
    }
}

fn bind_array_pattern(
    elements: &[Option<Pattern>],
    rest: Option<&Pattern>,
    value: Value,
    target: &BindTarget,
) -> Result<(), TsError> {
    let items = iterate_to_vec(&value)?;
    for (i, elem) in elements.iter().enumerate() {
        if let Some(pat) = elem {
            let v = items.get(i).cloned().unwrap_or(Value::Undefined);
            bind_pattern(pat, v, target)?;
        }
    }
    if let Some(rest_pat) = rest {
        let tail: Vec<Value> = items.into_iter().skip(elements.len()).collect();
        bind_pattern(rest_pat, Value::new_array(tail), target)?;
    }
    Ok(())
}

fn bind_object_pattern(
    properties: &[ObjectPatternProp],
    rest: Option<&Pattern>,
    value: Value,
    target: &BindTarget,
) -> Result<(), TsError> {
    let mut taken = Vec::new();
    for prop in properties {
        let key = static_key(&prop.key)?;
        taken.push(key.clone());
        let v = read_property(&value, &key)?;
        bind_pattern(&prop.value, v, target)?;
    }
    if let Some(rest_pat) = rest {
        let remaining = object_entries_excluding(&value, &taken)?;
        bind_pattern(rest_pat, remaining, target)?;
    }
    Ok(())
}

fn static_key(key: &PropertyKey) -> Result<String, TsError> {
    match key {
        PropertyKey::Identifier(s) | PropertyKey::String(s) => Ok(s.clone()),
        PropertyKey::Number(n) => Ok(crate::format::format_number(*n)),
        PropertyKey::Private(_) => Err(TsError::security("private names cannot appear in destructuring patterns")),
        PropertyKey::Computed(_) => Err(TsError::security(
            "computed destructuring keys must be evaluated by the caller before binding",
        )),
    }
}

fn read_property(value: &Value, key: &str) -> Result<Value, TsError> {
    match value {
        Value::Object(obj) => Ok(obj.borrow().get(key).cloned().unwrap_or(Value::Undefined)),
        Value::Array(arr) => {
            if let Ok(idx) = key.parse::<usize>() {
                Ok(arr.borrow().get(idx))
            } else if key == "length" {
                Ok(Value::Number(arr.borrow().len() as f64))
            } else {
                Ok(Value::Undefined)
            }
        }
        Value::Undefined | Value::Null => Err(TsError::runtime(Value::from_str(&format!(
            "TypeError: Cannot destructure '{key}' of null or undefined"
        )))),
        _ => Ok(Value::Undefined),
    }
}

fn object_entries_excluding(value: &Value, exclude: &[String]) -> Result<Value, TsError> {
    match value {
        Value::Object(obj) => {
            let rest = Value::new_object();
            if let Value::Object(rest_obj) = &rest {
                for (k, slot) in obj.borrow().properties.iter() {
                    if exclude.iter().any(|e| e == k.as_ref()) {
                        continue;
                    }
                    if let crate::value::PropertySlot::Value(v) = slot {
                        rest_obj.borrow_mut().set(k, v.clone());
                    }
                }
            }
            Ok(rest)
        }
        _ => Ok(Value::new_object()),
    }
}

/// Converts an iterable value (array, or string for `for..of`-style spread)
/// to a plain `Vec<Value>` for array-pattern destructuring and spread calls.
/// Generators are driven to exhaustion by the evaluator, not here; this
/// helper only covers the synchronous, already-materialized cases.
pub fn iterate_to_vec(value: &Value) -> Result<Vec<Value>, TsError> {
    match value {
        Value::Array(arr) => Ok(arr.borrow().items.iter().map(ArraySlot::as_value).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::from_str(&c.to_string())).collect()),
        Value::Generator(handle) => {
            let mut items = Vec::new();
            loop {
                let step = handle.0.borrow_mut().resume(GeneratorResume::Next(Value::Undefined))?;
                if step.done {
                    break;
                }
                items.push(step.value);
            }
            Ok(items)
        }
        Value::Undefined | Value::Null => Err(TsError::runtime(Value::from_str(
            "TypeError: value is not iterable",
        ))),
        _ => Err(TsError::runtime(Value::from_str("TypeError: value is not iterable"))),
    }
}

/// Gathers positional call arguments into a fresh function-frame environment
/// according to `params`, handling rest parameters. Defaults (which need
/// expression evaluation) and object/array pattern defaults are applied by
/// the evaluator, which calls back into `bind_pattern` once the default has
/// been resolved; this only performs the positional split.
pub fn split_params_and_args<'a>(params: &'a [Param], args: &[Value]) -> Vec<(&'a Param, Value)> {
    let mut out = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        if param.rest {
            let rest: Vec<Value> = args.iter().skip(i).cloned().collect();
            out.push((param, Value::new_array(rest)));
            break;
        }
        out.push((param, args.get(i).cloned().unwrap_or(Value::Undefined)));
    }
    out
}

/// Whether an object-literal property list contains a computed key, which
/// forces sequential left-to-right evaluation with side effects instead of
/// a simple static-key fast path. Used by the evaluator to decide how to
/// build object literals without duplicating the property list.
pub fn has_computed_property(properties: &[ObjectProperty]) -> bool {
    properties.iter().any(|p| p.computed)
}

/// Whether any element of an array literal is a spread, used by the
/// evaluator to choose between a fast fixed-size build and incremental
/// spreading.
pub fn has_spread_element(elements: &[Option<ArrayElement>]) -> bool {
    elements
        .iter()
        .any(|e| matches!(e, Some(ArrayElement::Spread(_))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_simple_array_pattern() {
        let env = Environment::root();
        let pattern = Pattern::Array {
            elements: vec![Some(Pattern::Identifier("a".into())), Some(Pattern::Identifier("b".into()))],
            rest: None,
        };
        let value = Value::new_array(vec![Value::Number(1.0), Value::Number(2.0)]);
        bind_pattern(
            &pattern,
            value,
            &BindTarget::Declare {
                env: &env,
                kind: BindingKind::Let,
            },
        )
        .unwrap();
        assert_eq!(env.get("a"), Some(Value::Number(1.0)));
        assert_eq!(env.get("b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn binds_array_pattern_with_rest() {
        let env = Environment::root();
        let pattern = Pattern::Array {
            elements: vec![Some(Pattern::Identifier("a".into()))],
            rest: Some(Box::new(Pattern::Identifier("rest".into()))),
        };
        let value = Value::new_array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        bind_pattern(
            &pattern,
            value,
            &BindTarget::Declare {
                env: &env,
                kind: BindingKind::Let,
            },
        )
        .unwrap();
        let Some(Value::Array(rest)) = env.get("rest") else {
            panic!("expected array");
        };
        assert_eq!(rest.borrow().len(), 2);
    }

    #[test]
    fn split_params_handles_rest() {
        let params = vec![
            Param { pattern: Pattern::Identifier("a".into()), default: None, rest: false },
            Param { pattern: Pattern::Identifier("rest".into()), default: None, rest: true },
        ];
        let args = vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)];
        let bound = split_params_and_args(&params, &args);
        assert_eq!(bound.len(), 2);
        let Value::Array(rest) = &bound[1].1 else { panic!() };
        assert_eq!(rest.borrow().len(), 2);
    }
}
