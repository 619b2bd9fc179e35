//! Type coercion rules for operators and the implicit conversions the
//! evaluator performs around them.
//!
//! Kept as free functions over `&Value` rather than methods on `Value`
//! itself, keeping the value representation separate from the arithmetic
//! rules layered on top of it.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::format::{display_value, format_number};
use crate::value::Value;

/// `String(value)` / template-literal interpolation / `+` with a string
/// operand. Distinct from `format::display_value` only in that plain
/// objects/arrays here use the same inspect-style rendering — the language
/// has no separate `toString`/`valueOf` protocol to honor.
pub fn to_js_string(value: &Value) -> Rc<str> {
    match value {
        Value::String(s) => s.clone(),
        other => Rc::from(display_value(other)),
    }
}

/// `Number(value)` and the numeric coercion `+`, `-`, `*`, `/`, `%`, `**`,
/// and relational operators perform on non-number operands.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Null => 0.0,
        Value::Undefined => f64::NAN,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).map(|v| v as f64).unwrap_or(f64::NAN)
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::BigInt(b) => b.to_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

pub fn to_boolean(value: &Value) -> bool {
    value.is_truthy()
}

pub fn to_bigint(value: &Value) -> Option<BigInt> {
    match value {
        Value::BigInt(b) => Some((**b).clone()),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => BigInt::from_f64(*n),
        Value::String(s) => s.trim().parse::<BigInt>().ok(),
        Value::Bool(b) => Some(BigInt::from(if *b { 1 } else { 0 })),
        _ => None,
    }
}

/// Whether `+` should concatenate (string semantics) rather than add
/// (numeric semantics): true if either operand is already a string.
pub fn plus_is_concat(left: &Value, right: &Value) -> bool {
    matches!(left, Value::String(_)) || matches!(right, Value::String(_))
}

/// Loose (`==`/`!=`) equality, distinct from `Value`'s `PartialEq` which
/// implements strict (`===`/`!==`) comparison. Mirrors the small, closed
/// coercion table the source language actually uses rather than full
/// abstract-equality-comparison generality.
pub fn loose_equals(left: &Value, right: &Value) -> bool {
    use Value::*;
    match (left, right) {
        (Undefined | Null, Undefined | Null) => true,
        (Number(_), Number(_))
        | (String(_), String(_))
        | (Bool(_), Bool(_))
        | (BigInt(_), BigInt(_)) => left == right,
        (Number(_), String(_)) => to_number(left) == to_number(right),
        (String(_), Number(_)) => to_number(left) == to_number(right),
        (Bool(_), _) => loose_equals(&Number(to_number(left)), right),
        (_, Bool(_)) => loose_equals(left, &Number(to_number(right))),
        (BigInt(b), Number(n)) | (Number(n), BigInt(b)) => n.fract() == 0.0 && BigInt::from(*n as i64) == **b,
        (BigInt(b), String(s)) | (String(s), BigInt(b)) => s.trim().parse::<BigInt>().map(|v| v == **b).unwrap_or(false),
        _ => left == right,
    }
}

/// Renders a number the way `String(n)` / template interpolation expects,
/// reused by `to_js_string`'s `Number` arm through `format::format_number`.
pub fn number_to_string(n: f64) -> String {
    format_number(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_coercion_of_strings() {
        assert_eq!(to_number(&Value::from_str("42")), 42.0);
        assert_eq!(to_number(&Value::from_str(" 3.5 ")), 3.5);
        assert!(to_number(&Value::from_str("abc")).is_nan());
        assert_eq!(to_number(&Value::from_str("")), 0.0);
    }

    #[test]
    fn number_coercion_of_booleans_and_nullish() {
        assert_eq!(to_number(&Value::Bool(true)), 1.0);
        assert_eq!(to_number(&Value::Bool(false)), 0.0);
        assert_eq!(to_number(&Value::Null), 0.0);
        assert!(to_number(&Value::Undefined).is_nan());
    }

    #[test]
    fn loose_equals_number_and_string() {
        assert!(loose_equals(&Value::Number(1.0), &Value::from_str("1")));
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(!loose_equals(&Value::Null, &Value::Number(0.0)));
    }

    #[test]
    fn string_coercion_of_object_uses_inspect_form() {
        let arr = Value::new_array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(&*to_js_string(&arr), "[1, 2]");
    }
}
