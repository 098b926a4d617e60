//! Coercion helpers (spec.md §4.3, §4.6): number/string conversion for
//! arithmetic, concatenation, length and comparison.

use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::{LuaStr, Table, Value};

/// Coerces a value to a number for arithmetic (spec.md §4.3): numbers
/// pass through; strings parse as an integer (any base understood by
/// `parse`, including Lua's `0x` hex-literal convention) or float after
/// whitespace trimming; anything else fails to coerce.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Str(s) => {
            let text = std::str::from_utf8(s.as_bytes()).ok()?.trim();
            if text.is_empty() {
                return None;
            }
            if let Some(hex) = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
            {
                return i64::from_str_radix(hex, 16).ok().map(|n| n as f64);
            }
            if let Some(rest) = text.strip_prefix('-') {
                if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
                    return i64::from_str_radix(hex, 16).ok().map(|n| -(n as f64));
                }
            }
            text.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Arithmetic on `R(B) op R(C)` with string↔number coercion
/// (spec.md §4.3). `op` names the opcode for error reporting.
pub fn arith(
    op: &'static str,
    a: &Value,
    b: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    let x = to_number(a).ok_or(RuntimeError::NoArithMetamethod(a.type_name()))?;
    let y = to_number(b).ok_or(RuntimeError::NoArithMetamethod(b.type_name()))?;
    let _ = op;
    Ok(Value::Number(f(x, y)))
}

/// Lua's modulo: `a - floor(a / b) * b` (spec.md §4.3).
pub fn lua_mod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

pub fn unary_minus(value: &Value) -> Result<Value, RuntimeError> {
    let x = to_number(value).ok_or(RuntimeError::NoArithMetamethod(value.type_name()))?;
    Ok(Value::Number(-x))
}

/// Formats a number the way `CONCAT` and `tostring` expect: integral
/// values render with no decimal point, others as the shortest
/// round-trippable decimal (spec.md §4.3).
pub fn number_to_string(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

/// Coerces a value to a string for `CONCAT` (spec.md §4.3): strings pass
/// through, numbers format per `number_to_string`, anything else fails.
pub fn to_concat_str(value: &Value) -> Result<Rc<LuaStr>, RuntimeError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Number(n) => Ok(Rc::new(LuaStr::from(number_to_string(*n).as_str()))),
        other => Err(RuntimeError::TypeMismatch {
            op: "concatenate",
            expected: "string or number",
            got: other.type_name(),
        }),
    }
}

/// `LEN` (spec.md §4.3): byte length for strings, entry count for
/// tables, otherwise no length is defined.
pub fn length(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Str(s) => Ok(s.as_bytes().len() as f64),
        Value::Table(t) => Ok(table_len(&t.borrow()) as f64),
        other => Err(RuntimeError::NoLenMetamethod(other.type_name())),
    }
}

fn table_len(t: &Table) -> usize {
    t.len()
}

/// Equality never coerces across variants (spec.md §4.3).
pub fn eq(a: &Value, b: &Value) -> bool {
    a == b
}

/// Ordering is defined only for two numbers or two strings (lexicographic
/// byte comparison); otherwise `false` (spec.md §4.3, a strict
/// simplification of full Lua semantics).
pub fn lt(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x < y,
        (Value::Str(x), Value::Str(y)) => x.as_bytes() < y.as_bytes(),
        _ => false,
    }
}

pub fn le(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x <= y,
        (Value::Str(x), Value::Str(y)) => x.as_bytes() <= y.as_bytes(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_string_coercion() {
        assert_eq!(to_number(&Value::str_from("  42 ")), Some(42.0));
        assert_eq!(to_number(&Value::str_from("0x1A")), Some(26.0));
        assert_eq!(to_number(&Value::str_from("3.5")), Some(3.5));
        assert_eq!(to_number(&Value::str_from("nope")), None);
    }

    #[test]
    fn concat_formats_integral_numbers_without_decimal_point() {
        assert_eq!(number_to_string(21.0), "21");
        assert_eq!(number_to_string(21.5), "21.5");
    }

    #[test]
    fn modulo_matches_lua_floor_semantics() {
        assert_eq!(lua_mod(5.0, 3.0), 2.0);
        assert_eq!(lua_mod(-5.0, 3.0), 1.0);
    }

    #[test]
    fn ordering_is_false_for_mixed_variants() {
        assert!(!lt(&Value::Number(1.0), &Value::str_from("1")));
        assert!(!lt(&Value::Boolean(true), &Value::Boolean(false)));
    }

    #[test]
    fn string_length_is_byte_length() {
        assert_eq!(length(&Value::str_from("hello")).unwrap(), 5.0);
    }
}
