use std::cmp::Ordering;

use crate::value::Value;

/// `===`
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    a == b
}

/// `==`, with the usual number/string/boolean coercions.
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (x, y) if x.is_nullish() && y.is_nullish() => true,
        (x, y) if x.is_nullish() || y.is_nullish() => false,
        (Value::Num(_), Value::Str(_)) | (Value::Str(_), Value::Num(_)) => {
            a.to_number() == b.to_number()
        }
        (Value::Bool(_), _) => loose_equals(&Value::Num(a.to_number()), b),
        (_, Value::Bool(_)) => loose_equals(a, &Value::Num(b.to_number())),
        (Value::Array(_) | Value::Object(_), Value::Num(_) | Value::Str(_)) => {
            loose_equals(&Value::Str(a.to_js_string()), b)
        }
        (Value::Num(_) | Value::Str(_), Value::Array(_) | Value::Object(_)) => {
            loose_equals(a, &Value::Str(b.to_js_string()))
        }
        _ => strict_equals(a, b),
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`; `None` when either side is NaN after coercion.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let pa = to_primitive(a);
    let pb = to_primitive(b);
    match (&pa, &pb) {
        (Value::Str(sa), Value::Str(sb)) => Some(sa.cmp(sb)),
        _ => {
            let (da, db) = (pa.to_number(), pb.to_number());
            da.partial_cmp(&db)
        }
    }
}

pub(crate) fn to_primitive(v: &Value) -> Value {
    match v {
        Value::Array(_) | Value::Object(_) | Value::Regex(_) => Value::Str(v.to_js_string()),
        other => other.clone(),
    }
}
