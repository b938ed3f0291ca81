//! Global functions and namespaced helpers (`Math`, `JSON`, `Object`, ...).

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::rc::Rc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use super::{Function, NativeFn, NativeImpl};
use crate::errors::{EvalError, Result};
use crate::interpreter::{get_property, own_keys, set_property, type_error, Interpreter};
use crate::value::{RegexValue, Value};

/// Numeric constants attached to namespaces on install.
pub const CONSTANTS: &[(&str, &str, f64)] = &[
    ("Math", "PI", std::f64::consts::PI),
    ("Math", "E", std::f64::consts::E),
    ("Math", "LN2", std::f64::consts::LN_2),
    ("Math", "LN10", std::f64::consts::LN_10),
    ("Math", "SQRT2", std::f64::consts::SQRT_2),
    ("Number", "MAX_SAFE_INTEGER", 9_007_199_254_740_991.0),
    ("Number", "MIN_SAFE_INTEGER", -9_007_199_254_740_991.0),
    ("Number", "EPSILON", f64::EPSILON),
    ("Number", "MAX_VALUE", f64::MAX),
];

lazy_static! {
    static ref FLOAT_PREFIX: Regex =
        Regex::new(r"^[+-]?(?:Infinity|(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)").unwrap();
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn num(args: &[Value], i: usize) -> f64 {
    args.get(i).map(Value::to_number).unwrap_or(f64::NAN)
}

fn math(f: fn(f64) -> f64, x: f64) -> Result<Value> {
    Ok(Value::Num(f(x)))
}

pub(super) fn register_all(map: &mut HashMap<&'static str, Rc<dyn Function>>) {
    let mut add = |path: &'static str, arity: RangeInclusive<usize>, imp: NativeImpl| {
        let name = path.rsplit('.').next().unwrap_or(path);
        map.insert(path, Rc::new(NativeFn::new(name, arity, imp)));
    };

    add("parseInt", 1..=2, |_, a| Ok(Value::Num(parse_int(&a[0].to_js_string(), &arg(a, 1)))));
    add("parseFloat", 1..=1, |_, a| Ok(Value::Num(parse_float(&a[0].to_js_string()))));
    add("isNaN", 1..=1, |_, a| Ok(Value::Bool(a[0].to_number().is_nan())));
    add("isFinite", 1..=1, |_, a| Ok(Value::Bool(a[0].to_number().is_finite())));
    add("Number", 0..=1, |_, a| Ok(Value::Num(a.first().map(Value::to_number).unwrap_or(0.0))));
    add("String", 0..=1, |_, a| Ok(Value::Str(a.first().map(Value::to_js_string).unwrap_or_default())));
    add("Boolean", 0..=1, |_, a| Ok(Value::Bool(a.first().is_some_and(Value::is_truthy))));
    add("RegExp", 1..=2, regexp);
    add("Error", 0..=1, |_, a| Ok(error("Error", a)));
    add("TypeError", 0..=1, |_, a| Ok(error("TypeError", a)));
    add("RangeError", 0..=1, |_, a| Ok(error("RangeError", a)));
    add("SyntaxError", 0..=1, |_, a| Ok(error("SyntaxError", a)));

    add("Math.abs", 1..=1, |_, a| math(f64::abs, num(a, 0)));
    add("Math.floor", 1..=1, |_, a| math(f64::floor, num(a, 0)));
    add("Math.ceil", 1..=1, |_, a| math(f64::ceil, num(a, 0)));
    add("Math.round", 1..=1, |_, a| math(|x| (x + 0.5).floor(), num(a, 0)));
    add("Math.trunc", 1..=1, |_, a| math(f64::trunc, num(a, 0)));
    add("Math.sign", 1..=1, |_, a| {
        math(|x| if x == 0.0 || x.is_nan() { x } else { x.signum() }, num(a, 0))
    });
    add("Math.sqrt", 1..=1, |_, a| math(f64::sqrt, num(a, 0)));
    add("Math.cbrt", 1..=1, |_, a| math(f64::cbrt, num(a, 0)));
    add("Math.exp", 1..=1, |_, a| math(f64::exp, num(a, 0)));
    add("Math.log", 1..=1, |_, a| math(f64::ln, num(a, 0)));
    add("Math.log2", 1..=1, |_, a| math(f64::log2, num(a, 0)));
    add("Math.log10", 1..=1, |_, a| math(f64::log10, num(a, 0)));
    add("Math.sin", 1..=1, |_, a| math(f64::sin, num(a, 0)));
    add("Math.cos", 1..=1, |_, a| math(f64::cos, num(a, 0)));
    add("Math.tan", 1..=1, |_, a| math(f64::tan, num(a, 0)));
    add("Math.atan", 1..=1, |_, a| math(f64::atan, num(a, 0)));
    add("Math.atan2", 2..=2, |_, a| Ok(Value::Num(num(a, 0).atan2(num(a, 1)))));
    add("Math.pow", 2..=2, |_, a| Ok(Value::Num(num(a, 0).powf(num(a, 1)))));
    add("Math.hypot", 0..=usize::MAX, |_, a| {
        Ok(Value::Num(a.iter().map(|v| v.to_number().powi(2)).sum::<f64>().sqrt()))
    });
    add("Math.max", 0..=usize::MAX, |_, a| Ok(Value::Num(fold_extreme(a, f64::NEG_INFINITY, f64::max))));
    add("Math.min", 0..=usize::MAX, |_, a| Ok(Value::Num(fold_extreme(a, f64::INFINITY, f64::min))));
    add("Math.random", 0..=0, |interp, _| Ok(Value::Num(interp.next_random())));

    add("JSON.stringify", 1..=3, json_stringify);
    add("JSON.parse", 1..=1, |_, a| {
        let text = a[0].to_js_string();
        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| EvalError::Runtime(format!("SyntaxError: {e}")))?;
        Ok(Value::from_json(&json))
    });

    add("Object", 0..=1, |_, a| {
        Ok(match a.first() {
            Some(v @ (Value::Object(_) | Value::Array(_))) => v.clone(),
            _ => Value::empty_object(),
        })
    });
    add("Object.keys", 1..=1, |_, a| {
        Ok(Value::array(own_keys(&a[0]).into_iter().map(Value::Str).collect()))
    });
    add("Object.values", 1..=1, |_, a| {
        let values = own_keys(&a[0])
            .iter()
            .map(|k| get_property(&a[0], k))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::array(values))
    });
    add("Object.entries", 1..=1, |_, a| {
        let mut entries = Vec::new();
        for key in own_keys(&a[0]) {
            let value = get_property(&a[0], &key)?;
            entries.push(Value::array(vec![Value::Str(key), value]));
        }
        Ok(Value::array(entries))
    });
    add("Object.assign", 1..=usize::MAX, |_, a| {
        let target = &a[0];
        for source in &a[1..] {
            for key in own_keys(source) {
                set_property(target, &key, get_property(source, &key)?)?;
            }
        }
        Ok(target.clone())
    });
    add("Object.fromEntries", 1..=1, |interp, a| {
        let object = Value::empty_object();
        for entry in interp.iterate(&a[0])? {
            let key = get_property(&entry, "0")?.to_js_string();
            set_property(&object, &key, get_property(&entry, "1")?)?;
        }
        Ok(object)
    });
    add("Object.freeze", 1..=1, |_, a| Ok(a[0].clone()));

    add("Array", 0..=usize::MAX, |_, a| match a {
        [Value::Num(n)] => {
            if n.fract() != 0.0 || *n < 0.0 || *n > u32::MAX as f64 {
                return Err(EvalError::Runtime("RangeError: Invalid array length".into()));
            }
            Ok(Value::array(vec![Value::Undefined; *n as usize]))
        }
        _ => Ok(Value::array(a.to_vec())),
    });
    add("Array.isArray", 1..=1, |_, a| Ok(Value::Bool(matches!(a[0], Value::Array(_)))));
    add("Array.of", 0..=usize::MAX, |_, a| Ok(Value::array(a.to_vec())));
    add("Array.from", 1..=2, array_from);

    add("Number.isInteger", 1..=1, |_, a| {
        Ok(Value::Bool(matches!(a[0], Value::Num(n) if n.is_finite() && n.fract() == 0.0)))
    });
    add("Number.isFinite", 1..=1, |_, a| Ok(Value::Bool(matches!(a[0], Value::Num(n) if n.is_finite()))));
    add("Number.isNaN", 1..=1, |_, a| Ok(Value::Bool(matches!(a[0], Value::Num(n) if n.is_nan()))));
    add("Number.parseFloat", 1..=1, |_, a| Ok(Value::Num(parse_float(&a[0].to_js_string()))));
    add("Number.parseInt", 1..=2, |_, a| Ok(Value::Num(parse_int(&a[0].to_js_string(), &arg(a, 1)))));

    add("String.fromCharCode", 0..=usize::MAX, |_, a| {
        Ok(Value::Str(
            a.iter()
                .filter_map(|v| char::from_u32(v.to_number() as u32))
                .collect(),
        ))
    });
}

fn error(name: &str, args: &[Value]) -> Value {
    let message = match args.first() {
        Some(v) if !v.is_nullish() => v.to_js_string(),
        _ => String::new(),
    };
    Value::error_object(name, &message)
}

fn fold_extreme(args: &[Value], init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for v in args {
        let n = v.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = pick(acc, n);
    }
    acc
}

/// `parseInt`: leading integer digits in the given radix, `NaN` when there are none.
pub fn parse_int(text: &str, radix: &Value) -> f64 {
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if let Some(rest) = s.strip_prefix('-').or_else(|| s.strip_prefix('+')) {
        s = rest;
    }
    let requested = radix.to_number();
    let mut radix = if requested.is_nan() || requested == 0.0 { 0 } else { requested.trunc() as i64 };
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: Vec<u32> = s.chars().map_while(|c| c.to_digit(radix as u32)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits.iter().fold(0.0, |acc, d| acc * radix as f64 + *d as f64);
    if negative {
        -value
    } else {
        value
    }
}

/// `parseFloat`: the longest numeric prefix.
pub fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    match FLOAT_PREFIX.find(s) {
        Some(m) => match m.as_str().trim_start_matches('+') {
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            prefix => prefix.parse().unwrap_or(f64::NAN),
        },
        None => f64::NAN,
    }
}

fn regexp(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let (source, inherited) = match &args[0] {
        Value::Regex(re) => (re.source.clone(), re.flags.clone()),
        other => (other.to_js_string(), String::new()),
    };
    let flags = match args.get(1) {
        Some(v) if !v.is_nullish() => v.to_js_string(),
        _ => inherited,
    };
    Ok(Value::Regex(Rc::new(RegexValue::new(&source, &flags)?)))
}

fn json_stringify(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let Some(json) = args[0].to_json() else {
        return Ok(Value::Undefined);
    };
    let indent = match args.get(2) {
        Some(Value::Num(n)) if *n >= 1.0 => " ".repeat(n.min(10.0) as usize),
        Some(Value::Str(s)) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    let text = if indent.is_empty() {
        serde_json::to_string(&json)
    } else {
        let mut buf = Vec::new();
        let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(indent.as_bytes()));
        json.serialize(&mut ser).map(|_| String::from_utf8_lossy(&buf).into_owned())
    };
    text.map(Value::Str).map_err(|e| type_error(e.to_string()))
}

fn array_from(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let source = &args[0];
    let items = match source {
        Value::Array(_) | Value::Str(_) => interp.iterate(source)?,
        Value::Object(_) => {
            let len = get_property(source, "length")?.to_number();
            let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
            (0..len)
                .map(|i| get_property(source, &i.to_string()))
                .collect::<Result<Vec<_>>>()?
        }
        _ => Vec::new(),
    };
    match args.get(1) {
        Some(f) if f.is_callable() => {
            let mut mapped = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                mapped.push(interp.call(f, Value::Undefined, vec![item, Value::Num(i as f64)])?);
            }
            Ok(Value::array(mapped))
        }
        _ => Ok(Value::array(items)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_int_handles_prefixes_and_radix() {
        assert_eq!(parse_int("  42px", &Value::Undefined), 42.0);
        assert_eq!(parse_int("-0x1F", &Value::Undefined), -31.0);
        assert_eq!(parse_int("101", &Value::Num(2.0)), 5.0);
        assert!(parse_int("abc", &Value::Undefined).is_nan());
        assert!(parse_int("1", &Value::Num(40.0)).is_nan());
    }

    #[test]
    fn parse_float_reads_ascii_digits_only() {
        assert_eq!(parse_float("12.5kg"), 12.5);
        assert_eq!(parse_float("1٣"), 1.0);
        assert!(parse_float("٣").is_nan());
    }

    #[test]
    fn parse_float_takes_longest_prefix() {
        assert_eq!(parse_float("3.5em"), 3.5);
        assert_eq!(parse_float("  -.5"), -0.5);
        assert_eq!(parse_float("1e3x"), 1000.0);
        assert_eq!(parse_float("Infinityx"), f64::INFINITY);
        assert!(parse_float("x1").is_nan());
    }
}
