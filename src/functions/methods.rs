//! Built-in methods reachable through `receiver.name(...)`.

use std::cmp::Ordering;
use std::rc::Rc;

use itertools::Itertools;
use fancy_regex::{Captures, Regex};

use super::Bound;
use crate::comparison::strict_equals;
use crate::errors::{EvalError, Result};
use crate::interpreter::{get_property, type_error, Interpreter};
use crate::value::{format_number, match_error, ArrayRef, RegexValue, Value};

const STRING_METHODS: &[&str] = &[
    "toUpperCase", "toLowerCase", "toLocaleUpperCase", "toLocaleLowerCase", "trim", "trimStart",
    "trimEnd", "trimLeft", "trimRight", "padStart", "padEnd", "repeat", "slice", "substring",
    "substr", "indexOf", "lastIndexOf", "includes", "startsWith", "endsWith", "charAt",
    "charCodeAt", "codePointAt", "at", "concat", "split", "replace", "replaceAll", "match",
    "matchAll", "search", "localeCompare", "normalize", "toString", "valueOf",
];

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "splice", "concat", "join", "reverse", "sort",
    "indexOf", "lastIndexOf", "includes", "find", "findIndex", "findLast", "findLastIndex",
    "filter", "map", "forEach", "some", "every", "reduce", "reduceRight", "flat", "flatMap",
    "fill", "at", "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString", "toLocaleString", "valueOf"];
const REGEX_METHODS: &[&str] = &["test", "exec", "toString"];
const OBJECT_METHODS: &[&str] = &["hasOwnProperty", "toString", "valueOf"];
const FUNCTION_METHODS: &[&str] = &["call", "apply", "bind", "toString"];

pub fn has_method(receiver: &Value, name: &str) -> bool {
    let table: &[&str] = match receiver {
        Value::Str(_) => STRING_METHODS,
        Value::Array(_) => ARRAY_METHODS,
        Value::Num(_) => NUMBER_METHODS,
        Value::Bool(_) => &["toString", "valueOf"],
        Value::Regex(_) => REGEX_METHODS,
        Value::Object(_) => OBJECT_METHODS,
        Value::Closure(_) | Value::Native(_) => FUNCTION_METHODS,
        Value::Undefined | Value::Null => &[],
    };
    table.contains(&name)
}

pub fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value> {
    if !has_method(receiver, name) {
        return Err(type_error(format!("{}.{name} is not a function", receiver.type_of())));
    }
    match receiver {
        Value::Str(s) => string_method(interp, s, name, &args),
        Value::Array(items) => array_method(interp, receiver, items, name, args),
        Value::Num(n) => number_method(*n, name, &args),
        Value::Regex(re) => regex_method(re, name, &args),
        Value::Closure(_) | Value::Native(_) => function_method(interp, receiver, name, args),
        Value::Object(fields) => Ok(match name {
            "hasOwnProperty" => Value::Bool(fields.borrow().contains_key(&arg(&args, 0).to_js_string())),
            "valueOf" => receiver.clone(),
            _ => {
                let fields = fields.borrow();
                match (fields.get("name"), fields.get("message")) {
                    (Some(n), Some(m)) => Value::Str(format!("{}: {}", n.to_js_string(), m.to_js_string())),
                    _ => Value::str("[object Object]"),
                }
            }
        }),
        other => Ok(match name {
            "valueOf" => other.clone(),
            _ => Value::Str(other.to_js_string()),
        }),
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn to_integer(v: &Value) -> f64 {
    let n = v.to_number();
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

// Negative positions count from the end; the result is clamped to `0..=len`.
fn relative_index(v: &Value, len: usize) -> usize {
    let n = to_integer(v);
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn clamp_index(v: &Value, len: usize) -> usize {
    to_integer(v).clamp(0.0, len as f64) as usize
}

fn char_to_byte(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map(|(b, _)| b).unwrap_or(s.len())
}

fn byte_to_char(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

fn slice_chars(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/* ===================== Strings ===================== */

fn string_method(interp: &mut Interpreter, s: &str, name: &str, args: &[Value]) -> Result<Value> {
    let len = s.chars().count();
    Ok(match name {
        "toUpperCase" | "toLocaleUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" | "toLocaleLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::str(s.trim()),
        "trimStart" | "trimLeft" => Value::str(s.trim_start()),
        "trimEnd" | "trimRight" => Value::str(s.trim_end()),
        "padStart" | "padEnd" => {
            let target = to_integer(&arg(args, 0)).max(0.0) as usize;
            let pad = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => v.to_js_string(),
                _ => " ".to_string(),
            };
            if target <= len || pad.is_empty() {
                return Ok(Value::str(s));
            }
            let fill: String = pad.chars().cycle().take(target - len).collect();
            if name == "padStart" {
                Value::Str(fill + s)
            } else {
                Value::Str(s.to_string() + &fill)
            }
        }
        "repeat" => {
            let count = to_integer(&arg(args, 0));
            if count < 0.0 || !count.is_finite() || count * len as f64 > (1u64 << 28) as f64 {
                return Err(EvalError::Runtime("RangeError: Invalid count value".into()));
            }
            Value::Str(s.repeat(count as usize))
        }
        "slice" => {
            let start = relative_index(&arg(args, 0), len);
            let end = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => relative_index(v, len),
                _ => len,
            };
            Value::Str(slice_chars(s, start, end))
        }
        "substring" => {
            let start = clamp_index(&arg(args, 0), len);
            let end = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => clamp_index(v, len),
                _ => len,
            };
            Value::Str(slice_chars(s, start.min(end), start.max(end)))
        }
        "substr" => {
            let start = relative_index(&arg(args, 0), len);
            let count = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => clamp_index(v, len - start),
                _ => len - start,
            };
            Value::Str(slice_chars(s, start, start + count))
        }
        "indexOf" | "includes" => {
            let needle = arg(args, 0).to_js_string();
            let from = char_to_byte(s, clamp_index(&arg(args, 1), len));
            let found = s[from..].find(&needle).map(|b| byte_to_char(s, from + b));
            if name == "includes" {
                Value::Bool(found.is_some())
            } else {
                Value::Num(found.map(|i| i as f64).unwrap_or(-1.0))
            }
        }
        "lastIndexOf" => {
            let needle = arg(args, 0).to_js_string();
            let from = match args.get(1) {
                Some(v) if !v.to_number().is_nan() => clamp_index(v, len),
                _ => len,
            };
            let limit = char_to_byte(s, (from + needle.chars().count()).min(len));
            let found = s[..limit].rfind(&needle).map(|b| byte_to_char(s, b));
            Value::Num(found.map(|i| i as f64).unwrap_or(-1.0))
        }
        "startsWith" => {
            let needle = arg(args, 0).to_js_string();
            let from = char_to_byte(s, clamp_index(&arg(args, 1), len));
            Value::Bool(s[from..].starts_with(&needle))
        }
        "endsWith" => {
            let needle = arg(args, 0).to_js_string();
            let end = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => clamp_index(v, len),
                _ => len,
            };
            Value::Bool(s[..char_to_byte(s, end)].ends_with(&needle))
        }
        "charAt" => {
            let i = to_integer(&arg(args, 0));
            let c = if i < 0.0 { None } else { s.chars().nth(i as usize) };
            Value::Str(c.map(String::from).unwrap_or_default())
        }
        "charCodeAt" | "codePointAt" => {
            let i = to_integer(&arg(args, 0));
            let c = if i < 0.0 { None } else { s.chars().nth(i as usize) };
            match c {
                Some(c) => Value::Num(c as u32 as f64),
                None if name == "charCodeAt" => Value::Num(f64::NAN),
                None => Value::Undefined,
            }
        }
        "at" => {
            let i = to_integer(&arg(args, 0));
            let i = if i < 0.0 { len as f64 + i } else { i };
            if i < 0.0 {
                Value::Undefined
            } else {
                s.chars().nth(i as usize).map(|c| Value::Str(c.to_string())).unwrap_or_default()
            }
        }
        "concat" => Value::Str(args.iter().fold(s.to_string(), |acc, v| acc + &v.to_js_string())),
        "split" => split(s, args)?,
        "replace" | "replaceAll" => {
            let (regex, all) = match &arg(args, 0) {
                Value::Regex(re) => {
                    if name == "replaceAll" && !re.is_global() {
                        return Err(type_error("replaceAll must be called with a global RegExp"));
                    }
                    (re.regex.clone(), re.is_global())
                }
                other => (literal_regex(&other.to_js_string())?, name == "replaceAll"),
            };
            Value::Str(replace(interp, s, &regex, all, &arg(args, 1))?)
        }
        "match" => {
            let re = to_regex(&arg(args, 0))?;
            if re.is_global() {
                let mut all = Vec::new();
                for m in re.regex.find_iter(s) {
                    all.push(Value::str(m.map_err(match_error)?.as_str()));
                }
                if all.is_empty() {
                    Value::Null
                } else {
                    Value::array(all)
                }
            } else {
                re.regex.captures(s).map_err(match_error)?.map(|c| captures_to_array(&c)).unwrap_or(Value::Null)
            }
        }
        "matchAll" => {
            let re = to_regex(&arg(args, 0))?;
            if !re.is_global() {
                return Err(type_error("matchAll must be called with a global RegExp"));
            }
            let mut all = Vec::new();
            for caps in re.regex.captures_iter(s) {
                all.push(captures_to_array(&caps.map_err(match_error)?));
            }
            Value::array(all)
        }
        "search" => {
            let re = to_regex(&arg(args, 0))?;
            let found = re.regex.find(s).map_err(match_error)?;
            Value::Num(found.map(|m| byte_to_char(s, m.start()) as f64).unwrap_or(-1.0))
        }
        "localeCompare" => Value::Num(match s.cmp(arg(args, 0).to_js_string().as_str()) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        }),
        _ => Value::str(s),
    })
}

fn literal_regex(text: &str) -> Result<Regex> {
    Regex::new(&fancy_regex::escape(text)).map_err(|e| EvalError::Runtime(e.to_string()))
}

fn to_regex(value: &Value) -> Result<Rc<RegexValue>> {
    match value {
        Value::Regex(re) => Ok(re.clone()),
        Value::Undefined => Ok(Rc::new(RegexValue::new("(?:)", "")?)),
        other => Ok(Rc::new(RegexValue::new(&other.to_js_string(), "")?)),
    }
}

fn captures_to_array(caps: &Captures) -> Value {
    Value::array(
        caps.iter()
            .map(|g| g.map(|m| Value::str(m.as_str())).unwrap_or_default())
            .collect(),
    )
}

fn split(s: &str, args: &[Value]) -> Result<Value> {
    let limit = match args.get(1) {
        Some(v) if !matches!(v, Value::Undefined) => v.to_number().max(0.0) as usize,
        _ => usize::MAX,
    };
    let mut parts: Vec<Value> = match &arg(args, 0) {
        Value::Undefined => vec![Value::str(s)],
        Value::Regex(re) => split_regex(s, &re.regex)?,
        sep => {
            let sep = sep.to_js_string();
            if sep.is_empty() {
                s.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(Value::str).collect()
            }
        }
    };
    parts.truncate(limit);
    Ok(Value::array(parts))
}

// Empty matches at either end of the input do not produce a split point.
fn split_regex(s: &str, re: &Regex) -> Result<Vec<Value>> {
    if s.is_empty() {
        return Ok(if re.is_match(s).map_err(match_error)? { Vec::new() } else { vec![Value::str(s)] });
    }
    let mut parts = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let caps = caps.map_err(match_error)?;
        let Some(m) = caps.get(0) else { continue };
        if m.start() == m.end() && (m.start() == 0 || m.start() == s.len()) {
            continue;
        }
        parts.push(Value::str(&s[last..m.start()]));
        for group in caps.iter().skip(1) {
            parts.push(group.map(|g| Value::str(g.as_str())).unwrap_or_default());
        }
        last = m.end();
    }
    parts.push(Value::str(&s[last..]));
    Ok(parts)
}

/// Replace the first (or every) match, expanding `$` patterns or calling a replacer function.
pub fn replace(interp: &mut Interpreter, s: &str, re: &Regex, all: bool, replacement: &Value) -> Result<String> {
    let template = if replacement.is_callable() { None } else { Some(replacement.to_js_string()) };
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let caps = caps.map_err(match_error)?;
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&s[last..m.start()]);
        match &template {
            Some(template) => expand_template(template, &caps, s, &mut out),
            None => {
                let mut call_args: Vec<Value> = caps
                    .iter()
                    .map(|g| g.map(|g| Value::str(g.as_str())).unwrap_or_default())
                    .collect();
                call_args.push(Value::Num(byte_to_char(s, m.start()) as f64));
                call_args.push(Value::str(s));
                out.push_str(&interp.call(replacement, Value::Undefined, call_args)?.to_js_string());
            }
        }
        last = m.end();
        if !all {
            break;
        }
    }
    out.push_str(&s[last..]);
    Ok(out)
}

fn expand_template(template: &str, caps: &Captures, input: &str, out: &mut String) {
    let Some(whole) = caps.get(0) else { return };
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' || i + 1 >= chars.len() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars[i + 1] {
            '$' => {
                out.push('$');
                i += 2;
            }
            '&' => {
                out.push_str(whole.as_str());
                i += 2;
            }
            '`' => {
                out.push_str(&input[..whole.start()]);
                i += 2;
            }
            '\'' => {
                out.push_str(&input[whole.end()..]);
                i += 2;
            }
            '<' => {
                let close = chars[i + 2..].iter().position(|c| *c == '>');
                match close {
                    Some(offset) => {
                        let name: String = chars[i + 2..i + 2 + offset].iter().collect();
                        if let Some(g) = caps.name(&name) {
                            out.push_str(g.as_str());
                        }
                        i += offset + 3;
                    }
                    None => {
                        out.push('$');
                        i += 1;
                    }
                }
            }
            d if d.is_ascii_digit() => {
                let one = d.to_digit(10).unwrap_or(0) as usize;
                let two = chars
                    .get(i + 2)
                    .and_then(|c| c.to_digit(10))
                    .map(|e| one * 10 + e as usize)
                    .filter(|n| *n >= 1 && *n < caps.len());
                if let Some(n) = two {
                    out.push_str(caps.get(n).map(|g| g.as_str()).unwrap_or(""));
                    i += 3;
                } else if one >= 1 && one < caps.len() {
                    out.push_str(caps.get(one).map(|g| g.as_str()).unwrap_or(""));
                    i += 2;
                } else {
                    out.push('$');
                    i += 1;
                }
            }
            _ => {
                out.push('$');
                i += 1;
            }
        }
    }
}

/* ===================== Arrays ===================== */

fn callback_args(item: &Value, index: usize, array: &Value) -> Vec<Value> {
    vec![item.clone(), Value::Num(index as f64), array.clone()]
}

fn callback(args: &[Value]) -> Result<Value> {
    let f = arg(args, 0);
    if f.is_callable() {
        Ok(f)
    } else {
        Err(type_error(format!("{} is not a function", f.to_js_string())))
    }
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

fn flatten_into(out: &mut Vec<Value>, items: &[Value], depth: f64) {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => flatten_into(out, &inner.borrow(), depth - 1.0),
            other => out.push(other.clone()),
        }
    }
}

fn array_method(
    interp: &mut Interpreter,
    receiver: &Value,
    items: &ArrayRef,
    name: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let len = items.borrow().len();
    // Callbacks may mutate the array; iterate over a snapshot.
    let snapshot = || items.borrow().clone();
    Ok(match name {
        "push" => {
            let mut items = items.borrow_mut();
            items.extend(args);
            Value::Num(items.len() as f64)
        }
        "pop" => items.borrow_mut().pop().unwrap_or_default(),
        "shift" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        }
        "unshift" => {
            let mut items = items.borrow_mut();
            items.splice(0..0, args);
            Value::Num(items.len() as f64)
        }
        "slice" => {
            let start = relative_index(&arg(&args, 0), len);
            let end = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => relative_index(v, len),
                _ => len,
            };
            let items = items.borrow();
            Value::array(if start < end { items[start..end].to_vec() } else { Vec::new() })
        }
        "splice" => {
            let start = relative_index(&arg(&args, 0), len);
            let delete = match args.len() {
                0 => 0,
                1 => len - start,
                _ => clamp_index(&args[1], len - start),
            };
            let inserted: Vec<Value> = args.iter().skip(2).cloned().collect();
            let removed: Vec<Value> = items.borrow_mut().splice(start..start + delete, inserted).collect();
            Value::array(removed)
        }
        "concat" => {
            let mut out = snapshot();
            for a in &args {
                match a {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::array(out)
        }
        "join" | "toString" => {
            let sep = match args.first() {
                Some(v) if name == "join" && !matches!(v, Value::Undefined) => v.to_js_string(),
                _ => ",".to_string(),
            };
            Value::Str(
                items
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .join(&sep),
            )
        }
        "reverse" => {
            items.borrow_mut().reverse();
            receiver.clone()
        }
        "sort" => {
            let mut sorted = snapshot();
            let comparator = arg(&args, 0);
            let mut failure = None;
            sorted.sort_by(|a, b| {
                // undefined always sorts last
                match (a, b) {
                    (Value::Undefined, Value::Undefined) => return Ordering::Equal,
                    (Value::Undefined, _) => return Ordering::Greater,
                    (_, Value::Undefined) => return Ordering::Less,
                    _ => {}
                }
                if failure.is_some() {
                    return Ordering::Equal;
                }
                if comparator.is_callable() {
                    match interp.call(&comparator, Value::Undefined, vec![a.clone(), b.clone()]) {
                        Ok(v) => v.to_number().partial_cmp(&0.0).unwrap_or(Ordering::Equal),
                        Err(e) => {
                            failure = Some(e);
                            Ordering::Equal
                        }
                    }
                } else {
                    a.to_js_string().cmp(&b.to_js_string())
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            *items.borrow_mut() = sorted;
            receiver.clone()
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            let from = relative_index(&arg(&args, 1), len);
            let found = items.borrow().iter().skip(from).position(|v| strict_equals(v, &needle));
            Value::Num(found.map(|i| (i + from) as f64).unwrap_or(-1.0))
        }
        "lastIndexOf" => {
            let needle = arg(&args, 0);
            let found = items.borrow().iter().rposition(|v| strict_equals(v, &needle));
            Value::Num(found.map(|i| i as f64).unwrap_or(-1.0))
        }
        "includes" => {
            let needle = arg(&args, 0);
            Value::Bool(items.borrow().iter().any(|v| same_value_zero(v, &needle)))
        }
        "find" | "findIndex" | "findLast" | "findLastIndex" => {
            let f = callback(&args)?;
            let snapshot = snapshot();
            let mut order: Vec<usize> = (0..snapshot.len()).collect();
            if name.starts_with("findLast") {
                order.reverse();
            }
            let mut hit = None;
            for i in order {
                if interp.call(&f, Value::Undefined, callback_args(&snapshot[i], i, receiver))?.is_truthy() {
                    hit = Some(i);
                    break;
                }
            }
            match (name.ends_with("Index"), hit) {
                (true, Some(i)) => Value::Num(i as f64),
                (true, None) => Value::Num(-1.0),
                (false, Some(i)) => snapshot[i].clone(),
                (false, None) => Value::Undefined,
            }
        }
        "filter" => {
            let f = callback(&args)?;
            let mut out = Vec::new();
            for (i, item) in snapshot().into_iter().enumerate() {
                if interp.call(&f, Value::Undefined, callback_args(&item, i, receiver))?.is_truthy() {
                    out.push(item);
                }
            }
            Value::array(out)
        }
        "map" | "flatMap" => {
            let f = callback(&args)?;
            let mut out = Vec::new();
            for (i, item) in snapshot().into_iter().enumerate() {
                out.push(interp.call(&f, Value::Undefined, callback_args(&item, i, receiver))?);
            }
            if name == "flatMap" {
                let mut flat = Vec::new();
                flatten_into(&mut flat, &out, 1.0);
                out = flat;
            }
            Value::array(out)
        }
        "forEach" => {
            let f = callback(&args)?;
            for (i, item) in snapshot().into_iter().enumerate() {
                interp.call(&f, Value::Undefined, callback_args(&item, i, receiver))?;
            }
            Value::Undefined
        }
        "some" | "every" => {
            let f = callback(&args)?;
            let want = name == "some";
            let mut result = !want;
            for (i, item) in snapshot().into_iter().enumerate() {
                if interp.call(&f, Value::Undefined, callback_args(&item, i, receiver))?.is_truthy() == want {
                    result = want;
                    break;
                }
            }
            Value::Bool(result)
        }
        "reduce" | "reduceRight" => {
            let f = callback(&args)?;
            let mut indexed: Vec<(usize, Value)> = snapshot().into_iter().enumerate().collect();
            if name == "reduceRight" {
                indexed.reverse();
            }
            let mut indexed = indexed.into_iter();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match indexed.next() {
                    Some((_, first)) => first,
                    None => return Err(type_error("Reduce of empty array with no initial value")),
                },
            };
            for (i, item) in indexed {
                acc = interp.call(&f, Value::Undefined, vec![acc, item, Value::Num(i as f64), receiver.clone()])?;
            }
            acc
        }
        "flat" => {
            let depth = match args.first() {
                Some(v) if !matches!(v, Value::Undefined) => v.to_number(),
                _ => 1.0,
            };
            let mut out = Vec::new();
            flatten_into(&mut out, &snapshot(), depth);
            Value::array(out)
        }
        "fill" => {
            let value = arg(&args, 0);
            let start = relative_index(&arg(&args, 1), len);
            let end = match args.get(2) {
                Some(v) if !matches!(v, Value::Undefined) => relative_index(v, len),
                _ => len,
            };
            for slot in items.borrow_mut().iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            receiver.clone()
        }
        "at" => {
            let i = to_integer(&arg(&args, 0));
            let i = if i < 0.0 { len as f64 + i } else { i };
            if i < 0.0 {
                Value::Undefined
            } else {
                get_property(receiver, &format_number(i))?
            }
        }
        _ => return Err(type_error(format!("array.{name} is not a function"))),
    })
}

/* ===================== Numbers, regexes, functions ===================== */

fn number_method(n: f64, name: &str, args: &[Value]) -> Result<Value> {
    Ok(match name {
        "toFixed" => {
            let digits = to_integer(&arg(args, 0));
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::Runtime("RangeError: toFixed() digits argument must be between 0 and 100".into()));
            }
            if !n.is_finite() || n.abs() >= 1e21 {
                Value::Str(format_number(n))
            } else {
                let n = if n == 0.0 { 0.0 } else { n };
                Value::Str(format!("{:.*}", digits as usize, n))
            }
        }
        "toString" => match args.first() {
            Some(radix) if !matches!(radix, Value::Undefined) => {
                let radix = to_integer(radix);
                if !(2.0..=36.0).contains(&radix) {
                    return Err(EvalError::Runtime("RangeError: toString() radix must be between 2 and 36".into()));
                }
                Value::Str(to_radix(n, radix as u32))
            }
            _ => Value::Str(format_number(n)),
        },
        "valueOf" => Value::Num(n),
        _ => Value::Str(format_number(n)),
    })
}

fn to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() {
        return format_number(n);
    }
    let negative = n < 0.0;
    let mut int = n.abs().trunc();
    let mut frac = n.abs().fract();
    let mut digits = Vec::new();
    loop {
        let d = (int % radix as f64) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        int = (int / radix as f64).trunc();
        if int < 1.0 {
            break;
        }
    }
    if negative {
        digits.push('-');
    }
    let mut out: String = digits.into_iter().rev().collect();
    if frac > 0.0 {
        out.push('.');
        for _ in 0..20 {
            frac *= radix as f64;
            let d = frac.trunc() as u32;
            out.push(std::char::from_digit(d, radix).unwrap_or('0'));
            frac = frac.fract();
            if frac == 0.0 {
                break;
            }
        }
    }
    out
}

fn regex_method(re: &RegexValue, name: &str, args: &[Value]) -> Result<Value> {
    let input = arg(args, 0).to_js_string();
    Ok(match name {
        "test" => Value::Bool(re.regex.is_match(&input).map_err(match_error)?),
        "exec" => re.regex.captures(&input).map_err(match_error)?.map(|c| captures_to_array(&c)).unwrap_or(Value::Null),
        _ => Value::Str(format!("/{}/{}", re.source, re.flags)),
    })
}

fn function_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value> {
    let mut args = args.into_iter();
    let this = args.next().unwrap_or_default();
    match name {
        "call" => interp.call(receiver, this, args.collect()),
        "apply" => {
            let list = match args.next() {
                Some(v) if !v.is_nullish() => interp.iterate(&v)?,
                _ => Vec::new(),
            };
            interp.call(receiver, this, list)
        }
        "bind" => Ok(Value::native(Bound::new(receiver.clone(), this, args.collect()))),
        _ => Ok(Value::Str(receiver.to_js_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvalOptions, Evaluator};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn eval(src: &str) -> serde_json::Value {
        let value = Evaluator::default().evaluate(src, &Default::default(), &EvalOptions::propagate()).unwrap();
        value.to_json().unwrap_or(serde_json::Value::Null)
    }

    #[test]
    fn string_slicing_counts_characters() {
        assert_eq!(eval("'héllo'.slice(1, -1)"), json!("éll"));
        assert_eq!(eval("'abc'.substring(2, 0)"), json!("ab"));
        assert_eq!(eval("'abcdef'.substr(-3, 2)"), json!("de"));
        assert_eq!(eval("'7'.padStart(3, '0')"), json!("007"));
        assert_eq!(eval("'ab'.repeat(3)"), json!("ababab"));
    }

    #[test]
    fn string_search() {
        assert_eq!(eval("'ünïcode'.indexOf('c')"), json!(3));
        assert_eq!(eval("'a-b-c'.lastIndexOf('-')"), json!(3));
        assert_eq!(eval("'hello'.search(/l+/)"), json!(2));
        assert_eq!(eval("'hello'.includes('ell')"), json!(true));
    }

    #[test]
    fn split_variants() {
        assert_eq!(eval("'a,b,,c'.split(',')"), json!(["a", "b", "", "c"]));
        assert_eq!(eval("'abc'.split('')"), json!(["a", "b", "c"]));
        assert_eq!(eval("'a1b22c'.split(/\\d+/)"), json!(["a", "b", "c"]));
        assert_eq!(eval("'a1b'.split(/(\\d)/)"), json!(["a", "1", "b"]));
        assert_eq!(eval("'a b c'.split(' ', 2)"), json!(["a", "b"]));
    }

    #[test]
    fn replace_expands_patterns() {
        assert_eq!(eval("'john smith'.replace(/(\\w+) (\\w+)/, '$2, $1')"), json!("smith, john"));
        assert_eq!(eval("'aaa'.replace('a', 'b')"), json!("baa"));
        assert_eq!(eval("'aaa'.replaceAll('a', '$&$&')"), json!("aaaaaa"));
        assert_eq!(eval("'x1y2'.replace(/\\d/g, d => d * 10)"), json!("x10y20"));
        assert_eq!(eval("'cost'.replace(/o/, '$$')"), json!("c$st"));
    }

    #[test]
    fn match_and_exec() {
        assert_eq!(eval("'a1b2'.match(/\\d/g)"), json!(["1", "2"]));
        assert_eq!(eval("'key=val'.match(/(\\w+)=(\\w+)/)"), json!(["key=val", "key", "val"]));
        assert_eq!(eval("'none'.match(/\\d/)"), serde_json::Value::Null);
        assert_eq!(eval("'ab cb ab'.match(/(?<=a)b/g)"), json!(["b", "b"]));
        assert_eq!(eval("'price: $30, 40'.match(/(?<!\\d)\\d+(?= *$)/)[0]"), json!("40"));
        assert_eq!(eval("'a-a b-c'.replace(/(\\w)-\\1/, '[$1]')"), json!("[a] b-c"));
        assert_eq!(eval("/b(.)/.exec('abc')"), json!(["bc", "c"]));
    }

    #[test]
    fn array_higher_order_methods() {
        assert_eq!(eval("[3, 1, 2].map((x, i) => x * i)"), json!([0, 1, 4]));
        assert_eq!(eval("[1, 2, 3, 4].filter(x => x % 2).join('-')"), json!("1-3"));
        assert_eq!(eval("[1, 2, 3].reduce((a, b) => a + b)"), json!(6));
        assert_eq!(eval("[1, 2, 3].reduceRight((a, b) => a + b, '')"), json!("321"));
        assert_eq!(eval("[5, 6].findIndex(x => x > 5)"), json!(1));
        assert_eq!(eval("[[1], [2, [3]]].flat()"), json!([1, 2, [3]]));
    }

    #[test]
    fn array_mutation_and_sorting() {
        assert_eq!(eval("const a = [10, 9, 1]; a.sort(); a"), json!([1, 10, 9]));
        assert_eq!(eval("[10, 9, 1].sort((a, b) => a - b)"), json!([1, 9, 10]));
        assert_eq!(eval("const a = [1, 2, 3, 4]; const r = a.splice(1, 2, 'x'); [a, r]"), json!([[1, "x", 4], [2, 3]]));
        assert_eq!(eval("[NaN].includes(NaN)"), json!(true));
        assert_eq!(eval("[1, 2, 3].at(-1)"), json!(3));
    }

    #[test]
    fn numbers_and_functions() {
        assert_eq!(eval("(1.005).toFixed(1)"), json!("1.0"));
        assert_eq!(eval("(255).toString(16)"), json!("ff"));
        assert_eq!(eval("(0.5).toString(2)"), json!("0.1"));
        assert_eq!(eval("function add(a, b) { return a + b } add.call(null, 1, 2) + add.apply(null, [3, 4])"), json!(10));
        assert_eq!(eval("const f = ((a, b) => a * b).bind(null, 6); f(7)"), json!(42));
    }

    #[test]
    fn unknown_methods_are_type_errors() {
        let err = Evaluator::default()
            .evaluate("'x'.nope()", &Default::default(), &EvalOptions::propagate())
            .unwrap_err();
        assert!(err.to_string().contains("string.nope is not a function"));
    }
}
