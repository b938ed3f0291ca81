//! Runtime values of the guest language and their coercions.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use itertools::Itertools;
use fancy_regex::Regex;
use serde_json::{Map, Number, Value as JsonValue};

use crate::ast::FunctionDef;
use crate::errors::{EvalError, Result};
use crate::functions::Function;
use crate::interpreter::Scope;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;

/// A guest value. Arrays, objects and functions are shared by reference.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Closure(Rc<Closure>),
    Native(Rc<dyn Function>),
    Regex(Rc<RegexValue>),
}

/// A user-defined function together with the scope it was created in.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Scope>,
}

/// A compiled regular expression literal. Lookaround and backreferences are
/// supported; everything else runs on the linear-time engine.
pub struct RegexValue {
    pub source: String,
    pub flags: String,
    pub regex: Regex,
}

impl RegexValue {
    /// Compile a pattern with JS-style flags. `g` is kept for the caller; `u` and `y` are ignored.
    pub fn new(source: &str, flags: &str) -> Result<Self> {
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => inline.push(flag),
                'g' | 'u' | 'y' | 'd' => {}
                other => {
                    return Err(EvalError::Runtime(format!(
                        "Invalid flags supplied to RegExp constructor '{other}'"
                    )))
                }
            }
        }
        let translated = translate_pattern(source);
        let pattern = if inline.is_empty() {
            translated
        } else {
            format!("(?{inline}){translated}")
        };
        let regex = Regex::new(&pattern).map_err(|e| {
            EvalError::Runtime(format!("Invalid regular expression: /{source}/: {e}"))
        })?;
        Ok(Self { source: source.to_string(), flags: flags.to_string(), regex })
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }
}

/// A failure while running a compiled pattern, such as hitting the backtracking limit.
pub fn match_error(e: fancy_regex::Error) -> EvalError {
    EvalError::Runtime(format!("regular expression failed: {e}"))
}

// `\/` is an escaped delimiter in a JS literal. `\d` and `\w` are ASCII-only
// in JS but Unicode-aware in the engine, so they are spelled out.
fn translate_pattern(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('/') => out.push('/'),
                Some('d') if in_class => out.push_str("0-9"),
                Some('w') if in_class => out.push_str("0-9A-Za-z_"),
                Some('d') => out.push_str("[0-9]"),
                Some('D') if !in_class => out.push_str("[^0-9]"),
                Some('w') => out.push_str("[0-9A-Za-z_]"),
                Some('W') if !in_class => out.push_str("[^0-9A-Za-z_]"),
                Some(n) => {
                    out.push('\\');
                    out.push(n);
                }
                None => out.push('\\'),
            },
            '[' if !in_class => {
                in_class = true;
                out.push(c);
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(fields: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(fields)))
    }

    pub fn empty_object() -> Self {
        Value::object(IndexMap::new())
    }

    pub fn native(f: impl Function + 'static) -> Self {
        Value::Native(Rc::new(f))
    }

    pub fn number_or_undefined(n: Option<f64>) -> Self {
        n.map(Value::Num).unwrap_or(Value::Undefined)
    }

    pub fn string_or_undefined(s: Option<&str>) -> Self {
        s.map(Value::str).unwrap_or(Value::Undefined)
    }

    /// The object `new Error(message)` produces.
    pub fn error_object(name: &str, message: &str) -> Self {
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), Value::str(name));
        fields.insert("message".to_string(), Value::str(message));
        Value::object(fields)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Native(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Closure(_) | Value::Native(_) => "function",
            Value::Array(_) | Value::Object(_) | Value::Regex(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// ToNumber.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Num(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(_) => string_to_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    /// ToString.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Closure(c) => match &c.def.name {
                Some(name) => format!("function {name}() {{ [code] }}"),
                None => "() => { [code] }".to_string(),
            },
            Value::Native(f) => format!("function {}() {{ [native code] }}", f.name()),
            Value::Regex(r) => format!("/{}/{}", r.source, r.flags),
        }
    }

    /// Copy arrays and objects recursively; functions and regexes stay shared.
    pub fn deep_copy(&self) -> Value {
        self.deep_copy_at(0)
    }

    fn deep_copy_at(&self, depth: usize) -> Value {
        if depth > 64 {
            return self.clone();
        }
        match self {
            Value::Array(items) => {
                Value::array(items.borrow().iter().map(|v| v.deep_copy_at(depth + 1)).collect())
            }
            Value::Object(fields) => Value::object(
                fields
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy_at(depth + 1)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Bridge from `serde_json` (used by `JSON.parse` and `.json` modules).
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::str(s.as_str()),
            JsonValue::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::object(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            ),
        }
    }

    /// Bridge to `serde_json`; `None` for values JSON cannot represent (undefined, functions).
    pub fn to_json(&self) -> Option<JsonValue> {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> Option<JsonValue> {
        if depth > 64 {
            return Some(JsonValue::Null);
        }
        Some(match self {
            Value::Undefined | Value::Closure(_) | Value::Native(_) => return None,
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                    JsonValue::Number(Number::from(*n as i64))
                } else {
                    Number::from_f64(*n).map(JsonValue::Number).unwrap_or(JsonValue::Null)
                }
            }
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_at(depth + 1).unwrap_or(JsonValue::Null))
                    .collect(),
            ),
            Value::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields.borrow().iter() {
                    if let Some(j) = v.to_json_at(depth + 1) {
                        map.insert(k.clone(), j);
                    }
                }
                JsonValue::Object(map)
            }
            Value::Regex(_) => JsonValue::Object(Map::new()),
        })
    }
}

/// Number formatting following `Number.prototype.toString()`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{n}");
    }
    // 1e21 -> "1e+21", 1e-7 -> "1e-7"
    let exp = format!("{n:e}");
    match exp.split_once('e') {
        Some((mantissa, e)) if !e.starts_with('-') => format!("{mantissa}e+{e}"),
        _ => exp,
    }
}

/// ToNumber applied to a string.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map(|v| v as f64).unwrap_or(f64::NAN);
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts "inf"/"nan" spellings that JS does not.
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Object(fields) => {
                let message = fields.borrow().get("message").map(|m| m.to_js_string());
                match message {
                    Some(m) => f.write_str(&m),
                    None => f.write_str(&self.to_js_string()),
                }
            }
            other => f.write_str(&other.to_js_string()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(fields) => f.debug_map().entries(fields.borrow().iter()).finish(),
            other => f.write_str(&other.to_js_string()),
        }
    }
}

/// Primitives compare by value, everything else by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Regex(a), Value::Regex(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn string_coercion_to_number() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::str("").is_truthy());
        assert!(!Value::Num(0.0).is_truthy());
        assert!(!Value::Num(f64::NAN).is_truthy());
        assert!(Value::empty_object().is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn array_to_string_skips_nullish() {
        let v = Value::array(vec![Value::Num(1.0), Value::Null, Value::str("x")]);
        assert_eq!(v.to_js_string(), "1,,x");
    }

    #[test]
    fn json_bridge() {
        let v = Value::from_json(&json!({"a": [1, 2.5, null], "b": "s"}));
        assert_eq!(v.to_json(), Some(json!({"a": [1, 2.5, null], "b": "s"})));
        assert_eq!(Value::Undefined.to_json(), None);
    }

    #[test]
    fn deep_copy_detaches_nested_arrays() {
        let inner = Value::array(vec![Value::Num(1.0)]);
        let outer = Value::array(vec![inner.clone()]);
        let copy = outer.deep_copy();
        if let Value::Array(items) = &inner {
            items.borrow_mut().push(Value::Num(2.0));
        }
        assert_eq!(copy.to_json(), Some(json!([[1]])));
    }

    #[test]
    fn regex_flags() {
        let re = RegexValue::new("A", "gi").unwrap();
        assert!(re.is_global());
        assert!(re.regex.is_match("a").unwrap());
        assert!(RegexValue::new("a", "q").is_err());
        assert!(RegexValue::new("(", "").is_err());
        assert!(RegexValue::new(r"a\/b", "").unwrap().regex.is_match("a/b").unwrap());
    }

    #[test]
    fn digit_and_word_classes_are_ascii() {
        assert_eq!(translate_pattern(r"\d+\.\w[\d_]\D\W[^\w]"), r"[0-9]+\.[0-9A-Za-z_][0-9_][^0-9][^0-9A-Za-z_][^0-9A-Za-z_]");
        let digits = RegexValue::new(r"\d+", "").unwrap();
        assert_eq!(digits.regex.find("٣ 5").unwrap().map(|m| m.as_str()), Some("5"));
        assert!(!RegexValue::new(r"^\w$", "").unwrap().regex.is_match("é").unwrap());
    }

    #[test]
    fn lookaround_and_backreferences_compile() {
        let behind = RegexValue::new("(?<=a)b", "g").unwrap();
        assert_eq!(behind.regex.find("cbab").unwrap().map(|m| m.start()), Some(3));
        let repeated = RegexValue::new(r"(\w)\1", "").unwrap();
        assert!(repeated.regex.is_match("hello").unwrap());
        assert!(!repeated.regex.is_match("helo").unwrap());
    }
}
